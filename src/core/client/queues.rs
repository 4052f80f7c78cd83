//! Per-connection pending work.
//!
//! Record-level work accumulates synchronously in these queues and is
//! drained into one batched request per flush. The queue keys are
//! `(account, type)`; the innermost shape distinguishes a type-wide fetch
//! (membership in `types_to_fetch`), a delta refresh from a known state
//! (`types_to_refresh`), and targeted ids (`records_to_*`).
//!
//! A pending type-wide fetch supersedes targeted ids for the same
//! `(account, type)` in the sense that the type-wide form is only issued
//! once; targeted ids still go out when both are queued.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use crate::core::types::MethodCall;

/// A callback bound to one method call, invoked with
/// `(response_arguments, response_name, request_arguments)` once the batch
/// completes.
pub type ResponseCallback = Box<dyn FnOnce(&Value, &str, &Value) + Send>;

/// A pending query fetch.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    /// Unique id of the query; re-fetching the same id coalesces.
    pub id: String,
    /// Account the query runs against.
    pub account_id: String,
    /// Engine-side record type id the query returns.
    pub type_id: String,
    /// Query arguments (`filter`, `sort`, `position`, ...).
    pub arguments: Value,
}

/// All pending work for one connection.
#[derive(Default)]
pub struct WorkQueues {
    /// Method calls already shaped, in append order; the client tag is the
    /// decimal index at append time.
    pub send_queue: Vec<MethodCall>,

    /// `(client_tag, callback)` pairs; an empty tag marks an unconditional
    /// callback with no bound response.
    pub callback_queue: Vec<(String, ResponseCallback)>,

    /// Pending query fetches, keyed by query id.
    pub queries_to_fetch: BTreeMap<String, QueryRequest>,

    /// Account → types to fetch wholesale.
    pub types_to_fetch: BTreeMap<String, BTreeSet<String>>,

    /// Account → type → state to refresh from (`None`: let the store's
    /// last known state decide at drain time).
    pub types_to_refresh: BTreeMap<String, BTreeMap<String, Option<String>>>,

    /// Account → type → ids to fetch.
    pub records_to_fetch: BTreeMap<String, BTreeMap<String, BTreeSet<String>>>,

    /// Account → type → ids to re-fetch even if cached.
    pub records_to_refresh: BTreeMap<String, BTreeMap<String, BTreeSet<String>>>,
}

impl WorkQueues {
    /// Queue a type-wide fetch.
    pub fn fetch_type(&mut self, account_id: &str, type_id: &str) {
        self.types_to_fetch
            .entry(account_id.to_owned())
            .or_default()
            .insert(type_id.to_owned());
    }

    /// Queue a targeted record fetch.
    pub fn fetch_record(&mut self, account_id: &str, type_id: &str, id: &str) {
        self.records_to_fetch
            .entry(account_id.to_owned())
            .or_default()
            .entry(type_id.to_owned())
            .or_default()
            .insert(id.to_owned());
    }

    /// Queue a delta refresh for a type. A later call with a state wins
    /// over an earlier `None`.
    pub fn refresh_type(&mut self, account_id: &str, type_id: &str, state: Option<String>) {
        let entry = self
            .types_to_refresh
            .entry(account_id.to_owned())
            .or_default()
            .entry(type_id.to_owned())
            .or_default();
        if state.is_some() {
            *entry = state;
        }
    }

    /// Queue a targeted record refresh.
    pub fn refresh_record(&mut self, account_id: &str, type_id: &str, id: &str) {
        self.records_to_refresh
            .entry(account_id.to_owned())
            .or_default()
            .entry(type_id.to_owned())
            .or_default()
            .insert(id.to_owned());
    }

    /// Queue a query fetch; queries with the same id coalesce.
    pub fn fetch_query(&mut self, query: QueryRequest) {
        self.queries_to_fetch.insert(query.id.clone(), query);
    }

    /// Whether any queue holds work.
    #[must_use]
    pub fn has_work(&self) -> bool {
        !self.send_queue.is_empty()
            || !self.callback_queue.is_empty()
            || !self.queries_to_fetch.is_empty()
            || !self.types_to_fetch.is_empty()
            || !self.types_to_refresh.is_empty()
            || !self.records_to_fetch.is_empty()
            || !self.records_to_refresh.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fetch_record_accumulates() {
        let mut queues = WorkQueues::default();
        assert!(!queues.has_work());
        queues.fetch_record("A1", "Message", "m1");
        queues.fetch_record("A1", "Message", "m2");
        queues.fetch_record("A1", "Message", "m1");
        let ids = &queues.records_to_fetch["A1"]["Message"];
        assert_eq!(ids.len(), 2);
        assert!(queues.has_work());
    }

    #[test]
    fn test_refresh_state_upgrade() {
        let mut queues = WorkQueues::default();
        queues.refresh_type("A1", "Message", None);
        assert_eq!(queues.types_to_refresh["A1"]["Message"], None);
        queues.refresh_type("A1", "Message", Some("s4".into()));
        assert_eq!(
            queues.types_to_refresh["A1"]["Message"],
            Some("s4".to_owned())
        );
        // A later None does not erase a known state
        queues.refresh_type("A1", "Message", None);
        assert_eq!(
            queues.types_to_refresh["A1"]["Message"],
            Some("s4".to_owned())
        );
    }

    #[test]
    fn test_queries_coalesce_by_id() {
        let mut queues = WorkQueues::default();
        queues.fetch_query(QueryRequest {
            id: "inbox".into(),
            account_id: "A1".into(),
            type_id: "Message".into(),
            arguments: json!({"position": 0}),
        });
        queues.fetch_query(QueryRequest {
            id: "inbox".into(),
            account_id: "A1".into(),
            type_id: "Message".into(),
            arguments: json!({"position": 50}),
        });
        assert_eq!(queues.queries_to_fetch.len(), 1);
        assert_eq!(
            queues.queries_to_fetch["inbox"].arguments,
            json!({"position": 50})
        );
    }

    #[test]
    fn test_type_wide_and_targeted_coexist() {
        let mut queues = WorkQueues::default();
        queues.fetch_type("A1", "Message");
        queues.fetch_record("A1", "Message", "m1");
        assert!(queues.types_to_fetch["A1"].contains("Message"));
        assert!(queues.records_to_fetch["A1"]["Message"].contains("m1"));
    }
}
