//! Handler registration and response dispatch.
//!
//! A registry maps record types to their fetch/refresh/commit/query
//! handlers and response method names to response handlers. Registries
//! layer: a connection's own table shadows a shared base table, and
//! registration always writes the own table, so shared defaults are never
//! mutated.
//!
//! Error responses dispatch through four tiers, most specific first:
//! `(method, error type)` → `method` → `/verb` → `error type`.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use serde_json::Value;

use crate::core::client::connection::Connection;
use crate::core::client::queues::QueryRequest;
use crate::core::error::Result;
use crate::core::types::ChangeSet;

/// Handler driving a type-wide or targeted fetch at drain time.
pub type FetchFn =
    Arc<dyn Fn(&mut Connection, &str, Option<&BTreeSet<String>>) -> Result<()> + Send + Sync>;

/// Handler driving a refresh; receives the optional since-state.
pub type RefreshFn = Arc<
    dyn Fn(&mut Connection, &str, Option<&BTreeSet<String>>, Option<&str>) -> Result<()>
        + Send
        + Sync,
>;

/// Handler turning a change-set into `/set` and `/copy` calls.
pub type CommitFn = Arc<dyn Fn(&mut Connection, &ChangeSet) -> Result<()> + Send + Sync>;

/// Handler turning a pending query into method calls.
pub type QueryFn = Arc<dyn Fn(&mut Connection, &QueryRequest) -> Result<()> + Send + Sync>;

/// Handler for one routed method response. Receives
/// `(connection, response_arguments, request_name, request_arguments)`.
pub type ResponseFn =
    Arc<dyn Fn(&mut Connection, &Value, &str, &Value) -> Result<()> + Send + Sync>;

/// A per-type handler: either the wire name of the JMAP type, driving the
/// connection's built-in behaviour, or a custom function.
#[derive(Clone)]
pub enum TypeHandler<F> {
    /// Use the built-in behaviour against this JMAP wire type.
    Named(String),
    /// Custom behaviour.
    Custom(F),
}

/// The handlers registered for one record type.
#[derive(Clone, Default)]
pub struct TypeHandlers {
    /// Drain priority; higher drains first within each queue.
    pub precedence: i32,
    /// Fetch handler.
    pub fetch: Option<TypeHandler<FetchFn>>,
    /// Refresh handler.
    pub refresh: Option<TypeHandler<RefreshFn>>,
    /// Commit handler.
    pub commit: Option<TypeHandler<CommitFn>>,
    /// Query handler; `None` uses the built-in `<Type>/query` call.
    pub query: Option<QueryFn>,
}

/// Dispatch key for a response handler.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResponseKey {
    /// A successful method response, by method name.
    Method(String),
    /// An error on a specific method with a specific JMAP error type.
    ErrorOnMethodOfType(String, String),
    /// Any error on a specific method.
    ErrorOnMethod(String),
    /// Any error on any method with this verb (key shaped `/set`).
    ErrorOnVerb(String),
    /// Any error of this JMAP error type.
    ErrorOfType(String),
}

/// One layer of handler tables.
#[derive(Clone, Default)]
pub struct RegistryTables {
    records: HashMap<String, TypeHandlers>,
    record_order: Vec<String>,
    responses: HashMap<ResponseKey, ResponseFn>,
}

impl RegistryTables {
    /// Register the handlers for a record type.
    pub fn insert_record(&mut self, type_id: impl Into<String>, handlers: TypeHandlers) {
        let type_id = type_id.into();
        if !self.records.contains_key(&type_id) {
            self.record_order.push(type_id.clone());
        }
        self.records.insert(type_id, handlers);
    }

    /// Register a response handler.
    pub fn insert_response(&mut self, key: ResponseKey, handler: ResponseFn) {
        self.responses.insert(key, handler);
    }
}

/// A connection's view of its handlers: an own table shadowing an optional
/// shared base.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    base: Option<Arc<RegistryTables>>,
    own: RegistryTables,
}

impl HandlerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry shadowing `base`.
    #[must_use]
    pub fn with_base(base: Arc<RegistryTables>) -> Self {
        HandlerRegistry {
            base: Some(base),
            own: RegistryTables::default(),
        }
    }

    /// Register the handlers for a record type in the own table.
    pub fn insert_record(&mut self, type_id: impl Into<String>, handlers: TypeHandlers) {
        self.own.insert_record(type_id, handlers);
    }

    /// Register a response handler in the own table.
    pub fn insert_response(&mut self, key: ResponseKey, handler: ResponseFn) {
        self.own.insert_response(key, handler);
    }

    /// The handlers for a record type, own table first.
    #[must_use]
    pub fn record_handlers(&self, type_id: &str) -> Option<&TypeHandlers> {
        self.own
            .records
            .get(type_id)
            .or_else(|| self.base.as_ref().and_then(|b| b.records.get(type_id)))
    }

    /// All registered record types, highest precedence first, stable by
    /// registration order within equal precedence. Base types come after
    /// own types of equal precedence.
    #[must_use]
    pub fn record_types_by_precedence(&self) -> Vec<String> {
        let mut types: Vec<String> = self.own.record_order.clone();
        if let Some(base) = &self.base {
            for type_id in &base.record_order {
                if !self.own.records.contains_key(type_id) && !types.contains(type_id) {
                    types.push(type_id.clone());
                }
            }
        }
        let mut ordered: Vec<(usize, String)> = types.into_iter().enumerate().collect();
        ordered.sort_by_key(|(index, type_id)| {
            let precedence = self
                .record_handlers(type_id)
                .map(|h| h.precedence)
                .unwrap_or(0);
            (-(precedence as i64), *index)
        });
        ordered.into_iter().map(|(_, type_id)| type_id).collect()
    }

    fn response(&self, key: &ResponseKey) -> Option<ResponseFn> {
        self.own
            .responses
            .get(key)
            .or_else(|| self.base.as_ref().and_then(|b| b.responses.get(key)))
            .cloned()
    }

    /// Find the handler for a response, layering the error tiers.
    ///
    /// `request_name` is the method name of the correlated call; for error
    /// responses the lookup walks `(method, type)` → `method` → `/verb` →
    /// `type`, checking the own table before the base at every tier.
    #[must_use]
    pub fn lookup_response(
        &self,
        response_name: &str,
        error_type: Option<&str>,
        request_name: &str,
    ) -> Option<ResponseFn> {
        if response_name != "error" {
            return self.response(&ResponseKey::Method(response_name.to_owned()));
        }
        let error_type = error_type.unwrap_or("");
        if let Some(handler) = self.response(&ResponseKey::ErrorOnMethodOfType(
            request_name.to_owned(),
            error_type.to_owned(),
        )) {
            return Some(handler);
        }
        if let Some(handler) = self.response(&ResponseKey::ErrorOnMethod(request_name.to_owned()))
        {
            return Some(handler);
        }
        if let Some(verb) = request_name.split('/').nth(1) {
            if let Some(handler) = self.response(&ResponseKey::ErrorOnVerb(format!("/{verb}"))) {
                return Some(handler);
            }
        }
        self.response(&ResponseKey::ErrorOfType(error_type.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn marker(slot: Arc<AtomicUsize>, value: usize) -> ResponseFn {
        Arc::new(move |_conn, _args, _req, _req_args| {
            slot.store(value, Ordering::SeqCst);
            Ok(())
        })
    }

    #[test]
    fn test_error_tier_fallbacks() {
        let hit = Arc::new(AtomicUsize::new(0));
        let mut registry = HandlerRegistry::new();

        registry.insert_response(
            ResponseKey::ErrorOfType("stateMismatch".into()),
            marker(hit.clone(), 1),
        );
        assert!(registry
            .lookup_response("error", Some("stateMismatch"), "Email/get")
            .is_some());
        assert!(registry
            .lookup_response("error", Some("other"), "Email/get")
            .is_none());

        registry.insert_response(
            ResponseKey::ErrorOnVerb("/set".into()),
            marker(hit.clone(), 2),
        );
        assert!(registry
            .lookup_response("error", Some("other"), "Mailbox/set")
            .is_some());
        assert!(registry
            .lookup_response("error", Some("other"), "Mailbox/get")
            .is_none());

        registry.insert_response(
            ResponseKey::ErrorOnMethod("Email/changes".into()),
            marker(hit.clone(), 3),
        );
        assert!(registry
            .lookup_response("error", Some("anything"), "Email/changes")
            .is_some());

        // Non-error responses dispatch by plain method name only
        assert!(registry.lookup_response("Email/set", None, "Email/set").is_none());
    }

    #[test]
    fn test_own_shadows_base() {
        let hit = Arc::new(AtomicUsize::new(0));
        let mut base = RegistryTables::default();
        base.insert_response(
            ResponseKey::Method("Email/get".into()),
            marker(hit.clone(), 1),
        );
        base.insert_record(
            "Message",
            TypeHandlers {
                precedence: 1,
                ..Default::default()
            },
        );
        let base = Arc::new(base);

        let mut registry = HandlerRegistry::with_base(base.clone());
        // Base defaults are visible
        assert!(registry.lookup_response("Email/get", None, "Email/get").is_some());
        assert!(registry.record_handlers("Message").is_some());

        // Own registration shadows without touching the base
        registry.insert_record(
            "Message",
            TypeHandlers {
                precedence: 9,
                ..Default::default()
            },
        );
        assert_eq!(registry.record_handlers("Message").unwrap().precedence, 9);
        assert_eq!(base.records["Message"].precedence, 1);
    }

    #[test]
    fn test_precedence_ordering() {
        let mut registry = HandlerRegistry::new();
        registry.insert_record(
            "Mailbox",
            TypeHandlers {
                precedence: 2,
                ..Default::default()
            },
        );
        registry.insert_record(
            "Message",
            TypeHandlers {
                precedence: 1,
                ..Default::default()
            },
        );
        registry.insert_record(
            "Thread",
            TypeHandlers {
                precedence: 1,
                ..Default::default()
            },
        );
        assert_eq!(
            registry.record_types_by_precedence(),
            vec!["Mailbox".to_owned(), "Message".to_owned(), "Thread".to_owned()]
        );
    }
}
