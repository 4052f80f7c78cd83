//! The record-store seam.
//!
//! The engine never owns records; it drives a [`Store`] implementation with
//! the outcomes of each batch. Response handlers call these methods
//! *before* any user callback runs, so callbacks always observe the
//! post-response store state.
//!
//! Notification methods default to no-ops so test stores only implement
//! what they assert on; the two getters default to `None`.

use serde_json::{Map, Value};

/// The store interface the engine consumes.
pub trait Store: Send + Sync {
    /// Fresh records arrived from a `/get`. `is_all` marks a type-wide
    /// fetch, after which the store may treat missing records as gone.
    fn did_fetch_records(
        &self,
        account_id: &str,
        type_id: &str,
        records: Vec<Value>,
        state: Option<&str>,
        is_all: bool,
    ) {
        let _ = (account_id, type_id, records, state, is_all);
    }

    /// A partial projection of records arrived (e.g. a headers-only fetch).
    fn did_fetch_partial_records(&self, account_id: &str, type_id: &str, records: Vec<Value>) {
        let _ = (account_id, type_id, records);
    }

    /// The server reported these ids as not found.
    fn could_not_find_records(&self, account_id: &str, type_id: &str, ids: &[String]) {
        let _ = (account_id, type_id, ids);
    }

    /// A `/changes` delta arrived. `None` lists mean "unknown": the store
    /// must treat every record of the type as possibly changed (forced
    /// reconciliation).
    fn did_fetch_updates(
        &self,
        account_id: &str,
        type_id: &str,
        changed: Option<Vec<String>>,
        destroyed: Option<Vec<String>>,
        old_state: &str,
        new_state: &str,
    ) {
        let _ = (account_id, type_id, changed, destroyed, old_state, new_state);
    }

    /// Creations committed; map of store key → server record.
    fn did_commit_create(&self, account_id: &str, type_id: &str, created: Map<String, Value>) {
        let _ = (account_id, type_id, created);
    }

    /// Creations rejected; map of store key → server error object.
    fn did_not_create(
        &self,
        account_id: &str,
        type_id: &str,
        errors: Map<String, Value>,
        is_permanent: bool,
    ) {
        let _ = (account_id, type_id, errors, is_permanent);
    }

    /// Updates committed; keyed by store key where [`Store::get_store_key`]
    /// resolves the record, by server id otherwise. The value is the
    /// server-applied delta (may be `Null` when the server echoes nothing).
    fn did_commit_update(&self, account_id: &str, type_id: &str, updated: Map<String, Value>) {
        let _ = (account_id, type_id, updated);
    }

    /// Updates rejected; map of server id → server error object.
    fn did_not_update(
        &self,
        account_id: &str,
        type_id: &str,
        errors: Map<String, Value>,
        is_permanent: bool,
    ) {
        let _ = (account_id, type_id, errors, is_permanent);
    }

    /// Destroys committed; keyed like [`Store::did_commit_update`].
    fn did_commit_destroy(&self, account_id: &str, type_id: &str, destroyed: Vec<String>) {
        let _ = (account_id, type_id, destroyed);
    }

    /// Destroys rejected; map of server id → server error object.
    fn did_not_destroy(
        &self,
        account_id: &str,
        type_id: &str,
        errors: Map<String, Value>,
        is_permanent: bool,
    ) {
        let _ = (account_id, type_id, errors, is_permanent);
    }

    /// The type state moved as a result of a commit.
    fn commit_did_change_state(
        &self,
        account_id: &str,
        type_id: &str,
        old_state: &str,
        new_state: &str,
    ) {
        let _ = (account_id, type_id, old_state, new_state);
    }

    /// Client-side surrogate key for a server id, if the record is known.
    fn get_store_key(&self, account_id: &str, type_id: &str, id: &str) -> Option<String> {
        let _ = (account_id, type_id, id);
        None
    }

    /// The last known server state for a type, if any.
    fn get_type_state(&self, account_id: &str, type_id: &str) -> Option<String> {
        let _ = (account_id, type_id);
        None
    }

    /// Mark every record of the type obsolete ahead of a forced resync.
    fn mark_all_obsolete(&self, account_id: &str, type_id: &str) {
        let _ = (account_id, type_id);
    }
}
