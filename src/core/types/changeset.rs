//! Change-sets and `/set` / `/copy` payload construction.
//!
//! The store hands the engine one [`ChangeSet`] per record type when it
//! commits. Creations are sent whole (the store's key doubles as the
//! client-side creation id), updates are sent as JSON-Pointer patches
//! diffed from the committed snapshot, and cross-account moves become
//! `<Type>/copy` calls that destroy the original on success.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::core::types::patch::{encode_pointer_component, make_patches};

/// Records to create, keyed positionally: `store_keys[i]` names
/// `records[i]`.
#[derive(Debug, Clone, Default)]
pub struct CreateBucket {
    /// Client-side surrogate ids, used as JMAP creation ids.
    pub store_keys: Vec<String>,
    /// The full records to send.
    pub records: Vec<Value>,
}

/// Records to update, keyed positionally.
#[derive(Debug, Clone, Default)]
pub struct UpdateBucket {
    /// Client-side surrogate ids.
    pub store_keys: Vec<String>,
    /// Current record data.
    pub records: Vec<Value>,
    /// The last server-acknowledged snapshot of each record.
    pub committed: Vec<Value>,
    /// Which attributes changed; only these are diffed.
    pub changes: Vec<BTreeMap<String, bool>>,
}

impl UpdateBucket {
    /// Whether the bucket holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Records to destroy.
#[derive(Debug, Clone, Default)]
pub struct DestroyBucket {
    /// Client-side surrogate ids.
    pub store_keys: Vec<String>,
    /// Server ids to destroy.
    pub ids: Vec<String>,
}

/// All pending mutations for one record type on one account.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    /// Account the changes apply to.
    pub account_id: String,
    /// Engine-side record type id (e.g. `"Message"`).
    pub type_id: String,
    /// Name of the server id attribute, usually `"id"`.
    pub primary_key: String,
    /// Records to create.
    pub create: CreateBucket,
    /// Records to update.
    pub update: UpdateBucket,
    /// Records to destroy.
    pub destroy: DestroyBucket,
    /// Records moving in from other accounts, keyed by source account id.
    pub move_from_account: BTreeMap<String, UpdateBucket>,
    /// The type state these changes were made against.
    pub state: String,
}

impl ChangeSet {
    /// Whether the change-set carries no work at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.create.records.is_empty()
            && self.update.is_empty()
            && self.destroy.ids.is_empty()
            && self.move_from_account.values().all(UpdateBucket::is_empty)
    }
}

/// The `create`/`update`/`destroy` arguments of a `<Type>/set` call.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SetRequest {
    /// Creation id → full record.
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub create: Map<String, Value>,
    /// Server id → pointer patches.
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub update: Map<String, Value>,
    /// Server ids to destroy.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub destroy: Vec<String>,
}

impl SetRequest {
    /// Whether every bucket is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.create.is_empty() && self.update.is_empty() && self.destroy.is_empty()
    }
}

/// Build the update payload for one record.
///
/// Diffs each attribute marked in `changed` (except `accountId`, which can
/// never be patched) between `committed` and `record`. With `no_patch` the
/// whole attribute value is emitted instead, which is what `/copy` requires.
fn make_update(
    record: &Value,
    committed: &Value,
    changed: &BTreeMap<String, bool>,
    no_patch: bool,
) -> Map<String, Value> {
    let mut update = Map::new();
    for (attribute, &is_changed) in changed {
        if !is_changed || attribute == "accountId" {
            continue;
        }
        if no_patch {
            update.insert(
                attribute.clone(),
                record.get(attribute).cloned().unwrap_or(Value::Null),
            );
        } else {
            make_patches(
                &encode_pointer_component(attribute),
                &mut update,
                committed.get(attribute),
                record.get(attribute),
            );
        }
    }
    update
}

/// Shape the `create`/`update`/`destroy` payload for a `<Type>/set` call.
///
/// Returns `None` when every bucket is empty, so no call is issued.
#[must_use]
pub fn make_set_request(change: &ChangeSet, no_patch: bool) -> Option<SetRequest> {
    let mut set = SetRequest::default();

    for (store_key, record) in change.create.store_keys.iter().zip(&change.create.records) {
        set.create.insert(store_key.clone(), record.clone());
    }

    let update = &change.update;
    for (index, record) in update.records.iter().enumerate() {
        let committed = &update.committed[index];
        let changed = &update.changes[index];
        let Some(id) = committed.get(&change.primary_key).and_then(Value::as_str) else {
            tracing::warn!(type_id = %change.type_id, "update for uncommitted record skipped");
            continue;
        };
        let patches = make_update(record, committed, changed, no_patch);
        if !patches.is_empty() {
            set.update.insert(id.to_owned(), Value::Object(patches));
        }
    }

    set.destroy = change.destroy.ids.clone();

    if set.is_empty() {
        None
    } else {
        Some(set)
    }
}

/// Build the `create` map of a `<Type>/copy` call from the records moving
/// out of one source account.
///
/// Records are sent with full attribute values (`no_patch`) and with the
/// primary key set to the source-side id so the server can correlate the
/// copy with the original.
#[must_use]
pub fn make_copy_create(
    update: &UpdateBucket,
    primary_key: &str,
) -> Map<String, Value> {
    let mut create = Map::new();
    for (index, record) in update.records.iter().enumerate() {
        let committed = &update.committed[index];
        let changed = &update.changes[index];
        let mut payload = make_update(record, committed, changed, true);
        if let Some(id) = committed.get(primary_key) {
            payload.insert(primary_key.to_owned(), id.clone());
        }
        create.insert(update.store_keys[index].clone(), Value::Object(payload));
    }
    create
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn one_update(committed: Value, record: Value, changed: &[&str]) -> ChangeSet {
        ChangeSet {
            account_id: "A1".into(),
            type_id: "Message".into(),
            primary_key: "id".into(),
            update: UpdateBucket {
                store_keys: vec!["sk1".into()],
                records: vec![record],
                committed: vec![committed],
                changes: vec![changed.iter().map(|&a| (a.to_owned(), true)).collect()],
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_empty_change_set_yields_no_request() {
        let change = ChangeSet {
            account_id: "A1".into(),
            type_id: "Message".into(),
            primary_key: "id".into(),
            ..Default::default()
        };
        assert!(change.is_empty());
        assert!(make_set_request(&change, false).is_none());
    }

    #[test]
    fn test_diff_based_update() {
        let change = one_update(
            json!({"id": "m7", "subject": "a", "keywords": {"$seen": true}}),
            json!({"id": "m7", "subject": "b", "keywords": {}}),
            &["subject", "keywords"],
        );
        let set = make_set_request(&change, false).unwrap();
        assert_eq!(
            set.update.get("m7"),
            Some(&json!({"subject": "b", "keywords/$seen": null}))
        );
    }

    #[test]
    fn test_account_id_never_patched() {
        let change = one_update(
            json!({"id": "m7", "accountId": "A1", "subject": "a"}),
            json!({"id": "m7", "accountId": "A2", "subject": "b"}),
            &["accountId", "subject"],
        );
        let set = make_set_request(&change, false).unwrap();
        assert_eq!(set.update.get("m7"), Some(&json!({"subject": "b"})));
    }

    #[test]
    fn test_unchanged_marked_attribute_drops_record() {
        let change = one_update(
            json!({"id": "m7", "subject": "a"}),
            json!({"id": "m7", "subject": "a"}),
            &["subject"],
        );
        assert!(make_set_request(&change, false).is_none());
    }

    #[test]
    fn test_create_and_destroy_buckets() {
        let change = ChangeSet {
            account_id: "A1".into(),
            type_id: "Message".into(),
            primary_key: "id".into(),
            create: CreateBucket {
                store_keys: vec!["sk9".into()],
                records: vec![json!({"subject": "hello"})],
            },
            destroy: DestroyBucket {
                store_keys: vec!["sk3".into()],
                ids: vec!["m3".into()],
            },
            ..Default::default()
        };
        let set = make_set_request(&change, false).unwrap();
        assert_eq!(set.create.get("sk9"), Some(&json!({"subject": "hello"})));
        assert_eq!(set.destroy, vec!["m3".to_owned()]);
        assert!(set.update.is_empty());
    }

    #[test]
    fn test_no_patch_sends_whole_values() {
        let change = one_update(
            json!({"id": "m7", "keywords": {"$seen": true}}),
            json!({"id": "m7", "keywords": {"$seen": true, "$flagged": true}}),
            &["keywords"],
        );
        let set = make_set_request(&change, true).unwrap();
        assert_eq!(
            set.update.get("m7"),
            Some(&json!({"keywords": {"$seen": true, "$flagged": true}}))
        );
    }

    #[test]
    fn test_copy_create_carries_source_id() {
        let update = UpdateBucket {
            store_keys: vec!["sk1".into()],
            records: vec![json!({"id": "m7", "mailboxIds": {"mb2": true}})],
            committed: vec![json!({"id": "m7", "mailboxIds": {"mb1": true}})],
            changes: vec![[("mailboxIds".to_owned(), true)].into_iter().collect()],
        };
        let create = make_copy_create(&update, "id");
        assert_eq!(
            create.get("sk1"),
            Some(&json!({"id": "m7", "mailboxIds": {"mb2": true}}))
        );
    }

    #[test]
    fn test_set_request_serialization_omits_empty() {
        let change = one_update(
            json!({"id": "m7", "subject": "a"}),
            json!({"id": "m7", "subject": "b"}),
            &["subject"],
        );
        let set = make_set_request(&change, false).unwrap();
        let wire = serde_json::to_value(&set).unwrap();
        assert!(wire.get("create").is_none());
        assert!(wire.get("destroy").is_none());
        assert_eq!(wire["update"]["m7"]["subject"], json!("b"));
    }
}
