//! Built-in record-type behaviour: response-to-store translation.
//!
//! Registering a [`RecordType`] installs the standard JMAP handlers for the
//! type: `/get` feeds fetched records into the store, `/changes` applies
//! deltas (with adaptive paging and forced resync at the ceiling), `/set`
//! and `/copy` report commit outcomes per record, and `/query` feeds the
//! returned ids back into the fetch queue.
//!
//! The shared default table carries the generic `/set` and `/copy` error
//! fallbacks: a method-level error on a mutation is attributed to every
//! attempted id, so the store uniformly learns that those commits failed.

use std::sync::{Arc, OnceLock};

use serde_json::{json, Map, Value};

use crate::core::client::connection::Connection;
use crate::core::client::failure::MESSAGE_CHANGES_SCHEDULE;
use crate::core::client::registry::{
    RegistryTables, ResponseKey, TypeHandler, TypeHandlers,
};
use crate::core::error::Result;
use crate::core::types::encode_pointer_component;

/// Static description of a record type bound to its JMAP wire type.
#[derive(Debug, Clone)]
pub struct RecordType {
    /// Engine-side type id (e.g. `"Message"`), used by the store.
    pub id: String,

    /// JMAP wire type (e.g. `"Email"`).
    pub jmap_type: String,

    /// Capability URI of the data group that owns this type.
    pub data_group: String,

    /// Name of the server id attribute.
    pub primary_key: String,

    /// Drain priority; higher drains first.
    pub precedence: i32,

    /// Properties requested on `/get`; requests carrying a property list
    /// deliver partial records to the store.
    pub fetch_properties: Option<Vec<String>>,

    /// Attribute defaults substituted for `null` or missing values on
    /// fetched records.
    pub null_defaults: Map<String, Value>,

    /// `maxChanges` escalation schedule for `/changes`.
    pub changes_schedule: Vec<u32>,
}

impl RecordType {
    /// Describe a record type with default settings.
    pub fn new(
        id: impl Into<String>,
        jmap_type: impl Into<String>,
        data_group: impl Into<String>,
    ) -> Self {
        RecordType {
            id: id.into(),
            jmap_type: jmap_type.into(),
            data_group: data_group.into(),
            primary_key: "id".into(),
            precedence: 0,
            fetch_properties: None,
            null_defaults: Map::new(),
            changes_schedule: MESSAGE_CHANGES_SCHEDULE.to_vec(),
        }
    }

    /// Set the drain priority.
    #[must_use]
    pub fn with_precedence(mut self, precedence: i32) -> Self {
        self.precedence = precedence;
        self
    }

    /// Request only these properties on `/get`.
    #[must_use]
    pub fn with_fetch_properties(mut self, properties: Vec<String>) -> Self {
        self.fetch_properties = Some(properties);
        self
    }

    /// Substitute `default` for `null`/missing values of `attribute` on
    /// fetched records.
    #[must_use]
    pub fn with_null_default(mut self, attribute: impl Into<String>, default: Value) -> Self {
        self.null_defaults.insert(attribute.into(), default);
        self
    }

    /// Use this `maxChanges` escalation schedule.
    #[must_use]
    pub fn with_changes_schedule(mut self, schedule: Vec<u32>) -> Self {
        self.changes_schedule = schedule;
        self
    }
}

fn string_field<'a>(args: &'a Value, request_args: &'a Value, field: &str) -> &'a str {
    args.get(field)
        .or_else(|| request_args.get(field))
        .and_then(Value::as_str)
        .unwrap_or("")
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default()
}

fn object_field(args: &Value, field: &str) -> Option<Map<String, Value>> {
    match args.get(field) {
        Some(Value::Object(map)) if !map.is_empty() => Some(map.clone()),
        _ => None,
    }
}

impl Connection {
    /// Register a record type with the built-in JMAP behaviour.
    pub fn register_record_type(&mut self, def: RecordType) {
        let def = Arc::new(def);
        self.register_def(def.clone());

        self.handle(
            &def.id,
            TypeHandlers {
                precedence: def.precedence,
                fetch: Some(TypeHandler::Named(def.jmap_type.clone())),
                refresh: Some(TypeHandler::Named(def.jmap_type.clone())),
                commit: Some(TypeHandler::Named(def.jmap_type.clone())),
                query: None,
            },
        );

        let d = def.clone();
        self.handle_response(
            ResponseKey::Method(format!("{}/get", def.jmap_type)),
            Arc::new(move |conn, args, _name, request_args| {
                conn.record_did_fetch(&d, args, request_args)
            }),
        );

        let d = def.clone();
        self.handle_response(
            ResponseKey::Method(format!("{}/changes", def.jmap_type)),
            Arc::new(move |conn, args, _name, request_args| {
                conn.record_did_fetch_updates(&d, args, request_args)
            }),
        );

        let d = def.clone();
        self.handle_response(
            ResponseKey::Method(format!("{}/set", def.jmap_type)),
            Arc::new(move |conn, args, _name, request_args| {
                conn.record_did_commit(&d, args, request_args)
            }),
        );

        let d = def.clone();
        self.handle_response(
            ResponseKey::Method(format!("{}/copy", def.jmap_type)),
            Arc::new(move |conn, args, _name, request_args| {
                conn.record_did_copy(&d, args, request_args)
            }),
        );

        let d = def.clone();
        self.handle_response(
            ResponseKey::Method(format!("{}/query", def.jmap_type)),
            Arc::new(move |conn, args, _name, request_args| {
                conn.record_did_query(&d, args, request_args)
            }),
        );

        let d = def.clone();
        self.handle_response(
            ResponseKey::ErrorOnMethodOfType(
                format!("{}/changes", def.jmap_type),
                "cannotCalculateChanges".into(),
            ),
            Arc::new(move |conn, _args, _name, request_args| {
                let account_id = string_field(&Value::Null, request_args, "accountId").to_owned();
                conn.force_resync(&d, &account_id);
                conn.pager_for(&d.id).reset();
                Ok(())
            }),
        );
    }

    /// Apply a `<Type>/get` response to the store.
    pub(crate) fn record_did_fetch(
        &mut self,
        def: &RecordType,
        args: &Value,
        request_args: &Value,
    ) -> Result<()> {
        let account_id = string_field(args, request_args, "accountId").to_owned();
        let state = args.get("state").and_then(Value::as_str);

        let mut records: Vec<Value> = args
            .get("list")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for record in &mut records {
            if let Value::Object(map) = record {
                for (attribute, default) in &def.null_defaults {
                    let missing = map.get(attribute).map_or(true, Value::is_null);
                    if missing {
                        map.insert(attribute.clone(), default.clone());
                    }
                }
            }
        }

        let is_partial = request_args.get("properties").is_some();
        if is_partial {
            self.store()
                .did_fetch_partial_records(&account_id, &def.id, records);
        } else {
            let is_all = request_args.get("ids").map_or(true, Value::is_null);
            self.store()
                .did_fetch_records(&account_id, &def.id, records, state, is_all);
        }

        let not_found = string_list(args.get("notFound"));
        if !not_found.is_empty() {
            self.store()
                .could_not_find_records(&account_id, &def.id, &not_found);
        }
        Ok(())
    }

    /// Apply a `<Type>/changes` response: forward the delta, queue fetches
    /// for the changed records, page on `hasMoreChanges`.
    pub(crate) fn record_did_fetch_updates(
        &mut self,
        def: &RecordType,
        args: &Value,
        request_args: &Value,
    ) -> Result<()> {
        let account_id = string_field(args, request_args, "accountId").to_owned();
        let old_state = args.get("oldState").and_then(Value::as_str).unwrap_or("");
        let new_state = args.get("newState").and_then(Value::as_str).unwrap_or("");
        let has_more = args
            .get("hasMoreChanges")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let mut changed = string_list(args.get("created"));
        changed.extend(string_list(args.get("updated")));
        let destroyed = string_list(args.get("destroyed"));

        self.store().did_fetch_updates(
            &account_id,
            &def.id,
            Some(changed.clone()),
            Some(destroyed),
            old_state,
            new_state,
        );
        for id in &changed {
            self.fetch_record(&account_id, &def.id, id);
        }

        if has_more {
            if self.pager_for(&def.id).escalate().is_some() {
                self.refresh_type(&account_id, &def.id, Some(new_state.to_owned()));
            } else {
                // Escalation ceiling with changes still outstanding: the
                // delta path cannot converge, fall back to a full resync.
                self.force_resync(def, &account_id);
                self.pager_for(&def.id).reset();
            }
        }
        Ok(())
    }

    fn resolve_store_key(&self, def: &RecordType, account_id: &str, id: String) -> String {
        self.store()
            .get_store_key(account_id, &def.id, &id)
            .unwrap_or(id)
    }

    /// Mark the whole type obsolete and force a full reconciliation.
    pub(crate) fn force_resync(&mut self, def: &RecordType, account_id: &str) {
        tracing::warn!(type_id = %def.id, account_id, "state lost; forcing resync");
        self.store().mark_all_obsolete(account_id, &def.id);
        let current = self
            .store()
            .get_type_state(account_id, &def.id)
            .unwrap_or_default();
        self.store()
            .did_fetch_updates(account_id, &def.id, None, None, &current, "");
    }

    /// Apply a `<Type>/set` response to the store, per bucket.
    pub(crate) fn record_did_commit(
        &mut self,
        def: &RecordType,
        args: &Value,
        request_args: &Value,
    ) -> Result<()> {
        let account_id = string_field(args, request_args, "accountId").to_owned();

        if let Some(created) = object_field(args, "created") {
            self.store().did_commit_create(&account_id, &def.id, created);
        }
        if let Some(errors) = object_field(args, "notCreated") {
            self.store()
                .did_not_create(&account_id, &def.id, errors, true);
        }
        if let Some(updated) = match args.get("updated") {
            Some(Value::Object(map)) if !map.is_empty() => Some(map.clone()),
            _ => None,
        } {
            // Key outcomes by store key where the record is known
            let updated: Map<String, Value> = updated
                .into_iter()
                .map(|(id, delta)| (self.resolve_store_key(def, &account_id, id), delta))
                .collect();
            self.store().did_commit_update(&account_id, &def.id, updated);
        }
        if let Some(errors) = object_field(args, "notUpdated") {
            self.store()
                .did_not_update(&account_id, &def.id, errors, true);
        }
        let destroyed: Vec<String> = string_list(args.get("destroyed"))
            .into_iter()
            .map(|id| self.resolve_store_key(def, &account_id, id))
            .collect();
        if !destroyed.is_empty() {
            self.store()
                .did_commit_destroy(&account_id, &def.id, destroyed);
        }
        if let Some(errors) = object_field(args, "notDestroyed") {
            self.store()
                .did_not_destroy(&account_id, &def.id, errors, true);
        }

        let old_state = args.get("oldState").and_then(Value::as_str);
        let new_state = args.get("newState").and_then(Value::as_str);
        if let (Some(old_state), Some(new_state)) = (old_state, new_state) {
            if old_state != new_state {
                self.store()
                    .commit_did_change_state(&account_id, &def.id, old_state, new_state);
            }
        }
        Ok(())
    }

    /// Apply a `<Type>/copy` response.
    ///
    /// A per-record `alreadyExists` rejection falls back to a `/set` that
    /// patches the attempted mailboxes onto the existing duplicate id and
    /// destroys the source-side original.
    pub(crate) fn record_did_copy(
        &mut self,
        def: &RecordType,
        args: &Value,
        request_args: &Value,
    ) -> Result<()> {
        let account_id = string_field(args, request_args, "accountId").to_owned();
        let from_account_id = request_args
            .get("fromAccountId")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_owned();

        if let Some(created) = object_field(args, "created") {
            self.store().did_commit_create(&account_id, &def.id, created);
        }

        let Some(not_created) = object_field(args, "notCreated") else {
            return Ok(());
        };
        let mut failures = Map::new();
        for (store_key, error) in not_created {
            let error_type = error.get("type").and_then(Value::as_str);
            let existing_id = error.get("existingId").and_then(Value::as_str);
            if let (Some("alreadyExists"), Some(existing_id)) = (error_type, existing_id) {
                self.merge_into_existing_copy(def, &account_id, &from_account_id, request_args, &store_key, existing_id);
            } else {
                failures.insert(store_key, error);
            }
        }
        if !failures.is_empty() {
            self.store()
                .did_not_create(&account_id, &def.id, failures, true);
        }
        Ok(())
    }

    fn merge_into_existing_copy(
        &mut self,
        def: &RecordType,
        account_id: &str,
        from_account_id: &str,
        request_args: &Value,
        store_key: &str,
        existing_id: &str,
    ) {
        let attempted = request_args
            .get("create")
            .and_then(|create| create.get(store_key))
            .cloned()
            .unwrap_or(Value::Null);

        let mut patches = Map::new();
        if let Some(Value::Object(mailbox_ids)) = attempted.get("mailboxIds") {
            for mailbox_id in mailbox_ids.keys() {
                patches.insert(
                    format!("mailboxIds/{}", encode_pointer_component(mailbox_id)),
                    json!(true),
                );
            }
        } else if let Value::Object(attributes) = &attempted {
            for (attribute, value) in attributes {
                if attribute != &def.primary_key {
                    patches.insert(attribute.clone(), value.clone());
                }
            }
        }
        if !patches.is_empty() {
            self.call_method(
                format!("{}/set", def.jmap_type),
                json!({
                    "accountId": account_id,
                    "update": { existing_id: patches },
                }),
            );
        }

        let original_id = attempted.get(&def.primary_key).and_then(Value::as_str);
        if let (Some(original_id), false) = (original_id, from_account_id.is_empty()) {
            self.call_method(
                format!("{}/set", def.jmap_type),
                json!({
                    "accountId": from_account_id,
                    "destroy": [original_id],
                }),
            );
        }
    }

    /// Apply a `<Type>/query` response: feed the ids into the fetch queue.
    pub(crate) fn record_did_query(
        &mut self,
        def: &RecordType,
        args: &Value,
        request_args: &Value,
    ) -> Result<()> {
        let account_id = string_field(args, request_args, "accountId").to_owned();
        for id in string_list(args.get("ids")) {
            self.fetch_record(&account_id, &def.id, &id);
        }
        Ok(())
    }
}

/// Attribute a method-level `/set` or `/copy` error to every attempted id,
/// so per-record failure reporting stays uniform.
fn mutation_error_fallback(
    connection: &mut Connection,
    error: &Value,
    request_name: &str,
    request_args: &Value,
) -> Result<()> {
    let Some(jmap_type) = request_name.split('/').next() else {
        return Ok(());
    };
    let Some(type_id) = connection.type_id_for_jmap(jmap_type) else {
        tracing::warn!(request = request_name, "mutation error for unknown type");
        return Ok(());
    };
    let Some(def) = connection.record_def(&type_id) else {
        return Ok(());
    };

    let attribute_all = |bucket: Option<&Value>| -> Map<String, Value> {
        match bucket {
            Some(Value::Object(map)) => map
                .keys()
                .map(|key| (key.clone(), error.clone()))
                .collect(),
            _ => Map::new(),
        }
    };
    let not_created = attribute_all(request_args.get("create"));
    let not_updated = attribute_all(request_args.get("update"));
    let not_destroyed: Map<String, Value> = string_list(request_args.get("destroy"))
        .into_iter()
        .map(|id| (id, error.clone()))
        .collect();

    let synthetic = json!({
        "accountId": request_args.get("accountId").cloned().unwrap_or(Value::Null),
        "notCreated": not_created,
        "notUpdated": not_updated,
        "notDestroyed": not_destroyed,
    });
    connection.record_did_commit(&def, &synthetic, request_args)
}

/// The shared default handler table: generic mutation-error fallbacks.
pub(crate) fn default_registry() -> Arc<RegistryTables> {
    static DEFAULTS: OnceLock<Arc<RegistryTables>> = OnceLock::new();
    DEFAULTS
        .get_or_init(|| {
            let mut tables = RegistryTables::default();
            tables.insert_response(
                ResponseKey::ErrorOnVerb("/set".into()),
                Arc::new(mutation_error_fallback),
            );
            tables.insert_response(
                ResponseKey::ErrorOnVerb("/copy".into()),
                Arc::new(mutation_error_fallback),
            );
            Arc::new(tables)
        })
        .clone()
}
