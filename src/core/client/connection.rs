//! The Connection: request batching and response dispatch.
//!
//! A connection accumulates heterogeneous work (record fetches, refreshes,
//! commits, query fetches, direct method calls) and flushes it as a single
//! batched JSON-RPC call. Responses are routed to registered handlers,
//! which mutate the store; per-call user callbacks run strictly after all
//! handlers for the batch, so callbacks observe the post-response store
//! state.
//!
//! One connection owns one HTTP request at a time. A batch larger than the
//! server's `maxCallsInRequest` is sent in pages, carrying server-minted
//! `createdIds` between pages; the in-flight snapshot is only cleared once
//! the last page has been dispatched.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::{json, Map, Value};

use crate::core::auth::Authenticator;
use crate::core::client::config::ConnectionConfig;
use crate::core::client::failure::{classify_status, ChangesPager, FailureOutcome};
use crate::core::client::queues::{QueryRequest, ResponseCallback, WorkQueues};
use crate::core::client::registry::{
    HandlerRegistry, RegistryTables, ResponseKey, ResponseFn, TypeHandler, TypeHandlers,
};
use crate::core::client::responses::RecordType;
use crate::core::error::Result;
use crate::core::store::Store;
use crate::core::transport::{Transport, TransportRequest};
use crate::core::types::{MethodCall, MethodResponse, RequestEnvelope, ResponseEnvelope};

/// Shared, lock-free view of a connection's in-flight state, consumed by
/// the aggregate source.
#[derive(Debug, Default)]
pub struct ConnectionStatus {
    in_flight: AtomicBool,
    mutations_in_flight: AtomicBool,
}

impl ConnectionStatus {
    /// Whether a batch is currently committed to flight.
    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Whether the in-flight batch contains `/set` or `/copy` calls.
    #[must_use]
    pub fn has_mutations_in_flight(&self) -> bool {
        self.mutations_in_flight.load(Ordering::Acquire)
    }

    fn set(&self, mutations: bool) {
        self.in_flight.store(true, Ordering::Release);
        self.mutations_in_flight.store(mutations, Ordering::Release);
    }

    fn clear(&self) {
        self.in_flight.store(false, Ordering::Release);
        self.mutations_in_flight.store(false, Ordering::Release);
    }
}

/// Cross-page bookkeeping for a split batch.
#[derive(Debug, Default)]
struct PageContext {
    created_ids: std::collections::BTreeMap<String, String>,
    done_count: usize,
    sent_count: usize,
}

enum DispatchOutcome {
    MorePages,
    Done,
    Failed,
}

/// The batching and dispatch engine for one data group.
pub struct Connection {
    config: ConnectionConfig,
    auth: Arc<dyn Authenticator>,
    store: Arc<dyn Store>,
    transport: Arc<dyn Transport>,
    registry: HandlerRegistry,
    record_defs: HashMap<String, Arc<RecordType>>,
    jmap_index: HashMap<String, String>,
    queues: WorkQueues,
    in_flight_remote_calls: Option<Vec<MethodCall>>,
    in_flight_callbacks: Vec<(String, ResponseCallback)>,
    in_flight_responses: Vec<MethodResponse>,
    in_flight_context: Option<PageContext>,
    sending: bool,
    cached_session_state: Option<String>,
    refresh_attempts: u32,
    pagers: HashMap<String, ChangesPager>,
    status: Arc<ConnectionStatus>,
}

impl Connection {
    /// Create a connection over the shared default handler table.
    pub fn new(
        config: ConnectionConfig,
        auth: Arc<dyn Authenticator>,
        store: Arc<dyn Store>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self::with_base_registry(config, auth, store, transport, crate::core::client::responses::default_registry())
    }

    /// Create a connection shadowing an explicit base handler table.
    pub fn with_base_registry(
        config: ConnectionConfig,
        auth: Arc<dyn Authenticator>,
        store: Arc<dyn Store>,
        transport: Arc<dyn Transport>,
        base: Arc<RegistryTables>,
    ) -> Self {
        Connection {
            config,
            auth,
            store,
            transport,
            registry: HandlerRegistry::with_base(base),
            record_defs: HashMap::new(),
            jmap_index: HashMap::new(),
            queues: WorkQueues::default(),
            in_flight_remote_calls: None,
            in_flight_callbacks: Vec::new(),
            in_flight_responses: Vec::new(),
            in_flight_context: None,
            sending: false,
            cached_session_state: None,
            refresh_attempts: 0,
            pagers: HashMap::new(),
            status: Arc::new(ConnectionStatus::default()),
        }
    }

    /// Shared handle onto this connection's in-flight status.
    #[must_use]
    pub fn status_handle(&self) -> Arc<ConnectionStatus> {
        self.status.clone()
    }

    /// Register the handlers for a record type.
    pub fn handle(&mut self, type_id: &str, handlers: TypeHandlers) {
        self.registry.insert_record(type_id, handlers);
    }

    /// Register a named response handler.
    pub fn handle_response(&mut self, key: ResponseKey, handler: ResponseFn) {
        self.registry.insert_response(key, handler);
    }

    // ---- queueing API -----------------------------------------------------

    /// Append a raw method call; returns its client tag.
    pub fn call_method(&mut self, name: impl Into<String>, arguments: Value) -> String {
        let tag = self.queues.send_queue.len().to_string();
        self.queues
            .send_queue
            .push(MethodCall::new(name, arguments, tag.clone()));
        tag
    }

    /// Append a method call with a callback bound to its response.
    pub fn call_method_with_callback(
        &mut self,
        name: impl Into<String>,
        arguments: Value,
        callback: ResponseCallback,
    ) -> String {
        let tag = self.call_method(name, arguments);
        self.queues.callback_queue.push((tag.clone(), callback));
        tag
    }

    /// Append an unconditional callback, invoked once the current batch
    /// completes, with no bound response.
    pub fn add_callback(&mut self, callback: ResponseCallback) {
        self.queues.callback_queue.push((String::new(), callback));
    }

    /// Queue a targeted record fetch.
    pub fn fetch_record(&mut self, account_id: &str, type_id: &str, id: &str) {
        self.queues.fetch_record(account_id, type_id, id);
    }

    /// Queue a type-wide fetch.
    pub fn fetch_all_records(&mut self, account_id: &str, type_id: &str) {
        self.queues.fetch_type(account_id, type_id);
    }

    /// Queue a targeted record refresh.
    pub fn refresh_record(&mut self, account_id: &str, type_id: &str, id: &str) {
        self.queues.refresh_record(account_id, type_id, id);
    }

    /// Queue a delta refresh for a type from `state` (or the store's last
    /// known state).
    pub fn refresh_type(&mut self, account_id: &str, type_id: &str, state: Option<String>) {
        self.queues.refresh_type(account_id, type_id, state);
    }

    /// Queue a query fetch.
    pub fn fetch_query(&mut self, query: QueryRequest) {
        self.queues.fetch_query(query);
    }

    /// Turn a change-set into `/set` / `/copy` calls via the type's commit
    /// handler.
    pub fn commit_changes(&mut self, change: &crate::core::types::ChangeSet) -> Result<()> {
        let commit = self
            .registry
            .record_handlers(&change.type_id)
            .and_then(|handlers| handlers.commit.clone());
        match commit {
            Some(TypeHandler::Named(jmap_type)) => self.builtin_commit(&jmap_type, change),
            Some(TypeHandler::Custom(handler)) => handler(self, change),
            None => {
                tracing::warn!(type_id = %change.type_id, "commit for unregistered type dropped");
                Ok(())
            }
        }
    }

    /// Whether queued work is waiting for the next flush.
    #[must_use]
    pub fn has_pending_work(&self) -> bool {
        self.queues.has_work()
    }

    /// Whether a batch is committed to flight.
    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        self.in_flight_remote_calls.is_some()
    }

    // ---- crate-internal accessors for built-in handlers -------------------

    pub(crate) fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub(crate) fn record_def(&self, type_id: &str) -> Option<Arc<RecordType>> {
        self.record_defs.get(type_id).cloned()
    }

    pub(crate) fn register_def(&mut self, def: Arc<RecordType>) {
        self.jmap_index
            .insert(def.jmap_type.clone(), def.id.clone());
        self.record_defs.insert(def.id.clone(), def);
    }

    pub(crate) fn type_id_for_jmap(&self, jmap_type: &str) -> Option<String> {
        self.jmap_index.get(jmap_type).cloned()
    }

    pub(crate) fn pager_for(&mut self, type_id: &str) -> &mut ChangesPager {
        let schedule = self
            .record_defs
            .get(type_id)
            .map(|def| def.changes_schedule.clone())
            .unwrap_or_default();
        self.pagers
            .entry(type_id.to_owned())
            .or_insert_with(|| ChangesPager::new(schedule))
    }

    // ---- built-in queue drains --------------------------------------------

    pub(crate) fn builtin_fetch(
        &mut self,
        jmap_type: &str,
        type_id: &str,
        account_id: &str,
        ids: Option<&BTreeSet<String>>,
    ) -> Result<()> {
        let mut arguments = Map::new();
        arguments.insert("accountId".into(), json!(account_id));
        if let Some(ids) = ids {
            let ids: Vec<&String> = ids.iter().collect();
            arguments.insert("ids".into(), json!(ids));
        }
        if let Some(def) = self.record_defs.get(type_id) {
            if let Some(properties) = &def.fetch_properties {
                arguments.insert("properties".into(), json!(properties));
            }
        }
        self.call_method(format!("{jmap_type}/get"), Value::Object(arguments));
        Ok(())
    }

    pub(crate) fn builtin_refresh(
        &mut self,
        jmap_type: &str,
        type_id: &str,
        account_id: &str,
        ids: Option<&BTreeSet<String>>,
        state: Option<&str>,
    ) -> Result<()> {
        if let Some(state) = state {
            let max_changes = self.pager_for(type_id).current();
            self.call_method(
                format!("{jmap_type}/changes"),
                json!({
                    "accountId": account_id,
                    "sinceState": state,
                    "maxChanges": max_changes,
                }),
            );
            Ok(())
        } else {
            self.builtin_fetch(jmap_type, type_id, account_id, ids)
        }
    }

    fn builtin_commit(
        &mut self,
        jmap_type: &str,
        change: &crate::core::types::ChangeSet,
    ) -> Result<()> {
        use crate::core::types::{make_copy_create, make_set_request};

        if let Some(set) = make_set_request(change, false) {
            let mut arguments = serde_json::to_value(&set)?;
            if let Value::Object(map) = &mut arguments {
                map.insert("accountId".into(), json!(change.account_id));
                if !change.state.is_empty() {
                    map.insert("ifInState".into(), json!(change.state));
                }
            }
            self.call_method(format!("{jmap_type}/set"), arguments);
        }

        for (from_account_id, bucket) in &change.move_from_account {
            let create = make_copy_create(bucket, &change.primary_key);
            if create.is_empty() {
                continue;
            }
            self.call_method(
                format!("{jmap_type}/copy"),
                json!({
                    "fromAccountId": from_account_id,
                    "accountId": change.account_id,
                    "create": create,
                    "onSuccessDestroyOriginal": true,
                }),
            );
        }
        Ok(())
    }

    fn builtin_query(&mut self, query: &QueryRequest) -> Result<()> {
        let jmap_type = self
            .record_defs
            .get(&query.type_id)
            .map(|def| def.jmap_type.clone())
            .unwrap_or_else(|| query.type_id.clone());
        let mut arguments = match &query.arguments {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };
        arguments.insert("accountId".into(), json!(query.account_id));
        self.call_method(format!("{jmap_type}/query"), Value::Object(arguments));
        Ok(())
    }

    // ---- materialisation --------------------------------------------------

    /// Drain the work queues into the send queue, in order: queries, type
    /// refreshes, record refreshes, type fetches, record fetches.
    fn materialise(&mut self) {
        let queries = std::mem::take(&mut self.queues.queries_to_fetch);
        for query in queries.values() {
            let handler = self
                .registry
                .record_handlers(&query.type_id)
                .and_then(|handlers| handlers.query.clone());
            let outcome = match handler {
                Some(handler) => handler(self, query),
                None => self.builtin_query(query),
            };
            if let Err(error) = outcome {
                tracing::error!(query = %query.id, %error, "query handler failed");
            }
        }

        let order = self.registry.record_types_by_precedence();

        let types_to_refresh = std::mem::take(&mut self.queues.types_to_refresh);
        for type_id in &order {
            for (account_id, types) in &types_to_refresh {
                let Some(state) = types.get(type_id) else { continue };
                let state = state.clone().or_else(|| {
                    self.store.get_type_state(account_id, type_id)
                });
                self.dispatch_refresh(type_id, account_id, None, state.as_deref());
            }
        }

        let records_to_refresh = std::mem::take(&mut self.queues.records_to_refresh);
        for type_id in &order {
            for (account_id, types) in &records_to_refresh {
                let Some(ids) = types.get(type_id) else { continue };
                self.dispatch_refresh(type_id, account_id, Some(ids), None);
            }
        }

        let types_to_fetch = std::mem::take(&mut self.queues.types_to_fetch);
        for type_id in &order {
            for (account_id, types) in &types_to_fetch {
                if !types.contains(type_id) {
                    continue;
                }
                self.dispatch_fetch(type_id, account_id, None);
            }
        }

        let records_to_fetch = std::mem::take(&mut self.queues.records_to_fetch);
        for type_id in &order {
            for (account_id, types) in &records_to_fetch {
                let Some(ids) = types.get(type_id) else { continue };
                self.dispatch_fetch(type_id, account_id, Some(ids));
            }
        }
    }

    fn dispatch_fetch(
        &mut self,
        type_id: &str,
        account_id: &str,
        ids: Option<&BTreeSet<String>>,
    ) {
        let fetch = self
            .registry
            .record_handlers(type_id)
            .and_then(|handlers| handlers.fetch.clone());
        let outcome = match fetch {
            Some(TypeHandler::Named(jmap_type)) => {
                self.builtin_fetch(&jmap_type, type_id, account_id, ids)
            }
            Some(TypeHandler::Custom(handler)) => handler(self, account_id, ids),
            None => {
                tracing::warn!(type_id, "fetch for unregistered type dropped");
                Ok(())
            }
        };
        if let Err(error) = outcome {
            tracing::error!(type_id, %error, "fetch handler failed");
        }
    }

    fn dispatch_refresh(
        &mut self,
        type_id: &str,
        account_id: &str,
        ids: Option<&BTreeSet<String>>,
        state: Option<&str>,
    ) {
        let refresh = self
            .registry
            .record_handlers(type_id)
            .and_then(|handlers| handlers.refresh.clone());
        let outcome = match refresh {
            Some(TypeHandler::Named(jmap_type)) => {
                self.builtin_refresh(&jmap_type, type_id, account_id, ids, state)
            }
            Some(TypeHandler::Custom(handler)) => handler(self, account_id, ids, state),
            None => {
                tracing::warn!(type_id, "refresh for unregistered type dropped");
                Ok(())
            }
        };
        if let Err(error) = outcome {
            tracing::error!(type_id, %error, "refresh handler failed");
        }
    }

    // ---- the send loop ----------------------------------------------------

    /// Build, send and dispatch the pending batch, including all paginated
    /// continuations. Returns once the batch completed, was discarded, or
    /// was handed to the auth module for rescheduling.
    pub async fn flush(&mut self) -> Result<()> {
        if self.sending {
            return Ok(());
        }
        if !self.auth.will_send() {
            return Ok(());
        }

        if self.in_flight_remote_calls.is_none() {
            self.materialise();
            let calls = std::mem::take(&mut self.queues.send_queue);
            let callbacks = std::mem::take(&mut self.queues.callback_queue);
            if calls.is_empty() {
                // Nothing to send; don't orphan unconditional callbacks.
                for (_, callback) in callbacks {
                    callback(&Value::Null, "", &Value::Null);
                }
                return Ok(());
            }
            let mutations = calls.iter().any(MethodCall::is_mutation);
            self.status.set(mutations);
            self.in_flight_remote_calls = Some(calls);
            self.in_flight_callbacks = callbacks;
            self.in_flight_responses = Vec::new();
        }

        self.sending = true;
        let outcome = self.send_in_flight().await;
        self.sending = false;
        outcome
    }

    fn batch_is_safe_to_retry(&self) -> bool {
        self.in_flight_remote_calls
            .as_ref()
            .map(|calls| !calls.iter().any(MethodCall::is_mutation))
            .unwrap_or(true)
    }

    /// Page bounds for the next slice: `[start, end)` within the batch.
    ///
    /// The end shrinks while the first call of the *next* page carries a
    /// `#`-prefixed argument, so a reference and its (assumed immediately
    /// preceding) target stay in one page. An unbroken chain longer than a
    /// page reverts to the plain slice; such chains violate the documented
    /// caller obligation.
    fn page_bounds(calls: &[MethodCall], start: usize, max_calls: usize) -> (usize, usize) {
        let total = calls.len();
        let full_end = start.saturating_add(max_calls).min(total);
        let mut end = full_end;
        while end < total && end > start && calls[end].has_back_reference() {
            end -= 1;
        }
        if end == start {
            tracing::warn!(
                start,
                max_calls,
                "back-reference chain exceeds page size; splitting it"
            );
            end = full_end;
        }
        (start, end)
    }

    async fn send_in_flight(&mut self) -> Result<()> {
        loop {
            let session = self.auth.session();
            let total = match &self.in_flight_remote_calls {
                Some(calls) => calls.len(),
                None => return Ok(()),
            };
            if session.api_url.is_empty() {
                tracing::warn!("no session to send against");
                self.auth.failed(None);
                return Ok(());
            }

            let max_calls = session.max_calls_in_request().max(1);
            if total > max_calls && self.in_flight_context.is_none() {
                self.in_flight_context = Some(PageContext::default());
            }

            let done = self
                .in_flight_context
                .as_ref()
                .map_or(0, |context| context.done_count);
            let (page, start, end) = match &self.in_flight_remote_calls {
                Some(calls) => {
                    let (start, end) = Self::page_bounds(calls, done, max_calls);
                    (calls[start..end].to_vec(), start, end)
                }
                None => return Ok(()),
            };
            if let Some(context) = self.in_flight_context.as_mut() {
                context.sent_count = end - start;
            }

            let envelope = RequestEnvelope {
                using: session.using(),
                method_calls: page,
                created_ids: self
                    .in_flight_context
                    .as_ref()
                    .map(|context| context.created_ids.clone()),
            };
            let body = serde_json::to_value(&envelope)?;
            tracing::debug!(calls = end - start, start, total, "sending batch page");

            let request = TransportRequest {
                url: session.api_url.clone(),
                access_token: self.auth.access_token(),
                body: body.clone(),
                timeout: self.config.timeout,
                timeout_after_upload: self.config.timeout_after_upload,
            };

            match self.transport.send(request).await {
                Ok(reply) if reply.is_success() => {
                    let parsed = reply
                        .body
                        .and_then(|value| serde_json::from_value::<ResponseEnvelope>(value).ok());
                    let Some(response) = parsed else {
                        tracing::warn!("success status with unparseable body");
                        self.auth.failed(None);
                        return Ok(());
                    };
                    match self.apply_envelope(response, total) {
                        DispatchOutcome::MorePages => continue,
                        DispatchOutcome::Done => {
                            self.finish_batch();
                            self.auth.succeeded();
                            return Ok(());
                        }
                        DispatchOutcome::Failed => {
                            self.auth.failed(None);
                            return Ok(());
                        }
                    }
                }
                Ok(reply) => {
                    match classify_status(reply.status, self.batch_is_safe_to_retry()) {
                        FailureOutcome::Discard => {
                            if self.config.log_payloads {
                                tracing::error!(
                                    status = reply.status,
                                    request = %body,
                                    response = ?reply.body,
                                    "request rejected; discarding"
                                );
                            } else {
                                tracing::error!(status = reply.status, "request rejected; discarding");
                            }
                            self.discard_in_flight();
                            return Ok(());
                        }
                        FailureOutcome::Reauthenticate => {
                            self.auth.did_lose_authentication();
                            return Ok(());
                        }
                        FailureOutcome::RefreshSession => {
                            if self.refresh_attempts >= self.config.max_session_refreshes {
                                tracing::warn!(
                                    attempts = self.refresh_attempts,
                                    "session refresh bound exceeded; discarding"
                                );
                                self.discard_in_flight();
                                return Ok(());
                            }
                            self.refresh_attempts += 1;
                            self.auth.fetch_session().await;
                            continue;
                        }
                        FailureOutcome::Backoff(_) => {
                            self.auth.failed(Some(self.config.backoff_hint));
                            return Ok(());
                        }
                        FailureOutcome::ServerFailure => {
                            tracing::error!(status = reply.status, "server failure; discarding");
                            self.discard_in_flight();
                            return Ok(());
                        }
                        FailureOutcome::Retry => {
                            self.auth.failed(None);
                            return Ok(());
                        }
                    }
                }
                Err(error) => {
                    tracing::warn!(%error, "transport failure");
                    if self.batch_is_safe_to_retry() {
                        self.auth.failed(None);
                    } else {
                        self.discard_in_flight();
                    }
                    return Ok(());
                }
            }
        }
    }

    // ---- response dispatch ------------------------------------------------

    fn apply_envelope(&mut self, envelope: ResponseEnvelope, total: usize) -> DispatchOutcome {
        if let Some(new_state) = &envelope.session_state {
            let known = self
                .cached_session_state
                .clone()
                .unwrap_or_else(|| self.auth.session().state.clone());
            if !known.is_empty() && known != *new_state {
                let auth = self.auth.clone();
                tokio::spawn(async move { auth.fetch_session().await });
            }
            self.cached_session_state = Some(new_state.clone());
        }

        let Some(responses) = envelope.method_responses else {
            return DispatchOutcome::Failed;
        };

        let all_unavailable = !responses.is_empty()
            && responses
                .iter()
                .all(|response| response.error_type() == Some("serverUnavailable"));
        if all_unavailable && self.batch_is_safe_to_retry() {
            return DispatchOutcome::Failed;
        }

        if let (Some(context), Some(created_ids)) =
            (self.in_flight_context.as_mut(), envelope.created_ids)
        {
            context.created_ids.extend(created_ids);
        }

        for response in responses {
            let correlated = {
                let calls = self.in_flight_remote_calls.as_deref().unwrap_or(&[]);
                response
                    .tag_index()
                    .and_then(|index| calls.get(index))
                    .map(|call| (call.name.clone(), call.arguments.clone()))
            };
            let Some((request_name, request_arguments)) = correlated else {
                tracing::warn!(tag = %response.client_tag, "response with unknown tag dropped");
                continue;
            };
            let handler = self.registry.lookup_response(
                &response.name,
                response.error_type(),
                &request_name,
            );
            match handler {
                Some(handler) => {
                    if let Err(error) =
                        handler(self, &response.arguments, &request_name, &request_arguments)
                    {
                        tracing::error!(
                            method = %response.name,
                            %error,
                            "response handler failed"
                        );
                    }
                }
                None => {
                    tracing::warn!(
                        method = %response.name,
                        request = %request_name,
                        "unhandled response"
                    );
                }
            }
            self.in_flight_responses.push(response);
        }

        if let Some(context) = self.in_flight_context.as_mut() {
            context.done_count += context.sent_count;
            context.sent_count = 0;
            if context.done_count < total {
                return DispatchOutcome::MorePages;
            }
        }
        DispatchOutcome::Done
    }

    // ---- completion -------------------------------------------------------

    /// Deliver callbacks for a completed batch and clear the in-flight
    /// state atomically.
    fn finish_batch(&mut self) {
        let calls = self.in_flight_remote_calls.take().unwrap_or_default();
        let responses = std::mem::take(&mut self.in_flight_responses);
        let callbacks = std::mem::take(&mut self.in_flight_callbacks);
        self.in_flight_context = None;
        self.refresh_attempts = 0;
        self.status.clear();

        let empty_error = json!({});
        for (tag, callback) in callbacks {
            if tag.is_empty() {
                callback(&Value::Null, "", &Value::Null);
                continue;
            }
            let index = tag.parse::<usize>().ok();
            let request_arguments = index
                .and_then(|i| calls.get(i))
                .map(|call| &call.arguments)
                .unwrap_or(&Value::Null);
            let response = index
                .and_then(|i| responses.iter().find(|response| response.tag_index() == Some(i)));
            match response {
                Some(response) => {
                    callback(&response.arguments, &response.name, request_arguments)
                }
                None => callback(&empty_error, "error", request_arguments),
            }
        }
    }

    /// Drop the in-flight batch, flushing its callbacks with empty
    /// responses so callers are not orphaned.
    fn discard_in_flight(&mut self) {
        let calls = self.in_flight_remote_calls.take().unwrap_or_default();
        let callbacks = std::mem::take(&mut self.in_flight_callbacks);
        self.in_flight_responses.clear();
        self.in_flight_context = None;
        self.refresh_attempts = 0;
        self.status.clear();

        let empty_error = json!({});
        for (tag, callback) in callbacks {
            if tag.is_empty() {
                callback(&Value::Null, "", &Value::Null);
                continue;
            }
            let request_arguments = tag
                .parse::<usize>()
                .ok()
                .and_then(|i| calls.get(i))
                .map(|call| &call.arguments)
                .unwrap_or(&Value::Null);
            callback(&empty_error, "error", request_arguments);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(name: &str, arguments: Value, tag: usize) -> MethodCall {
        MethodCall::new(name, arguments, tag.to_string())
    }

    #[test]
    fn test_page_bounds_plain() {
        let calls: Vec<MethodCall> = (0..5)
            .map(|i| call("Email/get", json!({}), i))
            .collect();
        assert_eq!(Connection::page_bounds(&calls, 0, 2), (0, 2));
        assert_eq!(Connection::page_bounds(&calls, 2, 2), (2, 4));
        assert_eq!(Connection::page_bounds(&calls, 4, 2), (4, 5));
        assert_eq!(Connection::page_bounds(&calls, 0, 10), (0, 5));
    }

    #[test]
    fn test_page_bounds_keeps_reference_with_target() {
        // Call 3 references call 2: a page of [0..3) would split them.
        let calls = vec![
            call("Email/get", json!({}), 0),
            call("Email/get", json!({}), 1),
            call("Email/get", json!({}), 2),
            call(
                "Thread/get",
                json!({"#ids": {"resultOf": "2", "name": "Email/get", "path": "/list/*/threadId"}}),
                3,
            ),
            call("Email/get", json!({}), 4),
        ];
        assert_eq!(Connection::page_bounds(&calls, 0, 3), (0, 2));
        assert_eq!(Connection::page_bounds(&calls, 2, 3), (2, 5));
    }

    #[test]
    fn test_page_bounds_chain_longer_than_page_reverts() {
        // Calls 1 and 2 both carry references: the chain cannot fit a page
        // of two, so the slice reverts to the plain boundary.
        let backref =
            json!({"#ids": {"resultOf": "0", "name": "Email/get", "path": "/list/*/threadId"}});
        let calls = vec![
            call("Email/get", json!({}), 0),
            call("Thread/get", backref.clone(), 1),
            call("Email/get", backref, 2),
        ];
        assert_eq!(Connection::page_bounds(&calls, 0, 2), (0, 2));
        assert_eq!(Connection::page_bounds(&calls, 2, 2), (2, 3));
    }
}
