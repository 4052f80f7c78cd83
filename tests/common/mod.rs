//! Shared test doubles: a scripted transport, an in-memory store and a
//! static authenticator.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use jmap_engine::core::auth::Authenticator;
use jmap_engine::core::error::{JmapError, Result};
use jmap_engine::core::store::Store;
use jmap_engine::core::transport::{Transport, TransportReply, TransportRequest};
use jmap_engine::core::types::Session;

/// Setup tracing for tests.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info,jmap_engine=debug")
        .try_init();
}

/// One scripted transport outcome.
pub enum ScriptedReply {
    /// Respond with this HTTP status and body.
    Status(u16, Option<Value>),
    /// Fail at the transport level.
    Error(JmapError),
}

/// Replays a script of replies and records every request body.
#[derive(Default)]
pub struct MockTransport {
    replies: Mutex<VecDeque<ScriptedReply>>,
    requests: Mutex<Vec<Value>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, reply: ScriptedReply) {
        self.replies.lock().unwrap().push_back(reply);
    }

    pub fn push_ok(&self, body: Value) {
        self.push(ScriptedReply::Status(200, Some(body)));
    }

    pub fn requests(&self) -> Vec<Value> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportReply> {
        self.requests.lock().unwrap().push(request.body);
        match self.replies.lock().unwrap().pop_front() {
            Some(ScriptedReply::Status(status, body)) => Ok(TransportReply { status, body }),
            Some(ScriptedReply::Error(error)) => Err(error),
            None => Err(JmapError::Transport("unscripted request".into())),
        }
    }
}

/// In-memory store recording records, states and an ordered event log.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<(String, String), HashMap<String, Value>>>,
    states: Mutex<HashMap<(String, String), String>>,
    /// Ordered log of store calls; tests may also push their own markers.
    pub log: Arc<Mutex<Vec<String>>>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record(&self, account_id: &str, type_id: &str, id: &str) -> Option<Value> {
        self.records
            .lock()
            .unwrap()
            .get(&(account_id.to_owned(), type_id.to_owned()))
            .and_then(|records| records.get(id).cloned())
    }

    pub fn set_state(&self, account_id: &str, type_id: &str, state: &str) {
        self.states
            .lock()
            .unwrap()
            .insert((account_id.to_owned(), type_id.to_owned()), state.to_owned());
    }

    pub fn events(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn push_event(&self, event: String) {
        self.log.lock().unwrap().push(event);
    }

    fn upsert(&self, account_id: &str, type_id: &str, records: &[Value]) {
        let mut table = self.records.lock().unwrap();
        let bucket = table
            .entry((account_id.to_owned(), type_id.to_owned()))
            .or_default();
        for record in records {
            let Some(id) = record.get("id").and_then(Value::as_str) else {
                continue;
            };
            match bucket.get_mut(id) {
                Some(Value::Object(existing)) => {
                    if let Value::Object(incoming) = record {
                        for (key, value) in incoming {
                            existing.insert(key.clone(), value.clone());
                        }
                    }
                }
                _ => {
                    bucket.insert(id.to_owned(), record.clone());
                }
            }
        }
    }
}

impl Store for MemoryStore {
    fn did_fetch_records(
        &self,
        account_id: &str,
        type_id: &str,
        records: Vec<Value>,
        state: Option<&str>,
        is_all: bool,
    ) {
        self.upsert(account_id, type_id, &records);
        if let Some(state) = state {
            self.set_state(account_id, type_id, state);
        }
        self.push_event(format!(
            "didFetchRecords({account_id},{type_id},{},{is_all})",
            records.len()
        ));
    }

    fn did_fetch_partial_records(&self, account_id: &str, type_id: &str, records: Vec<Value>) {
        self.upsert(account_id, type_id, &records);
        self.push_event(format!(
            "didFetchPartialRecords({account_id},{type_id},{})",
            records.len()
        ));
    }

    fn could_not_find_records(&self, account_id: &str, type_id: &str, ids: &[String]) {
        self.push_event(format!(
            "couldNotFindRecords({account_id},{type_id},{})",
            ids.join("+")
        ));
    }

    fn did_fetch_updates(
        &self,
        account_id: &str,
        type_id: &str,
        changed: Option<Vec<String>>,
        destroyed: Option<Vec<String>>,
        old_state: &str,
        new_state: &str,
    ) {
        let changed = changed.map_or("null".to_owned(), |ids| ids.join("+"));
        let destroyed = destroyed.map_or("null".to_owned(), |ids| ids.join("+"));
        self.push_event(format!(
            "didFetchUpdates({account_id},{type_id},{changed},{destroyed},{old_state},{new_state})"
        ));
    }

    fn did_commit_create(&self, account_id: &str, type_id: &str, created: Map<String, Value>) {
        let records: Vec<Value> = created.values().cloned().collect();
        self.upsert(account_id, type_id, &records);
        let mut keys: Vec<&String> = created.keys().collect();
        keys.sort();
        self.push_event(format!(
            "didCommitCreate({account_id},{type_id},{})",
            keys.iter().map(|k| k.as_str()).collect::<Vec<_>>().join("+")
        ));
    }

    fn did_not_create(
        &self,
        account_id: &str,
        type_id: &str,
        errors: Map<String, Value>,
        is_permanent: bool,
    ) {
        let mut keys: Vec<&String> = errors.keys().collect();
        keys.sort();
        self.push_event(format!(
            "didNotCreate({account_id},{type_id},{},{is_permanent})",
            keys.iter().map(|k| k.as_str()).collect::<Vec<_>>().join("+")
        ));
    }

    fn did_commit_update(&self, account_id: &str, type_id: &str, updated: Map<String, Value>) {
        let mut keys: Vec<&String> = updated.keys().collect();
        keys.sort();
        self.push_event(format!(
            "didCommitUpdate({account_id},{type_id},{})",
            keys.iter().map(|k| k.as_str()).collect::<Vec<_>>().join("+")
        ));
    }

    fn did_not_update(
        &self,
        account_id: &str,
        type_id: &str,
        errors: Map<String, Value>,
        is_permanent: bool,
    ) {
        let mut keys: Vec<&String> = errors.keys().collect();
        keys.sort();
        self.push_event(format!(
            "didNotUpdate({account_id},{type_id},{},{is_permanent})",
            keys.iter().map(|k| k.as_str()).collect::<Vec<_>>().join("+")
        ));
    }

    fn did_commit_destroy(&self, account_id: &str, type_id: &str, destroyed: Vec<String>) {
        let mut table = self.records.lock().unwrap();
        if let Some(bucket) = table.get_mut(&(account_id.to_owned(), type_id.to_owned())) {
            for id in &destroyed {
                bucket.remove(id);
            }
        }
        self.push_event(format!(
            "didCommitDestroy({account_id},{type_id},{})",
            destroyed.join("+")
        ));
    }

    fn did_not_destroy(
        &self,
        account_id: &str,
        type_id: &str,
        errors: Map<String, Value>,
        is_permanent: bool,
    ) {
        let mut keys: Vec<&String> = errors.keys().collect();
        keys.sort();
        self.push_event(format!(
            "didNotDestroy({account_id},{type_id},{},{is_permanent})",
            keys.iter().map(|k| k.as_str()).collect::<Vec<_>>().join("+")
        ));
    }

    fn commit_did_change_state(
        &self,
        account_id: &str,
        type_id: &str,
        old_state: &str,
        new_state: &str,
    ) {
        self.set_state(account_id, type_id, new_state);
        self.push_event(format!(
            "commitDidChangeState({account_id},{type_id},{old_state},{new_state})"
        ));
    }

    fn get_type_state(&self, account_id: &str, type_id: &str) -> Option<String> {
        self.states
            .lock()
            .unwrap()
            .get(&(account_id.to_owned(), type_id.to_owned()))
            .cloned()
    }

    fn mark_all_obsolete(&self, account_id: &str, type_id: &str) {
        self.push_event(format!("markAllObsolete({account_id},{type_id})"));
    }
}

/// Authenticator with a fixed session, recording lifecycle events.
pub struct StaticAuth {
    session: Mutex<Arc<Session>>,
    allow_send: AtomicBool,
    pub events: Mutex<Vec<String>>,
}

impl StaticAuth {
    pub fn new(session: Session) -> Arc<Self> {
        Arc::new(StaticAuth {
            session: Mutex::new(Arc::new(session)),
            allow_send: AtomicBool::new(true),
            events: Mutex::new(Vec::new()),
        })
    }

    pub fn set_allow_send(&self, allow: bool) {
        self.allow_send.store(allow, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl Authenticator for StaticAuth {
    fn will_send(&self) -> bool {
        self.allow_send.load(Ordering::SeqCst)
    }

    fn succeeded(&self) {
        self.events.lock().unwrap().push("succeeded".into());
    }

    fn failed(&self, backoff: Option<std::time::Duration>) {
        self.events.lock().unwrap().push(match backoff {
            Some(backoff) => format!("failed({}s)", backoff.as_secs()),
            None => "failed".into(),
        });
    }

    fn did_lose_authentication(&self) {
        self.events.lock().unwrap().push("didLoseAuthentication".into());
    }

    async fn fetch_session(&self) {
        self.events.lock().unwrap().push("fetchSession".into());
    }

    fn access_token(&self) -> String {
        "token-1".into()
    }

    fn session(&self) -> Arc<Session> {
        self.session.lock().unwrap().clone()
    }
}

/// A session advertising the mail capability and the given call limit.
pub fn test_session(max_calls: Option<u64>) -> Session {
    let core = match max_calls {
        Some(limit) => json!({ "maxCallsInRequest": limit }),
        None => json!({}),
    };
    serde_json::from_value(json!({
        "apiUrl": "https://jmap.example.com/api/",
        "capabilities": {
            "urn:ietf:params:jmap:core": core,
            "urn:ietf:params:jmap:mail": {},
        },
        "accounts": { "A1": { "name": "alice@example.com" } },
        "primaryAccounts": { "urn:ietf:params:jmap:mail": "A1" },
        "state": "session-1",
    }))
    .unwrap()
}
