//! JMAP session and capability data.
//!
//! The session object is fetched out of band (`.well-known/jmap`) by the
//! authentication module; the engine only reads the pieces that shape
//! requests: the API endpoint, the capability set (which becomes `using`)
//! and `maxCallsInRequest`, which drives batch pagination.

use serde::Deserialize;
use serde_json::{Map, Value};

/// Capability URI of the JMAP core specification.
pub const CORE_CAPABILITY: &str = "urn:ietf:params:jmap:core";

/// Capability URI of the JMAP mail specification.
pub const MAIL_CAPABILITY: &str = "urn:ietf:params:jmap:mail";

/// The parts of a JMAP session object the engine consumes.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Session {
    /// The API endpoint requests are POSTed to.
    pub api_url: String,

    /// Capability URI → capability object.
    pub capabilities: Map<String, Value>,

    /// Account id → account object.
    pub accounts: Map<String, Value>,

    /// Capability URI → account id.
    pub primary_accounts: Map<String, Value>,

    /// Opaque token identifying this version of the session object.
    pub state: String,
}

impl Session {
    /// The capability URIs to send as `using`.
    #[must_use]
    pub fn using(&self) -> Vec<String> {
        self.capabilities.keys().cloned().collect()
    }

    /// The server's limit on method calls per request, from the core
    /// capability. Unlimited when the server does not declare one.
    #[must_use]
    pub fn max_calls_in_request(&self) -> usize {
        self.capabilities
            .get(CORE_CAPABILITY)
            .and_then(|capability| capability.get("maxCallsInRequest"))
            .and_then(Value::as_u64)
            .map(|limit| limit as usize)
            .unwrap_or(usize::MAX)
    }
}
