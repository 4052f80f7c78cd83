//! The authentication/session seam.
//!
//! The engine consults an [`Authenticator`] before every send, reports the
//! outcome after, and hands transport failures back to it for scheduling.
//! Re-authentication and session discovery themselves live behind this
//! trait; the engine only reacts to their results on the next flush.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::core::types::Session;

/// The authentication interface the engine consumes.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Whether the connection may send right now. A veto leaves all queued
    /// work in place for a later flush.
    fn will_send(&self) -> bool {
        true
    }

    /// A request completed successfully.
    fn succeeded(&self) {}

    /// A request failed at the connection level. `backoff` carries the
    /// classifier's hint (e.g. 30 s after a 503); `None` means "retry on
    /// your own schedule".
    fn failed(&self, backoff: Option<Duration>) {
        let _ = backoff;
    }

    /// The server rejected our credentials (HTTP 401). The in-flight batch
    /// is kept and re-sent once re-authentication completes.
    fn did_lose_authentication(&self) {}

    /// Re-fetch the session object. Called when the server signals a stale
    /// session (changed `sessionState`, HTTP 404 on the API endpoint).
    async fn fetch_session(&self) {}

    /// The current bearer token.
    fn access_token(&self) -> String;

    /// The current session object.
    fn session(&self) -> Arc<Session>;
}
