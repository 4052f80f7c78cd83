//! JMAP client engine.
//!
//! A client-side implementation of the JMAP JSON-RPC protocol for mail,
//! calendar and contacts servers. Applications read and mutate domain
//! records through a local record store; this engine batches the resulting
//! fetches, refreshes and commits into HTTP round-trips, applies server
//! responses back to the store, and handles the partial-failure, paging,
//! retry and state-resynchronisation semantics JMAP requires.
//!
//! # Modules
//!
//! - [`client`] - the `Connection` batching/dispatch engine and its helpers
//! - [`types`] - method calls, envelopes, patches, change-sets, sessions
//! - [`transport`] - the HTTP seam (`Transport` trait + reqwest impl)
//! - [`store`] - the record-store trait the engine drives
//! - [`auth`] - the authentication/session trait the engine consults
//! - [`recurrence`] - recurring-event occurrence expansion
//!
//! # Quick start
//!
//! ```ignore
//! use jmap_engine::core::{client::Connection, types::Session};
//!
//! let mut connection = Connection::new(config, auth, store, transport);
//! connection.fetch_record("account-1", "Message", "m7");
//! connection.flush().await?;
//! ```

pub mod auth;
pub mod client;
pub mod error;
pub mod recurrence;
pub mod store;
pub mod transport;
pub mod types;

// Re-export commonly used types at module root
pub use error::{JmapError, Result};
pub use types::{ChangeSet, MethodCall, MethodResponse, RequestEnvelope, ResponseEnvelope};
