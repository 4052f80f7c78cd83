//! jmap_engine: client-side JMAP synchronisation engine.
//!
//! This crate implements the connection layer that sits between a local
//! record store and a JMAP server:
//!
//! - **core::types**: method-call triples, request/response envelopes,
//!   JSON-Pointer patches, change-sets, session/capability data.
//! - **core::client**: the `Connection` batching and dispatch engine,
//!   handler registry, failure classification, the `Sequence` primitive and
//!   the aggregate source.
//! - **core::recurrence**: expansion of recurring calendar events into
//!   concrete occurrences, including per-instance overrides.

pub mod core;

// Top-level re-exports for common usage
pub use crate::core::error::{JmapError, Result};
pub use crate::core::types;
pub use crate::core::types::{
    ChangeSet, MethodCall, MethodResponse, RequestEnvelope, ResponseEnvelope, Session,
};

pub use crate::core::auth::Authenticator;
pub use crate::core::client;
pub use crate::core::client::{AggregateSource, Connection, ConnectionConfig, Sequence};
pub use crate::core::store::Store;
pub use crate::core::transport::{HttpTransport, Transport};

pub use crate::core::recurrence;
pub use crate::core::recurrence::{Frequency, RecurrenceRule, RecurringEvent};
