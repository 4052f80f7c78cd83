//! Fan-out over per-data-group connections.
//!
//! Each JMAP data group (mail, calendar, contacts, peripheral) owns one
//! [`Connection`]; the aggregate source routes record types to the
//! connection owning their data group and reports combined in-flight
//! status. A source is "dirty" while any connection has `/set` or `/copy`
//! work committed to flight.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::core::client::connection::{Connection, ConnectionStatus};
use crate::core::error::Result;

struct SourceEntry {
    data_group: String,
    connection: Arc<Mutex<Connection>>,
    status: Arc<ConnectionStatus>,
}

/// A set of connections addressed by data group.
#[derive(Default)]
pub struct AggregateSource {
    sources: Vec<SourceEntry>,
}

impl AggregateSource {
    /// Create an empty aggregate.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the connection owning `data_group`.
    pub async fn add_connection(
        &mut self,
        data_group: impl Into<String>,
        connection: Arc<Mutex<Connection>>,
    ) {
        let status = connection.lock().await.status_handle();
        self.sources.push(SourceEntry {
            data_group: data_group.into(),
            connection,
            status,
        });
    }

    /// The connection owning `data_group`, if registered.
    #[must_use]
    pub fn connection_for(&self, data_group: &str) -> Option<Arc<Mutex<Connection>>> {
        self.sources
            .iter()
            .find(|entry| entry.data_group == data_group)
            .map(|entry| entry.connection.clone())
    }

    /// Whether any connection has a batch committed to flight.
    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        self.sources.iter().any(|entry| entry.status.is_in_flight())
    }

    /// Whether any connection has uncommitted mutations in flight.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.sources
            .iter()
            .any(|entry| entry.status.has_mutations_in_flight())
    }

    /// Flush every connection, one after the other. Connections progress
    /// independently; a failure on one does not stop the others.
    pub async fn flush_all(&self) -> Result<()> {
        let mut first_error = None;
        for entry in &self.sources {
            let outcome = entry.connection.lock().await.flush().await;
            if let Err(error) = outcome {
                tracing::error!(data_group = %entry.data_group, %error, "flush failed");
                if first_error.is_none() {
                    first_error = Some(error);
                }
            }
        }
        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}
