//! Configuration for a JMAP connection.
//!
//! # Configuration Options
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `timeout` | 30 s | Deadline for connect + upload |
//! | `timeout_after_upload` | 120 s | Deadline once the upload completed |
//! | `backoff_hint` | 30 s | Hint handed to auth after 429/502/503/504 |
//! | `max_session_refreshes` | 3 | Bound on 404 refresh+re-send cycles |
//! | `log_payloads` | false | Log full request/response on 400/413 |

use std::time::Duration;

/// Configuration for a [`Connection`](crate::core::client::Connection).
///
/// # Example
///
/// ```
/// use jmap_engine::core::client::ConnectionConfig;
/// use std::time::Duration;
///
/// let config = ConnectionConfig {
///     timeout: Duration::from_secs(10),
///     ..Default::default()
/// };
/// assert_eq!(config.timeout_after_upload, Duration::from_secs(120));
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Deadline until the request body has been uploaded.
    pub timeout: Duration,

    /// Relaxed deadline applied once the upload has completed; large
    /// batches can take the server a while to execute.
    pub timeout_after_upload: Duration,

    /// Backoff hint reported to the auth module on rate-limit and gateway
    /// failures.
    pub backoff_hint: Duration,

    /// Maximum consecutive session-refresh + re-send cycles per batch
    /// after an HTTP 404 from the API endpoint.
    pub max_session_refreshes: u32,

    /// Log the full request and response bodies when the server rejects a
    /// batch as malformed or oversized (HTTP 400/413).
    pub log_payloads: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            timeout: Duration::from_secs(30),
            timeout_after_upload: Duration::from_secs(120),
            backoff_hint: Duration::from_secs(30),
            max_session_refreshes: 3,
            log_payloads: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ConnectionConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.timeout_after_upload, Duration::from_secs(120));
        assert_eq!(config.backoff_hint, Duration::from_secs(30));
        assert_eq!(config.max_session_refreshes, 3);
        assert!(!config.log_payloads);
    }

    #[test]
    fn test_partial_override() {
        let config = ConnectionConfig {
            max_session_refreshes: 1,
            ..Default::default()
        };
        assert_eq!(config.max_session_refreshes, 1);
        assert_eq!(config.timeout, Duration::from_secs(30));
    }
}
