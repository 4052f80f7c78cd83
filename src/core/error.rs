//! Error types for JMAP engine operations.
//!
//! The [`Result`] type alias provides a shorthand for operations that may
//! fail. Use [`JmapError::is_retryable()`] to decide whether an operation
//! should be handed back to the authentication module's retry loop; most
//! transport errors are retryable, protocol errors are not.

use std::io;
use thiserror::Error;

/// Result type for JMAP engine operations.
pub type Result<T> = std::result::Result<T, JmapError>;

/// Errors that can occur while driving a JMAP connection.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum JmapError {
    /// The server answered with a non-success HTTP status.
    ///
    /// Classification of the status into retry/re-auth/fatal outcomes is the
    /// job of the failure classifier, not of this variant.
    #[error("HTTP error: status {status}")]
    Http {
        /// The HTTP status code of the response.
        status: u16,
    },

    /// Network I/O error (connection failed, read/write error, etc.).
    ///
    /// These errors are typically retryable.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The transport failed before an HTTP status was available.
    #[error("transport error: {0}")]
    Transport(String),

    /// Operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// Request was aborted.
    #[error("request aborted")]
    Aborted,

    /// The response violated the JMAP envelope shape.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// No session is available to build a request from.
    #[error("no session available")]
    NoSession,

    /// A registered response handler failed.
    ///
    /// Handler failures are trapped and reported during dispatch; they never
    /// abort delivery of the remaining responses.
    #[error("handler error: {0}")]
    Handler(String),

    /// Configuration error in engine setup.
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal error in the library.
    #[error("internal error: {0}")]
    Internal(String),
}

impl JmapError {
    /// Check if this error is retryable.
    ///
    /// Returns `true` for transient failures that may succeed on retry:
    /// timeouts, I/O errors, transport failures and the retry-signalling
    /// HTTP statuses (408, 429, 502, 503, 504).
    ///
    /// # Examples
    ///
    /// ```
    /// use jmap_engine::core::error::JmapError;
    ///
    /// assert!(JmapError::Timeout.is_retryable());
    /// assert!(!JmapError::Protocol("bad envelope".into()).is_retryable());
    /// ```
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            JmapError::Http { status } => matches!(status, 408 | 429 | 502 | 503 | 504),
            JmapError::Timeout | JmapError::Io(_) | JmapError::Transport(_) => true,
            _ => false,
        }
    }

    /// Check if this is an access denied error (HTTP 401 or 403).
    #[inline]
    #[must_use]
    pub fn is_access_denied(&self) -> bool {
        matches!(self, JmapError::Http { status: 401 | 403 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_is_retryable() {
        assert!(JmapError::Timeout.is_retryable());
    }

    #[test]
    fn test_http_503_is_retryable() {
        assert!(JmapError::Http { status: 503 }.is_retryable());
    }

    #[test]
    fn test_http_404_not_retryable() {
        assert!(!JmapError::Http { status: 404 }.is_retryable());
    }

    #[test]
    fn test_access_denied() {
        assert!(JmapError::Http { status: 401 }.is_access_denied());
        assert!(JmapError::Http { status: 403 }.is_access_denied());
        assert!(!JmapError::Http { status: 500 }.is_access_denied());
    }

    #[test]
    fn test_error_display() {
        let err = JmapError::Http { status: 502 };
        assert!(err.to_string().contains("502"));
    }
}
