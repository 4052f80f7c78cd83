//! The HTTP seam.
//!
//! The connection engine talks to the wire through the [`Transport`] trait
//! so tests can substitute a scripted transport. [`HttpTransport`] is the
//! production implementation over `reqwest`. It sends the request body as
//! a one-chunk stream whose exhaustion marks the upload as complete; the
//! strict `timeout` deadline applies until that point and the relaxed
//! `timeout_after_upload` deadline from then on, so a large batch the
//! server is slow to execute is not cut off by the upload bound.

use std::io;
use std::task::Poll;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time;

use crate::core::error::{JmapError, Result};

/// One outgoing batch request, fully resolved.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    /// The JMAP API endpoint.
    pub url: String,
    /// Bearer token for the `Authorization` header.
    pub access_token: String,
    /// The serialized request envelope.
    pub body: Value,
    /// Time allowed for the connection and upload.
    pub timeout: Duration,
    /// Time allowed once the upload has completed.
    pub timeout_after_upload: Duration,
}

/// The transport-level outcome of a request: an HTTP status plus the parsed
/// JSON body, if the body parsed.
#[derive(Debug, Clone)]
pub struct TransportReply {
    /// HTTP status code.
    pub status: u16,
    /// Parsed response body; `None` when the body was not valid JSON.
    pub body: Option<Value>,
}

impl TransportReply {
    /// Whether the status is in the 2xx range.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Abstraction over the HTTP round-trip.
///
/// Implementations return `Ok` whenever an HTTP status was obtained, even a
/// failure status; `Err` is reserved for transport-level failures (DNS,
/// connect, timeout, abort) where no status exists.
#[async_trait]
pub trait Transport: Send + Sync {
    /// POST a batch request and await the reply.
    async fn send(&self, request: TransportRequest) -> Result<TransportReply>;
}

/// `reqwest`-backed production transport.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport with the given connect timeout.
    pub fn new(connect_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| JmapError::Config(e.to_string()))?;
        Ok(HttpTransport { client })
    }

    /// Wrap an existing `reqwest` client.
    pub fn with_client(client: reqwest::Client) -> Self {
        HttpTransport { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportReply> {
        let url = url::Url::parse(&request.url)
            .map_err(|e| JmapError::Config(format!("bad apiUrl: {e}")))?;
        let payload = serde_json::to_vec(&request.body)?;

        // The payload goes out as one chunk; the empty tail fires once the
        // transport has drained the stream, i.e. the upload is on the wire.
        let (uploaded_tx, uploaded_rx) = oneshot::channel::<()>();
        let mut uploaded_tx = Some(uploaded_tx);
        let tail = stream::poll_fn(move |_| {
            if let Some(tx) = uploaded_tx.take() {
                let _ = tx.send(());
            }
            Poll::Ready(None)
        });
        let body =
            reqwest::Body::wrap_stream(stream::iter([Ok::<_, io::Error>(payload)]).chain(tail));

        let send = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(reqwest::header::ACCEPT, "application/json")
            .bearer_auth(&request.access_token)
            .body(body)
            .send();
        tokio::pin!(send);

        // Strict deadline until the upload completes, the relaxed one from
        // then on.
        let outcome = tokio::select! {
            outcome = &mut send => outcome,
            _ = uploaded_rx => {
                time::timeout(request.timeout_after_upload, &mut send)
                    .await
                    .map_err(|_| JmapError::Timeout)?
            }
            _ = time::sleep(request.timeout) => return Err(JmapError::Timeout),
        };
        let response = outcome.map_err(|e| {
            if e.is_timeout() {
                JmapError::Timeout
            } else {
                JmapError::Transport(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let bytes = time::timeout(request.timeout_after_upload, response.bytes())
            .await
            .map_err(|_| JmapError::Timeout)?
            .map_err(|e| JmapError::Transport(e.to_string()))?;

        let body = serde_json::from_slice(&bytes).ok();
        if body.is_none() && !bytes.is_empty() {
            tracing::debug!(status, len = bytes.len(), "response body was not JSON");
        }

        Ok(TransportReply { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    #[test]
    fn test_reply_success_range() {
        let reply = TransportReply {
            status: 200,
            body: None,
        };
        assert!(reply.is_success());
        assert!(TransportReply { status: 299, body: None }.is_success());
        assert!(!TransportReply { status: 404, body: None }.is_success());
        assert!(!TransportReply { status: 503, body: None }.is_success());
    }

    /// Read one request off the socket; the chunked upload ends with a
    /// zero-length terminal chunk after the header block.
    async fn read_http_request(socket: &mut TcpStream) -> String {
        let mut buffer = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = socket.read(&mut chunk).await.unwrap_or(0);
            if n == 0 {
                break;
            }
            buffer.extend_from_slice(&chunk[..n]);
            let header_end = buffer.windows(4).position(|window| window == b"\r\n\r\n");
            if let Some(header_end) = header_end {
                let body = &buffer[header_end + 4..];
                if body.windows(5).any(|window| window == b"0\r\n\r\n") {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }

    fn request_to(url: String, timeout: Duration, timeout_after_upload: Duration) -> TransportRequest {
        TransportRequest {
            url,
            access_token: "token-1".into(),
            body: json!({"using": []}),
            timeout,
            timeout_after_upload,
        }
    }

    #[tokio::test]
    async fn test_send_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let received = read_http_request(&mut socket).await;
            let reply = r#"{"methodResponses":[]}"#;
            let head = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\n\r\n",
                reply.len()
            );
            socket.write_all(head.as_bytes()).await.unwrap();
            socket.write_all(reply.as_bytes()).await.unwrap();
            received
        });

        let transport = HttpTransport::new(Duration::from_secs(5)).unwrap();
        let reply = transport
            .send(request_to(
                format!("http://{address}/api/"),
                Duration::from_secs(5),
                Duration::from_secs(5),
            ))
            .await
            .unwrap();
        assert_eq!(reply.status, 200);
        assert_eq!(reply.body, Some(json!({"methodResponses": []})));

        let received = server.await.unwrap();
        assert!(received.starts_with("POST /api/ HTTP/1.1\r\n"));
        let headers = received.to_lowercase();
        assert!(headers.contains("authorization: bearer token-1"));
        assert!(headers.contains("content-type: application/json"));
        assert!(received.contains(r#"{"using":[]}"#));
    }

    #[tokio::test]
    async fn test_silent_server_hits_relaxed_deadline() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            // Swallow the upload, never answer.
            let _ = read_http_request(&mut socket).await;
            time::sleep(Duration::from_secs(30)).await;
        });

        let transport = HttpTransport::new(Duration::from_secs(5)).unwrap();
        let outcome = transport
            .send(request_to(
                format!("http://{address}/api/"),
                Duration::from_millis(250),
                Duration::from_millis(500),
            ))
            .await;
        assert!(matches!(outcome, Err(JmapError::Timeout)));
        server.abort();
    }
}
