//! HTTP client abstraction for posting SOAP envelopes.
//!
//! This module defines the `HttpClient` trait to abstract HTTP request execution,
//! enabling testability with mock implementations.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use reqwest::Url;

use crate::error::{Result, VolleyError};
use crate::transport::config::{SocketFactory, TlsPolicy};
use crate::transport::{CONTENT_TYPE_HEADER, SOAP_ACTION_HEADER};

/// Response from an HTTP request.
///
/// The body is fully buffered, so the response outlives the connection it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// HTTP status code
    pub status: u16,
    /// Raw response body
    pub body: Bytes,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Body decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// A fully built SOAP POST, ready to hand to an [`HttpClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoapPost {
    /// Target URL, with the scheme registry's default port applied
    pub url: Url,
    /// Value of the `Content-type` header
    pub content_type: String,
    /// Value of the `SOAPAction` header (may be empty)
    pub soap_action: String,
    /// Envelope encoded in its declared charset
    pub body: Bytes,
    /// Socket factory registered for the URL's scheme
    pub socket_factory: SocketFactory,
}

/// Timeouts applied to a single call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallTimeouts {
    pub connect_timeout_ms: u64,
    pub socket_timeout_ms: u64,
}

/// Trait for executing SOAP POST requests.
///
/// This abstraction allows for different implementations (production vs. testing)
/// and makes request orchestration testable without making real HTTP calls.
///
/// # Example
/// ```ignore
/// let client = ReqwestHttpClient::new();
/// let response = client.post(&post, timeouts).await?;
/// println!("Status: {}, Body: {}", response.status, response.text());
/// ```
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Execute one POST and buffer the full response.
    ///
    /// # Errors
    /// Returns an error if:
    /// - The request fails due to network issues
    /// - The request times out
    async fn post(&self, request: &SoapPost, timeouts: CallTimeouts) -> Result<HttpResponse>;
}

// ============================================================================
// Production Implementation using reqwest
// ============================================================================

/// Settings that require a distinct `reqwest::Client`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ClientKey {
    connect_timeout_ms: u64,
    /// Applied per read, not as a deadline for the whole exchange
    socket_timeout_ms: u64,
    tls: Option<TlsPolicy>,
}

/// Production HTTP client using reqwest.
///
/// A `reqwest::Client` is built lazily the first time a given combination of
/// timeouts and TLS policy is used, then reused for every later call with
/// the same settings. Each client pools its own connections.
#[derive(Default)]
pub struct ReqwestHttpClient {
    clients: DashMap<ClientKey, reqwest::Client>,
}

impl ReqwestHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn client_for(&self, key: ClientKey) -> Result<reqwest::Client> {
        if let Some(client) = self.clients.get(&key) {
            return Ok(client.clone());
        }

        let mut builder = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(key.connect_timeout_ms))
            .read_timeout(Duration::from_millis(key.socket_timeout_ms));

        if let Some(policy) = &key.tls {
            if policy.accept_invalid_certs {
                builder = builder.danger_accept_invalid_certs(true);
            }
            for pem in &policy.root_certificates_pem {
                builder = builder.add_root_certificate(reqwest::Certificate::from_pem(pem.as_bytes())?);
            }
        }

        let client = builder.build()?;
        tracing::debug!(
            connect_timeout_ms = key.connect_timeout_ms,
            socket_timeout_ms = key.socket_timeout_ms,
            tls = key.tls.is_some(),
            "Built HTTP client"
        );

        Ok(self.clients.entry(key).or_insert(client).clone())
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    #[tracing::instrument(skip(self, request), fields(url = %request.url, soap_action = %request.soap_action))]
    async fn post(&self, request: &SoapPost, timeouts: CallTimeouts) -> Result<HttpResponse> {
        let tls = match &request.socket_factory {
            SocketFactory::Plain => None,
            SocketFactory::Tls(policy) => Some(policy.clone()),
        };
        let client = self.client_for(ClientKey {
            connect_timeout_ms: timeouts.connect_timeout_ms,
            socket_timeout_ms: timeouts.socket_timeout_ms,
            tls,
        })?;

        let response = client
            .post(request.url.clone())
            .header(CONTENT_TYPE_HEADER, &request.content_type)
            .header(SOAP_ACTION_HEADER, &request.soap_action)
            .body(request.body.clone())
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "HTTP request failed");
                e
            })?;

        let status = response.status().as_u16();
        let body = response.bytes().await?;

        tracing::debug!(status, response_len = body.len(), "HTTP request completed");

        Ok(HttpResponse { status, body })
    }
}

// ============================================================================
// Test/Mock Implementation
// ============================================================================

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::oneshot;

/// Mock HTTP client for testing.
///
/// Responses are keyed by the request URL's path and returned in FIFO order.
///
/// # Example
/// ```ignore
/// let mock = MockHttpClient::new();
/// mock.add_response("/quotes", Ok(HttpResponse::new(200, "<Envelope/>")));
/// ```
#[derive(Clone, Default)]
pub struct MockHttpClient {
    responses: Arc<Mutex<HashMap<String, Vec<MockResponse>>>>,
    calls: Arc<Mutex<Vec<MockCall>>>,
    in_flight: Arc<AtomicUsize>,
}

/// A mock response that can optionally wait for a trigger before completing.
enum MockResponse {
    /// Immediate response
    Immediate(Result<HttpResponse>),
    /// Response that waits for a trigger signal before completing
    Triggered {
        response: Result<HttpResponse>,
        trigger: oneshot::Receiver<()>,
    },
}

/// Record of a call made to the mock HTTP client.
#[derive(Debug, Clone)]
pub struct MockCall {
    pub url: String,
    pub content_type: String,
    pub soap_action: String,
    pub body: Bytes,
    pub socket_factory: SocketFactory,
    pub connect_timeout_ms: u64,
    pub socket_timeout_ms: u64,
}

impl MockHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a predetermined response for a URL path.
    ///
    /// Multiple responses can be added for the same path - they will be
    /// returned in FIFO order.
    pub fn add_response(&self, path: &str, response: Result<HttpResponse>) {
        self.responses
            .lock()
            .entry(path.to_string())
            .or_default()
            .push(MockResponse::Immediate(response));
    }

    /// Add a response that will wait for a manual trigger before completing.
    ///
    /// Returns a sender that when triggered (by sending `()` or dropping) will
    /// cause the HTTP request to complete with the given response.
    pub fn add_response_with_trigger(
        &self,
        path: &str,
        response: Result<HttpResponse>,
    ) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.responses
            .lock()
            .entry(path.to_string())
            .or_default()
            .push(MockResponse::Triggered {
                response,
                trigger: rx,
            });
        tx
    }

    /// Get all calls that have been made to this mock client.
    pub fn get_calls(&self) -> Vec<MockCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Get the number of requests currently in-flight (executing).
    ///
    /// A cancelled request stops being in flight as soon as its task drops the
    /// pending call.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HttpClient for MockHttpClient {
    async fn post(&self, request: &SoapPost, timeouts: CallTimeouts) -> Result<HttpResponse> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);

        // Guard to ensure we decrement even if cancelled/panicked
        let _guard = InFlightGuard {
            in_flight: self.in_flight.clone(),
        };

        self.calls.lock().push(MockCall {
            url: request.url.to_string(),
            content_type: request.content_type.clone(),
            soap_action: request.soap_action.clone(),
            body: request.body.clone(),
            socket_factory: request.socket_factory.clone(),
            connect_timeout_ms: timeouts.connect_timeout_ms,
            socket_timeout_ms: timeouts.socket_timeout_ms,
        });

        let path = request.url.path().to_string();
        let mock_response = {
            let mut responses = self.responses.lock();
            responses
                .get_mut(&path)
                .filter(|queue| !queue.is_empty())
                .map(|queue| queue.remove(0))
        };

        match mock_response {
            Some(MockResponse::Immediate(response)) => response,
            Some(MockResponse::Triggered { response, trigger }) => {
                // Proceed on send or drop alike
                let _ = trigger.await;
                response
            }
            None => Err(VolleyError::TransportMessage(format!(
                "No mock response configured for {path}"
            ))),
        }
    }
}

/// Guard that decrements the in-flight counter when dropped.
struct InFlightGuard {
    in_flight: Arc<AtomicUsize>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_post(path: &str) -> SoapPost {
        SoapPost {
            url: Url::parse(&format!("https://soap.example.com{path}")).unwrap(),
            content_type: "text/xml; charset=UTF-8".to_string(),
            soap_action: "urn:test".to_string(),
            body: Bytes::from_static(b"<Envelope/>"),
            socket_factory: SocketFactory::Tls(TlsPolicy::default()),
        }
    }

    const TIMEOUTS: CallTimeouts = CallTimeouts {
        connect_timeout_ms: 5000,
        socket_timeout_ms: 20000,
    };

    #[tokio::test]
    async fn test_mock_client_basic() {
        let mock = MockHttpClient::new();
        mock.add_response("/test", Ok(HttpResponse::new(200, "success")));

        let response = mock.post(&test_post("/test"), TIMEOUTS).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.text(), "success");

        let calls = mock.get_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].url, "https://soap.example.com/test");
        assert_eq!(calls[0].soap_action, "urn:test");
        assert_eq!(calls[0].connect_timeout_ms, 5000);
        assert_eq!(mock.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_mock_client_multiple_responses() {
        let mock = MockHttpClient::new();
        mock.add_response("/status", Ok(HttpResponse::new(200, "first")));
        mock.add_response("/status", Ok(HttpResponse::new(500, "second")));

        let first = mock.post(&test_post("/status"), TIMEOUTS).await.unwrap();
        assert_eq!(first.text(), "first");
        assert!(first.is_success());

        let second = mock.post(&test_post("/status"), TIMEOUTS).await.unwrap();
        assert_eq!(second.text(), "second");
        assert!(!second.is_success());

        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn test_mock_client_no_response() {
        let mock = MockHttpClient::new();
        let result = mock.post(&test_post("/unknown"), TIMEOUTS).await;
        assert!(result.unwrap_err().is_transport());
    }

    #[tokio::test]
    async fn test_mock_client_with_trigger() {
        let mock = MockHttpClient::new();
        let trigger =
            mock.add_response_with_trigger("/test", Ok(HttpResponse::new(200, "triggered")));

        let mock_clone = mock.clone();
        let handle = tokio::spawn(async move { mock_clone.post(&test_post("/test"), TIMEOUTS).await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!handle.is_finished());
        assert_eq!(mock.in_flight_count(), 1);

        trigger.send(()).unwrap();

        let response = handle.await.unwrap().unwrap();
        assert_eq!(response.text(), "triggered");
        assert_eq!(mock.in_flight_count(), 0);
    }

    #[test]
    fn test_reqwest_client_reused_per_settings() {
        let client = ReqwestHttpClient::new();
        let key = ClientKey {
            connect_timeout_ms: 5000,
            socket_timeout_ms: 20000,
            tls: None,
        };
        client.client_for(key.clone()).unwrap();
        client.client_for(key.clone()).unwrap();
        assert_eq!(client.clients.len(), 1);

        client
            .client_for(ClientKey {
                connect_timeout_ms: 1000,
                ..key.clone()
            })
            .unwrap();
        assert_eq!(client.clients.len(), 2);

        // Socket timeout is a client setting too
        client
            .client_for(ClientKey {
                socket_timeout_ms: 3000,
                ..key
            })
            .unwrap();
        assert_eq!(client.clients.len(), 3);
    }
}
