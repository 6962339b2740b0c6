//! Transport executor: turns an envelope into one SOAP POST.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use metrics::{counter, histogram};
use parking_lot::RwLock;

use crate::envelope::Envelope;
use crate::error::{Result, VolleyError};
use crate::http::{CallTimeouts, HttpClient, HttpResponse, SoapPost};

pub mod config;

pub use config::{Scheme, SchemeRegistry, SocketFactory, TlsPolicy, TransportConfig};

/// SOAPAction used when none is given.
pub const BLANK_SOAP_ACTION: &str = "";
/// Header carrying the envelope's MIME type and charset.
pub const CONTENT_TYPE_HEADER: &str = "Content-type";
/// Header identifying the SOAP operation.
pub const SOAP_ACTION_HEADER: &str = "SOAPAction";

/// Executes SOAP calls over an injected [`HttpClient`].
///
/// The client is owned by the caller and may be shared between requesters. The
/// requester owns the live transport settings: changing a timeout affects every
/// call issued afterwards, including calls from requests created earlier.
pub struct SoapRequester<H: HttpClient> {
    http_client: Arc<H>,
    config: RwLock<TransportConfig>,
}

impl<H: HttpClient> SoapRequester<H> {
    /// Create a requester with default timeouts and the default scheme registry.
    pub fn new(http_client: Arc<H>) -> Self {
        Self::with_config(http_client, TransportConfig::default())
    }

    pub fn with_config(http_client: Arc<H>, config: TransportConfig) -> Self {
        Self {
            http_client,
            config: RwLock::new(config),
        }
    }

    /// Post `envelope` to `target_url` and return the buffered response.
    ///
    /// Encoding and URL problems are reported before any network I/O.
    #[tracing::instrument(skip(self, envelope), fields(soap_action = soap_action.unwrap_or(BLANK_SOAP_ACTION)))]
    pub async fn execute(
        &self,
        envelope: &dyn Envelope,
        target_url: &str,
        soap_action: Option<&str>,
    ) -> Result<HttpResponse> {
        let (post, timeouts) = {
            let config = self.config.read();
            let post = build_post(&config, envelope, target_url, soap_action)?;
            let timeouts = CallTimeouts {
                connect_timeout_ms: config.connect_timeout_ms,
                socket_timeout_ms: config.socket_timeout_ms,
            };
            (post, timeouts)
        };

        tracing::debug!(
            url = %post.url,
            body_len = post.body.len(),
            connect_timeout_ms = timeouts.connect_timeout_ms,
            socket_timeout_ms = timeouts.socket_timeout_ms,
            "Posting SOAP envelope"
        );

        let started = Instant::now();
        let result = self.http_client.post(&post, timeouts).await;
        histogram!("volley_soap_call_duration_seconds").record(started.elapsed().as_secs_f64());

        match &result {
            Ok(response) => {
                counter!("volley_soap_calls_total", "outcome" => "response").increment(1);
                tracing::debug!(status = response.status, "SOAP call returned");
            }
            Err(e) => {
                counter!("volley_soap_calls_total", "outcome" => "transport_error").increment(1);
                tracing::warn!(error = %e, "SOAP call failed");
            }
        }

        result
    }

    /// Set the connection timeout for subsequently issued calls.
    pub fn set_connection_timeout(&self, timeout_ms: u64) {
        self.config.write().connect_timeout_ms = timeout_ms;
    }

    /// Set the socket (read) timeout for subsequently issued calls.
    pub fn set_socket_timeout(&self, timeout_ms: u64) {
        self.config.write().socket_timeout_ms = timeout_ms;
    }

    pub fn connection_timeout(&self) -> u64 {
        self.config.read().connect_timeout_ms
    }

    pub fn socket_timeout(&self) -> u64 {
        self.config.read().socket_timeout_ms
    }

    pub fn scheme_registry(&self) -> SchemeRegistry {
        self.config.read().schemes.clone()
    }

    /// Replace the scheme registry used for subsequently issued calls.
    pub fn set_scheme_registry(&self, schemes: SchemeRegistry) {
        self.config.write().schemes = schemes;
    }

    pub fn http_client(&self) -> &Arc<H> {
        &self.http_client
    }
}

/// Build the POST for one call: resolve the URL, format headers and encode the body.
pub fn build_post(
    config: &TransportConfig,
    envelope: &dyn Envelope,
    target_url: &str,
    soap_action: Option<&str>,
) -> Result<SoapPost> {
    let body = encode_body(&envelope.body(), envelope.encoding())?;
    let (url, socket_factory) = config.schemes.resolve(target_url)?;

    Ok(SoapPost {
        url,
        content_type: content_type(envelope.mime_type(), envelope.encoding()),
        soap_action: soap_action.unwrap_or(BLANK_SOAP_ACTION).to_string(),
        body,
        socket_factory,
    })
}

/// Value of the `Content-type` header.
pub fn content_type(mime_type: &str, encoding: &str) -> String {
    format!("{mime_type}; charset={encoding}")
}

/// Encode `text` in the charset named by `label`.
///
/// Fails for unknown labels, for charsets encoding_rs can only decode (the
/// UTF-16 family, replacement) and for characters the charset cannot represent.
pub fn encode_body(text: &str, label: &str) -> Result<Bytes> {
    let encoding = encoding_rs::Encoding::for_label(label.trim().as_bytes())
        .ok_or_else(|| VolleyError::Encoding(format!("unsupported charset '{label}'")))?;

    if encoding.output_encoding() != encoding {
        return Err(VolleyError::Encoding(format!(
            "charset '{label}' cannot be used for encoding"
        )));
    }

    let (bytes, _, had_errors) = encoding.encode(text);
    if had_errors {
        return Err(VolleyError::Encoding(format!(
            "envelope contains characters not representable in '{label}'"
        )));
    }

    Ok(Bytes::from(bytes.into_owned()))
}
