//! Outbound SOAP envelopes.
//!
//! The transport only needs three things from an envelope: a MIME type, a
//! character encoding label and the document's string form. [`Envelope`] is that
//! contract; [`SoapEnvelope`] is a small builder for the common case where the
//! caller already has header and body fragments as XML text.

use std::fmt;

use serde::{Deserialize, Serialize};

/// SOAP 1.1 envelope namespace.
pub const SOAP_11_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
/// SOAP 1.2 envelope namespace.
pub const SOAP_12_NS: &str = "http://www.w3.org/2003/05/soap-envelope";

/// Default encoding for new envelopes.
pub const DEFAULT_ENCODING: &str = "UTF-8";

const ENVELOPE_PREFIX: &str = "soapenv";

/// An outbound document for one SOAP call.
///
/// Implementations must be immutable for the duration of a call: the transport
/// reads `mime_type`, `encoding` and `body` once per request.
pub trait Envelope: Send + Sync {
    /// MIME type sent in the `Content-type` header (e.g. `text/xml`).
    fn mime_type(&self) -> &str;

    /// Character encoding label (e.g. `UTF-8`). Used both for the header and to
    /// encode the body.
    fn encoding(&self) -> &str;

    /// The document's string form, before charset encoding.
    fn body(&self) -> String;
}

/// SOAP protocol version. Determines the envelope namespace and MIME type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SoapVersion {
    #[default]
    #[serde(rename = "1.1")]
    Soap11,
    #[serde(rename = "1.2")]
    Soap12,
}

impl SoapVersion {
    pub fn namespace(&self) -> &'static str {
        match self {
            SoapVersion::Soap11 => SOAP_11_NS,
            SoapVersion::Soap12 => SOAP_12_NS,
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            SoapVersion::Soap11 => "text/xml",
            SoapVersion::Soap12 => "application/soap+xml",
        }
    }
}

/// A SOAP envelope assembled from XML fragments.
///
/// # Example
/// ```
/// use volley::envelope::{Envelope, SoapEnvelope};
///
/// let envelope = SoapEnvelope::new()
///     .with_namespace("q", "urn:quotes")
///     .with_body_entry("<q:GetQuote><q:Symbol>ACME</q:Symbol></q:GetQuote>");
///
/// assert_eq!(envelope.mime_type(), "text/xml");
/// assert!(envelope.body().contains("<soapenv:Body><q:GetQuote>"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoapEnvelope {
    version: SoapVersion,
    encoding: String,
    mime_type: Option<String>,
    namespaces: Vec<(String, String)>,
    header_entries: Vec<String>,
    body_entries: Vec<String>,
}

impl SoapEnvelope {
    /// Create an empty SOAP 1.1 envelope encoded as UTF-8.
    pub fn new() -> Self {
        Self::with_version(SoapVersion::Soap11)
    }

    pub fn with_version(version: SoapVersion) -> Self {
        Self {
            version,
            encoding: DEFAULT_ENCODING.to_string(),
            mime_type: None,
            namespaces: Vec::new(),
            header_entries: Vec::new(),
            body_entries: Vec::new(),
        }
    }

    /// Override the character encoding label.
    pub fn with_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.encoding = encoding.into();
        self
    }

    /// Override the MIME type derived from the SOAP version.
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    /// Declare an extra namespace prefix on the `Envelope` element.
    pub fn with_namespace(mut self, prefix: impl Into<String>, uri: impl Into<String>) -> Self {
        self.namespaces.push((prefix.into(), uri.into()));
        self
    }

    /// Append a raw XML fragment to the `Header` element.
    pub fn with_header_entry(mut self, xml: impl Into<String>) -> Self {
        self.header_entries.push(xml.into());
        self
    }

    /// Append a raw XML fragment to the `Body` element.
    pub fn with_body_entry(mut self, xml: impl Into<String>) -> Self {
        self.body_entries.push(xml.into());
        self
    }

    /// Append `<name>text</name>` to the body, escaping `text`.
    pub fn with_body_element(self, name: &str, text: &str) -> Self {
        let entry = format!("<{name}>{}</{name}>", xml_escape(text));
        self.with_body_entry(entry)
    }

    pub fn version(&self) -> SoapVersion {
        self.version
    }
}

impl Default for SoapEnvelope {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SoapEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            r#"<?xml version="1.0" encoding="{}"?><{ENVELOPE_PREFIX}:Envelope xmlns:{ENVELOPE_PREFIX}="{}""#,
            self.encoding,
            self.version.namespace()
        )?;
        for (prefix, uri) in &self.namespaces {
            write!(f, r#" xmlns:{}="{}""#, prefix, xml_escape(uri))?;
        }
        f.write_str(">")?;

        if !self.header_entries.is_empty() {
            write!(f, "<{ENVELOPE_PREFIX}:Header>")?;
            for entry in &self.header_entries {
                f.write_str(entry)?;
            }
            write!(f, "</{ENVELOPE_PREFIX}:Header>")?;
        }

        write!(f, "<{ENVELOPE_PREFIX}:Body>")?;
        for entry in &self.body_entries {
            f.write_str(entry)?;
        }
        write!(f, "</{ENVELOPE_PREFIX}:Body></{ENVELOPE_PREFIX}:Envelope>")
    }
}

impl Envelope for SoapEnvelope {
    fn mime_type(&self) -> &str {
        self.mime_type
            .as_deref()
            .unwrap_or_else(|| self.version.mime_type())
    }

    fn encoding(&self) -> &str {
        &self.encoding
    }

    fn body(&self) -> String {
        self.to_string()
    }
}

/// Escape the five XML special characters.
pub fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
