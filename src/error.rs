//! Error types for SOAP calls and request orchestration.

use thiserror::Error;

/// Result type alias using the volley error type.
pub type Result<T> = std::result::Result<T, VolleyError>;

/// Main error type for SOAP requests.
#[derive(Error, Debug)]
pub enum VolleyError {
    /// Network or I/O failure reported by the HTTP client
    #[error("SOAP transport failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// Transport failure that did not originate in reqwest (bad URL, unknown scheme, mock errors)
    #[error("SOAP transport failed: {0}")]
    TransportMessage(String),

    /// Envelope cannot be serialized in its declared charset
    #[error("Cannot encode envelope: {0}")]
    Encoding(String),

    /// Compound request misconfigured (e.g. executed without children)
    #[error("Invalid compound request: {0}")]
    Composition(String),

    /// Response parser could not interpret the response
    #[error("Failed to parse SOAP response: {0}")]
    Parse(#[source] anyhow::Error),

    /// Operation not valid for the request's current lifecycle state
    #[error("Invalid request state: {0}")]
    InvalidState(String),

    /// General error from anyhow
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl VolleyError {
    /// True for failures raised while talking to the remote endpoint.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            VolleyError::Transport(_) | VolleyError::TransportMessage(_)
        )
    }

    /// True when the response arrived but could not be parsed.
    pub fn is_parse(&self) -> bool {
        matches!(self, VolleyError::Parse(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(VolleyError::TransportMessage("connection reset".into()).is_transport());
        assert!(!VolleyError::Encoding("bogus".into()).is_transport());
        assert!(VolleyError::Parse(anyhow::anyhow!("unexpected element")).is_parse());
    }

    #[test]
    fn test_parse_error_keeps_source_chain() {
        let err = VolleyError::Parse(anyhow::anyhow!("missing Body").context("GetQuote"));
        assert_eq!(err.to_string(), "Failed to parse SOAP response: GetQuote");
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("GetQuote"));
    }
}
