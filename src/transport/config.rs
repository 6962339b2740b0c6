//! Transport configuration: timeouts and the scheme registry.

use std::collections::BTreeMap;

use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::{Result, VolleyError};

/// Default timeout for establishing a connection, in milliseconds.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5000;
/// Default timeout for receiving data, in milliseconds.
pub const DEFAULT_SOCKET_TIMEOUT_MS: u64 = 20000;

pub const HTTP_SCHEME: &str = "http";
pub const HTTPS_SCHEME: &str = "https";
pub const DEFAULT_HTTP_PORT: u16 = 80;
pub const DEFAULT_HTTPS_PORT: u16 = 443;

/// Configuration for a [`SoapRequester`](super::SoapRequester).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Timeout for making a connection
    pub connect_timeout_ms: u64,

    /// Timeout for receiving response data
    pub socket_timeout_ms: u64,

    /// Scheme name -> default port and socket factory
    pub schemes: SchemeRegistry,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            socket_timeout_ms: DEFAULT_SOCKET_TIMEOUT_MS,
            schemes: SchemeRegistry::default(),
        }
    }
}

/// How connections for a scheme are opened.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SocketFactory {
    /// Plain TCP.
    Plain,
    /// TLS with the given certificate trust policy.
    Tls(TlsPolicy),
}

/// Certificate trust settings for TLS connections.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsPolicy {
    /// Skip certificate validation entirely. Only for self-signed test endpoints.
    pub accept_invalid_certs: bool,

    /// Extra PEM-encoded root certificates to trust
    pub root_certificates_pem: Vec<String>,
}

/// A registered scheme.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scheme {
    /// Port used when the target URL does not carry one
    pub default_port: u16,
    pub socket_factory: SocketFactory,
}

/// Maps URL scheme names to the port and socket factory used for them.
///
/// Only `http` and `https` can be registered, since those are the schemes the
/// underlying client speaks; overriding an entry changes its default port or TLS
/// trust policy.
///
/// When deserialized, each entry goes through [`SchemeRegistry::register`] on
/// top of the default registry: names are case-insensitive, other schemes are
/// rejected, and a scheme missing from the map keeps its default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    try_from = "BTreeMap<String, Scheme>",
    into = "BTreeMap<String, Scheme>"
)]
pub struct SchemeRegistry {
    schemes: BTreeMap<String, Scheme>,
}

impl SchemeRegistry {
    /// A registry with no schemes. Every URL is rejected until one is registered.
    pub fn empty() -> Self {
        Self {
            schemes: BTreeMap::new(),
        }
    }

    /// Register (or replace) a scheme.
    pub fn register(&mut self, name: &str, scheme: Scheme) -> Result<()> {
        let name = name.to_ascii_lowercase();
        if name != HTTP_SCHEME && name != HTTPS_SCHEME {
            return Err(VolleyError::TransportMessage(format!(
                "unsupported scheme '{name}': only http and https can be registered"
            )));
        }
        self.schemes.insert(name, scheme);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Scheme> {
        self.schemes.get(&name.to_ascii_lowercase())
    }

    pub fn unregister(&mut self, name: &str) -> Option<Scheme> {
        self.schemes.remove(&name.to_ascii_lowercase())
    }

    /// Parse `target_url` and apply the registered default port when the URL
    /// has none.
    ///
    /// Returns the resolved URL together with the socket factory to use.
    pub fn resolve(&self, target_url: &str) -> Result<(Url, SocketFactory)> {
        let mut url = Url::parse(target_url).map_err(|e| {
            VolleyError::TransportMessage(format!("invalid target URL '{target_url}': {e}"))
        })?;

        let scheme = self.get(url.scheme()).ok_or_else(|| {
            VolleyError::TransportMessage(format!(
                "no socket factory registered for scheme '{}'",
                url.scheme()
            ))
        })?;

        if url.port().is_none() {
            // Url::port() hides the scheme's well-known port, so this only
            // changes anything when the registry overrides it.
            url.set_port(Some(scheme.default_port)).map_err(|_| {
                VolleyError::TransportMessage(format!("cannot set port on '{target_url}'"))
            })?;
        }

        Ok((url, scheme.socket_factory.clone()))
    }
}

impl TryFrom<BTreeMap<String, Scheme>> for SchemeRegistry {
    type Error = VolleyError;

    fn try_from(entries: BTreeMap<String, Scheme>) -> Result<Self> {
        let mut registry = SchemeRegistry::default();
        for (name, scheme) in entries {
            registry.register(&name, scheme)?;
        }
        Ok(registry)
    }
}

impl From<SchemeRegistry> for BTreeMap<String, Scheme> {
    fn from(registry: SchemeRegistry) -> Self {
        registry.schemes
    }
}

impl Default for SchemeRegistry {
    fn default() -> Self {
        let mut schemes = BTreeMap::new();
        schemes.insert(
            HTTP_SCHEME.to_string(),
            Scheme {
                default_port: DEFAULT_HTTP_PORT,
                socket_factory: SocketFactory::Plain,
            },
        );
        schemes.insert(
            HTTPS_SCHEME.to_string(),
            Scheme {
                default_port: DEFAULT_HTTPS_PORT,
                socket_factory: SocketFactory::Tls(TlsPolicy::default()),
            },
        );
        Self { schemes }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TransportConfig::default();
        assert_eq!(config.connect_timeout_ms, 5000);
        assert_eq!(config.socket_timeout_ms, 20000);
        assert_eq!(config.schemes.get("http").unwrap().default_port, 80);
        assert_eq!(config.schemes.get("HTTPS").unwrap().default_port, 443);
        assert_eq!(
            config.schemes.get("https").unwrap().socket_factory,
            SocketFactory::Tls(TlsPolicy::default())
        );
    }

    #[test]
    fn test_resolve_keeps_standard_ports() {
        let registry = SchemeRegistry::default();
        let (url, factory) = registry.resolve("https://soap.example.com/svc").unwrap();
        assert_eq!(url.as_str(), "https://soap.example.com/svc");
        assert!(matches!(factory, SocketFactory::Tls(_)));

        let (url, _) = registry.resolve("http://soap.example.com:8080/svc").unwrap();
        assert_eq!(url.port(), Some(8080));
    }

    #[test]
    fn test_resolve_applies_custom_default_port() {
        let mut registry = SchemeRegistry::default();
        registry
            .register(
                "https",
                Scheme {
                    default_port: 8443,
                    socket_factory: SocketFactory::Tls(TlsPolicy {
                        accept_invalid_certs: true,
                        root_certificates_pem: vec![],
                    }),
                },
            )
            .unwrap();

        let (url, factory) = registry.resolve("https://internal.local/ws").unwrap();
        assert_eq!(url.as_str(), "https://internal.local:8443/ws");
        match factory {
            SocketFactory::Tls(policy) => assert!(policy.accept_invalid_certs),
            SocketFactory::Plain => panic!("Expected TLS factory"),
        }

        // An explicit port in the URL wins over the registry
        let (url, _) = registry.resolve("https://internal.local:9443/ws").unwrap();
        assert_eq!(url.port(), Some(9443));
    }

    #[test]
    fn test_resolve_rejects_unregistered_scheme() {
        let mut registry = SchemeRegistry::default();
        registry.unregister("http");

        let err = registry.resolve("http://soap.example.com").unwrap_err();
        assert!(err.is_transport());
        assert!(registry.resolve("ftp://soap.example.com").is_err());
        assert!(SchemeRegistry::empty().resolve("https://x.example").is_err());
    }

    #[test]
    fn test_register_rejects_unknown_scheme() {
        let mut registry = SchemeRegistry::default();
        let result = registry.register(
            "soap",
            Scheme {
                default_port: 1234,
                socket_factory: SocketFactory::Plain,
            },
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_try_from_normalizes_and_keeps_defaults() {
        let mut entries = BTreeMap::new();
        entries.insert(
            "HTTPS".to_string(),
            Scheme {
                default_port: 8443,
                socket_factory: SocketFactory::Tls(TlsPolicy::default()),
            },
        );
        let registry = SchemeRegistry::try_from(entries).unwrap();

        assert_eq!(registry.get("https").unwrap().default_port, 8443);
        assert_eq!(registry.get("http").unwrap().default_port, 80);
    }

    #[test]
    fn test_try_from_rejects_unknown_scheme() {
        let mut entries = BTreeMap::new();
        entries.insert(
            "ftp".to_string(),
            Scheme {
                default_port: 21,
                socket_factory: SocketFactory::Plain,
            },
        );
        assert!(SchemeRegistry::try_from(entries).unwrap_err().is_transport());
    }

    #[test]
    fn test_invalid_url() {
        let err = SchemeRegistry::default().resolve("not a url").unwrap_err();
        assert!(err.is_transport());
    }
}
