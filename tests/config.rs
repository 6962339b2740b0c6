use volley::transport::{SocketFactory, TransportConfig};

#[test_log::test]
fn test_config_defaults_when_fields_missing() {
    let config: TransportConfig = serde_json::from_str("{}").unwrap();
    assert_eq!(config, TransportConfig::default());
    assert_eq!(config.connect_timeout_ms, 5000);
    assert_eq!(config.socket_timeout_ms, 20000);
}

#[test_log::test]
fn test_config_overrides_https_trust() {
    let config: TransportConfig = serde_json::from_value(serde_json::json!({
        "connect_timeout_ms": 1500,
        "schemes": {
            "http": { "default_port": 8080, "socket_factory": { "type": "plain" } },
            "https": {
                "default_port": 8443,
                "socket_factory": { "type": "tls", "accept_invalid_certs": true }
            }
        }
    }))
    .unwrap();

    assert_eq!(config.connect_timeout_ms, 1500);
    assert_eq!(config.socket_timeout_ms, 20000);

    let (url, factory) = config.schemes.resolve("https://legacy.internal/ws").unwrap();
    assert_eq!(url.as_str(), "https://legacy.internal:8443/ws");
    match factory {
        SocketFactory::Tls(policy) => {
            assert!(policy.accept_invalid_certs);
            assert!(policy.root_certificates_pem.is_empty());
        }
        SocketFactory::Plain => panic!("Expected TLS socket factory"),
    }

    let (url, factory) = config.schemes.resolve("http://legacy.internal/ws").unwrap();
    assert_eq!(url.port(), Some(8080));
    assert_eq!(factory, SocketFactory::Plain);
}

#[test_log::test]
fn test_config_scheme_names_are_case_insensitive() {
    let config: TransportConfig = serde_json::from_value(serde_json::json!({
        "schemes": {
            "HTTPS": { "default_port": 9443, "socket_factory": { "type": "tls" } }
        }
    }))
    .unwrap();

    let (url, _) = config.schemes.resolve("https://x.example/ws").unwrap();
    assert_eq!(url.port(), Some(9443));

    // Schemes left out of the map keep their defaults
    let (url, factory) = config.schemes.resolve("http://x.example/ws").unwrap();
    assert_eq!(url.as_str(), "http://x.example/ws");
    assert_eq!(factory, SocketFactory::Plain);
}

#[test_log::test]
fn test_config_rejects_unsupported_scheme() {
    let result: Result<TransportConfig, _> = serde_json::from_value(serde_json::json!({
        "schemes": {
            "ftp": { "default_port": 21, "socket_factory": { "type": "plain" } }
        }
    }));

    let err = result.unwrap_err();
    assert!(err.to_string().contains("unsupported scheme 'ftp'"));
}
