//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from TOML. Every
//! section has defaults, so an empty file (or no file) is a valid config.

use serde::{Deserialize, Serialize};

/// Root configuration for the SOAP proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct ProxyConfig {
    /// Proxy listener (bind address, optional inbound TLS).
    pub listener: ListenerConfig,

    /// Trace read API listener.
    pub api: ApiConfig,

    /// Upstream SOAP service and client credentials.
    pub upstream: UpstreamConfig,

    /// Trace store settings.
    pub store: StoreConfig,

    /// Action hook rules.
    pub hooks: Vec<HookConfig>,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            tls: None,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// Read API listener.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ApiConfig {
    pub bind_address: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8081".to_string(),
        }
    }
}

/// Upstream service and the mutual-TLS material used to reach it.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Base URL; its path is prefixed to every forwarded request path.
    pub url: String,

    /// Client certificate chain (PEM).
    pub cert_file: String,

    /// Client private key (PEM).
    pub key_file: String,

    /// CA bundle trusted for the upstream server (PEM).
    pub ca_file: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: "https://downstream.example.com/soap".to_string(),
            cert_file: "/certs/tls.crt".to_string(),
            key_file: "/certs/tls.key".to_string(),
            ca_file: "/certs/ca.crt".to_string(),
        }
    }
}

/// Trace store configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// Journal file path (JSON Lines, append-only).
    pub path: String,

    /// Number of recent traces kept in memory.
    pub max_traces: usize,

    /// Sync the journal to stable storage after every write.
    pub fsync: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: "/data/traces.jsonl".to_string(),
            max_traces: 10_000,
            fsync: true,
        }
    }
}

/// One action hook rule as written in the file.
///
/// Fields are optional so that partially filled rules reach validation
/// instead of failing deserialization with a less useful message.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct HookConfig {
    pub soap_action: Option<String>,
    pub xpath: Option<String>,
    pub endpoint: Option<String>,

    /// Delivery timeout in seconds; zero or negative selects the default.
    pub timeout_secs: i64,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config: ProxyConfig = toml::from_str("").unwrap();
        assert_eq!(config, ProxyConfig::default());
        assert_eq!(config.listener.bind_address, "0.0.0.0:8080");
        assert_eq!(config.api.bind_address, "0.0.0.0:8081");
        assert_eq!(config.store.max_traces, 10_000);
        assert!(config.store.fsync);
        assert!(config.hooks.is_empty());
    }

    #[test]
    fn full_document() {
        let config: ProxyConfig = toml::from_str(
            r#"
            [listener]
            bind_address = "127.0.0.1:9000"
            [listener.tls]
            cert_path = "/tls/server.crt"
            key_path = "/tls/server.key"

            [upstream]
            url = "https://soap.internal:8443/services"

            [store]
            path = "/var/lib/proxy/traces.jsonl"
            max_traces = 50
            fsync = false

            [[hooks]]
            soap_action = "SubmitOrder"
            xpath = "//*[local-name()='OrderId']"
            endpoint = "http://orders.internal/hook"
            timeout_secs = 3

            [[hooks]]
            soap_action = "CancelOrder"
            "#,
        )
        .unwrap();

        assert_eq!(config.listener.tls.as_ref().unwrap().key_path, "/tls/server.key");
        assert_eq!(config.upstream.url, "https://soap.internal:8443/services");
        assert_eq!(config.upstream.ca_file, "/certs/ca.crt");
        assert_eq!(config.store.max_traces, 50);
        assert_eq!(config.hooks.len(), 2);
        assert_eq!(config.hooks[0].timeout_secs, 3);
        assert_eq!(config.hooks[1].xpath, None);
    }
}
