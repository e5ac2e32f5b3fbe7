//! Configuration loading from disk and the environment.

use std::fs;
use std::path::Path;

use crate::config::schema::ProxyConfig;
use crate::config::validation::{validate_config, ValidationError};
use crate::net::tls::TlsError;

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Validation(Vec<ValidationError>),
    Tls(TlsError),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
            ConfigError::Tls(e) => write!(f, "TLS error: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(e) => Some(e),
            ConfigError::Parse(e) => Some(e),
            ConfigError::Tls(e) => Some(e),
            ConfigError::Validation(_) => None,
        }
    }
}

impl From<TlsError> for ConfigError {
    fn from(e: TlsError) -> Self {
        ConfigError::Tls(e)
    }
}

/// Parse a TOML file without applying overrides or validation.
pub fn read_config(path: &Path) -> Result<ProxyConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    toml::from_str(&content).map_err(ConfigError::Parse)
}

/// Load configuration from an optional file, apply environment overrides,
/// then validate.
pub fn load_config(path: Option<&Path>) -> Result<ProxyConfig, ConfigError> {
    let config = match path {
        Some(path) => read_config(path)?,
        None => ProxyConfig::default(),
    };
    let config = apply_env_overrides(config, |key| std::env::var(key).ok());

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Overlay deployment environment variables onto `config`.
///
/// `lookup` resolves a variable name; empty values count as unset.
/// A `MAX_TRACES` that does not parse is ignored with a warning.
pub fn apply_env_overrides<F>(mut config: ProxyConfig, lookup: F) -> ProxyConfig
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

    if let Some(v) = get("UPSTREAM_URL") {
        config.upstream.url = v;
    }
    if let Some(v) = get("PROXY_LISTEN") {
        config.listener.bind_address = v;
    }
    if let Some(v) = get("UI_LISTEN") {
        config.api.bind_address = v;
    }
    if let Some(v) = get("TRACE_FILE") {
        config.store.path = v;
    }
    if let Some(v) = get("MAX_TRACES") {
        match v.parse() {
            Ok(n) => config.store.max_traces = n,
            Err(_) => tracing::warn!(value = %v, "Ignoring invalid MAX_TRACES"),
        }
    }
    if let Some(v) = get("MTLS_CERT_FILE") {
        config.upstream.cert_file = v;
    }
    if let Some(v) = get("MTLS_KEY_FILE") {
        config.upstream.key_file = v;
    }
    if let Some(v) = get("MTLS_CA_FILE") {
        config.upstream.ca_file = v;
    }

    config
}
