//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Upstream URL, bind addresses and window length
//! - Hook rules: all-or-nothing fields, endpoint URL, XPath compiles
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use url::Url;

use crate::config::schema::ProxyConfig;
use crate::hooks::build_hook_rules;

/// A single semantic problem with the configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("upstream url {url:?} is invalid: {reason}")]
    InvalidUpstream { url: String, reason: String },

    #[error("{field} bind address {address:?} is not a socket address")]
    InvalidBindAddress { field: &'static str, address: String },

    #[error("store.max_traces must be at least 1")]
    InvalidWindow,

    #[error("hook #{index}: soap_action, xpath and endpoint must all be set")]
    IncompleteHook { index: usize },

    #[error("hook #{index}: endpoint {endpoint:?} is not an http(s) url")]
    InvalidHookEndpoint { index: usize, endpoint: String },

    #[error("hook #{index}: {reason}")]
    InvalidHookPath { index: usize, reason: String },
}

/// Check a deserialized config, collecting every error.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if let Err(reason) = check_upstream(&config.upstream.url) {
        errors.push(ValidationError::InvalidUpstream {
            url: config.upstream.url.clone(),
            reason,
        });
    }

    let addresses = [
        ("listener", &config.listener.bind_address),
        ("api", &config.api.bind_address),
    ];
    for (field, address) in addresses {
        if address.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::InvalidBindAddress {
                field,
                address: address.clone(),
            });
        }
    }
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidBindAddress {
            field: "metrics",
            address: config.observability.metrics_address.clone(),
        });
    }

    if config.store.max_traces == 0 {
        errors.push(ValidationError::InvalidWindow);
    }

    if let Err(hook_errors) = build_hook_rules(&config.hooks) {
        errors.extend(hook_errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_upstream(raw: &str) -> Result<(), String> {
    let url = Url::parse(raw).map_err(|e| e.to_string())?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(format!("unsupported scheme {}", url.scheme()));
    }
    if url.host_str().is_none() {
        return Err("missing host".to_string());
    }
    Ok(())
}
