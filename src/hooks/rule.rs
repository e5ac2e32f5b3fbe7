//! Hook rules built from configuration.

use std::time::Duration;

use url::Url;

use crate::config::schema::HookConfig;
use crate::config::validation::ValidationError;
use crate::hooks::extract;

/// Timeout used when a rule configures none, or a non-positive one.
pub const DEFAULT_HOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// A validated hook rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookRule {
    /// Operation name that triggers the rule (exact match).
    pub soap_action: String,
    /// XPath evaluated against the response body.
    pub xpath: String,
    /// Receives the extracted value as a JSON string.
    pub endpoint: Url,
    /// End-to-end bound on one delivery.
    pub timeout: Duration,
}

impl HookRule {
    /// Validate one configured rule.
    ///
    /// A rule with none of action, path and endpoint set yields `Ok(None)`;
    /// a rule with only some of them set is an error.
    pub fn from_config(index: usize, config: &HookConfig) -> Result<Option<Self>, ValidationError> {
        let fields = [
            non_empty(&config.soap_action),
            non_empty(&config.xpath),
            non_empty(&config.endpoint),
        ];

        let (soap_action, xpath, endpoint) = match fields {
            [None, None, None] => return Ok(None),
            [Some(action), Some(xpath), Some(endpoint)] => (action, xpath, endpoint),
            _ => return Err(ValidationError::IncompleteHook { index }),
        };

        let endpoint = Url::parse(endpoint)
            .ok()
            .filter(|url| matches!(url.scheme(), "http" | "https"))
            .ok_or_else(|| ValidationError::InvalidHookEndpoint {
                index,
                endpoint: endpoint.to_string(),
            })?;

        extract::check_path(xpath).map_err(|e| ValidationError::InvalidHookPath {
            index,
            reason: e.to_string(),
        })?;

        let timeout = match config.timeout_secs {
            secs if secs > 0 => Duration::from_secs(secs as u64),
            _ => DEFAULT_HOOK_TIMEOUT,
        };

        Ok(Some(Self {
            soap_action: soap_action.to_string(),
            xpath: xpath.to_string(),
            endpoint,
            timeout,
        }))
    }
}

/// Validate every configured rule, collecting all errors.
pub fn build_hook_rules(configs: &[HookConfig]) -> Result<Vec<HookRule>, Vec<ValidationError>> {
    let mut rules = Vec::new();
    let mut errors = Vec::new();

    for (index, config) in configs.iter().enumerate() {
        match HookRule::from_config(index, config) {
            Ok(Some(rule)) => rules.push(rule),
            Ok(None) => tracing::warn!(index, "Ignoring empty hook rule"),
            Err(e) => errors.push(e),
        }
    }

    if errors.is_empty() {
        Ok(rules)
    } else {
        Err(errors)
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}
