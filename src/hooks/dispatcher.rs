//! Fire-and-forget hook dispatch.

use std::sync::Arc;

use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;

use crate::hooks::{extract, HookError, HookRule};
use crate::observability::metrics;

/// The configured hook rules plus the client used to deliver them.
pub struct ActionHooks {
    rules: Vec<Arc<HookRule>>,
    client: reqwest::Client,
}

impl ActionHooks {
    /// Build a hook set.
    pub fn new(rules: Vec<HookRule>) -> Result<Self, HookError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("soap-proxy/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            rules: rules.into_iter().map(Arc::new).collect(),
            client,
        })
    }

    /// Spawn one delivery per rule whose action equals `action`.
    ///
    /// Returns immediately with the number of deliveries spawned. The body
    /// is copied before returning, so the caller may drop its buffer.
    /// Must be called from within a Tokio runtime.
    pub fn maybe_handle(&self, action: &str, response_body: &[u8]) -> usize {
        let mut matching = self
            .rules
            .iter()
            .filter(|rule| rule.soap_action == action)
            .peekable();
        if matching.peek().is_none() {
            return 0;
        }

        let body = Bytes::copy_from_slice(response_body);
        let mut spawned = 0;

        for rule in matching {
            let rule = Arc::clone(rule);
            let client = self.client.clone();
            let body = body.clone();

            tokio::spawn(async move {
                match deliver(&client, &rule, body).await {
                    Ok(status) => {
                        metrics::record_hook_dispatch("delivered");
                        tracing::info!(
                            soap_action = %rule.soap_action,
                            endpoint = %rule.endpoint,
                            status,
                            "Action hook delivered"
                        );
                    }
                    Err(e) => {
                        metrics::record_hook_dispatch(outcome_label(&e));
                        tracing::warn!(
                            soap_action = %rule.soap_action,
                            endpoint = %rule.endpoint,
                            error = %e,
                            "Action hook failed"
                        );
                    }
                }
            });
            spawned += 1;
        }

        spawned
    }
}

/// Extract the rule's value and POST it. One attempt, bounded by the rule
/// timeout from connect until the response body is drained.
async fn deliver(client: &reqwest::Client, rule: &HookRule, body: Bytes) -> Result<u16, HookError> {
    let value = extract::extract_value(&body, &rule.xpath)?;
    let payload = serde_json::to_vec(&value)?;

    let response = client
        .post(rule.endpoint.clone())
        .header(CONTENT_TYPE, "application/json")
        .body(payload)
        .timeout(rule.timeout)
        .send()
        .await?;

    let status = response.status().as_u16();
    // Drain so the connection can be reused; the content is not used.
    let _ = response.bytes().await;

    if status >= 300 {
        return Err(HookError::Status(status));
    }
    Ok(status)
}

fn outcome_label(error: &HookError) -> &'static str {
    match error {
        HookError::Parse(_) | HookError::InvalidPath { .. } | HookError::NotFound { .. } => {
            "extraction_failed"
        }
        HookError::Encode(_) | HookError::Delivery(_) | HookError::Status(_) => "delivery_failed",
    }
}
