//! Action hooks.
//!
//! # Data Flow
//! ```text
//! InstrumentedTransport (after the trace is recorded)
//!     → dispatcher.rs maybe_handle(action, response body)
//!         → copy body once, spawn one task per matching rule
//!             → extract.rs (parse XML, evaluate XPath, trim)
//!             → POST "value" as JSON to the rule endpoint
//! ```
//!
//! Dispatch never blocks or fails the proxied exchange. Failures are
//! logged and counted, never retried.

pub mod dispatcher;
pub mod extract;
pub mod rule;

use std::sync::Arc;

use arc_swap::ArcSwap;
use thiserror::Error;

pub use dispatcher::ActionHooks;
pub use rule::{build_hook_rules, HookRule, DEFAULT_HOOK_TIMEOUT};

/// Hook set shared with the transport; swapped whole on config reload.
pub type SharedHooks = Arc<ArcSwap<ActionHooks>>;

/// Errors from a single hook evaluation or delivery.
#[derive(Debug, Error)]
pub enum HookError {
    /// The response body is not well-formed XML.
    #[error("failed to parse response XML: {0}")]
    Parse(String),

    /// The XPath expression does not compile or evaluate.
    #[error("invalid xpath {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },

    /// The XPath matched nothing.
    #[error("xpath {path:?} not found in response")]
    NotFound { path: String },

    /// The payload could not be encoded.
    #[error("failed to encode hook payload: {0}")]
    Encode(#[from] serde_json::Error),

    /// The HTTP client could not be built or the request failed.
    #[error("hook delivery failed: {0}")]
    Delivery(#[from] reqwest::Error),

    /// The endpoint answered with a status of 300 or above.
    #[error("hook endpoint returned status {0}")]
    Status(u16),
}
