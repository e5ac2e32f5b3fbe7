//! Trace entry and message snapshot types.
//!
//! These are also the journal record format: one entry serializes to one
//! JSON object per line. Field names match the journal written by earlier
//! deployments, so older journals load without conversion.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Header mapping of a captured message. Multi-valued, ordered by name.
///
/// Keys are recorded as hyper yields them, which is lowercase; the
/// on-the-wire casing of the original message is not preserved. Journals
/// written with canonical-case keys still load unchanged.
pub type HeaderSnapshot = BTreeMap<String, Vec<String>>;

/// Captured request or response message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSnapshot {
    #[serde(default, deserialize_with = "null_as_default")]
    pub headers: HeaderSnapshot,
    #[serde(default, deserialize_with = "null_as_default")]
    pub body: String,
    /// True iff the original body exceeded the capture cap.
    #[serde(default)]
    pub truncated: bool,
}

/// One recorded request/response exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceEntry {
    pub id: String,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub client_addr: String,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub host: String,
    /// Absent when the upstream exchange failed.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "zero_as_none"
    )]
    pub status_code: Option<u16>,
    /// Detected SOAP operation, empty when none could be determined.
    #[serde(default)]
    pub soap_action: String,
    #[serde(rename = "req", default)]
    pub request: MessageSnapshot,
    #[serde(rename = "resp", default)]
    pub response: MessageSnapshot,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Set by the store when the journal write for this entry failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persist_error: Option<String>,
    /// Byte count of the full request body as received, before the capture
    /// cap is applied. Journals from earlier deployments stored the
    /// post-truncation length here, so their values never exceed the cap.
    #[serde(rename = "sizeReqBytes", default)]
    pub request_size: u64,
    /// Response counterpart of `request_size`, also untruncated.
    #[serde(rename = "sizeRespBytes", default)]
    pub response_size: u64,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// Older journals record failed exchanges as statusCode 0.
fn zero_as_none<'de, D>(deserializer: D) -> Result<Option<u16>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<u16>::deserialize(deserializer)?.filter(|code| *code != 0))
}
