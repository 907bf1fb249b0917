//! Maps a failed HTTP exchange onto the three ways the engine reacts to it.

use serde_json::Value;

use crate::config::{DEFAULT_QUOTA_MARKERS, RuntimeConfig};

/// Server statuses worth retrying on the same request.
pub const TRANSIENT_STATUSES: [u16; 4] = [500, 502, 503, 504];

const MAX_MESSAGE_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retry the same request after a backoff delay.
    Transient,
    /// Give up on this file.
    Permanent,
    /// Give up on this file and on the rest of the batch.
    QuotaExhausted,
}

/// Substrings that mark an error body as a quota or daily-limit rejection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaSignature {
    markers: Vec<String>,
}

impl QuotaSignature {
    pub fn new<I, S>(markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            markers: markers
                .into_iter()
                .map(Into::into)
                .filter(|marker: &String| !marker.is_empty())
                .collect(),
        }
    }

    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self::new(config.quota_markers.iter().cloned())
    }

    pub fn matches(&self, body: &str) -> bool {
        self.markers.iter().any(|marker| body.contains(marker.as_str()))
    }

    pub fn markers(&self) -> &[String] {
        &self.markers
    }
}

impl Default for QuotaSignature {
    fn default() -> Self {
        Self::new(DEFAULT_QUOTA_MARKERS.split(','))
    }
}

/// Quota markers win over the status code, so a quota rejection served as a
/// 5xx still stops the batch. 429 is treated as permanent.
pub fn classify(status: u16, body: &str, quota: &QuotaSignature) -> ErrorClass {
    if quota.matches(body) {
        ErrorClass::QuotaExhausted
    } else if TRANSIENT_STATUSES.contains(&status) {
        ErrorClass::Transient
    } else {
        ErrorClass::Permanent
    }
}

/// Human-readable message from a Google-style `{"error": {"message": ...}}`
/// body, or the trimmed raw body.
pub fn api_error_message(body: &str) -> String {
    let parsed = serde_json::from_str::<Value>(body).ok();
    let message = parsed.as_ref().and_then(|value| {
        value
            .pointer("/error/message")
            .or_else(|| value.get("error_description"))
            .and_then(Value::as_str)
    });
    let text = message.unwrap_or(body).trim();
    if text.is_empty() {
        return "empty response body".to_string();
    }
    let mut truncated: String = text.chars().take(MAX_MESSAGE_CHARS).collect();
    if truncated.len() < text.len() {
        truncated.push_str("...");
    }
    truncated
}
