use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of an authentication attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthResult {
    Success,
    Failure,
}

impl AuthResult {
    pub fn as_str(self) -> &'static str {
        match self {
            AuthResult::Success => "success",
            AuthResult::Failure => "failure",
        }
    }
}

/// One normalized authentication attempt record.
///
/// Events are created once by ingestion and never mutated afterwards.
/// `event_id` is unique within a run; ingestion guarantees `ts` parsed
/// and `device_id` populated (deriving a fingerprint when absent) before
/// events reach the detectors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthEvent {
    pub event_id: String,
    pub ts: DateTime<Utc>,
    pub user: String,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    pub source_ip: String,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lon: Option<f64>,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub auth_method: Option<String>,
    pub result: AuthResult,
    #[serde(default)]
    pub failure_reason: Option<String>,
    /// Original record as parsed from the log line.
    #[serde(default)]
    pub raw: serde_json::Value,
}

impl AuthEvent {
    pub fn is_success(&self) -> bool {
        self.result == AuthResult::Success
    }

    /// "City, Country" label when either is present.
    pub fn location_label(&self) -> Option<String> {
        let parts: Vec<&str> = self
            .city
            .as_deref()
            .into_iter()
            .chain(self.country.as_deref())
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(", "))
        }
    }
}
