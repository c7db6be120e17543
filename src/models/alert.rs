use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Heterogeneous evidence bag attached to an alert.
///
/// Each detector contributes its own key set; the standardized keys
/// `ips`, `device_ids`, and `countries` (arrays of strings) are the only
/// ones correlation is allowed to depend on. Insertion order is preserved
/// through serialization.
pub type Evidence = serde_json::Map<String, Value>;

/// Alert severity levels, ordered from least to most severe.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Triage sort rank: critical first.
    pub fn rank(self) -> u8 {
        match self {
            Severity::Critical => 0,
            Severity::High => 1,
            Severity::Medium => 2,
            Severity::Low => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The rule that produced an alert.
///
/// Variants are declared in alphabetical order of their wire names so that
/// ordered collections of detectors match their textual sort order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Detector {
    FailSuccessChain,
    ImpossibleTravel,
    NewDeviceUa,
}

impl Detector {
    pub fn as_str(self) -> &'static str {
        match self {
            Detector::FailSuccessChain => "fail_success_chain",
            Detector::ImpossibleTravel => "impossible_travel",
            Detector::NewDeviceUa => "new_device_ua",
        }
    }

    /// Human phrasing used in case summaries.
    pub fn human_label(self) -> &'static str {
        match self {
            Detector::FailSuccessChain => "brute force/credential stuffing attempts",
            Detector::ImpossibleTravel => "impossible travel patterns",
            Detector::NewDeviceUa => "new device anomalies",
        }
    }
}

impl fmt::Display for Detector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One detector finding, with evidence and severity.
///
/// Immutable once created; owned by the alert list until grouped into a case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub alert_id: String,
    pub detector: Detector,
    pub ts_start: DateTime<Utc>,
    pub ts_end: DateTime<Utc>,
    pub user: String,
    pub severity: Severity,
    /// Numeric score in [0, 100].
    pub score: u8,
    pub title: String,
    pub description: String,
    pub evidence: Evidence,
    /// MITRE ATT&CK technique identifiers.
    pub mitre: Vec<String>,
    /// AuthEvent ids that justify this alert.
    pub related_event_ids: Vec<String>,
}

impl Alert {
    /// String values of an evidence array key ("ips", "device_ids", ...).
    pub fn evidence_strings(&self, key: &str) -> HashSet<&str> {
        self.evidence
            .get(key)
            .and_then(Value::as_array)
            .map(|values| values.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }
}

/// Short prefixed identifier, e.g. `IT-9F2A41BC`.
pub(crate) fn new_short_id(prefix: &str) -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("{}-{}", prefix, hex[..8].to_uppercase())
}
