use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Alert, AuthEvent, Severity};

/// A correlated bundle of alerts for one user representing a single incident.
///
/// A case exclusively owns its alert and timeline lists and is not mutated
/// after construction. The timeline is the union of all events referenced
/// by member alerts, de-duplicated and sorted by time ascending.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Case {
    pub case_id: String,
    pub user: String,
    pub ts_start: DateTime<Utc>,
    pub ts_end: DateTime<Utc>,
    pub overall_severity: Severity,
    pub overall_score: u8,
    pub summary: String,
    pub recommended_actions: Vec<String>,
    pub alerts: Vec<Alert>,
    pub timeline: Vec<AuthEvent>,
}
