//! Severity scoring for alerts and cases.
//!
//! Centralizes the severity-to-score table and the case score composition
//! rules so severity semantics live in one place.

use std::collections::HashSet;

use serde_json::Value;

use crate::models::{Alert, Detector, Severity};

/// Bonus when a case combines more than one detector type.
const MULTI_DETECTOR_BONUS: u16 = 15;
/// Bonus when a fail/success chain saw at least this many failures.
const HIGH_FAILURE_BONUS: u16 = 10;
const HIGH_FAILURE_THRESHOLD: u64 = 10;
/// Bonus when a login came from both a new device and a new country.
const NEW_DEVICE_COUNTRY_BONUS: u16 = 10;

pub const MAX_SCORE: u8 = 100;

/// Base score for a severity level.
pub fn base_score(severity: Severity) -> u8 {
    match severity {
        Severity::Low => 25,
        Severity::Medium => 50,
        Severity::High => 75,
        Severity::Critical => 95,
    }
}

/// Severity level for a numeric score.
pub fn severity_from_score(score: u8) -> Severity {
    if score >= 90 {
        Severity::Critical
    } else if score >= 70 {
        Severity::High
    } else if score >= 40 {
        Severity::Medium
    } else {
        Severity::Low
    }
}

/// Overall (score, severity) for a group of alerts forming one case.
///
/// Starts from the highest member base score, then adds:
/// - +15 when more than one detector type is present,
/// - +10 when any fail/success chain alert saw >= 10 failures,
/// - +10 when any new-device alert saw a new device from a new country.
///
/// The two +10 bonuses are independent and each applies at most once (the
/// first qualifying alert wins). The result is capped at 100.
pub fn calculate_case_score(alerts: &[Alert]) -> (u8, Severity) {
    let first = match alerts.first() {
        Some(alert) => alert,
        None => return (0, Severity::Low),
    };

    let mut base = base_score(first.severity);
    for alert in &alerts[1..] {
        base = base.max(base_score(alert.severity));
    }

    let mut bonus: u16 = 0;

    let detector_types: HashSet<Detector> = alerts.iter().map(|a| a.detector).collect();
    if detector_types.len() > 1 {
        bonus += MULTI_DETECTOR_BONUS;
    }

    if alerts.iter().any(is_high_failure_chain) {
        bonus += HIGH_FAILURE_BONUS;
    }
    if alerts.iter().any(is_new_device_new_country) {
        bonus += NEW_DEVICE_COUNTRY_BONUS;
    }

    let score = (u16::from(base) + bonus).min(u16::from(MAX_SCORE)) as u8;
    (score, severity_from_score(score))
}

fn is_high_failure_chain(alert: &Alert) -> bool {
    alert.detector == Detector::FailSuccessChain
        && alert
            .evidence
            .get("failure_count")
            .and_then(Value::as_u64)
            .map_or(false, |count| count >= HIGH_FAILURE_THRESHOLD)
}

fn is_new_device_new_country(alert: &Alert) -> bool {
    let flag = |key: &str| {
        alert
            .evidence
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    };
    alert.detector == Detector::NewDeviceUa && flag("is_new_device") && flag("is_new_country")
}
