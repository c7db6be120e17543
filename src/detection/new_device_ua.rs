//! New device / user-agent anomaly detector.
//!
//! Walks each user's events in time order, progressively learning the
//! devices, UA families, and countries the user normally authenticates
//! with, and flags successes that fall outside that baseline. The baseline
//! an event is checked against never includes the event itself.

use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::BTreeSet;

use crate::detection::group_by_user;
use crate::models::alert::new_short_id;
use crate::models::{Alert, AuthEvent, Detector, Evidence, Severity};
use crate::scoring::base_score;

const NEW_DEVICE_COUNTRY_BONUS: u8 = 10;

/// Per-user accumulating view of previously observed devices.
///
/// Rebuilt from scratch each run and advanced strictly forward as the
/// user's history is walked in timestamp order.
#[derive(Debug, Clone, Default)]
pub struct DeviceBaseline {
    pub device_ids: BTreeSet<String>,
    pub ua_families: BTreeSet<String>,
    pub countries: BTreeSet<String>,
    pub last_seen: Option<DateTime<Utc>>,
}

impl DeviceBaseline {
    /// Whether any device has been learned yet.
    pub fn has_devices(&self) -> bool {
        !self.device_ids.is_empty()
    }

    /// Learn from an event, success or failure. Events without a device id
    /// contribute nothing.
    pub fn observe(&mut self, event: &AuthEvent) {
        let Some(device_id) = event.device_id.as_deref() else {
            return;
        };
        self.device_ids.insert(device_id.to_string());
        self.ua_families.insert(ua_family(event.user_agent.as_deref()));
        if let Some(country) = event.country.as_deref() {
            self.countries.insert(country.to_string());
        }
        self.last_seen = Some(event.ts);
    }
}

/// Detect successful logins from devices or user agents a user has never
/// used before.
///
/// Only successes are checked, and only once the baseline holds at least
/// one known device (a user's first-ever success never alerts). Every
/// event, success or failure, then updates the baseline, so the check
/// always runs against the state as it stood before the event.
pub fn detect_new_device(events: &[AuthEvent], lookback_days: u32) -> Vec<Alert> {
    // TODO: bound the baseline by lookback_days; today it accumulates over
    // the whole run, so the parameter is accepted but not yet enforced.
    let _ = lookback_days;

    let mut alerts = Vec::new();

    for (user, mut user_events) in group_by_user(events) {
        user_events.sort_by_key(|e| e.ts);

        let mut baseline = DeviceBaseline::default();
        for event in user_events {
            if event.is_success() && baseline.has_devices() {
                if let Some(alert) = check_for_anomaly(event, &baseline) {
                    log::info!(
                        "new device detected for {}: {}",
                        user,
                        event.device_id.as_deref().unwrap_or("<no device id>")
                    );
                    alerts.push(alert);
                }
            }
            baseline.observe(event);
        }
    }

    alerts
}

fn check_for_anomaly(event: &AuthEvent, baseline: &DeviceBaseline) -> Option<Alert> {
    let is_new_device = event
        .device_id
        .as_deref()
        .map_or(false, |id| !baseline.device_ids.contains(id));

    let mut is_new_ua_family = false;
    let mut new_ua_family: Option<String> = None;
    if let Some(user_agent) = event.user_agent.as_deref().filter(|ua| !ua.is_empty()) {
        if !baseline.ua_families.is_empty() {
            let family = ua_family(Some(user_agent));
            if !baseline.ua_families.contains(&family) {
                is_new_ua_family = true;
                new_ua_family = Some(family);
            }
        }
    }

    let is_new_country = event.country.as_deref().map_or(false, |country| {
        !baseline.countries.is_empty() && !baseline.countries.contains(country)
    });

    // A new country alone never triggers.
    if !is_new_device && !is_new_ua_family {
        return None;
    }

    let severity = if is_new_country {
        Severity::High
    } else {
        Severity::Medium
    };

    let mut score = base_score(severity);
    if is_new_device && is_new_country {
        score = score
            .saturating_add(NEW_DEVICE_COUNTRY_BONUS)
            .min(crate::scoring::MAX_SCORE);
    }

    let mut anomaly_parts: Vec<String> = Vec::new();
    if is_new_device {
        anomaly_parts.push(format!(
            "new device ID ({})",
            event.device_id.as_deref().unwrap_or_default()
        ));
    }
    if let Some(family) = &new_ua_family {
        anomaly_parts.push(format!("new user agent family ({family})"));
    }
    if is_new_country {
        anomaly_parts.push(format!(
            "new country ({})",
            event.country.as_deref().unwrap_or_default()
        ));
    }

    let minutes_since_last_seen = baseline
        .last_seen
        .map(|seen| (event.ts - seen).num_milliseconds() as f64 / 60_000.0)
        .map(|minutes| (minutes * 10.0).round() / 10.0);

    let mut evidence = Evidence::new();
    evidence.insert("ips".to_string(), json!([event.source_ip]));
    evidence.insert(
        "device_ids".to_string(),
        json!(event.device_id.as_deref().map(|d| vec![d]).unwrap_or_default()),
    );
    evidence.insert(
        "countries".to_string(),
        json!(event.country.as_deref().map(|c| vec![c]).unwrap_or_default()),
    );
    evidence.insert("is_new_device".to_string(), json!(is_new_device));
    evidence.insert("is_new_ua_family".to_string(), json!(is_new_ua_family));
    evidence.insert("is_new_country".to_string(), json!(is_new_country));
    evidence.insert("new_device_id".to_string(), json!(event.device_id));
    evidence.insert("new_ua".to_string(), json!(event.user_agent));
    evidence.insert("new_ua_family".to_string(), json!(new_ua_family));
    evidence.insert(
        "known_devices_count".to_string(),
        json!(baseline.device_ids.len()),
    );
    evidence.insert(
        "known_ua_families".to_string(),
        json!(baseline.ua_families.iter().collect::<Vec<_>>()),
    );
    evidence.insert(
        "known_countries".to_string(),
        json!(baseline.countries.iter().collect::<Vec<_>>()),
    );
    evidence.insert("event_ts".to_string(), json!(event.ts.to_rfc3339()));
    evidence.insert(
        "time_since_last_seen_minutes".to_string(),
        json!(minutes_since_last_seen),
    );

    Some(Alert {
        alert_id: new_short_id("ND"),
        detector: Detector::NewDeviceUa,
        ts_start: event.ts,
        ts_end: event.ts,
        user: event.user.clone(),
        severity,
        score,
        title: "New Device / User-Agent Anomaly".to_string(),
        description: format!(
            "User {} successfully authenticated from a {}. This device/configuration \
             has not been seen in the user's history. Known devices: {}, Known UA \
             families: {}.",
            event.user,
            anomaly_parts.join(" and "),
            baseline.device_ids.len(),
            baseline.ua_families.len()
        ),
        evidence,
        mitre: vec!["T1078".to_string()],
        related_event_ids: vec![event.event_id.clone()],
    })
}

/// Coarse "{browser} on {os}" classification of a user-agent string.
///
/// Token matching is case-insensitive and precedence-ordered; a missing
/// user agent maps to "Unknown".
pub fn ua_family(user_agent: Option<&str>) -> String {
    let Some(user_agent) = user_agent else {
        return "Unknown".to_string();
    };
    if user_agent.is_empty() {
        return "Unknown".to_string();
    }

    let ua = user_agent.to_lowercase();

    let browser = if ua.contains("chrome") && ua.contains("safari") && !ua.contains("edg") {
        "Chrome"
    } else if ua.contains("firefox") {
        "Firefox"
    } else if ua.contains("safari") && !ua.contains("chrome") {
        "Safari"
    } else if ua.contains("edg") {
        "Edge"
    } else {
        "Other"
    };

    let os = if ua.contains("windows") {
        "Windows"
    } else if ua.contains("mac") || ua.contains("iphone") || ua.contains("ipad") {
        "Apple"
    } else if ua.contains("android") {
        "Android"
    } else if ua.contains("linux") {
        "Linux"
    } else {
        "Other"
    };

    format!("{browser} on {os}")
}
