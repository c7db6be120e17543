//! Failure to success chain detector.
//!
//! Flags clusters of failed logins immediately followed by a successful
//! authentication, the classic brute force / credential stuffing shape.

use std::cmp::Reverse;
use std::collections::HashMap;

use chrono::Duration;
use serde_json::json;

use crate::detection::{group_by_user, unique_sorted};
use crate::models::alert::new_short_id;
use crate::models::{Alert, AuthEvent, Detector, Evidence, Severity};
use crate::scoring::base_score;

/// Same-IP failure count at which the chain is escalated to high severity.
const HIGH_SEVERITY_SAME_IP_FAILURES: usize = 12;
/// Total failure count that earns the score bonus.
const SCORE_BONUS_FAILURES: usize = 10;
const SCORE_BONUS: u8 = 10;
/// Number of top attacking IPs listed in evidence.
const TOP_IP_LIMIT: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttackType {
    /// Concentrated brute force from one address.
    SameIp,
    /// Distributed credential stuffing across addresses.
    MultiIp,
}

impl AttackType {
    fn as_str(self) -> &'static str {
        match self {
            AttackType::SameIp => "same_ip",
            AttackType::MultiIp => "multi_ip",
        }
    }
}

/// Detect failure-to-success authentication chains.
///
/// For every successful login, scans strictly backward through that user's
/// prior events collecting failures until the first event older than
/// `window_minutes` (the window covers the immediately preceding contiguous
/// run, not a global lookback). The same-IP trigger is checked before the
/// multi-IP trigger; if neither fires there is no alert.
pub fn detect_fail_success_chain(
    events: &[AuthEvent],
    window_minutes: i64,
    min_failures_same_ip: usize,
    min_failures_multi_ip: usize,
) -> Vec<Alert> {
    let mut alerts = Vec::new();
    let window = Duration::minutes(window_minutes.max(0));

    for (user, mut user_events) in group_by_user(events) {
        user_events.sort_by_key(|e| e.ts);

        for (i, event) in user_events.iter().enumerate() {
            if !event.is_success() {
                continue;
            }

            let window_start = event.ts - window;
            let mut failures: Vec<&AuthEvent> = Vec::new();
            for prior in user_events[..i].iter().rev() {
                if prior.ts < window_start {
                    break;
                }
                if !prior.is_success() {
                    failures.push(prior);
                }
            }

            if failures.is_empty() {
                continue;
            }

            let mut ip_counts: HashMap<&str, usize> = HashMap::new();
            for failure in &failures {
                *ip_counts.entry(failure.source_ip.as_str()).or_default() += 1;
            }

            let total_failures = failures.len();
            let max_same_ip = ip_counts.values().copied().max().unwrap_or(0);

            let (attack_type, threshold_used) = if max_same_ip >= min_failures_same_ip {
                (AttackType::SameIp, min_failures_same_ip)
            } else if total_failures >= min_failures_multi_ip {
                (AttackType::MultiIp, min_failures_multi_ip)
            } else {
                continue;
            };

            let alert = build_alert(user, &failures, event, &ip_counts, attack_type, threshold_used);
            log::info!(
                "fail/success chain detected for {}: {} failures from {} IPs",
                user,
                total_failures,
                ip_counts.len()
            );
            alerts.push(alert);
        }
    }

    alerts
}

fn build_alert(
    user: &str,
    failures: &[&AuthEvent],
    success: &AuthEvent,
    ip_counts: &HashMap<&str, usize>,
    attack_type: AttackType,
    threshold_used: usize,
) -> Alert {
    let total_failures = failures.len();
    let distinct_ips = ip_counts.len();
    let max_same_ip = ip_counts.values().copied().max().unwrap_or(0);

    let severity = if attack_type == AttackType::SameIp
        && max_same_ip >= HIGH_SEVERITY_SAME_IP_FAILURES
    {
        Severity::High
    } else if total_failures >= threshold_used {
        Severity::Medium
    } else {
        // Unreachable under the trigger policy, kept as the floor.
        Severity::Low
    };

    let mut score = base_score(severity);
    if total_failures >= SCORE_BONUS_FAILURES {
        score = score.saturating_add(SCORE_BONUS).min(crate::scoring::MAX_SCORE);
    }

    // Highest failure count first, ties broken by IP string for determinism.
    let mut top_ips: Vec<(&str, usize)> = ip_counts.iter().map(|(ip, n)| (*ip, *n)).collect();
    top_ips.sort_by_key(|(ip, count)| (Reverse(*count), *ip));
    top_ips.truncate(TOP_IP_LIMIT);

    let first_failure = failures
        .iter()
        .min_by_key(|f| f.ts)
        .unwrap_or(&failures[0]);
    let last_failure = failures
        .iter()
        .max_by_key(|f| f.ts)
        .unwrap_or(&failures[0]);
    let span_minutes = (success.ts - first_failure.ts).num_milliseconds() as f64 / 60_000.0;

    let description = match attack_type {
        AttackType::SameIp => format!(
            "Detected {} failed login attempts from the same IP ({}) followed by a \
             successful login for user {}. This pattern is consistent with brute \
             force or credential stuffing attacks.",
            max_same_ip,
            top_ips.first().map(|(ip, _)| *ip).unwrap_or("unknown"),
            user
        ),
        AttackType::MultiIp => format!(
            "Detected {} failed login attempts from {} different IPs followed by a \
             successful login for user {}. This distributed pattern suggests a \
             credential stuffing attack.",
            total_failures, distinct_ips, user
        ),
    };

    let mut evidence = Evidence::new();
    evidence.insert(
        "ips".to_string(),
        json!(unique_sorted(
            failures
                .iter()
                .map(|f| Some(f.source_ip.as_str()))
                .chain([Some(success.source_ip.as_str())]),
        )),
    );
    evidence.insert(
        "device_ids".to_string(),
        json!(unique_sorted(
            failures
                .iter()
                .map(|f| f.device_id.as_deref())
                .chain([success.device_id.as_deref()]),
        )),
    );
    evidence.insert(
        "countries".to_string(),
        json!(unique_sorted(
            failures
                .iter()
                .map(|f| f.country.as_deref())
                .chain([success.country.as_deref()]),
        )),
    );
    evidence.insert("failure_count".to_string(), json!(total_failures));
    evidence.insert("distinct_ips".to_string(), json!(distinct_ips));
    evidence.insert("max_same_ip_failures".to_string(), json!(max_same_ip));
    evidence.insert(
        "top_ips".to_string(),
        json!(top_ips
            .iter()
            .map(|(ip, count)| json!({ "ip": ip, "count": count }))
            .collect::<Vec<_>>()),
    );
    evidence.insert("attack_type".to_string(), json!(attack_type.as_str()));
    evidence.insert("threshold_used".to_string(), json!(threshold_used));
    evidence.insert(
        "first_failure_ts".to_string(),
        json!(first_failure.ts.to_rfc3339()),
    );
    evidence.insert(
        "last_failure_ts".to_string(),
        json!(last_failure.ts.to_rfc3339()),
    );
    evidence.insert("success_ts".to_string(), json!(success.ts.to_rfc3339()));
    evidence.insert("success_ip".to_string(), json!(success.source_ip));
    evidence.insert(
        "time_span_minutes".to_string(),
        json!((span_minutes * 10.0).round() / 10.0),
    );

    let mut related_event_ids: Vec<String> =
        failures.iter().map(|f| f.event_id.clone()).collect();
    related_event_ids.push(success.event_id.clone());

    Alert {
        alert_id: new_short_id("FSC"),
        detector: Detector::FailSuccessChain,
        ts_start: first_failure.ts,
        ts_end: success.ts,
        user: user.to_string(),
        severity,
        score,
        title: "Brute Force / Credential Stuffing Detected".to_string(),
        description,
        evidence,
        mitre: vec![
            "T1110".to_string(),
            "T1110.001".to_string(),
            "T1110.004".to_string(),
        ],
        related_event_ids,
    }
}
