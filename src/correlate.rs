//! Alert correlation and incident case building.
//!
//! Groups related alerts for the same user into unified cases using time
//! proximity and shared indicators, then builds each case's narrative
//! (summary, timeline, recommended actions).

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use chrono::Duration;

use crate::models::alert::new_short_id;
use crate::models::{Alert, AuthEvent, Case, Detector};
use crate::scoring::calculate_case_score;

/// Fixed opening action for every case.
const ACTION_CONTACT_USER: &str = "Contact user to verify recent login activity";

/// Detector-specific action blocks, appended in this fixed order for
/// whichever detectors appear in the case.
const IMPOSSIBLE_TRAVEL_ACTIONS: [&str; 2] = [
    "Verify user's actual location and travel history",
    "Check for VPN or proxy usage",
];
const FAIL_SUCCESS_CHAIN_ACTIONS: [&str; 3] = [
    "Reset user credentials immediately",
    "Enable or verify MFA enrollment",
    "Review and block suspicious source IPs",
];
const NEW_DEVICE_UA_ACTIONS: [&str; 2] = [
    "Confirm new device is authorized by user",
    "Review device enrollment policies",
];

/// Fixed closing actions for every case.
const CLOSING_ACTIONS: [&str; 3] = [
    "Review conditional access policies",
    "Check for data exfiltration or account changes",
    "Document incident for compliance records",
];

/// Correlate alerts into security cases.
///
/// Alerts are grouped per user with a single left-to-right greedy pass over
/// the user's alerts sorted by `ts_start`: a candidate joins the open group
/// when it is within `window_hours` of some member's `ts_end` or shares an
/// IP or device id with some member; otherwise the group is closed and a
/// new one starts. Closed groups are never revisited, so a later alert that
/// only overlaps with an already-closed group starts a fresh case. This
/// one-pass behavior is deliberate; it is not connected-components
/// clustering.
///
/// Returned cases are sorted by severity rank (critical first), then by
/// start time.
pub fn correlate_cases(
    alerts: &[Alert],
    event_index: &HashMap<String, AuthEvent>,
    window_hours: f64,
) -> Vec<Case> {
    if alerts.is_empty() {
        return Vec::new();
    }

    let window = Duration::milliseconds((window_hours.max(0.0) * 3_600_000.0) as i64);

    let mut user_alerts: BTreeMap<&str, Vec<&Alert>> = BTreeMap::new();
    for alert in alerts {
        user_alerts.entry(alert.user.as_str()).or_default().push(alert);
    }

    let mut cases: Vec<Case> = Vec::new();
    for (user, mut alert_list) in user_alerts {
        alert_list.sort_by_key(|a| a.ts_start);

        for group in merge_into_groups(&alert_list, window) {
            let case = build_case(user, &group, event_index);
            log::info!(
                "created case {} for {} with {} alert(s), severity: {}",
                case.case_id,
                user,
                case.alerts.len(),
                case.overall_severity
            );
            cases.push(case);
        }
    }

    cases.sort_by(|a, b| {
        (a.overall_severity.rank(), a.ts_start).cmp(&(b.overall_severity.rank(), b.ts_start))
    });
    cases
}

/// One greedy pass over a user's time-sorted alerts.
fn merge_into_groups<'a>(alerts: &[&'a Alert], window: Duration) -> Vec<Vec<&'a Alert>> {
    let Some((first, rest)) = alerts.split_first() else {
        return Vec::new();
    };

    let mut groups: Vec<Vec<&Alert>> = Vec::new();
    let mut current: Vec<&Alert> = vec![*first];

    for &alert in rest {
        let merges = current
            .iter()
            .any(|member| alert.ts_start <= member.ts_end + window || share_indicators(alert, member));
        if merges {
            current.push(alert);
        } else {
            groups.push(std::mem::replace(&mut current, vec![alert]));
        }
    }

    groups.push(current);
    groups
}

/// Whether two alerts share at least one IP or device id through the
/// standardized evidence keys.
fn share_indicators(a: &Alert, b: &Alert) -> bool {
    !a.evidence_strings("ips").is_disjoint(&b.evidence_strings("ips"))
        || !a
            .evidence_strings("device_ids")
            .is_disjoint(&b.evidence_strings("device_ids"))
}

fn build_case(user: &str, alerts: &[&Alert], event_index: &HashMap<String, AuthEvent>) -> Case {
    let ts_start = alerts.iter().map(|a| a.ts_start).min().unwrap_or_default();
    let ts_end = alerts.iter().map(|a| a.ts_end).max().unwrap_or_default();

    let owned: Vec<Alert> = alerts.iter().map(|a| (*a).clone()).collect();
    let (overall_score, overall_severity) = calculate_case_score(&owned);

    let timeline = build_timeline(alerts, event_index);
    let summary = generate_summary(user, alerts, overall_severity.as_str(), &timeline);
    let recommended_actions = generate_recommendations(alerts);

    Case {
        case_id: new_short_id("CASE"),
        user: user.to_string(),
        ts_start,
        ts_end,
        overall_severity,
        overall_score,
        summary,
        recommended_actions,
        alerts: owned,
        timeline,
    }
}

/// Union of the events referenced by the alerts, de-duplicated by event id
/// and sorted by time ascending. An id missing from the index is logged
/// and skipped, never an error.
fn build_timeline(alerts: &[&Alert], event_index: &HashMap<String, AuthEvent>) -> Vec<AuthEvent> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut events: Vec<AuthEvent> = Vec::new();

    for alert in alerts {
        for event_id in &alert.related_event_ids {
            if !seen.insert(event_id) {
                continue;
            }
            match event_index.get(event_id) {
                Some(event) => events.push(event.clone()),
                None => log::warn!("event {} not found in index", event_id),
            }
        }
    }

    events.sort_by_key(|e| e.ts);
    events
}

fn generate_summary(user: &str, alerts: &[&Alert], severity: &str, timeline: &[AuthEvent]) -> String {
    let detectors: BTreeSet<Detector> = alerts.iter().map(|a| a.detector).collect();
    let labels: Vec<&str> = detectors.iter().map(|d| d.human_label()).collect();

    let detection_text = match labels.as_slice() {
        [] => "suspicious activity".to_string(),
        [only] => (*only).to_string(),
        [head @ .., last] => format!("{} and {}", head.join(", "), last),
    };

    let success_count = timeline.iter().filter(|e| e.is_success()).count();
    let failure_count = timeline.len() - success_count;
    let unique_ips: HashSet<&str> = timeline.iter().map(|e| e.source_ip.as_str()).collect();
    let unique_countries: HashSet<&str> =
        timeline.iter().filter_map(|e| e.country.as_deref()).collect();

    let mut summary = format!(
        "A {}-severity security incident was detected for user {} involving {}. \
         The incident spans {} alert(s) and {} authentication event(s). ",
        severity.to_uppercase(),
        user,
        detection_text,
        alerts.len(),
        timeline.len()
    );

    if failure_count > 0 {
        summary.push_str(&format!(
            "There were {} failed and {} successful login attempts. ",
            failure_count, success_count
        ));
    }

    if unique_ips.len() > 1 {
        summary.push_str(&format!(
            "Activity originated from {} distinct IP addresses",
            unique_ips.len()
        ));
        if unique_countries.len() > 1 {
            summary.push_str(&format!(" across {} countries", unique_countries.len()));
        }
        summary.push_str(". ");
    }

    summary.push_str("Immediate investigation is recommended.");
    summary
}

fn generate_recommendations(alerts: &[&Alert]) -> Vec<String> {
    let detectors: HashSet<Detector> = alerts.iter().map(|a| a.detector).collect();

    let mut actions = vec![ACTION_CONTACT_USER.to_string()];

    if detectors.contains(&Detector::ImpossibleTravel) {
        actions.extend(IMPOSSIBLE_TRAVEL_ACTIONS.iter().map(|a| a.to_string()));
    }
    if detectors.contains(&Detector::FailSuccessChain) {
        actions.extend(FAIL_SUCCESS_CHAIN_ACTIONS.iter().map(|a| a.to_string()));
    }
    if detectors.contains(&Detector::NewDeviceUa) {
        actions.extend(NEW_DEVICE_UA_ACTIONS.iter().map(|a| a.to_string()));
    }

    actions.extend(CLOSING_ACTIONS.iter().map(|a| a.to_string()));
    actions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Evidence, Severity};
    use chrono::{DateTime, TimeZone, Utc};
    use serde_json::json;

    fn base_ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 8, 0, 0).unwrap()
    }

    fn make_alert(
        user: &str,
        detector: Detector,
        ts_start: DateTime<Utc>,
        ts_end: DateTime<Utc>,
        ips: &[&str],
        device_ids: &[&str],
    ) -> Alert {
        let mut evidence = Evidence::new();
        evidence.insert("ips".to_string(), json!(ips));
        evidence.insert("device_ids".to_string(), json!(device_ids));
        evidence.insert("countries".to_string(), serde_json::Value::Array(Vec::new()));

        Alert {
            alert_id: new_short_id("T"),
            detector,
            ts_start,
            ts_end,
            user: user.to_string(),
            severity: Severity::Medium,
            score: 50,
            title: String::new(),
            description: String::new(),
            evidence,
            mitre: vec![],
            related_event_ids: vec![],
        }
    }

    fn membership(cases: &[Case]) -> Vec<Vec<String>> {
        cases
            .iter()
            .map(|c| c.alerts.iter().map(|a| a.alert_id.clone()).collect())
            .collect()
    }

    #[test]
    fn test_time_overlap_merges_without_shared_indicators() {
        let alerts = vec![
            make_alert(
                "u@corp.com",
                Detector::ImpossibleTravel,
                base_ts(),
                base_ts() + Duration::hours(1),
                &["1.1.1.1"],
                &[],
            ),
            make_alert(
                "u@corp.com",
                Detector::NewDeviceUa,
                base_ts() + Duration::hours(3),
                base_ts() + Duration::hours(3),
                &["9.9.9.9"],
                &[],
            ),
        ];

        let cases = correlate_cases(&alerts, &HashMap::new(), 8.0);
        assert_eq!(cases.len(), 1);
        assert_eq!(cases[0].alerts.len(), 2);
    }

    #[test]
    fn test_shared_ip_merges_outside_time_window() {
        let alerts = vec![
            make_alert(
                "u@corp.com",
                Detector::FailSuccessChain,
                base_ts(),
                base_ts() + Duration::minutes(30),
                &["5.5.5.5"],
                &[],
            ),
            make_alert(
                "u@corp.com",
                Detector::NewDeviceUa,
                base_ts() + Duration::hours(48),
                base_ts() + Duration::hours(48),
                &["5.5.5.5"],
                &[],
            ),
        ];

        let cases = correlate_cases(&alerts, &HashMap::new(), 8.0);
        assert_eq!(cases.len(), 1);
    }

    #[test]
    fn test_disjoint_alerts_split_into_cases() {
        let alerts = vec![
            make_alert(
                "u@corp.com",
                Detector::FailSuccessChain,
                base_ts(),
                base_ts() + Duration::minutes(30),
                &["1.1.1.1"],
                &["dev-a"],
            ),
            make_alert(
                "u@corp.com",
                Detector::NewDeviceUa,
                base_ts() + Duration::hours(48),
                base_ts() + Duration::hours(48),
                &["2.2.2.2"],
                &["dev-b"],
            ),
        ];

        let cases = correlate_cases(&alerts, &HashMap::new(), 8.0);
        assert_eq!(cases.len(), 2);
    }

    #[test]
    fn test_closed_groups_are_never_revisited() {
        // Third alert shares an IP with the first, but the first's group was
        // closed by the disjoint second alert: the third joins the open
        // group (shared window with the second is absent too), so it starts
        // its own case.
        let alerts = vec![
            make_alert(
                "u@corp.com",
                Detector::FailSuccessChain,
                base_ts(),
                base_ts() + Duration::minutes(10),
                &["1.1.1.1"],
                &[],
            ),
            make_alert(
                "u@corp.com",
                Detector::NewDeviceUa,
                base_ts() + Duration::hours(24),
                base_ts() + Duration::hours(24),
                &["2.2.2.2"],
                &[],
            ),
            make_alert(
                "u@corp.com",
                Detector::ImpossibleTravel,
                base_ts() + Duration::hours(72),
                base_ts() + Duration::hours(73),
                &["1.1.1.1"],
                &[],
            ),
        ];

        let cases = correlate_cases(&alerts, &HashMap::new(), 8.0);
        assert_eq!(cases.len(), 3);
    }

    #[test]
    fn test_users_never_share_a_case() {
        let alerts = vec![
            make_alert(
                "alice@corp.com",
                Detector::FailSuccessChain,
                base_ts(),
                base_ts() + Duration::minutes(10),
                &["1.1.1.1"],
                &[],
            ),
            make_alert(
                "bob@corp.com",
                Detector::FailSuccessChain,
                base_ts(),
                base_ts() + Duration::minutes(10),
                &["1.1.1.1"],
                &[],
            ),
        ];

        let cases = correlate_cases(&alerts, &HashMap::new(), 8.0);
        assert_eq!(cases.len(), 2);
        let users: HashSet<&str> = cases.iter().map(|c| c.user.as_str()).collect();
        assert_eq!(users.len(), 2);
    }

    #[test]
    fn test_correlation_is_idempotent_on_membership() {
        let alerts = vec![
            make_alert(
                "u@corp.com",
                Detector::FailSuccessChain,
                base_ts(),
                base_ts() + Duration::minutes(30),
                &["1.1.1.1"],
                &[],
            ),
            make_alert(
                "u@corp.com",
                Detector::NewDeviceUa,
                base_ts() + Duration::hours(2),
                base_ts() + Duration::hours(2),
                &["2.2.2.2"],
                &[],
            ),
            make_alert(
                "u@corp.com",
                Detector::ImpossibleTravel,
                base_ts() + Duration::hours(40),
                base_ts() + Duration::hours(41),
                &["3.3.3.3"],
                &[],
            ),
        ];

        let first = correlate_cases(&alerts, &HashMap::new(), 8.0);
        let second = correlate_cases(&alerts, &HashMap::new(), 8.0);
        assert_eq!(membership(&first), membership(&second));
    }

    #[test]
    fn test_unresolved_event_ids_are_skipped() {
        let mut alert = make_alert(
            "u@corp.com",
            Detector::FailSuccessChain,
            base_ts(),
            base_ts() + Duration::minutes(10),
            &["1.1.1.1"],
            &[],
        );
        alert.related_event_ids = vec!["known".to_string(), "missing".to_string()];

        let mut index = HashMap::new();
        index.insert(
            "known".to_string(),
            crate::detection::test_support::make_event(
                "known",
                "u@corp.com",
                base_ts(),
                "1.1.1.1",
                crate::models::AuthResult::Success,
            ),
        );

        let cases = correlate_cases(&[alert], &index, 8.0);
        assert_eq!(cases.len(), 1);
        assert_eq!(cases[0].timeline.len(), 1);
        assert_eq!(cases[0].timeline[0].event_id, "known");
    }

    #[test]
    fn test_timeline_deduplicates_shared_events() {
        let mut first = make_alert(
            "u@corp.com",
            Detector::FailSuccessChain,
            base_ts(),
            base_ts() + Duration::minutes(10),
            &["1.1.1.1"],
            &[],
        );
        first.related_event_ids = vec!["shared".to_string()];
        let mut second = make_alert(
            "u@corp.com",
            Detector::NewDeviceUa,
            base_ts() + Duration::hours(1),
            base_ts() + Duration::hours(1),
            &["1.1.1.1"],
            &[],
        );
        second.related_event_ids = vec!["shared".to_string()];

        let mut index = HashMap::new();
        index.insert(
            "shared".to_string(),
            crate::detection::test_support::make_event(
                "shared",
                "u@corp.com",
                base_ts(),
                "1.1.1.1",
                crate::models::AuthResult::Success,
            ),
        );

        let cases = correlate_cases(&[first, second], &index, 8.0);
        assert_eq!(cases.len(), 1);
        assert_eq!(cases[0].timeline.len(), 1);
    }

    #[test]
    fn test_cases_sorted_by_severity_then_time() {
        let mut low = make_alert(
            "alpha@corp.com",
            Detector::NewDeviceUa,
            base_ts(),
            base_ts(),
            &["1.1.1.1"],
            &[],
        );
        low.severity = Severity::Low;
        let mut critical = make_alert(
            "zulu@corp.com",
            Detector::ImpossibleTravel,
            base_ts() + Duration::hours(5),
            base_ts() + Duration::hours(6),
            &["2.2.2.2"],
            &[],
        );
        critical.severity = Severity::Critical;

        let cases = correlate_cases(&[low, critical], &HashMap::new(), 8.0);
        assert_eq!(cases[0].overall_severity, Severity::Critical);
        assert_eq!(cases[1].overall_severity, Severity::Low);
    }

    #[test]
    fn test_recommendation_blocks_in_fixed_order() {
        // New-device alert fires before the chain alert, but the action
        // blocks keep detector order, not firing order.
        let alerts = vec![
            make_alert(
                "u@corp.com",
                Detector::NewDeviceUa,
                base_ts(),
                base_ts(),
                &["1.1.1.1"],
                &[],
            ),
            make_alert(
                "u@corp.com",
                Detector::FailSuccessChain,
                base_ts() + Duration::hours(1),
                base_ts() + Duration::hours(2),
                &["1.1.1.1"],
                &[],
            ),
        ];

        let cases = correlate_cases(&alerts, &HashMap::new(), 8.0);
        let actions = &cases[0].recommended_actions;
        assert_eq!(actions[0], ACTION_CONTACT_USER);
        assert_eq!(actions[1], FAIL_SUCCESS_CHAIN_ACTIONS[0]);
        let last = actions.len() - 1;
        assert_eq!(actions[last], CLOSING_ACTIONS[2]);
        // 1 opening + 3 chain + 2 device + 3 closing
        assert_eq!(actions.len(), 9);
    }

    #[test]
    fn test_summary_mentions_all_detectors() {
        let alerts = vec![
            make_alert(
                "u@corp.com",
                Detector::ImpossibleTravel,
                base_ts(),
                base_ts() + Duration::hours(1),
                &["1.1.1.1"],
                &[],
            ),
            make_alert(
                "u@corp.com",
                Detector::FailSuccessChain,
                base_ts() + Duration::hours(2),
                base_ts() + Duration::hours(3),
                &["1.1.1.1"],
                &[],
            ),
        ];

        let cases = correlate_cases(&alerts, &HashMap::new(), 8.0);
        let summary = &cases[0].summary;
        assert!(summary.contains("brute force/credential stuffing attempts"));
        assert!(summary.contains("and impossible travel patterns"));
        assert!(summary.ends_with("Immediate investigation is recommended."));
    }
}
