//! Impossible travel detector.
//!
//! Flags two successful logins for one user whose implied travel speed
//! between the recorded coordinates is physically impossible.

use serde_json::json;

use crate::detection::{group_by_user, unique_sorted};
use crate::models::alert::new_short_id;
use crate::models::{Alert, AuthEvent, Detector, Evidence, Severity};
use crate::scoring::base_score;

/// Speed and time bounds for the critical severity tier.
const CRITICAL_SPEED_KMH: f64 = 2000.0;
const CRITICAL_MAX_HOURS: f64 = 2.0;
/// Speed and time bounds for the high severity tier.
const HIGH_SPEED_KMH: f64 = 900.0;
const HIGH_MAX_HOURS: f64 = 6.0;

/// Detect impossible travel patterns.
///
/// Compares consecutive successful geo-tagged logins per user and flags
/// each pair whose required speed exceeds `speed_threshold_kmh`. Pairs
/// more than `max_hours` apart, or with non-positive elapsed time
/// (out-of-order or duplicate timestamps), are skipped. Only immediate
/// neighbors are compared; each pair is evaluated independently.
pub fn detect_impossible_travel(
    events: &[AuthEvent],
    speed_threshold_kmh: f64,
    max_hours: f64,
) -> Vec<Alert> {
    let mut alerts = Vec::new();

    let geo_successes = events
        .iter()
        .filter(|e| e.is_success() && e.lat.is_some() && e.lon.is_some());

    for (user, mut user_events) in group_by_user(geo_successes) {
        user_events.sort_by_key(|e| e.ts);

        for pair in user_events.windows(2) {
            let (first, second) = (pair[0], pair[1]);

            let hours = (second.ts - first.ts).num_milliseconds() as f64 / 3_600_000.0;
            if hours <= 0.0 || hours > max_hours {
                continue;
            }

            // Filter above guarantees coordinates are present.
            let (Some(lat1), Some(lon1)) = (first.lat, first.lon) else {
                continue;
            };
            let (Some(lat2), Some(lon2)) = (second.lat, second.lon) else {
                continue;
            };

            let distance_km = haversine_distance(lat1, lon1, lat2, lon2);
            let speed_kmh = distance_km / hours;

            if speed_kmh > speed_threshold_kmh {
                alerts.push(build_alert(
                    first,
                    second,
                    distance_km,
                    hours,
                    speed_kmh,
                    speed_threshold_kmh,
                ));
                log::info!(
                    "impossible travel detected for {}: {:.0} km in {:.1} h = {:.0} km/h",
                    user,
                    distance_km,
                    hours,
                    speed_kmh
                );
            }
        }
    }

    alerts
}

fn build_alert(
    first: &AuthEvent,
    second: &AuthEvent,
    distance_km: f64,
    hours_between: f64,
    speed_kmh: f64,
    speed_threshold_kmh: f64,
) -> Alert {
    // First matching tier wins.
    let severity = if speed_kmh > CRITICAL_SPEED_KMH && hours_between < CRITICAL_MAX_HOURS {
        Severity::Critical
    } else if speed_kmh > HIGH_SPEED_KMH && hours_between < HIGH_MAX_HOURS {
        Severity::High
    } else {
        Severity::Medium
    };

    let location_1 = location_string(first);
    let location_2 = location_string(second);

    let mut evidence = Evidence::new();
    evidence.insert(
        "ips".to_string(),
        json!(unique_sorted([
            Some(first.source_ip.as_str()),
            Some(second.source_ip.as_str()),
        ])),
    );
    evidence.insert(
        "device_ids".to_string(),
        json!(unique_sorted([
            first.device_id.as_deref(),
            second.device_id.as_deref(),
        ])),
    );
    evidence.insert(
        "countries".to_string(),
        json!(unique_sorted([
            first.country.as_deref(),
            second.country.as_deref(),
        ])),
    );
    evidence.insert("location_1".to_string(), json!(location_1));
    evidence.insert("location_2".to_string(), json!(location_2));
    evidence.insert("lat_1".to_string(), json!(first.lat));
    evidence.insert("lon_1".to_string(), json!(first.lon));
    evidence.insert("lat_2".to_string(), json!(second.lat));
    evidence.insert("lon_2".to_string(), json!(second.lon));
    evidence.insert("distance_km".to_string(), json!(round2(distance_km)));
    evidence.insert("hours_between".to_string(), json!(round2(hours_between)));
    evidence.insert("speed_kmh".to_string(), json!(round2(speed_kmh)));
    evidence.insert("event_1_ts".to_string(), json!(first.ts.to_rfc3339()));
    evidence.insert("event_2_ts".to_string(), json!(second.ts.to_rfc3339()));

    Alert {
        alert_id: new_short_id("IT"),
        detector: Detector::ImpossibleTravel,
        ts_start: first.ts.min(second.ts),
        ts_end: first.ts.max(second.ts),
        user: first.user.clone(),
        severity,
        score: base_score(severity),
        title: "Impossible Travel Detected".to_string(),
        description: format!(
            "User {} logged in from {} and {} within {:.1} hours. \
             Required speed: {:.0} km/h (distance: {:.0} km). This exceeds \
             the maximum plausible travel speed of {:.0} km/h.",
            first.user, location_1, location_2, hours_between, speed_kmh, distance_km,
            speed_threshold_kmh
        ),
        evidence,
        mitre: vec!["T1078".to_string(), "T1078.004".to_string()],
        related_event_ids: vec![first.event_id.clone(), second.event_id.clone()],
    }
}

fn location_string(event: &AuthEvent) -> String {
    event.location_label().unwrap_or_else(|| {
        format!(
            "({}, {})",
            event.lat.unwrap_or_default(),
            event.lon.unwrap_or_default()
        )
    })
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Great-circle distance between two points using the haversine formula,
/// in kilometers.
fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    const EARTH_RADIUS_KM: f64 = 6371.0;

    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lon = (lon2 - lon1).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();

    EARTH_RADIUS_KM * c
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::test_support::make_event;
    use crate::models::AuthResult;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    const NYC: (f64, f64) = (40.7128, -74.0060);
    const TOKYO: (f64, f64) = (35.6762, 139.6503);
    const LONDON: (f64, f64) = (51.5074, -0.1278);

    fn geo_success(
        event_id: &str,
        user: &str,
        ts: DateTime<Utc>,
        ip: &str,
        coords: (f64, f64),
    ) -> crate::models::AuthEvent {
        let mut event = make_event(event_id, user, ts, ip, AuthResult::Success);
        event.lat = Some(coords.0);
        event.lon = Some(coords.1);
        event
    }

    fn base_ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 8, 0, 0).unwrap()
    }

    #[test]
    fn test_haversine_nyc_to_la() {
        let distance = haversine_distance(40.7128, -74.0060, 34.0522, -118.2437);
        assert!(
            (distance - 3944.0).abs() < 50.0,
            "NYC to LA should be ~3944 km, got {distance}"
        );
    }

    #[test]
    fn test_detects_impossible_travel() {
        let events = vec![
            geo_success("it-001", "travel@corp.com", base_ts(), "1.1.1.1", NYC),
            geo_success(
                "it-002",
                "travel@corp.com",
                base_ts() + Duration::minutes(90),
                "2.2.2.2",
                TOKYO,
            ),
        ];

        let alerts = detect_impossible_travel(&events, 900.0, 6.0);
        assert_eq!(alerts.len(), 1);

        let alert = alerts[0].clone();
        assert_eq!(alert.detector, Detector::ImpossibleTravel);
        assert_eq!(alert.user, "travel@corp.com");
        assert!(matches!(alert.severity, Severity::High | Severity::Critical));
        assert!(alert.evidence["speed_kmh"].as_f64().unwrap() > 900.0);
        assert_eq!(alert.related_event_ids, vec!["it-001", "it-002"]);
        assert!(alert.evidence.contains_key("ips"));
        assert!(alert.evidence.contains_key("device_ids"));
        assert!(alert.evidence.contains_key("countries"));
    }

    #[test]
    fn test_critical_severity_for_extreme_speed() {
        // NYC to Tokyo in one hour: well over 2000 km/h.
        let events = vec![
            geo_success("c-001", "u@corp.com", base_ts(), "1.1.1.1", NYC),
            geo_success(
                "c-002",
                "u@corp.com",
                base_ts() + Duration::hours(1),
                "2.2.2.2",
                TOKYO,
            ),
        ];

        let alerts = detect_impossible_travel(&events, 900.0, 6.0);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, Severity::Critical);
        assert_eq!(alerts[0].score, 95);
    }

    #[test]
    fn test_no_alert_beyond_max_hours() {
        let events = vec![
            geo_success("nt-001", "normal@corp.com", base_ts(), "1.1.1.1", NYC),
            geo_success(
                "nt-002",
                "normal@corp.com",
                base_ts() + Duration::hours(12),
                "2.2.2.2",
                LONDON,
            ),
        ];

        assert!(detect_impossible_travel(&events, 900.0, 6.0).is_empty());
    }

    #[test]
    fn test_skips_non_positive_elapsed_time() {
        // Duplicate timestamps across continents must not divide by zero.
        let events = vec![
            geo_success("dup-001", "u@corp.com", base_ts(), "1.1.1.1", NYC),
            geo_success("dup-002", "u@corp.com", base_ts(), "2.2.2.2", TOKYO),
        ];

        assert!(detect_impossible_travel(&events, 900.0, 6.0).is_empty());
    }

    #[test]
    fn test_single_geo_event_yields_nothing() {
        let events = vec![geo_success("solo", "u@corp.com", base_ts(), "1.1.1.1", NYC)];
        assert!(detect_impossible_travel(&events, 900.0, 6.0).is_empty());
    }

    #[test]
    fn test_ignores_failures_and_events_without_coordinates() {
        let mut failure = geo_success("f-001", "u@corp.com", base_ts(), "1.1.1.1", NYC);
        failure.result = AuthResult::Failure;
        let mut no_geo = make_event(
            "ng-001",
            "u@corp.com",
            base_ts() + Duration::minutes(30),
            "2.2.2.2",
            AuthResult::Success,
        );
        no_geo.lat = None;
        no_geo.lon = None;
        let far = geo_success(
            "s-001",
            "u@corp.com",
            base_ts() + Duration::hours(1),
            "3.3.3.3",
            TOKYO,
        );

        assert!(detect_impossible_travel(&[failure, no_geo, far], 900.0, 6.0).is_empty());
    }

    #[test]
    fn test_consecutive_pairs_evaluated_independently() {
        // NYC -> Tokyo -> NYC within a few hours: both neighbor pairs fire.
        let events = vec![
            geo_success("p-001", "u@corp.com", base_ts(), "1.1.1.1", NYC),
            geo_success(
                "p-002",
                "u@corp.com",
                base_ts() + Duration::hours(2),
                "2.2.2.2",
                TOKYO,
            ),
            geo_success(
                "p-003",
                "u@corp.com",
                base_ts() + Duration::hours(4),
                "1.1.1.1",
                NYC,
            ),
        ];

        let alerts = detect_impossible_travel(&events, 900.0, 6.0);
        assert_eq!(alerts.len(), 2);
    }

    #[test]
    fn test_negative_max_hours_finds_nothing() {
        let events = vec![
            geo_success("n-001", "u@corp.com", base_ts(), "1.1.1.1", NYC),
            geo_success(
                "n-002",
                "u@corp.com",
                base_ts() + Duration::hours(1),
                "2.2.2.2",
                TOKYO,
            ),
        ];

        assert!(detect_impossible_travel(&events, 900.0, -1.0).is_empty());
    }
}
