//! Rule-based detectors for suspicious authentication patterns.
//!
//! Each detector runs independently over the full event set and emits zero
//! or more alerts. Detectors never fail: malformed thresholds degrade to
//! "nothing found", never to a panic.

pub mod fail_success_chain;
pub mod impossible_travel;
pub mod new_device_ua;

pub use fail_success_chain::detect_fail_success_chain;
pub use impossible_travel::detect_impossible_travel;
pub use new_device_ua::{detect_new_device, ua_family, DeviceBaseline};

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use crate::config::DetectionConfig;
use crate::models::{Alert, AuthEvent};

/// Run all detectors over the event set.
///
/// Output is the concatenation of detector results in a fixed order:
/// impossible travel, fail/success chain, new device.
pub fn run_all_detectors(events: &[AuthEvent], config: &DetectionConfig) -> Vec<Alert> {
    let mut alerts = detect_impossible_travel(
        events,
        config.speed_threshold_kmh,
        config.max_travel_hours,
    );
    alerts.extend(detect_fail_success_chain(
        events,
        config.failure_window_minutes,
        config.min_failures_same_ip,
        config.min_failures_multi_ip,
    ));
    alerts.extend(detect_new_device(events, config.device_lookback_days));
    alerts
}

/// Group events by user, keeping each user's slice in input order.
///
/// BTreeMap keeps user iteration deterministic regardless of input order.
pub(crate) fn group_by_user<'a>(
    events: impl IntoIterator<Item = &'a AuthEvent>,
) -> BTreeMap<&'a str, Vec<&'a AuthEvent>> {
    let mut by_user: BTreeMap<&str, Vec<&AuthEvent>> = BTreeMap::new();
    for event in events {
        by_user.entry(event.user.as_str()).or_default().push(event);
    }
    by_user
}

/// De-duplicated, sorted list of string values, skipping absent ones.
pub(crate) fn unique_sorted<'a>(values: impl IntoIterator<Item = Option<&'a str>>) -> Vec<String> {
    values
        .into_iter()
        .flatten()
        .map(str::to_string)
        .collect::<BTreeSet<String>>()
        .into_iter()
        .collect()
}
