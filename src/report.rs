//! Report generation.
//!
//! Serializes alerts and cases to JSON and renders a human-readable
//! Markdown incident report.

use std::fmt::Write as _;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

use crate::models::{Alert, AuthEvent, Case, Detector, Severity};

/// Errors that can occur while writing reports.
#[derive(Error, Debug)]
pub enum ReportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Write alerts to a pretty-printed JSON file.
pub fn write_alerts_json(alerts: &[Alert], path: &Path) -> Result<(), ReportError> {
    write_json(alerts, path)?;
    log::info!("wrote {} alerts to {}", alerts.len(), path.display());
    Ok(())
}

/// Write cases to a pretty-printed JSON file.
pub fn write_cases_json(cases: &[Case], path: &Path) -> Result<(), ReportError> {
    write_json(cases, path)?;
    log::info!("wrote {} cases to {}", cases.len(), path.display());
    Ok(())
}

fn write_json<T: serde::Serialize>(data: &[T], path: &Path) -> Result<(), ReportError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(data)?;
    std::fs::write(path, json)?;
    Ok(())
}

/// Write the Markdown incident report for the cases.
pub fn write_cases_md(cases: &[Case], path: &Path) -> Result<(), ReportError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, render_cases_md(cases, Utc::now()))?;
    log::info!("wrote case report to {}", path.display());
    Ok(())
}

/// Render the full Markdown report. Split out from the file write so the
/// content is testable.
pub fn render_cases_md(cases: &[Case], generated_at: DateTime<Utc>) -> String {
    let mut out = String::new();

    out.push_str("# Security Incident Report\n\n");
    let _ = writeln!(
        out,
        "**Generated:** {} UTC",
        generated_at.format("%Y-%m-%d %H:%M:%S")
    );
    let _ = writeln!(out, "**Total Cases:** {}", cases.len());

    out.push_str("\n## Summary\n\n");
    out.push_str("| Severity | Count |\n");
    out.push_str("|----------|-------|\n");
    for severity in [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
    ] {
        let count = cases.iter().filter(|c| c.overall_severity == severity).count();
        let _ = writeln!(out, "| {} | {} |", severity.as_str().to_uppercase(), count);
    }

    out.push_str("\n---\n");

    for case in cases {
        render_case_section(&mut out, case);
        out.push_str("\n---\n");
    }

    out
}

fn render_case_section(out: &mut String, case: &Case) {
    let _ = writeln!(
        out,
        "\n## Case {} — {} — {}\n",
        case.case_id,
        case.user,
        case.overall_severity.as_str().to_uppercase()
    );
    let _ = writeln!(out, "**Score:** {}/100", case.overall_score);
    let _ = writeln!(
        out,
        "**Time Range:** {} → {}\n",
        format_ts(case.ts_start),
        format_ts(case.ts_end)
    );

    out.push_str("### Summary\n\n");
    out.push_str(&case.summary);
    out.push_str("\n\n");

    out.push_str("### Alerts\n\n");
    out.push_str("| Detector | Severity | Score | Time Range |\n");
    out.push_str("|----------|----------|-------|------------|\n");
    for alert in &case.alerts {
        let _ = writeln!(
            out,
            "| {} | {} | {} | {} → {} |",
            alert.detector,
            alert.severity,
            alert.score,
            format_ts(alert.ts_start),
            format_ts(alert.ts_end)
        );
    }
    out.push('\n');

    if !case.timeline.is_empty() {
        out.push_str("### Timeline\n\n");
        for event in &case.timeline {
            render_timeline_entry(out, event);
        }
        out.push('\n');
    }

    out.push_str("### Evidence Highlights\n\n");
    for alert in &case.alerts {
        let _ = writeln!(out, "**{}:**", alert.detector);
        render_evidence_highlights(out, alert);
        out.push('\n');
    }

    out.push_str("### Recommended Actions\n\n");
    for action in &case.recommended_actions {
        let _ = writeln!(out, "- [ ] {}", action);
    }
}

fn render_timeline_entry(out: &mut String, event: &AuthEvent) {
    let location = event.location_label().unwrap_or_else(|| "Unknown".to_string());
    let device = event.device_id.as_deref().unwrap_or("unknown");
    let device_short: String = device.chars().take(12).collect();
    let _ = writeln!(
        out,
        "- **{}** | {} | `{}` | {} | Device: `{}`",
        format_ts(event.ts),
        event.result.as_str().to_uppercase(),
        event.source_ip,
        location,
        device_short
    );
}

fn render_evidence_highlights(out: &mut String, alert: &Alert) {
    let evidence = &alert.evidence;
    let num = |key: &str| {
        evidence
            .get(key)
            .and_then(Value::as_f64)
            .map(|v| format!("{v:.1}"))
            .unwrap_or_else(|| "N/A".to_string())
    };
    let text = |key: &str| {
        evidence
            .get(key)
            .map(display_value)
            .unwrap_or_else(|| "N/A".to_string())
    };

    match alert.detector {
        Detector::ImpossibleTravel => {
            let _ = writeln!(out, "- Distance: {} km", num("distance_km"));
            let _ = writeln!(out, "- Time between: {} hours", num("hours_between"));
            let _ = writeln!(out, "- Required speed: {} km/h (impossible)", num("speed_kmh"));
            let _ = writeln!(
                out,
                "- Locations: {} -> {}",
                text("location_1"),
                text("location_2")
            );
        }
        Detector::FailSuccessChain => {
            let _ = writeln!(out, "- Failure count: {}", text("failure_count"));
            let _ = writeln!(out, "- Distinct IPs: {}", text("distinct_ips"));
            let _ = writeln!(out, "- Attack type: {}", text("attack_type"));
            let _ = writeln!(out, "- Time span: {} minutes", num("time_span_minutes"));
        }
        Detector::NewDeviceUa => {
            let _ = writeln!(out, "- New device: {}", text("new_device_id"));
            let _ = writeln!(out, "- New UA family: {}", text("new_ua_family"));
            let _ = writeln!(out, "- New country: {}", text("is_new_country"));
            let _ = writeln!(out, "- Known devices: {}", text("known_devices_count"));
        }
    }
}

/// Scalar evidence values without surrounding JSON quotes.
fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "N/A".to_string(),
        other => other.to_string(),
    }
}

fn format_ts(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}
