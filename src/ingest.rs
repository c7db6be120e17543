//! JSONL log ingestion.
//!
//! Parses line-delimited JSON authentication logs into normalized
//! `AuthEvent` records, deriving a device fingerprint when the record
//! carries none. Malformed lines are logged and skipped, never fatal.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::models::{AuthEvent, AuthResult};

/// Errors that can occur while reading a log file.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("log file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Parse a JSONL file into events plus an event_id lookup index.
///
/// Events come back in file order. Duplicate event ids keep the last
/// occurrence in the index.
pub fn parse_jsonl(path: &Path) -> Result<(Vec<AuthEvent>, HashMap<String, AuthEvent>), IngestError> {
    if !path.exists() {
        return Err(IngestError::FileNotFound(path.to_path_buf()));
    }
    let contents = std::fs::read_to_string(path)?;
    let (events, index) = parse_jsonl_str(&contents);
    log::info!("parsed {} events from {}", events.len(), path.display());
    Ok((events, index))
}

/// Parse JSONL content already held in memory.
pub fn parse_jsonl_str(contents: &str) -> (Vec<AuthEvent>, HashMap<String, AuthEvent>) {
    let mut events: Vec<AuthEvent> = Vec::new();
    let mut index: HashMap<String, AuthEvent> = HashMap::new();

    for (line_num, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let value: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(e) => {
                log::warn!("skipping malformed JSON on line {}: {}", line_num + 1, e);
                continue;
            }
        };

        match event_from_value(value) {
            Ok(event) => {
                log::debug!("parsed event {} for user {}", event.event_id, event.user);
                index.insert(event.event_id.clone(), event.clone());
                events.push(event);
            }
            Err(reason) => {
                log::warn!("skipping invalid event on line {}: {}", line_num + 1, reason);
            }
        }
    }

    (events, index)
}

fn event_from_value(value: Value) -> Result<AuthEvent, String> {
    let obj = value
        .as_object()
        .ok_or_else(|| "record is not a JSON object".to_string())?;

    let required_str = |key: &str| -> Result<String, String> {
        obj.get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| format!("missing required field: {key}"))
    };
    let optional_str =
        |key: &str| -> Option<String> { obj.get(key).and_then(Value::as_str).map(str::to_string) };

    let event_id = required_str("event_id")?;
    let user = required_str("user")?;
    let source_ip = required_str("source_ip")?;

    let raw_ts = required_str("ts")?;
    let ts = parse_timestamp(&raw_ts).ok_or_else(|| format!("cannot parse timestamp: {raw_ts}"))?;

    let result = match required_str("result")?.as_str() {
        "success" => AuthResult::Success,
        "failure" => AuthResult::Failure,
        other => return Err(format!("unknown result: {other}")),
    };

    let user_agent = optional_str("user_agent");
    let device_id = optional_str("device_id")
        .filter(|d| !d.is_empty())
        .unwrap_or_else(|| derive_fingerprint(user_agent.as_deref().unwrap_or(""), &source_ip));

    Ok(AuthEvent {
        event_id,
        ts,
        user,
        provider: optional_str("provider"),
        action: optional_str("action"),
        source_ip,
        country: optional_str("country"),
        city: optional_str("city"),
        lat: obj.get("lat").and_then(Value::as_f64),
        lon: obj.get("lon").and_then(Value::as_f64),
        device_id: Some(device_id),
        user_agent,
        auth_method: optional_str("auth_method"),
        result,
        failure_reason: optional_str("failure_reason"),
        raw: value.clone(),
    })
}

/// Parse an RFC 3339 timestamp (with `Z` or a numeric offset), falling back
/// to a naive `%Y-%m-%d %H:%M:%S` form treated as UTC.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Stable device fingerprint from the user agent and the /24 network prefix
/// of the source IP: same browser on the same subnet maps to the same id.
pub fn derive_fingerprint(user_agent: &str, source_ip: &str) -> String {
    let octets: Vec<&str> = source_ip.split('.').collect();
    let ip_prefix = if octets.len() >= 3 {
        octets[..3].join(".")
    } else {
        source_ip.to_string()
    };

    let mut hasher = Sha256::new();
    hasher.update(user_agent.as_bytes());
    hasher.update(b":");
    hasher.update(ip_prefix.as_bytes());
    let digest = hasher.finalize();

    let hex = format!("{:x}", digest);
    format!("fp-{}", &hex[..12])
}
