//! Shared timestamp/event helpers.
//!
//! Everything phasegate writes uses unix-epoch seconds with a `Z` suffix.
//! Reads also accept RFC 3339 and naive ISO-8601 strings so state written by
//! older hook generations stays usable.

use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use serde_json::{Map, Value as JsonValue};
use std::time::{SystemTime, UNIX_EPOCH};
use ulid::Ulid;

const ENVELOPE_VERSION: &str = "1.0.0";

/// Current unix-epoch seconds.
pub fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Current time as `1771220592Z`.
pub fn now_epoch_z() -> String {
    format_epoch_z(now_secs())
}

pub fn format_epoch_z(secs: i64) -> String {
    format!("{}Z", secs)
}

/// Parse any timestamp phasegate understands into epoch seconds.
pub fn parse_ts(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Some(digits) = raw.strip_suffix('Z') {
        if let Ok(secs) = digits.parse::<i64>() {
            return Some(secs);
        }
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.timestamp());
    }
    // Naive ISO timestamps were written in local time.
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f").ok()?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.timestamp())
}

pub fn new_event_id() -> String {
    Ulid::new().to_string()
}

/// `--format json` wrapper: envelope keys merged with the command payload.
/// A non-object payload is dropped.
pub fn command_envelope(cmd: &str, status: &str, extra: JsonValue) -> JsonValue {
    let mut out = Map::new();
    out.insert("envelope_version".into(), ENVELOPE_VERSION.into());
    out.insert("ts".into(), now_epoch_z().into());
    out.insert("event_id".into(), new_event_id().into());
    out.insert("cmd".into(), cmd.into());
    out.insert("status".into(), status.into());
    if let JsonValue::Object(payload) = extra {
        out.extend(payload);
    }
    JsonValue::Object(out)
}
