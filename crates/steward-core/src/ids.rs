//! ID and timestamp utilities: short prefixed identifiers and clocks.

use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Milliseconds since UNIX epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Current UTC time as an RFC 3339 / ISO-8601 string.
pub fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn short_id(prefix: &str) -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("{prefix}-{}", &hex[..8])
}

/// Opaque audit event identifier (UUID v4 string).
pub fn new_event_id() -> String {
    Uuid::new_v4().to_string()
}

/// Fresh proposal identifier (`pl-` prefix).
pub fn new_proposal_id() -> String {
    short_id("pl")
}

/// Fresh request identifier (`rq-` prefix).
pub fn new_request_id() -> String {
    short_id("rq")
}

/// Fresh trace identifier (`tr-` prefix).
pub fn new_trace_id() -> String {
    short_id("tr")
}

/// Fresh decision identifier (`dc-` prefix).
pub fn new_decision_id() -> String {
    short_id("dc")
}
