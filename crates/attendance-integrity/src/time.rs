//! Time utilities for the attendance engine.
//!
//! All timestamps are Unix epoch milliseconds (u64), the resolution the
//! credential window is specified in.

/// Return the current time as milliseconds since Unix epoch.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Convert milliseconds to an RFC 3339 string.
pub fn millis_to_rfc3339(millis: u64) -> String {
    let secs = (millis / 1_000) as i64;
    let nsecs = ((millis % 1_000) * 1_000_000) as u32;
    let dt = chrono::DateTime::from_timestamp(secs, nsecs).unwrap_or(chrono::DateTime::UNIX_EPOCH);
    dt.to_rfc3339()
}

/// Convert milliseconds to a human-readable `YYYY-MM-DD HH:MM UTC` string.
pub fn millis_to_display(millis: u64) -> String {
    let secs = (millis / 1_000) as i64;
    let dt = chrono::DateTime::from_timestamp(secs, 0).unwrap_or(chrono::DateTime::UNIX_EPOCH);
    dt.format("%Y-%m-%d %H:%M UTC").to_string()
}
