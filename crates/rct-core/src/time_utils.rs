use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch for `instant`, saturating at both ends.
pub fn unix_timestamp_ms(instant: SystemTime) -> u64 {
    match instant.duration_since(UNIX_EPOCH) {
        Ok(elapsed) => u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        Err(_) => 0,
    }
}

/// Wall-clock stamp used for channel status transitions.
pub fn current_unix_timestamp_ms() -> u64 {
    unix_timestamp_ms(SystemTime::now())
}
