use std::time::{SystemTime, UNIX_EPOCH};

/// Current time as floating-point seconds since the epoch — the timestamp
/// representation used throughout the data model.
pub fn now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_secs_f64()
}
