// Engine constants (No magic values)
use std::time::Duration;

/// Floor for the polling interval; a zero interval is clamped to this (1ms)
pub const MIN_POLLING_INTERVAL: Duration = Duration::from_millis(1);

/// Pause after a failed fetch before the next scheduled poll (1s)
pub const FETCH_ERROR_BACKOFF: Duration = Duration::from_secs(1);
