#![forbid(unsafe_code)]

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Current Unix time in milliseconds.
#[inline]
pub fn unix_ms_now() -> i64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.unwrap_or(Duration::from_secs(0))
		.as_millis() as i64
}

/// Timestamp strictly after `previous`, tracking the wall clock when it is ahead.
#[inline]
pub fn monotonic_after(previous: Option<i64>, now: i64) -> i64 {
	match previous {
		Some(prev) => now.max(prev + 1),
		None => now,
	}
}
