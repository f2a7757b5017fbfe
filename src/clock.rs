//! Process-wide monotonic clock shared by capture and frame producers.
//!
//! Audio capture stamps chunks in microseconds and video producers stamp
//! frames in nanoseconds. Both read the same epoch so the two tracks line up
//! in the container.

use std::sync::OnceLock;
use std::time::Instant;

static EPOCH: OnceLock<Instant> = OnceLock::new();

fn epoch() -> Instant {
    *EPOCH.get_or_init(Instant::now)
}

/// Microseconds since the first call to the clock in this process.
#[must_use]
pub fn monotonic_micros() -> i64 {
    i64::try_from(epoch().elapsed().as_micros()).unwrap_or(i64::MAX)
}

/// Nanoseconds since the first call to the clock in this process.
#[must_use]
pub fn monotonic_nanos() -> i64 {
    i64::try_from(epoch().elapsed().as_nanos()).unwrap_or(i64::MAX)
}
