//! Monotonic request expiry values.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Hands out unix-second expiry stamps that never go backwards.
///
/// The exchange rejects a signature whose expiry is lower than one it has
/// already seen for the key, so a wall-clock step back must not leak into
/// the value.
#[derive(Debug, Default)]
pub struct ExpiryClock {
    last: AtomicI64,
}

impl ExpiryClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expiry `lifetime` from now, clamped to the last value handed out.
    pub fn next(&self, lifetime: Duration) -> i64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64;
        self.next_from(now, lifetime)
    }

    fn next_from(&self, now_secs: i64, lifetime: Duration) -> i64 {
        let candidate = now_secs + lifetime.as_secs() as i64;
        let previous = self.last.fetch_max(candidate, Ordering::AcqRel);
        previous.max(candidate)
    }
}
