//! Wall-clock aligned period boundaries.

use std::time::Duration;

/// Fires at multiples of `period` since the unix epoch, e.g. the top of
/// every minute for a 60 s period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodTimer {
    period_ms: i64,
}

impl PeriodTimer {
    /// Periods shorter than a millisecond are clamped to one.
    pub fn new(period: Duration) -> Self {
        let period_ms = i64::try_from(period.as_millis()).unwrap_or(i64::MAX).max(1);
        Self { period_ms }
    }

    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms as u64)
    }

    /// Start of the period containing `now_ms`.
    pub fn boundary_at(&self, now_ms: i64) -> i64 {
        now_ms - now_ms.rem_euclid(self.period_ms)
    }

    /// Time left until the next boundary. A full period when `now_ms` sits
    /// exactly on one.
    pub fn until_next(&self, now_ms: i64) -> Duration {
        let remaining = self.period_ms - now_ms.rem_euclid(self.period_ms);
        Duration::from_millis(remaining as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: Duration = Duration::from_secs(60);

    #[test]
    fn test_until_next_minute() {
        let timer = PeriodTimer::new(MINUTE);
        // 2023-11-14T22:13:20Z
        let now = 1_700_000_000_000;

        assert_eq!(timer.until_next(now), Duration::from_secs(40));
        assert_eq!(timer.until_next(now + 39_999), Duration::from_millis(1));
    }

    #[test]
    fn test_on_boundary_waits_full_period() {
        let timer = PeriodTimer::new(MINUTE);
        assert_eq!(timer.until_next(1_699_999_980_000), MINUTE);
    }

    #[test]
    fn test_boundary_at() {
        let timer = PeriodTimer::new(MINUTE);
        assert_eq!(timer.boundary_at(1_700_000_000_000), 1_699_999_980_000);
        assert_eq!(timer.boundary_at(1_699_999_980_000), 1_699_999_980_000);
    }

    #[test]
    fn test_zero_period_clamped() {
        let timer = PeriodTimer::new(Duration::ZERO);
        assert_eq!(timer.period(), Duration::from_millis(1));
        assert_eq!(timer.until_next(5), Duration::from_millis(1));
    }
}
