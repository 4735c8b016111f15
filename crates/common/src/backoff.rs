use rand::Rng;
use std::time::Duration;

/// How long a session must stay up before its failure no longer counts
/// towards the backoff.
pub const STABLE_SESSION: Duration = Duration::from_secs(300);

/// Capped exponential backoff with jitter for reconnect loops.
///
/// Delay for attempt `n` is `min(max_delay, base * 2^n) ± jitter`.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base: Duration,
    max_delay: Duration,
    jitter_factor: f64,
    stable_after: Duration,
    attempt: u32,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60), 0.1)
    }
}

impl ExponentialBackoff {
    /// Create a new backoff.
    ///
    /// Negative jitter factors are clamped to 0.
    pub fn new(base: Duration, max_delay: Duration, jitter_factor: f64) -> Self {
        Self {
            base,
            max_delay,
            jitter_factor: jitter_factor.max(0.0),
            stable_after: STABLE_SESSION,
            attempt: 0,
        }
    }

    /// Backoff that never waits. Used by tests that drive many reconnects.
    pub fn immediate() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO, 0.0)
    }

    /// Override the stable-session threshold.
    pub fn with_stable_after(mut self, stable_after: Duration) -> Self {
        self.stable_after = stable_after;
        self
    }

    /// Calculate the next delay and increment the attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        let exp_delay = self.base.saturating_mul(2u32.saturating_pow(self.attempt));
        let capped_delay = exp_delay.min(self.max_delay);

        let jitter_range = capped_delay.as_secs_f64() * self.jitter_factor;
        let jitter = if jitter_range > 0.0 {
            rand::thread_rng().gen_range(-jitter_range..=jitter_range)
        } else {
            0.0
        };

        self.attempt = self.attempt.saturating_add(1);

        Duration::from_secs_f64((capped_delay.as_secs_f64() + jitter).max(0.0))
    }

    /// Record how long the last session lasted.
    ///
    /// Resets the counter when the session was stable. Returns `true` if it did.
    pub fn on_session_ended(&mut self, uptime: Duration) -> bool {
        if uptime >= self.stable_after {
            self.reset();
            true
        } else {
            false
        }
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}
