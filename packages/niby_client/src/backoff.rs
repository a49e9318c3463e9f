//! Capped exponential reconnect backoff with jitter.

use std::time::Duration;

use rand::Rng;

/// Default first-retry delay.
pub const DEFAULT_BASE: Duration = Duration::from_millis(3000);

/// Default multiplier applied per consecutive failure.
pub const DEFAULT_GROWTH: f64 = 1.5;

/// Default ceiling before jitter.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(15_000);

/// Default upper bound of the random jitter added to every delay.
pub const DEFAULT_MAX_JITTER: Duration = Duration::from_millis(300);

/// `delay = min(base * growth^attempt, max_delay) + uniform(0..=max_jitter)`
///
/// Attempts are unbounded; the caller retries for as long as the session
/// lives.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectPolicy {
    pub base: Duration,
    pub growth: f64,
    pub max_delay: Duration,
    pub max_jitter: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base: DEFAULT_BASE,
            growth: DEFAULT_GROWTH,
            max_delay: DEFAULT_MAX_DELAY,
            max_jitter: DEFAULT_MAX_JITTER,
        }
    }
}

impl ReconnectPolicy {
    /// The capped delay for `attempt`, without jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let scaled_ms = self.base.as_secs_f64() * 1000.0 * self.growth.powi(exponent);
        let max_ms = self.max_delay.as_secs_f64() * 1000.0;
        // NaN (e.g. zero base with infinite growth) falls back to the cap.
        let ms = if scaled_ms.is_nan() {
            max_ms
        } else {
            scaled_ms.min(max_ms)
        };
        Duration::from_secs_f64(ms.max(0.0) / 1000.0)
    }

    /// The capped delay plus a fixed jitter amount (clamped to `max_jitter`).
    pub fn delay_with_jitter(&self, attempt: u32, jitter: Duration) -> Duration {
        self.backoff(attempt) + jitter.min(self.max_jitter)
    }

    /// The delay to wait before reconnect `attempt`, with random jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        let max_jitter_ms = u64::try_from(self.max_jitter.as_millis()).unwrap_or(u64::MAX);
        let jitter_ms = if max_jitter_ms == 0 {
            0
        } else {
            rand::rng().random_range(0..=max_jitter_ms)
        };
        self.delay_with_jitter(attempt, Duration::from_millis(jitter_ms))
    }
}
