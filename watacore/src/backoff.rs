use rand::Rng;
use std::time::Duration;

/// Exponential backoff with optional jitter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub base: Duration,
    pub factor: f64,
    pub max: Duration,
    /// Randomise each delay to within +/-20% so clients don't retry in lockstep.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            factor: 2.0,
            max: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based), capped at `max`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = self.factor.max(1.0).powi(attempt.min(32) as i32);
        let raw = self.base.as_secs_f64() * exp;
        let capped = raw.min(self.max.as_secs_f64());
        let secs = if self.jitter {
            capped * rand::rng().random_range(0.8..=1.2)
        } else {
            capped
        };
        Duration::from_secs_f64(secs.min(self.max.as_secs_f64()))
    }
}
