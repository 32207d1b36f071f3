//! Exponential backoff for agent socket dialing

use std::time::Duration;

use pssh_core::config::BackoffConfig;

/// Exponential backoff with jitter and an overall time budget
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// Current delay
    current: Duration,
    /// Maximum delay
    max: Duration,
    /// Multiplier
    multiplier: f64,
    /// Jitter factor (0.0 to 1.0)
    jitter: f64,
    /// Total delay handed out so far
    elapsed: Duration,
    /// Budget after which `next_delay` gives up
    max_elapsed: Duration,
}

impl ExponentialBackoff {
    /// Create a new backoff from configuration
    pub fn from_config(config: &BackoffConfig) -> Self {
        Self {
            current: config.initial,
            max: config.max,
            multiplier: config.multiplier,
            jitter: config.jitter,
            elapsed: Duration::ZERO,
            max_elapsed: config.max_elapsed,
        }
    }

    /// Create a new backoff with custom parameters
    pub fn new(
        initial: Duration,
        max: Duration,
        multiplier: f64,
        jitter: f64,
        max_elapsed: Duration,
    ) -> Self {
        Self {
            current: initial,
            max,
            multiplier,
            jitter,
            elapsed: Duration::ZERO,
            max_elapsed,
        }
    }

    /// Get the next delay and advance the backoff.
    ///
    /// Returns `None` once the elapsed budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.elapsed >= self.max_elapsed {
            return None;
        }

        let delay = self.current;

        let next = Duration::from_secs_f64(self.current.as_secs_f64() * self.multiplier);
        self.current = std::cmp::min(next, self.max);

        let jitter_amount = delay.as_secs_f64() * self.jitter * rand::random::<f64>();
        let delay = delay + Duration::from_secs_f64(jitter_amount);

        // Never sleep past the budget
        let delay = std::cmp::min(delay, self.max_elapsed - self.elapsed);
        self.elapsed += delay;
        Some(delay)
    }
}
