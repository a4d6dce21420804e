//! Capped exponential backoff for retry loops
//!
//! The delay law is `min(base * factor^attempt, max)`: recovery from a brief
//! glitch costs one base delay, while a sustained outage converges to the cap
//! so the failing dependency sees a bounded request rate no matter how long
//! the outage lasts.

use rand::Rng;
use std::time::Duration;

/// Exponent clamp. Beyond this the delay has saturated at `max_delay` for any
/// sane config, and `factor^attempt` would lose meaning as an f64 anyway.
const MAX_EXPONENT: u32 = 64;

/// Configuration for exponential backoff
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Ceiling on the delay between retries
    pub max_delay: Duration,
    /// Growth factor per attempt (typically 2.0)
    pub factor: f64,
    /// Randomization fraction (0.0 to 1.0). 0.0 keeps delays deterministic;
    /// set it when a fleet of instances must not retry in lockstep.
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            factor: 2.0,
            jitter_factor: 0.0,
        }
    }
}

impl BackoffConfig {
    /// Fast retries with a low ceiling (for tests and local tooling)
    pub fn aggressive() -> Self {
        Self {
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(1),
            factor: 2.0,
            jitter_factor: 0.0,
        }
    }

    /// Production profile with jitter for multi-instance deployments
    pub fn jittered() -> Self {
        Self {
            jitter_factor: 0.1,
            ..Default::default()
        }
    }

    /// The pure delay law: `min(base * factor^attempt, max)`.
    ///
    /// Deterministic, monotone non-decreasing in `attempt`, and saturating:
    /// the exponent input is clamped so the computation cannot overflow.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.factor.max(1.0);
        let scale = factor.powi(attempt.min(MAX_EXPONENT) as i32);
        let raw = self.base_delay.as_secs_f64() * scale;
        let capped = raw.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped)
    }
}

/// Stateful backoff counter embedded by the retry loops.
///
/// `next_delay` returns the delay for the current attempt and advances the
/// counter; `reset` is called on success. Each controlled loop owns its own
/// instance so failure signals from unrelated dependencies never mix.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    config: BackoffConfig,
    attempt: u32,
}

impl ExponentialBackoff {
    /// Create a backoff with the default configuration
    pub fn new() -> Self {
        Self::with_config(BackoffConfig::default())
    }

    /// Create a backoff with a custom configuration
    pub fn with_config(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Delay for the current attempt; advances the attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.apply_jitter(self.config.delay_for(self.attempt));
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    fn apply_jitter(&self, delay: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 {
            return delay;
        }

        let spread = delay.as_secs_f64() * self.config.jitter_factor;
        let jitter = if spread > 0.0 {
            rand::thread_rng().gen_range(-spread..=spread)
        } else {
            0.0
        };
        Duration::from_secs_f64((delay.as_secs_f64() + jitter).max(0.0))
    }

    /// Reset to the initial state; the next delay returns the base delay.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Number of delays handed out since the last reset
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Get the configuration
    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new()
    }
}
