//! Reconnect Backoff
//!
//! Exponential backoff with jitter for feed reconnection. The delay grows by
//! `multiplier` per attempt up to `max_delay` and goes back to
//! `initial_delay` once a connection is subscribed again.

use std::time::Duration;

use rand::Rng;

use crate::infrastructure::config::FeedSettings;

/// Upper bound applied to configured multipliers.
const MAX_MULTIPLIER: f64 = 1_000.0;

/// Shortest delay ever returned.
const MIN_DELAY: Duration = Duration::from_millis(1);

/// Backoff configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Ceiling for the un-jittered delay.
    pub max_delay: Duration,
    /// Growth factor per attempt. Values below 1 or non-finite act as 1.
    pub multiplier: f64,
    /// Jitter as a fraction of the delay (0.1 = ±10%).
    pub jitter_factor: f64,
    /// Retries allowed before giving up (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_factor: 0.1,
            max_attempts: 0,
        }
    }
}

impl BackoffConfig {
    /// Build from feed settings with the default jitter.
    #[must_use]
    pub fn from_feed_settings(settings: &FeedSettings) -> Self {
        Self {
            initial_delay: settings.reconnect_delay_initial,
            max_delay: settings.reconnect_delay_max,
            multiplier: settings.reconnect_delay_multiplier,
            max_attempts: settings.max_reconnect_attempts,
            ..Self::default()
        }
    }

    fn effective_multiplier(&self) -> f64 {
        if self.multiplier.is_finite() {
            self.multiplier.clamp(1.0, MAX_MULTIPLIER)
        } else {
            1.0
        }
    }

    fn effective_jitter(&self) -> f64 {
        if self.jitter_factor.is_finite() {
            self.jitter_factor.clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}

/// Stateful backoff sequence.
///
/// ```rust
/// use price_alert_service::infrastructure::coinbase::{BackoffConfig, BackoffPolicy};
///
/// let mut policy = BackoffPolicy::new(BackoffConfig::default());
/// assert!(policy.next_delay().is_some());
/// policy.reset();
/// assert_eq!(policy.attempt_count(), 0);
/// ```
#[derive(Debug)]
pub struct BackoffPolicy {
    config: BackoffConfig,
    current: Duration,
    attempts: u32,
}

impl BackoffPolicy {
    /// Start a fresh sequence.
    #[must_use]
    pub fn new(config: BackoffConfig) -> Self {
        let current = config.initial_delay.min(config.max_delay);
        Self {
            config,
            current,
            attempts: 0,
        }
    }

    /// Delay before the next retry, or `None` once `max_attempts` is spent.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.should_retry() {
            return None;
        }
        self.attempts += 1;

        let base = self.current;
        self.current = base
            .mul_f64(self.config.effective_multiplier())
            .min(self.config.max_delay);

        Some(self.jittered(base))
    }

    /// Back to the initial delay and zero attempts.
    pub fn reset(&mut self) {
        self.current = self.config.initial_delay.min(self.config.max_delay);
        self.attempts = 0;
    }

    /// Retries handed out since the last reset.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempts
    }

    /// Whether another retry is allowed.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.config.max_attempts == 0 || self.attempts < self.config.max_attempts
    }

    fn jittered(&self, delay: Duration) -> Duration {
        let factor = self.config.effective_jitter();
        if factor == 0.0 {
            return delay.max(MIN_DELAY);
        }
        let offset: f64 = rand::rng().random_range(-factor..=factor);
        delay.mul_f64(1.0 + offset).max(MIN_DELAY)
    }
}

// =============================================================================
// Tests
// =============================================================================
