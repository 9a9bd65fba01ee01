//! Retry pacing
//!
//! The delay before retry `n` is `initial * multiplier^n`, capped at `max`,
//! plus up to `jitter` of itself chosen at random. Used between broker
//! reconnect attempts and between attempts to respawn a shell.

use std::time::Duration;

use mt_core::config::BackoffConfig;

/// Counts consecutive failures and turns the count into a wait
#[derive(Debug, Clone)]
pub struct RetryDelay {
    config: BackoffConfig,
    attempts: u32,
}

impl RetryDelay {
    pub fn from_config(config: &BackoffConfig) -> Self {
        let mut config = config.clone();
        config.jitter = config.jitter.clamp(0.0, 1.0);
        Self {
            config,
            attempts: 0,
        }
    }

    /// Failures seen since the last success
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Wait for the current failure count without jitter
    fn base(&self) -> Duration {
        let exponent = i32::try_from(self.attempts).unwrap_or(i32::MAX);
        let factor = self.config.multiplier.max(1.0).powi(exponent);
        let secs = self.config.initial.as_secs_f64() * factor;
        if !secs.is_finite() || secs >= self.config.max.as_secs_f64() {
            self.config.max
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    /// Record a failure and return how long to wait before retrying
    pub fn next_delay(&mut self) -> Duration {
        let base = self.base();
        self.attempts = self.attempts.saturating_add(1);

        let spread = base.as_secs_f64() * self.config.jitter * rand::random::<f64>();
        base + Duration::from_secs_f64(spread)
    }

    /// Record a success
    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delay(initial_ms: u64, max_ms: u64, multiplier: f64, jitter: f64) -> RetryDelay {
        RetryDelay::from_config(&BackoffConfig {
            initial: Duration::from_millis(initial_ms),
            max: Duration::from_millis(max_ms),
            multiplier,
            jitter,
        })
    }

    #[test]
    fn test_delay_grows_until_capped() {
        let mut retry = delay(100, 350, 2.0, 0.0);

        assert_eq!(retry.next_delay(), Duration::from_millis(100));
        assert_eq!(retry.next_delay(), Duration::from_millis(200));
        assert_eq!(retry.next_delay(), Duration::from_millis(350));
        assert_eq!(retry.next_delay(), Duration::from_millis(350));
        assert_eq!(retry.attempts(), 4);
    }

    #[test]
    fn test_success_starts_over() {
        let mut retry = delay(1000, 60_000, 2.0, 0.0);
        retry.next_delay();
        retry.next_delay();
        retry.reset();
        assert_eq!(retry.attempts(), 0);
        assert_eq!(retry.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let mut retry = delay(2000, 2000, 1.0, 0.5);
        for _ in 0..20 {
            let d = retry.next_delay();
            assert!(d >= Duration::from_secs(2) && d <= Duration::from_secs(3));
        }
    }

    #[test]
    fn test_long_outage_stays_at_max() {
        let mut retry = delay(1000, 60_000, 2.0, 0.0);
        for _ in 0..2000 {
            retry.next_delay();
        }
        assert_eq!(retry.next_delay(), Duration::from_secs(60));
    }

    #[test]
    fn test_reset_preset_starts_at_100ms() {
        let mut retry = RetryDelay::from_config(&BackoffConfig {
            jitter: 0.0,
            ..BackoffConfig::reset()
        });
        assert_eq!(retry.next_delay(), Duration::from_millis(100));
    }
}
