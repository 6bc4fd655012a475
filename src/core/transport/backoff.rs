//! Exponential reconnect backoff with a ceiling and attempt bound.

use std::time::Duration;

/// Backoff tuning for the reconnect loop.
#[derive(Debug, Clone, Copy)]
pub struct BackoffConfig {
    /// Delay before the first reconnect attempt.
    pub initial: Duration,
    /// Upper bound on the delay between attempts.
    pub ceiling: Duration,
    /// Attempts before the connection is declared failed.
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            ceiling: Duration::from_secs(30),
            max_attempts: 10,
        }
    }
}

impl BackoffConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.initial.is_zero() {
            return Err("backoff initial delay must be non-zero".to_string());
        }
        if self.ceiling < self.initial {
            return Err("backoff ceiling must be at least the initial delay".to_string());
        }
        if self.max_attempts == 0 {
            return Err("backoff max_attempts must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Doubling delay sequence: initial, 2x, 4x, ... capped at the ceiling.
///
/// `next_delay` returns `None` once the attempt budget is spent; a
/// successful connection must call `reset` to restore it.
#[derive(Debug)]
pub struct Backoff {
    config: BackoffConfig,
    attempt: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// The delay for the next attempt, or `None` when attempts are spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.config.max_attempts {
            return None;
        }
        // Shift capped so the multiplier cannot overflow u32.
        let exponent = self.attempt.min(31);
        self.attempt += 1;
        let delay = self
            .config
            .initial
            .saturating_mul(1u32 << exponent)
            .min(self.config.ceiling);
        Some(delay)
    }

    /// Attempts consumed since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Restore the full attempt budget after a successful connection.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_sequence_doubles_to_ceiling() {
        let mut backoff = Backoff::new(BackoffConfig::default());
        let secs: Vec<u64> = std::iter::from_fn(|| backoff.next_delay())
            .map(|d| d.as_secs())
            .collect();
        assert_eq!(secs, vec![1, 2, 4, 8, 16, 30, 30, 30, 30, 30]);
        // Budget spent.
        assert_eq!(backoff.next_delay(), None);
    }

    #[test]
    fn reset_restores_initial_delay_and_budget() {
        let mut backoff = Backoff::new(BackoffConfig::default());
        for _ in 0..4 {
            backoff.next_delay();
        }
        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn exhaustion_persists_until_reset() {
        let config = BackoffConfig {
            max_attempts: 2,
            ..Default::default()
        };
        let mut backoff = Backoff::new(config);
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert_eq!(backoff.next_delay(), None);
        assert_eq!(backoff.next_delay(), None);
        backoff.reset();
        assert!(backoff.next_delay().is_some());
    }

    #[test]
    fn config_validation() {
        assert!(BackoffConfig::default().validate().is_ok());
        let zero_initial = BackoffConfig {
            initial: Duration::ZERO,
            ..Default::default()
        };
        assert!(zero_initial.validate().is_err());
        let inverted = BackoffConfig {
            initial: Duration::from_secs(10),
            ceiling: Duration::from_secs(1),
            ..Default::default()
        };
        assert!(inverted.validate().is_err());
    }
}
