//! Pure reconnection decision logic
//!
//! Delays grow exponentially from `initial_delay_ms` by `multiplier` per
//! attempt and are capped at `max_delay_ms`:
//!
//! ```text
//! delay(n) = min(initial * multiplier^(n-1), max)
//! ```

use crate::config::ReconnectConfig;
use std::time::Duration;

/// Decision result for reconnection attempts
#[derive(Debug, PartialEq)]
pub enum ReconnectionDecision {
    /// Proceed with reconnection attempt after `delay`
    Proceed { attempt: u32, delay: Duration },
    /// Abort reconnection - shutdown requested
    AbortShutdownRequested,
    /// Abort reconnection - max attempts exceeded
    AbortMaxAttemptsExceeded,
}

impl ReconnectConfig {
    /// Calculate backoff delay for the given 1-based attempt
    pub fn calculate_backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay_ms = self.initial_delay_ms as f64 * self.multiplier.powi(exponent);
        let capped = if delay_ms.is_finite() {
            delay_ms.min(self.max_delay_ms as f64)
        } else {
            self.max_delay_ms as f64
        };
        Duration::from_millis(capped as u64)
    }

    /// Total time spent sleeping across every allowed attempt
    /// Returns None if unlimited retries are configured
    pub fn calculate_max_total_time(&self) -> Option<Duration> {
        self.max_attempts.map(|max_attempts| {
            (1..=max_attempts)
                .map(|attempt| self.calculate_backoff_delay(attempt))
                .sum()
        })
    }
}

/// Determine if reconnection should be attempted (pure function)
/// Supports unlimited retries when max_attempts is None
pub fn should_attempt_reconnection(
    attempts_so_far: u32,
    config: &ReconnectConfig,
    shutdown_requested: bool,
) -> ReconnectionDecision {
    if shutdown_requested {
        return ReconnectionDecision::AbortShutdownRequested;
    }

    if let Some(max_attempts) = config.max_attempts {
        if attempts_so_far >= max_attempts {
            return ReconnectionDecision::AbortMaxAttemptsExceeded;
        }
    }

    let attempt = attempts_so_far.saturating_add(1);
    ReconnectionDecision::Proceed {
        attempt,
        delay: config.calculate_backoff_delay(attempt),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(initial: u64, max: u64, multiplier: f64) -> ReconnectConfig {
        ReconnectConfig {
            initial_delay_ms: initial,
            max_delay_ms: max,
            multiplier,
            max_attempts: None,
        }
    }

    #[test]
    fn test_backoff_grows_exponentially_then_caps() {
        let config = config(100, 1000, 2.0);
        assert_eq!(config.calculate_backoff_delay(1), Duration::from_millis(100));
        assert_eq!(config.calculate_backoff_delay(2), Duration::from_millis(200));
        assert_eq!(config.calculate_backoff_delay(3), Duration::from_millis(400));
        assert_eq!(config.calculate_backoff_delay(4), Duration::from_millis(800));
        assert_eq!(config.calculate_backoff_delay(5), Duration::from_millis(1000));
        assert_eq!(config.calculate_backoff_delay(500), Duration::from_millis(1000));
        assert_eq!(
            config.calculate_backoff_delay(u32::MAX),
            Duration::from_millis(1000)
        );
    }

    #[test]
    fn test_multiplier_of_one_is_constant() {
        let config = config(250, 30_000, 1.0);
        assert_eq!(config.calculate_backoff_delay(1), Duration::from_millis(250));
        assert_eq!(config.calculate_backoff_delay(50), Duration::from_millis(250));
    }

    #[test]
    fn test_default_config_backoff() {
        let config = ReconnectConfig::default();
        assert_eq!(config.calculate_backoff_delay(1), Duration::from_millis(500));
        assert_eq!(config.calculate_backoff_delay(2), Duration::from_millis(1000));
        assert_eq!(
            config.calculate_backoff_delay(100),
            Duration::from_millis(30_000)
        );
    }

    #[test]
    fn test_should_attempt_reconnection() {
        let config = config(100, 1000, 2.0);

        assert_eq!(
            should_attempt_reconnection(0, &config, false),
            ReconnectionDecision::Proceed {
                attempt: 1,
                delay: Duration::from_millis(100)
            }
        );
        assert_eq!(
            should_attempt_reconnection(2, &config, false),
            ReconnectionDecision::Proceed {
                attempt: 3,
                delay: Duration::from_millis(400)
            }
        );
        assert_eq!(
            should_attempt_reconnection(0, &config, true),
            ReconnectionDecision::AbortShutdownRequested
        );
    }

    #[test]
    fn test_max_attempts() {
        let mut config = config(100, 1000, 2.0);
        config.max_attempts = Some(3);

        assert!(matches!(
            should_attempt_reconnection(2, &config, false),
            ReconnectionDecision::Proceed { attempt: 3, .. }
        ));
        assert_eq!(
            should_attempt_reconnection(3, &config, false),
            ReconnectionDecision::AbortMaxAttemptsExceeded
        );
        // Shutdown wins over exhaustion
        assert_eq!(
            should_attempt_reconnection(3, &config, true),
            ReconnectionDecision::AbortShutdownRequested
        );
    }

    #[test]
    fn test_calculate_max_total_time() {
        let mut config = config(100, 1000, 2.0);
        assert_eq!(config.calculate_max_total_time(), None);

        config.max_attempts = Some(4);
        assert_eq!(
            config.calculate_max_total_time(),
            Some(Duration::from_millis(100 + 200 + 400 + 800))
        );
    }
}
