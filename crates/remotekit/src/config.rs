//! Client, breaker and retry configuration

use rand::Rng;
use std::time::Duration;

/// Default endpoint of the resource-management service
pub const DEFAULT_ENDPOINT: &str = "http://localhost:8080";

/// Circuit breaker thresholds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// How long an open circuit rejects calls before admitting a trial
    pub recovery_timeout: Duration,
    /// Consecutive trial successes that close the circuit again
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            success_threshold: 3,
        }
    }
}

/// Exponential backoff settings.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first (at least one is always made)
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: f64,
    /// Draw each delay uniformly from `[0, delay]`
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            exponential_base: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 1,
            ..Default::default()
        }
    }

    /// Number of attempts actually made.
    pub fn attempts(&self) -> u32 {
        self.max_retries.max(1)
    }

    /// Calculate the delay after a failed attempt (0-indexed), before jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay = self.base_delay.as_secs_f64() * self.exponential_base.powi(exponent);
        let capped = delay.min(self.max_delay.as_secs_f64());
        if capped.is_finite() && capped > 0.0 {
            Duration::from_secs_f64(capped)
        } else if capped > 0.0 {
            self.max_delay
        } else {
            Duration::ZERO
        }
    }

    /// The delay to actually wait, with jitter applied when enabled.
    pub fn backoff(&self, attempt: u32, rng: &mut impl Rng) -> Duration {
        let delay = self.delay_for_attempt(attempt);
        if self.jitter && !delay.is_zero() {
            Duration::from_secs_f64(rng.gen_range(0.0..=delay.as_secs_f64()))
        } else {
            delay
        }
    }
}

/// Everything the resilient client needs to reach its endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub endpoint: String,
    /// Bound on each individual attempt
    pub timeout: Duration,
    pub breaker: CircuitBreakerConfig,
    pub retry: RetryPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            timeout: Duration::from_secs(30),
            breaker: CircuitBreakerConfig::default(),
            retry: RetryPolicy::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.breaker.failure_threshold, 5);
        assert_eq!(config.breaker.recovery_timeout, Duration::from_secs(60));
        assert_eq!(config.breaker.success_threshold, 3);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.base_delay, Duration::from_secs(1));
        assert_eq!(config.retry.max_delay, Duration::from_secs(60));
        assert!(config.retry.jitter);
    }

    #[test]
    fn test_delay_sequence_is_capped() {
        let policy = RetryPolicy {
            max_retries: 10,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            exponential_base: 2.0,
            jitter: false,
        };
        let delays: Vec<u64> = (0..6).map(|a| policy.delay_for_attempt(a).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 10, 10]);
    }

    #[test]
    fn test_huge_attempt_stays_at_max() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(10_000), policy.max_delay);
    }

    #[test]
    fn test_jitter_within_bounds() {
        let policy = RetryPolicy::default();
        let mut rng = rand::thread_rng();
        for attempt in 0..5 {
            let ceiling = policy.delay_for_attempt(attempt);
            let delay = policy.backoff(attempt, &mut rng);
            assert!(delay <= ceiling);
        }
    }

    #[test]
    fn test_without_jitter_backoff_is_exact() {
        let policy = RetryPolicy {
            jitter: false,
            ..Default::default()
        };
        let mut rng = rand::thread_rng();
        assert_eq!(policy.backoff(2, &mut rng), Duration::from_secs(4));
    }

    #[test]
    fn test_attempts_at_least_one() {
        let policy = RetryPolicy {
            max_retries: 0,
            ..Default::default()
        };
        assert_eq!(policy.attempts(), 1);
        assert_eq!(RetryPolicy::no_retry().attempts(), 1);
    }
}
