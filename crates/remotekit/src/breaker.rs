//! Per-target circuit breakers
//!
//! A breaker stops calling a failing endpoint for a cooldown period. All
//! callers to the same target share one breaker through [`BreakerRegistry`],
//! and every transition happens under the breaker's single mutex.

use crate::config::CircuitBreakerConfig;
use changeplan::{Error, Result};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Proof of admission, handed back when the outcome is recorded.
///
/// Each carries the breaker generation it was issued in. The generation
/// advances on every transition and every trial, so an outcome reported
/// after the breaker moved on is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permit {
    /// Admitted while closed
    Normal(u64),
    /// The single probe admitted while half-open
    Trial(u64),
}

impl Permit {
    pub fn is_trial(self) -> bool {
        matches!(self, Self::Trial(_))
    }
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
    trial_started: Option<Instant>,
    generation: u64,
}

impl Inner {
    fn next_generation(&mut self) -> u64 {
        self.generation = self.generation.wrapping_add(1);
        self.generation
    }

    fn reset(&mut self) {
        self.consecutive_failures = 0;
        self.consecutive_successes = 0;
        self.opened_at = None;
        self.trial_started = None;
    }
}

/// Circuit breaker guarding one remote target.
#[derive(Debug)]
pub struct CircuitBreaker {
    target: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(target: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            target: target.into(),
            config,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                opened_at: None,
                trial_started: None,
                generation: 0,
            }),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn state(&self) -> BreakerState {
        self.lock().state
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn elapsed(since: Option<Instant>, now: Instant) -> Duration {
        since.map_or(Duration::MAX, |t| now.saturating_duration_since(t))
    }

    fn rejected(&self) -> Error {
        Error::CircuitOpen {
            target: self.target.clone(),
        }
    }

    /// Ask to make a call now.
    pub fn admit(&self) -> Result<Permit> {
        self.admit_at(Instant::now())
    }

    /// Ask to make a call at `now`.
    ///
    /// # Errors
    ///
    /// Returns `Error::CircuitOpen` while the circuit is open and cooling
    /// down, or while another half-open trial is still in flight.
    pub fn admit_at(&self, now: Instant) -> Result<Permit> {
        let mut inner = self.lock();
        match inner.state {
            BreakerState::Closed => Ok(Permit::Normal(inner.generation)),
            BreakerState::Open => {
                if Self::elapsed(inner.opened_at, now) < self.config.recovery_timeout {
                    return Err(self.rejected());
                }
                inner.state = BreakerState::HalfOpen;
                inner.consecutive_successes = 0;
                inner.trial_started = Some(now);
                log::info!("Circuit for {} half-open, admitting trial", self.target);
                Ok(Permit::Trial(inner.next_generation()))
            }
            BreakerState::HalfOpen => {
                // A trial that never reported back is abandoned after one cooldown.
                if inner.trial_started.is_some()
                    && Self::elapsed(inner.trial_started, now) < self.config.recovery_timeout
                {
                    return Err(self.rejected());
                }
                inner.trial_started = Some(now);
                Ok(Permit::Trial(inner.next_generation()))
            }
        }
    }

    /// Record the final outcome of an admitted call.
    pub fn record(&self, permit: Permit, success: bool) {
        self.record_at(permit, success, Instant::now());
    }

    /// Record the final outcome of an admitted call at `now`.
    pub fn record_at(&self, permit: Permit, success: bool, now: Instant) {
        let mut inner = self.lock();
        match (permit, inner.state) {
            (Permit::Normal(generation), BreakerState::Closed)
                if generation == inner.generation =>
            {
                if success {
                    inner.consecutive_failures = 0;
                    return;
                }
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(now);
                    inner.next_generation();
                    log::warn!(
                        "Circuit for {} opened after {} consecutive failures",
                        self.target,
                        inner.consecutive_failures
                    );
                }
            }
            (Permit::Trial(generation), BreakerState::HalfOpen)
                if generation == inner.generation =>
            {
                inner.trial_started = None;
                inner.next_generation();
                if success {
                    inner.consecutive_successes += 1;
                    if inner.consecutive_successes >= self.config.success_threshold {
                        inner.state = BreakerState::Closed;
                        inner.reset();
                        log::info!("Circuit for {} closed", self.target);
                    }
                } else {
                    inner.state = BreakerState::Open;
                    inner.consecutive_successes = 0;
                    inner.opened_at = Some(now);
                    log::warn!("Circuit for {} re-opened after failed trial", self.target);
                }
            }
            // Late results from calls admitted under an earlier generation.
            _ => {}
        }
    }
}

/// Breakers keyed by remote target, shared by every client of that target.
#[derive(Debug, Default)]
pub struct BreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// The breaker for `target`, created on first use.
    pub fn breaker(&self, target: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            breakers
                .entry(target.to_string())
                .or_insert_with(|| Arc::new(CircuitBreaker::new(target, self.config.clone()))),
        )
    }

    pub fn len(&self) -> usize {
        self.breakers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
