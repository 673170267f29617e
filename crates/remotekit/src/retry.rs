//! Retry logic with exponential backoff for transient errors.

use crate::config::RetryPolicy;
use changeplan::{Error, Result};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::Duration;

/// Waits between attempts.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, delay: Duration);
}

/// Blocks the current thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, delay: Duration) {
        thread::sleep(delay);
    }
}

/// Records requested delays without waiting.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delays(&self) -> Vec<Duration> {
        self.delays
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, delay: Duration) {
        self.delays
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(delay);
    }
}

/// Execute an operation with retry logic.
///
/// The operation receives the 0-indexed attempt number. Retryable errors
/// are retried after a backoff delay until the policy's attempt budget is
/// spent; any other error is returned immediately.
///
/// # Returns
/// The result of the operation, or the last error if all attempts failed.
pub fn with_retry<T, F>(policy: &RetryPolicy, sleeper: &dyn Sleeper, mut operation: F) -> Result<T>
where
    F: FnMut(u32) -> Result<T>,
{
    let attempts = policy.attempts();
    let mut rng = rand::thread_rng();
    let mut attempt = 0;

    loop {
        let error: Error = match operation(attempt) {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if !error.is_retryable() || attempt + 1 >= attempts {
            return Err(error);
        }

        let delay = policy.backoff(attempt, &mut rng);
        log::warn!(
            "Attempt {}/{} failed: {}. Retrying in {:.2}s",
            attempt + 1,
            attempts,
            error,
            delay.as_secs_f64()
        );
        sleeper.sleep(delay);
        attempt += 1;
    }
}
