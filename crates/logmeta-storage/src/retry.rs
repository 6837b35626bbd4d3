//! Retry policies for local I/O
//!
//! A policy decides how often and how quickly an operation is re-attempted.
//! The predicate deciding *whether* an outcome needs another attempt is
//! supplied per call, so the same policy serves both `io::Result<()>` steps
//! and steps that report success as a boolean.

use logmeta_common::config::FileRetryConfig;
use std::fmt::Display;
use std::thread;
use std::time::Duration;
use tracing::{error, warn};

/// Fixed-delay retry policy, bounded or unbounded
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// `None` retries until the operation succeeds
    max_attempts: Option<u32>,
    delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::unbounded(Duration::from_millis(1))
    }
}

impl RetryPolicy {
    /// Retry forever with a fixed delay
    #[must_use]
    pub const fn unbounded(delay: Duration) -> Self {
        Self {
            max_attempts: None,
            delay,
        }
    }

    /// Give up after `max_attempts` attempts (at least one is always made)
    #[must_use]
    pub const fn bounded(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            delay,
        }
    }

    /// Build a policy from the file retry configuration
    #[must_use]
    pub const fn from_config(config: &FileRetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            delay: Duration::from_millis(config.delay_ms),
        }
    }

    #[must_use]
    pub const fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }

    #[must_use]
    pub const fn delay(&self) -> Duration {
        self.delay
    }

    /// Run `op` until `should_retry` rejects its outcome or attempts run out.
    ///
    /// Returns the last outcome either way.
    pub fn retry_if<T, E, F, P>(&self, what: &str, mut op: F, should_retry: P) -> Result<T, E>
    where
        E: Display,
        F: FnMut() -> Result<T, E>,
        P: Fn(&Result<T, E>) -> bool,
    {
        let mut attempt: u32 = 1;
        loop {
            let outcome = op();
            if !should_retry(&outcome) {
                return outcome;
            }
            if self.max_attempts.is_some_and(|max| attempt >= max) {
                match &outcome {
                    Err(e) => error!(operation = what, attempts = attempt, "Failed: {}", e),
                    Ok(_) => error!(operation = what, attempts = attempt, "Failed: unexpected result"),
                }
                return outcome;
            }
            match &outcome {
                Err(e) => warn!(operation = what, attempt, "Retrying: {}", e),
                Ok(_) => warn!(operation = what, attempt, "Retrying: unexpected result"),
            }
            attempt = attempt.saturating_add(1);
            if !self.delay.is_zero() {
                thread::sleep(self.delay);
            }
        }
    }

    /// Retry while `op` returns an error
    pub fn run<T, E, F>(&self, what: &str, op: F) -> Result<T, E>
    where
        E: Display,
        F: FnMut() -> Result<T, E>,
    {
        self.retry_if(what, op, Result::is_err)
    }

    /// Retry while `op` returns an error or `false`
    pub fn run_until_true<E, F>(&self, what: &str, op: F) -> Result<bool, E>
    where
        E: Display,
        F: FnMut() -> Result<bool, E>,
    {
        self.retry_if(what, op, |outcome| !matches!(outcome, Ok(true)))
    }
}
