//! Bounded retry with a fixed delay
//!
//! [`retry`] runs an operation until it succeeds or the [`RetryPolicy`]
//! runs out of attempts. The runner never looks at the error it gets back:
//! every failure is retried the same way and only exhaustion is reported.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use valmis::retry::{retry, RetryPolicy};
//!
//! # async fn ping_apiserver() -> Result<(), std::io::Error> { Ok(()) }
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let policy = RetryPolicy::new(5, Duration::from_secs(2))?;
//! retry(&policy, ping_apiserver).await?;
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::ConfigError;

/// How many times to run an operation and how long to wait in between
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    attempts: u32,
    delay: Duration,
}

impl RetryPolicy {
    /// Create a policy.
    ///
    /// Zero attempts would never run the operation, so it is rejected with
    /// [`ConfigError::InvalidRetryPolicy`].
    pub fn new(attempts: u32, delay: Duration) -> Result<Self, ConfigError> {
        if attempts == 0 {
            return Err(ConfigError::InvalidRetryPolicy(
                "attempts must be at least 1".to_string(),
            ));
        }
        Ok(Self { attempts, delay })
    }

    /// Policy used for cluster readiness: 50 attempts, 10 seconds apart
    pub fn readiness() -> Self {
        Self {
            attempts: 50,
            delay: Duration::from_secs(10),
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Upper bound on time spent sleeping between attempts. Saturates at
    /// [`Duration::MAX`].
    pub fn max_wait(&self) -> Duration {
        self.delay.saturating_mul(self.attempts - 1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::readiness()
    }
}

/// Returned once every attempt has failed
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("gave up after {attempts} attempts: {last_error}")]
    Exhausted {
        attempts: u32,
        #[source]
        last_error: E,
    },
}

impl<E> RetryError<E> {
    /// Error from the final attempt
    pub fn last_error(&self) -> &E {
        match self {
            Self::Exhausted { last_error, .. } => last_error,
        }
    }

    pub fn into_last_error(self) -> E {
        match self {
            Self::Exhausted { last_error, .. } => last_error,
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            Self::Exhausted { attempts, .. } => *attempts,
        }
    }
}

/// Run `op` until it succeeds or `policy` is exhausted.
///
/// Sleeps `policy.delay()` after every failed attempt except the last, so
/// `n` failing attempts sleep `n - 1` times.
pub async fn retry<F, Fut, T, E>(policy: &RetryPolicy, mut op: F) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = policy.attempts;
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(value) => {
                debug!(attempt, max_attempts, "Retry succeeded");
                return Ok(value);
            }
            Err(e) if attempt >= max_attempts => {
                warn!(
                    attempt,
                    max_attempts,
                    error = %e,
                    "Retry exhausted all attempts"
                );
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last_error: e,
                });
            }
            Err(e) => {
                debug!(
                    attempt,
                    max_attempts,
                    delay = ?policy.delay,
                    error = %e,
                    "Retry attempt failed, waiting"
                );
                tokio::time::sleep(policy.delay).await;
                attempt += 1;
            }
        }
    }
}
