//! Best-effort teardown
//!
//! Every step runs even if an earlier one failed. Failures are logged at
//! `warn` and collected into a [`CleanupReport`].

use std::fmt;
use std::future::Future;

use tracing::{debug, warn};

/// One failed teardown step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupFailure {
    pub step: String,
    pub error: String,
}

/// Outcome of a teardown
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Steps that completed
    pub completed: Vec<String>,
    /// Steps that failed, in the order they ran
    pub failures: Vec<CleanupFailure>,
}

impl CleanupReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Run one step and record how it went. Never fails.
    pub async fn step<Fut, E>(&mut self, step: impl Into<String>, fut: Fut) -> bool
    where
        Fut: Future<Output = Result<(), E>>,
        E: fmt::Display,
    {
        let step = step.into();
        match fut.await {
            Ok(()) => {
                debug!(step = %step, "Cleanup step finished");
                self.completed.push(step);
                true
            }
            Err(e) => {
                warn!(step = %step, error = %e, "Cleanup step failed, continuing");
                self.failures.push(CleanupFailure {
                    step,
                    error: e.to_string(),
                });
                false
            }
        }
    }
}

impl fmt::Display for CleanupReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.failures.is_empty() {
            return write!(f, "cleanup finished ({} steps)", self.completed.len());
        }

        writeln!(f, "cleanup finished with {} failures:", self.failures.len())?;
        for (i, failure) in self.failures.iter().enumerate() {
            let prefix = if i == self.failures.len() - 1 {
                "└─"
            } else {
                "├─"
            };
            writeln!(f, "{prefix} {}: {}", failure.step, failure.error)?;
        }
        Ok(())
    }
}
