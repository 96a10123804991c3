//! Auxiliary suite fixtures
//!
//! A fixture is something that runs alongside the suite, such as a log
//! collector or a node shell helper. valmis does not ship any; it only
//! starts them after the namespace exists and stops them before it is
//! deleted. Neither step can fail the run: errors are logged and
//! collected.

use async_trait::async_trait;

use crate::context::Context;

/// Error from a fixture's start or stop
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{fixture}: {message}")]
pub struct FixtureError {
    pub fixture: String,
    pub message: String,
}

impl FixtureError {
    pub fn new(fixture: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            fixture: fixture.into(),
            message: message.into(),
        }
    }
}

/// Resource with a start/stop lifecycle around the suite
#[async_trait]
pub trait Fixture: Send + Sync {
    /// Name used in logs and cleanup reports
    fn name(&self) -> &str;

    async fn start(&self, ctx: &Context) -> Result<(), FixtureError>;

    /// Only called for fixtures whose `start` succeeded
    async fn stop(&self, ctx: &Context) -> Result<(), FixtureError>;
}
