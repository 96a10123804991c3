//! valmis - cluster readiness and suite lifecycle for Kubernetes e2e tests
//!
//! Before an end-to-end suite can run against a fresh cluster, someone has
//! to wait for a worker node to come up, make a namespace for the tests,
//! and clean everything up afterwards. valmis does that:
//!
//! - [`retry`](mod@retry): bounded retry with a fixed delay
//! - [`readiness`]: poll nodes until one schedulable, untainted node is
//!   `Ready`
//! - [`namespace`]: idempotent namespace create, plain delete
//! - [`Harness`]: wait, create, start fixtures, run the [`Suite`], tear down
//!
//! # Example
//!
//! ```no_run
//! use valmis::{Harness, HarnessConfig, Suite};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     valmis::telemetry::init_logging();
//!
//!     let mut harness = Harness::connect(HarnessConfig::from_env()?).await?;
//!     let (ctx, _readiness) = harness.setup().await?;
//!
//!     // Your tests here, using ctx.client and ctx.namespace...
//!
//!     let report = harness.teardown(&ctx).await?;
//!     println!("{report}");
//!     Ok(())
//! }
//! ```
//!
//! # Environment
//!
//! See [`config`] for the `VALMIS_*` variables read by
//! [`HarnessConfig::from_env`].

pub mod cleanup;
pub mod config;
pub mod context;
pub mod fixture;
pub mod harness;
pub mod namespace;
pub mod readiness;
pub mod retry;
pub mod telemetry;

// Re-export commonly used types
pub use cleanup::{CleanupFailure, CleanupReport};
pub use config::{ConfigError, HarnessConfig};
pub use context::Context;
pub use fixture::{Fixture, FixtureError};
pub use harness::{
    connect, CaseOutcome, Harness, HarnessError, Suite, SuiteReport, TestCase, TestFn, TestResult,
};
pub use namespace::{NamespaceError, NamespaceStore};
pub use readiness::{
    evaluate, CheckError, ConditionStatus, NodeSnapshot, NodeSource, Readiness, ReadinessChecker,
    ReadinessError, ReadinessState,
};
pub use retry::{retry, RetryError, RetryPolicy};
