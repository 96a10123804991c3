//! Log output for suite runs
//!
//! Readiness polls, namespace calls and case results all go out as
//! `tracing` events. [`init_logging`] prints them to stderr so they
//! interleave with the suite's own output. Verbosity comes from
//! `VALMIS_LOG`, then `RUST_LOG`, then [`DEFAULT_FILTER`].
//!
//! # Example
//!
//! ```no_run
//! valmis::telemetry::init_logging();
//! ```

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Filter used when neither variable holds a usable directive
pub const DEFAULT_FILTER: &str = "info";

/// Filter directives for valmis only, checked before `RUST_LOG`
pub const ENV_LOG: &str = "VALMIS_LOG";

/// Install the stderr subscriber. Later calls are no-ops.
pub fn init_logging() {
    let filter = filter_from(|var| std::env::var(var).ok());
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

fn filter_from(lookup: impl Fn(&str) -> Option<String>) -> EnvFilter {
    [ENV_LOG, "RUST_LOG"]
        .into_iter()
        .filter_map(|var| lookup(var))
        .find_map(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}
