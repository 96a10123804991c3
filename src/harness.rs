//! Suite orchestration
//!
//! [`Harness`] does what a test binary's `main` needs around the tests
//! themselves:
//!
//! 1. wait for the cluster to be ready
//! 2. create the suite namespace
//! 3. start fixtures (best-effort)
//! 4. run the suite
//! 5. stop fixtures (best-effort)
//! 6. delete the namespace
//!
//! # Example
//!
//! ```no_run
//! use futures::future::{BoxFuture, FutureExt};
//! use valmis::{Context, Harness, HarnessConfig, Suite, TestResult};
//!
//! async fn check_smoke(ctx: &Context) -> TestResult {
//!     assert!(!ctx.namespace.is_empty());
//!     Ok(())
//! }
//!
//! fn smoke(ctx: &Context) -> BoxFuture<'_, TestResult> {
//!     check_smoke(ctx).boxed()
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     valmis::telemetry::init_logging();
//!
//!     let suite = Suite::new().case("smoke", smoke);
//!     let code = match HarnessConfig::from_env() {
//!         Ok(config) => match Harness::connect(config).await {
//!             Ok(harness) => harness.run(&suite).await.exit_code(),
//!             Err(e) => {
//!                 eprintln!("{e}");
//!                 1
//!             }
//!         },
//!         Err(e) => {
//!             eprintln!("{e}");
//!             1
//!         }
//!     };
//!     std::process::exit(code);
//! }
//! ```

use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use futures::FutureExt;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::Client;
use tracing::{error, info, instrument, warn};

use crate::cleanup::CleanupReport;
use crate::config::{ConfigError, HarnessConfig};
use crate::context::Context;
use crate::fixture::Fixture;
use crate::namespace::{NamespaceError, NamespaceStore};
use crate::readiness::{NodeSource, Readiness, ReadinessChecker, ReadinessError};

/// Errors that abort a run
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to create Kubernetes client: {0}")]
    Client(String),

    #[error(transparent)]
    Readiness(#[from] ReadinessError),

    #[error(transparent)]
    Namespace(#[from] NamespaceError),
}

/// What a test case returns
pub type TestResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Test case body
pub type TestFn = for<'a> fn(&'a Context) -> BoxFuture<'a, TestResult>;

/// A named test case
#[derive(Clone)]
pub struct TestCase {
    pub name: String,
    pub run: TestFn,
}

/// Ordered list of test cases sharing one [`Context`]
#[derive(Clone, Default)]
pub struct Suite {
    cases: Vec<TestCase>,
}

impl Suite {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a case
    pub fn case(mut self, name: impl Into<String>, run: TestFn) -> Self {
        self.cases.push(TestCase {
            name: name.into(),
            run,
        });
        self
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    /// Run every case in order. Panics are caught and count as failures.
    pub async fn run(&self, ctx: &Context) -> Vec<CaseOutcome> {
        let mut outcomes = Vec::with_capacity(self.cases.len());

        for case in &self.cases {
            let start = Instant::now();
            let result = AssertUnwindSafe((case.run)(ctx)).catch_unwind().await;
            let elapsed = start.elapsed();

            let error = match result {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(panic) => Some(panic_message(panic.as_ref())),
            };

            match &error {
                None => info!(test = %case.name, elapsed = ?elapsed, "PASS"),
                Some(e) => error!(test = %case.name, elapsed = ?elapsed, error = %e, "FAIL"),
            }

            outcomes.push(CaseOutcome {
                name: case.name.clone(),
                elapsed,
                error,
            });
        }

        outcomes
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}

/// Result of one test case
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseOutcome {
    pub name: String,
    pub elapsed: Duration,
    /// `None` when the case passed
    pub error: Option<String>,
}

impl CaseOutcome {
    pub fn passed(&self) -> bool {
        self.error.is_none()
    }
}

/// Result of a whole run
#[derive(Debug, Default)]
pub struct SuiteReport {
    /// Setup failure, if the suite never ran
    pub setup_error: Option<String>,
    pub readiness: Option<Readiness>,
    pub outcomes: Vec<CaseOutcome>,
    pub cleanup: CleanupReport,
    /// Namespace deletion failure
    pub teardown_error: Option<String>,
}

impl SuiteReport {
    pub fn passed(&self) -> bool {
        self.setup_error.is_none()
            && self.teardown_error.is_none()
            && self.outcomes.iter().all(CaseOutcome::passed)
    }

    pub fn failed_cases(&self) -> impl Iterator<Item = &CaseOutcome> {
        self.outcomes.iter().filter(|o| !o.passed())
    }

    /// Process exit code: 0 when everything passed, 1 otherwise
    pub fn exit_code(&self) -> i32 {
        i32::from(!self.passed())
    }
}

/// Connect using the configured kubeconfig, or infer one
pub async fn connect(config: &HarnessConfig) -> Result<Client, HarnessError> {
    let kube_config = match &config.kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                HarnessError::Client(format!(
                    "failed to read kubeconfig {}: {e}",
                    path.display()
                ))
            })?;
            kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| HarnessError::Client(format!("failed to load kubeconfig: {e}")))?
        }
        None => kube::Config::infer()
            .await
            .map_err(|e| HarnessError::Client(format!("failed to infer config: {e}")))?,
    };

    Client::try_from(kube_config).map_err(|e| HarnessError::Client(e.to_string()))
}

/// Drives setup, the suite and teardown
pub struct Harness<N = Client, S = Client> {
    config: HarnessConfig,
    client: Client,
    checker: ReadinessChecker<N>,
    namespaces: S,
    fixtures: Vec<Box<dyn Fixture>>,
    started: Vec<usize>,
}

impl Harness {
    /// Harness talking to a real cluster
    pub async fn connect(config: HarnessConfig) -> Result<Self, HarnessError> {
        config.validate()?;
        let client = connect(&config).await?;
        Ok(Self::from_parts(config, client.clone(), client.clone(), client))
    }
}

impl<N: NodeSource, S: NamespaceStore> Harness<N, S> {
    /// Harness with explicit node and namespace backends
    pub fn from_parts(config: HarnessConfig, client: Client, nodes: N, namespaces: S) -> Self {
        let checker = ReadinessChecker::with_policy(nodes, config.readiness);
        Self {
            config,
            client,
            checker,
            namespaces,
            fixtures: Vec::new(),
            started: Vec::new(),
        }
    }

    /// Register a fixture. Fixtures start in registration order and stop
    /// in reverse.
    pub fn fixture(mut self, fixture: impl Fixture + 'static) -> Self {
        self.fixtures.push(Box::new(fixture));
        self
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Wait for readiness, create the namespace and start fixtures.
    ///
    /// Fixture start failures are logged and otherwise ignored.
    #[instrument(skip(self), fields(namespace = %self.config.namespace))]
    pub async fn setup(&mut self) -> Result<(Context, Readiness), HarnessError> {
        self.config.validate()?;

        let readiness = self.checker.wait().await?;

        self.namespaces.create(&self.config.namespace).await?;

        let ctx = Context::new(self.client.clone(), &self.config);

        for (i, fixture) in self.fixtures.iter().enumerate() {
            match fixture.start(&ctx).await {
                Ok(()) => {
                    info!(fixture = %fixture.name(), "Started fixture");
                    self.started.push(i);
                }
                Err(e) => {
                    warn!(
                        fixture = %fixture.name(),
                        error = %e,
                        "Fixture failed to start, continuing"
                    );
                }
            }
        }

        Ok((ctx, readiness))
    }

    /// Stop started fixtures, then delete the namespace.
    ///
    /// Fixture failures end up in the returned report. Only a failed
    /// namespace deletion is an error.
    #[instrument(skip(self, ctx), fields(namespace = %ctx.namespace))]
    pub async fn teardown(&mut self, ctx: &Context) -> Result<CleanupReport, HarnessError> {
        let mut report = CleanupReport::new();

        for i in std::mem::take(&mut self.started).into_iter().rev() {
            let fixture = &self.fixtures[i];
            report
                .step(format!("stop {}", fixture.name()), fixture.stop(ctx))
                .await;
        }

        if self.config.keep_namespace {
            info!("Keeping namespace for debugging");
            return Ok(report);
        }

        self.namespaces.delete(&ctx.namespace).await?;
        report.completed.push(format!("delete namespace {}", ctx.namespace));
        Ok(report)
    }

    /// Full lifecycle. Failures, including panicking test cases, end up in
    /// the report rather than being returned.
    pub async fn run(mut self, suite: &Suite) -> SuiteReport {
        let mut report = SuiteReport::default();

        let (ctx, readiness) = match self.setup().await {
            Ok(ok) => ok,
            Err(e) => {
                error!(error = %e, "Setup failed");
                report.setup_error = Some(e.to_string());
                return report;
            }
        };
        report.readiness = Some(readiness);

        info!(namespace = %ctx.namespace, cases = suite.len(), "Running suite");
        report.outcomes = suite.run(&ctx).await;

        match self.teardown(&ctx).await {
            Ok(cleanup) => {
                if !cleanup.is_clean() {
                    warn!("{cleanup}");
                }
                report.cleanup = cleanup;
            }
            Err(e) => {
                error!(error = %e, "Teardown failed");
                report.teardown_error = Some(e.to_string());
            }
        }

        let failed = report.failed_cases().count();
        info!(
            passed = report.outcomes.len() - failed,
            failed,
            "Suite finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::offline_client;
    use crate::fixture::FixtureError;
    use crate::readiness::CONDITION_READY;
    use crate::retry::RetryPolicy;
    use async_trait::async_trait;
    use k8s_openapi::api::core::v1::{Namespace, Node, NodeCondition, NodeStatus};
    use std::sync::{Arc, Mutex};

    /// Shared call log so fakes can assert ordering across each other
    type Calls = Arc<Mutex<Vec<String>>>;

    struct FakeNodes {
        ready: bool,
        calls: Calls,
    }

    #[async_trait]
    impl NodeSource for FakeNodes {
        async fn list_nodes(&self) -> Result<Vec<Node>, kube::Error> {
            self.calls.lock().unwrap().push("list nodes".to_string());
            let status = if self.ready { "True" } else { "False" };
            Ok(vec![Node {
                status: Some(NodeStatus {
                    conditions: Some(vec![NodeCondition {
                        type_: CONDITION_READY.to_string(),
                        status: status.to_string(),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }),
                ..Default::default()
            }])
        }
    }

    struct FakeNamespaces {
        fail_create: bool,
        fail_delete: bool,
        calls: Calls,
    }

    #[async_trait]
    impl NamespaceStore for FakeNamespaces {
        async fn create(&self, name: &str) -> Result<Namespace, NamespaceError> {
            self.calls.lock().unwrap().push(format!("create {name}"));
            if self.fail_create {
                return Err(NamespaceError::Create("forbidden".to_string()));
            }
            Ok(crate::namespace::desired(name))
        }

        async fn delete(&self, name: &str) -> Result<(), NamespaceError> {
            self.calls.lock().unwrap().push(format!("delete {name}"));
            if self.fail_delete {
                return Err(NamespaceError::Delete("timed out".to_string()));
            }
            Ok(())
        }
    }

    struct FakeFixture {
        name: &'static str,
        fail_start: bool,
        fail_stop: bool,
        calls: Calls,
    }

    #[async_trait]
    impl Fixture for FakeFixture {
        fn name(&self) -> &str {
            self.name
        }

        async fn start(&self, _ctx: &Context) -> Result<(), FixtureError> {
            self.calls.lock().unwrap().push(format!("start {}", self.name));
            if self.fail_start {
                return Err(FixtureError::new(self.name, "no ssh key"));
            }
            Ok(())
        }

        async fn stop(&self, _ctx: &Context) -> Result<(), FixtureError> {
            self.calls.lock().unwrap().push(format!("stop {}", self.name));
            if self.fail_stop {
                return Err(FixtureError::new(self.name, "collector gone"));
            }
            Ok(())
        }
    }

    struct Setup {
        ready: bool,
        fail_create: bool,
        fail_delete: bool,
        keep_namespace: bool,
    }

    impl Default for Setup {
        fn default() -> Self {
            Self {
                ready: true,
                fail_create: false,
                fail_delete: false,
                keep_namespace: false,
            }
        }
    }

    fn harness(setup: Setup, calls: &Calls) -> Harness<FakeNodes, FakeNamespaces> {
        let config = HarnessConfig::new()
            .namespace("suite")
            .readiness(RetryPolicy::new(2, Duration::ZERO).unwrap())
            .keep_namespace(setup.keep_namespace);

        Harness::from_parts(
            config,
            offline_client(),
            FakeNodes {
                ready: setup.ready,
                calls: calls.clone(),
            },
            FakeNamespaces {
                fail_create: setup.fail_create,
                fail_delete: setup.fail_delete,
                calls: calls.clone(),
            },
        )
    }

    fn fixture(
        name: &'static str,
        fail_start: bool,
        fail_stop: bool,
        calls: &Calls,
    ) -> FakeFixture {
        FakeFixture {
            name,
            fail_start,
            fail_stop,
            calls: calls.clone(),
        }
    }

    async fn pass() -> TestResult {
        Ok(())
    }

    async fn fail() -> TestResult {
        Err("assertion failed".into())
    }

    async fn explode() -> TestResult {
        panic!("kaboom")
    }

    async fn in_suite_namespace(ctx: &Context) -> TestResult {
        if ctx.namespace == "suite" {
            Ok(())
        } else {
            Err(format!("wrong namespace {}", ctx.namespace).into())
        }
    }

    fn passing(_ctx: &Context) -> BoxFuture<'_, TestResult> {
        pass().boxed()
    }

    fn failing(_ctx: &Context) -> BoxFuture<'_, TestResult> {
        fail().boxed()
    }

    fn panicking(_ctx: &Context) -> BoxFuture<'_, TestResult> {
        explode().boxed()
    }

    fn checks_namespace(ctx: &Context) -> BoxFuture<'_, TestResult> {
        in_suite_namespace(ctx).boxed()
    }

    #[tokio::test]
    async fn test_full_run_order_and_exit_code() {
        let calls = Calls::default();
        let h = harness(Setup::default(), &calls)
            .fixture(fixture("logs", false, false, &calls))
            .fixture(fixture("shell", false, false, &calls));
        let suite = Suite::new()
            .case("passing", passing)
            .case("namespace", checks_namespace);

        let report = h.run(&suite).await;

        assert!(report.passed());
        assert_eq!(report.exit_code(), 0);
        assert_eq!(report.outcomes.len(), 2);
        assert_eq!(report.readiness.as_ref().map(|r| r.attempts), Some(1));
        assert_eq!(
            *calls.lock().unwrap(),
            vec![
                "list nodes",
                "create suite",
                "start logs",
                "start shell",
                "stop shell",
                "stop logs",
                "delete suite",
            ]
        );
    }

    #[tokio::test]
    async fn test_failing_and_panicking_cases_fail_the_run() {
        let calls = Calls::default();
        let suite = Suite::new()
            .case("passing", passing)
            .case("failing", failing)
            .case("panicking", panicking);

        let report = harness(Setup::default(), &calls).run(&suite).await;

        assert_eq!(report.exit_code(), 1);
        let failed: Vec<_> = report.failed_cases().map(|o| o.name.as_str()).collect();
        assert_eq!(failed, vec!["failing", "panicking"]);
        assert!(report.outcomes[2]
            .error
            .as_deref()
            .is_some_and(|e| e.contains("kaboom")));
        // Teardown still ran
        assert!(calls.lock().unwrap().contains(&"delete suite".to_string()));
    }

    #[tokio::test]
    async fn test_never_ready_aborts_before_namespace() {
        let calls = Calls::default();
        let suite = Suite::new().case("passing", passing);

        let report = harness(
            Setup {
                ready: false,
                ..Setup::default()
            },
            &calls,
        )
        .run(&suite)
        .await;

        assert_eq!(report.exit_code(), 1);
        assert!(report.setup_error.is_some());
        assert!(report.outcomes.is_empty());
        assert_eq!(*calls.lock().unwrap(), vec!["list nodes", "list nodes"]);
    }

    #[tokio::test]
    async fn test_setup_rejects_blank_namespace_before_any_call() {
        let calls = Calls::default();
        let config = HarnessConfig::new().namespace("  ");
        let mut h = Harness::from_parts(
            config,
            offline_client(),
            FakeNodes {
                ready: true,
                calls: calls.clone(),
            },
            FakeNamespaces {
                fail_create: false,
                fail_delete: false,
                calls: calls.clone(),
            },
        )
        .fixture(fixture("logs", false, false, &calls));

        let err = h.setup().await.unwrap_err();

        assert!(matches!(
            err,
            HarnessError::Config(ConfigError::InvalidNamespace(_))
        ));
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_namespace_create_failure_aborts() {
        let calls = Calls::default();
        let mut h = harness(
            Setup {
                fail_create: true,
                ..Setup::default()
            },
            &calls,
        );

        let err = h.setup().await.unwrap_err();
        assert!(matches!(err, HarnessError::Namespace(NamespaceError::Create(_))));
    }

    #[tokio::test]
    async fn test_fixture_failures_are_best_effort() {
        let calls = Calls::default();
        let h = harness(Setup::default(), &calls)
            .fixture(fixture("broken-start", true, false, &calls))
            .fixture(fixture("broken-stop", false, true, &calls))
            .fixture(fixture("fine", false, false, &calls));
        let suite = Suite::new().case("passing", passing);

        let report = h.run(&suite).await;

        assert!(report.passed());
        assert_eq!(report.cleanup.failures.len(), 1);
        assert_eq!(report.cleanup.failures[0].step, "stop broken-stop");
        let calls = calls.lock().unwrap();
        // Fixtures that never started are not stopped
        assert!(!calls.contains(&"stop broken-start".to_string()));
        assert_eq!(calls.last().map(String::as_str), Some("delete suite"));
    }

    #[tokio::test]
    async fn test_namespace_delete_failure_fails_run() {
        let calls = Calls::default();
        let suite = Suite::new().case("passing", passing);

        let report = harness(
            Setup {
                fail_delete: true,
                ..Setup::default()
            },
            &calls,
        )
        .run(&suite)
        .await;

        assert!(report.outcomes.iter().all(CaseOutcome::passed));
        assert!(report.teardown_error.is_some());
        assert_eq!(report.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_keep_namespace_skips_delete() {
        let calls = Calls::default();
        let suite = Suite::new().case("passing", passing);

        let report = harness(
            Setup {
                keep_namespace: true,
                ..Setup::default()
            },
            &calls,
        )
        .run(&suite)
        .await;

        assert!(report.passed());
        assert!(!calls.lock().unwrap().contains(&"delete suite".to_string()));
    }

    #[test]
    fn test_empty_report_passes() {
        let report = SuiteReport::default();
        assert!(report.passed());
        assert_eq!(report.exit_code(), 0);
        assert!(Suite::new().is_empty());
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new("static");
        assert_eq!(panic_message(boxed.as_ref()), "panicked: static");

        let boxed: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "panicked: owned");

        let boxed: Box<dyn std::any::Any + Send> = Box::new(42);
        assert_eq!(panic_message(boxed.as_ref()), "panicked");
    }
}
