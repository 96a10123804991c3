//! Cluster readiness
//!
//! The cluster counts as ready once at least one node is schedulable, has no
//! taints, and reports a `Ready` condition with status `True`. Control-plane
//! nodes are usually tainted or cordoned, so in practice this means the
//! first worker has checked in.
//!
//! [`ReadinessChecker::wait`] polls with a [`RetryPolicy`] until that holds
//! or the policy is exhausted.
//!
//! # Example
//!
//! ```no_run
//! use valmis::readiness::ReadinessChecker;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let client = kube::Client::try_default().await?;
//! let mut checker = ReadinessChecker::new(client);
//! let readiness = checker.wait().await?;
//! println!("ready after {} attempts", readiness.attempts);
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use kube::api::{Api, ListParams};
use kube::Client;
use tracing::{debug, info, instrument};

use crate::retry::{retry, RetryError, RetryPolicy};

/// The "Ready" condition type for nodes
pub const CONDITION_READY: &str = "Ready";

/// Anything that can list the cluster's nodes
#[async_trait]
pub trait NodeSource: Send + Sync {
    async fn list_nodes(&self) -> Result<Vec<Node>, kube::Error>;
}

#[async_trait]
impl NodeSource for Client {
    async fn list_nodes(&self) -> Result<Vec<Node>, kube::Error> {
        let nodes: Api<Node> = Api::all(self.clone());
        Ok(nodes.list(&ListParams::default()).await?.items)
    }
}

#[async_trait]
impl<T: NodeSource + ?Sized> NodeSource for std::sync::Arc<T> {
    async fn list_nodes(&self) -> Result<Vec<Node>, kube::Error> {
        (**self).list_nodes().await
    }
}

/// Status of a node condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

impl ConditionStatus {
    fn parse(status: &str) -> Self {
        match status {
            "True" => Self::True,
            "False" => Self::False,
            _ => Self::Unknown,
        }
    }
}

/// What one poll needs to know about a node
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NodeSnapshot {
    pub name: String,
    pub unschedulable: bool,
    pub tainted: bool,
    /// Status of the first `Ready` condition, `Unknown` if there is none
    pub ready: ConditionStatus,
}

impl From<&Node> for NodeSnapshot {
    fn from(node: &Node) -> Self {
        let spec = node.spec.as_ref();
        let ready = node
            .status
            .as_ref()
            .and_then(|s| s.conditions.as_ref())
            .and_then(|conds| conds.iter().find(|c| c.type_ == CONDITION_READY))
            .map_or(ConditionStatus::Unknown, |c| ConditionStatus::parse(&c.status));

        Self {
            name: node.metadata.name.clone().unwrap_or_default(),
            unschedulable: spec.and_then(|s| s.unschedulable).unwrap_or(false),
            tainted: spec
                .and_then(|s| s.taints.as_ref())
                .is_some_and(|taints| !taints.is_empty()),
            ready,
        }
    }
}

/// Failure of a single readiness pass
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CheckError {
    /// The node list call itself failed
    #[error("failed to list nodes: {0}")]
    Query(String),

    /// Nodes were listed but none is ready yet
    #[error("cluster is not ready: {0}")]
    NotReady(String),
}

/// Readiness never reached
#[derive(Debug, thiserror::Error)]
pub enum ReadinessError {
    #[error("cluster did not become ready: {0}")]
    Exhausted(#[from] RetryError<CheckError>),
}

impl ReadinessError {
    /// Error seen on the final poll
    pub fn last_error(&self) -> &CheckError {
        match self {
            Self::Exhausted(e) => e.last_error(),
        }
    }
}

/// Outcome of a successful wait
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Readiness {
    /// Polls it took, including the successful one
    pub attempts: u32,
    /// Schedulable, untainted nodes that were ready on the last poll
    pub ready_nodes: Vec<String>,
}

/// Checker lifecycle. There is no way back from `Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessState {
    Waiting,
    Ready,
}

/// Decide readiness for one node listing.
///
/// Returns the names of the nodes that are schedulable, untainted and
/// ready, or [`CheckError::NotReady`] if there are none.
pub fn evaluate(nodes: &[NodeSnapshot]) -> Result<Vec<String>, CheckError> {
    if nodes.is_empty() {
        return Err(CheckError::NotReady(format!(
            "waiting for 1 or more worker nodes: {}",
            nodes.len()
        )));
    }

    let mut ready = Vec::new();
    for node in nodes {
        if node.unschedulable {
            debug!(node = %node.name, "Skipping unschedulable node");
            continue;
        }
        if node.tainted {
            debug!(node = %node.name, "Skipping tainted node");
            continue;
        }
        if node.ready == ConditionStatus::True {
            ready.push(node.name.clone());
        } else {
            debug!(node = %node.name, status = ?node.ready, "Waiting for node to be ready");
        }
    }

    if ready.is_empty() {
        return Err(CheckError::NotReady(format!(
            "waiting for one worker node to be ready ({} nodes, none eligible and ready)",
            nodes.len()
        )));
    }

    Ok(ready)
}

/// Polls a [`NodeSource`] until the cluster is ready
pub struct ReadinessChecker<S> {
    source: S,
    policy: RetryPolicy,
    state: ReadinessState,
    last: Option<Readiness>,
}

impl<S: NodeSource> ReadinessChecker<S> {
    /// Checker with the default policy (50 attempts, 10s apart)
    pub fn new(source: S) -> Self {
        Self::with_policy(source, RetryPolicy::readiness())
    }

    pub fn with_policy(source: S, policy: RetryPolicy) -> Self {
        Self {
            source,
            policy,
            state: ReadinessState::Waiting,
            last: None,
        }
    }

    pub fn state(&self) -> ReadinessState {
        self.state
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// One pass: list nodes and evaluate them
    pub async fn check_once(&self) -> Result<Vec<String>, CheckError> {
        let nodes = self
            .source
            .list_nodes()
            .await
            .map_err(|e| CheckError::Query(e.to_string()))?;

        let snapshots: Vec<NodeSnapshot> = nodes.iter().map(NodeSnapshot::from).collect();
        evaluate(&snapshots)
    }

    /// Block until the cluster is ready or the policy runs out.
    ///
    /// Once ready, later calls return the same result without polling.
    #[instrument(
        skip(self),
        fields(attempts = self.policy.attempts(), delay = ?self.policy.delay())
    )]
    pub async fn wait(&mut self) -> Result<Readiness, ReadinessError> {
        if let (ReadinessState::Ready, Some(last)) = (self.state, &self.last) {
            return Ok(last.clone());
        }

        let polls = AtomicU32::new(0);
        let max_attempts = self.policy.attempts();
        let this = &*self;
        let ready_nodes = retry(&self.policy, || {
            let attempt = polls.fetch_add(1, Ordering::Relaxed) + 1;
            async move {
                let result = this.check_once().await;
                if let Err(e) = &result {
                    info!(attempt, max_attempts, error = %e, "Cluster not ready yet");
                }
                result
            }
        })
        .await?;

        let readiness = Readiness {
            attempts: polls.into_inner(),
            ready_nodes,
        };
        info!(
            attempts = readiness.attempts,
            nodes = ?readiness.ready_nodes,
            "Cluster is ready"
        );

        self.state = ReadinessState::Ready;
        self.last = Some(readiness.clone());
        Ok(readiness)
    }
}
