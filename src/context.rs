//! Test context
//!
//! A [`Context`] is built once by [`Harness::setup`](crate::Harness::setup)
//! and handed by reference to every test case and fixture. It replaces
//! process-wide client and namespace globals.

use std::path::{Path, PathBuf};

use kube::api::Api;
use kube::Client;

use crate::config::HarnessConfig;

/// Cluster connection plus the suite's namespace
#[derive(Clone)]
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Namespace shared by the whole suite
    pub namespace: String,
    /// How many control-plane nodes the cluster is expected to have. Tests
    /// use it to decide whether to fail, skip or block on missing resources.
    pub expected_masters: u32,
    log_output_dir: PathBuf,
    key_path: Option<PathBuf>,
}

impl Context {
    pub fn new(client: Client, config: &HarnessConfig) -> Self {
        Self {
            client,
            namespace: config.namespace.clone(),
            expected_masters: config.expected_masters,
            log_output_dir: config.log_output_dir.clone(),
            key_path: config.key_path.clone(),
        }
    }

    /// Typed API scoped to the suite namespace
    pub fn api<K>(&self) -> Api<K>
    where
        K: kube::Resource<Scope = kube::core::NamespaceResourceScope>,
        <K as kube::Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    /// Typed API for cluster-scoped resources
    pub fn cluster_api<K>(&self) -> Api<K>
    where
        K: kube::Resource<Scope = kube::core::ClusterResourceScope>,
        <K as kube::Resource>::DynamicType: Default,
    {
        Api::all(self.client.clone())
    }

    pub fn log_output_dir(&self) -> &Path {
        &self.log_output_dir
    }

    pub fn key_path(&self) -> Option<&Path> {
        self.key_path.as_deref()
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("namespace", &self.namespace)
            .field("expected_masters", &self.expected_masters)
            .field("log_output_dir", &self.log_output_dir)
            .field("key_path", &self.key_path)
            .finish_non_exhaustive()
    }
}
