//! Namespace lifecycle for the suite
//!
//! The suite shares one namespace. Creating it twice is fine (another
//! process may have made it first); deleting it is a single request with no
//! retry.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Api, DeleteParams, ObjectMeta, PostParams};
use kube::Client;
use tracing::info;

/// Label put on every namespace valmis creates
pub const MANAGED_LABEL: &str = "valmis.io/e2e";

/// Errors from namespace operations
#[derive(Debug, thiserror::Error)]
pub enum NamespaceError {
    #[error("Failed to create namespace: {0}")]
    Create(String),

    #[error("Failed to get namespace: {0}")]
    Get(String),

    #[error("Failed to delete namespace: {0}")]
    Delete(String),
}

/// Create and delete namespaces
#[async_trait]
pub trait NamespaceStore: Send + Sync {
    /// Create `name`. An already existing namespace counts as success.
    async fn create(&self, name: &str) -> Result<Namespace, NamespaceError>;

    async fn delete(&self, name: &str) -> Result<(), NamespaceError>;
}

#[async_trait]
impl NamespaceStore for Client {
    async fn create(&self, name: &str) -> Result<Namespace, NamespaceError> {
        let namespaces: Api<Namespace> = Api::all(self.clone());

        match namespaces.create(&PostParams::default(), &desired(name)).await {
            Ok(ns) => {
                info!(namespace = %name, "Created namespace");
                Ok(ns)
            }
            Err(e) if is_already_exists(&e) => {
                info!(namespace = %name, "Namespace already exists");
                namespaces
                    .get(name)
                    .await
                    .map_err(|e| NamespaceError::Get(describe(&e, name)))
            }
            Err(e) => Err(NamespaceError::Create(describe(&e, name))),
        }
    }

    async fn delete(&self, name: &str) -> Result<(), NamespaceError> {
        let namespaces: Api<Namespace> = Api::all(self.clone());

        namespaces
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| NamespaceError::Delete(describe(&e, name)))?;

        info!(namespace = %name, "Deleted namespace");
        Ok(())
    }
}

#[async_trait]
impl<T: NamespaceStore + ?Sized> NamespaceStore for std::sync::Arc<T> {
    async fn create(&self, name: &str) -> Result<Namespace, NamespaceError> {
        (**self).create(name).await
    }

    async fn delete(&self, name: &str) -> Result<(), NamespaceError> {
        (**self).delete(name).await
    }
}

/// Namespace object sent on create
pub fn desired(name: &str) -> Namespace {
    Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(
                [(MANAGED_LABEL.to_string(), "true".to_string())]
                    .into_iter()
                    .collect(),
            ),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// True for a 409 `AlreadyExists` from the API server
pub fn is_already_exists(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == 409 || resp.reason == "AlreadyExists")
}

/// Turn a kube error into a message that says what went wrong with `name`
fn describe(err: &kube::Error, name: &str) -> String {
    if let kube::Error::Api(resp) = err {
        return match resp.code {
            403 => format!("namespace '{name}': permission denied (check RBAC)"),
            404 => format!("namespace '{name}' not found"),
            409 => format!("namespace '{name}' already exists"),
            _ => format!("namespace '{name}': {}", resp.message),
        };
    }

    let raw = err.to_string();
    if raw.contains("connection refused") || raw.contains("ECONNREFUSED") {
        return format!("namespace '{name}': cannot connect to Kubernetes API");
    }
    if raw.contains("timeout") || raw.contains("deadline exceeded") {
        return format!("namespace '{name}': operation timed out");
    }

    format!("namespace '{name}': {raw}")
}
