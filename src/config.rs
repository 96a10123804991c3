//! Configuration types for valmis
//!
//! Build a [`HarnessConfig`] programmatically or read it from `VALMIS_*`
//! environment variables. There are no config files and no flags.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use valmis::config::HarnessConfig;
//! use valmis::retry::RetryPolicy;
//!
//! let config = HarnessConfig::new()
//!     .namespace("my-e2e")
//!     .kubeconfig("./cluster/auth/kubeconfig")
//!     .expected_masters(3)
//!     .readiness(RetryPolicy::new(10, Duration::from_secs(5)).unwrap());
//! ```

use std::path::PathBuf;
use std::time::Duration;

use crate::retry::RetryPolicy;

/// Namespace the suite runs in unless told otherwise
pub const DEFAULT_NAMESPACE: &str = "valmis-e2e-testing";

/// Directory handed to fixtures that write logs
pub const DEFAULT_LOG_OUTPUT_DIR: &str = "./logs";

pub const ENV_KUBECONFIG: &str = "VALMIS_KUBECONFIG";
pub const ENV_NAMESPACE: &str = "VALMIS_NAMESPACE";
pub const ENV_EXPECTED_MASTERS: &str = "VALMIS_EXPECTED_MASTERS";
pub const ENV_LOG_OUTPUT_DIR: &str = "VALMIS_LOG_OUTPUT_DIR";
pub const ENV_KEY_PATH: &str = "VALMIS_KEY_PATH";
pub const ENV_READY_ATTEMPTS: &str = "VALMIS_READY_ATTEMPTS";
pub const ENV_READY_DELAY_SECS: &str = "VALMIS_READY_DELAY_SECS";
pub const ENV_KEEP_NAMESPACE: &str = "VALMIS_KEEP_NAMESPACE";

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid retry policy: {0}")]
    InvalidRetryPolicy(String),

    #[error("Invalid value for {var}: {value:?}")]
    InvalidEnv { var: String, value: String },

    #[error("Invalid namespace name: {0:?}")]
    InvalidNamespace(String),
}

/// Everything the harness needs that comes from outside the process
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Kubeconfig to connect with. `None` infers one (`KUBECONFIG`,
    /// `~/.kube/config`, in-cluster).
    pub kubeconfig: Option<PathBuf>,

    /// Shared namespace created for the suite
    pub namespace: String,

    /// Hint for tests that need to skip or block on missing control-plane
    /// nodes
    pub expected_masters: u32,

    /// Where log-collecting fixtures should write
    pub log_output_dir: PathBuf,

    /// Private key for fixtures that reach nodes directly
    pub key_path: Option<PathBuf>,

    /// How long to wait for the cluster to become ready
    pub readiness: RetryPolicy,

    /// Leave the namespace behind after the run (debugging)
    pub keep_namespace: bool,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            kubeconfig: None,
            namespace: DEFAULT_NAMESPACE.to_string(),
            expected_masters: 1,
            log_output_dir: PathBuf::from(DEFAULT_LOG_OUTPUT_DIR),
            key_path: None,
            readiness: RetryPolicy::readiness(),
            keep_namespace: false,
        }
    }
}

impl HarnessConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read configuration from `VALMIS_*` environment variables, falling
    /// back to defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source
    pub fn from_lookup<L>(lookup: L) -> Result<Self, ConfigError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(path) = lookup(ENV_KUBECONFIG) {
            config.kubeconfig = Some(PathBuf::from(path));
        }
        if let Some(ns) = lookup(ENV_NAMESPACE) {
            config.namespace = ns;
        }
        if let Some(raw) = lookup(ENV_EXPECTED_MASTERS) {
            config.expected_masters = parse_env(ENV_EXPECTED_MASTERS, &raw)?;
        }
        if let Some(dir) = lookup(ENV_LOG_OUTPUT_DIR) {
            config.log_output_dir = PathBuf::from(dir);
        }
        if let Some(path) = lookup(ENV_KEY_PATH) {
            config.key_path = Some(PathBuf::from(path));
        }

        let attempts = match lookup(ENV_READY_ATTEMPTS) {
            Some(raw) => parse_env(ENV_READY_ATTEMPTS, &raw)?,
            None => config.readiness.attempts(),
        };
        let delay = match lookup(ENV_READY_DELAY_SECS) {
            Some(raw) => Duration::from_secs(parse_env(ENV_READY_DELAY_SECS, &raw)?),
            None => config.readiness.delay(),
        };
        config.readiness = RetryPolicy::new(attempts, delay)?;

        if let Some(raw) = lookup(ENV_KEEP_NAMESPACE) {
            config.keep_namespace = parse_bool(ENV_KEEP_NAMESPACE, &raw)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check invariants that the builder cannot enforce
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.namespace.trim().is_empty() {
            return Err(ConfigError::InvalidNamespace(self.namespace.clone()));
        }
        Ok(())
    }

    /// Set kubeconfig path
    pub fn kubeconfig(mut self, path: impl Into<PathBuf>) -> Self {
        self.kubeconfig = Some(path.into());
        self
    }

    /// Set the suite namespace
    pub fn namespace(mut self, name: impl Into<String>) -> Self {
        self.namespace = name.into();
        self
    }

    /// Set expected control-plane node count
    pub fn expected_masters(mut self, count: u32) -> Self {
        self.expected_masters = count;
        self
    }

    /// Set log output directory
    pub fn log_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_output_dir = dir.into();
        self
    }

    /// Set private key path
    pub fn key_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.key_path = Some(path.into());
        self
    }

    /// Set readiness retry policy
    pub fn readiness(mut self, policy: RetryPolicy) -> Self {
        self.readiness = policy;
        self
    }

    /// Keep the namespace after the run
    pub fn keep_namespace(mut self, keep: bool) -> Self {
        self.keep_namespace = keep;
        self
    }
}

fn parse_env<T: std::str::FromStr>(var: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        var: var.to_string(),
        value: raw.to_string(),
    })
}

fn parse_bool(var: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" | "" => Ok(false),
        _ => Err(ConfigError::InvalidEnv {
            var: var.to_string(),
            value: raw.to_string(),
        }),
    }
}
