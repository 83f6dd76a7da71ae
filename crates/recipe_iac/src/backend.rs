//! Kubernetes state backend.
//!
//! The tool stores state in a secret named `tfstate-<workspace>-<suffix>`.
//! The suffix is derived from the resource id so repeated executions for the
//! same resource share state while different resources never collide.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use recipe_runner::{CommandRunner, CommandSpec, RunConfig};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::{IacError, IacResult};
use crate::recipe::ResourceRecipe;

/// Prefix the tool uses for the default workspace state secret.
pub const BACKEND_SECRET_PREFIX: &str = "tfstate-default-";

/// Namespace state secrets live in unless configured otherwise.
pub const DEFAULT_STATE_NAMESPACE: &str = "recipe-system";

/// Suffix length; keeps the secret name and its labels under 63 characters.
const SUFFIX_LENGTH: usize = 40;

/// Deterministic suffix for a resource's state secret.
pub fn secret_suffix(resource_id: &str) -> String {
    let digest = Sha256::digest(resource_id.to_lowercase().as_bytes());
    let mut suffix = hex::encode(digest);
    suffix.truncate(SUFFIX_LENGTH);
    suffix
}

/// Full secret name for a suffix.
pub fn secret_name(suffix: &str) -> String {
    format!("{BACKEND_SECRET_PREFIX}{suffix}")
}

/// Rendered backend block plus the suffix used to find its secret.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendConfig {
    pub block: Value,
    pub secret_suffix: String,
}

/// `kubernetes` backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KubernetesBackend {
    pub namespace: String,
    #[serde(default)]
    pub config_path: Option<String>,
    #[serde(default)]
    pub in_cluster: bool,
}

impl Default for KubernetesBackend {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_STATE_NAMESPACE.to_string(),
            config_path: None,
            in_cluster: true,
        }
    }
}

impl KubernetesBackend {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    pub fn with_config_path(mut self, path: impl Into<String>) -> Self {
        self.config_path = Some(path.into());
        self.in_cluster = false;
        self
    }

    /// Backend block for `resource`.
    pub fn build(&self, resource: &ResourceRecipe) -> BackendConfig {
        let suffix = secret_suffix(&resource.resource_id);
        let mut block = json!({
            "secret_suffix": suffix,
            "namespace": self.namespace,
        });
        if self.in_cluster {
            block["in_cluster_config"] = Value::Bool(true);
        } else if let Some(path) = &self.config_path {
            block["config_path"] = Value::String(path.clone());
        }
        BackendConfig {
            block: json!({ "kubernetes": block }),
            secret_suffix: suffix,
        }
    }
}

/// Access to the secrets holding tool state.
#[async_trait]
pub trait BackendStore: Send + Sync {
    async fn secret_exists(&self, namespace: &str, name: &str) -> IacResult<bool>;

    /// Delete a state secret. Deleting a missing secret succeeds.
    async fn delete_secret(&self, namespace: &str, name: &str) -> IacResult<()>;
}

fn is_not_found(output: &str) -> bool {
    output.contains("NotFound") || output.contains("not found")
}

/// Store backed by `kubectl`.
pub struct KubectlBackendStore {
    runner: Arc<dyn CommandRunner>,
    kubeconfig: Option<String>,
    run_config: RunConfig,
}

impl KubectlBackendStore {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            kubeconfig: None,
            run_config: RunConfig::default().timeout(60),
        }
    }

    pub fn with_kubeconfig(mut self, path: impl Into<String>) -> Self {
        self.kubeconfig = Some(path.into());
        self
    }

    fn command(&self, args: &[&str]) -> CommandSpec {
        let mut spec = CommandSpec::new("kubectl").args(args.iter().copied());
        if let Some(path) = &self.kubeconfig {
            spec = spec.arg("--kubeconfig").arg(path.as_str());
        }
        spec
    }
}

#[async_trait]
impl BackendStore for KubectlBackendStore {
    async fn secret_exists(&self, namespace: &str, name: &str) -> IacResult<bool> {
        debug!("Checking state secret {}/{}", namespace, name);
        let spec = self.command(&["get", "secret", name, "-n", namespace, "-o", "name"]);
        let result = self
            .runner
            .run(&spec, &self.run_config)
            .await
            .map_err(|e| IacError::BackendLookup(e.to_string()))?;

        if result.success() {
            Ok(true)
        } else if is_not_found(&result.stderr) {
            Ok(false)
        } else {
            Err(IacError::BackendLookup(result.combined_output()))
        }
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> IacResult<()> {
        info!("Deleting state secret {}/{}", namespace, name);
        let spec = self.command(&["delete", "secret", name, "-n", namespace]);
        let result = self
            .runner
            .run(&spec, &self.run_config)
            .await
            .map_err(|e| IacError::BackendDelete(e.to_string()))?;

        if result.success() || is_not_found(&result.stderr) {
            Ok(())
        } else {
            Err(IacError::BackendDelete(result.combined_output()))
        }
    }
}

/// In-process store, used when state secrets are managed elsewhere and in tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackendStore {
    secrets: Arc<RwLock<BTreeMap<String, BTreeSet<String>>>>,
}

impl InMemoryBackendStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, namespace: &str, name: &str) {
        self.secrets
            .write()
            .entry(namespace.to_string())
            .or_default()
            .insert(name.to_string());
    }

    pub fn contains(&self, namespace: &str, name: &str) -> bool {
        self.secrets
            .read()
            .get(namespace)
            .is_some_and(|names| names.contains(name))
    }
}

#[async_trait]
impl BackendStore for InMemoryBackendStore {
    async fn secret_exists(&self, namespace: &str, name: &str) -> IacResult<bool> {
        Ok(self.contains(namespace, name))
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> IacResult<()> {
        if let Some(names) = self.secrets.write().get_mut(namespace) {
            names.remove(name);
        }
        Ok(())
    }
}
