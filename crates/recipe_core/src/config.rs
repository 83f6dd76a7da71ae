//! Engine configuration, loaded from YAML.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use recipe_iac::DEFAULT_STATE_NAMESPACE;
use recipe_install::{RetryPolicy, DEFAULT_RELEASES_URL};

use crate::error::{CoreError, CoreResult};

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Per-execution working directories are created under this root
    pub execution_root: PathBuf,
    pub tool: ToolConfig,
    pub retry: RetryPolicy,
    pub apply: ApplyConfig,
    pub install_verification: VerificationConfig,
    pub backend: BackendSettings,
    pub tls: TlsConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            execution_root: std::env::temp_dir().join("recipe-engine"),
            tool: ToolConfig::default(),
            retry: RetryPolicy::default(),
            apply: ApplyConfig::default(),
            install_verification: VerificationConfig::default(),
            backend: BackendSettings::default(),
            tls: TlsConfig::default(),
        }
    }
}

/// The IaC tool and where releases come from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    pub product: String,
    /// Version used when the environment does not pin one
    pub version: String,
    pub releases_url: String,
    pub request_timeout_secs: u64,
    /// Value for `TF_LOG`; unset means the tool logs nothing extra
    pub log_level: Option<String>,
    /// Copy this binary instead of downloading, when it exists
    pub preinstalled_path: Option<PathBuf>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            product: "terraform".to_string(),
            version: "1.6.6".to_string(),
            releases_url: DEFAULT_RELEASES_URL.to_string(),
            request_timeout_secs: 300,
            log_level: None,
            preinstalled_path: None,
        }
    }
}

impl ToolConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplyConfig {
    /// State lock acquisition timeout for apply and destroy
    pub lock_timeout_secs: u64,
    /// Timeout for any single tool command
    pub command_timeout_secs: u64,
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self {
            lock_timeout_secs: 60,
            command_timeout_secs: 3600,
        }
    }
}

/// Probe of the installed binary before it is used.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationConfig {
    pub attempts: u32,
    pub delay_secs: u64,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            attempts: 5,
            delay_secs: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSettings {
    /// Namespace holding state secrets
    pub namespace: String,
    /// Kubeconfig used by the backend and the kubernetes provider
    pub kubeconfig: Option<String>,
    /// Use in-cluster credentials for the state backend
    pub in_cluster: bool,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_STATE_NAMESPACE.to_string(),
            kubeconfig: None,
            in_cluster: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Write the recipe CA certificate into the execution directory and point
    /// TLS variables at it. Off by default; the system bundle is used instead.
    pub honor_recipe_ca_certificate: bool,
}

impl EngineConfig {
    pub fn from_yaml(content: &str) -> CoreResult<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> CoreResult<Self> {
        debug!("Loading engine configuration from {:?}", path);
        Self::from_yaml(&fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.tool.product.trim().is_empty() {
            return Err(CoreError::InvalidConfig("tool.product cannot be empty".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(CoreError::InvalidConfig("retry.max_attempts must be at least 1".into()));
        }
        if self.install_verification.attempts == 0 {
            return Err(CoreError::InvalidConfig(
                "install_verification.attempts must be at least 1".into(),
            ));
        }
        if self.backend.namespace.trim().is_empty() {
            return Err(CoreError::InvalidConfig("backend.namespace cannot be empty".into()));
        }
        Ok(())
    }
}
