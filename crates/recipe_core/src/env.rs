//! Environment for tool invocations.
//!
//! The composed map is passed to the child process as its complete
//! environment. The engine's own process environment is only read, never
//! written, so concurrent executions cannot see each other's variables.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use recipe_iac::provider::{aws_region, azure_subscription};
use recipe_iac::{resolve_secret, AwsCredential, AzureCredential, CredentialSource, SecretReference};

use crate::error::{CoreError, CoreResult};
use crate::options::ExecutionOptions;
use crate::registry::RegistryConfiguration;

/// Tool log verbosity; never inherited.
pub const TOOL_LOG_VAR: &str = "TF_LOG";

const TLS_FILE_VARS: [&str; 4] = [
    "SSL_CERT_FILE",
    "CURL_CA_BUNDLE",
    "REQUESTS_CA_BUNDLE",
    "GIT_SSL_CAINFO",
];
const TLS_DIR_VARS: [&str; 2] = ["SSL_CERT_DIR", "GIT_SSL_CAPATH"];

/// Well-known system CA bundle locations, in preference order.
pub const SYSTEM_CERT_BUNDLES: [&str; 5] = [
    "/etc/ssl/certs/ca-certificates.crt",
    "/etc/pki/tls/certs/ca-bundle.crt",
    "/etc/ssl/ca-bundle.pem",
    "/etc/pki/ca-trust/extracted/pem/tls-ca-bundle.pem",
    "/etc/ssl/cert.pem",
];

/// Where the recipe CA certificate is written inside the working directory.
pub const RECIPE_CA_PATH: &str = ".tls/ca.crt";

/// Builds the environment for one execution.
#[derive(Debug, Clone)]
pub struct EnvironmentComposer {
    base_env: BTreeMap<String, String>,
    cert_bundles: Vec<PathBuf>,
    tool_log_level: Option<String>,
    honor_recipe_ca: bool,
}

impl Default for EnvironmentComposer {
    fn default() -> Self {
        Self::from_process()
    }
}

impl EnvironmentComposer {
    /// Start from the current process environment.
    pub fn from_process() -> Self {
        Self::with_base_env(std::env::vars().collect())
    }

    pub fn with_base_env(base_env: BTreeMap<String, String>) -> Self {
        Self {
            base_env,
            cert_bundles: SYSTEM_CERT_BUNDLES.iter().map(PathBuf::from).collect(),
            tool_log_level: None,
            honor_recipe_ca: false,
        }
    }

    pub fn cert_bundles(mut self, bundles: Vec<PathBuf>) -> Self {
        self.cert_bundles = bundles;
        self
    }

    pub fn tool_log_level(mut self, level: Option<String>) -> Self {
        self.tool_log_level = level;
        self
    }

    pub fn honor_recipe_ca_certificate(mut self, honor: bool) -> Self {
        self.honor_recipe_ca = honor;
        self
    }

    /// Compose the full variable map for `options`.
    ///
    /// Variables from `registry` are merged before the caller's registry
    /// overrides, so the overrides win.
    pub async fn compose(
        &self,
        options: &ExecutionOptions,
        credentials: &dyn CredentialSource,
        registry: Option<&RegistryConfiguration>,
    ) -> CoreResult<BTreeMap<String, String>> {
        let mut env = self.base_env.clone();
        env.remove(TOOL_LOG_VAR);

        let settings = &options.env_config.recipe_config.env;
        env.extend(settings.additional_variables.clone());

        for (name, reference) in &settings.secrets {
            let value = resolve_secret(&options.secrets, reference)?;
            env.insert(name.clone(), value.to_string());
        }

        self.set_tls_variables(&mut env, options)?;

        if let Some(registry) = registry {
            env.extend(registry.env().clone());
        }
        env.extend(options.registry_env.clone());

        self.set_cloud_variables(&mut env, options, credentials).await;

        if let Some(level) = &self.tool_log_level {
            env.insert(TOOL_LOG_VAR.to_string(), level.clone());
        }

        info!(
            "Composed environment with {} variables for recipe {}",
            env.len(),
            options.recipe_name()
        );
        Ok(env)
    }

    fn set_tls_variables(
        &self,
        env: &mut BTreeMap<String, String>,
        options: &ExecutionOptions,
    ) -> CoreResult<()> {
        let recipe_ca = options
            .env_config
            .terraform_version()
            .and_then(|v| v.tls.as_ref())
            .and_then(|tls| tls.ca_certificate.as_ref());

        if let (true, Some(reference)) = (self.honor_recipe_ca, recipe_ca) {
            let path = write_recipe_ca(&options.root_dir, options, reference)?;
            let path_str = path.to_string_lossy().into_owned();
            let dir_str = path
                .parent()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default();
            for var in TLS_FILE_VARS {
                env.insert(var.to_string(), path_str.clone());
            }
            for var in TLS_DIR_VARS {
                env.insert(var.to_string(), dir_str.clone());
            }
            debug!("TLS variables point at the recipe CA certificate");
            return Ok(());
        }

        let Some(bundle) = self.cert_bundles.iter().find(|p| p.is_file()) else {
            debug!("No system CA bundle found, TLS variables left untouched");
            return Ok(());
        };
        let bundle_str = bundle.to_string_lossy().into_owned();
        let dir_str = bundle
            .parent()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        for var in TLS_FILE_VARS {
            set_if_empty(env, var, &bundle_str);
        }
        for var in TLS_DIR_VARS {
            set_if_empty(env, var, &dir_str);
        }
        Ok(())
    }

    async fn set_cloud_variables(
        &self,
        env: &mut BTreeMap<String, String>,
        options: &ExecutionOptions,
        credentials: &dyn CredentialSource,
    ) {
        let providers = &options.env_config.providers;

        if let Some(subscription) = providers
            .azure
            .as_ref()
            .and_then(|p| azure_subscription(&p.scope))
        {
            set_if_empty(env, "ARM_SUBSCRIPTION_ID", subscription);
        }

        match credentials.azure().await {
            Ok(Some(credential)) if !credential.tenant_id().is_empty() => {
                for var in ["ARM_TENANT_ID", "AZURE_TENANT_ID"] {
                    set_if_empty(env, var, credential.tenant_id());
                }
                for var in ["ARM_CLIENT_ID", "AZURE_CLIENT_ID"] {
                    set_if_empty(env, var, credential.client_id());
                }
                match &credential {
                    AzureCredential::ServicePrincipal { client_secret, .. } => {
                        for var in ["ARM_CLIENT_SECRET", "AZURE_CLIENT_SECRET"] {
                            set_if_empty(env, var, client_secret);
                        }
                    }
                    AzureCredential::WorkloadIdentity { token_file, .. } => {
                        set_if_empty(env, "ARM_USE_OIDC", "true");
                        set_if_empty(env, "ARM_OIDC_TOKEN_FILE_PATH", token_file);
                        set_if_empty(env, "AZURE_FEDERATED_TOKEN_FILE", token_file);
                    }
                }
            }
            Ok(_) => {}
            Err(e) => warn!("Failed to read Azure credentials, continuing without them: {}", e),
        }

        if let Some(region) = providers.aws.as_ref().and_then(|p| aws_region(&p.scope)) {
            set_if_empty(env, "AWS_REGION", region);
        }

        match credentials.aws().await {
            Ok(Some(AwsCredential::AccessKey {
                access_key_id,
                secret_access_key,
            })) if !access_key_id.is_empty() => {
                set_if_empty(env, "AWS_ACCESS_KEY_ID", &access_key_id);
                set_if_empty(env, "AWS_SECRET_ACCESS_KEY", &secret_access_key);
            }
            Ok(Some(AwsCredential::Irsa {
                role_arn,
                token_file,
            })) if !role_arn.is_empty() => {
                set_if_empty(env, "AWS_ROLE_ARN", &role_arn);
                set_if_empty(env, "AWS_WEB_IDENTITY_TOKEN_FILE", &token_file);
            }
            Ok(_) => {}
            Err(e) => warn!("Failed to read AWS credentials, continuing without them: {}", e),
        }
    }
}

/// Set `key` unless it already holds a non-empty value.
fn set_if_empty(env: &mut BTreeMap<String, String>, key: &str, value: &str) {
    if env.get(key).map_or(true, |current| current.is_empty()) {
        env.insert(key.to_string(), value.to_string());
    }
}

/// Write the recipe CA into the working directory, readable by the owner only.
fn write_recipe_ca(
    root_dir: &Path,
    options: &ExecutionOptions,
    reference: &SecretReference,
) -> CoreResult<PathBuf> {
    let pem = resolve_secret(&options.secrets, reference)?;
    validate_pem(pem)?;

    let path = root_dir.join(RECIPE_CA_PATH);
    write_private(&path, pem)?;
    Ok(path)
}

/// Write `contents` to `path`, readable by the owner only.
pub(crate) fn write_private(path: &Path, contents: &str) -> CoreResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut open = fs::OpenOptions::new();
    open.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        open.mode(0o600);
    }
    open.open(path)?.write_all(contents.as_bytes())?;
    Ok(())
}

/// The value must be PEM content, not a path to one.
pub fn validate_pem(value: &str) -> CoreResult<()> {
    let trimmed = value.trim();
    if !trimmed.starts_with("-----BEGIN CERTIFICATE-----")
        || !trimmed.contains("-----END CERTIFICATE-----")
    {
        return Err(CoreError::InvalidCertificate(
            "expected PEM encoded certificate content".into(),
        ));
    }
    Ok(())
}
