//! Provider configuration builders.
//!
//! Each builder turns environment configuration plus platform identity into
//! the attributes of one provider block. The [`ProviderRegistry`] combines
//! them with user supplied provider configuration from the environment.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::credentials::{
    attributes_to_json, CredentialValue, ProviderAttributes, ProviderCredentialSet, ScalarValue,
};
use crate::error::{IacError, IacResult};
use crate::recipe::{resolve_secret, EnvironmentConfig, SecretMaterial};

pub const AZURE_PROVIDER: &str = "azurerm";
pub const AWS_PROVIDER: &str = "aws";
pub const KUBERNETES_PROVIDER: &str = "kubernetes";

/// Azure identity available to the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum AzureCredential {
    #[serde(rename_all = "camelCase")]
    ServicePrincipal {
        tenant_id: String,
        client_id: String,
        client_secret: String,
    },
    #[serde(rename_all = "camelCase")]
    WorkloadIdentity {
        tenant_id: String,
        client_id: String,
        token_file: String,
    },
}

impl AzureCredential {
    pub fn tenant_id(&self) -> &str {
        match self {
            Self::ServicePrincipal { tenant_id, .. } | Self::WorkloadIdentity { tenant_id, .. } => {
                tenant_id
            }
        }
    }

    pub fn client_id(&self) -> &str {
        match self {
            Self::ServicePrincipal { client_id, .. } | Self::WorkloadIdentity { client_id, .. } => {
                client_id
            }
        }
    }
}

/// AWS identity available to the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum AwsCredential {
    #[serde(rename_all = "camelCase")]
    AccessKey {
        access_key_id: String,
        secret_access_key: String,
    },
    #[serde(rename_all = "camelCase")]
    Irsa { role_arn: String, token_file: String },
}

/// Source of platform-managed cloud credentials.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn azure(&self) -> IacResult<Option<AzureCredential>>;
    async fn aws(&self) -> IacResult<Option<AwsCredential>>;
}

/// Credentials known up front, e.g. loaded from a mounted file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StaticCredentialSource {
    pub azure: Option<AzureCredential>,
    pub aws: Option<AwsCredential>,
}

impl StaticCredentialSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_azure(mut self, credential: AzureCredential) -> Self {
        self.azure = Some(credential);
        self
    }

    pub fn with_aws(mut self, credential: AwsCredential) -> Self {
        self.aws = Some(credential);
        self
    }
}

#[async_trait]
impl CredentialSource for StaticCredentialSource {
    async fn azure(&self) -> IacResult<Option<AzureCredential>> {
        Ok(self.azure.clone())
    }

    async fn aws(&self) -> IacResult<Option<AwsCredential>> {
        Ok(self.aws.clone())
    }
}

/// Builds the platform attributes for one provider.
#[async_trait]
pub trait ProviderConfigBuilder: Send + Sync {
    /// Provider name as used in `required_providers`.
    fn name(&self) -> &str;

    /// Attributes for the provider block. An empty map means the platform
    /// has nothing to contribute for this environment.
    async fn build(&self, env: &EnvironmentConfig) -> IacResult<ProviderAttributes>;
}

/// Split a resource id style scope into `(key, value)` segment pairs.
fn scope_segments(scope: &str) -> Vec<(String, &str)> {
    let parts: Vec<&str> = scope.trim_matches('/').split('/').collect();
    parts
        .chunks(2)
        .filter(|pair| pair.len() == 2)
        .map(|pair| (pair[0].to_ascii_lowercase(), pair[1]))
        .collect()
}

fn scope_value<'a>(scope: &'a str, key: &str) -> Option<&'a str> {
    scope_segments(scope)
        .into_iter()
        .find(|(k, v)| k == key && !v.is_empty())
        .map(|(_, v)| v)
}

/// Subscription id from `/subscriptions/{id}/...`.
pub fn azure_subscription(scope: &str) -> Option<&str> {
    scope_value(scope, "subscriptions")
}

/// Resource group name from `/subscriptions/{id}/resourceGroups/{rg}`.
pub fn azure_resource_group(scope: &str) -> Option<&str> {
    scope_value(scope, "resourcegroups")
}

/// Account id from `/planes/aws/aws/accounts/{account}/regions/{region}`.
pub fn aws_account(scope: &str) -> Option<&str> {
    scope_value(scope, "accounts")
}

/// Region from `/planes/aws/aws/accounts/{account}/regions/{region}`.
pub fn aws_region(scope: &str) -> Option<&str> {
    scope_value(scope, "regions")
}

/// `azurerm` provider.
pub struct AzureProvider {
    source: Arc<dyn CredentialSource>,
}

impl AzureProvider {
    pub fn new(source: Arc<dyn CredentialSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl ProviderConfigBuilder for AzureProvider {
    fn name(&self) -> &str {
        AZURE_PROVIDER
    }

    async fn build(&self, env: &EnvironmentConfig) -> IacResult<ProviderAttributes> {
        let mut attributes = ProviderAttributes::new();
        attributes.insert(
            "features".to_string(),
            CredentialValue::Group(BTreeMap::new()),
        );

        let Some(scope) = env.providers.azure.as_ref().map(|p| p.scope.as_str()) else {
            return Ok(attributes);
        };
        if scope.is_empty() {
            return Ok(attributes);
        }

        let subscription =
            azure_subscription(scope).ok_or_else(|| IacError::InvalidProviderScope {
                provider: "Azure".to_string(),
                scope: scope.to_string(),
                reason: "subscription is required in the scope".to_string(),
            })?;
        attributes.insert("subscription_id".to_string(), subscription.into());

        match self.source.azure().await? {
            Some(credential) if !credential.tenant_id().is_empty() => {
                attributes.insert("tenant_id".to_string(), credential.tenant_id().into());
                attributes.insert("client_id".to_string(), credential.client_id().into());
                match credential {
                    AzureCredential::ServicePrincipal { client_secret, .. } => {
                        attributes.insert("client_secret".to_string(), client_secret.into());
                    }
                    AzureCredential::WorkloadIdentity { token_file, .. } => {
                        attributes.insert("use_oidc".to_string(), true.into());
                        attributes.insert("oidc_token_file_path".to_string(), token_file.into());
                    }
                }
            }
            _ => debug!("No Azure credentials registered, provider will use ambient identity"),
        }

        Ok(attributes)
    }
}

/// `aws` provider.
pub struct AwsProvider {
    source: Arc<dyn CredentialSource>,
}

impl AwsProvider {
    pub fn new(source: Arc<dyn CredentialSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl ProviderConfigBuilder for AwsProvider {
    fn name(&self) -> &str {
        AWS_PROVIDER
    }

    async fn build(&self, env: &EnvironmentConfig) -> IacResult<ProviderAttributes> {
        let mut attributes = ProviderAttributes::new();
        let Some(scope) = env.providers.aws.as_ref().map(|p| p.scope.as_str()) else {
            return Ok(attributes);
        };
        if scope.is_empty() {
            return Ok(attributes);
        }

        let region = aws_region(scope).ok_or_else(|| IacError::InvalidProviderScope {
            provider: "AWS".to_string(),
            scope: scope.to_string(),
            reason: "region is required in the scope".to_string(),
        })?;
        attributes.insert("region".to_string(), region.into());

        match self.source.aws().await? {
            Some(AwsCredential::AccessKey {
                access_key_id,
                secret_access_key,
            }) if !access_key_id.is_empty() => {
                attributes.insert("access_key".to_string(), access_key_id.into());
                attributes.insert("secret_key".to_string(), secret_access_key.into());
            }
            Some(AwsCredential::Irsa {
                role_arn,
                token_file,
            }) if !role_arn.is_empty() => {
                attributes.insert(
                    "assume_role_with_web_identity".to_string(),
                    CredentialValue::group([
                        ("role_arn", ScalarValue::String(role_arn)),
                        ("web_identity_token_file", ScalarValue::String(token_file)),
                    ]),
                );
            }
            _ => debug!("No AWS credentials registered, provider will use ambient identity"),
        }

        Ok(attributes)
    }
}

/// `kubernetes` provider.
#[derive(Debug, Clone, Default)]
pub struct KubernetesProvider {
    /// Kubeconfig to use when running outside the cluster
    pub config_path: Option<String>,
}

impl KubernetesProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config_path(mut self, path: impl Into<String>) -> Self {
        self.config_path = Some(path.into());
        self
    }
}

#[async_trait]
impl ProviderConfigBuilder for KubernetesProvider {
    fn name(&self) -> &str {
        KUBERNETES_PROVIDER
    }

    async fn build(&self, _env: &EnvironmentConfig) -> IacResult<ProviderAttributes> {
        let mut attributes = ProviderAttributes::new();
        if let Some(path) = &self.config_path {
            attributes.insert("config_path".to_string(), path.as_str().into());
        }
        Ok(attributes)
    }
}

/// Registry of provider builders keyed by provider name.
#[derive(Default)]
pub struct ProviderRegistry {
    builders: BTreeMap<String, Arc<dyn ProviderConfigBuilder>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builders for every provider the platform manages.
    pub fn platform(source: Arc<dyn CredentialSource>, kubeconfig: Option<String>) -> Self {
        let mut kubernetes = KubernetesProvider::new();
        if let Some(path) = kubeconfig {
            kubernetes = kubernetes.with_config_path(path);
        }
        Self::new()
            .register(AzureProvider::new(source.clone()))
            .register(AwsProvider::new(source))
            .register(kubernetes)
    }

    pub fn register(mut self, builder: impl ProviderConfigBuilder + 'static) -> Self {
        self.builders
            .insert(builder.name().to_string(), Arc::new(builder));
        self
    }

    pub fn names(&self) -> Vec<&str> {
        self.builders.keys().map(String::as_str).collect()
    }

    /// Provider blocks for the configuration, keyed by provider name.
    ///
    /// User configurations from the environment come first and are always
    /// emitted. Platform builders only run for providers the module requires
    /// and the user did not configure.
    pub async fn provider_configs(
        &self,
        required: &[String],
        env: &EnvironmentConfig,
        secrets: &SecretMaterial,
    ) -> IacResult<BTreeMap<String, Vec<Value>>> {
        let mut configs = user_provider_configs(env, secrets)?;

        for name in required {
            if configs.contains_key(name) {
                debug!("Using environment provided configuration for provider {}", name);
                continue;
            }
            let Some(builder) = self.builders.get(name) else {
                continue;
            };
            let attributes = builder.build(env).await?;
            if !attributes.is_empty() {
                configs.insert(name.clone(), vec![attributes_to_json(&attributes)]);
            }
        }

        info!("Generated configuration for {} provider(s)", configs.len());
        Ok(configs)
    }

    /// Credentials for the injector. A builder that fails is skipped.
    pub async fn credential_set(&self, env: &EnvironmentConfig) -> ProviderCredentialSet {
        let mut set = ProviderCredentialSet::new();
        for (name, builder) in &self.builders {
            match builder.build(env).await {
                Ok(attributes) => set.insert(name.clone(), attributes),
                Err(e) => warn!("Skipping credentials for provider {}: {}", name, e),
            }
        }
        set
    }
}

/// Provider configuration supplied on the environment, with secret backed
/// attributes resolved.
pub fn user_provider_configs(
    env: &EnvironmentConfig,
    secrets: &SecretMaterial,
) -> IacResult<BTreeMap<String, Vec<Value>>> {
    let mut configs = BTreeMap::new();
    for (provider, entries) in &env.recipe_config.terraform.providers {
        let mut rendered = Vec::with_capacity(entries.len());
        for entry in entries {
            let mut object: Map<String, Value> = entry
                .attributes
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            for (attribute, reference) in &entry.secrets {
                let value = resolve_secret(secrets, reference)?;
                object.insert(attribute.clone(), Value::String(value.to_string()));
            }
            rendered.push(Value::Object(object));
        }
        if !rendered.is_empty() {
            configs.insert(provider.clone(), rendered);
        }
    }
    Ok(configs)
}
