//! Recipe, resource and environment data model.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{IacError, IacResult};

/// Free-form module parameters.
pub type Params = BTreeMap<String, Value>;

/// Secret material keyed by source (secret store) name.
pub type SecretMaterial = BTreeMap<String, SecretData>;

/// A recipe registered on an environment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipeDefinition {
    /// Recipe name, also used as the local module name
    pub name: String,
    /// Module source, e.g. a registry address or git URL
    pub template_path: String,
    #[serde(default)]
    pub template_version: String,
    /// Environment-level parameters
    #[serde(default)]
    pub parameters: Params,
    #[serde(default)]
    pub resource_type: String,
}

/// The resource a recipe is being executed for.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRecipe {
    pub name: String,
    pub resource_id: String,
    #[serde(default)]
    pub application_id: String,
    #[serde(default)]
    pub environment_id: String,
    /// Resource-level parameters; these override environment parameters
    #[serde(default)]
    pub parameters: Params,
    /// Properties of connected resources, keyed by connection name
    #[serde(default)]
    pub connected_resources_properties: BTreeMap<String, Value>,
}

/// Reference to a value held in a secret store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretReference {
    pub source: String,
    pub key: String,
}

/// Contents of one secret store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecretData {
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

/// Look up a secret reference in the supplied material.
pub fn resolve_secret<'a>(
    material: &'a SecretMaterial,
    reference: &SecretReference,
) -> IacResult<&'a str> {
    let store = material
        .get(&reference.source)
        .ok_or_else(|| IacError::MissingSecretSource(reference.source.clone()))?;
    store
        .data
        .get(&reference.key)
        .map(String::as_str)
        .ok_or_else(|| IacError::MissingSecretKey {
            source_id: reference.source.clone(),
            key: reference.key.clone(),
        })
}

/// Environment configuration relevant to recipe execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EnvironmentConfig {
    pub runtime: RuntimeConfig,
    pub providers: CloudProviders,
    pub recipe_config: RecipeConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuntimeConfig {
    pub kubernetes: Option<KubernetesRuntime>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KubernetesRuntime {
    pub namespace: String,
    pub environment_namespace: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CloudProviders {
    pub azure: Option<ProviderScope>,
    pub aws: Option<ProviderScope>,
}

/// Cloud scope, e.g. `/subscriptions/{id}/resourceGroups/{rg}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderScope {
    pub scope: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecipeConfig {
    pub terraform: TerraformSettings,
    pub env: EnvSettings,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TerraformSettings {
    pub version: Option<VersionSettings>,
    pub authentication: Option<AuthenticationSettings>,
    /// User supplied provider configurations, keyed by provider name
    pub providers: BTreeMap<String, Vec<ProviderConfigEntry>>,
    /// Network mirror used instead of the public provider registry
    pub provider_mirror: Option<ProviderMirrorSettings>,
    /// Private module registries keyed by a display name
    pub module_registries: BTreeMap<String, ModuleRegistrySettings>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderMirrorSettings {
    pub url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModuleRegistrySettings {
    /// Registry host, optionally followed by a path
    pub url: String,
    pub authentication: RegistryAuthentication,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RegistryAuthentication {
    /// Secret holding the registry token
    pub token: Option<SecretReference>,
    /// Hosts the registry redirects to that accept the same token
    pub additional_hosts: Vec<String>,
}

/// Where to get the tool binary from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VersionSettings {
    pub version: Option<String>,
    pub releases_api_base_url: Option<String>,
    pub releases_archive_url: Option<String>,
    pub tls: Option<TlsSettings>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TlsSettings {
    /// Secret holding a PEM encoded CA certificate
    pub ca_certificate: Option<SecretReference>,
    pub skip_verify: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthenticationSettings {
    /// Secret holding the full `Authorization` header value for the registry
    pub token: Option<SecretReference>,
}

/// One provider configuration entry: literal attributes plus attributes
/// whose values come from secrets.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfigEntry {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub secrets: BTreeMap<String, SecretReference>,
    #[serde(flatten)]
    pub attributes: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EnvSettings {
    /// Plain environment variables for the tool process
    pub additional_variables: BTreeMap<String, String>,
    /// Environment variables whose values come from secrets
    pub secrets: BTreeMap<String, SecretReference>,
}

impl EnvironmentConfig {
    pub fn terraform_version(&self) -> Option<&VersionSettings> {
        self.recipe_config.terraform.version.as_ref()
    }
}
