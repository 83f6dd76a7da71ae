//! # recipe_iac
//!
//! Terraform side of recipe execution: the recipe and environment data
//! model, provider credential builders, configuration generation, module
//! inspection, credential injection, the Kubernetes state backend and the
//! terraform command wrapper.
//!
//! ## Example
//!
//! ```rust,no_run
//! use recipe_iac::{KubernetesBackend, RecipeDefinition, ResourceRecipe, TerraformConfig};
//!
//! let definition = RecipeDefinition {
//!     name: "mongodb".into(),
//!     template_path: "registry.example/modules/mongodatabases".into(),
//!     ..Default::default()
//! };
//! let resource = ResourceRecipe::default();
//!
//! let mut config = TerraformConfig::new("/tmp/recipe/work", &definition, &resource).unwrap();
//! config.save().unwrap();
//!
//! // after `terraform get` and inspection
//! let suffix = config.add_terraform_block(&KubernetesBackend::default(), &resource, &Default::default());
//! config.save().unwrap();
//! println!("state secret suffix {suffix}");
//! ```

pub mod backend;
pub mod config;
pub mod context;
pub mod credentials;
pub mod error;
pub mod hcl;
pub mod inject;
pub mod inspect;
pub mod provider;
pub mod recipe;
pub mod state;
pub mod terraform;

pub use backend::{
    secret_name, secret_suffix, BackendConfig, BackendStore, InMemoryBackendStore,
    KubectlBackendStore, KubernetesBackend, BACKEND_SECRET_PREFIX, DEFAULT_STATE_NAMESPACE,
};
pub use config::TerraformConfig;
pub use context::RecipeContext;
pub use credentials::{CredentialValue, ProviderAttributes, ProviderCredentialSet, ScalarValue};
pub use error::{IacError, IacResult};
pub use inject::{CredentialInjector, InjectionReport};
pub use inspect::{inspect_downloaded_module, ModuleInspection, ParameterSchema, RequiredProvider};
pub use provider::{
    AwsCredential, AzureCredential, CredentialSource, ProviderConfigBuilder, ProviderRegistry,
    StaticCredentialSource,
};
pub use recipe::{
    resolve_secret, EnvironmentConfig, Params, RecipeDefinition, ResourceRecipe, SecretData,
    SecretMaterial, SecretReference,
};
pub use state::TerraformState;
pub use terraform::{TerraformResult, TerraformRunner};
