//! Input for one recipe execution.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use recipe_iac::{EnvironmentConfig, RecipeDefinition, ResourceRecipe, SecretMaterial};

/// Everything a deploy, delete or metadata call needs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecutionOptions {
    /// Working directory for this execution; must not be shared
    pub root_dir: PathBuf,
    /// Environment the recipe is registered on
    pub env_config: EnvironmentConfig,
    /// The recipe as registered on the environment
    pub env_recipe: RecipeDefinition,
    /// The resource invocation
    pub resource_recipe: ResourceRecipe,
    /// Secret material keyed by secret store name
    pub secrets: SecretMaterial,
    /// Registry environment overrides, e.g. private module registry tokens
    pub registry_env: BTreeMap<String, String>,
}

impl ExecutionOptions {
    pub fn new(env_recipe: RecipeDefinition, resource_recipe: ResourceRecipe) -> Self {
        Self {
            env_recipe,
            resource_recipe,
            ..Default::default()
        }
    }

    pub fn root_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.root_dir = dir.into();
        self
    }

    pub fn env_config(mut self, config: EnvironmentConfig) -> Self {
        self.env_config = config;
        self
    }

    pub fn secrets(mut self, secrets: SecretMaterial) -> Self {
        self.secrets = secrets;
        self
    }

    pub fn registry_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.registry_env.insert(key.into(), value.into());
        self
    }

    pub fn recipe_name(&self) -> &str {
        &self.env_recipe.name
    }

    pub fn resource_id(&self) -> &str {
        &self.resource_recipe.resource_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_from_yaml() {
        let options: ExecutionOptions = serde_yaml::from_str(
            r#"
envRecipe:
  name: mongodb
  templatePath: registry.example/modules/mongodatabases
  templateVersion: "1.0.0"
  parameters:
    sku: Standard
resourceRecipe:
  name: db
  resourceId: /planes/radius/local/resourceGroups/g/providers/Applications.Datastores/mongoDatabases/db
envConfig:
  recipeConfig:
    env:
      additionalVariables:
        REGION: westus
secrets:
  registry:
    type: generic
    data:
      token: Bearer abc
registryEnv:
  TF_TOKEN_registry_example: abc
"#,
        )
        .unwrap();

        assert_eq!(options.recipe_name(), "mongodb");
        assert_eq!(options.env_recipe.template_version, "1.0.0");
        assert_eq!(
            options.env_config.recipe_config.env.additional_variables["REGION"],
            "westus"
        );
        assert_eq!(options.secrets["registry"].data["token"], "Bearer abc");
        assert_eq!(options.registry_env["TF_TOKEN_registry_example"], "abc");
        assert!(options.root_dir.as_os_str().is_empty());
    }
}
