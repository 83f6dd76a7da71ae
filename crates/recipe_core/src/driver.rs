//! Per-call working directories and recipe output shaping.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use recipe_iac::inspect::RESULT_OUTPUT;
use recipe_iac::{ParameterSchema, TerraformState};
use recipe_install::Cancellation;

use crate::error::{CoreError, CoreResult};
use crate::executor::{ExecutionOutcome, RecipeExecutor};
use crate::options::ExecutionOptions;

/// Where the deployed recipe came from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipeStatus {
    pub template_path: String,
    pub template_version: String,
}

/// What a deployed recipe reports back to the caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipeOutput {
    pub values: BTreeMap<String, Value>,
    pub secrets: BTreeMap<String, Value>,
    /// Resource ids the module reported itself
    pub resources: Vec<String>,
    /// Addresses of managed resources found in the state
    pub deployed_resources: Vec<String>,
    pub status: RecipeStatus,
}

impl RecipeOutput {
    /// Shape the state's `result` output. A module without one still reports
    /// its deployed resources.
    pub fn from_state(state: &TerraformState, options: &ExecutionOptions) -> CoreResult<Self> {
        let mut output = Self {
            deployed_resources: state.resource_addresses(),
            status: RecipeStatus {
                template_path: options.env_recipe.template_path.clone(),
                template_version: options.env_recipe.template_version.clone(),
            },
            ..Default::default()
        };

        let Some(result) = state.output(RESULT_OUTPUT) else {
            return Ok(output);
        };
        let Value::Object(result) = &result.value else {
            return Err(CoreError::Serialization(format!(
                "output {} must be an object",
                RESULT_OUTPUT
            )));
        };

        if let Some(values) = result.get("values") {
            output.values = object_entries(values, "values")?;
        }
        if let Some(secrets) = result.get("secrets") {
            output.secrets = object_entries(secrets, "secrets")?;
        }
        if let Some(resources) = result.get("resources") {
            output.resources = serde_json::from_value(resources.clone()).map_err(|e| {
                CoreError::Serialization(format!("invalid resources in recipe output: {}", e))
            })?;
        }
        Ok(output)
    }
}

fn object_entries(value: &Value, field: &str) -> CoreResult<BTreeMap<String, Value>> {
    match value {
        Value::Object(map) => Ok(map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
        Value::Null => Ok(BTreeMap::new()),
        _ => Err(CoreError::Serialization(format!(
            "{} in recipe output must be an object",
            field
        ))),
    }
}

/// Lower-cased resource id with every other character replaced by `-`.
pub fn normalize_resource_id(resource_id: &str) -> String {
    let normalized: String = resource_id
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    normalized.trim_matches('-').to_string()
}

/// Runs each call in its own directory under the execution root.
pub struct RecipeDriver {
    executor: RecipeExecutor,
    execution_root: PathBuf,
}

impl RecipeDriver {
    pub fn new(executor: RecipeExecutor) -> Self {
        let execution_root = executor.config().execution_root.clone();
        Self {
            executor,
            execution_root,
        }
    }

    pub fn execution_root(&self) -> &Path {
        &self.execution_root
    }

    /// Deploy and shape the recipe output.
    pub async fn execute(
        &self,
        options: ExecutionOptions,
        cancel: &Cancellation,
    ) -> CoreResult<RecipeOutput> {
        let (dir, options) = self.prepare(options)?;
        let result = self.executor.deploy(&options, cancel).await;
        cleanup(&dir);

        match result?.outcome {
            ExecutionOutcome::Deployed { state, .. } => RecipeOutput::from_state(&state, &options),
            other => Err(unexpected(other)),
        }
    }

    /// Destroy. Returns whether anything was destroyed.
    pub async fn delete(&self, options: ExecutionOptions, cancel: &Cancellation) -> CoreResult<bool> {
        let (dir, options) = self.prepare(options)?;
        let result = self.executor.delete(&options, cancel).await;
        cleanup(&dir);

        match result?.outcome {
            ExecutionOutcome::Deleted { destroyed } => Ok(destroyed),
            other => Err(unexpected(other)),
        }
    }

    /// Parameters declared by the recipe's module.
    pub async fn get_metadata(
        &self,
        options: ExecutionOptions,
        cancel: &Cancellation,
    ) -> CoreResult<BTreeMap<String, ParameterSchema>> {
        let (dir, options) = self.prepare(options)?;
        let result = self.executor.get_metadata(&options, cancel).await;
        cleanup(&dir);

        match result?.outcome {
            ExecutionOutcome::Metadata { parameters } => Ok(parameters),
            other => Err(unexpected(other)),
        }
    }

    fn prepare(&self, mut options: ExecutionOptions) -> CoreResult<(PathBuf, ExecutionOptions)> {
        let dir = self.execution_root.join(format!(
            "{}-{}",
            normalize_resource_id(options.resource_id()),
            Uuid::new_v4()
        ));
        fs::create_dir_all(&dir)?;
        info!("Executing recipe {} in {:?}", options.recipe_name(), dir);
        options.root_dir = dir.clone();
        Ok((dir, options))
    }
}

fn cleanup(dir: &Path) {
    match fs::remove_dir_all(dir) {
        Ok(()) => debug!("Removed execution directory {:?}", dir),
        Err(e) => warn!("Failed to remove execution directory {:?}: {}", dir, e),
    }
}

fn unexpected(outcome: ExecutionOutcome) -> CoreError {
    CoreError::Serialization(format!("unexpected execution outcome: {:?}", outcome))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_normalize_resource_id() {
        assert_eq!(
            normalize_resource_id(
                "/planes/radius/local/resourceGroups/G1/providers/Applications.Datastores/mongoDatabases/DB"
            ),
            "planes-radius-local-resourcegroups-g1-providers-applications-datastores-mongodatabases-db"
        );
        assert_eq!(normalize_resource_id(""), "");
    }

    #[test]
    fn test_output_from_result() {
        let state = TerraformState::parse(
            &json!({
                "format_version": "1.0",
                "values": {
                    "outputs": {
                        "result": {
                            "sensitive": true,
                            "value": {
                                "values": {"host": "db.example", "port": 10255},
                                "secrets": {"connectionString": "mongodb://u:p@db.example"},
                                "resources": ["/subscriptions/s/resourceGroups/rg/providers/Microsoft.DocumentDB/databaseAccounts/db"]
                            }
                        }
                    },
                    "root_module": {
                        "resources": [],
                        "child_modules": [{
                            "address": "module.mongodb",
                            "resources": [
                                {"address": "module.mongodb.azurerm_cosmosdb_account.db", "mode": "managed", "type": "azurerm_cosmosdb_account", "name": "db"},
                                {"address": "module.mongodb.data.azurerm_client_config.current", "mode": "data", "type": "azurerm_client_config", "name": "current"}
                            ]
                        }]
                    }
                }
            })
            .to_string(),
        )
        .unwrap();

        let mut options = ExecutionOptions::default();
        options.env_recipe.template_path = "registry.example/modules/mongodatabases".into();
        options.env_recipe.template_version = "1.0.0".into();

        let output = RecipeOutput::from_state(&state, &options).unwrap();
        assert_eq!(output.values["host"], json!("db.example"));
        assert_eq!(output.values["port"], json!(10255));
        assert_eq!(output.secrets["connectionString"], json!("mongodb://u:p@db.example"));
        assert_eq!(output.resources.len(), 1);
        assert_eq!(
            output.deployed_resources,
            vec!["module.mongodb.azurerm_cosmosdb_account.db".to_string()]
        );
        assert_eq!(output.status.template_version, "1.0.0");
    }

    #[test]
    fn test_output_without_result() {
        let output =
            RecipeOutput::from_state(&TerraformState::default(), &ExecutionOptions::default()).unwrap();
        assert!(output.values.is_empty());
        assert!(output.deployed_resources.is_empty());
    }

    #[test]
    fn test_result_must_be_object() {
        let state = TerraformState::parse(
            &json!({"values": {"outputs": {"result": {"value": "text"}}, "root_module": {}}}).to_string(),
        )
        .unwrap();
        assert!(matches!(
            RecipeOutput::from_state(&state, &ExecutionOptions::default()),
            Err(CoreError::Serialization(_))
        ));
    }
}
