//! Terraform configuration generation.
//!
//! The configuration is written as JSON fragments into the working directory:
//!
//! | File                       | Content                                   |
//! |----------------------------|-------------------------------------------|
//! | `main.tf.json`             | the recipe module block                   |
//! | `provider.<name>.tf.json`  | one file per configured provider          |
//! | `backend.tf.json`          | state backend and required providers      |
//! | `context.tf.json`          | `locals` holding the recipe context       |
//! | `outputs.tf.json`          | `result` passthrough from the module      |
//!
//! Generation happens in two passes: the module block alone is enough to
//! download and inspect the module; providers, backend, context and outputs
//! are added once inspection has told us what the module needs.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::backend::KubernetesBackend;
use crate::context::RecipeContext;
use crate::error::{IacError, IacResult};
use crate::inspect::{RequiredProvider, RECIPE_CONTEXT_VARIABLE, RESULT_OUTPUT};
use crate::recipe::{RecipeDefinition, ResourceRecipe};

pub const MAIN_CONFIG_FILE: &str = "main.tf.json";
pub const BACKEND_CONFIG_FILE: &str = "backend.tf.json";
pub const CONTEXT_CONFIG_FILE: &str = "context.tf.json";
pub const OUTPUTS_CONFIG_FILE: &str = "outputs.tf.json";

/// Name of the local holding the recipe context.
const CONTEXT_LOCAL: &str = "recipe_context";

pub fn provider_config_file(provider: &str) -> String {
    format!("provider.{provider}.tf.json")
}

/// In-memory configuration, persisted with [`TerraformConfig::save`].
#[derive(Debug, Clone)]
pub struct TerraformConfig {
    working_dir: PathBuf,
    module_name: String,
    module: Map<String, Value>,
    providers: BTreeMap<String, Vec<Value>>,
    backend: Option<Value>,
    required_providers: BTreeMap<String, RequiredProvider>,
    context: Option<Value>,
    outputs: bool,
}

impl TerraformConfig {
    /// Module block for `definition`. Resource parameters override
    /// environment parameters of the same name.
    pub fn new(
        working_dir: impl Into<PathBuf>,
        definition: &RecipeDefinition,
        resource: &ResourceRecipe,
    ) -> IacResult<Self> {
        if definition.name.trim().is_empty() {
            return Err(IacError::InvalidRecipe("recipe name cannot be empty".to_string()));
        }
        if definition.template_path.trim().is_empty() {
            return Err(IacError::InvalidRecipe(format!(
                "recipe {} has no template path",
                definition.name
            )));
        }

        let mut module = Map::new();
        for (key, value) in definition.parameters.iter().chain(&resource.parameters) {
            module.insert(key.clone(), value.clone());
        }
        module.insert(
            "source".to_string(),
            Value::String(definition.template_path.clone()),
        );
        if !definition.template_version.is_empty() {
            module.insert(
                "version".to_string(),
                Value::String(definition.template_version.clone()),
            );
        }

        Ok(Self {
            working_dir: working_dir.into(),
            module_name: definition.name.clone(),
            module,
            providers: BTreeMap::new(),
            backend: None,
            required_providers: BTreeMap::new(),
            context: None,
            outputs: false,
        })
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    /// The module block as written to `main.tf.json`.
    pub fn module_block(&self) -> &Map<String, Value> {
        &self.module
    }

    pub fn providers(&self) -> &BTreeMap<String, Vec<Value>> {
        &self.providers
    }

    /// Add provider blocks and wire aliased providers into the module.
    pub fn add_providers(&mut self, providers: BTreeMap<String, Vec<Value>>) {
        self.providers.extend(providers);
        self.update_module_provider_aliases();
    }

    /// Pass `name.alias` providers to the module explicitly; unaliased
    /// providers are inherited.
    fn update_module_provider_aliases(&mut self) {
        let mut aliases = Map::new();
        for (name, entries) in &self.providers {
            for alias in entries
                .iter()
                .filter_map(|e| e.get("alias").and_then(Value::as_str))
            {
                let key = format!("{name}.{alias}");
                aliases.insert(key.clone(), Value::String(key));
            }
        }
        if aliases.is_empty() {
            self.module.remove("providers");
        } else {
            self.module
                .insert("providers".to_string(), Value::Object(aliases));
        }
    }

    /// Add the state backend and required providers. Returns the backend
    /// secret suffix.
    pub fn add_terraform_block(
        &mut self,
        backend: &KubernetesBackend,
        resource: &ResourceRecipe,
        required_providers: &BTreeMap<String, RequiredProvider>,
    ) -> String {
        let config = backend.build(resource);
        self.backend = Some(config.block);
        self.required_providers = required_providers
            .iter()
            .filter(|(_, p)| p.source.is_some())
            .map(|(name, p)| (name.clone(), p.clone()))
            .collect();
        config.secret_suffix
    }

    /// Pass the recipe context to the module's `context` variable.
    pub fn add_recipe_context(&mut self, context: &RecipeContext) -> IacResult<()> {
        self.context = Some(serde_json::to_value(context)?);
        self.module.insert(
            RECIPE_CONTEXT_VARIABLE.to_string(),
            Value::String(format!("${{local.{CONTEXT_LOCAL}}}")),
        );
        Ok(())
    }

    /// Expose the module's `result` output.
    pub fn add_outputs(&mut self) {
        self.outputs = true;
    }

    /// Every file this configuration consists of, with its content.
    pub fn documents(&self) -> IacResult<Vec<(String, Value)>> {
        let mut modules = Map::new();
        modules.insert(self.module_name.clone(), Value::Object(self.module.clone()));
        let mut documents = vec![(MAIN_CONFIG_FILE.to_string(), json!({ "module": modules }))];

        for (name, entries) in &self.providers {
            documents.push((
                provider_config_file(name),
                json!({ "provider": { name.as_str(): entries } }),
            ));
        }

        if let Some(backend) = &self.backend {
            let mut terraform = Map::new();
            terraform.insert("backend".to_string(), backend.clone());
            if !self.required_providers.is_empty() {
                terraform.insert(
                    "required_providers".to_string(),
                    serde_json::to_value(&self.required_providers)?,
                );
            }
            documents.push((
                BACKEND_CONFIG_FILE.to_string(),
                json!({ "terraform": terraform }),
            ));
        }

        if let Some(context) = &self.context {
            documents.push((
                CONTEXT_CONFIG_FILE.to_string(),
                json!({ "locals": { CONTEXT_LOCAL: context } }),
            ));
        }

        if self.outputs {
            documents.push((
                OUTPUTS_CONFIG_FILE.to_string(),
                json!({
                    "output": {
                        RESULT_OUTPUT: {
                            "value": format!("${{module.{}.{}}}", self.module_name, RESULT_OUTPUT),
                            "sensitive": true
                        }
                    }
                }),
            ));
        }

        Ok(documents)
    }

    /// Write every fragment to the working directory.
    pub fn save(&self) -> IacResult<Vec<PathBuf>> {
        fs::create_dir_all(&self.working_dir)?;
        let mut written = Vec::new();
        for (file, document) in self.documents()? {
            let path = self.working_dir.join(&file);
            write_private(&path, serde_json::to_string_pretty(&document)?.as_bytes())?;
            debug!("Wrote {:?}", path);
            written.push(path);
        }
        info!(
            "Saved configuration for recipe {} ({} file(s))",
            self.module_name,
            written.len()
        );
        Ok(written)
    }
}

/// Configuration holds credentials; keep it readable by the owner only.
fn write_private(path: &Path, content: &[u8]) -> IacResult<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(content)?;
    Ok(())
}
