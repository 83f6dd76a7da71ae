//! Static inspection of a downloaded module.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{IacError, IacResult};
use crate::hcl::{self, Block};

/// Module input variable holding the recipe context object.
pub const RECIPE_CONTEXT_VARIABLE: &str = "context";

/// Module output carrying the recipe result.
pub const RESULT_OUTPUT: &str = "result";

/// Manifest written by `terraform get`.
const MODULES_MANIFEST: &str = ".terraform/modules/modules.json";

/// Provider requirement discovered in a module.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredProvider {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Declared module input.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterSchema {
    pub name: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    pub required: bool,
    pub sensitive: bool,
}

/// Everything the generator needs to know about a module.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModuleInspection {
    pub module_dir: PathBuf,
    pub required_providers: BTreeMap<String, RequiredProvider>,
    pub parameters: BTreeMap<String, ParameterSchema>,
    pub context_var_exists: bool,
    pub result_output_exists: bool,
}

#[derive(Debug, Deserialize)]
struct ModulesManifest {
    #[serde(rename = "Modules", default)]
    modules: Vec<ManifestEntry>,
}

#[derive(Debug, Deserialize)]
struct ManifestEntry {
    #[serde(rename = "Key", default)]
    key: String,
    #[serde(rename = "Dir", default)]
    dir: String,
}

/// Locate the downloaded module `module_name` under `working_dir` and inspect it.
pub fn inspect_downloaded_module(working_dir: &Path, module_name: &str) -> IacResult<ModuleInspection> {
    let manifest_path = working_dir.join(MODULES_MANIFEST);
    let manifest: ModulesManifest = serde_json::from_str(&fs::read_to_string(&manifest_path).map_err(|e| {
        IacError::ModuleInspection(format!("cannot read {}: {e}", manifest_path.display()))
    })?)?;

    let entry = manifest
        .modules
        .iter()
        .find(|m| m.key == module_name)
        .ok_or_else(|| IacError::ModuleNotFound(module_name.to_string()))?;

    inspect_module_dir(&working_dir.join(&entry.dir))
}

/// Inspect the `.tf` and `.tf.json` files directly inside `dir`.
pub fn inspect_module_dir(dir: &Path) -> IacResult<ModuleInspection> {
    let mut inspection = ModuleInspection {
        module_dir: dir.to_path_buf(),
        ..Default::default()
    };

    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .collect();
    files.sort();

    for path in files {
        let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        if name.ends_with(".tf.json") {
            let document: Value = serde_json::from_str(&fs::read_to_string(&path)?)
                .map_err(|e| IacError::ModuleInspection(format!("{}: {e}", path.display())))?;
            collect_json(&document, &mut inspection);
        } else if name.ends_with(".tf") {
            let src = fs::read_to_string(&path)?;
            let body = hcl::parse(&src)
                .map_err(|e| IacError::ModuleInspection(format!("{}: {e}", path.display())))?;
            collect_hcl(&src, &body.blocks, &mut inspection);
        } else {
            continue;
        }
        debug!("Inspected {:?}", path);
    }

    inspection.context_var_exists = inspection.parameters.contains_key(RECIPE_CONTEXT_VARIABLE);
    Ok(inspection)
}

static QUOTED_FIELD: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#"\b(\w+)\s*=\s*"([^"]*)""#).ok());

/// First `<key> = "<value>"` inside an object expression.
fn quoted_field(expr: &str, key: &str) -> Option<String> {
    QUOTED_FIELD
        .as_ref()?
        .captures_iter(expr)
        .find(|c| &c[1] == key)
        .map(|c| c[2].to_string())
}

/// Provider implied by a resource type: everything before the first `_`.
fn implied_provider(resource_type: &str) -> &str {
    resource_type.split('_').next().unwrap_or(resource_type)
}

/// `aws.west` or `aws` to `aws`.
fn provider_reference(expr: &str) -> &str {
    expr.trim().split('.').next().unwrap_or(expr)
}

fn require(inspection: &mut ModuleInspection, name: &str) {
    if !name.is_empty() {
        inspection.required_providers.entry(name.to_string()).or_default();
    }
}

fn parse_literal(raw: &str) -> Value {
    let trimmed = raw.trim();
    serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(trimmed.to_string()))
}

fn collect_hcl(src: &str, blocks: &[Block], inspection: &mut ModuleInspection) {
    for block in blocks {
        match block.kind.as_str() {
            "terraform" => {
                for required in block.blocks.iter().filter(|b| b.kind == "required_providers") {
                    for attribute in &required.attributes {
                        let value = attribute.value(src);
                        let requirement = if value.starts_with('"') {
                            RequiredProvider {
                                source: None,
                                version: Some(hcl::unquote(value)),
                            }
                        } else {
                            RequiredProvider {
                                source: quoted_field(value, "source"),
                                version: quoted_field(value, "version"),
                            }
                        };
                        inspection
                            .required_providers
                            .insert(attribute.name.clone(), requirement);
                    }
                }
            }
            "provider" => {
                if let Some(name) = block.label(0) {
                    require(inspection, name);
                }
            }
            "resource" | "data" => {
                let provider = block
                    .attribute("provider")
                    .map(|a| provider_reference(a.value(src)).to_string())
                    .or_else(|| block.label(0).map(|t| implied_provider(t).to_string()));
                if let Some(provider) = provider {
                    require(inspection, &provider);
                }
            }
            "variable" => {
                let Some(name) = block.label(0) else { continue };
                let default = block.attribute("default").map(|a| parse_literal(a.value(src)));
                let schema = ParameterSchema {
                    name: name.to_string(),
                    kind: block.attribute("type").map(|a| a.value(src).trim().to_string()),
                    description: block.attribute("description").map(|a| hcl::unquote(a.value(src))),
                    required: default.is_none(),
                    default,
                    sensitive: block
                        .attribute("sensitive")
                        .is_some_and(|a| a.value(src).trim() == "true"),
                };
                inspection.parameters.insert(name.to_string(), schema);
            }
            "output" => {
                if block.label(0) == Some(RESULT_OUTPUT) {
                    inspection.result_output_exists = true;
                }
            }
            _ => {}
        }
    }
}

/// JSON syntax allows a block to be an object or an array of objects.
fn json_objects(value: &Value) -> Vec<&serde_json::Map<String, Value>> {
    match value {
        Value::Object(map) => vec![map],
        Value::Array(items) => items.iter().filter_map(Value::as_object).collect(),
        _ => Vec::new(),
    }
}

fn collect_json(document: &Value, inspection: &mut ModuleInspection) {
    if let Some(terraform) = document.get("terraform") {
        for block in json_objects(terraform) {
            let Some(required) = block.get("required_providers") else { continue };
            for providers in json_objects(required) {
                for (name, spec) in providers {
                    let requirement = match spec {
                        Value::String(version) => RequiredProvider {
                            source: None,
                            version: Some(version.clone()),
                        },
                        other => RequiredProvider {
                            source: other.get("source").and_then(Value::as_str).map(str::to_string),
                            version: other.get("version").and_then(Value::as_str).map(str::to_string),
                        },
                    };
                    inspection.required_providers.insert(name.clone(), requirement);
                }
            }
        }
    }

    if let Some(providers) = document.get("provider").and_then(Value::as_object) {
        for name in providers.keys() {
            require(inspection, name);
        }
    }

    for kind in ["resource", "data"] {
        let Some(types) = document.get(kind).and_then(Value::as_object) else { continue };
        for (resource_type, instances) in types {
            let explicit = instances
                .as_object()
                .into_iter()
                .flat_map(|m| m.values())
                .flat_map(json_objects)
                .find_map(|body| body.get("provider").and_then(Value::as_str).map(provider_reference));
            match explicit {
                Some(provider) => require(inspection, provider),
                None => require(inspection, implied_provider(resource_type)),
            }
        }
    }

    if let Some(variables) = document.get("variable").and_then(Value::as_object) {
        for (name, spec) in variables {
            let body = json_objects(spec).into_iter().next();
            let field = |key: &str| body.and_then(|b| b.get(key));
            let default = field("default").cloned();
            inspection.parameters.insert(
                name.clone(),
                ParameterSchema {
                    name: name.clone(),
                    kind: field("type").and_then(Value::as_str).map(str::to_string),
                    description: field("description").and_then(Value::as_str).map(str::to_string),
                    required: default.is_none(),
                    default,
                    sensitive: field("sensitive").and_then(Value::as_bool).unwrap_or(false),
                },
            );
        }
    }

    if document
        .get("output")
        .and_then(Value::as_object)
        .is_some_and(|o| o.contains_key(RESULT_OUTPUT))
    {
        inspection.result_output_exists = true;
    }
}

impl ModuleInspection {
    /// Parameter schema as returned by metadata calls.
    pub fn parameters_json(&self) -> Value {
        match serde_json::to_value(&self.parameters) {
            Ok(value) => value,
            Err(e) => {
                warn!("Failed to serialize module parameters: {}", e);
                Value::Object(Default::default())
            }
        }
    }
}
