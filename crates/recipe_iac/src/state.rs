//! Tool state as reported by `terraform show -json`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{IacError, IacResult};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TerraformState {
    #[serde(default)]
    pub format_version: String,
    #[serde(default)]
    pub terraform_version: String,
    #[serde(default)]
    pub values: Option<StateValues>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateValues {
    #[serde(default)]
    pub outputs: BTreeMap<String, StateOutput>,
    #[serde(default)]
    pub root_module: StateModule,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateOutput {
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub sensitive: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateModule {
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub resources: Vec<StateResource>,
    #[serde(default)]
    pub child_modules: Vec<StateModule>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateResource {
    pub address: String,
    #[serde(default)]
    pub mode: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub provider_name: String,
    #[serde(default)]
    pub values: Value,
}

impl TerraformState {
    /// Parse `show -json` output. An empty document means there is no state.
    pub fn parse(json: &str) -> IacResult<Self> {
        if json.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(json).map_err(|e| IacError::InvalidState(e.to_string()))
    }

    pub fn output(&self, name: &str) -> Option<&StateOutput> {
        self.values.as_ref().and_then(|v| v.outputs.get(name))
    }

    /// Addresses of every managed resource, child modules included.
    pub fn resource_addresses(&self) -> Vec<String> {
        fn collect(module: &StateModule, out: &mut Vec<String>) {
            out.extend(
                module
                    .resources
                    .iter()
                    .filter(|r| r.mode != "data")
                    .map(|r| r.address.clone()),
            );
            for child in &module.child_modules {
                collect(child, out);
            }
        }

        let mut addresses = Vec::new();
        if let Some(values) = &self.values {
            collect(&values.root_module, &mut addresses);
        }
        addresses
    }
}
