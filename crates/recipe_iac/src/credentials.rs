//! Provider credential values.
//!
//! Credential attributes are either scalars or one level of nested
//! key/value groups (for example `features {}` or
//! `assume_role_with_web_identity { ... }`).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

/// A single scalar attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScalarValue {
    Bool(bool),
    Number(Number),
    String(String),
}

/// A provider attribute: a scalar, or a nested group of scalars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CredentialValue {
    Bool(bool),
    Number(Number),
    String(String),
    Group(BTreeMap<String, ScalarValue>),
}

/// Attributes for one provider block.
pub type ProviderAttributes = BTreeMap<String, CredentialValue>;

impl ScalarValue {
    pub fn to_json(&self) -> Value {
        match self {
            Self::Bool(b) => Value::Bool(*b),
            Self::Number(n) => Value::Number(n.clone()),
            Self::String(s) => Value::String(s.clone()),
        }
    }

    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(Self::Bool(*b)),
            Value::Number(n) => Some(Self::Number(n.clone())),
            Value::String(s) => Some(Self::String(s.clone())),
            _ => None,
        }
    }
}

impl CredentialValue {
    pub fn string(value: impl Into<String>) -> Self {
        Self::String(value.into())
    }

    pub fn group<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, ScalarValue)>,
        K: Into<String>,
    {
        Self::Group(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn is_group(&self) -> bool {
        matches!(self, Self::Group(_))
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::Bool(b) => Value::Bool(*b),
            Self::Number(n) => Value::Number(n.clone()),
            Self::String(s) => Value::String(s.clone()),
            Self::Group(entries) => Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }

    /// Convert from JSON. Arrays, nulls and objects nested more than one
    /// level deep have no credential representation.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(Self::Bool(*b)),
            Value::Number(n) => Some(Self::Number(n.clone())),
            Value::String(s) => Some(Self::String(s.clone())),
            Value::Object(map) => map
                .iter()
                .map(|(k, v)| ScalarValue::from_json(v).map(|s| (k.clone(), s)))
                .collect::<Option<BTreeMap<_, _>>>()
                .map(Self::Group),
            _ => None,
        }
    }
}

impl From<&str> for CredentialValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for CredentialValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<bool> for CredentialValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Render provider attributes as a JSON object.
pub fn attributes_to_json(attributes: &ProviderAttributes) -> Value {
    Value::Object(
        attributes
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect::<Map<_, _>>(),
    )
}

/// Platform-managed credentials for every provider that could be built.
/// Ephemeral: rebuilt for each execution and never written anywhere except
/// into the tool configuration.
#[derive(Debug, Clone, Default)]
pub struct ProviderCredentialSet {
    providers: BTreeMap<String, ProviderAttributes>,
}

impl ProviderCredentialSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert attributes for `provider`; empty attribute maps are ignored.
    pub fn insert(&mut self, provider: impl Into<String>, attributes: ProviderAttributes) {
        if !attributes.is_empty() {
            self.providers.insert(provider.into(), attributes);
        }
    }

    pub fn remove(&mut self, provider: &str) -> Option<ProviderAttributes> {
        self.providers.remove(provider)
    }

    pub fn get(&self, provider: &str) -> Option<&ProviderAttributes> {
        self.providers.get(provider)
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ProviderAttributes)> {
        self.providers.iter()
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.keys().map(String::as_str).collect()
    }
}
