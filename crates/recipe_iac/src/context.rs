//! Recipe context: identity of the resource, application and environment a
//! recipe runs for, handed to modules that declare a `context` variable.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::provider::{aws_account, aws_region, azure_resource_group, azure_subscription};
use crate::recipe::{EnvironmentConfig, ResourceRecipe};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipeContext {
    pub resource: ResourceInfo,
    pub application: IdentityInfo,
    pub environment: IdentityInfo,
    pub runtime: RuntimeInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub azure: Option<AzureInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aws: Option<AwsInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceInfo {
    pub name: String,
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub connections: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IdentityInfo {
    pub name: String,
    pub id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kubernetes: Option<KubernetesInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubernetesInfo {
    pub namespace: String,
    pub environment_namespace: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AzureInfo {
    pub resource_group: IdentityInfo,
    pub subscription: AzureSubscription,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AzureSubscription {
    pub subscription_id: String,
    pub id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AwsInfo {
    pub region: String,
    pub account: String,
}

/// Last segment of a resource id.
fn id_name(id: &str) -> String {
    id.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string()
}

/// Resource type from an id such as
/// `/planes/radius/local/resourceGroups/g/providers/Applications.Datastores/mongoDatabases/db`.
fn id_type(id: &str) -> String {
    let segments: Vec<&str> = id.trim_matches('/').split('/').collect();
    let Some(pos) = segments
        .iter()
        .position(|s| s.eq_ignore_ascii_case("providers"))
    else {
        return String::new();
    };
    let rest = &segments[pos + 1..];
    // namespace followed by type/name pairs; keep the types
    let mut parts = Vec::new();
    if let Some(namespace) = rest.first() {
        parts.push(*namespace);
        parts.extend(rest[1..].iter().step_by(2));
    }
    parts.join("/")
}

impl RecipeContext {
    pub fn new(resource: &ResourceRecipe, env: &EnvironmentConfig) -> Self {
        let azure = env
            .providers
            .azure
            .as_ref()
            .filter(|p| !p.scope.is_empty())
            .map(|p| {
                let subscription_id = azure_subscription(&p.scope).unwrap_or_default().to_string();
                let resource_group = azure_resource_group(&p.scope).unwrap_or_default().to_string();
                AzureInfo {
                    resource_group: IdentityInfo {
                        id: if resource_group.is_empty() {
                            String::new()
                        } else {
                            format!("/subscriptions/{subscription_id}/resourceGroups/{resource_group}")
                        },
                        name: resource_group,
                    },
                    subscription: AzureSubscription {
                        id: format!("/subscriptions/{subscription_id}"),
                        subscription_id,
                    },
                }
            });

        let aws = env
            .providers
            .aws
            .as_ref()
            .filter(|p| !p.scope.is_empty())
            .map(|p| AwsInfo {
                region: aws_region(&p.scope).unwrap_or_default().to_string(),
                account: aws_account(&p.scope).unwrap_or_default().to_string(),
            });

        Self {
            resource: ResourceInfo {
                name: resource.name.clone(),
                id: resource.resource_id.clone(),
                kind: id_type(&resource.resource_id),
                connections: resource.connected_resources_properties.clone(),
            },
            application: IdentityInfo {
                name: id_name(&resource.application_id),
                id: resource.application_id.clone(),
            },
            environment: IdentityInfo {
                name: id_name(&resource.environment_id),
                id: resource.environment_id.clone(),
            },
            runtime: RuntimeInfo {
                kubernetes: env.runtime.kubernetes.as_ref().map(|k| KubernetesInfo {
                    namespace: k.namespace.clone(),
                    environment_namespace: k.environment_namespace.clone(),
                }),
            },
            azure,
            aws,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::recipe::{KubernetesRuntime, ProviderScope};

    #[test]
    fn test_context_from_resource() {
        let mut resource = ResourceRecipe {
            name: "db".into(),
            resource_id: "/planes/radius/local/resourceGroups/g/providers/Applications.Datastores/mongoDatabases/db".into(),
            application_id: "/planes/radius/local/resourceGroups/g/providers/Applications.Core/applications/shop".into(),
            environment_id: "/planes/radius/local/resourceGroups/g/providers/Applications.Core/environments/prod".into(),
            ..Default::default()
        };
        resource
            .connected_resources_properties
            .insert("cache".into(), json!({"host": "redis"}));

        let mut env = EnvironmentConfig::default();
        env.runtime.kubernetes = Some(KubernetesRuntime {
            namespace: "shop".into(),
            environment_namespace: "prod".into(),
        });
        env.providers.azure = Some(ProviderScope {
            scope: "/subscriptions/sub-1/resourceGroups/rg-1".into(),
        });

        let context = RecipeContext::new(&resource, &env);
        assert_eq!(context.resource.kind, "Applications.Datastores/mongoDatabases");
        assert_eq!(context.application.name, "shop");
        assert_eq!(context.environment.name, "prod");

        let value = serde_json::to_value(&context).unwrap();
        assert_eq!(value["runtime"]["kubernetes"]["environmentNamespace"], "prod");
        assert_eq!(value["azure"]["resourceGroup"]["id"], "/subscriptions/sub-1/resourceGroups/rg-1");
        assert_eq!(value["azure"]["subscription"]["subscriptionId"], "sub-1");
        assert_eq!(value["resource"]["connections"]["cache"]["host"], "redis");
        assert!(value.get("aws").is_none());
    }

    #[test]
    fn test_id_helpers() {
        assert_eq!(id_name(""), "");
        assert_eq!(id_name("/a/b/c/"), "c");
        assert_eq!(id_type("/no/providers-here"), "");
        assert_eq!(
            id_type("/planes/aws/aws/accounts/1/regions/r/providers/AWS.S3/Bucket/b"),
            "AWS.S3/Bucket"
        );
    }
}
