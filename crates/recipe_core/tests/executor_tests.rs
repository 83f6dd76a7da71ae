//! Integration tests for the recipe execution flows.
//!
//! The tool is scripted through `MockRunner`; `terraform get` is simulated by
//! seeding the downloaded module before the run.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use mockall::mock;
use serde_json::{json, Value};

use recipe_core::{
    CoreError, EngineConfig, EnvironmentComposer, ExecutionOptions, ExecutionOutcome,
    ExecutionState, Flow, Phase, RecipeDriver, RecipeExecutor,
};
use recipe_iac::recipe::{
    ModuleRegistrySettings, ProviderMirrorSettings, RegistryAuthentication, VersionSettings,
};
use recipe_iac::{
    secret_name, secret_suffix, AzureCredential, BackendStore, EnvironmentConfig, IacError,
    IacResult, InMemoryBackendStore, RecipeDefinition, ResourceRecipe, SecretData,
    SecretMaterial, SecretReference, StaticCredentialSource, DEFAULT_STATE_NAMESPACE,
};
use recipe_install::{
    cancellation, Cancellation, InstallError, InstallResult, InstallSpec, Installer, Platform,
    StaticTransport, ToolInstaller,
};
use recipe_runner::{MockResponse, MockRunner};

const RESOURCE_ID: &str =
    "/planes/radius/local/resourceGroups/shop/providers/Applications.Datastores/mongoDatabases/db";
const TEMPLATE_PATH: &str = "registry.example/modules/mongodatabases:v1";

const MODULE_MAIN_TF: &str = r#"terraform {
  required_providers {
    azurerm = {
      source  = "hashicorp/azurerm"
      version = "~> 3.0"
    }
  }
}

provider "azurerm" {
  skip_provider_registration = true
}

variable "context" {
  description = "Recipe context"
  type        = any
}

variable "sku" {
  type    = string
  default = "Standard"
}

resource "azurerm_cosmosdb_account" "db" {
  name = "db"
}

output "result" {
  value     = {}
  sensitive = true
}
"#;

const ENVIRONMENT_YAML: &str = r#"
runtime:
  kubernetes:
    namespace: shop
    environmentNamespace: shop-env
providers:
  azure:
    scope: /subscriptions/sub-1/resourceGroups/rg-1
"#;

/// Writes the binary the way a real install would.
struct FakeInstaller;

#[async_trait]
impl ToolInstaller for FakeInstaller {
    async fn install(&self, spec: &InstallSpec, _cancel: &Cancellation) -> InstallResult<PathBuf> {
        fs::create_dir_all(&spec.install_dir)?;
        let binary = spec.install_dir.join("terraform");
        fs::write(&binary, "#!/bin/sh\n")?;
        Ok(binary)
    }
}

mock! {
    pub Store {}

    #[async_trait]
    impl BackendStore for Store {
        async fn secret_exists(&self, namespace: &str, name: &str) -> IacResult<bool>;
        async fn delete_secret(&self, namespace: &str, name: &str) -> IacResult<()>;
    }
}

fn definition() -> RecipeDefinition {
    RecipeDefinition {
        name: "mongodb".into(),
        template_path: TEMPLATE_PATH.into(),
        template_version: "1.0.0".into(),
        parameters: [("sku".to_string(), json!("Standard"))].into(),
        resource_type: "Applications.Datastores/mongoDatabases".into(),
    }
}

fn resource() -> ResourceRecipe {
    ResourceRecipe {
        name: "db".into(),
        resource_id: RESOURCE_ID.into(),
        application_id: "/planes/radius/local/resourceGroups/shop/providers/Applications.Core/applications/shop".into(),
        environment_id: "/planes/radius/local/resourceGroups/shop/providers/Applications.Core/environments/prod".into(),
        parameters: BTreeMap::new(),
        connected_resources_properties: BTreeMap::new(),
    }
}

fn options(root: &Path) -> ExecutionOptions {
    let env: EnvironmentConfig = serde_yaml::from_str(ENVIRONMENT_YAML).unwrap();
    ExecutionOptions::new(definition(), resource())
        .root_dir(root)
        .env_config(env)
}

/// Lay out the module as `terraform get` would have.
fn seed_module(root: &Path) {
    let module_dir = root.join(".terraform/modules/mongodb");
    fs::create_dir_all(&module_dir).unwrap();
    fs::write(module_dir.join("main.tf"), MODULE_MAIN_TF).unwrap();
    fs::write(
        root.join(".terraform/modules/modules.json"),
        r#"{"Modules":[{"Key":"","Source":"","Dir":"."},{"Key":"mongodb","Source":"registry.example/modules/mongodatabases:v1","Dir":".terraform/modules/mongodb"}]}"#,
    )
    .unwrap();
}

fn state_json() -> String {
    json!({
        "format_version": "1.0",
        "terraform_version": "1.6.6",
        "values": {
            "outputs": {
                "result": {"sensitive": true, "value": {"values": {"host": "db.example"}}}
            },
            "root_module": {
                "child_modules": [{
                    "address": "module.mongodb",
                    "resources": [{
                        "address": "module.mongodb.azurerm_cosmosdb_account.db",
                        "mode": "managed",
                        "type": "azurerm_cosmosdb_account",
                        "name": "db"
                    }]
                }]
            }
        }
    })
    .to_string()
}

fn credentials() -> Arc<StaticCredentialSource> {
    Arc::new(
        StaticCredentialSource::new().with_azure(AzureCredential::ServicePrincipal {
            tenant_id: "tenant-1".into(),
            client_id: "client-1".into(),
            client_secret: "s3cret".into(),
        }),
    )
}

fn state_secret() -> String {
    secret_name(&secret_suffix(RESOURCE_ID))
}

fn executor(
    config: EngineConfig,
    runner: &MockRunner,
    installer: Arc<dyn ToolInstaller>,
    store: Arc<dyn BackendStore>,
) -> RecipeExecutor {
    RecipeExecutor::new(config, Arc::new(runner.clone()), installer, store, credentials())
        .with_composer(EnvironmentComposer::with_base_env(BTreeMap::new()).cert_bundles(vec![]))
}

fn read_json(path: PathBuf) -> Value {
    serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
}

/// Test a full deploy: generated configuration, command order and backend check.
#[tokio::test]
async fn test_deploy_mongodb() {
    let dir = tempfile::tempdir().unwrap();
    seed_module(dir.path());
    let runner = MockRunner::new().respond_to("show", MockResponse::success(state_json()));
    let store = Arc::new(InMemoryBackendStore::new());
    store.insert(DEFAULT_STATE_NAMESPACE, &state_secret());

    let report = executor(EngineConfig::default(), &runner, Arc::new(FakeInstaller), store)
        .deploy(&options(dir.path()), &Cancellation::never())
        .await
        .unwrap();

    assert_eq!(runner.subcommands(), vec!["version", "get", "init", "apply", "show"]);
    assert_eq!(report.final_state, ExecutionState::Done);
    assert_eq!(
        report.history,
        vec![
            ExecutionState::NotStarted,
            ExecutionState::Installed,
            ExecutionState::ConfigGenerated,
            ExecutionState::Initialized,
            ExecutionState::Applied,
            ExecutionState::Verified,
            ExecutionState::Done,
        ]
    );
    match report.outcome {
        ExecutionOutcome::Deployed { state, secret_name } => {
            assert_eq!(secret_name, state_secret());
            assert!(secret_name.starts_with("tfstate-default-"));
            assert_eq!(
                state.resource_addresses(),
                vec!["module.mongodb.azurerm_cosmosdb_account.db".to_string()]
            );
        }
        other => panic!("unexpected outcome {:?}", other),
    }

    let main = read_json(dir.path().join("main.tf.json"));
    let module = &main["module"]["mongodb"];
    assert_eq!(module["source"], json!(TEMPLATE_PATH));
    assert_eq!(module["version"], json!("1.0.0"));
    assert_eq!(module["sku"], json!("Standard"));
    assert_eq!(module["context"], json!("${local.recipe_context}"));

    let provider = read_json(dir.path().join("provider.azurerm.tf.json"));
    let azurerm = &provider["provider"]["azurerm"][0];
    assert_eq!(azurerm["subscription_id"], json!("sub-1"));
    assert_eq!(azurerm["tenant_id"], json!("tenant-1"));
    assert_eq!(azurerm["client_secret"], json!("s3cret"));
    assert_eq!(azurerm["features"], json!({}));

    let backend = read_json(dir.path().join("backend.tf.json"));
    assert_eq!(
        backend["terraform"]["backend"]["kubernetes"]["namespace"],
        json!(DEFAULT_STATE_NAMESPACE)
    );
    assert_eq!(
        backend["terraform"]["backend"]["kubernetes"]["secret_suffix"],
        json!(secret_suffix(RESOURCE_ID))
    );

    // The module's own provider block received the platform credentials.
    let module_tf = fs::read_to_string(dir.path().join(".terraform/modules/mongodb/main.tf")).unwrap();
    assert!(module_tf.contains("skip_provider_registration = true"));
    assert!(module_tf.contains("tenant-1"));

    // Tool commands run with an isolated, composed environment.
    let apply = &runner.get_subcommand_calls("apply")[0];
    assert!(apply.clear_env);
    assert_eq!(apply.env["ARM_SUBSCRIPTION_ID"], "sub-1");
    assert_eq!(apply.env["ARM_CLIENT_SECRET"], "s3cret");
    assert_eq!(apply.workdir.as_deref(), Some(dir.path()));
    assert!(apply.program.ends_with("terraform"));

    assert!(!dir.path().join(".install").exists());
}

/// Test that deleting a recipe that was never deployed skips destroy.
#[tokio::test]
async fn test_delete_before_deploy() {
    let dir = tempfile::tempdir().unwrap();
    seed_module(dir.path());
    let runner = MockRunner::new();
    let store = Arc::new(InMemoryBackendStore::new());

    let report = executor(EngineConfig::default(), &runner, Arc::new(FakeInstaller), store)
        .delete(&options(dir.path()), &Cancellation::never())
        .await
        .unwrap();

    assert!(matches!(report.outcome, ExecutionOutcome::Deleted { destroyed: false }));
    assert!(!runner.was_called("destroy"));
    assert!(!runner.was_called("init"));
    assert_eq!(report.final_state, ExecutionState::Done);
    assert_eq!(
        report.history,
        vec![
            ExecutionState::NotStarted,
            ExecutionState::Installed,
            ExecutionState::ConfigGenerated,
            ExecutionState::Done,
        ]
    );
}

/// Test a delete that destroys and removes the state secret.
#[tokio::test]
async fn test_delete_destroys_and_removes_secret() {
    let dir = tempfile::tempdir().unwrap();
    seed_module(dir.path());
    let runner = MockRunner::new();
    let store = Arc::new(InMemoryBackendStore::new());
    store.insert(DEFAULT_STATE_NAMESPACE, &state_secret());

    let report = executor(EngineConfig::default(), &runner, Arc::new(FakeInstaller), store.clone())
        .delete(&options(dir.path()), &Cancellation::never())
        .await
        .unwrap();

    assert!(matches!(report.outcome, ExecutionOutcome::Deleted { destroyed: true }));
    assert_eq!(runner.subcommands(), vec!["version", "get", "init", "destroy"]);
    assert!(!store.contains(DEFAULT_STATE_NAMESPACE, &state_secret()));

    let destroy = &runner.get_subcommand_calls("destroy")[0];
    assert!(destroy.args.contains(&"-auto-approve".to_string()));
    assert!(destroy.args.contains(&"-lock-timeout=60s".to_string()));
}

/// Test that tool commands see the private registry configuration and that it
/// is removed once the flow finishes.
#[tokio::test]
async fn test_private_registry_configuration() {
    let dir = tempfile::tempdir().unwrap();
    seed_module(dir.path());
    let runner = MockRunner::new().respond_to("show", MockResponse::success(state_json()));
    let store = Arc::new(InMemoryBackendStore::new());
    store.insert(DEFAULT_STATE_NAMESPACE, &state_secret());

    let mut secrets = SecretMaterial::new();
    secrets.insert(
        "registry-secrets".into(),
        SecretData {
            kind: "generic".into(),
            data: [("token".to_string(), "glpat-123".to_string())].into(),
        },
    );
    let mut options = options(dir.path()).secrets(secrets);
    let terraform = &mut options.env_config.recipe_config.terraform;
    terraform.provider_mirror = Some(ProviderMirrorSettings {
        url: "https://mirror.example/providers".into(),
    });
    terraform.module_registries.insert(
        "internal".into(),
        ModuleRegistrySettings {
            url: "registry.example/modules".into(),
            authentication: RegistryAuthentication {
                token: Some(SecretReference {
                    source: "registry-secrets".into(),
                    key: "token".into(),
                }),
                additional_hosts: vec![],
            },
        },
    );

    executor(EngineConfig::default(), &runner, Arc::new(FakeInstaller), store)
        .deploy(&options, &Cancellation::never())
        .await
        .unwrap();

    let rc = dir.path().join(".terraformrc");
    for call in runner.get_calls() {
        assert_eq!(call.env["TF_CLI_CONFIG_FILE"], rc.to_string_lossy());
    }
    let get = &runner.get_subcommand_calls("get")[0];
    assert_eq!(get.env["TF_TOKEN_registry_example"], "glpat-123");
    assert_eq!(get.env["GIT_CONFIG_GLOBAL"], dir.path().join(".gitconfig").to_string_lossy());
    assert_eq!(get.env["HOME"], dir.path().to_string_lossy());

    assert!(!rc.exists());
    assert!(!dir.path().join(".gitconfig").exists());
}

/// Test that an unreachable registry is tried exactly three times.
#[tokio::test(start_paused = true)]
async fn test_unreachable_registry() {
    let dir = tempfile::tempdir().unwrap();
    let runner = MockRunner::new();
    let transport = StaticTransport::new();
    let installer = Installer::new()
        .with_transport(Arc::new(transport.clone()))
        .with_platform(Platform::new("linux", "amd64"));

    let mut options = options(dir.path());
    options.env_config.recipe_config.terraform.version = Some(VersionSettings {
        version: Some("1.6.6".into()),
        releases_api_base_url: Some("https://registry.example/mirror".into()),
        ..Default::default()
    });

    let err = executor(
        EngineConfig::default(),
        &runner,
        Arc::new(installer),
        Arc::new(InMemoryBackendStore::new()),
    )
    .deploy(&options, &Cancellation::never())
    .await
    .unwrap_err();

    assert_eq!(err.phase(), Some(Phase::Install));
    assert!(matches!(
        err.root(),
        CoreError::Install(InstallError::RetriesExhausted { attempts: 3, .. })
    ));
    assert_eq!(
        transport.request_count("https://registry.example/mirror/terraform/index.json"),
        3
    );
    assert_eq!(runner.call_count(), 0);
    assert!(!dir.path().join(".install").exists());
}

/// Test that a successful apply without a state secret is its own failure.
#[tokio::test]
async fn test_state_not_persisted() {
    let dir = tempfile::tempdir().unwrap();
    seed_module(dir.path());
    let runner = MockRunner::new();

    let err = executor(
        EngineConfig::default(),
        &runner,
        Arc::new(FakeInstaller),
        Arc::new(InMemoryBackendStore::new()),
    )
    .deploy(&options(dir.path()), &Cancellation::never())
    .await
    .unwrap_err();

    assert!(runner.was_called("apply"));
    assert!(err.is_state_not_persisted());
    assert_eq!(err.phase(), Some(Phase::VerifyBackend));
    match &err {
        CoreError::Execution { history, .. } => {
            assert_eq!(history.last(), Some(&ExecutionState::Failed));
            assert!(history.contains(&ExecutionState::Applied));
        }
        other => panic!("unexpected error {:?}", other),
    }
}

/// Test that init failures name the flow they happened in.
#[tokio::test]
async fn test_init_failure_carries_flow() {
    let failing = || {
        MockRunner::new().respond_to(
            "init",
            MockResponse::failure(1, "Error: Failed to query available provider packages"),
        )
    };

    let dir = tempfile::tempdir().unwrap();
    seed_module(dir.path());
    let runner = failing();
    let err = executor(
        EngineConfig::default(),
        &runner,
        Arc::new(FakeInstaller),
        Arc::new(InMemoryBackendStore::new()),
    )
    .deploy(&options(dir.path()), &Cancellation::never())
    .await
    .unwrap_err();

    assert!(!runner.was_called("apply"));
    assert_eq!(err.phase(), Some(Phase::Init));
    assert!(err
        .to_string()
        .starts_with("apply flow: init failed for recipe mongodb"));
    assert!(err.to_string().contains(RESOURCE_ID));
    assert!(matches!(err.root(), CoreError::ToolFailed { exit_code: 1, .. }));

    let dir = tempfile::tempdir().unwrap();
    seed_module(dir.path());
    let runner = failing();
    let store = Arc::new(InMemoryBackendStore::new());
    store.insert(DEFAULT_STATE_NAMESPACE, &state_secret());
    let err = executor(EngineConfig::default(), &runner, Arc::new(FakeInstaller), store)
        .delete(&options(dir.path()), &Cancellation::never())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        CoreError::Execution {
            flow: Flow::Delete,
            phase: Phase::Init,
            ..
        }
    ));
    assert!(err.to_string().starts_with("destroy flow: init failed"));
    assert!(!runner.was_called("destroy"));
}

/// Test that a failed backend lookup does not stop a delete.
#[tokio::test]
async fn test_delete_lookup_error_proceeds() {
    let dir = tempfile::tempdir().unwrap();
    seed_module(dir.path());
    let runner = MockRunner::new();

    let mut store = MockStore::new();
    store
        .expect_secret_exists()
        .returning(|_, _| Err(IacError::BackendLookup("connection refused".into())));
    store.expect_delete_secret().times(1).returning(|_, _| Ok(()));

    let report = executor(EngineConfig::default(), &runner, Arc::new(FakeInstaller), Arc::new(store))
        .delete(&options(dir.path()), &Cancellation::never())
        .await
        .unwrap();

    assert!(matches!(report.outcome, ExecutionOutcome::Deleted { destroyed: true }));
    assert!(runner.was_called("destroy"));
}

/// Test that failing to remove the state secret fails the delete.
#[tokio::test]
async fn test_delete_secret_failure_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    seed_module(dir.path());
    let runner = MockRunner::new();

    let mut store = MockStore::new();
    store.expect_secret_exists().returning(|_, _| Ok(true));
    store
        .expect_delete_secret()
        .returning(|_, _| Err(IacError::BackendDelete("forbidden".into())));

    let err = executor(EngineConfig::default(), &runner, Arc::new(FakeInstaller), Arc::new(store))
        .delete(&options(dir.path()), &Cancellation::never())
        .await
        .unwrap_err();

    assert!(runner.was_called("destroy"));
    assert_eq!(err.phase(), Some(Phase::DeleteBackend));
    assert!(matches!(
        err.root(),
        CoreError::Iac(IacError::BackendDelete(_))
    ));
}

/// Test that metadata only downloads and inspects the module.
#[tokio::test]
async fn test_metadata() {
    let dir = tempfile::tempdir().unwrap();
    seed_module(dir.path());
    let runner = MockRunner::new();

    let report = executor(
        EngineConfig::default(),
        &runner,
        Arc::new(FakeInstaller),
        Arc::new(InMemoryBackendStore::new()),
    )
    .get_metadata(&options(dir.path()), &Cancellation::never())
    .await
    .unwrap();

    assert_eq!(runner.subcommands(), vec!["version", "get"]);
    match report.outcome {
        ExecutionOutcome::Metadata { parameters } => {
            assert!(parameters["context"].required);
            assert!(!parameters["sku"].required);
            assert_eq!(parameters["sku"].default, Some(json!("Standard")));
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert!(!dir.path().join("provider.azurerm.tf.json").exists());
}

/// Test that the version probe is retried before giving up.
#[tokio::test(start_paused = true)]
async fn test_install_verification() {
    let dir = tempfile::tempdir().unwrap();
    seed_module(dir.path());
    let runner = MockRunner::new()
        .respond_to("version", MockResponse::failure(126, "text file busy"))
        .respond_to("version", MockResponse::failure(126, "text file busy"))
        .respond_to("version", MockResponse::success("Terraform v1.6.6"))
        .respond_to("show", MockResponse::success(state_json()));
    let store = Arc::new(InMemoryBackendStore::new());
    store.insert(DEFAULT_STATE_NAMESPACE, &state_secret());

    executor(EngineConfig::default(), &runner, Arc::new(FakeInstaller), store)
        .deploy(&options(dir.path()), &Cancellation::never())
        .await
        .unwrap();
    assert_eq!(runner.get_subcommand_calls("version").len(), 3);

    let dir = tempfile::tempdir().unwrap();
    let runner = MockRunner::new().respond_to("version", MockResponse::failure(126, "text file busy"));
    let err = executor(
        EngineConfig::default(),
        &runner,
        Arc::new(FakeInstaller),
        Arc::new(InMemoryBackendStore::new()),
    )
    .deploy(&options(dir.path()), &Cancellation::never())
    .await
    .unwrap_err();

    assert!(matches!(
        err.root(),
        CoreError::InstallVerification { attempts: 5, .. }
    ));
    assert_eq!(runner.call_count(), 5);
}

/// Test that a cancelled execution never reaches the tool.
#[tokio::test]
async fn test_cancelled_before_start() {
    let dir = tempfile::tempdir().unwrap();
    let runner = MockRunner::new();
    let (handle, cancel) = cancellation();
    handle.cancel();

    let err = executor(
        EngineConfig::default(),
        &runner,
        Arc::new(FakeInstaller),
        Arc::new(InMemoryBackendStore::new()),
    )
    .deploy(&options(dir.path()), &cancel)
    .await
    .unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(runner.call_count(), 0);
}

/// Test the driver: per-call directory, output shaping and cleanup.
#[tokio::test]
async fn test_driver_execute() {
    let root = tempfile::tempdir().unwrap();
    let runner = MockRunner::new().respond_to("show", MockResponse::success(state_json()));
    let store = Arc::new(InMemoryBackendStore::new());
    store.insert(DEFAULT_STATE_NAMESPACE, &state_secret());

    let config = EngineConfig {
        execution_root: root.path().to_path_buf(),
        ..Default::default()
    };

    // `terraform get` is scripted, so seed the module from the installer,
    // which runs first inside the per-call directory.
    struct SeedingInstaller;

    #[async_trait]
    impl ToolInstaller for SeedingInstaller {
        async fn install(&self, spec: &InstallSpec, cancel: &Cancellation) -> InstallResult<PathBuf> {
            if let Some(workdir) = spec.install_dir.parent() {
                seed_module(workdir);
            }
            FakeInstaller.install(spec, cancel).await
        }
    }

    let driver = RecipeDriver::new(executor(config, &runner, Arc::new(SeedingInstaller), store));
    let output = driver
        .execute(options(Path::new("")), &Cancellation::never())
        .await
        .unwrap();

    assert_eq!(output.values["host"], json!("db.example"));
    assert_eq!(output.status.template_path, TEMPLATE_PATH);
    assert_eq!(
        output.deployed_resources,
        vec!["module.mongodb.azurerm_cosmosdb_account.db".to_string()]
    );

    let workdir = runner.get_calls()[0].workdir.clone().unwrap();
    assert!(workdir.starts_with(root.path()));
    assert!(workdir
        .file_name()
        .unwrap()
        .to_string_lossy()
        .starts_with("planes-radius-local-resourcegroups-shop"));
    assert!(!workdir.exists());
}
