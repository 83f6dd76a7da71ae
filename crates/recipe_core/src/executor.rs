//! Recipe execution orchestrator.
//!
//! Drives one execution through
//! `NotStarted -> Installed -> ConfigGenerated -> Initialized -> Applied|Destroyed -> Verified -> Done`,
//! moving to `Failed` on the first fatal error. Every fatal error is wrapped
//! with the flow, phase, recipe and resource it happened in.
//!
//! Tool commands are not interrupted by cancellation; it is checked between
//! steps and honoured inside the install. Dropping the returned future kills
//! any running tool process.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use recipe_iac::{
    inspect_downloaded_module, secret_name, BackendStore, CredentialInjector, CredentialSource,
    IacResult, KubernetesBackend, ModuleInspection, ParameterSchema, ProviderRegistry,
    RecipeContext, TerraformConfig, TerraformResult, TerraformRunner, TerraformState,
};
use recipe_install::{Cancellation, ToolInstaller};
use recipe_runner::CommandRunner;

use crate::config::EngineConfig;
use crate::env::EnvironmentComposer;
use crate::error::{CoreError, CoreResult, Flow, Phase};
use crate::install::{resolve_install_spec, InstallDirGuard, INSTALL_DIR};
use crate::options::ExecutionOptions;
use crate::registry::RegistryConfiguration;
use crate::state::{ExecutionState, StateMachine};

/// What a successful execution produced.
#[derive(Debug, Clone)]
pub enum ExecutionOutcome {
    /// Apply succeeded and its state secret exists
    Deployed {
        state: TerraformState,
        secret_name: String,
    },
    /// `destroyed` is false when there was no state to destroy
    Deleted { destroyed: bool },
    /// Parameters declared by the module
    Metadata {
        parameters: BTreeMap<String, ParameterSchema>,
    },
}

/// Outcome plus the states the execution went through.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub outcome: ExecutionOutcome,
    pub final_state: ExecutionState,
    pub history: Vec<ExecutionState>,
}

/// Summary of what configuration generation discovered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedConfiguration {
    pub files: Vec<PathBuf>,
    pub required_providers: Vec<String>,
    pub secret_suffix: String,
    pub context_var_exists: bool,
    pub result_output_exists: bool,
}

/// Bookkeeping for a single execution.
struct Run {
    flow: Flow,
    recipe: String,
    resource_id: String,
    machine: StateMachine,
}

impl Run {
    fn new(flow: Flow, options: &ExecutionOptions) -> Self {
        Self {
            flow,
            recipe: options.recipe_name().to_string(),
            resource_id: options.resource_id().to_string(),
            machine: StateMachine::new(),
        }
    }

    fn failed(&mut self, phase: Phase, err: impl Into<CoreError>) -> CoreError {
        let source = err.into();
        self.machine.fail();
        error!(
            "Recipe {} {} failed during {}: {}",
            self.recipe, self.flow, phase, source
        );
        CoreError::Execution {
            flow: self.flow,
            phase,
            recipe: self.recipe.clone(),
            resource_id: self.resource_id.clone(),
            history: self.machine.history().to_vec(),
            source: Box::new(source),
        }
    }

    fn advance(&mut self, phase: Phase, next: ExecutionState) -> CoreResult<()> {
        self.machine
            .advance(next)
            .map_err(|e| self.failed(phase, e))
    }

    fn checkpoint(&mut self, cancel: &Cancellation, phase: Phase) -> CoreResult<()> {
        if cancel.is_cancelled() {
            return Err(self.failed(phase, CoreError::Cancelled));
        }
        Ok(())
    }

    /// Turn a tool invocation into success or a phase-wrapped failure.
    fn tool(
        &mut self,
        phase: Phase,
        command: &str,
        result: IacResult<TerraformResult>,
    ) -> CoreResult<TerraformResult> {
        match result {
            Ok(result) if result.success => Ok(result),
            Ok(result) => Err(self.failed(phase, tool_failed(command, result))),
            Err(e) => Err(self.failed(phase, e)),
        }
    }

    fn report(self, outcome: ExecutionOutcome) -> ExecutionReport {
        ExecutionReport {
            outcome,
            final_state: self.machine.state(),
            history: self.machine.history().to_vec(),
        }
    }
}

fn tool_failed(command: &str, result: TerraformResult) -> CoreError {
    CoreError::ToolFailed {
        command: command.to_string(),
        exit_code: result.exit_code,
        output: result.output,
    }
}

/// Runs recipes.
pub struct RecipeExecutor {
    config: EngineConfig,
    runner: Arc<dyn CommandRunner>,
    installer: Arc<dyn ToolInstaller>,
    backend_store: Arc<dyn BackendStore>,
    credentials: Arc<dyn CredentialSource>,
    providers: ProviderRegistry,
    composer: EnvironmentComposer,
}

impl RecipeExecutor {
    pub fn new(
        config: EngineConfig,
        runner: Arc<dyn CommandRunner>,
        installer: Arc<dyn ToolInstaller>,
        backend_store: Arc<dyn BackendStore>,
        credentials: Arc<dyn CredentialSource>,
    ) -> Self {
        let providers =
            ProviderRegistry::platform(credentials.clone(), config.backend.kubeconfig.clone());
        let composer = EnvironmentComposer::from_process()
            .tool_log_level(config.tool.log_level.clone())
            .honor_recipe_ca_certificate(config.tls.honor_recipe_ca_certificate);
        Self {
            config,
            runner,
            installer,
            backend_store,
            credentials,
            providers,
            composer,
        }
    }

    pub fn with_composer(mut self, composer: EnvironmentComposer) -> Self {
        self.composer = composer;
        self
    }

    pub fn with_providers(mut self, providers: ProviderRegistry) -> Self {
        self.providers = providers;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn backend(&self) -> KubernetesBackend {
        let settings = &self.config.backend;
        let mut backend = KubernetesBackend::new(&settings.namespace);
        backend.in_cluster = settings.in_cluster;
        if !settings.in_cluster {
            if let Some(path) = &settings.kubeconfig {
                backend = backend.with_config_path(path.clone());
            }
        }
        backend
    }

    /// Install the tool, compose its environment and check it runs.
    ///
    /// The returned guards remove the install directory and the registry
    /// configuration files when dropped.
    async fn prepare(
        &self,
        options: &ExecutionOptions,
        run: &mut Run,
        cancel: &Cancellation,
    ) -> CoreResult<(InstallDirGuard, Option<RegistryConfiguration>, TerraformRunner)> {
        run.checkpoint(cancel, Phase::Install)?;
        let install_dir = options.root_dir.join(INSTALL_DIR);
        let guard = InstallDirGuard::new(&install_dir);

        let spec = resolve_install_spec(&self.config, options, &install_dir)
            .map_err(|e| run.failed(Phase::Install, e))?;
        let binary = self
            .installer
            .install(&spec, cancel)
            .await
            .map_err(|e| run.failed(Phase::Install, e))?;
        info!("Installed {} at {:?}", spec.product, binary);

        let registry = RegistryConfiguration::configure(
            &options.env_config.recipe_config.terraform,
            &options.secrets,
            &options.root_dir,
        )
        .map_err(|e| run.failed(Phase::ComposeEnvironment, e))?;
        let env = self
            .composer
            .compose(options, self.credentials.as_ref(), registry.as_ref())
            .await
            .map_err(|e| run.failed(Phase::ComposeEnvironment, e))?;

        let terraform = TerraformRunner::new(self.runner.clone(), binary)
            .with_env(env)
            .with_timeout(self.config.apply.command_timeout_secs)
            .with_lock_timeout(self.config.apply.lock_timeout_secs);

        self.verify_install(&terraform, &options.root_dir)
            .await
            .map_err(|e| run.failed(Phase::Install, e))?;
        run.advance(Phase::Install, ExecutionState::Installed)?;

        Ok((guard, registry, terraform))
    }

    /// Probe `version` until it succeeds or attempts run out.
    async fn verify_install(&self, terraform: &TerraformRunner, dir: &Path) -> CoreResult<()> {
        let attempts = self.config.install_verification.attempts.max(1);
        let delay = Duration::from_secs(self.config.install_verification.delay_secs);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match terraform.version(dir).await {
                Ok(result) if result.success => {
                    debug!("Verified {:?}: {}", terraform.binary(), result.output.trim());
                    return Ok(());
                }
                Ok(result) => last_error = result.output,
                Err(e) => last_error = e.to_string(),
            }
            if attempt < attempts {
                warn!(
                    "Install verification attempt {}/{} failed, retrying in {:?}",
                    attempt, attempts, delay
                );
                tokio::time::sleep(delay).await;
            }
        }

        Err(CoreError::InstallVerification {
            attempts,
            message: last_error,
        })
    }

    /// First pass: module block only, then download and inspect the module.
    async fn download_and_inspect(
        &self,
        options: &ExecutionOptions,
        terraform: &TerraformRunner,
        run: &mut Run,
    ) -> CoreResult<(TerraformConfig, ModuleInspection)> {
        let root = &options.root_dir;
        let config = TerraformConfig::new(root, &options.env_recipe, &options.resource_recipe)
            .map_err(|e| run.failed(Phase::GenerateConfig, e))?;
        config
            .save()
            .map_err(|e| run.failed(Phase::GenerateConfig, e))?;

        let result = terraform.get(root).await;
        run.tool(Phase::Inspect, "get", result)?;

        let inspection = inspect_downloaded_module(root, config.module_name())
            .map_err(|e| run.failed(Phase::Inspect, e))?;
        debug!(
            "Module {} requires providers {:?}",
            config.module_name(),
            inspection.required_providers.keys().collect::<Vec<_>>()
        );
        Ok((config, inspection))
    }

    /// Both generation passes followed by credential injection.
    async fn generate(
        &self,
        options: &ExecutionOptions,
        terraform: &TerraformRunner,
        run: &mut Run,
    ) -> CoreResult<GeneratedConfiguration> {
        let (mut config, inspection) = self.download_and_inspect(options, terraform, run).await?;

        let required: Vec<String> = inspection.required_providers.keys().cloned().collect();
        let providers = self
            .providers
            .provider_configs(&required, &options.env_config, &options.secrets)
            .await
            .map_err(|e| run.failed(Phase::GenerateConfig, e))?;
        config.add_providers(providers);

        let secret_suffix = config.add_terraform_block(
            &self.backend(),
            &options.resource_recipe,
            &inspection.required_providers,
        );
        if inspection.context_var_exists {
            config
                .add_recipe_context(&RecipeContext::new(
                    &options.resource_recipe,
                    &options.env_config,
                ))
                .map_err(|e| run.failed(Phase::GenerateConfig, e))?;
        }
        if inspection.result_output_exists {
            config.add_outputs();
        }
        let files = config
            .save()
            .map_err(|e| run.failed(Phase::GenerateConfig, e))?;

        self.inject_credentials(options).await;
        run.advance(Phase::GenerateConfig, ExecutionState::ConfigGenerated)?;

        Ok(GeneratedConfiguration {
            files,
            required_providers: required,
            secret_suffix,
            context_var_exists: inspection.context_var_exists,
            result_output_exists: inspection.result_output_exists,
        })
    }

    /// Best effort; failures are logged by the injector.
    async fn inject_credentials(&self, options: &ExecutionOptions) {
        let mut credentials = self.providers.credential_set(&options.env_config).await;
        // Providers configured on the environment keep the user's values.
        for provider in options.env_config.recipe_config.terraform.providers.keys() {
            credentials.remove(provider);
        }
        let report = CredentialInjector::new(&credentials).inject_tree(&options.root_dir);
        if !report.failures.is_empty() {
            warn!(
                "Credential injection skipped {} file(s)",
                report.failures.len()
            );
        }
    }

    /// Install, generate, init, apply, then confirm the state was persisted.
    pub async fn deploy(
        &self,
        options: &ExecutionOptions,
        cancel: &Cancellation,
    ) -> CoreResult<ExecutionReport> {
        let mut run = Run::new(Flow::Deploy, options);
        info!(
            "Deploying recipe {} for resource {}",
            run.recipe, run.resource_id
        );
        let root = &options.root_dir;

        let (_install, _registry, terraform) = self.prepare(options, &mut run, cancel).await?;
        let generated = self.generate(options, &terraform, &mut run).await?;

        run.checkpoint(cancel, Phase::Init)?;
        let result = terraform.init(root).await;
        run.tool(Phase::Init, "init", result)?;
        run.advance(Phase::Init, ExecutionState::Initialized)?;

        run.checkpoint(cancel, Phase::Apply)?;
        let result = terraform.apply(root).await;
        run.tool(Phase::Apply, "apply", result)?;
        run.advance(Phase::Apply, ExecutionState::Applied)?;

        let state = match terraform.show(root).await {
            Ok((result, state)) if result.success => state,
            Ok((result, _)) => return Err(run.failed(Phase::ReadState, tool_failed("show", result))),
            Err(e) => return Err(run.failed(Phase::ReadState, e)),
        };

        let namespace = &self.config.backend.namespace;
        let secret = secret_name(&generated.secret_suffix);
        let exists = self.backend_store.secret_exists(namespace, &secret).await;
        match exists {
            Ok(true) => debug!("State secret {}/{} present", namespace, secret),
            Ok(false) => {
                return Err(run.failed(
                    Phase::VerifyBackend,
                    CoreError::StateNotPersisted {
                        namespace: namespace.clone(),
                        secret_name: secret,
                    },
                ))
            }
            Err(e) => return Err(run.failed(Phase::VerifyBackend, e)),
        }
        run.advance(Phase::VerifyBackend, ExecutionState::Verified)?;
        run.advance(Phase::VerifyBackend, ExecutionState::Done)?;

        info!("Deployed recipe {}", run.recipe);
        Ok(run.report(ExecutionOutcome::Deployed {
            state,
            secret_name: secret,
        }))
    }

    /// Install, generate, init, destroy, then remove the state secret.
    /// Nothing is destroyed when no state secret exists.
    pub async fn delete(
        &self,
        options: &ExecutionOptions,
        cancel: &Cancellation,
    ) -> CoreResult<ExecutionReport> {
        let mut run = Run::new(Flow::Delete, options);
        info!(
            "Deleting recipe {} for resource {}",
            run.recipe, run.resource_id
        );
        let root = &options.root_dir;

        let (_install, _registry, terraform) = self.prepare(options, &mut run, cancel).await?;
        let generated = self.generate(options, &terraform, &mut run).await?;

        let namespace = &self.config.backend.namespace;
        let secret = secret_name(&generated.secret_suffix);
        let exists = self.backend_store.secret_exists(namespace, &secret).await;
        match exists {
            Ok(true) => {}
            Ok(false) => {
                info!(
                    "State secret {}/{} not found, nothing to destroy",
                    namespace, secret
                );
                run.advance(Phase::CheckBackend, ExecutionState::Done)?;
                return Ok(run.report(ExecutionOutcome::Deleted { destroyed: false }));
            }
            Err(e) => warn!(
                "Could not check state secret {}/{}, proceeding with destroy: {}",
                namespace, secret, e
            ),
        }

        run.checkpoint(cancel, Phase::Init)?;
        let result = terraform.init(root).await;
        run.tool(Phase::Init, "init", result)?;
        run.advance(Phase::Init, ExecutionState::Initialized)?;

        run.checkpoint(cancel, Phase::Destroy)?;
        let result = terraform.destroy(root).await;
        run.tool(Phase::Destroy, "destroy", result)?;
        run.advance(Phase::Destroy, ExecutionState::Destroyed)?;

        self.backend_store
            .delete_secret(namespace, &secret)
            .await
            .map_err(|e| run.failed(Phase::DeleteBackend, e))?;
        run.advance(Phase::DeleteBackend, ExecutionState::Verified)?;
        run.advance(Phase::DeleteBackend, ExecutionState::Done)?;

        info!("Deleted recipe {}", run.recipe);
        Ok(run.report(ExecutionOutcome::Deleted { destroyed: true }))
    }

    /// Parameter discovery. Never runs init or apply.
    pub async fn get_metadata(
        &self,
        options: &ExecutionOptions,
        cancel: &Cancellation,
    ) -> CoreResult<ExecutionReport> {
        let mut run = Run::new(Flow::Metadata, options);
        info!("Reading metadata for recipe {}", run.recipe);

        let (_install, _registry, terraform) = self.prepare(options, &mut run, cancel).await?;
        let (_config, inspection) = self.download_and_inspect(options, &terraform, &mut run).await?;
        run.advance(Phase::Inspect, ExecutionState::ConfigGenerated)?;
        run.advance(Phase::Inspect, ExecutionState::Done)?;

        Ok(run.report(ExecutionOutcome::Metadata {
            parameters: inspection.parameters,
        }))
    }
}
