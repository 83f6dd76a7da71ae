//! Terraform command wrapper.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use recipe_runner::{CommandRunner, CommandSpec, RunConfig};

use crate::error::IacResult;
use crate::state::TerraformState;

/// Default lock acquisition timeout for apply and destroy, in seconds.
pub const DEFAULT_LOCK_TIMEOUT_SECS: u64 = 60;

/// Result of a Terraform operation.
#[derive(Debug)]
pub struct TerraformResult {
    pub success: bool,
    pub output: String,
    pub exit_code: i32,
}

/// Runs an installed terraform binary with an explicit environment.
pub struct TerraformRunner {
    runner: Arc<dyn CommandRunner>,
    binary: PathBuf,
    env: BTreeMap<String, String>,
    run_config: RunConfig,
    lock_timeout_secs: u64,
}

impl TerraformRunner {
    pub fn new(runner: Arc<dyn CommandRunner>, binary: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            binary: binary.into(),
            env: BTreeMap::new(),
            run_config: RunConfig::default(),
            lock_timeout_secs: DEFAULT_LOCK_TIMEOUT_SECS,
        }
    }

    /// Environment for every invocation. Nothing is inherited from this process.
    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// Per command timeout.
    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.run_config = self.run_config.timeout(seconds);
        self
    }

    pub fn with_lock_timeout(mut self, seconds: u64) -> Self {
        self.lock_timeout_secs = seconds;
        self
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Run terraform init.
    pub async fn init(&self, working_dir: &Path) -> IacResult<TerraformResult> {
        info!("Running terraform init in {:?}", working_dir);
        self.run_command(working_dir, &["init", "-input=false", "-no-color"])
            .await
    }

    /// Download modules without touching providers or the backend.
    pub async fn get(&self, working_dir: &Path) -> IacResult<TerraformResult> {
        info!("Running terraform get in {:?}", working_dir);
        self.run_command(working_dir, &["get", "-no-color"]).await
    }

    /// Run terraform apply.
    pub async fn apply(&self, working_dir: &Path) -> IacResult<TerraformResult> {
        info!("Running terraform apply in {:?}", working_dir);
        let lock_timeout = format!("-lock-timeout={}s", self.lock_timeout_secs);
        self.run_command(
            working_dir,
            &[
                "apply",
                "-input=false",
                "-no-color",
                "-auto-approve",
                "-lock=true",
                lock_timeout.as_str(),
            ],
        )
        .await
    }

    /// Run terraform destroy.
    pub async fn destroy(&self, working_dir: &Path) -> IacResult<TerraformResult> {
        info!("Running terraform destroy in {:?}", working_dir);
        let lock_timeout = format!("-lock-timeout={}s", self.lock_timeout_secs);
        self.run_command(
            working_dir,
            &[
                "destroy",
                "-input=false",
                "-no-color",
                "-auto-approve",
                "-lock=true",
                lock_timeout.as_str(),
            ],
        )
        .await
    }

    /// Read state via `terraform show -json`.
    pub async fn show(&self, working_dir: &Path) -> IacResult<(TerraformResult, TerraformState)> {
        info!("Reading terraform state in {:?}", working_dir);
        let spec = self.spec(working_dir, &["show", "-json", "-no-color"]);
        let result = self.runner.run(&spec, &self.run_config).await?;
        let state = if result.success() {
            TerraformState::parse(&result.stdout)?
        } else {
            TerraformState::default()
        };
        Ok((
            TerraformResult {
                success: result.success(),
                output: result.combined_output(),
                exit_code: result.exit_code,
            },
            state,
        ))
    }

    /// Run terraform version; used to check an install is usable.
    pub async fn version(&self, working_dir: &Path) -> IacResult<TerraformResult> {
        self.run_command(working_dir, &["version"]).await
    }

    fn spec(&self, working_dir: &Path, args: &[&str]) -> CommandSpec {
        CommandSpec::new(self.binary.to_string_lossy())
            .args(args.iter().copied())
            .workdir(working_dir)
            .isolated_env()
            .envs(self.env.clone())
    }

    async fn run_command(&self, working_dir: &Path, args: &[&str]) -> IacResult<TerraformResult> {
        let spec = self.spec(working_dir, args);

        debug!("Executing terraform {:?}", args);

        let result = self.runner.run(&spec, &self.run_config).await?;

        Ok(TerraformResult {
            success: result.success(),
            output: result.combined_output(),
            exit_code: result.exit_code,
        })
    }
}
