//! CLI command definitions.
//!
//! Each subcommand runs one recipe flow for an options file and prints the
//! result to stdout as JSON.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, warn};

use recipe_core::{EngineConfig, ExecutionOptions, RecipeDriver, RecipeExecutor};
use recipe_iac::{KubectlBackendStore, StaticCredentialSource};
use recipe_install::{cancellation, Cancellation, Installer};
use recipe_runner::ProcessRunner;

pub mod delete;
pub mod deploy;
pub mod metadata;

/// recipe - run infrastructure recipes
#[derive(Parser)]
#[command(name = "recipe")]
#[command(version, about = "Run infrastructure recipes against an environment")]
#[command(long_about = r#"
Runs a recipe (an infrastructure module reference) for one resource: installs
the IaC tool, generates its configuration, injects platform credentials and
applies or destroys it against a Kubernetes state backend.

COMMANDS:
  deploy    → Install, configure, init and apply; print the recipe output
  delete    → Destroy the recipe's resources and remove its state
  metadata  → Print the parameters the recipe's module declares

EXIT CODES:
  0   - Success
  1   - General error
  2   - Invalid arguments
  3   - Configuration error
  4   - Install error
  5   - IaC error
  6   - State not persisted
  130 - Cancelled
"#)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Engine configuration file (YAML)
    #[arg(short, long, global = true, env = "RECIPE_ENGINE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Platform credentials file (YAML)
    #[arg(long, global = true, env = "RECIPE_CREDENTIALS")]
    pub credentials: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Deploy a recipe
    Deploy(deploy::DeployArgs),

    /// Delete a deployed recipe
    Delete(delete::DeleteArgs),

    /// Show the parameters a recipe accepts
    Metadata(metadata::MetadataArgs),
}

impl Cli {
    pub fn load_config(&self) -> Result<EngineConfig> {
        match &self.config {
            Some(path) => EngineConfig::load(path)
                .with_context(|| format!("Invalid engine configuration in {}", path.display())),
            None => Ok(EngineConfig::default()),
        }
    }

    pub fn load_credentials(&self) -> Result<StaticCredentialSource> {
        let Some(path) = &self.credentials else {
            return Ok(StaticCredentialSource::new());
        };
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read credentials file {}", path.display()))?;
        serde_yaml::from_str(&content)
            .with_context(|| format!("Invalid credentials YAML in {}", path.display()))
    }

    /// Wire the real runner, installer and state store.
    pub fn driver(&self) -> Result<RecipeDriver> {
        let config = self.load_config()?;
        let credentials = Arc::new(self.load_credentials()?);
        let runner = Arc::new(ProcessRunner::new());

        let mut installer = Installer::new().with_retry_policy(config.retry.clone());
        if let Some(path) = &config.tool.preinstalled_path {
            installer = installer.with_preinstalled(path.clone());
        }

        let mut store = KubectlBackendStore::new(runner.clone());
        if let Some(path) = &config.backend.kubeconfig {
            store = store.with_kubeconfig(path.clone());
        }

        debug!("Execution root {:?}", config.execution_root);
        let executor = RecipeExecutor::new(
            config,
            runner,
            Arc::new(installer),
            Arc::new(store),
            credentials,
        );
        Ok(RecipeDriver::new(executor))
    }
}

pub fn load_options(path: &Path) -> Result<ExecutionOptions> {
    if !path.exists() {
        anyhow::bail!("Options file not found: {}", path.display());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read options file {}", path.display()))?;
    serde_yaml::from_str(&content)
        .with_context(|| format!("Invalid options YAML in {}", path.display()))
}

/// Cancellation that fires on Ctrl-C.
pub fn interrupt_cancellation() -> Cancellation {
    let (handle, cancel) = cancellation();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling after the current step");
            handle.cancel();
        }
    });
    cancel
}

pub fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
