//! # recipe_core
//!
//! Recipe execution for the recipe engine.
//!
//! This crate composes the tool environment and drives a recipe through
//! install, configuration, init and apply or destroy, then confirms the
//! outcome against the state backend.
//!
//! # Architecture
//!
//! - **Composer**: builds the environment the tool runs with
//! - **Registry**: tool CLI configuration for provider mirrors and private module registries
//! - **Executor**: the deploy, delete and metadata flows over an explicit state machine
//! - **Driver**: one working directory per call, plus recipe output shaping
//! - **Config**: engine settings loaded from YAML
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use recipe_core::{EngineConfig, ExecutionOptions, RecipeDriver, RecipeExecutor};
//! use recipe_install::{Cancellation, Installer};
//! use recipe_iac::{KubectlBackendStore, StaticCredentialSource};
//! use recipe_runner::ProcessRunner;
//!
//! let runner = Arc::new(ProcessRunner::new());
//! let executor = RecipeExecutor::new(
//!     EngineConfig::default(),
//!     runner.clone(),
//!     Arc::new(Installer::new()),
//!     Arc::new(KubectlBackendStore::new(runner)),
//!     Arc::new(StaticCredentialSource::new()),
//! );
//!
//! let output = RecipeDriver::new(executor)
//!     .execute(options, &Cancellation::never())
//!     .await?;
//! ```

pub mod config;
pub mod driver;
pub mod env;
pub mod error;
pub mod executor;
pub mod install;
pub mod options;
pub mod registry;
pub mod state;

pub use config::{
    ApplyConfig, BackendSettings, EngineConfig, TlsConfig, ToolConfig, VerificationConfig,
};
pub use driver::{normalize_resource_id, RecipeDriver, RecipeOutput, RecipeStatus};
pub use env::EnvironmentComposer;
pub use error::{CoreError, CoreResult, Flow, Phase};
pub use executor::{ExecutionOutcome, ExecutionReport, GeneratedConfiguration, RecipeExecutor};
pub use install::{resolve_install_spec, InstallDirGuard};
pub use options::ExecutionOptions;
pub use registry::RegistryConfiguration;
pub use state::{ExecutionState, StateMachine};
