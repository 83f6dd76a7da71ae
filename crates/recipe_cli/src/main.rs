//! Recipe engine CLI - Main entry point.
//!
//! Exit codes:
//! - 0: Success
//! - 1: General error
//! - 2: Invalid arguments
//! - 3: Configuration error
//! - 4: Install error
//! - 5: IaC error
//! - 6: State not persisted
//! - 130: Cancelled

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use recipe_core::CoreError;

mod commands;

use commands::{Cli, Commands};

/// CI-friendly exit codes
pub struct ExitCodes;

impl ExitCodes {
    pub const SUCCESS: u8 = 0;
    pub const GENERAL_ERROR: u8 = 1;
    pub const INVALID_ARGS: u8 = 2;
    pub const CONFIGURATION_ERROR: u8 = 3;
    pub const INSTALL_ERROR: u8 = 4;
    pub const IAC_ERROR: u8 = 5;
    pub const STATE_NOT_PERSISTED: u8 = 6;
    pub const CANCELLED: u8 = 130;
}

const DEFAULT_LOG_FILTER: &str = "recipe=info,warn";

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.json_logs);

    let result = match &cli.command {
        Commands::Deploy(args) => commands::deploy::execute(&cli, args).await,
        Commands::Delete(args) => commands::delete::execute(&cli, args).await,
        Commands::Metadata(args) => commands::metadata::execute(&cli, args).await,
    };

    match result {
        Ok(()) => ExitCode::from(ExitCodes::SUCCESS),
        Err(e) => {
            let exit_code = categorize_error(&e);
            eprintln!("Error: {:#}", e);
            ExitCode::from(exit_code)
        }
    }
}

fn init_logging(verbose: bool, json: bool) {
    let filter = if verbose {
        EnvFilter::new("recipe=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
    };

    let registry = tracing_subscriber::registry().with(filter);
    let log_result = if json {
        registry
            .with(fmt::layer().json().with_target(false).with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()
    };

    if log_result.is_err() {
        // Logging already initialized, continue
    }
}

/// Categorize error to determine exit code
fn categorize_error(e: &anyhow::Error) -> u8 {
    if let Some(core) = e.downcast_ref::<CoreError>() {
        return categorize_core_error(core);
    }

    let msg = e.to_string().to_lowercase();
    if msg.contains("argument") || msg.contains("not found") || msg.contains("failed to read") {
        ExitCodes::INVALID_ARGS
    } else if msg.contains("configuration") || msg.contains("yaml") {
        ExitCodes::CONFIGURATION_ERROR
    } else {
        ExitCodes::GENERAL_ERROR
    }
}

fn categorize_core_error(e: &CoreError) -> u8 {
    if e.is_cancelled() {
        ExitCodes::CANCELLED
    } else if e.is_state_not_persisted() {
        ExitCodes::STATE_NOT_PERSISTED
    } else if e.is_configuration() {
        ExitCodes::CONFIGURATION_ERROR
    } else {
        match e.root() {
            CoreError::Install(_) | CoreError::InstallVerification { .. } => ExitCodes::INSTALL_ERROR,
            CoreError::Iac(_) | CoreError::ToolFailed { .. } => ExitCodes::IAC_ERROR,
            _ => ExitCodes::GENERAL_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use recipe_core::{Flow, Phase};
    use recipe_install::InstallError;

    use super::*;

    fn wrapped(phase: Phase, source: CoreError) -> anyhow::Error {
        CoreError::Execution {
            flow: Flow::Deploy,
            phase,
            recipe: "mongodb".into(),
            resource_id: "/r/db".into(),
            history: vec![],
            source: Box::new(source),
        }
        .into()
    }

    #[test]
    fn test_categorize_core_errors() {
        assert_eq!(
            categorize_error(&wrapped(
                Phase::VerifyBackend,
                CoreError::StateNotPersisted {
                    namespace: "recipe-system".into(),
                    secret_name: "tfstate-default-abc".into(),
                }
            )),
            ExitCodes::STATE_NOT_PERSISTED
        );
        assert_eq!(
            categorize_error(&wrapped(
                Phase::Apply,
                CoreError::ToolFailed {
                    command: "apply".into(),
                    exit_code: 1,
                    output: "boom".into(),
                }
            )),
            ExitCodes::IAC_ERROR
        );
        assert_eq!(
            categorize_error(&wrapped(
                Phase::Install,
                CoreError::Install(InstallError::InvalidSpec("no version".into()))
            )),
            ExitCodes::CONFIGURATION_ERROR
        );
        assert_eq!(
            categorize_error(&wrapped(Phase::Init, CoreError::Cancelled)),
            ExitCodes::CANCELLED
        );
    }

    #[test]
    fn test_categorize_other_errors() {
        assert_eq!(
            categorize_error(&anyhow::anyhow!("Options file not found: x.yaml")),
            ExitCodes::INVALID_ARGS
        );
        assert_eq!(
            categorize_error(&anyhow::anyhow!("something else")),
            ExitCodes::GENERAL_ERROR
        );
    }
}
