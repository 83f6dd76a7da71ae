//! Error types for the core module.

use std::fmt;

use thiserror::Error;

use recipe_iac::IacError;
use recipe_install::InstallError;

use crate::state::ExecutionState;

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Step of an execution an error occurred in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Install,
    ComposeEnvironment,
    GenerateConfig,
    Inspect,
    Init,
    Apply,
    ReadState,
    VerifyBackend,
    CheckBackend,
    Destroy,
    DeleteBackend,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Install => "install",
            Self::ComposeEnvironment => "compose-environment",
            Self::GenerateConfig => "generate-config",
            Self::Inspect => "inspect",
            Self::Init => "init",
            Self::Apply => "apply",
            Self::ReadState => "read-state",
            Self::VerifyBackend => "verify-backend",
            Self::CheckBackend => "check-backend",
            Self::Destroy => "destroy",
            Self::DeleteBackend => "delete-backend",
        };
        f.write_str(name)
    }
}

/// Which protocol was running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Deploy,
    Delete,
    Metadata,
}

impl fmt::Display for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Deploy => "apply flow",
            Self::Delete => "destroy flow",
            Self::Metadata => "metadata flow",
        };
        f.write_str(name)
    }
}

/// Errors that can occur during core operations.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("{flow}: {phase} failed for recipe {recipe} (resource {resource_id}): {source}")]
    Execution {
        flow: Flow,
        phase: Phase,
        recipe: String,
        resource_id: String,
        /// States visited before the failure
        history: Vec<ExecutionState>,
        #[source]
        source: Box<CoreError>,
    },

    #[error("terraform {command} exited with code {exit_code}: {output}")]
    ToolFailed {
        command: String,
        exit_code: i32,
        output: String,
    },

    #[error("state not persisted: secret {namespace}/{secret_name} is missing after a successful apply")]
    StateNotPersisted {
        namespace: String,
        secret_name: String,
    },

    #[error("Installed binary failed verification after {attempts} attempts: {message}")]
    InstallVerification { attempts: u32, message: String },

    #[error("Invalid state transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: ExecutionState,
        to: ExecutionState,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid CA certificate: {0}")]
    InvalidCertificate(String),

    #[error("Execution cancelled")]
    Cancelled,

    #[error("Install error: {0}")]
    Install(#[from] InstallError),

    #[error("IaC error: {0}")]
    Iac(#[from] IacError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl CoreError {
    /// The innermost error, unwrapping execution context.
    pub fn root(&self) -> &CoreError {
        match self {
            Self::Execution { source, .. } => source.root(),
            other => other,
        }
    }

    /// Phase the error was raised in, if known.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            Self::Execution { phase, .. } => Some(*phase),
            _ => None,
        }
    }

    /// Configuration problems; retrying the same request cannot succeed.
    pub fn is_configuration(&self) -> bool {
        match self.root() {
            Self::InvalidConfig(_) | Self::InvalidCertificate(_) => true,
            Self::Iac(e) => e.is_configuration(),
            Self::Install(InstallError::InvalidSpec(_) | InstallError::InvalidUrl { .. }) => true,
            _ => false,
        }
    }

    pub fn is_state_not_persisted(&self) -> bool {
        matches!(self.root(), Self::StateNotPersisted { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(
            self.root(),
            Self::Cancelled | Self::Install(InstallError::Cancelled)
        )
    }
}

impl From<serde_yaml::Error> for CoreError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
