//! Error types for IaC module.

use thiserror::Error;

/// Result type alias for IaC operations.
pub type IacResult<T> = Result<T, IacError>;

/// Errors that can occur during IaC operations.
#[derive(Error, Debug)]
pub enum IacError {
    #[error("Invalid recipe: {0}")]
    InvalidRecipe(String),

    #[error("missing secret source: {0}")]
    MissingSecretSource(String),

    #[error("missing secret key in secret store id: {source_id} (key {key})")]
    MissingSecretKey { source_id: String, key: String },

    #[error("invalid {provider} provider scope {scope:?} is configured on the Environment, {reason}")]
    InvalidProviderScope {
        provider: String,
        scope: String,
        reason: String,
    },

    #[error("Credential lookup failed: {0}")]
    Credentials(String),

    #[error("Module {0} not found in downloaded modules")]
    ModuleNotFound(String),

    #[error("Module inspection failed: {0}")]
    ModuleInspection(String),

    #[error("Error retrieving state backend secret: {0}")]
    BackendLookup(String),

    #[error("Error deleting state backend secret: {0}")]
    BackendDelete(String),

    #[error("Invalid terraform state: {0}")]
    InvalidState(String),

    #[error("Runner error: {0}")]
    Runner(#[from] recipe_runner::RunnerError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl IacError {
    /// Configuration problems that no amount of retrying will fix.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::InvalidRecipe(_)
                | Self::MissingSecretSource(_)
                | Self::MissingSecretKey { .. }
                | Self::InvalidProviderScope { .. }
        )
    }
}
