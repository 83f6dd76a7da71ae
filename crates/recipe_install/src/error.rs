//! Error types for binary acquisition.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for install operations.
pub type InstallResult<T> = Result<T, InstallError>;

/// Errors that can occur while acquiring the tool binary.
#[derive(Error, Debug)]
pub enum InstallError {
    #[error("Invalid install spec: {0}")]
    InvalidSpec(String),

    #[error("Invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Invalid CA certificate: {0}")]
    InvalidCertificate(String),

    #[error("HTTP client setup failed: {0}")]
    ClientSetup(String),

    #[error("Unexpected HTTP status {status} from {url}")]
    Http { status: u16, url: String },

    #[error("Request to {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error("Request failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<InstallError>,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Failed to parse release index: {0}")]
    IndexParse(#[from] serde_json::Error),

    #[error("Version {version} of {product} not found in release index")]
    VersionNotFound { product: String, version: String },

    #[error("No build of {product} {version} for {os}/{arch}")]
    NoCompatibleBuild {
        product: String,
        version: String,
        os: String,
        arch: String,
    },

    #[error("Checksum not found for {0}")]
    ChecksumMissing(String),

    #[error("Checksum mismatch for {filename}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        filename: String,
        expected: String,
        actual: String,
    },

    #[error("Unsafe archive member: {0}")]
    UnsafeArchiveMember(String),

    #[error("Executable {0} not found in archive")]
    ExecutableNotFound(String),

    #[error("Destination {0} is outside the install directory")]
    InvalidDestination(PathBuf),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl InstallError {
    /// Transient network failures and server errors are worth another attempt.
    /// Everything else (parse, integrity, security, configuration) is final.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Integrity or archive-safety failure.
    pub fn is_security_relevant(&self) -> bool {
        matches!(
            self,
            Self::ChecksumMismatch { .. }
                | Self::ChecksumMissing(_)
                | Self::UnsafeArchiveMember(_)
                | Self::InvalidDestination(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        let server = InstallError::Http {
            status: 503,
            url: "u".into(),
        };
        let not_found = InstallError::Http {
            status: 404,
            url: "u".into(),
        };
        let transport = InstallError::Transport {
            url: "u".into(),
            message: "connection refused".into(),
        };

        assert!(server.is_retryable());
        assert!(transport.is_retryable());
        assert!(!not_found.is_retryable());
        assert!(!InstallError::ChecksumMissing("f.zip".into()).is_retryable());
        assert!(!InstallError::UnsafeArchiveMember("../x".into()).is_retryable());
        assert!(!InstallError::Cancelled.is_retryable());
    }

    #[test]
    fn test_retries_exhausted_message() {
        let err = InstallError::RetriesExhausted {
            attempts: 3,
            source: Box::new(InstallError::Transport {
                url: "https://r.example/x".into(),
                message: "connection refused".into(),
            }),
        };
        assert_eq!(
            err.to_string(),
            "Request failed after 3 attempts: Request to https://r.example/x failed: connection refused"
        );
    }
}
