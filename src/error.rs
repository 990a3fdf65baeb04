//! Error types for vmcrypt.
//!
//! Each subsystem has its own error enum (`GraphError`, `ParamError`,
//! `ProvisionError`); this module folds them into the crate-level [`Error`]
//! used at the library boundary and by the CLI to pick an exit status.

use std::path::PathBuf;
use thiserror::Error;

pub use crate::graph::GraphError;
pub use crate::params::ParamError;
pub use crate::provision::ProvisionError;

/// Result type alias for vmcrypt operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for vmcrypt.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Template Errors
    // ========================================================================
    /// Deployment parameters were missing or invalid.
    #[error(transparent)]
    Params(#[from] ParamError),

    /// The resource graph could not be built or ordered.
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// The rendered graph violates one or more encryption rules.
    #[error("Validation failed with {errors} error(s): {summary}")]
    Validation {
        /// Number of findings at error severity or above
        errors: usize,
        /// First finding, for the one-line message
        summary: String,
    },

    // ========================================================================
    // Deployment Errors
    // ========================================================================
    /// A provisioning step failed.
    #[error(transparent)]
    Provision(#[from] ProvisionError),

    /// A deployment finished with failed resources.
    #[error("Deployment failed: {failed} resource(s) failed, {skipped} skipped")]
    DeploymentFailed {
        /// Number of failed resources
        failed: usize,
        /// Number of resources skipped because an upstream resource failed
        skipped: usize,
    },

    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Invalid configuration value.
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidConfig {
        /// Configuration key
        key: String,
        /// Error message
        message: String,
    },

    // ========================================================================
    // IO and Serialization Errors
    // ========================================================================
    /// File not found.
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error.
    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    /// JSON parsing error.
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),
}

impl Error {
    /// Creates a new validation error from a finding count and headline.
    pub fn validation(errors: usize, summary: impl Into<String>) -> Self {
        Self::Validation {
            errors,
            summary: summary.into(),
        }
    }

    /// Creates a new invalid config error.
    pub fn invalid_config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Returns the error code for CLI exit status.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Provision(_) | Error::DeploymentFailed { .. } => 2,
            Error::Validation { .. } => 3,
            Error::Params(_) => 4,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(Error::validation(1, "ENC001").exit_code(), 3);
        assert_eq!(
            Error::DeploymentFailed {
                failed: 1,
                skipped: 2
            }
            .exit_code(),
            2
        );
        assert_eq!(
            Error::Params(ParamError::Missing("location".to_string())).exit_code(),
            4
        );
        assert_eq!(
            Error::invalid_config("defaults.output", "bad").exit_code(),
            1
        );
    }

}
