//! Error types for configuration and synthesis

use std::path::PathBuf;
use thiserror::Error;

/// Configuration problems detected before any resource is composed
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("Missing required configuration field: {field}")]
    MissingField { field: &'static str },

    #[error("Invalid value for '{field}': {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("Region '{region}' has no entry in the repository account table")]
    UnknownRegion { region: String },
}

/// Failures while writing synthesized output
#[derive(Debug, Error)]
pub enum SynthError {
    #[error("Failed to serialize {what}: {source}")]
    Serialize {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to write {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type ConfigResult<T> = Result<T, ConfigurationError>;
pub type SynthResult<T> = Result<T, SynthError>;
