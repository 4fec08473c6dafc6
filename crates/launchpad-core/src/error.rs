//! Error types for Launchpad

use std::path::PathBuf;
use thiserror::Error;

use launchpad_distribute::DistributeError;

/// Result type alias using LaunchpadError
pub type Result<T> = std::result::Result<T, LaunchpadError>;

/// Main error type for Launchpad operations
#[derive(Debug, Error)]
pub enum LaunchpadError {
    /// Configuration-related errors
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Distribution pipeline errors
    #[error(transparent)]
    Distribute(#[from] DistributeError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic errors
    #[error("{0}")]
    Other(String),
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file not found
    #[error("Configuration file not found at {0}")]
    NotFound(PathBuf),

    /// Failed to parse configuration
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Invalid configuration value
    #[error("Invalid configuration: {field} - {message}")]
    InvalidValue { field: String, message: String },

    /// Missing required field
    #[error("Missing required configuration field: {0}")]
    MissingField(String),

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// TOML parsing error
    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// IO error
    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),
}

impl LaunchpadError {
    /// Whether this error was caused by bad user input rather than the remote side
    pub fn is_validation(&self) -> bool {
        match self {
            LaunchpadError::Config(_) => true,
            LaunchpadError::Distribute(e) => e.is_validation(),
            _ => false,
        }
    }
}
