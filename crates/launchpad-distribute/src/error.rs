//! Distribution error types

use thiserror::Error;

use crate::provisioning::ErrorPage;

/// Distribution pipeline errors
#[derive(Debug, Error)]
pub enum DistributeError {
    /// Input rejected before any network call
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Classified developer portal error
    #[error("Developer portal error ({page}): {message}")]
    Portal { page: ErrorPage, message: String },

    /// Some destinations of a fan-out failed
    #[error("Distribution failed for: {}", failed.join(", "))]
    PartialFailure { failed: Vec<String> },

    /// API error from the server
    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },

    /// Upload failed
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    /// Server-side scan flagged the binary
    #[error("Malware detected: {0}")]
    MalwareDetected(String),

    /// A remote job stopped making progress
    #[error("Operation stalled: {0}")]
    Stalled(String),

    /// Operation cancelled by the caller
    #[error("Operation cancelled")]
    Cancelled,

    /// Operation not valid in the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl DistributeError {
    /// Whether the error was raised locally before reaching the network
    pub fn is_validation(&self) -> bool {
        matches!(self, DistributeError::Validation(_))
    }

    /// Error page to show for this error in the provisioning flow
    pub fn error_page(&self) -> ErrorPage {
        match self {
            DistributeError::Portal { page, .. } => *page,
            _ => ErrorPage::Unhandled,
        }
    }
}

/// Result type for distribution operations
pub type Result<T> = std::result::Result<T, DistributeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_failure_names_destinations() {
        let err = DistributeError::PartialFailure {
            failed: vec!["Beta".to_string(), "qa@example.com".to_string()],
        };
        assert_eq!(err.to_string(), "Distribution failed for: Beta, qa@example.com");
    }

    #[test]
    fn test_error_page_fallback() {
        let err = DistributeError::ApiError {
            status: 500,
            message: "boom".to_string(),
        };
        assert_eq!(err.error_page(), ErrorPage::Unhandled);

        let err = DistributeError::Portal {
            page: ErrorPage::TeamNotFound,
            message: "no team".to_string(),
        };
        assert_eq!(err.error_page(), ErrorPage::TeamNotFound);
    }
}
