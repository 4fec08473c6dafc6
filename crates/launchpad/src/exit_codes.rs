//! Exit codes for the CLI

use launchpad_core::{ConfigError, LaunchpadError};
use launchpad_distribute::DistributeError;

/// Success
#[allow(dead_code)]
pub const SUCCESS: i32 = 0;

/// General error
pub const ERROR: i32 = 1;

/// Configuration error
pub const CONFIG_ERROR: i32 = 2;

/// Some destinations did not receive the release
pub const PARTIAL_FAILURE: i32 = 3;

/// Developer portal rejected the request
pub const PORTAL_ERROR: i32 = 4;

/// Validation error
pub const VALIDATION_ERROR: i32 = 5;

/// A remote job stopped making progress
pub const STALLED: i32 = 6;

/// User cancelled
pub const CANCELLED: i32 = 130;

/// Exit code for an error returned by a command
pub fn for_error(error: &anyhow::Error) -> i32 {
    if let Some(e) = error.downcast_ref::<DistributeError>() {
        return for_distribute_error(e);
    }
    if error.downcast_ref::<ConfigError>().is_some() {
        return CONFIG_ERROR;
    }
    match error.downcast_ref::<LaunchpadError>() {
        Some(LaunchpadError::Config(_)) => CONFIG_ERROR,
        Some(LaunchpadError::Distribute(e)) => for_distribute_error(e),
        _ => ERROR,
    }
}

fn for_distribute_error(error: &DistributeError) -> i32 {
    match error {
        DistributeError::Validation(_) => VALIDATION_ERROR,
        DistributeError::ConfigurationError(_) => CONFIG_ERROR,
        DistributeError::PartialFailure { .. } => PARTIAL_FAILURE,
        DistributeError::Portal { .. } => PORTAL_ERROR,
        DistributeError::Stalled(_) => STALLED,
        DistributeError::Cancelled => CANCELLED,
        _ => ERROR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distribute_errors_map_to_codes() {
        let err = anyhow::Error::new(DistributeError::PartialFailure {
            failed: vec!["Beta".to_string()],
        });
        assert_eq!(for_error(&err), PARTIAL_FAILURE);

        let err = anyhow::Error::new(DistributeError::Validation("bad".to_string()));
        assert_eq!(for_error(&err), VALIDATION_ERROR);

        let err = anyhow::Error::new(DistributeError::Cancelled);
        assert_eq!(for_error(&err), CANCELLED);
    }

    #[test]
    fn test_wrapped_config_error() {
        let err = anyhow::Error::new(LaunchpadError::Config(ConfigError::MissingField(
            "app.name".to_string(),
        )));
        assert_eq!(for_error(&err), CONFIG_ERROR);

        assert_eq!(for_error(&anyhow::anyhow!("boom")), ERROR);
    }
}
