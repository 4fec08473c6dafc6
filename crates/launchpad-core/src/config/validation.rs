//! Configuration validation

use tracing::debug;

use launchpad_distribute::TargetOs;

use crate::error::{ConfigError, Result};

use super::types::Config;

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    debug!("validating configuration");
    validate_api(config)?;
    validate_app(config)?;
    validate_polling(config)?;
    validate_distribution(config)?;
    debug!("configuration validation passed");
    Ok(())
}

fn invalid(field: &str, message: impl Into<String>) -> crate::error::LaunchpadError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        message: message.into(),
    }
    .into()
}

fn validate_api(config: &Config) -> Result<()> {
    let parsed = url::Url::parse(&config.api.base_url)
        .map_err(|e| invalid("api.base_url", format!("not a valid URL: {}", e)))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(invalid("api.base_url", "must use http or https"));
    }

    if config.api.timeout_secs == 0 {
        return Err(invalid("api.timeout_secs", "must be greater than zero"));
    }

    Ok(())
}

fn validate_app(config: &Config) -> Result<()> {
    if let Some(os) = &config.app.os {
        if os.parse::<TargetOs>().is_err() {
            return Err(invalid(
                "app.os",
                "must be one of: ios, tvos, android, macos, windows, custom",
            ));
        }
    }

    for (field, value) in [("app.owner", &config.app.owner), ("app.name", &config.app.name)] {
        if value.as_deref().is_some_and(|v| v.trim().is_empty() || v.contains('/')) {
            return Err(invalid(field, "cannot be empty or contain '/'"));
        }
    }

    Ok(())
}

fn validate_polling(config: &Config) -> Result<()> {
    if config.upload.poll_interval_ms == 0 {
        return Err(invalid("upload.poll_interval_ms", "must be greater than zero"));
    }

    if config.provisioning.status_poll_interval_secs == 0 {
        return Err(invalid(
            "provisioning.status_poll_interval_secs",
            "must be greater than zero",
        ));
    }

    if config.upload.max_processing_secs == Some(0) {
        return Err(invalid("upload.max_processing_secs", "must be greater than zero"));
    }

    if config.provisioning.max_poll_secs == Some(0) {
        return Err(invalid("provisioning.max_poll_secs", "must be greater than zero"));
    }

    Ok(())
}

fn validate_distribution(config: &Config) -> Result<()> {
    if config.distribution.max_testers == 0 {
        return Err(invalid("distribution.max_testers", "must be greater than zero"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_default_config() {
        let config = Config::default();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_invalid_base_url() {
        let mut config = Config::default();
        config.api.base_url = "ftp://example.com".to_string();
        assert!(validate_config(&config).is_err());

        config.api.base_url = "not a url".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_unknown_os() {
        let mut config = Config::default();
        config.app.os = Some("symbian".to_string());
        assert!(validate_config(&config).is_err());

        config.app.os = Some("iOS".to_string());
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_app_name_with_slash() {
        let mut config = Config::default();
        config.app.name = Some("acme/rocket".to_string());
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_zero_tester_limit() {
        let mut config = Config::default();
        config.distribution.max_testers = 0;
        assert!(validate_config(&config).is_err());
    }
}
