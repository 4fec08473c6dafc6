//! Default configuration values

use super::types::Config;

/// Default configuration file name (TOML)
pub const DEFAULT_CONFIG_TOML: &str = "launchpad.toml";

/// Default configuration file name (YAML)
pub const DEFAULT_CONFIG_YAML: &str = "launchpad.yaml";

/// Alternative configuration file name
pub const ALT_CONFIG_FILE: &str = ".launchpad.yaml";

/// Get list of config file names to search for
pub fn config_file_names() -> Vec<&'static str> {
    vec![
        DEFAULT_CONFIG_TOML,
        DEFAULT_CONFIG_YAML,
        ALT_CONFIG_FILE,
        ".launchpad.toml",
    ]
}

/// Generate default configuration TOML
pub fn default_config_toml() -> String {
    let config = Config::default();
    toml::to_string_pretty(&config).unwrap_or_else(|_| DEFAULT_CONFIG_TEMPLATE.to_string())
}

/// Default configuration template
pub const DEFAULT_CONFIG_TEMPLATE: &str = r#"# Launchpad Configuration

[api]
base_url = "https://api.appcenter.ms"
timeout_secs = 60

[app]
# owner = "my-org"
# name = "my-app"
# os = "ios"

[upload]
poll_interval_ms = 1000
# max_processing_secs = 1800

[provisioning]
status_poll_interval_secs = 5
# max_poll_secs = 3600

[distribution]
max_testers = 100
estimated_user_soft_limit = 2000
notify_testers = true
mandatory_update = false
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_parses() {
        let config: Config = toml::from_str(DEFAULT_CONFIG_TEMPLATE).unwrap();
        assert_eq!(config.upload.poll_interval_ms, 1000);
        assert!(config.distribution.notify_testers);
    }

    #[test]
    fn test_generated_config_round_trips() {
        let generated = default_config_toml();
        let config: Config = toml::from_str(&generated).unwrap();
        assert_eq!(config.distribution.max_testers, 100);
    }
}
