//! Configuration types

use std::time::Duration;

use serde::{Deserialize, Serialize};

use launchpad_distribute::DistributionSettings;

/// Main configuration for Launchpad
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Version of the config schema
    #[serde(rename = "$schema", skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,

    /// Distribution API connection
    pub api: ApiConfig,

    /// Default app to operate on
    pub app: AppConfig,

    /// Binary upload behaviour
    pub upload: UploadConfig,

    /// Device provisioning and resigning
    pub provisioning: ProvisioningConfig,

    /// Destination selection and fan-out
    pub distribution: DistributionConfig,
}

impl Config {
    /// Build the runtime settings used by the distribution pipeline
    pub fn distribution_settings(&self) -> DistributionSettings {
        DistributionSettings {
            upload_poll_interval: Duration::from_millis(self.upload.poll_interval_ms),
            upload_max_processing: self.upload.max_processing_secs.map(Duration::from_secs),
            status_poll_interval: Duration::from_secs(self.provisioning.status_poll_interval_secs),
            status_max_duration: self.provisioning.max_poll_secs.map(Duration::from_secs),
            max_testers: self.distribution.max_testers,
            estimated_user_soft_limit: self.distribution.estimated_user_soft_limit,
            notify_testers: self.distribution.notify_testers,
        }
    }

    /// API token, preferring the `LAUNCHPAD_API_TOKEN` environment variable
    pub fn api_token(&self) -> Option<String> {
        std::env::var("LAUNCHPAD_API_TOKEN")
            .ok()
            .filter(|t| !t.is_empty())
            .or_else(|| self.api.token.clone())
    }
}

/// Distribution API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL of the REST API
    pub base_url: String,

    /// API token (prefer the LAUNCHPAD_API_TOKEN environment variable)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.appcenter.ms".to_string(),
            token: None,
            timeout_secs: 60,
        }
    }
}

/// Default app configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Owner (user or organization) of the app
    pub owner: Option<String>,

    /// App name
    pub name: Option<String>,

    /// Target OS (ios, tvos, android, macos, windows, custom)
    pub os: Option<String>,
}

/// Upload configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Delay between upload-processing status checks, in milliseconds
    pub poll_interval_ms: u64,

    /// Give up waiting for server-side processing after this many seconds
    pub max_processing_secs: Option<u64>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            max_processing_secs: None,
        }
    }
}

/// Provisioning configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisioningConfig {
    /// Delay between resigning status checks, in seconds
    pub status_poll_interval_secs: u64,

    /// Give up polling a resigning job after this many seconds
    pub max_poll_secs: Option<u64>,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            status_poll_interval_secs: 5,
            max_poll_secs: None,
        }
    }
}

/// Distribution configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DistributionConfig {
    /// Maximum number of individual testers in one distribution
    pub max_testers: usize,

    /// Soft limit on the estimated number of users reached
    pub estimated_user_soft_limit: u32,

    /// Whether testers are emailed about new releases
    pub notify_testers: bool,

    /// Whether new releases are marked as mandatory updates by default
    pub mandatory_update: bool,
}

impl Default for DistributionConfig {
    fn default() -> Self {
        Self {
            max_testers: 100,
            estimated_user_soft_limit: 2000,
            notify_testers: true,
            mandatory_update: false,
        }
    }
}
