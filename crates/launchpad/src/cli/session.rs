//! Shared setup for commands that talk to the distribution API

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Args;
use tracing::debug;

use launchpad_core::{load_config_or_default, Config, ConfigError};
use launchpad_distribute::api::{ApiClient, ApiClientConfig};
use launchpad_distribute::traits::Notifier;
use launchpad_distribute::{AppRef, DistributionContext, TargetOs};

use super::output::ConsoleNotifier;
use super::Cli;

/// App selection shared by commands
#[derive(Debug, Clone, Args)]
pub struct AppArgs {
    /// App as owner/name (defaults to [app] in the config)
    #[arg(long, env = "LAUNCHPAD_APP")]
    pub app: Option<String>,

    /// Target OS of the app (ios, tvos, android, macos, windows, custom)
    #[arg(long, env = "LAUNCHPAD_OS")]
    pub os: Option<String>,
}

/// Everything a command needs to run the pipeline
pub struct Session {
    pub config: Config,
    pub ctx: DistributionContext,
    os: Option<TargetOs>,
}

impl Session {
    /// Load configuration and connect to the API
    pub fn open(args: &AppArgs, cli: &Cli) -> anyhow::Result<Self> {
        let cwd = std::env::current_dir()?;
        let (config, path) = load_config_or_default(&cwd)?;
        if let Some(path) = &path {
            debug!(path = %path.display(), "using config");
        }

        let app = resolve_app(args, &config)?;
        let os = resolve_os(args, &config)?;

        let token = config
            .api_token()
            .ok_or_else(|| {
                ConfigError::MissingField("api.token (or LAUNCHPAD_API_TOKEN)".to_string())
            })?;
        let client = ApiClient::new(ApiClientConfig {
            base_url: config.api.base_url.clone(),
            token,
            timeout: Duration::from_secs(config.api.timeout_secs),
        })?;

        let notifier: Arc<dyn Notifier> = Arc::new(ConsoleNotifier::new(cli.quiet));
        let ctx = DistributionContext::http(app, client, notifier, config.distribution_settings());

        Ok(Self { config, ctx, os })
    }

    /// Target OS, required by commands that upload or register devices
    pub fn os(&self) -> anyhow::Result<TargetOs> {
        self.os
            .ok_or_else(|| ConfigError::MissingField("app.os (or --os)".to_string()).into())
    }
}

fn resolve_app(args: &AppArgs, config: &Config) -> anyhow::Result<AppRef> {
    if let Some(app) = &args.app {
        return Ok(app.parse()?);
    }

    match (&config.app.owner, &config.app.name) {
        (Some(owner), Some(name)) => Ok(AppRef::new(owner, name)),
        _ => Err(ConfigError::MissingField("app.owner / app.name (or --app)".to_string()))
            .context("No app selected"),
    }
}

fn resolve_os(args: &AppArgs, config: &Config) -> anyhow::Result<Option<TargetOs>> {
    let Some(os) = args.os.as_deref().or(config.app.os.as_deref()) else {
        return Ok(None);
    };
    Ok(Some(os.parse()?))
}
