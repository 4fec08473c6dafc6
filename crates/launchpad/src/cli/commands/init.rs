//! Init command

use std::path::PathBuf;

use clap::Args;
use console::style;
use dialoguer::{Confirm, Input, Select};
use tracing::info;

use launchpad_core::config::defaults::{DEFAULT_CONFIG_TEMPLATE, DEFAULT_CONFIG_TOML};
use launchpad_core::config::validate_config;
use launchpad_core::Config;
use launchpad_distribute::{AppRef, TargetOs};

use crate::cli::Cli;

/// Initialize a new Launchpad configuration
#[derive(Debug, Args)]
pub struct InitCommand {
    /// Force overwrite existing configuration
    #[arg(short, long)]
    pub force: bool,

    /// Use defaults without prompting
    #[arg(short = 'y', long)]
    pub yes: bool,

    /// Default app as owner/name
    #[arg(long)]
    pub app: Option<String>,

    /// Target OS of the default app
    #[arg(long)]
    pub os: Option<String>,

    /// Output file path
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

impl InitCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        info!(force = self.force, yes = self.yes, "executing init command");
        let cwd = std::env::current_dir()?;
        let config_path = self
            .output
            .clone()
            .unwrap_or_else(|| cwd.join(DEFAULT_CONFIG_TOML));

        if config_path.exists() && !self.force {
            if self.yes {
                anyhow::bail!(
                    "Configuration file already exists at {}. Use --force to overwrite.",
                    config_path.display()
                );
            }

            let overwrite = Confirm::new()
                .with_prompt(format!(
                    "Configuration file already exists at {}. Overwrite?",
                    config_path.display()
                ))
                .default(false)
                .interact()?;

            if !overwrite {
                println!("{}", style("Aborted.").yellow());
                return Ok(());
            }
        }

        let format = if self.yes || self.output.is_some() {
            if config_path.extension().is_some_and(|e| e == "yaml" || e == "yml") {
                "yaml"
            } else {
                "toml"
            }
        } else {
            let formats = ["toml", "yaml"];
            let selection = Select::new()
                .with_prompt("Configuration format")
                .items(&formats)
                .default(0)
                .interact()?;
            formats[selection]
        };

        let config_path = if format == "yaml"
            && config_path.extension().is_some_and(|e| e == "toml")
        {
            config_path.with_extension("yaml")
        } else {
            config_path
        };

        let app = match &self.app {
            Some(app) => Some(app.parse::<AppRef>()?),
            None if !self.yes => prompt_app()?,
            None => None,
        };
        let os = match &self.os {
            Some(os) => Some(os.parse::<TargetOs>()?),
            None => None,
        };

        let content = render(format, app.as_ref(), os)?;
        std::fs::write(&config_path, &content)?;

        if !cli.quiet {
            println!(
                "{} Created configuration at {}",
                style("✓").green().bold(),
                style(config_path.display()).cyan()
            );
            println!();
            println!("Next steps:");
            println!("  1. Export {} with your API token", style("LAUNCHPAD_API_TOKEN").cyan());
            println!("  2. Run {} to upload a build", style("launchpad upload <file>").cyan());
            println!(
                "  3. Run {} to send it to testers",
                style("launchpad distribute <file> --group <id>=<name>").cyan()
            );
        }

        Ok(())
    }
}

fn prompt_app() -> anyhow::Result<Option<AppRef>> {
    let value: String = Input::new()
        .with_prompt("Default app (owner/name, empty to skip)")
        .allow_empty(true)
        .interact_text()?;
    if value.trim().is_empty() {
        return Ok(None);
    }
    Ok(Some(value.trim().parse()?))
}

/// Render the configuration file. The commented TOML template is kept
/// verbatim unless an app was given.
fn render(format: &str, app: Option<&AppRef>, os: Option<TargetOs>) -> anyhow::Result<String> {
    if format == "toml" && app.is_none() && os.is_none() {
        return Ok(DEFAULT_CONFIG_TEMPLATE.to_string());
    }

    let mut config: Config = toml::from_str(DEFAULT_CONFIG_TEMPLATE)?;
    if let Some(app) = app {
        config.app.owner = Some(app.owner.clone());
        config.app.name = Some(app.name.clone());
    }
    config.app.os = os.map(|os| os.to_string().to_lowercase());
    validate_config(&config)?;

    let content = if format == "yaml" {
        serde_yaml::to_string(&config)?
    } else {
        format!("# Launchpad Configuration\n\n{}", toml::to_string_pretty(&config)?)
    };
    Ok(content)
}
