//! CLI definition and command handling

pub mod commands;
pub mod output;
mod session;

use clap::{Parser, Subcommand};

use commands::{
    CompletionsCommand, DevicesCommand, DistributeCommand, GroupsCommand, InitCommand,
    StatusCommand, UploadCommand,
};

pub use session::{AppArgs, Session};

/// Launchpad - upload builds and distribute them to testers
#[derive(Debug, Parser)]
#[command(name = "launchpad")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Output format
    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Working directory
    #[arg(short = 'C', long, global = true)]
    pub directory: Option<std::path::PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Output format for CLI
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    #[default]
    Text,
    /// JSON output
    Json,
}

impl Cli {
    /// Whether human-readable progress and messages should be printed
    pub fn is_interactive_text(&self) -> bool {
        !self.quiet && self.format == OutputFormat::Text
    }
}

/// Available commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Initialize a new Launchpad configuration
    Init(InitCommand),

    /// Upload a binary, register devices if needed and distribute the release
    Distribute(DistributeCommand),

    /// Upload a binary and wait until it becomes a release
    Upload(UploadCommand),

    /// Developer portal device registration
    Devices(DevicesCommand),

    /// Edit distribution group membership
    Groups(GroupsCommand),

    /// Poll a provisioning status resource until it finishes
    Status(StatusCommand),

    /// Generate shell completions
    Completions(CompletionsCommand),
}

impl Cli {
    /// Execute the CLI command
    pub fn execute(&self) -> anyhow::Result<()> {
        // Change to specified directory if provided
        if let Some(dir) = &self.directory {
            std::env::set_current_dir(dir)?;
        }

        match self.command {
            Commands::Init(ref cmd) => cmd.execute(self),
            Commands::Distribute(ref cmd) => cmd.execute(self),
            Commands::Upload(ref cmd) => cmd.execute(self),
            Commands::Devices(ref cmd) => cmd.execute(self),
            Commands::Groups(ref cmd) => cmd.execute(self),
            Commands::Status(ref cmd) => cmd.execute(self),
            Commands::Completions(ref cmd) => cmd.execute(self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_distribute_with_destinations() {
        let cli = Cli::try_parse_from([
            "launchpad",
            "--format",
            "json",
            "distribute",
            "app.ipa",
            "--app",
            "acme/rocket",
            "--group",
            "g-1=Beta",
            "--tester",
            "ann@example.com,bob@example.com",
        ])
        .unwrap();

        assert_eq!(cli.format, OutputFormat::Json);
        let Commands::Distribute(cmd) = cli.command else {
            panic!("expected distribute");
        };
        assert_eq!(cmd.testers.len(), 2);
        assert_eq!(cmd.groups, vec!["g-1=Beta".to_string()]);
    }
}
