//! Completions command - shell completion scripts for launchpad

use std::path::{Path, PathBuf};

use clap::{Args, CommandFactory};
use clap_complete::{generate, Generator, Shell};
use tracing::info;

use crate::cli::{output, Cli};

const BIN_NAME: &str = "launchpad";

/// Generate shell completions
#[derive(Debug, Args)]
pub struct CompletionsCommand {
    /// Shell to generate completions for (defaults to $SHELL)
    #[arg(value_enum)]
    pub shell: Option<Shell>,

    /// Write to this file, or into this directory using the shell's file name
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

impl CompletionsCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        let shell = self
            .shell
            .or_else(Shell::from_env)
            .ok_or_else(|| anyhow::anyhow!("Could not detect the shell; pass it explicitly"))?;
        info!(%shell, "executing completions command");

        let mut cmd = Cli::command();
        let Some(output) = &self.output else {
            generate(shell, &mut cmd, BIN_NAME, &mut std::io::stdout());
            return Ok(());
        };

        let path = script_path(shell, output);
        let mut file = std::fs::File::create(&path)?;
        generate(shell, &mut cmd, BIN_NAME, &mut file);

        if !cli.quiet {
            output::success(&format!("Completions written to {}", path.display()));
        }
        Ok(())
    }
}

/// Resolve a directory to the conventional script name for `shell`
fn script_path(shell: Shell, output: &Path) -> PathBuf {
    if output.is_dir() {
        output.join(shell.file_name(BIN_NAME))
    } else {
        output.to_path_buf()
    }
}
