//! Upload command

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use console::style;
use tracing::info;

use launchpad_distribute::upload::{UploadOptions, UploadSession};
use launchpad_distribute::Release;

use crate::cli::output::{self, UploadProgressBar};
use crate::cli::{AppArgs, Cli, OutputFormat, Session};

/// Upload a binary and wait for the server to turn it into a release
#[derive(Debug, Args)]
pub struct UploadCommand {
    /// Path to the binary (ipa, apk, aab, msi, ...)
    pub file: PathBuf,

    #[command(flatten)]
    pub app: AppArgs,

    /// Only accept extensions the public store ingests
    #[arg(long)]
    pub public_store: bool,
}

impl UploadCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        info!(file = %self.file.display(), "executing upload command");
        let session = Session::open(&self.app, cli)?;
        let options = UploadOptions {
            os: session.os()?,
            public_store: self.public_store,
        };

        let runtime = tokio::runtime::Runtime::new()?;
        let release = runtime.block_on(async {
            let observer = Arc::new(UploadProgressBar::new(cli.is_interactive_text()));
            let mut upload = UploadSession::new(&session.ctx, observer);

            let cancel = upload.cancel_handle();
            tokio::select! {
                result = upload.begin_upload(&self.file, &options) => result,
                _ = tokio::signal::ctrl_c() => {
                    cancel.cancel();
                    Err(launchpad_distribute::DistributeError::Cancelled)
                }
            }
        })?;

        print_release(&release, cli)
    }
}

pub(super) fn print_release(release: &Release, cli: &Cli) -> anyhow::Result<()> {
    if cli.format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(release)?);
    } else if !cli.quiet {
        output::success("Upload completed");
        println!(
            "{}",
            output::key_value(
                "Version",
                &format!("{} ({})", style(&release.short_version).cyan(), release.version)
            )
        );
        println!("{}", output::key_value("Release", &release.id.to_string()));
    }
    Ok(())
}
