//! Launchpad - release distribution CLI

mod cli;
mod exit_codes;

use std::path::PathBuf;

use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use cli::Cli;

/// Console filter for `--verbose` when RUST_LOG is unset
const VERBOSE_FILTER: &str = "warn,launchpad=debug,launchpad_distribute=debug,launchpad_core=info";

fn main() {
    let cli = Cli::parse();
    let _guard = init_tracing(cli.verbose);

    if let Err(e) = cli.execute() {
        cli::output::error(&format!("{:#}", e));
        std::process::exit(exit_codes::for_error(&e));
    }
}

/// Console logging on stderr, plus a daily debug-level JSON file under
/// `~/.launchpad/logs` when the directory is writable.
fn init_tracing(verbose: bool) -> Option<WorkerGuard> {
    let console_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if verbose { VERBOSE_FILTER } else { "warn" })
    });
    let console = tracing_subscriber::fmt::layer()
        .with_target(verbose)
        .with_writer(std::io::stderr)
        .with_filter(console_filter);

    let (file, guard) = match log_directory() {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "launchpad.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(writer)
                .with_filter(EnvFilter::new("debug"));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry().with(console).with(file).init();
    guard
}

fn log_directory() -> Option<PathBuf> {
    let dir = dirs::home_dir()?.join(".launchpad").join("logs");
    std::fs::create_dir_all(&dir).ok()?;
    Some(dir)
}
