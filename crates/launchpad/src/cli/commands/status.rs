//! Status command - follow a provisioning status resource

use std::time::Duration;

use clap::Args;
use serde_json::json;
use tracing::info;

use launchpad_distribute::notify::LearnMore;
use launchpad_distribute::{PollOutcome, StatusPoller};

use crate::cli::{output, AppArgs, Cli, OutputFormat, Session};

/// Poll a provisioning status URL until the job finishes
#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Status URL returned by a registration or release update
    pub url: String,

    #[command(flatten)]
    pub app: AppArgs,

    /// Seconds between status checks (defaults to the configured interval)
    #[arg(long)]
    pub interval: Option<u64>,

    /// Give up after this many seconds
    #[arg(long)]
    pub timeout: Option<u64>,
}

impl StatusCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        info!(url = %self.url, "executing status command");
        let mut session = Session::open(&self.app, cli)?;
        if let Some(interval) = self.interval {
            session.ctx.settings.status_poll_interval = Duration::from_secs(interval.max(1));
        }
        if let Some(timeout) = self.timeout {
            session.ctx.settings.status_max_duration = Some(Duration::from_secs(timeout));
        }

        let runtime = tokio::runtime::Runtime::new()?;
        runtime.block_on(self.follow(&session, cli))
    }

    async fn follow(&self, session: &Session, cli: &Cli) -> anyhow::Result<()> {
        let mut poller = StatusPoller::new(&session.ctx).with_learn_more(LearnMore {
            label: "Retry with".to_string(),
            target: format!("launchpad status {}", self.url),
        });

        if cli.is_interactive_text() {
            output::info(&format!("Waiting for {}", self.url));
        }
        poller.start_polling(self.url.as_str());
        let outcome = poller.wait().await?;
        let snapshot = poller.snapshot();

        if cli.format == OutputFormat::Json {
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "outcome": outcome_name(&outcome),
                    "last_status": snapshot.last_status,
                }))?
            );
        }

        match outcome {
            PollOutcome::Succeeded | PollOutcome::Idle => Ok(()),
            PollOutcome::Failed { message } => anyhow::bail!("Provisioning failed: {}", message),
            PollOutcome::Stalled => Err(launchpad_distribute::DistributeError::Stalled(
                format!("{} did not finish in time", self.url),
            )
            .into()),
            PollOutcome::Stopped => Err(launchpad_distribute::DistributeError::Cancelled.into()),
        }
    }
}

fn outcome_name(outcome: &PollOutcome) -> &'static str {
    match outcome {
        PollOutcome::Succeeded => "succeeded",
        PollOutcome::Failed { .. } => "failed",
        PollOutcome::Stalled => "stalled",
        PollOutcome::Stopped => "stopped",
        PollOutcome::Idle => "idle",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_names() {
        assert_eq!(outcome_name(&PollOutcome::Succeeded), "succeeded");
        assert_eq!(
            outcome_name(&PollOutcome::Failed {
                message: "x".to_string()
            }),
            "failed"
        );
        assert_eq!(outcome_name(&PollOutcome::Stalled), "stalled");
    }
}
