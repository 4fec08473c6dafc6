//! Background polling of a resigning status resource

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::context::DistributionContext;
use crate::error::{DistributeError, Result};
use crate::notify::{LearnMore, Notification};
use crate::traits::{Notifier, StatusResource};
use crate::types::ProvisioningStatus;

/// How a poll ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Succeeded,
    Failed { message: String },
    /// The job did not reach a terminal state in time
    Stalled,
    /// Stopped by the caller or replaced by a newer poll
    Stopped,
    /// No poll was running
    Idle,
}

/// Flags mirrored from the running poll
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollSnapshot {
    pub is_polling: bool,
    pub succeeded: bool,
    pub failed: bool,
    pub last_status: Option<ProvisioningStatus>,
}

#[derive(Debug, Default)]
struct PollState {
    // Bumped on every start and stop; a task only reports for its own generation
    generation: u64,
    snapshot: PollSnapshot,
}

struct PollTask {
    url: String,
    generation: u64,
    status: Arc<dyn StatusResource>,
    notifier: Arc<dyn Notifier>,
    interval: Duration,
    max_duration: Option<Duration>,
    learn_more: Option<LearnMore>,
    success_message: String,
    state: Arc<Mutex<PollState>>,
}

/// Polls a status URL until the remote job succeeds or fails.
///
/// At most one poll runs at a time. Each poll produces at most one
/// notification, and none once it has been stopped.
pub struct StatusPoller {
    status: Arc<dyn StatusResource>,
    notifier: Arc<dyn Notifier>,
    interval: Duration,
    max_duration: Option<Duration>,
    learn_more: Option<LearnMore>,
    success_message: String,
    state: Arc<Mutex<PollState>>,
    handle: Option<JoinHandle<Result<PollOutcome>>>,
}

impl StatusPoller {
    pub fn new(ctx: &DistributionContext) -> Self {
        Self {
            status: ctx.status.clone(),
            notifier: ctx.notifier.clone(),
            interval: ctx.settings.status_poll_interval,
            max_duration: ctx.settings.status_max_duration,
            learn_more: None,
            success_message: "The release was resigned and is ready for testers".to_string(),
            state: Arc::new(Mutex::new(PollState::default())),
            handle: None,
        }
    }

    /// Attach a learn-more action to failure notifications
    pub fn with_learn_more(mut self, learn_more: LearnMore) -> Self {
        self.learn_more = Some(learn_more);
        self
    }

    pub fn with_success_message(mut self, message: impl Into<String>) -> Self {
        self.success_message = message.into();
        self
    }

    /// Start polling `url`, stopping any poll already running
    pub fn start_polling(&mut self, url: impl Into<String>) {
        self.stop_polling();

        let url = url.into();
        let generation = {
            let mut state = self.lock();
            state.generation += 1;
            state.snapshot = PollSnapshot {
                is_polling: true,
                ..PollSnapshot::default()
            };
            state.generation
        };

        info!(url = %url, "Polling resigning status");

        let task = PollTask {
            url,
            generation,
            status: self.status.clone(),
            notifier: self.notifier.clone(),
            interval: self.interval,
            max_duration: self.max_duration,
            learn_more: self.learn_more.clone(),
            success_message: self.success_message.clone(),
            state: self.state.clone(),
        };
        self.handle = Some(tokio::spawn(task.run()));
    }

    /// Stop the current poll. Safe to call repeatedly or with no poll running.
    pub fn stop_polling(&mut self) {
        {
            let mut state = self.lock();
            if state.snapshot.is_polling {
                debug!("Stopping status poll");
            }
            state.generation += 1;
            state.snapshot.is_polling = false;
        }
        if let Some(handle) = &self.handle {
            handle.abort();
        }
    }

    /// Wait for the current poll to end.
    ///
    /// A failed status fetch ends the poll and is returned here.
    pub async fn wait(&mut self) -> Result<PollOutcome> {
        let Some(handle) = self.handle.take() else {
            return Ok(PollOutcome::Idle);
        };

        match handle.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Ok(PollOutcome::Stopped),
            Err(e) => Err(DistributeError::Other(format!("Status poll task failed: {}", e))),
        }
    }

    pub fn snapshot(&self) -> PollSnapshot {
        self.lock().snapshot.clone()
    }

    pub fn is_polling(&self) -> bool {
        self.lock().snapshot.is_polling
    }

    pub fn status_succeeded(&self) -> bool {
        self.lock().snapshot.succeeded
    }

    pub fn status_failed(&self) -> bool {
        self.lock().snapshot.failed
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PollState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for StatusPoller {
    fn drop(&mut self) {
        if let Some(handle) = &self.handle {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for StatusPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusPoller")
            .field("interval", &self.interval)
            .field("max_duration", &self.max_duration)
            .field("snapshot", &self.snapshot())
            .finish_non_exhaustive()
    }
}

impl PollTask {
    async fn run(self) -> Result<PollOutcome> {
        let started = Instant::now();

        loop {
            let status = match self.status.get_status(&self.url).await {
                Ok(status) => status,
                Err(e) => {
                    warn!(url = %self.url, error = %e, "Status fetch failed, stopping poll");
                    let mut state = self.lock();
                    if state.generation == self.generation {
                        state.snapshot.is_polling = false;
                    }
                    return Err(e);
                }
            };
            debug!(status = %status.resigning_status, "Resigning status");

            if let Some(outcome) = self.record(status, started) {
                return Ok(outcome);
            }

            tokio::time::sleep(self.interval).await;
        }
    }

    /// Mirror `status` into the shared state, notifying on a terminal state
    fn record(&self, status: ProvisioningStatus, started: Instant) -> Option<PollOutcome> {
        let mut state = self.lock();
        if state.generation != self.generation {
            return Some(PollOutcome::Stopped);
        }

        let resigning = status.resigning_status;
        let message = status.error_message.clone().unwrap_or_else(|| match &status.error_code {
            Some(code) => format!("Resigning failed ({})", code),
            None => "Resigning failed".to_string(),
        });
        state.snapshot.last_status = Some(status);

        if resigning.is_success() {
            state.snapshot.is_polling = false;
            state.snapshot.succeeded = true;
            info!("Resigning completed");
            self.notifier
                .notify(&Notification::success(self.success_message.clone()));
            return Some(PollOutcome::Succeeded);
        }

        if resigning.is_failure() {
            state.snapshot.is_polling = false;
            state.snapshot.failed = true;
            warn!(message = %message, "Resigning failed");
            self.notifier
                .notify(&Notification::failure(message.clone(), self.learn_more.clone()));
            return Some(PollOutcome::Failed { message });
        }

        if let Some(max) = self.max_duration {
            if started.elapsed() >= max {
                state.snapshot.is_polling = false;
                warn!(url = %self.url, "Resigning made no progress in time");
                self.notifier.notify(&Notification::stalled(
                    format!(
                        "Resigning has not finished after {}s. It may still complete later.",
                        max.as_secs()
                    ),
                    self.learn_more.clone(),
                ));
                return Some(PollOutcome::Stalled);
            }
        }

        None
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PollState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
