//! Upload session
//!
//! Drives one binary from local file to a server-side release: ticket,
//! chunked transfer, processing poll, release fetch.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use super::extensions::validate_file_name;
use super::transfer::{TransferEvent, TransferSettings};
use crate::context::DistributionContext;
use crate::error::{DistributeError, Result};
use crate::traits::ChunkedTransfer;
use crate::types::{Release, ReleaseId, TargetOs, UploadState, UploadTicket};

/// Status of an upload session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStatus {
    NotStarted,
    /// Bytes are being transferred
    Started,
    /// Transfer finished, the server is processing the binary
    Processing,
    Successful,
    Failed,
    Cancelled,
}

impl UploadStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UploadStatus::Successful | UploadStatus::Failed | UploadStatus::Cancelled
        )
    }
}

/// Progress as shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadProgress {
    pub percent: u8,
    /// Set once all bytes are sent and the server is still processing
    pub indeterminate: bool,
}

/// Receives upload lifecycle callbacks.
///
/// `finished` and `failed` are mutually exclusive and fire at most once
/// per session.
pub trait UploadObserver: Send + Sync {
    fn progress(&self, _progress: UploadProgress) {}

    fn status_changed(&self, _status: UploadStatus) {}

    fn finished(&self, release: &Release);

    fn failed(&self, reason: &str);
}

/// Observer that ignores every callback
#[derive(Debug, Default)]
pub struct NoopObserver;

impl UploadObserver for NoopObserver {
    fn finished(&self, _release: &Release) {}

    fn failed(&self, _reason: &str) {}
}

/// What the binary is uploaded for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadOptions {
    pub os: TargetOs,
    /// Restrict accepted extensions to what the public store ingests
    pub public_store: bool,
}

/// Observable state of an upload session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSessionState {
    pub status: UploadStatus,
    pub percent: u8,
    pub asset_id: Option<String>,
    pub release_id: Option<ReleaseId>,
}

impl Default for UploadSessionState {
    fn default() -> Self {
        Self {
            status: UploadStatus::NotStarted,
            percent: 0,
            asset_id: None,
            release_id: None,
        }
    }
}

/// Cancels an upload from another task
#[derive(Clone)]
pub struct UploadCancelHandle {
    cancelled: Arc<AtomicBool>,
    transfer: Arc<dyn ChunkedTransfer>,
}

impl UploadCancelHandle {
    /// Request cancellation; repeated calls have no further effect
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            self.transfer.cancel();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for UploadCancelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadCancelHandle")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// One upload from file to release
pub struct UploadSession {
    ctx: DistributionContext,
    observer: Arc<dyn UploadObserver>,
    state: UploadSessionState,
    cancelled: Arc<AtomicBool>,
    reported: bool,
}

impl UploadSession {
    pub fn new(ctx: &DistributionContext, observer: Arc<dyn UploadObserver>) -> Self {
        Self {
            ctx: ctx.clone(),
            observer,
            state: UploadSessionState::default(),
            cancelled: Arc::new(AtomicBool::new(false)),
            reported: false,
        }
    }

    pub fn state(&self) -> &UploadSessionState {
        &self.state
    }

    pub fn status(&self) -> UploadStatus {
        self.state.status
    }

    pub fn cancel_handle(&self) -> UploadCancelHandle {
        UploadCancelHandle {
            cancelled: self.cancelled.clone(),
            transfer: self.ctx.transfer.clone(),
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Cancel any in-flight upload and return to `NotStarted`.
    ///
    /// Handles obtained before the reset no longer affect the session.
    pub fn reset(&mut self) {
        if matches!(
            self.state.status,
            UploadStatus::Started | UploadStatus::Processing
        ) {
            self.cancel_handle().cancel();
        }
        // Retire the old flag so stale handles cannot reach the next transfer
        self.cancelled.store(true, Ordering::SeqCst);
        self.state = UploadSessionState::default();
        self.cancelled = Arc::new(AtomicBool::new(false));
        self.reported = false;
    }

    /// Upload `file` and wait until the server has turned it into a release.
    ///
    /// Files failing local validation are rejected without a network call,
    /// the session stays `NotStarted` and no observer callback fires.
    #[instrument(skip(self, options), fields(app = %self.ctx.app, file = %file.display()))]
    pub async fn begin_upload(&mut self, file: &Path, options: &UploadOptions) -> Result<Release> {
        if self.state.status != UploadStatus::NotStarted {
            return Err(DistributeError::InvalidState(
                "An upload has already been started; reset the session first".to_string(),
            ));
        }

        validate_file(file, options).await?;

        let result = self.run(file).await;
        match &result {
            Ok(release) => {
                info!(release_id = release.id, "Upload finished");
                self.report_finished(release);
            }
            Err(e) => {
                warn!(error = %e, "Upload did not complete");
                self.report_failed(e);
            }
        }
        result
    }

    async fn run(&mut self, file: &Path) -> Result<Release> {
        self.ensure_not_cancelled()?;

        let ticket = self.ctx.uploads.create_upload_ticket(&self.ctx.app).await?;
        debug!(upload_id = %ticket.upload_id, asset_id = %ticket.asset_id, "Upload ticket created");

        self.state.asset_id = Some(ticket.asset_id.clone());
        self.state.percent = 0;
        self.set_status(UploadStatus::Started);
        self.ensure_not_cancelled()?;

        self.transfer(file, &ticket).await?;

        self.set_status(UploadStatus::Processing);
        self.ctx
            .uploads
            .patch_upload_status(&self.ctx.app, &ticket.upload_id, UploadState::UploadFinished)
            .await?;

        let release_id = self.wait_for_release(&ticket.upload_id).await?;
        let release = self.ctx.uploads.get_release(&self.ctx.app, release_id).await?;

        self.state.release_id = Some(release.id);
        self.set_status(UploadStatus::Successful);
        Ok(release)
    }

    async fn transfer(&mut self, file: &Path, ticket: &UploadTicket) -> Result<()> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let transfer = self.ctx.transfer.clone();
        let settings = TransferSettings::from(ticket);
        let path = file.to_path_buf();

        let task = tokio::spawn(async move { transfer.start(&path, &settings, tx).await });

        // The channel closes when the transfer task returns
        while let Some(event) = rx.recv().await {
            if self.is_cancelled() {
                self.ctx.transfer.cancel();
            }
            match event {
                TransferEvent::Progress(progress) => self.record_progress(progress.percent),
                TransferEvent::StateChanged(state) => debug!(?state, "Transfer state changed"),
                TransferEvent::Completed => debug!("Transfer completed"),
            }
        }

        let result = task
            .await
            .map_err(|e| DistributeError::Other(format!("Transfer task failed: {}", e)))?;

        self.ensure_not_cancelled()?;
        result
    }

    fn record_progress(&mut self, percent: f64) {
        let percent = percent.clamp(0.0, 100.0).floor() as u8;
        if percent <= self.state.percent {
            return;
        }

        self.state.percent = percent;
        self.observer.progress(UploadProgress {
            percent: self.state.percent,
            indeterminate: self.state.percent >= 100,
        });
    }

    async fn wait_for_release(&self, upload_id: &str) -> Result<ReleaseId> {
        let started = Instant::now();

        loop {
            self.ensure_not_cancelled()?;

            let status = self
                .ctx
                .uploads
                .get_upload_status(&self.ctx.app, upload_id)
                .await?;
            debug!(state = ?status.upload_status, "Upload processing status");

            match status.upload_status {
                UploadState::ReadyToBePublished => {
                    return status.release_distinct_id.ok_or_else(|| {
                        DistributeError::UploadFailed(
                            "Upload is ready but no release id was returned".to_string(),
                        )
                    });
                }
                UploadState::MalwareDetected => {
                    return Err(DistributeError::MalwareDetected(
                        status
                            .error_details
                            .unwrap_or_else(|| "The binary was flagged by the scanner".to_string()),
                    ));
                }
                UploadState::Error => {
                    return Err(DistributeError::UploadFailed(
                        status
                            .error_details
                            .unwrap_or_else(|| "Processing failed".to_string()),
                    ));
                }
                UploadState::UploadStarted | UploadState::UploadFinished => {}
            }

            if let Some(max) = self.ctx.settings.upload_max_processing {
                if started.elapsed() >= max {
                    return Err(DistributeError::Stalled(format!(
                        "Upload {} still processing after {}s",
                        upload_id,
                        max.as_secs()
                    )));
                }
            }

            tokio::time::sleep(self.ctx.settings.upload_poll_interval).await;
        }
    }

    fn ensure_not_cancelled(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(DistributeError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn set_status(&mut self, status: UploadStatus) {
        if self.state.status != status {
            self.state.status = status;
            self.observer.status_changed(status);
        }
    }

    fn report_finished(&mut self, release: &Release) {
        if !self.reported {
            self.reported = true;
            self.observer.finished(release);
        }
    }

    fn report_failed(&mut self, error: &DistributeError) {
        let status = if matches!(error, DistributeError::Cancelled) {
            UploadStatus::Cancelled
        } else {
            UploadStatus::Failed
        };
        self.set_status(status);

        if !self.reported {
            self.reported = true;
            self.observer.failed(&error.to_string());
        }
    }
}

impl std::fmt::Debug for UploadSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadSession")
            .field("state", &self.state)
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

async fn validate_file(file: &Path, options: &UploadOptions) -> Result<()> {
    let file_name = file
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            DistributeError::Validation(format!("Invalid file name: {}", file.display()))
        })?;

    validate_file_name(file_name, options.os, options.public_store)?;

    let metadata = tokio::fs::metadata(file)
        .await
        .map_err(|_| DistributeError::Validation(format!("File not found: {}", file.display())))?;

    if !metadata.is_file() {
        return Err(DistributeError::Validation(format!(
            "Not a file: {}",
            file.display()
        )));
    }
    if metadata.len() == 0 {
        return Err(DistributeError::Validation(format!(
            "File is empty: {}",
            file.display()
        )));
    }
    Ok(())
}
