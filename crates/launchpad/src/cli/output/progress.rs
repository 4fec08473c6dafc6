//! Upload progress display

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

use launchpad_distribute::upload::{UploadObserver, UploadProgress, UploadStatus};
use launchpad_distribute::Release;

/// Progress bar during the transfer, spinner while the server processes
pub struct UploadProgressBar {
    bar: ProgressBar,
}

impl UploadProgressBar {
    pub fn new(visible: bool) -> Self {
        let bar = if visible {
            ProgressBar::new(100)
        } else {
            ProgressBar::hidden()
        };
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{msg:>12} [{bar:40.cyan/blue}] {pos:>3}%")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        bar.set_message("Uploading");
        Self { bar }
    }

    fn processing(&self) {
        self.bar.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        self.bar.set_message("Processing upload...");
        self.bar.enable_steady_tick(Duration::from_millis(120));
    }
}

impl UploadObserver for UploadProgressBar {
    fn progress(&self, progress: UploadProgress) {
        if progress.indeterminate {
            self.processing();
        } else {
            self.bar.set_position(u64::from(progress.percent));
        }
    }

    fn status_changed(&self, status: UploadStatus) {
        if status == UploadStatus::Processing {
            self.processing();
        }
    }

    fn finished(&self, release: &Release) {
        self.bar.finish_and_clear();
        tracing::debug!(release_id = release.id, "Upload progress closed");
    }

    fn failed(&self, _reason: &str) {
        self.bar.abandon();
    }
}
