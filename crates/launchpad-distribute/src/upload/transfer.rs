//! Chunked transfer to the blob ingestion endpoint

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, instrument};

use crate::error::{DistributeError, Result};
use crate::traits::ChunkedTransfer;
use crate::types::UploadTicket;

/// Where and how to send the bytes of one upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSettings {
    pub asset_id: String,
    pub upload_domain: String,
    /// Already URL-encoded
    pub token: String,
}

impl From<&UploadTicket> for TransferSettings {
    fn from(ticket: &UploadTicket) -> Self {
        Self {
            asset_id: ticket.asset_id.clone(),
            upload_domain: ticket.upload_domain.trim_end_matches('/').to_string(),
            token: ticket.token.clone(),
        }
    }
}

/// Lifecycle of a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Initialized,
    Uploading,
    Finishing,
    Done,
    Cancelled,
}

/// Snapshot of transfer progress
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransferProgress {
    /// 0.0 to 100.0
    pub percent: f64,
    pub bytes_sent: u64,
    pub total_bytes: u64,
    /// Bytes per second since the transfer started
    pub average_speed: f64,
}

impl TransferProgress {
    fn new(bytes_sent: u64, total_bytes: u64, sent_this_run: u64, started: Instant) -> Self {
        let percent = if total_bytes == 0 {
            100.0
        } else {
            bytes_sent as f64 * 100.0 / total_bytes as f64
        };
        let elapsed = started.elapsed().as_secs_f64();
        let average_speed = if elapsed > 0.0 {
            sent_this_run as f64 / elapsed
        } else {
            0.0
        };

        Self {
            percent,
            bytes_sent,
            total_bytes,
            average_speed,
        }
    }
}

/// Events emitted while a transfer runs
#[derive(Debug, Clone, PartialEq)]
pub enum TransferEvent {
    Progress(TransferProgress),
    StateChanged(TransferState),
    Completed,
}

#[derive(Debug, Deserialize)]
struct SetMetadataResponse {
    #[serde(default)]
    error: bool,
    #[serde(default)]
    error_code: Option<String>,
    chunk_size: u64,
    #[serde(default)]
    chunk_list: Vec<u64>,
}

#[derive(Debug, Deserialize)]
struct ChunkResponse {
    #[serde(default)]
    error: bool,
    #[serde(default)]
    error_code: Option<String>,
}

/// [`ChunkedTransfer`] over HTTP
pub struct HttpChunkedTransfer {
    client: Client,
    cancelled: AtomicBool,
}

impl HttpChunkedTransfer {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            cancelled: AtomicBool::new(false),
        }
    }

    fn check_cancelled(&self, events: &UnboundedSender<TransferEvent>) -> Result<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            let _ = events.send(TransferEvent::StateChanged(TransferState::Cancelled));
            return Err(DistributeError::Cancelled);
        }
        Ok(())
    }

    async fn set_metadata(
        &self,
        settings: &TransferSettings,
        file_name: &str,
        file_size: u64,
    ) -> Result<SetMetadataResponse> {
        let encoded_name: String =
            url::form_urlencoded::byte_serialize(file_name.as_bytes()).collect();
        let url = format!(
            "{}/upload/set_metadata/{}?file_name={}&file_size={}&token={}&content_type=application%2Foctet-stream",
            settings.upload_domain, settings.asset_id, encoded_name, file_size, settings.token
        );

        let response = self.client.post(&url).send().await?;
        if !response.status().is_success() {
            return Err(transfer_error(response).await);
        }

        let metadata: SetMetadataResponse = response.json().await?;
        if metadata.error || metadata.chunk_size == 0 {
            return Err(DistributeError::UploadFailed(format!(
                "Ingestion endpoint rejected metadata: {}",
                metadata.error_code.as_deref().unwrap_or("unknown error")
            )));
        }
        Ok(metadata)
    }

    async fn upload_chunk(
        &self,
        settings: &TransferSettings,
        block: u64,
        body: Vec<u8>,
    ) -> Result<()> {
        let url = format!(
            "{}/upload/upload_chunk/{}?token={}&block_number={}",
            settings.upload_domain, settings.asset_id, settings.token, block
        );

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/octet-stream")
            .body(body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(transfer_error(response).await);
        }

        let chunk: ChunkResponse = response.json().await?;
        if chunk.error {
            return Err(DistributeError::UploadFailed(format!(
                "Chunk {} rejected: {}",
                block,
                chunk.error_code.as_deref().unwrap_or("unknown error")
            )));
        }
        Ok(())
    }

    async fn finish(&self, settings: &TransferSettings) -> Result<()> {
        let url = format!(
            "{}/upload/finished/{}?token={}",
            settings.upload_domain, settings.asset_id, settings.token
        );

        let response = self.client.post(&url).send().await?;
        if !response.status().is_success() {
            return Err(transfer_error(response).await);
        }

        let finished: ChunkResponse = response.json().await?;
        if finished.error {
            return Err(DistributeError::UploadFailed(format!(
                "Ingestion endpoint could not finish the upload: {}",
                finished.error_code.as_deref().unwrap_or("unknown error")
            )));
        }
        Ok(())
    }
}

async fn transfer_error(response: reqwest::Response) -> DistributeError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    DistributeError::ApiError {
        status,
        message: body,
    }
}

/// Byte range of a 1-based block
fn block_range(block: u64, chunk_size: u64, file_size: u64) -> (u64, u64) {
    let start = (block.saturating_sub(1)).saturating_mul(chunk_size).min(file_size);
    let end = start.saturating_add(chunk_size).min(file_size);
    (start, end)
}

#[async_trait]
impl ChunkedTransfer for HttpChunkedTransfer {
    #[instrument(skip(self, settings, events), fields(asset_id = %settings.asset_id))]
    async fn start(
        &self,
        file: &Path,
        settings: &TransferSettings,
        events: UnboundedSender<TransferEvent>,
    ) -> Result<()> {
        self.cancelled.store(false, Ordering::SeqCst);
        let _ = events.send(TransferEvent::StateChanged(TransferState::Initialized));

        let file_size = tokio::fs::metadata(file).await?.len();
        let file_name = file
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                DistributeError::Validation(format!("Invalid file name: {}", file.display()))
            })?;

        let metadata = self.set_metadata(settings, file_name, file_size).await?;
        let remaining: u64 = metadata
            .chunk_list
            .iter()
            .map(|&block| {
                let (start, end) = block_range(block, metadata.chunk_size, file_size);
                end - start
            })
            .sum();

        // A resumed upload only lists the blocks still missing
        let mut bytes_sent = file_size.saturating_sub(remaining);
        let mut sent_this_run = 0;
        let started = Instant::now();

        debug!(
            chunk_size = metadata.chunk_size,
            chunks = metadata.chunk_list.len(),
            resumed_bytes = bytes_sent,
            "Starting chunked transfer"
        );

        let _ = events.send(TransferEvent::StateChanged(TransferState::Uploading));
        let _ = events.send(TransferEvent::Progress(TransferProgress::new(
            bytes_sent,
            file_size,
            sent_this_run,
            started,
        )));

        let mut handle = tokio::fs::File::open(file).await?;
        for &block in &metadata.chunk_list {
            self.check_cancelled(&events)?;

            let (start, end) = block_range(block, metadata.chunk_size, file_size);
            let mut buffer = vec![0u8; (end - start) as usize];
            handle.seek(std::io::SeekFrom::Start(start)).await?;
            handle.read_exact(&mut buffer).await?;

            self.upload_chunk(settings, block, buffer).await?;

            bytes_sent += end - start;
            sent_this_run += end - start;
            let _ = events.send(TransferEvent::Progress(TransferProgress::new(
                bytes_sent,
                file_size,
                sent_this_run,
                started,
            )));
        }

        self.check_cancelled(&events)?;
        let _ = events.send(TransferEvent::StateChanged(TransferState::Finishing));
        self.finish(settings).await?;

        let _ = events.send(TransferEvent::StateChanged(TransferState::Done));
        let _ = events.send(TransferEvent::Completed);
        Ok(())
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_range() {
        assert_eq!(block_range(1, 4, 10), (0, 4));
        assert_eq!(block_range(2, 4, 10), (4, 8));
        assert_eq!(block_range(3, 4, 10), (8, 10));
        assert_eq!(block_range(4, 4, 10), (10, 10));
    }

    #[test]
    fn test_settings_from_ticket_trims_domain() {
        let ticket = UploadTicket {
            upload_id: "u-1".to_string(),
            asset_id: "a-1".to_string(),
            upload_domain: "https://upload.example.com/".to_string(),
            token: "t%3D".to_string(),
        };
        let settings = TransferSettings::from(&ticket);
        assert_eq!(settings.upload_domain, "https://upload.example.com");
        assert_eq!(settings.token, "t%3D");
    }

    #[test]
    fn test_progress_of_empty_file_is_complete() {
        let progress = TransferProgress::new(0, 0, 0, Instant::now());
        assert_eq!(progress.percent, 100.0);
    }

    #[test]
    fn test_progress_percent() {
        let progress = TransferProgress::new(25, 100, 25, Instant::now());
        assert_eq!(progress.percent, 25.0);
    }
}
