//! Session context shared by every component of one distribution session

use std::sync::Arc;
use std::time::Duration;

use crate::api::ApiClient;
use crate::traits::*;
use crate::types::AppRef;
use crate::upload::HttpChunkedTransfer;

/// Runtime settings for the pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct DistributionSettings {
    /// Delay between upload-processing status checks
    pub upload_poll_interval: Duration,
    /// Ceiling on upload processing; `None` waits indefinitely
    pub upload_max_processing: Option<Duration>,
    /// Delay between resigning status checks
    pub status_poll_interval: Duration,
    /// Ceiling on a resigning poll; `None` waits indefinitely
    pub status_max_duration: Option<Duration>,
    /// Maximum distinct individual testers in one distribution
    pub max_testers: usize,
    /// Estimated reach above which the wizard warns
    pub estimated_user_soft_limit: u32,
    /// Whether testers are emailed about the release
    pub notify_testers: bool,
}

impl Default for DistributionSettings {
    fn default() -> Self {
        Self {
            upload_poll_interval: Duration::from_secs(1),
            upload_max_processing: None,
            status_poll_interval: Duration::from_secs(5),
            status_max_duration: None,
            max_testers: 100,
            estimated_user_soft_limit: 2000,
            notify_testers: true,
        }
    }
}

/// Collaborators and settings for one distribution session.
///
/// Built once at the top of a session and handed to each component by
/// reference, so that every component sees the same stores.
#[derive(Clone)]
pub struct DistributionContext {
    pub app: AppRef,
    pub uploads: Arc<dyn UploadService>,
    pub transfer: Arc<dyn ChunkedTransfer>,
    pub portal: Arc<dyn DeveloperPortal>,
    pub status: Arc<dyn StatusResource>,
    pub distribution: Arc<dyn DistributionService>,
    pub groups: Arc<dyn DistributionGroups>,
    pub auto_provisioning: Arc<dyn AutoProvisioningStore>,
    pub notifier: Arc<dyn Notifier>,
    pub settings: DistributionSettings,
}

impl DistributionContext {
    /// Context backed by the REST API
    pub fn http(
        app: AppRef,
        client: ApiClient,
        notifier: Arc<dyn Notifier>,
        settings: DistributionSettings,
    ) -> Self {
        let transfer = Arc::new(HttpChunkedTransfer::new(client.http_client()));
        let client = Arc::new(client);

        Self {
            app,
            uploads: client.clone(),
            transfer,
            portal: client.clone(),
            status: client.clone(),
            distribution: client.clone(),
            groups: client.clone(),
            auto_provisioning: client,
            notifier,
            settings,
        }
    }
}

impl std::fmt::Debug for DistributionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributionContext")
            .field("app", &self.app)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
