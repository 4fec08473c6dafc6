//! Collaborator traits
//!
//! The orchestrator talks to the outside world only through these traits.
//! [`crate::api::ApiClient`] implements the HTTP-backed ones and
//! [`crate::upload::HttpChunkedTransfer`] implements [`ChunkedTransfer`].

use std::path::Path;

use tokio::sync::mpsc::UnboundedSender;

use crate::error::Result;
use crate::notify::Notification;
use crate::types::*;
use crate::upload::{TransferEvent, TransferSettings};

/// Upload ticket service
#[async_trait::async_trait]
pub trait UploadService: Send + Sync {
    /// Create an upload record and ticket for a new binary
    async fn create_upload_ticket(&self, app: &AppRef) -> Result<UploadTicket>;

    /// Move the upload record to a new state (typically `UploadFinished`)
    async fn patch_upload_status(&self, app: &AppRef, upload_id: &str, state: UploadState)
        -> Result<()>;

    /// Current processing state of an upload
    async fn get_upload_status(&self, app: &AppRef, upload_id: &str)
        -> Result<UploadStatusResponse>;

    /// Fetch a release record
    async fn get_release(&self, app: &AppRef, release_id: ReleaseId) -> Result<Release>;

    /// Create a release that points at an externally hosted binary
    async fn register_external_build(
        &self,
        app: &AppRef,
        request: &ExternalBuildRequest,
    ) -> Result<Release>;
}

/// Chunked transfer client for the blob ingestion endpoint
#[async_trait::async_trait]
pub trait ChunkedTransfer: Send + Sync {
    /// Transfer a file, reporting progress on `events`.
    ///
    /// Resolves once the ingestion endpoint has acknowledged the last chunk,
    /// or with [`crate::DistributeError::Cancelled`] after [`cancel`](Self::cancel).
    async fn start(
        &self,
        file: &Path,
        settings: &TransferSettings,
        events: UnboundedSender<TransferEvent>,
    ) -> Result<()>;

    /// Stop an in-flight transfer before its next chunk
    fn cancel(&self);
}

/// Developer portal connector
#[async_trait::async_trait]
pub trait DeveloperPortal: Send + Sync {
    /// Authenticate and fetch per-class device capacity
    async fn get_device_availability(
        &self,
        app: &AppRef,
        auth: &PortalAuth,
        release_id: Option<ReleaseId>,
    ) -> Result<AvailabilityOfDevices>;

    /// Devices of a group's testers that are not in the provisioning profile
    async fn unprovisioned_devices(
        &self,
        app: &AppRef,
        group_name: &str,
        release_id: Option<ReleaseId>,
    ) -> Result<Vec<UnprovisionedDevice>>;

    /// Register devices
    async fn publish_devices(
        &self,
        app: &AppRef,
        request: &PublishDevicesRequest,
    ) -> Result<DeviceRegistration>;

    /// Register devices and resign the release
    async fn publish_and_resign(
        &self,
        app: &AppRef,
        request: &ResignRequest,
    ) -> Result<DeviceRegistration>;

    /// Mark a stored service connection as no longer valid
    async fn invalidate_connection(&self, connection_id: &str) -> Result<()>;
}

/// Remote job status resource
#[async_trait::async_trait]
pub trait StatusResource: Send + Sync {
    async fn get_status(&self, url: &str) -> Result<ProvisioningStatus>;
}

/// Release metadata and per-destination distribution
#[async_trait::async_trait]
pub trait DistributionService: Send + Sync {
    /// Update notes and the mandatory-update flag of a release
    async fn put_release_details(
        &self,
        app: &AppRef,
        release_id: ReleaseId,
        update: &ReleaseDetailsUpdate,
    ) -> Result<ReleaseDetailsResponse>;

    /// Distribute a release to a single destination
    async fn distribute_release(
        &self,
        app: &AppRef,
        release_id: ReleaseId,
        destination: &Destination,
        options: &DistributeOptions,
    ) -> Result<()>;
}

/// Distribution group management
#[async_trait::async_trait]
pub trait DistributionGroups: Send + Sync {
    async fn create_group(&self, app: &AppRef, name: &str, is_public: bool)
        -> Result<DistributionGroup>;

    async fn add_members(&self, app: &AppRef, group_name: &str, emails: &[String]) -> Result<()>;

    async fn remove_members(&self, app: &AppRef, group_name: &str, emails: &[String])
        -> Result<()>;
}

/// Auto-provisioning configuration store
///
/// Writes are last-write-wins; there is no version check.
#[async_trait::async_trait]
pub trait AutoProvisioningStore: Send + Sync {
    async fn get(&self, key: &AutoProvisioningKey) -> Result<Option<AutoProvisioningConfig>>;

    async fn create(
        &self,
        key: &AutoProvisioningKey,
        config: &AutoProvisioningConfig,
    ) -> Result<AutoProvisioningConfig>;

    async fn update(
        &self,
        key: &AutoProvisioningKey,
        config: &AutoProvisioningConfig,
    ) -> Result<AutoProvisioningConfig>;

    async fn delete(&self, key: &AutoProvisioningKey) -> Result<()>;
}

/// Sink for user-facing notifications
pub trait Notifier: Send + Sync {
    /// Show a notification
    fn notify(&self, notification: &Notification);

    /// Remove any transient notification currently shown
    fn dismiss(&self);
}
