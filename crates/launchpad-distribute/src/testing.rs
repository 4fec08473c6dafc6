//! In-memory collaborators for unit tests

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Notify;

use crate::context::{DistributionContext, DistributionSettings};
use crate::error::{DistributeError, Result};
use crate::notify::CollectingNotifier;
use crate::provisioning::ErrorPage;
use crate::traits::*;
use crate::types::*;
use crate::upload::{
    TransferEvent, TransferProgress, TransferSettings, UploadObserver, UploadProgress,
};

pub const SAMPLE_RELEASE_ID: ReleaseId = 7;

pub fn sample_release() -> Release {
    Release {
        id: SAMPLE_RELEASE_ID,
        version: "42".to_string(),
        short_version: "1.2.0".to_string(),
        file_extension: Some("ipa".to_string()),
        is_external_build: false,
        provisioning_profile_type: None,
        enabled: true,
        destinations: Vec::new(),
    }
}

pub fn unprovisioned(udid: &str, name: &str) -> UnprovisionedDevice {
    UnprovisionedDevice {
        udid: udid.to_string(),
        device_name: name.to_string(),
        model: None,
        owner_email: None,
    }
}

/// A non-empty file with the given name in a fresh temp dir
pub fn binary_file(name: &str) -> (TempDir, PathBuf) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(name);
    std::fs::write(&path, b"binary contents").unwrap();
    (dir, path)
}

fn capacity(available: u32) -> DeviceCapacity {
    DeviceCapacity {
        registered: 100 - available,
        available,
        maximum: 100,
    }
}

/// Scriptable implementation of every service trait
pub struct MockApi {
    calls: Mutex<Vec<String>>,
    release: Mutex<Release>,
    upload_statuses: Mutex<VecDeque<UploadState>>,
    patched: Mutex<Vec<UploadState>>,
    availability: Mutex<AvailabilityOfDevices>,
    portal_error: Mutex<Option<(ErrorPage, String)>>,
    unprovisioned: Mutex<Vec<UnprovisionedDevice>>,
    registration: Mutex<DeviceRegistration>,
    resign_registration: Mutex<DeviceRegistration>,
    published: Mutex<Vec<PublishDevicesRequest>>,
    resigned: Mutex<Vec<ResignRequest>>,
    invalidated: Mutex<Vec<String>>,
    statuses: Mutex<VecDeque<ProvisioningStatus>>,
    status_urls: Mutex<Vec<String>>,
    status_fetches: AtomicUsize,
    status_error: AtomicBool,
    details: Mutex<Vec<(ReleaseId, ReleaseDetailsUpdate)>>,
    details_status_url: Mutex<Option<String>>,
    distributed: Mutex<Vec<(ReleaseId, Destination)>>,
    failing_destinations: Mutex<HashSet<String>>,
    members_added: Mutex<Vec<(String, Vec<String>)>>,
    members_removed: Mutex<Vec<(String, Vec<String>)>>,
    add_members_fails: AtomicBool,
    auto_configs: Mutex<HashMap<AutoProvisioningKey, AutoProvisioningConfig>>,
}

impl Default for MockApi {
    fn default() -> Self {
        Self {
            calls: Mutex::default(),
            release: Mutex::new(sample_release()),
            upload_statuses: Mutex::default(),
            patched: Mutex::default(),
            availability: Mutex::new(AvailabilityOfDevices {
                iphones: capacity(10),
                ipads: capacity(10),
                ipods: capacity(10),
                watches: capacity(10),
            }),
            portal_error: Mutex::default(),
            unprovisioned: Mutex::default(),
            registration: Mutex::default(),
            resign_registration: Mutex::default(),
            published: Mutex::default(),
            resigned: Mutex::default(),
            invalidated: Mutex::default(),
            statuses: Mutex::default(),
            status_urls: Mutex::default(),
            status_fetches: AtomicUsize::new(0),
            status_error: AtomicBool::new(false),
            details: Mutex::default(),
            details_status_url: Mutex::default(),
            distributed: Mutex::default(),
            failing_destinations: Mutex::default(),
            members_added: Mutex::default(),
            members_removed: Mutex::default(),
            add_members_fails: AtomicBool::new(false),
            auto_configs: Mutex::default(),
        }
    }
}

/// Pop the next scripted value, repeating the last one once the queue
/// is down to a single entry
fn next_scripted<T: Clone>(queue: &Mutex<VecDeque<T>>) -> Option<T> {
    let mut queue = queue.lock().unwrap();
    if queue.len() > 1 {
        queue.pop_front()
    } else {
        queue.front().cloned()
    }
}

impl MockApi {
    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    fn portal_result(&self) -> Result<()> {
        match self.portal_error.lock().unwrap().clone() {
            Some((page, message)) => Err(DistributeError::Portal { page, message }),
            None => Ok(()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn set_release_profile(&self, profile: Option<ProvisioningProfileType>) {
        self.release.lock().unwrap().provisioning_profile_type = profile;
    }

    pub fn queue_upload_statuses(&self, states: &[UploadState]) {
        *self.upload_statuses.lock().unwrap() = states.iter().copied().collect();
    }

    pub fn patched_states(&self) -> Vec<UploadState> {
        self.patched.lock().unwrap().clone()
    }

    pub fn set_availability(&self, availability: AvailabilityOfDevices) {
        *self.availability.lock().unwrap() = availability;
    }

    pub fn set_portal_error(&self, page: ErrorPage, message: &str) {
        *self.portal_error.lock().unwrap() = Some((page, message.to_string()));
    }

    pub fn set_unprovisioned(&self, devices: Vec<UnprovisionedDevice>) {
        *self.unprovisioned.lock().unwrap() = devices;
    }

    pub fn set_registration(&self, registration: DeviceRegistration) {
        *self.registration.lock().unwrap() = registration;
    }

    pub fn set_resign_registration(&self, registration: DeviceRegistration) {
        *self.resign_registration.lock().unwrap() = registration;
    }

    pub fn published(&self) -> Vec<PublishDevicesRequest> {
        self.published.lock().unwrap().clone()
    }

    pub fn resigned(&self) -> Vec<ResignRequest> {
        self.resigned.lock().unwrap().clone()
    }

    pub fn invalidated_connections(&self) -> Vec<String> {
        self.invalidated.lock().unwrap().clone()
    }

    pub fn queue_statuses(&self, statuses: &[ResigningStatus]) {
        self.queue_status_values(statuses.iter().copied().map(ProvisioningStatus::new).collect());
    }

    pub fn queue_status_values(&self, statuses: Vec<ProvisioningStatus>) {
        *self.statuses.lock().unwrap() = statuses.into();
    }

    pub fn fail_status_fetches(&self) {
        self.status_error.store(true, Ordering::SeqCst);
    }

    pub fn status_fetches(&self) -> usize {
        self.status_fetches.load(Ordering::SeqCst)
    }

    pub fn status_urls(&self) -> Vec<String> {
        self.status_urls.lock().unwrap().clone()
    }

    pub fn release_details(&self) -> Vec<(ReleaseId, ReleaseDetailsUpdate)> {
        self.details.lock().unwrap().clone()
    }

    pub fn set_details_status_url(&self, url: &str) {
        *self.details_status_url.lock().unwrap() = Some(url.to_string());
    }

    pub fn distributed(&self) -> Vec<(ReleaseId, Destination)> {
        self.distributed.lock().unwrap().clone()
    }

    pub fn fail_destination(&self, id: &str) {
        self.failing_destinations
            .lock()
            .unwrap()
            .insert(id.to_string());
    }

    pub fn clear_failing_destinations(&self) {
        self.failing_destinations.lock().unwrap().clear();
    }

    pub fn fail_add_members(&self) {
        self.add_members_fails.store(true, Ordering::SeqCst);
    }

    pub fn members_added(&self) -> Vec<(String, Vec<String>)> {
        self.members_added.lock().unwrap().clone()
    }

    pub fn members_removed(&self) -> Vec<(String, Vec<String>)> {
        self.members_removed.lock().unwrap().clone()
    }

    pub fn set_auto_provisioning(&self, config: AutoProvisioningConfig) {
        let key = AutoProvisioningKey::new(&test_app(), config.destination_id.clone());
        self.auto_configs.lock().unwrap().insert(key, config);
    }

    pub fn auto_provisioning_config(&self, destination_id: &str) -> Option<AutoProvisioningConfig> {
        let key = AutoProvisioningKey::new(&test_app(), destination_id);
        self.auto_configs.lock().unwrap().get(&key).cloned()
    }
}

#[async_trait]
impl UploadService for MockApi {
    async fn create_upload_ticket(&self, _app: &AppRef) -> Result<UploadTicket> {
        self.record("create_upload_ticket");
        Ok(UploadTicket {
            upload_id: "upload-1".to_string(),
            asset_id: "asset-1".to_string(),
            upload_domain: "https://upload.example.com".to_string(),
            token: "token".to_string(),
        })
    }

    async fn patch_upload_status(
        &self,
        _app: &AppRef,
        _upload_id: &str,
        state: UploadState,
    ) -> Result<()> {
        self.record("patch_upload_status");
        self.patched.lock().unwrap().push(state);
        Ok(())
    }

    async fn get_upload_status(
        &self,
        _app: &AppRef,
        upload_id: &str,
    ) -> Result<UploadStatusResponse> {
        self.record("get_upload_status");
        let state = next_scripted(&self.upload_statuses).unwrap_or(UploadState::UploadFinished);
        Ok(UploadStatusResponse {
            id: upload_id.to_string(),
            upload_status: state,
            release_distinct_id: (state == UploadState::ReadyToBePublished)
                .then_some(SAMPLE_RELEASE_ID),
            error_details: None,
        })
    }

    async fn get_release(&self, _app: &AppRef, release_id: ReleaseId) -> Result<Release> {
        self.record("get_release");
        let mut release = self.release.lock().unwrap().clone();
        release.id = release_id;
        Ok(release)
    }

    async fn register_external_build(
        &self,
        _app: &AppRef,
        request: &ExternalBuildRequest,
    ) -> Result<Release> {
        self.record("register_external_build");
        Ok(Release {
            id: SAMPLE_RELEASE_ID + 1,
            version: request.version.clone(),
            short_version: request.short_version.clone(),
            file_extension: None,
            is_external_build: true,
            provisioning_profile_type: None,
            enabled: true,
            destinations: Vec::new(),
        })
    }
}

#[async_trait]
impl DeveloperPortal for MockApi {
    async fn get_device_availability(
        &self,
        _app: &AppRef,
        _auth: &PortalAuth,
        _release_id: Option<ReleaseId>,
    ) -> Result<AvailabilityOfDevices> {
        self.record("get_device_availability");
        self.portal_result()?;
        Ok(*self.availability.lock().unwrap())
    }

    async fn unprovisioned_devices(
        &self,
        _app: &AppRef,
        _group_name: &str,
        _release_id: Option<ReleaseId>,
    ) -> Result<Vec<UnprovisionedDevice>> {
        self.record("unprovisioned_devices");
        self.portal_result()?;
        Ok(self.unprovisioned.lock().unwrap().clone())
    }

    async fn publish_devices(
        &self,
        _app: &AppRef,
        request: &PublishDevicesRequest,
    ) -> Result<DeviceRegistration> {
        self.record("publish_devices");
        self.portal_result()?;
        self.published.lock().unwrap().push(request.clone());
        Ok(self.registration.lock().unwrap().clone())
    }

    async fn publish_and_resign(
        &self,
        _app: &AppRef,
        request: &ResignRequest,
    ) -> Result<DeviceRegistration> {
        self.record("publish_and_resign");
        self.portal_result()?;
        self.resigned.lock().unwrap().push(request.clone());
        Ok(self.resign_registration.lock().unwrap().clone())
    }

    async fn invalidate_connection(&self, connection_id: &str) -> Result<()> {
        self.record("invalidate_connection");
        self.invalidated.lock().unwrap().push(connection_id.to_string());
        Ok(())
    }
}

#[async_trait]
impl StatusResource for MockApi {
    async fn get_status(&self, url: &str) -> Result<ProvisioningStatus> {
        self.status_fetches.fetch_add(1, Ordering::SeqCst);
        self.status_urls.lock().unwrap().push(url.to_string());

        if self.status_error.load(Ordering::SeqCst) {
            return Err(DistributeError::ApiError {
                status: 500,
                message: "status unavailable".to_string(),
            });
        }
        next_scripted(&self.statuses).ok_or_else(|| DistributeError::ApiError {
            status: 404,
            message: "no status".to_string(),
        })
    }
}

#[async_trait]
impl DistributionService for MockApi {
    async fn put_release_details(
        &self,
        _app: &AppRef,
        release_id: ReleaseId,
        update: &ReleaseDetailsUpdate,
    ) -> Result<ReleaseDetailsResponse> {
        self.record("put_release_details");
        self.details.lock().unwrap().push((release_id, update.clone()));
        Ok(ReleaseDetailsResponse {
            provisioning_status_url: self.details_status_url.lock().unwrap().clone(),
        })
    }

    async fn distribute_release(
        &self,
        _app: &AppRef,
        release_id: ReleaseId,
        destination: &Destination,
        _options: &DistributeOptions,
    ) -> Result<()> {
        self.record("distribute_release");
        self.distributed
            .lock()
            .unwrap()
            .push((release_id, destination.clone()));

        if self.failing_destinations.lock().unwrap().contains(destination.id()) {
            return Err(DistributeError::ApiError {
                status: 500,
                message: format!("cannot distribute to {}", destination),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl DistributionGroups for MockApi {
    async fn create_group(
        &self,
        _app: &AppRef,
        name: &str,
        is_public: bool,
    ) -> Result<DistributionGroup> {
        self.record("create_group");
        Ok(DistributionGroup {
            id: format!("grp-{}", name.to_lowercase()),
            name: name.to_string(),
            is_public,
            total_user_count: None,
        })
    }

    async fn add_members(&self, _app: &AppRef, group_name: &str, emails: &[String]) -> Result<()> {
        self.record("add_members");
        if self.add_members_fails.load(Ordering::SeqCst) {
            return Err(DistributeError::ApiError {
                status: 400,
                message: "invalid emails".to_string(),
            });
        }
        self.members_added
            .lock()
            .unwrap()
            .push((group_name.to_string(), emails.to_vec()));
        Ok(())
    }

    async fn remove_members(
        &self,
        _app: &AppRef,
        group_name: &str,
        emails: &[String],
    ) -> Result<()> {
        self.record("remove_members");
        self.members_removed
            .lock()
            .unwrap()
            .push((group_name.to_string(), emails.to_vec()));
        Ok(())
    }
}

#[async_trait]
impl AutoProvisioningStore for MockApi {
    async fn get(&self, key: &AutoProvisioningKey) -> Result<Option<AutoProvisioningConfig>> {
        self.record("auto_provisioning_get");
        Ok(self.auto_configs.lock().unwrap().get(key).cloned())
    }

    async fn create(
        &self,
        key: &AutoProvisioningKey,
        config: &AutoProvisioningConfig,
    ) -> Result<AutoProvisioningConfig> {
        self.record("auto_provisioning_create");
        let mut saved = config.clone();
        saved.id = Some(1);
        self.auto_configs
            .lock()
            .unwrap()
            .insert(key.clone(), saved.clone());
        Ok(saved)
    }

    async fn update(
        &self,
        key: &AutoProvisioningKey,
        config: &AutoProvisioningConfig,
    ) -> Result<AutoProvisioningConfig> {
        self.record("auto_provisioning_update");
        self.auto_configs
            .lock()
            .unwrap()
            .insert(key.clone(), config.clone());
        Ok(config.clone())
    }

    async fn delete(&self, key: &AutoProvisioningKey) -> Result<()> {
        self.record("auto_provisioning_delete");
        self.auto_configs.lock().unwrap().remove(key);
        Ok(())
    }
}

/// Transfer that reports scripted progress, or waits until cancelled
pub struct MockTransfer {
    percents: Vec<f64>,
    hang: bool,
    cancelled: AtomicBool,
    cancels: AtomicUsize,
    wake: Notify,
    started: Notify,
}

impl MockTransfer {
    pub fn with_percents(percents: Vec<f64>) -> Self {
        Self {
            percents,
            hang: false,
            cancelled: AtomicBool::new(false),
            cancels: AtomicUsize::new(0),
            wake: Notify::new(),
            started: Notify::new(),
        }
    }

    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::with_percents(Vec::new())
        }
    }

    pub fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }

    /// Resolves once a transfer has started
    pub async fn wait_started(&self) {
        self.started.notified().await;
    }
}

#[async_trait]
impl ChunkedTransfer for MockTransfer {
    async fn start(
        &self,
        _file: &Path,
        _settings: &TransferSettings,
        events: UnboundedSender<TransferEvent>,
    ) -> Result<()> {
        self.cancelled.store(false, Ordering::SeqCst);
        self.started.notify_one();

        for &percent in &self.percents {
            if self.cancelled.load(Ordering::SeqCst) {
                return Err(DistributeError::Cancelled);
            }
            let _ = events.send(TransferEvent::Progress(TransferProgress {
                percent,
                bytes_sent: percent as u64,
                total_bytes: 100,
                average_speed: 0.0,
            }));
            tokio::task::yield_now().await;
        }

        while self.hang {
            if self.cancelled.load(Ordering::SeqCst) {
                return Err(DistributeError::Cancelled);
            }
            self.wake.notified().await;
        }

        let _ = events.send(TransferEvent::Completed);
        Ok(())
    }

    fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        self.cancelled.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }
}

/// Upload observer that records every callback
#[derive(Default)]
pub struct RecordingObserver {
    progress: Mutex<Vec<UploadProgress>>,
    finished: Mutex<Vec<ReleaseId>>,
    failed: Mutex<Vec<String>>,
}

impl RecordingObserver {
    pub fn progress(&self) -> Vec<UploadProgress> {
        self.progress.lock().unwrap().clone()
    }

    pub fn finished(&self) -> Vec<ReleaseId> {
        self.finished.lock().unwrap().clone()
    }

    pub fn failures(&self) -> Vec<String> {
        self.failed.lock().unwrap().clone()
    }
}

impl UploadObserver for RecordingObserver {
    fn progress(&self, progress: UploadProgress) {
        self.progress.lock().unwrap().push(progress);
    }

    fn finished(&self, release: &Release) {
        self.finished.lock().unwrap().push(release.id);
    }

    fn failed(&self, reason: &str) {
        self.failed.lock().unwrap().push(reason.to_string());
    }
}

pub fn test_app() -> AppRef {
    AppRef::new("acme", "rocket")
}

/// Mocks wired into a [`DistributionContext`]
pub struct Harness {
    pub api: Arc<MockApi>,
    pub transfer: Arc<MockTransfer>,
    pub notifier: Arc<CollectingNotifier>,
    pub ctx: DistributionContext,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_transfer(MockTransfer::with_percents(vec![25.0, 50.0, 100.0]))
    }

    pub fn with_transfer(transfer: MockTransfer) -> Self {
        let api = Arc::new(MockApi::default());
        let transfer = Arc::new(transfer);
        let notifier = Arc::new(CollectingNotifier::default());

        let ctx = DistributionContext {
            app: test_app(),
            uploads: api.clone(),
            transfer: transfer.clone(),
            portal: api.clone(),
            status: api.clone(),
            distribution: api.clone(),
            groups: api.clone(),
            auto_provisioning: api.clone(),
            notifier: notifier.clone(),
            settings: DistributionSettings::default(),
        };

        Self {
            api,
            transfer,
            notifier,
            ctx,
        }
    }
}
