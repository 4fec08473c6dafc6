//! Device provisioning session
//!
//! Walks a user through connecting to the developer portal, reviewing the
//! devices that are missing from the provisioning profile and registering
//! them, optionally resigning the release afterwards.

use tracing::{debug, info, instrument, warn};

use super::devices::{project_registration, DevicesToBeRegistered, RegistrationCapacity};
use super::errors::ErrorPage;
use crate::context::DistributionContext;
use crate::error::{DistributeError, Result};
use crate::poller::{PollOutcome, StatusPoller};
use crate::types::{
    AvailabilityOfDevices, DeviceRegistration, PortalAuth, PublishDevicesRequest, ReleaseId,
    ResignRequest, UnprovisionedDevice,
};

/// Step of the provisioning flow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningStep {
    None,
    LoginToAppleDeveloperPortal,
    ConfirmDeviceRegistration,
    SuccessfulDeviceRegistration,
    Error(ErrorPage),
}

/// A stored service connection referenced by the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConnection {
    pub id: String,
    /// Cleared when the portal rejects the connection
    pub is_valid: bool,
}

impl ServiceConnection {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            is_valid: true,
        }
    }
}

/// State of one provisioning flow
pub struct DeviceProvisioningSession {
    ctx: DistributionContext,
    step: ProvisioningStep,
    error_message: Option<String>,
    availability: Option<AvailabilityOfDevices>,
    devices_to_be_registered: Option<DevicesToBeRegistered>,
    auth: Option<PortalAuth>,
    account_connection: Option<ServiceConnection>,
    certificate_connection: Option<ServiceConnection>,
    release_id: Option<ReleaseId>,
    // Set when a resign is requested, cleared once its poll succeeds
    resign_outstanding: bool,
    poller: StatusPoller,
}

impl DeviceProvisioningSession {
    pub fn new(ctx: &DistributionContext) -> Self {
        Self {
            ctx: ctx.clone(),
            step: ProvisioningStep::None,
            error_message: None,
            availability: None,
            devices_to_be_registered: None,
            auth: None,
            account_connection: None,
            certificate_connection: None,
            release_id: None,
            resign_outstanding: false,
            poller: StatusPoller::new(ctx),
        }
    }

    pub fn step(&self) -> ProvisioningStep {
        self.step
    }

    pub fn error_page(&self) -> Option<ErrorPage> {
        match self.step {
            ProvisioningStep::Error(page) => Some(page),
            _ => None,
        }
    }

    /// Raw server message of the last failure
    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn availability(&self) -> Option<&AvailabilityOfDevices> {
        self.availability.as_ref()
    }

    pub fn devices_to_be_registered(&self) -> Option<&DevicesToBeRegistered> {
        self.devices_to_be_registered.as_ref()
    }

    pub fn account_connection(&self) -> Option<&ServiceConnection> {
        self.account_connection.as_ref()
    }

    pub fn certificate_connection(&self) -> Option<&ServiceConnection> {
        self.certificate_connection.as_ref()
    }

    /// Whether the session can resign a release without further input
    pub fn is_ready_to_resign(&self) -> bool {
        self.step == ProvisioningStep::ConfirmDeviceRegistration
            && self.account_connection.as_ref().is_some_and(|c| c.is_valid)
            && self.certificate_connection.as_ref().is_some_and(|c| c.is_valid)
    }

    /// Whether a resign was requested and has not completed yet
    pub fn resign_outstanding(&self) -> bool {
        self.resign_outstanding
    }

    pub fn poller(&self) -> &StatusPoller {
        &self.poller
    }

    /// Scope availability and registration to a release
    pub fn set_release(&mut self, release_id: Option<ReleaseId>) {
        self.release_id = release_id;
    }

    pub fn set_certificate_connection(&mut self, id: impl Into<String>) {
        self.certificate_connection = Some(ServiceConnection::new(id));
    }

    pub fn start_login(&mut self) {
        self.error_message = None;
        self.step = ProvisioningStep::LoginToAppleDeveloperPortal;
    }

    /// Authenticate and fetch device capacity
    #[instrument(skip(self, auth), fields(app = %self.ctx.app))]
    pub async fn connect(&mut self, auth: PortalAuth) -> Result<AvailabilityOfDevices> {
        if let PortalAuth::ServiceConnection { id } = &auth {
            self.account_connection = Some(ServiceConnection::new(id.clone()));
        }

        let result = self
            .ctx
            .portal
            .get_device_availability(&self.ctx.app, &auth, self.release_id)
            .await;

        match result {
            Ok(availability) => {
                debug!(?availability, "Connected to developer portal");
                self.availability = Some(availability);
                self.auth = Some(auth);
                self.error_message = None;
                self.step = ProvisioningStep::ConfirmDeviceRegistration;
                Ok(availability)
            }
            Err(e) => {
                self.fail(&e, Some(&auth)).await;
                Err(e)
            }
        }
    }

    /// Partition devices and apply the capacity policy against the
    /// availability from the last connect
    pub fn compute_devices_to_register(
        &mut self,
        unprovisioned: Vec<UnprovisionedDevice>,
    ) -> Result<&DevicesToBeRegistered> {
        let availability = self.availability.as_ref().ok_or_else(|| {
            DistributeError::InvalidState("Connect to the developer portal first".to_string())
        })?;

        let devices = DevicesToBeRegistered::compute(unprovisioned, availability);
        if !devices.device_types_reached_limit.is_empty() {
            info!(
                reached_limit = ?devices.device_types_reached_limit,
                "Some device classes have no capacity left"
            );
        }
        let devices = self.devices_to_be_registered.insert(devices);
        Ok(&*devices)
    }

    /// Fetch a group's unprovisioned devices and compute the registration set
    #[instrument(skip(self), fields(app = %self.ctx.app))]
    pub async fn load_unprovisioned_devices(
        &mut self,
        group_name: &str,
    ) -> Result<&DevicesToBeRegistered> {
        let result = self
            .ctx
            .portal
            .unprovisioned_devices(&self.ctx.app, group_name, self.release_id)
            .await;

        match result {
            Ok(devices) => self.compute_devices_to_register(devices),
            Err(e) => {
                self.fail(&e, None).await;
                Err(e)
            }
        }
    }

    /// Register devices with the developer portal.
    ///
    /// Registers the devices whose class has capacity, or every device
    /// when `all_devices` is set and no class is at its limit. A returned
    /// status URL starts the status poller.
    #[instrument(skip(self), fields(app = %self.ctx.app))]
    pub async fn publish_devices(
        &mut self,
        group_name: &str,
        all_devices: bool,
    ) -> Result<DeviceRegistration> {
        let auth = self.auth.clone().ok_or_else(|| {
            DistributeError::InvalidState("Connect to the developer portal first".to_string())
        })?;
        let devices = self.devices_to_be_registered.clone().ok_or_else(|| {
            DistributeError::InvalidState("No devices have been computed".to_string())
        })?;

        if devices.capacity() == RegistrationCapacity::AllAtLimit {
            return Err(DistributeError::Validation(
                "Every device type has reached its registration limit".to_string(),
            ));
        }

        let selected = if all_devices && devices.all_devices_can_be_registered() {
            devices.all_devices()
        } else {
            devices.registrable()
        };
        if selected.is_empty() {
            return Err(DistributeError::Validation(
                "There are no devices to register".to_string(),
            ));
        }

        let request = PublishDevicesRequest {
            group_name: group_name.to_string(),
            auth,
            devices: selected.iter().map(|d| d.udid.clone()).collect(),
            release_id: self.release_id,
        };

        match self.ctx.portal.publish_devices(&self.ctx.app, &request).await {
            Ok(registration) => {
                info!(count = request.devices.len(), "Devices registered");
                self.complete_registration(&registration, selected);
                Ok(registration)
            }
            Err(e) => {
                self.fail(&e, None).await;
                Err(e)
            }
        }
    }

    /// Register devices and resign the release.
    ///
    /// The server always answers with a status URL, which is polled in the
    /// background; see [`wait_for_resign`](Self::wait_for_resign).
    #[instrument(skip(self), fields(app = %self.ctx.app))]
    pub async fn publish_and_resign(
        &mut self,
        group_name: &str,
        account_connection_id: &str,
        certificate_connection_id: &str,
        release_id: ReleaseId,
    ) -> Result<DeviceRegistration> {
        let devices = self.devices_to_be_registered.clone().unwrap_or_default();
        let selected = devices.registrable();

        let request = ResignRequest {
            group_name: group_name.to_string(),
            account_service_connection_id: account_connection_id.to_string(),
            certificate_service_connection_id: certificate_connection_id.to_string(),
            release_id,
            devices: selected.iter().map(|d| d.udid.clone()).collect(),
        };
        self.resign_outstanding = true;

        let result = self
            .ctx
            .portal
            .publish_and_resign(&self.ctx.app, &request)
            .await
            .and_then(|registration| {
                if registration.status_url.is_some() {
                    Ok(registration)
                } else {
                    Err(DistributeError::Other(
                        "Resigning did not return a status URL".to_string(),
                    ))
                }
            });

        match result {
            Ok(registration) => {
                info!(release_id, "Resigning started");
                self.complete_registration(&registration, selected);
                Ok(registration)
            }
            Err(e) => {
                self.fail(&e, None).await;
                Err(e)
            }
        }
    }

    /// Wait for the resigning poll started by a registration to end.
    ///
    /// A failed or stalled resign moves the session to the error step, from
    /// which [`acknowledge_error`](Self::acknowledge_error) returns to the
    /// confirmation step for a retry.
    pub async fn wait_for_resign(&mut self) -> Result<PollOutcome> {
        let outcome = match self.poller.wait().await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.fail(&e, None).await;
                return Err(e);
            }
        };

        match &outcome {
            PollOutcome::Succeeded => self.resign_outstanding = false,
            PollOutcome::Failed { message } => self.fail_resign(message.clone()),
            PollOutcome::Stalled => {
                self.fail_resign("Resigning did not finish in time".to_string())
            }
            PollOutcome::Stopped | PollOutcome::Idle => {
                if self.step == ProvisioningStep::SuccessfulDeviceRegistration {
                    self.step = ProvisioningStep::ConfirmDeviceRegistration;
                }
            }
        }
        Ok(outcome)
    }

    /// Leave the error step.
    ///
    /// Authentication failures go back to the start so the user can enter
    /// new credentials; anything else returns to the confirmation step.
    pub fn acknowledge_error(&mut self) -> ProvisioningStep {
        if let ProvisioningStep::Error(page) = self.step {
            self.error_message = None;
            self.step = if page.is_auth_failure() {
                self.auth = None;
                ProvisioningStep::None
            } else {
                ProvisioningStep::ConfirmDeviceRegistration
            };
        }
        self.step
    }

    /// Reset the session, stopping any poll and dismissing its notification
    pub fn initialize(&mut self) {
        self.poller.stop_polling();
        self.ctx.notifier.dismiss();

        self.step = ProvisioningStep::None;
        self.error_message = None;
        self.availability = None;
        self.devices_to_be_registered = None;
        self.auth = None;
        self.account_connection = None;
        self.certificate_connection = None;
        self.release_id = None;
        self.resign_outstanding = false;
    }

    fn complete_registration(
        &mut self,
        registration: &DeviceRegistration,
        registered: Vec<&UnprovisionedDevice>,
    ) {
        if let Some(availability) = self.availability.as_mut() {
            project_registration(availability, registered);
        }
        if let Some(url) = &registration.status_url {
            self.poller.start_polling(url.clone());
        }
        self.error_message = None;
        self.step = ProvisioningStep::SuccessfulDeviceRegistration;
    }

    fn fail_resign(&mut self, message: String) {
        warn!(message = %message, "Resigning did not complete");
        self.error_message = Some(message);
        self.step = ProvisioningStep::Error(ErrorPage::Unhandled);
    }

    async fn fail(&mut self, error: &DistributeError, auth: Option<&PortalAuth>) {
        let page = error.error_page();
        warn!(page = %page, error = %error, "Provisioning step failed");

        if page.is_auth_failure() {
            if let Some(connection) = self.account_connection.as_mut() {
                connection.is_valid = false;
            }
            if let Some(PortalAuth::ServiceConnection { id }) = auth {
                if let Err(e) = self.ctx.portal.invalidate_connection(id).await {
                    warn!(connection = %id, error = %e, "Could not mark connection invalid");
                }
            }
        }

        self.error_message = Some(match error {
            DistributeError::Portal { message, .. } => message.clone(),
            other => other.to_string(),
        });
        self.step = ProvisioningStep::Error(page);
    }
}

impl std::fmt::Debug for DeviceProvisioningSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceProvisioningSession")
            .field("step", &self.step)
            .field("availability", &self.availability)
            .field("account_connection", &self.account_connection)
            .field("certificate_connection", &self.certificate_connection)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;
    use crate::types::{DeviceCapacity, DeviceClass, ProvisioningStatus, ResigningStatus};

    fn credentials() -> PortalAuth {
        PortalAuth::Credentials {
            username: "dev@example.com".to_string(),
            password: "hunter2".to_string(),
        }
    }

    fn capacity(iphones: u32, ipads: u32) -> AvailabilityOfDevices {
        AvailabilityOfDevices {
            iphones: DeviceCapacity {
                registered: 98,
                available: iphones,
                maximum: 100,
            },
            ipads: DeviceCapacity {
                registered: 100,
                available: ipads,
                maximum: 100,
            },
            ..AvailabilityOfDevices::default()
        }
    }

    fn sample_devices() -> Vec<UnprovisionedDevice> {
        vec![
            unprovisioned("udid-1", "iPhone 14"),
            unprovisioned("udid-2", "iPhone 15"),
            unprovisioned("udid-3", "iPad Air"),
        ]
    }

    #[tokio::test]
    async fn test_connect_moves_to_confirmation() {
        let harness = Harness::new();
        harness.api.set_availability(capacity(2, 0));

        let mut session = DeviceProvisioningSession::new(&harness.ctx);
        session.start_login();
        assert_eq!(session.step(), ProvisioningStep::LoginToAppleDeveloperPortal);

        let availability = session.connect(credentials()).await.unwrap();
        assert_eq!(availability.iphones.available, 2);
        assert_eq!(session.step(), ProvisioningStep::ConfirmDeviceRegistration);
        assert_eq!(session.error_page(), None);
    }

    #[tokio::test]
    async fn test_auth_failure_invalidates_connection() {
        let harness = Harness::new();
        harness
            .api
            .set_portal_error(ErrorPage::AuthFailed, "Invalid Apple ID");

        let mut session = DeviceProvisioningSession::new(&harness.ctx);
        let err = session
            .connect(PortalAuth::ServiceConnection {
                id: "conn-1".to_string(),
            })
            .await
            .unwrap_err();

        assert_eq!(err.error_page(), ErrorPage::AuthFailed);
        assert_eq!(session.step(), ProvisioningStep::Error(ErrorPage::AuthFailed));
        assert_eq!(session.error_message(), Some("Invalid Apple ID"));
        assert!(!session.account_connection().unwrap().is_valid);
        assert_eq!(harness.api.invalidated_connections(), vec!["conn-1".to_string()]);

        assert_eq!(session.acknowledge_error(), ProvisioningStep::None);
        assert_eq!(session.error_page(), None);
    }

    #[tokio::test]
    async fn test_non_auth_error_returns_to_confirmation() {
        let harness = Harness::new();
        harness
            .api
            .set_portal_error(ErrorPage::TeamNotFound, "No team");

        let mut session = DeviceProvisioningSession::new(&harness.ctx);
        assert!(session.connect(credentials()).await.is_err());
        assert_eq!(session.step(), ProvisioningStep::Error(ErrorPage::TeamNotFound));
        assert!(harness.api.invalidated_connections().is_empty());

        assert_eq!(
            session.acknowledge_error(),
            ProvisioningStep::ConfirmDeviceRegistration
        );
    }

    #[tokio::test]
    async fn test_partial_registration_skips_full_classes() {
        let harness = Harness::new();
        harness.api.set_availability(capacity(2, 0));
        harness.api.set_unprovisioned(sample_devices());
        harness.api.set_registration(DeviceRegistration {
            profiles_zip_base64: Some("UEsDBA==".to_string()),
            status_url: None,
        });

        let mut session = DeviceProvisioningSession::new(&harness.ctx);
        session.connect(credentials()).await.unwrap();

        let devices = session.load_unprovisioned_devices("Beta").await.unwrap();
        assert_eq!(devices.device_types_reached_limit, vec![DeviceClass::Ipads]);

        // all_devices is ignored while a class is at its limit
        let registration = session.publish_devices("Beta", true).await.unwrap();
        assert!(registration.profiles_zip_base64.is_some());
        assert_eq!(session.step(), ProvisioningStep::SuccessfulDeviceRegistration);

        let published = harness.api.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].devices, vec!["udid-1", "udid-2"]);

        let availability = session.availability().unwrap();
        assert_eq!(availability.iphones.available, 0);
        assert_eq!(availability.iphones.registered, 100);
        assert!(!session.poller().is_polling());
    }

    #[tokio::test]
    async fn test_all_at_limit_does_not_call_portal() {
        let harness = Harness::new();
        harness.api.set_availability(capacity(0, 0));

        let mut session = DeviceProvisioningSession::new(&harness.ctx);
        session.connect(credentials()).await.unwrap();
        session
            .compute_devices_to_register(sample_devices())
            .unwrap();

        let err = session.publish_devices("Beta", false).await.unwrap_err();
        assert!(err.is_validation());
        assert!(harness.api.published().is_empty());
        assert_eq!(session.step(), ProvisioningStep::ConfirmDeviceRegistration);
    }

    #[tokio::test]
    async fn test_compute_requires_connection() {
        let harness = Harness::new();
        let mut session = DeviceProvisioningSession::new(&harness.ctx);
        assert!(matches!(
            session.compute_devices_to_register(sample_devices()),
            Err(DistributeError::InvalidState(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_resign_polls_status_url() {
        let harness = Harness::new();
        harness.api.set_availability(capacity(5, 5));
        harness.api.set_resign_registration(DeviceRegistration {
            profiles_zip_base64: None,
            status_url: Some("https://api.example.com/status/9".to_string()),
        });
        harness.api.queue_statuses(&[
            ResigningStatus::Resigning,
            ResigningStatus::Complete,
        ]);

        let mut session = DeviceProvisioningSession::new(&harness.ctx);
        session.connect(credentials()).await.unwrap();
        session.compute_devices_to_register(sample_devices()).unwrap();

        session
            .publish_and_resign("Beta", "acct-1", "cert-1", SAMPLE_RELEASE_ID)
            .await
            .unwrap();
        assert!(session.poller().is_polling());

        assert_eq!(session.wait_for_resign().await.unwrap(), PollOutcome::Succeeded);
        assert!(!session.resign_outstanding());
        let resigned = harness.api.resigned();
        assert_eq!(resigned.len(), 1);
        assert_eq!(resigned[0].devices.len(), 3);
        assert_eq!(resigned[0].release_id, SAMPLE_RELEASE_ID);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_resign_returns_to_confirmation() {
        let harness = Harness::new();
        harness.api.set_resign_registration(DeviceRegistration {
            profiles_zip_base64: None,
            status_url: Some("https://api.example.com/status/9".to_string()),
        });
        let mut failed = ProvisioningStatus::new(ResigningStatus::Failed);
        failed.error_message = Some("Certificate revoked".to_string());
        harness.api.queue_status_values(vec![failed]);

        let mut session = DeviceProvisioningSession::new(&harness.ctx);
        session.connect(credentials()).await.unwrap();
        session.set_certificate_connection("cert-1");
        session
            .publish_and_resign("Beta", "acct-1", "cert-1", SAMPLE_RELEASE_ID)
            .await
            .unwrap();
        assert!(session.resign_outstanding());

        assert!(matches!(
            session.wait_for_resign().await.unwrap(),
            PollOutcome::Failed { .. }
        ));
        assert_eq!(session.step(), ProvisioningStep::Error(ErrorPage::Unhandled));
        assert_eq!(session.error_message(), Some("Certificate revoked"));
        assert!(session.resign_outstanding());

        assert_eq!(
            session.acknowledge_error(),
            ProvisioningStep::ConfirmDeviceRegistration
        );
        assert!(session.resign_outstanding());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_resign_is_an_error() {
        let mut harness = Harness::new();
        harness.ctx.settings.status_max_duration = Some(std::time::Duration::from_secs(30));
        harness.api.set_resign_registration(DeviceRegistration {
            profiles_zip_base64: None,
            status_url: Some("https://api.example.com/status/9".to_string()),
        });
        harness.api.queue_statuses(&[ResigningStatus::Resigning]);

        let mut session = DeviceProvisioningSession::new(&harness.ctx);
        session
            .publish_and_resign("Beta", "acct-1", "cert-1", SAMPLE_RELEASE_ID)
            .await
            .unwrap();

        assert_eq!(session.wait_for_resign().await.unwrap(), PollOutcome::Stalled);
        assert_eq!(session.step(), ProvisioningStep::Error(ErrorPage::Unhandled));
        assert!(session.resign_outstanding());
    }

    #[tokio::test]
    async fn test_resign_without_status_url_fails() {
        let harness = Harness::new();
        harness.api.set_resign_registration(DeviceRegistration::default());

        let mut session = DeviceProvisioningSession::new(&harness.ctx);
        assert!(session
            .publish_and_resign("Beta", "acct-1", "cert-1", SAMPLE_RELEASE_ID)
            .await
            .is_err());
        assert_eq!(session.step(), ProvisioningStep::Error(ErrorPage::Unhandled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialize_stops_poll_and_dismisses() {
        let harness = Harness::new();
        harness.api.set_registration(DeviceRegistration {
            profiles_zip_base64: None,
            status_url: Some("https://api.example.com/status/3".to_string()),
        });
        harness.api.queue_statuses(&[ResigningStatus::Resigning]);

        let mut session = DeviceProvisioningSession::new(&harness.ctx);
        session.connect(credentials()).await.unwrap();
        session.compute_devices_to_register(sample_devices()).unwrap();
        session.publish_devices("Beta", false).await.unwrap();
        assert!(session.poller().is_polling());

        session.initialize();
        assert!(!session.poller().is_polling());
        assert_eq!(session.step(), ProvisioningStep::None);
        assert!(session.availability().is_none());
        assert_eq!(harness.notifier.dismissals(), 1);
    }
}
