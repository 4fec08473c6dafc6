//! Distribution wizard
//!
//! Owns one upload session, one provisioning session and the destination
//! selection, and turns them into either a resign-and-distribute or a
//! metadata update followed by a per-destination fan-out.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use super::destinations::{AddDestinationsOutcome, DestinationSelection};
use super::fanout::distribute_all;
use super::pages::{derive_pages, device_registration_required, EntryContext, Page, Source};
use crate::context::DistributionContext;
use crate::error::{DistributeError, Result};
use crate::members::{sync_members, TrackedMembers};
use crate::notify::Notification;
use crate::poller::{PollOutcome, StatusPoller};
use crate::provisioning::DeviceProvisioningSession;
use crate::types::{
    AutoProvisioningConfig, AutoProvisioningKey, Destination, DestinationKey,
    DistributeOptions, DistributionGroup, ExternalBuildRequest, Release, ReleaseDetailsUpdate,
    ReleaseId, TargetOs,
};
use crate::upload::{
    NoopObserver, UploadCancelHandle, UploadObserver, UploadOptions, UploadSession,
};

/// Where to go once a distribution has started
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Releases of the single group that was targeted
    GroupReleases { group_id: String },
    ReleaseList,
}

/// Result of starting a distribution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishProgress {
    /// The distribution has started
    Done(Route),
    /// A resign is in flight; see [`DistributionWizard::wait_for_publish`]
    Publishing,
}

/// Snapshot of the wizard for display
#[derive(Debug, Clone, PartialEq)]
pub struct WizardState {
    pub page: Page,
    pub page_index: usize,
    pub pages: Vec<Page>,
    pub source: Source,
    pub release: Option<Release>,
    pub destinations: Vec<Destination>,
    pub distribute_in_progress: bool,
    pub error_message: Option<String>,
    pub creating_group: bool,
    pub publishing: bool,
}

/// Multi-step distribution flow
pub struct DistributionWizard {
    ctx: DistributionContext,
    os: TargetOs,
    entry: EntryContext,
    source: Source,
    release: Option<Release>,
    selection: DestinationSelection,
    release_notes: Option<String>,
    mandatory_update: bool,
    page_index: usize,
    creating_group: bool,
    publishing: bool,
    distribute_in_progress: bool,
    error_message: Option<String>,
    auto_provisioning: Option<AutoProvisioningConfig>,
    upload: UploadSession,
    provisioning: DeviceProvisioningSession,
    poller: StatusPoller,
}

impl DistributionWizard {
    pub fn new(ctx: &DistributionContext, os: TargetOs, entry: EntryContext) -> Self {
        let mut selection = DestinationSelection::new(
            ctx.settings.max_testers,
            ctx.settings.estimated_user_soft_limit,
        );
        let mut release = None;

        match &entry {
            EntryContext::DistributionGroup(group) => {
                selection.add_destinations([group.as_destination()]);
            }
            EntryContext::ReleaseDetails(existing) => release = Some(existing.clone()),
            EntryContext::ReleaseList => {}
        }

        let mut provisioning = DeviceProvisioningSession::new(ctx);
        provisioning.set_release(release.as_ref().map(|r: &Release| r.id));

        Self {
            ctx: ctx.clone(),
            os,
            entry,
            source: Source::Upload,
            release,
            selection,
            release_notes: None,
            mandatory_update: false,
            page_index: 0,
            creating_group: false,
            publishing: false,
            distribute_in_progress: false,
            error_message: None,
            auto_provisioning: None,
            upload: UploadSession::new(ctx, Arc::new(NoopObserver)),
            provisioning,
            poller: StatusPoller::new(ctx),
        }
    }

    /// Replace the observer receiving upload callbacks
    pub fn with_upload_observer(mut self, observer: Arc<dyn UploadObserver>) -> Self {
        self.upload = UploadSession::new(&self.ctx, observer);
        self
    }

    // Pages

    /// Page list for the current configuration, derived on every call
    pub fn pages(&self) -> Vec<Page> {
        derive_pages(&self.entry, &self.source, self.device_registration_required())
    }

    pub fn page(&self) -> Page {
        if self.publishing {
            return Page::Publishing;
        }
        if self.creating_group {
            return Page::CreateNewGroup;
        }

        let pages = self.pages();
        let index = self.page_index.min(pages.len().saturating_sub(1));
        pages.get(index).copied().unwrap_or(Page::Summary)
    }

    pub fn page_index(&self) -> usize {
        self.page_index.min(self.pages().len().saturating_sub(1))
    }

    pub fn next(&mut self) -> Page {
        if self.creating_group {
            self.creating_group = false;
        } else {
            let last = self.pages().len().saturating_sub(1);
            self.page_index = (self.page_index() + 1).min(last);
        }
        self.page()
    }

    pub fn back(&mut self) -> Page {
        if self.creating_group {
            self.creating_group = false;
        } else {
            self.page_index = self.page_index().saturating_sub(1);
        }
        self.page()
    }

    pub fn device_registration_required(&self) -> bool {
        device_registration_required(
            self.os,
            &self.source,
            self.release.as_ref(),
            self.selection.destinations(),
            self.auto_provisioning_enabled(),
        )
    }

    pub fn auto_provisioning_enabled(&self) -> bool {
        self.auto_provisioning
            .as_ref()
            .is_some_and(|c| c.allow_auto_provisioning)
    }

    pub fn state(&self) -> WizardState {
        WizardState {
            page: self.page(),
            page_index: self.page_index(),
            pages: self.pages(),
            source: self.source.clone(),
            release: self.release.clone(),
            destinations: self.selection.destinations().to_vec(),
            distribute_in_progress: self.distribute_in_progress,
            error_message: self.error_message.clone(),
            creating_group: self.creating_group,
            publishing: self.publishing,
        }
    }

    // Source and release

    /// Switch the release source. Any upload in progress is discarded.
    pub fn set_source(&mut self, source: Source) {
        if self.source == source {
            return;
        }
        if !matches!(self.entry, EntryContext::ReleaseDetails(_)) {
            self.upload.reset();
            self.release = None;
            self.provisioning.set_release(None);
        }
        self.source = source;
        self.page_index = 0;
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    pub fn release(&self) -> Option<&Release> {
        self.release.as_ref()
    }

    pub fn set_release_notes(&mut self, notes: impl Into<String>) {
        let notes = notes.into();
        self.release_notes = if notes.trim().is_empty() {
            None
        } else {
            Some(notes)
        };
    }

    pub fn set_mandatory_update(&mut self, mandatory: bool) {
        self.mandatory_update = mandatory;
    }

    pub fn upload_session(&self) -> &UploadSession {
        &self.upload
    }

    pub fn upload_cancel_handle(&self) -> UploadCancelHandle {
        self.upload.cancel_handle()
    }

    /// Upload a binary and use the resulting release
    pub async fn upload(&mut self, file: &Path) -> Result<&Release> {
        if self.source != Source::Upload {
            return Err(DistributeError::InvalidState(
                "The release source is not an upload".to_string(),
            ));
        }
        if self.upload.status().is_terminal() {
            self.upload.reset();
        }

        let options = UploadOptions {
            os: self.os,
            public_store: self.selection.destinations().iter().any(Destination::is_store),
        };
        let release = self.upload.begin_upload(file, &options).await?;
        Ok(self.use_release(release))
    }

    /// Use the release produced by the selected branch build
    pub async fn select_build(&mut self, release_id: ReleaseId) -> Result<&Release> {
        if !matches!(self.source, Source::Branch { .. }) {
            return Err(DistributeError::InvalidState(
                "The release source is not a branch build".to_string(),
            ));
        }

        let release = self.ctx.uploads.get_release(&self.ctx.app, release_id).await?;
        Ok(self.use_release(release))
    }

    /// Register the external build URL of the current source as a release
    pub async fn register_external_build(
        &mut self,
        version: &str,
        short_version: &str,
    ) -> Result<&Release> {
        let Source::ExternalBuild { url } = &self.source else {
            return Err(DistributeError::InvalidState(
                "The release source is not an external build".to_string(),
            ));
        };

        let parsed = url::Url::parse(url)
            .map_err(|e| {
                DistributeError::Validation(format!("Invalid build URL '{}': {}", url, e))
            })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(DistributeError::Validation(format!(
                "Build URL must use http or https: {}",
                url
            )));
        }
        if version.trim().is_empty() || short_version.trim().is_empty() {
            return Err(DistributeError::Validation(
                "External builds need a version and a short version".to_string(),
            ));
        }

        let request = ExternalBuildRequest {
            build_url: parsed.to_string(),
            version: version.trim().to_string(),
            short_version: short_version.trim().to_string(),
        };
        let release = self
            .ctx
            .uploads
            .register_external_build(&self.ctx.app, &request)
            .await?;
        Ok(self.use_release(release))
    }

    fn use_release(&mut self, release: Release) -> &Release {
        debug!(release_id = release.id, "Release selected");
        self.provisioning.set_release(Some(release.id));
        self.release.insert(release)
    }

    // Destinations

    pub fn add_destinations(
        &mut self,
        destinations: impl IntoIterator<Item = Destination>,
    ) -> AddDestinationsOutcome {
        let outcome = self.selection.add_destinations(destinations);
        if self.selection.exceeds_estimated_user_limit() {
            warn!(
                estimated = self.selection.estimated_users(),
                "Release will reach more users than recommended"
            );
        }
        outcome
    }

    pub fn remove_destination(&mut self, key: &DestinationKey) -> Option<Destination> {
        self.selection.remove_destination(key)
    }

    pub fn destinations(&self) -> &DestinationSelection {
        &self.selection
    }

    /// Load the auto-provisioning configuration of the first selected group
    pub async fn refresh_auto_provisioning(&mut self) -> Result<bool> {
        let Some(group) = self.selection.groups().next().cloned() else {
            self.auto_provisioning = None;
            return Ok(false);
        };

        let key = AutoProvisioningKey::new(&self.ctx.app, group.id());
        self.auto_provisioning = self.ctx.auto_provisioning.get(&key).await?;
        Ok(self.auto_provisioning_enabled())
    }

    /// Turn auto-provisioning off for the first selected group.
    ///
    /// Device registration becomes required again for ad hoc iOS builds.
    #[instrument(skip(self), fields(app = %self.ctx.app))]
    pub async fn disable_auto_provisioning(&mut self) -> Result<bool> {
        let Some(group) = self.selection.groups().next().cloned() else {
            return Ok(false);
        };

        let key = AutoProvisioningKey::new(&self.ctx.app, group.id());
        if self.ctx.auto_provisioning.get(&key).await?.is_none() {
            self.auto_provisioning = None;
            return Ok(false);
        }

        self.ctx.auto_provisioning.delete(&key).await?;
        info!(destination = %group, "Auto-provisioning disabled");
        self.auto_provisioning = None;
        Ok(true)
    }

    // Device registration

    pub fn provisioning(&self) -> &DeviceProvisioningSession {
        &self.provisioning
    }

    pub fn provisioning_mut(&mut self) -> &mut DeviceProvisioningSession {
        &mut self.provisioning
    }

    /// Poller following auto-provisioning started by a metadata update
    pub fn auto_provisioning_poller(&self) -> &StatusPoller {
        &self.poller
    }

    // Create group sub-flow

    pub fn begin_create_group(&mut self) {
        self.creating_group = true;
    }

    /// Create a group with `testers` and select it.
    ///
    /// If the group is created but its members cannot be added, the group
    /// is still selected and the failure is kept in `error_message`.
    #[instrument(skip(self, testers), fields(app = %self.ctx.app))]
    pub async fn create_group(
        &mut self,
        name: &str,
        testers: &[String],
        is_public: bool,
    ) -> Result<DistributionGroup> {
        let name = name.trim();
        if name.is_empty() {
            return Err(DistributeError::Validation(
                "Group name cannot be empty".to_string(),
            ));
        }

        let mut group = self
            .ctx
            .groups
            .create_group(&self.ctx.app, name, is_public)
            .await?;
        info!(group = %group.name, "Group created");

        let mut members = TrackedMembers::new();
        for tester in testers {
            members.add(tester.as_str());
        }

        if let Err(e) = sync_members(
            self.ctx.groups.as_ref(),
            &self.ctx.app,
            &group.name,
            &mut members,
        )
        .await
        {
            self.error_message = Some(format!(
                "Group {} was created but its testers could not be added: {}",
                group.name, e
            ));
        }

        group.total_user_count = Some(u32::try_from(members.len()).unwrap_or(u32::MAX));
        self.selection.add_destinations([group.as_destination()]);
        self.creating_group = false;
        Ok(group)
    }

    // Finish

    /// Start the distribution and wait for it.
    ///
    /// On a partial failure the error names the failed destinations, the
    /// selection keeps only those for a retry, and the succeeded ones are
    /// recorded on the release.
    pub async fn finish(&mut self) -> Result<Route> {
        match self.begin_finish().await? {
            FinishProgress::Done(route) => Ok(route),
            FinishProgress::Publishing => self.wait_for_publish().await,
        }
    }

    /// Start the distribution.
    ///
    /// When the release has to be resigned this returns as soon as the
    /// resign request is accepted, and [`page`](Self::page) shows
    /// [`Page::Publishing`] until [`wait_for_publish`](Self::wait_for_publish)
    /// completes.
    #[instrument(skip(self), fields(app = %self.ctx.app))]
    pub async fn begin_finish(&mut self) -> Result<FinishProgress> {
        if self.distribute_in_progress {
            return Err(DistributeError::InvalidState(
                "A distribution is already in progress".to_string(),
            ));
        }
        let release = self.release.clone().ok_or_else(|| {
            DistributeError::Validation("Select or upload a release first".to_string())
        })?;
        if self.selection.is_empty() {
            return Err(DistributeError::Validation(
                "Select at least one destination".to_string(),
            ));
        }

        self.distribute_in_progress = true;
        self.error_message = None;

        let result = if self.resign_required() {
            self.start_resign(&release)
                .await
                .map(|()| FinishProgress::Publishing)
        } else {
            self.distribute(release).await.map(FinishProgress::Done)
        };

        match &result {
            Ok(FinishProgress::Publishing) => self.publishing = true,
            Ok(FinishProgress::Done(_)) => self.distribute_in_progress = false,
            Err(e) => {
                self.distribute_in_progress = false;
                self.error_message = Some(e.to_string());
            }
        }
        result
    }

    /// Wait for the resign started by [`begin_finish`](Self::begin_finish)
    pub async fn wait_for_publish(&mut self) -> Result<Route> {
        if !self.publishing {
            return Err(DistributeError::InvalidState(
                "No release is being published".to_string(),
            ));
        }

        let result = self.complete_resign().await;

        self.publishing = false;
        self.distribute_in_progress = false;
        if let Err(e) = &result {
            self.error_message = Some(e.to_string());
        }
        result
    }

    /// Whether finishing resigns the release instead of distributing it.
    ///
    /// Stays true after a failed resign so a retry never distributes the
    /// unresigned build, even though saving auto-provisioning has already
    /// dropped the registration page.
    fn resign_required(&self) -> bool {
        if self.provisioning.resign_outstanding() {
            return true;
        }

        let reached_registration = self
            .pages()
            .iter()
            .position(|p| *p == Page::DeviceRegistration)
            .is_some_and(|i| self.page_index() >= i);
        reached_registration && self.provisioning.is_ready_to_resign()
    }

    async fn start_resign(&mut self, release: &Release) -> Result<()> {
        let group = self.selection.groups().next().cloned().ok_or_else(|| {
            DistributeError::Validation("Resigning needs a group destination".to_string())
        })?;

        if self.provisioning.error_page().is_some() {
            self.provisioning.acknowledge_error();
        }
        if !self.provisioning.is_ready_to_resign() {
            return Err(DistributeError::InvalidState(
                "Reconnect to the developer portal before resigning".to_string(),
            ));
        }
        let (account, certificate) = match (
            self.provisioning.account_connection(),
            self.provisioning.certificate_connection(),
        ) {
            (Some(account), Some(certificate)) => (account.id.clone(), certificate.id.clone()),
            _ => {
                return Err(DistributeError::InvalidState(
                    "Connect an account and a certificate first".to_string(),
                ))
            }
        };

        self.save_auto_provisioning(&group, &account, &certificate).await?;

        self.provisioning
            .publish_and_resign(&group.to_string(), &account, &certificate, release.id)
            .await?;
        Ok(())
    }

    async fn complete_resign(&mut self) -> Result<Route> {
        match self.provisioning.wait_for_resign().await? {
            PollOutcome::Succeeded => {
                let release = self.release.as_mut().ok_or_else(|| {
                    DistributeError::InvalidState("The release was discarded".to_string())
                })?;
                info!(release_id = release.id, "Release resigned; the server distributes it");
                release.add_destinations(self.selection.destinations());
                Ok(route_for(self.selection.destinations()))
            }
            PollOutcome::Failed { message } => Err(DistributeError::Other(format!(
                "Resigning failed: {}",
                message
            ))),
            PollOutcome::Stalled => Err(DistributeError::Stalled(
                "Resigning did not finish in time".to_string(),
            )),
            PollOutcome::Stopped | PollOutcome::Idle => Err(DistributeError::Cancelled),
        }
    }

    async fn save_auto_provisioning(
        &mut self,
        group: &Destination,
        account: &str,
        certificate: &str,
    ) -> Result<()> {
        let key = AutoProvisioningKey::new(&self.ctx.app, group.id());
        let mut config = AutoProvisioningConfig {
            id: None,
            destination_id: group.id().to_string(),
            allow_auto_provisioning: true,
            apple_developer_account_key: Some(account.to_string()),
            apple_distribution_certificate_key: Some(certificate.to_string()),
        };

        let current = self.ctx.auto_provisioning.get(&key).await?;
        let saved = match current {
            Some(existing) => {
                if self.auto_provisioning.as_ref() != Some(&existing) {
                    warn!(
                        destination = %group,
                        "Auto-provisioning settings changed since they were read; overwriting"
                    );
                }
                config.id = existing.id;
                self.ctx.auto_provisioning.update(&key, &config).await?
            }
            None => self.ctx.auto_provisioning.create(&key, &config).await?,
        };

        debug!(destination = %group, "Auto-provisioning enabled");
        self.auto_provisioning = Some(saved);
        Ok(())
    }

    async fn distribute(&mut self, mut release: Release) -> Result<Route> {
        let destinations = self.selection.destinations().to_vec();

        if !matches!(self.entry, EntryContext::ReleaseDetails(_)) {
            let update = ReleaseDetailsUpdate {
                release_notes: self.release_notes.clone(),
                mandatory_update: self.mandatory_update,
                destinations: destinations.clone(),
            };
            let response = self
                .ctx
                .distribution
                .put_release_details(&self.ctx.app, release.id, &update)
                .await?;

            if let Some(url) = response.provisioning_status_url {
                self.poller.start_polling(url);
            }
        }

        let options = DistributeOptions {
            mandatory_update: self.mandatory_update,
            notify_testers: self.ctx.settings.notify_testers,
        };
        let outcome = distribute_all(
            self.ctx.distribution.clone(),
            &self.ctx.app,
            release.id,
            &destinations,
            options,
        )
        .await;

        release.add_destinations(&outcome.succeeded);
        self.release = Some(release);

        if let Some(error) = outcome.error() {
            let failed: HashSet<DestinationKey> =
                outcome.failed.iter().map(|(d, _)| d.key()).collect();
            self.selection.retain(&failed);
            return Err(error);
        }

        info!(count = destinations.len(), "Distribution started");
        self.ctx.notifier.notify(&Notification::success(format!(
            "Distributed to {} destination{}",
            destinations.len(),
            if destinations.len() == 1 { "" } else { "s" }
        )));
        Ok(route_for(&destinations))
    }

    /// Discard in-flight work when the wizard is closed
    pub fn close(&mut self) {
        self.upload.reset();
        self.provisioning.initialize();
        self.poller.stop_polling();
        self.publishing = false;
        self.distribute_in_progress = false;
    }
}

impl std::fmt::Debug for DistributionWizard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributionWizard")
            .field("os", &self.os)
            .field("page", &self.page())
            .field("source", &self.source)
            .field("destinations", &self.selection.len())
            .finish_non_exhaustive()
    }
}

fn route_for(destinations: &[Destination]) -> Route {
    let mut groups = destinations.iter().filter(|d| d.is_group());
    match (groups.next(), groups.next()) {
        (Some(group), None) => Route::GroupReleases {
            group_id: group.id().to_string(),
        },
        _ => Route::ReleaseList,
    }
}
