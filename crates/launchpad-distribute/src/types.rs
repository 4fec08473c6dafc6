//! Common types for the distribution pipeline

use std::fmt;
use std::str::FromStr;

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::{DistributeError, Result};

/// Server-assigned release identifier
pub type ReleaseId = u64;

/// An app addressed as `owner/name`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AppRef {
    /// User or organization owning the app
    pub owner: String,
    /// App name
    pub name: String,
}

impl AppRef {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for AppRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

impl FromStr for AppRef {
    type Err = DistributeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once('/') {
            Some((owner, name))
                if !owner.is_empty() && !name.is_empty() && !name.contains('/') =>
            {
                Ok(Self::new(owner, name))
            }
            _ => Err(DistributeError::Validation(format!(
                "App must be given as owner/name, got '{}'",
                s
            ))),
        }
    }
}

/// Target operating system of an app
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetOs {
    Ios,
    Tvos,
    Android,
    Macos,
    Windows,
    /// Any other platform; no store support
    Custom,
}

impl TargetOs {
    /// Whether binaries for this OS are code-signed against registered devices
    pub fn uses_device_provisioning(&self) -> bool {
        matches!(self, TargetOs::Ios)
    }
}

impl fmt::Display for TargetOs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetOs::Ios => write!(f, "iOS"),
            TargetOs::Tvos => write!(f, "tvOS"),
            TargetOs::Android => write!(f, "Android"),
            TargetOs::Macos => write!(f, "macOS"),
            TargetOs::Windows => write!(f, "Windows"),
            TargetOs::Custom => write!(f, "Custom"),
        }
    }
}

impl FromStr for TargetOs {
    type Err = DistributeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "ios" => Ok(TargetOs::Ios),
            "tvos" => Ok(TargetOs::Tvos),
            "android" => Ok(TargetOs::Android),
            "macos" | "osx" => Ok(TargetOs::Macos),
            "windows" | "uwp" => Ok(TargetOs::Windows),
            "custom" | "linux" => Ok(TargetOs::Custom),
            other => Err(DistributeError::Validation(format!("Unknown OS: {}", other))),
        }
    }
}

/// Provisioning profile type embedded in an iOS binary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProvisioningProfileType {
    Adhoc,
    Enterprise,
    Other,
}

/// A release record on the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Release {
    pub id: ReleaseId,

    /// Build version (e.g. "42")
    pub version: String,

    /// Marketing version (e.g. "1.2.0")
    pub short_version: String,

    /// File extension of the uploaded binary, without the leading dot
    #[serde(default)]
    pub file_extension: Option<String>,

    #[serde(default)]
    pub is_external_build: bool,

    #[serde(default)]
    pub provisioning_profile_type: Option<ProvisioningProfileType>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Destinations this release has been distributed to, in order
    #[serde(default)]
    pub destinations: Vec<Destination>,
}

fn default_enabled() -> bool {
    true
}

impl Release {
    /// Append destinations, skipping any already present
    pub fn add_destinations<'a>(
        &mut self,
        destinations: impl IntoIterator<Item = &'a Destination>,
    ) {
        for destination in destinations {
            let key = destination.key();
            if !self.destinations.iter().any(|d| d.key() == key) {
                self.destinations.push(destination.clone());
            }
        }
    }
}

/// Somewhere a release can be sent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Destination {
    /// A distribution group
    Group {
        id: String,
        name: String,
        /// Number of members, used only for reach estimates
        #[serde(default, skip_serializing_if = "Option::is_none")]
        member_count: Option<u32>,
    },
    /// An individual tester
    Tester { email: String },
    /// A public or private app store connection
    Store { id: String, name: String },
}

/// Stable identity of a destination used for de-duplication
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DestinationKey {
    Group(String),
    Tester(String),
    Store(String),
}

impl Destination {
    pub fn group(id: impl Into<String>, name: impl Into<String>) -> Self {
        Destination::Group {
            id: id.into(),
            name: name.into(),
            member_count: None,
        }
    }

    pub fn tester(email: impl Into<String>) -> Self {
        Destination::Tester {
            email: email.into(),
        }
    }

    pub fn store(id: impl Into<String>, name: impl Into<String>) -> Self {
        Destination::Store {
            id: id.into(),
            name: name.into(),
        }
    }

    /// Tester emails compare case-insensitively
    pub fn key(&self) -> DestinationKey {
        match self {
            Destination::Group { id, .. } => DestinationKey::Group(id.clone()),
            Destination::Tester { email } => DestinationKey::Tester(email.trim().to_lowercase()),
            Destination::Store { id, .. } => DestinationKey::Store(id.clone()),
        }
    }

    /// Server-side identifier (group/store id or tester email)
    pub fn id(&self) -> &str {
        match self {
            Destination::Group { id, .. } | Destination::Store { id, .. } => id,
            Destination::Tester { email } => email,
        }
    }

    pub fn is_tester(&self) -> bool {
        matches!(self, Destination::Tester { .. })
    }

    pub fn is_group(&self) -> bool {
        matches!(self, Destination::Group { .. })
    }

    pub fn is_store(&self) -> bool {
        matches!(self, Destination::Store { .. })
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Group { name, .. } | Destination::Store { name, .. } => {
                write!(f, "{}", name)
            }
            Destination::Tester { email } => write!(f, "{}", email),
        }
    }
}

/// Ticket returned when an upload is created
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadTicket {
    /// Upload record id, used for status updates
    #[serde(rename = "id")]
    pub upload_id: String,

    /// Blob-storage asset that receives the chunks
    #[serde(rename = "package_asset_id")]
    pub asset_id: String,

    /// Host serving the chunked ingestion protocol
    pub upload_domain: String,

    /// Token authorizing chunk uploads for this asset
    #[serde(rename = "url_encoded_token")]
    pub token: String,
}

/// Upload processing state reported by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UploadState {
    UploadStarted,
    UploadFinished,
    ReadyToBePublished,
    MalwareDetected,
    Error,
}

impl UploadState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UploadState::ReadyToBePublished | UploadState::MalwareDetected | UploadState::Error
        )
    }
}

/// Upload status response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadStatusResponse {
    pub id: String,

    pub upload_status: UploadState,

    /// Set once the upload has been turned into a release
    #[serde(default)]
    pub release_distinct_id: Option<ReleaseId>,

    #[serde(default)]
    pub error_details: Option<String>,
}

/// Apple device classes counted separately by the developer program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    Iphones,
    Ipads,
    Ipods,
    Watches,
}

impl DeviceClass {
    pub const ALL: [DeviceClass; 4] = [
        DeviceClass::Iphones,
        DeviceClass::Ipads,
        DeviceClass::Ipods,
        DeviceClass::Watches,
    ];
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceClass::Iphones => write!(f, "iphones"),
            DeviceClass::Ipads => write!(f, "ipads"),
            DeviceClass::Ipods => write!(f, "ipods"),
            DeviceClass::Watches => write!(f, "watches"),
        }
    }
}

/// Registration capacity for one device class
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCapacity {
    pub registered: u32,
    pub available: u32,
    pub maximum: u32,
}

/// Per-class device capacity of a developer account
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityOfDevices {
    #[serde(default)]
    pub iphones: DeviceCapacity,
    #[serde(default)]
    pub ipads: DeviceCapacity,
    #[serde(default)]
    pub ipods: DeviceCapacity,
    #[serde(default)]
    pub watches: DeviceCapacity,
}

impl AvailabilityOfDevices {
    pub fn get(&self, class: DeviceClass) -> &DeviceCapacity {
        match class {
            DeviceClass::Iphones => &self.iphones,
            DeviceClass::Ipads => &self.ipads,
            DeviceClass::Ipods => &self.ipods,
            DeviceClass::Watches => &self.watches,
        }
    }

    pub fn get_mut(&mut self, class: DeviceClass) -> &mut DeviceCapacity {
        match class {
            DeviceClass::Iphones => &mut self.iphones,
            DeviceClass::Ipads => &mut self.ipads,
            DeviceClass::Ipods => &mut self.ipods,
            DeviceClass::Watches => &mut self.watches,
        }
    }
}

/// A tester device whose UDID is not yet in the provisioning profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnprovisionedDevice {
    pub udid: String,
    pub device_name: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub owner_email: Option<String>,
}

/// Result of a device registration request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRegistration {
    /// Zip of updated provisioning profiles, when no resigning is needed
    #[serde(default)]
    pub profiles_zip_base64: Option<String>,

    /// Job status resource to poll when the work is asynchronous
    #[serde(default)]
    pub status_url: Option<String>,
}

impl DeviceRegistration {
    /// Decode the provisioning profile bundle, if one was returned
    pub fn decode_profiles(&self) -> Result<Option<Vec<u8>>> {
        decode_bundle(self.profiles_zip_base64.as_deref())
    }
}

pub(crate) fn decode_bundle(encoded: Option<&str>) -> Result<Option<Vec<u8>>> {
    encoded
        .map(|b64| {
            base64::engine::general_purpose::STANDARD
                .decode(b64.trim())
                .map_err(|e| DistributeError::Other(format!("Invalid profile bundle: {}", e)))
        })
        .transpose()
}

/// Resigning job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResigningStatus {
    Started,
    Validating,
    Resigning,
    Uploading,
    PreparingForTesters,
    Complete,
    Failed,
}

impl ResigningStatus {
    /// The job finished and testers can install the build
    pub fn is_success(&self) -> bool {
        matches!(self, ResigningStatus::Complete | ResigningStatus::PreparingForTesters)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, ResigningStatus::Failed)
    }

    pub fn is_terminal(&self) -> bool {
        self.is_success() || self.is_failure()
    }
}

impl fmt::Display for ResigningStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResigningStatus::Started => write!(f, "Started"),
            ResigningStatus::Validating => write!(f, "Validating"),
            ResigningStatus::Resigning => write!(f, "Resigning"),
            ResigningStatus::Uploading => write!(f, "Uploading"),
            ResigningStatus::PreparingForTesters => write!(f, "Preparing for testers"),
            ResigningStatus::Complete => write!(f, "Complete"),
            ResigningStatus::Failed => write!(f, "Failed"),
        }
    }
}

/// Mirror of the server-side provisioning job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningStatus {
    #[serde(rename = "status")]
    pub resigning_status: ResigningStatus,

    #[serde(default)]
    pub error_code: Option<String>,

    #[serde(default)]
    pub error_message: Option<String>,

    #[serde(default)]
    pub profiles_zip_base64: Option<String>,
}

impl ProvisioningStatus {
    pub fn new(status: ResigningStatus) -> Self {
        Self {
            resigning_status: status,
            error_code: None,
            error_message: None,
            profiles_zip_base64: None,
        }
    }
}

/// Identity of an auto-provisioning configuration
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AutoProvisioningKey {
    pub owner: String,
    pub app: String,
    pub destination_id: String,
}

impl AutoProvisioningKey {
    pub fn new(app: &AppRef, destination_id: impl Into<String>) -> Self {
        Self {
            owner: app.owner.clone(),
            app: app.name.clone(),
            destination_id: destination_id.into(),
        }
    }
}

/// Per-destination auto-provisioning configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoProvisioningConfig {
    #[serde(default)]
    pub id: Option<u64>,

    pub destination_id: String,

    pub allow_auto_provisioning: bool,

    #[serde(default)]
    pub apple_developer_account_key: Option<String>,

    #[serde(default)]
    pub apple_distribution_certificate_key: Option<String>,
}

/// A distribution group as returned by the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionGroup {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub is_public: bool,
    #[serde(default)]
    pub total_user_count: Option<u32>,
}

impl DistributionGroup {
    pub fn as_destination(&self) -> Destination {
        Destination::Group {
            id: self.id.clone(),
            name: self.name.clone(),
            member_count: self.total_user_count,
        }
    }
}

/// How to authenticate against the developer portal
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PortalAuth {
    /// Apple ID and password entered by the user
    Credentials { username: String, password: String },
    /// A stored service connection
    ServiceConnection { id: String },
}

impl fmt::Debug for PortalAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortalAuth::Credentials { username, .. } => f
                .debug_struct("Credentials")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            PortalAuth::ServiceConnection { id } => {
                f.debug_struct("ServiceConnection").field("id", id).finish()
            }
        }
    }
}

/// Request to register devices with the developer portal
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishDevicesRequest {
    pub group_name: String,
    pub auth: PortalAuth,
    /// UDIDs to register
    pub devices: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_id: Option<ReleaseId>,
}

/// Request to register devices and resign a release
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResignRequest {
    pub group_name: String,
    pub account_service_connection_id: String,
    pub certificate_service_connection_id: String,
    pub release_id: ReleaseId,
    /// UDIDs to register before resigning
    pub devices: Vec<String>,
}

/// Release metadata update issued before a fan-out
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReleaseDetailsUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_notes: Option<String>,
    pub mandatory_update: bool,
    /// Destinations about to receive the release; the server uses them to
    /// start auto-provisioning where it is enabled
    pub destinations: Vec<Destination>,
}

/// Response to a release metadata update
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ReleaseDetailsResponse {
    #[serde(default)]
    pub provisioning_status_url: Option<String>,
}

/// Options for a single distribute request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DistributeOptions {
    pub mandatory_update: bool,
    pub notify_testers: bool,
}

/// Registration of a binary hosted outside the service
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExternalBuildRequest {
    /// Where testers download the binary from
    pub build_url: String,
    pub version: String,
    pub short_version: String,
}
