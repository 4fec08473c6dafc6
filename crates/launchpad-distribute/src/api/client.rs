//! REST client for the distribution service

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;
use url::Url;

use crate::error::{DistributeError, Result};
use crate::provisioning::ErrorPage;
use crate::traits::*;
use crate::types::*;

const API_VERSION: &str = "v0.1";

/// API client configuration
#[derive(Debug, Clone)]
pub struct ApiClientConfig {
    /// Base URL (e.g. "https://api.appcenter.ms")
    pub base_url: String,

    /// API token sent as `X-API-Token`
    pub token: String,

    /// Per-request timeout
    pub timeout: Duration,
}

/// HTTP implementation of the service collaborators
pub struct ApiClient {
    base_url: Url,
    token: String,
    client: Client,
}

/// Error body returned by the service
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<Box<ErrorBody>>,
}

impl ErrorBody {
    fn code(&self) -> Option<&str> {
        self.code
            .as_deref()
            .or_else(|| self.error.as_ref().and_then(|e| e.code()))
    }

    fn message(&self) -> Option<&str> {
        self.message
            .as_deref()
            .or_else(|| self.error.as_ref().and_then(|e| e.message()))
    }
}

/// Which part of the service a request targets, for error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Endpoint {
    Service,
    Portal,
}

/// Turn an error response into a [`DistributeError`].
///
/// Developer portal errors are classified into an [`ErrorPage`] from
/// their error code; everything else keeps the HTTP status.
fn classify_error(status: StatusCode, body: &str, endpoint: Endpoint) -> DistributeError {
    let parsed: Option<ErrorBody> = serde_json::from_str(body).ok();
    let message = parsed
        .as_ref()
        .and_then(|b| b.message())
        .map(str::to_string)
        .unwrap_or_else(|| body.to_string());

    match endpoint {
        Endpoint::Portal => {
            let page = parsed
                .as_ref()
                .and_then(|b| b.code())
                .map(ErrorPage::from_code)
                .unwrap_or(if status == StatusCode::UNAUTHORIZED {
                    ErrorPage::AuthFailed
                } else {
                    ErrorPage::Unhandled
                });
            DistributeError::Portal { page, message }
        }
        Endpoint::Service => DistributeError::ApiError {
            status: status.as_u16(),
            message,
        },
    }
}

#[derive(Debug, Serialize)]
struct DistributeBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<&'a str>,
    mandatory_update: bool,
    notify_testers: bool,
}

impl ApiClient {
    /// Create a client
    pub fn new(config: ApiClientConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url).map_err(|e| {
            DistributeError::ConfigurationError(format!(
                "Invalid API URL '{}': {}",
                config.base_url, e
            ))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(DistributeError::ConfigurationError(format!(
                "Invalid API URL '{}'",
                config.base_url
            )));
        }
        if config.token.trim().is_empty() {
            return Err(DistributeError::ConfigurationError(
                "API token is empty".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("launchpad/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            base_url,
            token: config.token,
            client,
        })
    }

    /// The underlying HTTP client, shared with the chunked transfer
    pub fn http_client(&self) -> Client {
        self.client.clone()
    }

    /// URL under the API root built from path segments
    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| DistributeError::ConfigurationError("Invalid API URL".to_string()))?
            .pop_if_empty()
            .push(API_VERSION)
            .extend(segments);
        Ok(url)
    }

    /// URL under `apps/{owner}/{app}`
    fn app_url(&self, app: &AppRef, segments: &[&str]) -> Result<Url> {
        let mut all = vec!["apps", app.owner.as_str(), app.name.as_str()];
        all.extend_from_slice(segments);
        self.url(&all)
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<serde_json::Value>,
        endpoint: Endpoint,
    ) -> Result<Response> {
        debug!("API request: {} {}", method, url);

        let mut request = self
            .client
            .request(method, url)
            .header("X-API-Token", &self.token)
            .header("Content-Type", "application/json");

        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(classify_error(status, &error_text, endpoint));
        }

        Ok(response)
    }

    async fn api_request<T: DeserializeOwned>(
        &self,
        method: Method,
        url: Url,
        body: Option<serde_json::Value>,
        endpoint: Endpoint,
    ) -> Result<T> {
        let response = self.send(method, url, body, endpoint).await?;
        let result = response.json().await?;
        Ok(result)
    }

    async fn api_request_empty(
        &self,
        method: Method,
        url: Url,
        body: Option<serde_json::Value>,
        endpoint: Endpoint,
    ) -> Result<()> {
        self.send(method, url, body, endpoint).await?;
        Ok(())
    }

    fn auto_provisioning_url(&self, key: &AutoProvisioningKey) -> Result<Url> {
        self.url(&[
            "apps",
            &key.owner,
            &key.app,
            "distribution_groups",
            &key.destination_id,
            "auto_provisioning_config",
        ])
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl UploadService for ApiClient {
    async fn create_upload_ticket(&self, app: &AppRef) -> Result<UploadTicket> {
        let url = self.app_url(app, &["uploads", "releases"])?;
        self.api_request(Method::POST, url, Some(json!({})), Endpoint::Service)
            .await
    }

    async fn patch_upload_status(
        &self,
        app: &AppRef,
        upload_id: &str,
        state: UploadState,
    ) -> Result<()> {
        let url = self.app_url(app, &["uploads", "releases", upload_id])?;
        self.api_request_empty(
            Method::PATCH,
            url,
            Some(json!({ "upload_status": state })),
            Endpoint::Service,
        )
        .await
    }

    async fn get_upload_status(
        &self,
        app: &AppRef,
        upload_id: &str,
    ) -> Result<UploadStatusResponse> {
        let url = self.app_url(app, &["uploads", "releases", upload_id])?;
        self.api_request(Method::GET, url, None, Endpoint::Service)
            .await
    }

    async fn get_release(&self, app: &AppRef, release_id: ReleaseId) -> Result<Release> {
        let id = release_id.to_string();
        let url = self.app_url(app, &["releases", &id])?;
        self.api_request(Method::GET, url, None, Endpoint::Service)
            .await
    }

    async fn register_external_build(
        &self,
        app: &AppRef,
        request: &ExternalBuildRequest,
    ) -> Result<Release> {
        let url = self.app_url(app, &["releases"])?;
        self.api_request(
            Method::POST,
            url,
            Some(serde_json::to_value(request)?),
            Endpoint::Service,
        )
        .await
    }
}

#[async_trait]
impl DeveloperPortal for ApiClient {
    async fn get_device_availability(
        &self,
        app: &AppRef,
        auth: &PortalAuth,
        release_id: Option<ReleaseId>,
    ) -> Result<AvailabilityOfDevices> {
        let url = self.app_url(app, &["devices", "availability"])?;
        self.api_request(
            Method::POST,
            url,
            Some(json!({ "auth": auth, "release_id": release_id })),
            Endpoint::Portal,
        )
        .await
    }

    async fn unprovisioned_devices(
        &self,
        app: &AppRef,
        group_name: &str,
        release_id: Option<ReleaseId>,
    ) -> Result<Vec<UnprovisionedDevice>> {
        let mut url = self.app_url(app, &["distribution_groups", group_name, "devices"])?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("unprovisioned_only", "true");
            if let Some(id) = release_id {
                query.append_pair("release_id", &id.to_string());
            }
        }
        self.api_request(Method::GET, url, None, Endpoint::Portal)
            .await
    }

    async fn publish_devices(
        &self,
        app: &AppRef,
        request: &PublishDevicesRequest,
    ) -> Result<DeviceRegistration> {
        let url = self.app_url(
            app,
            &["distribution_groups", &request.group_name, "devices", "register"],
        )?;
        self.api_request(
            Method::POST,
            url,
            Some(serde_json::to_value(request)?),
            Endpoint::Portal,
        )
        .await
    }

    async fn publish_and_resign(
        &self,
        app: &AppRef,
        request: &ResignRequest,
    ) -> Result<DeviceRegistration> {
        let url = self.app_url(
            app,
            &[
                "distribution_groups",
                &request.group_name,
                "devices",
                "register_and_resign",
            ],
        )?;
        self.api_request(
            Method::POST,
            url,
            Some(serde_json::to_value(request)?),
            Endpoint::Portal,
        )
        .await
    }

    async fn invalidate_connection(&self, connection_id: &str) -> Result<()> {
        let url = self.url(&["user", "service_connections", connection_id])?;
        self.api_request_empty(
            Method::PATCH,
            url,
            Some(json!({ "is_valid": false })),
            Endpoint::Service,
        )
        .await
    }
}

#[async_trait]
impl StatusResource for ApiClient {
    async fn get_status(&self, url: &str) -> Result<ProvisioningStatus> {
        // Status URLs may be absolute or relative to the API root
        let url = match Url::parse(url) {
            Ok(absolute) => absolute,
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                self.base_url.join(url).map_err(|e| {
                    DistributeError::Other(format!("Invalid status URL '{}': {}", url, e))
                })?
            }
            Err(e) => {
                return Err(DistributeError::Other(format!(
                    "Invalid status URL '{}': {}",
                    url, e
                )))
            }
        };
        self.api_request(Method::GET, url, None, Endpoint::Portal)
            .await
    }
}

#[async_trait]
impl DistributionService for ApiClient {
    async fn put_release_details(
        &self,
        app: &AppRef,
        release_id: ReleaseId,
        update: &ReleaseDetailsUpdate,
    ) -> Result<ReleaseDetailsResponse> {
        let id = release_id.to_string();
        let url = self.app_url(app, &["releases", &id])?;
        self.api_request(
            Method::PUT,
            url,
            Some(serde_json::to_value(update)?),
            Endpoint::Service,
        )
        .await
    }

    async fn distribute_release(
        &self,
        app: &AppRef,
        release_id: ReleaseId,
        destination: &Destination,
        options: &DistributeOptions,
    ) -> Result<()> {
        let id = release_id.to_string();
        let (collection, body) = match destination {
            Destination::Group { id, .. } => (
                "groups",
                DistributeBody {
                    id: Some(id),
                    email: None,
                    mandatory_update: options.mandatory_update,
                    notify_testers: options.notify_testers,
                },
            ),
            Destination::Tester { email } => (
                "testers",
                DistributeBody {
                    id: None,
                    email: Some(email),
                    mandatory_update: options.mandatory_update,
                    notify_testers: options.notify_testers,
                },
            ),
            Destination::Store { id, .. } => (
                "stores",
                DistributeBody {
                    id: Some(id),
                    email: None,
                    mandatory_update: false,
                    notify_testers: false,
                },
            ),
        };

        let url = self.app_url(app, &["releases", &id, collection])?;
        self.api_request_empty(
            Method::POST,
            url,
            Some(serde_json::to_value(&body)?),
            Endpoint::Service,
        )
        .await
    }
}

#[async_trait]
impl DistributionGroups for ApiClient {
    async fn create_group(
        &self,
        app: &AppRef,
        name: &str,
        is_public: bool,
    ) -> Result<DistributionGroup> {
        let url = self.app_url(app, &["distribution_groups"])?;
        self.api_request(
            Method::POST,
            url,
            Some(json!({ "name": name, "is_public": is_public })),
            Endpoint::Service,
        )
        .await
    }

    async fn add_members(&self, app: &AppRef, group_name: &str, emails: &[String]) -> Result<()> {
        let url = self.app_url(app, &["distribution_groups", group_name, "members"])?;
        self.api_request_empty(
            Method::POST,
            url,
            Some(json!({ "user_emails": emails })),
            Endpoint::Service,
        )
        .await
    }

    async fn remove_members(
        &self,
        app: &AppRef,
        group_name: &str,
        emails: &[String],
    ) -> Result<()> {
        let url = self.app_url(
            app,
            &["distribution_groups", group_name, "members", "bulk_delete"],
        )?;
        self.api_request_empty(
            Method::POST,
            url,
            Some(json!({ "user_emails": emails })),
            Endpoint::Service,
        )
        .await
    }
}

#[async_trait]
impl AutoProvisioningStore for ApiClient {
    async fn get(&self, key: &AutoProvisioningKey) -> Result<Option<AutoProvisioningConfig>> {
        let url = self.auto_provisioning_url(key)?;
        match self.api_request(Method::GET, url, None, Endpoint::Service).await {
            Ok(config) => Ok(Some(config)),
            Err(DistributeError::ApiError { status: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create(
        &self,
        key: &AutoProvisioningKey,
        config: &AutoProvisioningConfig,
    ) -> Result<AutoProvisioningConfig> {
        let url = self.auto_provisioning_url(key)?;
        self.api_request(
            Method::POST,
            url,
            Some(serde_json::to_value(config)?),
            Endpoint::Service,
        )
        .await
    }

    async fn update(
        &self,
        key: &AutoProvisioningKey,
        config: &AutoProvisioningConfig,
    ) -> Result<AutoProvisioningConfig> {
        let url = self.auto_provisioning_url(key)?;
        self.api_request(
            Method::PUT,
            url,
            Some(serde_json::to_value(config)?),
            Endpoint::Service,
        )
        .await
    }

    async fn delete(&self, key: &AutoProvisioningKey) -> Result<()> {
        let url = self.auto_provisioning_url(key)?;
        self.api_request_empty(Method::DELETE, url, None, Endpoint::Service)
            .await
    }
}
