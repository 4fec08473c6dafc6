//! Release distribution and device provisioning for Launchpad
//!
//! This crate drives a build from a local binary to testers:
//!
//! - **Upload**: chunked upload of a binary and polling until the server
//!   has turned it into a release
//! - **Provisioning**: developer portal login, device capacity checks,
//!   device registration and release resigning
//! - **Polling**: background status polling with at-most-once notifications
//! - **Wizard**: page flow, destination selection and parallel distribution
//!
//! ## Usage
//!
//! ```ignore
//! use launchpad_distribute::{api::ApiClient, DistributionContext, wizard::*};
//!
//! let ctx = DistributionContext::http(app, ApiClient::new(config)?, notifier, settings);
//! let mut wizard = DistributionWizard::new(&ctx, TargetOs::Ios, EntryContext::ReleaseList);
//! wizard.upload(&path).await?;
//! wizard.add_destinations([group.as_destination()]);
//! let route = wizard.finish().await?;
//! ```

pub mod api;
pub mod context;
pub mod error;
pub mod members;
pub mod notify;
pub mod poller;
pub mod provisioning;
pub mod traits;
pub mod types;
pub mod upload;
pub mod wizard;

#[cfg(test)]
pub(crate) mod testing;

pub use context::{DistributionContext, DistributionSettings};
pub use error::{DistributeError, Result};
pub use poller::{PollOutcome, StatusPoller};
pub use types::*;
