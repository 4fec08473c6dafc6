//! Device provisioning against the developer portal

mod devices;
mod errors;
mod session;

pub use devices::{
    classify_device, project_registration, DevicesToBeRegistered, RegistrationCapacity,
};
pub use errors::ErrorPage;
pub use session::{DeviceProvisioningSession, ProvisioningStep, ServiceConnection};
