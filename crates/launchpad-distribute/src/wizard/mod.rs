//! Distribution wizard: page flow, destination selection and fan-out

mod destinations;
mod fanout;
mod orchestrator;
mod pages;

pub use destinations::{AddDestinationsOutcome, DestinationSelection};
pub use fanout::{distribute_all, FanOutOutcome, FanOutTracker};
pub use orchestrator::{DistributionWizard, FinishProgress, Route, WizardState};
pub use pages::{derive_pages, device_registration_required, EntryContext, Page, Source};
