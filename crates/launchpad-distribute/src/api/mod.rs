//! HTTP implementations of the collaborator traits

mod client;

pub use client::{ApiClient, ApiClientConfig};
