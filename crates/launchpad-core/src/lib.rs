//! Launchpad Core - configuration and error handling for release distribution
//!
//! This crate loads and validates the `launchpad.toml` / `launchpad.yaml`
//! configuration and turns it into the runtime settings consumed by
//! `launchpad-distribute`.

pub mod config;
pub mod error;

pub use config::{find_config, load_config, load_config_from_dir, load_config_or_default, Config};
pub use error::{ConfigError, LaunchpadError, Result};
