//! # relay-settings
//!
//! Configuration with layered sources: compiled defaults, an optional JSON
//! settings file deep-merged over them, then environment variable overrides.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use types::{IngressSettings, KeepaliveSettings, LoggingSettings, RelaySettings, ServerSettings};
