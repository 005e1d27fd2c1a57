//! # relay-core
//!
//! Foundation types shared by every relay crate.
//!
//! - **Branded IDs**: `ConnectionId` per consumer channel, validated `CorrelationId`
//! - **Wire schemas**: `ConsumerMessage` (binding request) and `Item` (producer payload)
//! - **Errors**: `RelayError` via `thiserror`
//! - **Logging**: `tracing` subscriber setup

#![deny(unsafe_code)]

pub mod errors;
pub mod ids;
pub mod logging;
pub mod messages;

pub use errors::{RelayError, Result};
pub use ids::{ConnectionId, CorrelationId};
pub use messages::{ConsumerMessage, Item};
