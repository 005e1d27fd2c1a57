//! Settings types.
//!
//! All structs use `#[serde(rename_all = "camelCase", default)]` so a
//! settings file only needs the keys it overrides.

use relay_core::logging::LogFormat;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    /// Network listener and per-connection limits.
    pub server: ServerSettings,
    /// Heartbeat and eviction timing.
    pub keepalive: KeepaliveSettings,
    /// Producer endpoint limits.
    pub ingress: IngressSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl RelaySettings {
    /// Reject values that would disable liveness tracking or admission.
    pub fn validate(&self) -> Result<()> {
        let checks = [
            ("keepalive.heartbeatIntervalMs", self.keepalive.heartbeat_interval_ms),
            ("keepalive.inactivityTimeoutMs", self.keepalive.inactivity_timeout_ms),
            ("keepalive.sweepIntervalMs", self.keepalive.sweep_interval_ms),
            ("ingress.rateLimitWindowMs", self.ingress.rate_limit_window_ms),
        ];
        for (key, value) in checks {
            if value == 0 {
                return Err(SettingsError::InvalidValue(format!("{key} must be > 0")));
            }
        }
        if self.server.send_queue_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "server.sendQueueCapacity must be > 0".into(),
            ));
        }
        if self.ingress.rate_limit_max_requests == 0 {
            return Err(SettingsError::InvalidValue(
                "ingress.rateLimitMaxRequests must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Listener and connection settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port (`0` picks a free port).
    pub port: u16,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Outbound frames buffered per consumer before sends start dropping.
    pub send_queue_capacity: usize,
    /// Dropped frames tolerated before a slow consumer is evicted.
    pub max_dropped_frames: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            max_message_size: 1024 * 1024,
            send_queue_capacity: 256,
            max_dropped_frames: 100,
        }
    }
}

/// Keepalive timing in milliseconds.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KeepaliveSettings {
    /// Interval between heartbeat pings.
    pub heartbeat_interval_ms: u64,
    /// Silence after which a connection is considered dead.
    pub inactivity_timeout_ms: u64,
    /// Interval between stale-connection sweeps.
    pub sweep_interval_ms: u64,
}

impl Default for KeepaliveSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 30_000,
            inactivity_timeout_ms: 120_000,
            sweep_interval_ms: 60_000,
        }
    }
}

/// Producer endpoint settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IngressSettings {
    /// Rate limit window length.
    pub rate_limit_window_ms: u64,
    /// Requests allowed per source IP per window.
    pub rate_limit_max_requests: u32,
    /// Max producer request body size in bytes.
    pub max_body_bytes: usize,
}

impl Default for IngressSettings {
    fn default() -> Self {
        Self {
            rate_limit_window_ms: 60_000,
            rate_limit_max_requests: 10,
            max_body_bytes: 1024 * 1024,
        }
    }
}

/// Logging settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default `EnvFilter` directive when `RUST_LOG` is unset.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}
