//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`RelaySettings::default()`]
//! 2. If the settings file exists, deep-merge its values over defaults
//! 3. Apply environment variable overrides (highest priority)
//! 4. Validate
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::RelaySettings;

/// Resolve the settings file path: `$RELAY_SETTINGS`, else `~/.relay/settings.json`.
pub fn settings_path() -> PathBuf {
    if let Some(explicit) = read_env_string("RELAY_SETTINGS") {
        return PathBuf::from(explicit);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".relay").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<RelaySettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<RelaySettings> {
    let defaults = serde_json::to_value(RelaySettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: RelaySettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment variable overrides to loaded settings.
///
/// Invalid values are logged and ignored (fall back to file/default).
pub fn apply_env_overrides(settings: &mut RelaySettings) {
    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = read_env_string("RELAY_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read_env_u16("RELAY_PORT", 0, 65535) {
        settings.server.port = v;
    }

    // ── Keepalive ───────────────────────────────────────────────────
    if let Some(v) = read_env_u64("RELAY_HEARTBEAT_INTERVAL_MS", 100, 3_600_000) {
        settings.keepalive.heartbeat_interval_ms = v;
    }
    if let Some(v) = read_env_u64("RELAY_INACTIVITY_TIMEOUT_MS", 100, 86_400_000) {
        settings.keepalive.inactivity_timeout_ms = v;
    }
    if let Some(v) = read_env_u64("RELAY_SWEEP_INTERVAL_MS", 100, 3_600_000) {
        settings.keepalive.sweep_interval_ms = v;
    }

    // ── Ingress ─────────────────────────────────────────────────────
    if let Some(v) = read_env_u64("RELAY_RATE_LIMIT_MAX", 1, 1_000_000)
        .and_then(|v| u32::try_from(v).ok())
    {
        settings.ingress.rate_limit_max_requests = v;
    }
    if let Some(v) = read_env_u64("RELAY_RATE_LIMIT_WINDOW_MS", 1000, 86_400_000) {
        settings.ingress.rate_limit_window_ms = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = read_env_string("RELAY_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read_env_string("RELAY_LOG_FORMAT") {
        match v.parse() {
            Ok(format) => settings.logging.format = format,
            Err(e) => tracing::warn!(key = "RELAY_LOG_FORMAT", value = %v, error = %e, "invalid log format env var, ignoring"),
        }
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_u16(name: &str, min: u16, max: u16) -> Option<u16> {
    let val = std::env::var(name).ok()?;
    let result = parse_u16_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u16 env var, ignoring");
    }
    result
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
