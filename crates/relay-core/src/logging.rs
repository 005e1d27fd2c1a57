//! Structured logging with `tracing`.
//!
//! Connection context (`conn_id`, `remote_addr`, `correlation_id`) is
//! attached as structured fields on each event rather than formatted into
//! the message.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Output format for the stderr subscriber.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable single-line output.
    #[default]
    Compact,
    /// Newline-delimited JSON.
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "compact" | "text" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Compact => f.write_str("compact"),
            Self::Json => f.write_str("json"),
        }
    }
}

/// Initialize the global tracing subscriber writing to stderr.
///
/// `RUST_LOG` takes precedence over `level` when set. Subsequent calls are
/// no-ops.
pub fn init_subscriber(level: &str, format: LogFormat) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    // try_init fails if a global default is already set
    let _ = match format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_subscriber_does_not_panic() {
        init_subscriber("warn", LogFormat::Compact);
        init_subscriber("debug", LogFormat::Json);
    }

    #[test]
    fn format_from_str() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("COMPACT".parse::<LogFormat>().unwrap(), LogFormat::Compact);
        assert_eq!("text".parse::<LogFormat>().unwrap(), LogFormat::Compact);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn format_serde() {
        assert_eq!(serde_json::to_string(&LogFormat::Json).unwrap(), r#""json""#);
        let back: LogFormat = serde_json::from_str(r#""compact""#).unwrap();
        assert_eq!(back, LogFormat::Compact);
    }

    #[test]
    fn format_display_round_trips() {
        for f in [LogFormat::Compact, LogFormat::Json] {
            assert_eq!(f.to_string().parse::<LogFormat>().unwrap(), f);
        }
    }
}
