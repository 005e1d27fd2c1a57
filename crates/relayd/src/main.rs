//! # relayd
//!
//! Correlation relay server binary: loads settings, starts the HTTP and
//! `WebSocket` listener, and shuts down on Ctrl-C or SIGTERM.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use relay_core::logging::{self, LogFormat};
use relay_server::server::RelayServer;
use relay_server::shutdown::shutdown_signal;
use relay_settings::RelaySettings;
use relay_settings::loader;

/// Correlation relay server.
#[derive(Parser, Debug)]
#[command(name = "relayd", about = "Correlation-routed broadcast relay")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file (default: `$RELAY_SETTINGS` or `~/.relay/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log filter directive, e.g. `info` or `relay_server=debug`.
    #[arg(long)]
    log_level: Option<String>,

    /// Log output format: `compact` or `json`.
    #[arg(long)]
    log_format: Option<LogFormat>,
}

impl Cli {
    fn apply(self, settings: &mut RelaySettings) {
        if let Some(host) = self.host {
            settings.server.host = host;
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(level) = self.log_level {
            settings.logging.level = level;
        }
        if let Some(format) = self.log_format {
            settings.logging.format = format;
        }
    }
}

fn load(cli: Cli) -> Result<RelaySettings> {
    let path = cli.settings.clone().unwrap_or_else(loader::settings_path);
    let mut settings = loader::load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;
    cli.apply(&mut settings);
    Ok(settings)
}

#[tokio::main]
async fn main() -> Result<()> {
    let settings = load(Cli::parse())?;
    logging::init_subscriber(&settings.logging.level, settings.logging.format);

    let metrics = relay_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;

    let server = RelayServer::new(settings, Some(metrics));
    let (addr, handle) = server
        .listen()
        .await
        .context("Failed to bind server")?;
    tracing::info!("relay listening on http://{addr}");

    shutdown_signal().await;

    tracing::info!("Shutting down...");
    server.shutdown().graceful_shutdown(vec![handle], None).await;
    tracing::info!("Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn cli_defaults_leave_settings_alone() {
        let cli = Cli::parse_from(["relayd"]);
        let mut settings = RelaySettings::default();
        cli.apply(&mut settings);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.server.port, 3000);
    }

    #[test]
    fn cli_overrides_apply() {
        let cli = Cli::parse_from([
            "relayd",
            "--host",
            "127.0.0.1",
            "--port",
            "8080",
            "--log-level",
            "debug",
            "--log-format",
            "json",
        ]);
        let mut settings = RelaySettings::default();
        cli.apply(&mut settings);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.logging.level, "debug");
        assert_eq!(settings.logging.format, LogFormat::Json);
    }

    #[test]
    fn invalid_log_format_is_rejected() {
        assert!(Cli::try_parse_from(["relayd", "--log-format", "xml"]).is_err());
    }

    #[test]
    fn cli_wins_over_settings_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"server": {{"port": 4000, "host": "10.0.0.1"}}}}"#).unwrap();
        let path = file.path().to_string_lossy().into_owned();

        let cli = Cli::parse_from(["relayd", "--settings", path.as_str(), "--port", "5000"]);
        let settings = load(cli).unwrap();
        assert_eq!(settings.server.port, 5000);
        assert_eq!(settings.server.host, "10.0.0.1");
    }

    #[test]
    fn broken_settings_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ nope").unwrap();
        let path = file.path().to_string_lossy().into_owned();

        let cli = Cli::parse_from(["relayd", "--settings", path.as_str()]);
        let err = load(cli).unwrap_err();
        assert!(err.to_string().contains("Failed to load settings"));
    }
}
