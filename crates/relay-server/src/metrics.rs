//! Prometheus recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the global Prometheus recorder.
///
/// Call once at startup, before anything records a metric.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render the Prometheus text exposition.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

/// Consumer connections accepted (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// Consumer connections closed by the peer or transport (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Registered consumer connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Connections evicted (counter, labels: reason).
pub const WS_EVICTIONS_TOTAL: &str = "ws_evictions_total";
/// Frames that could not be queued (counter, labels: reason).
pub const WS_SEND_FAILURES_TOTAL: &str = "ws_send_failures_total";
/// Heartbeat pings queued (counter).
pub const HEARTBEATS_SENT_TOTAL: &str = "heartbeats_sent_total";
/// Consumer binding requests accepted (counter).
pub const BINDINGS_TOTAL: &str = "bindings_total";
/// Producer items received (counter).
pub const ITEMS_RECEIVED_TOTAL: &str = "items_received_total";
/// Producer items rejected by validation (counter).
pub const ITEMS_REJECTED_TOTAL: &str = "items_rejected_total";
/// Frames delivered to consumers (counter).
pub const ITEM_DELIVERIES_TOTAL: &str = "item_deliveries_total";
/// Producer requests refused by the rate limiter (counter).
pub const RATE_LIMITED_TOTAL: &str = "rate_limited_total";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_without_global_install() {
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let output = render(&handle);
        assert!(output.is_empty() || output.contains('\n'));
    }

    #[test]
    fn metric_names_are_snake_case() {
        let names = [
            WS_CONNECTIONS_TOTAL,
            WS_DISCONNECTIONS_TOTAL,
            WS_CONNECTIONS_ACTIVE,
            WS_EVICTIONS_TOTAL,
            WS_SEND_FAILURES_TOTAL,
            HEARTBEATS_SENT_TOTAL,
            BINDINGS_TOTAL,
            ITEMS_RECEIVED_TOTAL,
            ITEMS_REJECTED_TOTAL,
            ITEM_DELIVERIES_TOTAL,
            RATE_LIMITED_TOTAL,
        ];
        for name in names {
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "{name} is not snake_case"
            );
        }
    }
}
