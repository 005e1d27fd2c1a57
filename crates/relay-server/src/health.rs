//! `/health` endpoint.

use serde::Serialize;
use std::time::Instant;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` while the process is serving.
    pub status: &'static str,
    /// Human-readable status line.
    pub message: &'static str,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Registered consumer connections.
    pub connections: usize,
    /// Consumer connections with a correlation binding.
    pub bound_connections: usize,
}

/// Build a health response from live counters.
pub fn health_check(start_time: Instant, connections: usize, bound_connections: usize) -> HealthResponse {
    HealthResponse {
        status: "ok",
        message: "Server is healthy",
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
        bound_connections,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_is_ok() {
        let resp = health_check(Instant::now(), 0, 0);
        assert_eq!(resp.status, "ok");
        assert_eq!(resp.message, "Server is healthy");
    }

    #[test]
    fn uptime_increases() {
        let start = Instant::now()
            .checked_sub(std::time::Duration::from_secs(60))
            .unwrap();
        let resp = health_check(start, 0, 0);
        assert!(resp.uptime_secs >= 59);
    }

    #[test]
    fn serialization() {
        let resp = health_check(Instant::now(), 3, 2);
        let parsed = serde_json::to_value(&resp).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["connections"], 3);
        assert_eq!(parsed["bound_connections"], 2);
        assert!(parsed["uptime_secs"].is_number());
    }
}
