//! # relay-server
//!
//! Correlation-routed broadcast relay.
//!
//! - Connection registry: live consumers and their correlation binding
//! - Keepalive monitor: heartbeat pings and stale-connection eviction
//! - Dispatcher: targeted fan-out of producer items to bound consumers
//! - Ingress: Axum `WebSocket` consumer endpoint, rate-limited producer
//!   endpoint, health check, Prometheus metrics
//! - Graceful shutdown via `tokio::signal` + `CancellationToken`

#![deny(unsafe_code)]

pub mod channel;
pub mod dispatch;
pub mod health;
pub mod keepalive;
pub mod metrics;
pub mod rate_limit;
pub mod registry;
pub mod relay;
pub mod server;
pub mod shutdown;
pub mod websocket;
