//! Entrypoints the ingress layer calls into.
//!
//! [`Relay`] ties the registry, dispatcher, and keepalive monitor together.
//! Validation failures are logged and turned into no-ops: a bad consumer
//! message leaves the connection as it was, a bad producer item is
//! reported as zero deliveries.

use std::net::SocketAddr;
use std::sync::Arc;

use metrics::counter;
use relay_core::{ConnectionId, ConsumerMessage, CorrelationId, Item};
use relay_settings::RelaySettings;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::channel::ConsumerChannel;
use crate::dispatch::Dispatcher;
use crate::keepalive::{KeepaliveConfig, KeepaliveMonitor};
use crate::metrics::{
    BINDINGS_TOTAL, ITEMS_RECEIVED_TOTAL, ITEMS_REJECTED_TOTAL, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL,
};
use crate::registry::ConnectionRegistry;

/// Outcome of a producer submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    /// Consumers the item was queued for.
    pub delivered: usize,
}

/// The relay core.
pub struct Relay {
    registry: Arc<ConnectionRegistry>,
    dispatcher: Dispatcher,
    keepalive: Arc<KeepaliveMonitor>,
}

impl Relay {
    /// Build a relay with explicit keepalive timing.
    pub fn new(keepalive: KeepaliveConfig, max_dropped_frames: u64) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        Self {
            dispatcher: Dispatcher::new(Arc::clone(&registry), max_dropped_frames),
            keepalive: Arc::new(KeepaliveMonitor::new(Arc::clone(&registry), keepalive)),
            registry,
        }
    }

    /// Build a relay from loaded settings.
    pub fn from_settings(settings: &RelaySettings) -> Self {
        Self::new(
            KeepaliveConfig::from_settings(&settings.keepalive),
            settings.server.max_dropped_frames,
        )
    }

    /// Connection registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Keepalive monitor.
    pub fn keepalive(&self) -> &Arc<KeepaliveMonitor> {
        &self.keepalive
    }

    /// A consumer channel was accepted.
    pub fn on_consumer_connect(&self, channel: Arc<dyn ConsumerChannel>, remote_addr: SocketAddr) -> ConnectionId {
        let id = self.registry.register(channel, remote_addr);
        counter!(WS_CONNECTIONS_TOTAL).increment(1);
        info!(conn_id = %id, %remote_addr, "consumer connected");
        id
    }

    /// A consumer sent a message.
    ///
    /// Any message counts as a liveness signal. A valid binding request
    /// binds (or rebinds) the connection and returns the new id.
    pub fn on_consumer_message(&self, id: &ConnectionId, raw: &str) -> Option<CorrelationId> {
        if !self.registry.touch(id) {
            return None;
        }
        let message = match ConsumerMessage::parse(raw) {
            Ok(message) => message,
            Err(e) => {
                warn!(conn_id = %id, error = %e, "ignoring consumer message");
                return None;
            }
        };
        if !self.registry.bind(id, message.correlation_id.clone()) {
            return None;
        }
        counter!(BINDINGS_TOTAL).increment(1);
        info!(conn_id = %id, correlation_id = %message.correlation_id, "consumer bound");
        Some(message.correlation_id)
    }

    /// The consumer's transport closed.
    pub fn on_consumer_disconnect(&self, id: &ConnectionId) {
        if self.registry.remove(id) {
            counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
            info!(conn_id = %id, "consumer disconnected");
        }
    }

    /// The transport acknowledged a heartbeat.
    pub fn on_consumer_liveness_ack(&self, id: &ConnectionId) {
        if self.registry.touch(id) {
            debug!(conn_id = %id, "liveness ack");
        }
    }

    /// A producer submitted an item.
    pub fn on_producer_item(&self, raw: Value) -> DeliveryReport {
        counter!(ITEMS_RECEIVED_TOTAL).increment(1);
        let item = match Item::from_value(raw) {
            Ok(item) => item,
            Err(e) => {
                counter!(ITEMS_REJECTED_TOTAL).increment(1);
                warn!(error = %e, "rejecting producer item");
                return DeliveryReport { delivered: 0 };
            }
        };
        let delivered = self.dispatcher.dispatch(&item);
        info!(correlation_id = %item.correlation_id, delivered, "item relayed");
        DeliveryReport { delivered }
    }

    /// Close and deregister every consumer. Returns how many were closed.
    pub fn close_all(&self) -> usize {
        let closed = self.registry.drain();
        if closed > 0 {
            info!(count = closed, "closed all consumer connections");
        }
        closed
    }
}
