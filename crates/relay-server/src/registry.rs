//! Live consumer connections and their correlation bindings.
//!
//! One `RwLock` guards both the connection table and the
//! correlation → connections index, so every operation observes a
//! connection either fully registered or fully removed. Callers get
//! snapshots; nothing hands out a reference into the table.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use metrics::gauge;
use parking_lot::RwLock;
use relay_core::{ConnectionId, CorrelationId};
use tokio::time::Instant;

use crate::channel::ConsumerChannel;
use crate::metrics::WS_CONNECTIONS_ACTIVE;

/// Heartbeat state of a registered connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessState {
    /// A liveness signal was seen since the last heartbeat.
    Active,
    /// A heartbeat was sent and no signal has come back yet.
    AwaitingAck,
}

/// A connection id paired with its channel, detached from the registry.
#[derive(Clone)]
pub struct ConnectionHandle {
    /// Registry key.
    pub id: ConnectionId,
    /// Outbound channel.
    pub channel: Arc<dyn ConsumerChannel>,
}

struct ConnectionRecord {
    channel: Arc<dyn ConsumerChannel>,
    remote_addr: SocketAddr,
    correlation_id: Option<CorrelationId>,
    last_activity_at: Instant,
    liveness: LivenessState,
    dropped_frames: u64,
}

#[derive(Default)]
struct RegistryInner {
    connections: HashMap<ConnectionId, ConnectionRecord>,
    by_correlation: HashMap<CorrelationId, HashSet<ConnectionId>>,
}

impl RegistryInner {
    fn unindex(&mut self, correlation_id: &CorrelationId, id: &ConnectionId) {
        if let Some(ids) = self.by_correlation.get_mut(correlation_id) {
            let _ = ids.remove(id);
            if ids.is_empty() {
                let _ = self.by_correlation.remove(correlation_id);
            }
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn publish_gauge(&self) {
        gauge!(WS_CONNECTIONS_ACTIVE).set(self.connections.len() as f64);
    }
}

/// Registry of live consumer connections.
#[derive(Default)]
pub struct ConnectionRegistry {
    inner: RwLock<RegistryInner>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a new, unbound connection.
    pub fn register(&self, channel: Arc<dyn ConsumerChannel>, remote_addr: SocketAddr) -> ConnectionId {
        let id = ConnectionId::new();
        let record = ConnectionRecord {
            channel,
            remote_addr,
            correlation_id: None,
            last_activity_at: Instant::now(),
            liveness: LivenessState::Active,
            dropped_frames: 0,
        };
        let mut inner = self.inner.write();
        let _ = inner.connections.insert(id.clone(), record);
        inner.publish_gauge();
        id
    }

    /// Bind (or rebind) a connection to a correlation id.
    ///
    /// Returns `false` if the connection is no longer registered.
    pub fn bind(&self, id: &ConnectionId, correlation_id: CorrelationId) -> bool {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        let Some(record) = inner.connections.get_mut(id) else {
            return false;
        };
        if let Some(previous) = record.correlation_id.replace(correlation_id.clone()) {
            if previous == correlation_id {
                return true;
            }
            inner.unindex(&previous, id);
        }
        let _ = inner
            .by_correlation
            .entry(correlation_id)
            .or_default()
            .insert(id.clone());
        true
    }

    /// Connections currently bound to `correlation_id`.
    pub fn lookup(&self, correlation_id: &CorrelationId) -> Vec<ConnectionHandle> {
        let inner = self.inner.read();
        let Some(ids) = inner.by_correlation.get(correlation_id) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| {
                inner.connections.get(id).map(|record| ConnectionHandle {
                    id: id.clone(),
                    channel: Arc::clone(&record.channel),
                })
            })
            .collect()
    }

    /// Every registered connection.
    pub fn snapshot(&self) -> Vec<ConnectionHandle> {
        let inner = self.inner.read();
        inner
            .connections
            .iter()
            .map(|(id, record)| ConnectionHandle {
                id: id.clone(),
                channel: Arc::clone(&record.channel),
            })
            .collect()
    }

    /// Record a liveness signal.
    ///
    /// Returns `false` if the connection is no longer registered.
    pub fn touch(&self, id: &ConnectionId) -> bool {
        let mut inner = self.inner.write();
        match inner.connections.get_mut(id) {
            Some(record) => {
                record.last_activity_at = Instant::now();
                record.liveness = LivenessState::Active;
                true
            }
            None => false,
        }
    }

    /// Note that a heartbeat went out and an ack is now expected.
    pub fn mark_heartbeat_sent(&self, id: &ConnectionId) -> bool {
        let mut inner = self.inner.write();
        match inner.connections.get_mut(id) {
            Some(record) => {
                record.liveness = LivenessState::AwaitingAck;
                true
            }
            None => false,
        }
    }

    /// Deregister a connection and close its channel.
    ///
    /// Returns `true` only for the call that actually removed it.
    pub fn remove(&self, id: &ConnectionId) -> bool {
        let mut inner = self.inner.write();
        let Some(record) = inner.connections.remove(id) else {
            return false;
        };
        if let Some(correlation_id) = &record.correlation_id {
            inner.unindex(correlation_id, id);
        }
        record.channel.close();
        inner.publish_gauge();
        true
    }

    /// Remove a connection only if it is still stale at `now`.
    ///
    /// Re-checks under the write lock so a signal that arrived after
    /// [`all_stale`](Self::all_stale) keeps the connection alive.
    pub fn remove_if_stale(&self, id: &ConnectionId, now: Instant, timeout: Duration) -> Option<SocketAddr> {
        let mut inner = self.inner.write();
        let stale = inner
            .connections
            .get(id)
            .is_some_and(|record| now.saturating_duration_since(record.last_activity_at) > timeout);
        if !stale {
            return None;
        }
        let record = inner.connections.remove(id)?;
        if let Some(correlation_id) = &record.correlation_id {
            inner.unindex(correlation_id, id);
        }
        record.channel.close();
        inner.publish_gauge();
        Some(record.remote_addr)
    }

    /// Remove and close every connection. Returns how many were removed.
    pub fn drain(&self) -> usize {
        let mut inner = self.inner.write();
        let drained = inner.connections.len();
        for record in inner.connections.values() {
            record.channel.close();
        }
        inner.connections.clear();
        inner.by_correlation.clear();
        inner.publish_gauge();
        drained
    }

    /// Connections whose last liveness signal is older than `timeout`.
    pub fn all_stale(&self, now: Instant, timeout: Duration) -> Vec<ConnectionId> {
        let inner = self.inner.read();
        inner
            .connections
            .iter()
            .filter(|(_, record)| now.saturating_duration_since(record.last_activity_at) > timeout)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Count a dropped frame; returns the connection's running total.
    pub fn record_drop(&self, id: &ConnectionId) -> Option<u64> {
        let mut inner = self.inner.write();
        inner.connections.get_mut(id).map(|record| {
            record.dropped_frames += 1;
            record.dropped_frames
        })
    }

    /// Current binding of a connection.
    pub fn correlation_id(&self, id: &ConnectionId) -> Option<CorrelationId> {
        self.inner
            .read()
            .connections
            .get(id)
            .and_then(|record| record.correlation_id.clone())
    }

    /// Peer address of a connection.
    pub fn remote_addr(&self, id: &ConnectionId) -> Option<SocketAddr> {
        self.inner.read().connections.get(id).map(|record| record.remote_addr)
    }

    /// Heartbeat state of a connection.
    pub fn liveness(&self, id: &ConnectionId) -> Option<LivenessState> {
        self.inner.read().connections.get(id).map(|record| record.liveness)
    }

    /// Whether the connection is registered.
    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.inner.read().connections.contains_key(id)
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.inner.read().connections.len()
    }

    /// Whether no connections are registered.
    pub fn is_empty(&self) -> bool {
        self.inner.read().connections.is_empty()
    }

    /// Number of connections with a correlation binding.
    pub fn bound_count(&self) -> usize {
        self.inner.read().by_correlation.values().map(HashSet::len).sum()
    }
}
