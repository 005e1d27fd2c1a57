//! Heartbeat emission and stale-connection eviction.
//!
//! Two independent loops share the registry:
//!
//! - **heartbeat**: every `heartbeat_interval`, queue a ping on each open
//!   channel and move it to `AwaitingAck`. Channels found closed are
//!   removed. A failed ping is not retried; the sweep settles it.
//! - **sweep**: every `sweep_interval`, evict each connection whose last
//!   liveness signal is older than `inactivity_timeout`.
//!
//! A half-open socket that never answers is reclaimed by the sweep even
//! though the transport has not reported it closed.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use relay_core::ConnectionId;
use relay_settings::KeepaliveSettings;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::metrics::{HEARTBEATS_SENT_TOTAL, WS_EVICTIONS_TOTAL};
use crate::registry::ConnectionRegistry;

/// Keepalive timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepaliveConfig {
    /// Interval between heartbeat pings.
    pub heartbeat_interval: Duration,
    /// Silence after which a connection is evicted.
    pub inactivity_timeout: Duration,
    /// Interval between eviction sweeps.
    pub sweep_interval: Duration,
}

impl KeepaliveConfig {
    /// Convert millisecond settings into durations.
    pub fn from_settings(settings: &KeepaliveSettings) -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(settings.heartbeat_interval_ms),
            inactivity_timeout: Duration::from_millis(settings.inactivity_timeout_ms),
            sweep_interval: Duration::from_millis(settings.sweep_interval_ms),
        }
    }
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self::from_settings(&KeepaliveSettings::default())
    }
}

/// Owns the heartbeat and sweep schedules for a registry.
pub struct KeepaliveMonitor {
    registry: Arc<ConnectionRegistry>,
    config: KeepaliveConfig,
}

impl KeepaliveMonitor {
    /// Create a monitor over `registry`.
    pub fn new(registry: Arc<ConnectionRegistry>, config: KeepaliveConfig) -> Self {
        Self { registry, config }
    }

    /// Active timing.
    pub fn config(&self) -> KeepaliveConfig {
        self.config
    }

    /// Ping every open channel once. Returns the number of pings queued.
    pub fn heartbeat_once(&self) -> usize {
        let mut sent = 0;
        for handle in self.registry.snapshot() {
            if !handle.channel.is_open() {
                // Already closing; stop monitoring it.
                let _ = self.registry.remove(&handle.id);
                continue;
            }
            match handle.channel.ping() {
                Ok(()) => {
                    let _ = self.registry.mark_heartbeat_sent(&handle.id);
                    sent += 1;
                }
                Err(e) => debug!(conn_id = %handle.id, error = %e, "heartbeat ping not queued"),
            }
        }
        if sent > 0 {
            counter!(HEARTBEATS_SENT_TOTAL).increment(sent as u64);
        }
        sent
    }

    /// Evict every connection stale at `now`. Returns the evicted ids.
    pub fn sweep_once(&self, now: Instant) -> Vec<ConnectionId> {
        let timeout = self.config.inactivity_timeout;
        let mut evicted = Vec::new();
        for id in self.registry.all_stale(now, timeout) {
            if let Some(remote_addr) = self.registry.remove_if_stale(&id, now, timeout) {
                info!(conn_id = %id, %remote_addr, "closing inactive connection");
                counter!(WS_EVICTIONS_TOTAL, "reason" => "inactive").increment(1);
                evicted.push(id);
            }
        }
        evicted
    }

    /// Run the heartbeat loop until `cancel` fires.
    pub async fn run_heartbeat(self: Arc<Self>, cancel: CancellationToken) {
        let period = self.config.heartbeat_interval;
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let _ = self.heartbeat_once();
                }
                () = cancel.cancelled() => break,
            }
        }
        debug!("heartbeat loop stopped");
    }

    /// Run the sweep loop until `cancel` fires.
    pub async fn run_sweep(self: Arc<Self>, cancel: CancellationToken) {
        let period = self.config.sweep_interval;
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let evicted = self.sweep_once(Instant::now());
                    if !evicted.is_empty() {
                        debug!(count = evicted.len(), "sweep evicted connections");
                    }
                }
                () = cancel.cancelled() => break,
            }
        }
        debug!("sweep loop stopped");
    }

    /// Spawn both loops.
    pub fn spawn(self: &Arc<Self>, cancel: &CancellationToken) -> Vec<JoinHandle<()>> {
        vec![
            tokio::spawn(Arc::clone(self).run_heartbeat(cancel.clone())),
            tokio::spawn(Arc::clone(self).run_sweep(cancel.clone())),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ConsumerChannel, Outbound, SocketChannel};
    use crate::registry::LivenessState;
    use std::net::SocketAddr;
    use tokio::sync::mpsc;

    fn addr() -> SocketAddr {
        "10.0.0.5:5000".parse().unwrap()
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    fn config() -> KeepaliveConfig {
        KeepaliveConfig {
            heartbeat_interval: Duration::from_secs(30),
            inactivity_timeout: Duration::from_secs(120),
            sweep_interval: Duration::from_secs(60),
        }
    }

    fn setup() -> (Arc<ConnectionRegistry>, Arc<KeepaliveMonitor>) {
        let registry = Arc::new(ConnectionRegistry::new());
        let monitor = Arc::new(KeepaliveMonitor::new(Arc::clone(&registry), config()));
        (registry, monitor)
    }

    fn connect(registry: &ConnectionRegistry) -> (ConnectionId, Arc<SocketChannel>, mpsc::Receiver<Outbound>) {
        let (ch, rx) = SocketChannel::new(4);
        let id = registry.register(ch.clone(), addr());
        (id, ch, rx)
    }

    #[test]
    fn config_from_default_settings() {
        let cfg = KeepaliveConfig::default();
        assert_eq!(cfg.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(cfg.inactivity_timeout, Duration::from_secs(120));
        assert_eq!(cfg.sweep_interval, Duration::from_secs(60));
    }

    #[tokio::test]
    async fn heartbeat_pings_open_channels() {
        let (registry, monitor) = setup();
        let (id, _ch, mut rx) = connect(&registry);

        assert_eq!(monitor.heartbeat_once(), 1);
        assert_eq!(rx.recv().await.unwrap(), Outbound::Ping);
        assert_eq!(registry.liveness(&id), Some(LivenessState::AwaitingAck));
    }

    #[test]
    fn heartbeat_removes_closed_channels() {
        let (registry, monitor) = setup();
        let (id, _ch, rx) = connect(&registry);
        drop(rx);

        assert_eq!(monitor.heartbeat_once(), 0);
        assert!(!registry.contains(&id));
    }

    #[test]
    fn heartbeat_failure_is_left_for_sweep() {
        let (registry, monitor) = setup();
        let (ch, _rx) = SocketChannel::new(1);
        let id = registry.register(ch.clone(), addr());
        ch.send(Arc::new("fill".into())).unwrap();

        assert_eq!(monitor.heartbeat_once(), 0);
        assert!(registry.contains(&id));
        assert_eq!(registry.liveness(&id), Some(LivenessState::Active));
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_evicts_silent_connection() {
        let (registry, monitor) = setup();
        let (id, ch, _rx) = connect(&registry);
        assert!(registry.bind(&id, relay_core::CorrelationId::parse("job-1").unwrap()));

        time::advance(Duration::from_secs(121)).await;
        let evicted = monitor.sweep_once(Instant::now());

        assert_eq!(evicted, vec![id]);
        assert!(!ch.is_open());
        assert!(registry.lookup(&relay_core::CorrelationId::parse("job-1").unwrap()).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_spares_recent_activity() {
        let (registry, monitor) = setup();
        let (id, ch, _rx) = connect(&registry);

        time::advance(Duration::from_secs(100)).await;
        assert!(registry.touch(&id));
        time::advance(Duration::from_secs(100)).await;

        assert!(monitor.sweep_once(Instant::now()).is_empty());
        assert!(ch.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn exactly_at_timeout_is_not_stale() {
        let (registry, monitor) = setup();
        let (_id, _ch, _rx) = connect(&registry);
        time::advance(Duration::from_secs(120)).await;
        assert!(monitor.sweep_once(Instant::now()).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn loops_evict_unresponsive_peer() {
        let (registry, monitor) = setup();
        let (id, _ch, mut rx) = connect(&registry);
        let cancel = CancellationToken::new();
        let handles = monitor.spawn(&cancel);

        // Pings keep arriving; the peer never acks.
        for _ in 0..4 {
            time::advance(Duration::from_secs(30)).await;
            settle().await;
            if let Ok(frame) = rx.try_recv() {
                assert_eq!(frame, Outbound::Ping);
            }
        }
        // First sweep after 120s of silence is at t=180s.
        time::advance(Duration::from_secs(60)).await;
        settle().await;
        assert!(!registry.contains(&id));

        cancel.cancel();
        for h in handles {
            h.await.unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn acked_peer_survives_loops() {
        let (registry, monitor) = setup();
        let (id, _ch, mut rx) = connect(&registry);
        let cancel = CancellationToken::new();
        let handles = monitor.spawn(&cancel);

        for _ in 0..12 {
            time::advance(Duration::from_secs(30)).await;
            settle().await;
            while rx.try_recv().is_ok() {
                assert!(registry.touch(&id));
            }
        }
        assert!(registry.contains(&id));

        cancel.cancel();
        for h in handles {
            h.await.unwrap();
        }
    }

    #[tokio::test]
    async fn loops_stop_on_cancel() {
        let (_registry, monitor) = setup();
        let cancel = CancellationToken::new();
        let handles = monitor.spawn(&cancel);
        cancel.cancel();
        for h in handles {
            tokio::time::timeout(Duration::from_secs(1), h).await.unwrap().unwrap();
        }
    }
}
