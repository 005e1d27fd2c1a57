//! Targeted fan-out of producer items.

use std::sync::Arc;

use metrics::counter;
use relay_core::Item;
use tracing::{debug, warn};

use crate::channel::SendError;
use crate::metrics::{ITEM_DELIVERIES_TOTAL, WS_EVICTIONS_TOTAL, WS_SEND_FAILURES_TOTAL};
use crate::registry::ConnectionRegistry;

/// Delivers each item to the connections bound to its correlation id.
pub struct Dispatcher {
    registry: Arc<ConnectionRegistry>,
    max_dropped_frames: u64,
}

impl Dispatcher {
    /// Create a dispatcher. A consumer whose dropped frames reach
    /// `max_dropped_frames` is evicted as too slow.
    pub fn new(registry: Arc<ConnectionRegistry>, max_dropped_frames: u64) -> Self {
        Self {
            registry,
            max_dropped_frames: max_dropped_frames.max(1),
        }
    }

    /// Send `item` to every matching consumer. Returns the delivery count.
    ///
    /// Every match is attempted before returning. Closed channels are
    /// skipped and released; a full queue counts as a dropped frame.
    pub fn dispatch(&self, item: &Item) -> usize {
        let targets = self.registry.lookup(&item.correlation_id);
        if targets.is_empty() {
            debug!(correlation_id = %item.correlation_id, "no consumers bound");
            return 0;
        }

        let frame = match item.to_frame() {
            Ok(frame) => Arc::new(frame),
            Err(e) => {
                warn!(correlation_id = %item.correlation_id, error = %e, "failed to serialize item");
                return 0;
            }
        };

        let mut delivered = 0;
        for target in targets {
            if !target.channel.is_open() {
                let _ = self.registry.remove(&target.id);
                continue;
            }
            match target.channel.send(Arc::clone(&frame)) {
                Ok(()) => delivered += 1,
                Err(SendError::Closed) => {
                    counter!(WS_SEND_FAILURES_TOTAL, "reason" => "closed").increment(1);
                    let _ = self.registry.remove(&target.id);
                }
                Err(SendError::Full) => {
                    counter!(WS_SEND_FAILURES_TOTAL, "reason" => "full").increment(1);
                    let drops = self.registry.record_drop(&target.id).unwrap_or(0);
                    if drops >= self.max_dropped_frames && self.registry.remove(&target.id) {
                        warn!(conn_id = %target.id, drops, "evicting slow consumer");
                        counter!(WS_EVICTIONS_TOTAL, "reason" => "slow").increment(1);
                    }
                }
            }
        }

        if delivered > 0 {
            counter!(ITEM_DELIVERIES_TOTAL).increment(delivered as u64);
        }
        debug!(correlation_id = %item.correlation_id, delivered, "item dispatched");
        delivered
    }
}
