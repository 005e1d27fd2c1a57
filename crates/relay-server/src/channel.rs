//! Outbound half of a consumer connection.
//!
//! The relay never writes to a socket directly. Frames are pushed onto a
//! bounded queue that the connection's writer task drains; a full queue
//! fails the send immediately instead of waiting.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

/// Why a frame could not be queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SendError {
    /// The consumer is not draining its queue fast enough.
    #[error("send queue full")]
    Full,
    /// The channel has been closed.
    #[error("channel closed")]
    Closed,
}

/// Bidirectional message channel as seen by the relay core.
pub trait ConsumerChannel: Send + Sync {
    /// Queue a text frame without blocking.
    fn send(&self, frame: Arc<String>) -> Result<(), SendError>;
    /// Queue a transport-level liveness ping without blocking.
    fn ping(&self) -> Result<(), SendError>;
    /// Close the channel. Idempotent.
    fn close(&self);
    /// Whether frames can still be queued.
    fn is_open(&self) -> bool;
}

/// A frame waiting for the socket writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// JSON text frame.
    Text(Arc<String>),
    /// `WebSocket` ping.
    Ping,
}

/// [`ConsumerChannel`] backed by an mpsc queue and a cancellation token.
pub struct SocketChannel {
    tx: mpsc::Sender<Outbound>,
    closed: CancellationToken,
}

impl SocketChannel {
    /// Create a channel with room for `capacity` queued frames.
    ///
    /// The receiver belongs to the socket writer task.
    pub fn new(capacity: usize) -> (Arc<Self>, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let channel = Arc::new(Self {
            tx,
            closed: CancellationToken::new(),
        });
        (channel, rx)
    }

    /// Token cancelled when the channel is closed.
    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    fn push(&self, frame: Outbound) -> Result<(), SendError> {
        if self.closed.is_cancelled() {
            return Err(SendError::Closed);
        }
        self.tx.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => SendError::Full,
            TrySendError::Closed(_) => SendError::Closed,
        })
    }
}

impl ConsumerChannel for SocketChannel {
    fn send(&self, frame: Arc<String>) -> Result<(), SendError> {
        self.push(Outbound::Text(frame))
    }

    fn ping(&self) -> Result<(), SendError> {
        self.push(Outbound::Ping)
    }

    fn close(&self) {
        self.closed.cancel();
    }

    fn is_open(&self) -> bool {
        !self.closed.is_cancelled() && !self.tx.is_closed()
    }
}
