//! Consumer `WebSocket` endpoint.
//!
//! Each socket is split into a writer task, which drains the connection's
//! outbound queue, and a reader loop, which feeds inbound frames to the
//! relay. Closing the channel (eviction, shutdown, or a failed send) ends
//! both halves.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::IntoResponse;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::channel::{Outbound, SocketChannel};
use crate::relay::Relay;
use crate::server::AppState;
use relay_core::ConnectionId;

/// How long the writer gets to flush a close frame.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Per-socket limits.
#[derive(Debug, Clone, Copy)]
pub struct SocketConfig {
    /// Largest inbound message accepted.
    pub max_message_size: usize,
    /// Outbound frames buffered before sends fail with `Full`.
    pub send_queue_capacity: usize,
}

/// `GET /` and `GET /ws`.
pub async fn upgrade(
    ws: WebSocketUpgrade,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let socket_config = state.socket;
    ws.max_message_size(socket_config.max_message_size)
        .on_upgrade(move |socket| serve_socket(socket, remote_addr, state.relay, socket_config))
}

/// Drive one consumer socket until it closes.
pub async fn serve_socket(socket: WebSocket, remote_addr: SocketAddr, relay: Arc<Relay>, config: SocketConfig) {
    let (channel, outbound) = SocketChannel::new(config.send_queue_capacity);
    let closed = channel.closed_token();
    let conn_id = relay.on_consumer_connect(channel, remote_addr);

    let (sink, stream) = socket.split();
    let mut writer = tokio::spawn(write_loop(sink, outbound, closed.clone(), conn_id.clone()));

    read_loop(stream, &relay, &conn_id, &closed).await;
    relay.on_consumer_disconnect(&conn_id);

    if tokio::time::timeout(CLOSE_TIMEOUT, &mut writer).await.is_err() {
        writer.abort();
    }
    debug!(conn_id = %conn_id, "socket closed");
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Outbound>,
    closed: CancellationToken,
    conn_id: ConnectionId,
) {
    loop {
        let frame = tokio::select! {
            () = closed.cancelled() => break,
            frame = outbound.recv() => frame,
        };
        let message = match frame {
            Some(Outbound::Text(text)) => Message::Text(text.as_str().into()),
            Some(Outbound::Ping) => Message::Ping(Bytes::new()),
            None => break,
        };
        if sink.send(message).await.is_err() {
            debug!(conn_id = %conn_id, "socket write failed");
            closed.cancel();
            return;
        }
    }
    let _ = tokio::time::timeout(CLOSE_TIMEOUT, sink.send(Message::Close(None))).await;
    let _ = sink.close().await;
}

async fn read_loop(
    mut stream: SplitStream<WebSocket>,
    relay: &Relay,
    conn_id: &ConnectionId,
    closed: &CancellationToken,
) {
    loop {
        let next = tokio::select! {
            () = closed.cancelled() => break,
            next = stream.next() => next,
        };
        match next {
            Some(Ok(Message::Text(text))) => {
                let _ = relay.on_consumer_message(conn_id, text.as_str());
            }
            Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                Ok(text) => {
                    let _ = relay.on_consumer_message(conn_id, text);
                }
                Err(_) => relay.on_consumer_liveness_ack(conn_id),
            },
            Some(Ok(Message::Pong(_) | Message::Ping(_))) => {
                trace!(conn_id = %conn_id, "liveness frame");
                relay.on_consumer_liveness_ack(conn_id);
            }
            Some(Ok(Message::Close(_))) | None => break,
            Some(Err(e)) => {
                debug!(conn_id = %conn_id, error = %e, "socket read failed");
                break;
            }
        }
    }
}
