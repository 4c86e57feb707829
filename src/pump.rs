//! Pump layer - the three pipeline stages between sockets and messages.
//!
//! ```text
//! FrameSource ─► read_pump ─► mpsc<Bytes> ─► parse_pump ─► mpsc<Message> ─► ...
//! ... ─► mpsc<Message> ─► write_pump ─► FrameSink
//! ```
//!
//! Each pump is one tokio task. Every suspension point (socket receive, queue
//! push, queue pop, socket send) is raced against the stop token, with stop
//! taking priority. Pumps that own a socket close it exactly once on exit.

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{RelayError, Result};
use crate::message::Message;
use crate::transport::{FrameSink, FrameSource};

/// Capacity of the queues between pumps.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Push `item` onto `queue`, giving up if `stop` fires first.
///
/// A full queue blocks (backpressure) until space frees up or `stop` fires.
///
/// # Errors
///
/// - [`RelayError::Cancelled`] if `stop` fired first
/// - [`RelayError::Closed`] if the receiving side is gone
pub async fn enqueue<T>(queue: &mpsc::Sender<T>, item: T, stop: &CancellationToken) -> Result<()> {
    tokio::select! {
        biased;
        _ = stop.cancelled() => Err(RelayError::Cancelled),
        r = queue.send(item) => r.map_err(|_| RelayError::Closed),
    }
}

/// Move raw frames from `socket` to `out` until stopped or the socket fails.
///
/// A receive error is fatal for this socket: it is logged and the pump exits.
/// The socket is closed on exit either way.
pub async fn read_pump<S: FrameSource>(
    mut socket: S,
    out: mpsc::Sender<Bytes>,
    stop: CancellationToken,
) {
    tracing::debug!("read pump started");

    loop {
        let frame = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            r = socket.recv() => match r {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::error!("Read pump receive error: {}", e);
                    break;
                }
            },
        };

        if enqueue(&out, frame, &stop).await.is_err() {
            break;
        }
    }

    if let Err(e) = socket.close() {
        tracing::debug!("read pump socket close: {}", e);
    }
    tracing::debug!("read pump stopped");
}

/// Decode frames from `input` and push the messages onto `out`.
///
/// Undecodable frames are logged and dropped; the loop keeps going.
pub async fn parse_pump(
    mut input: mpsc::Receiver<Bytes>,
    out: mpsc::Sender<Message>,
    stop: CancellationToken,
) {
    tracing::debug!("parse pump started");

    loop {
        let frame = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            frame = input.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        let msg = match Message::decode(&frame) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!(len = frame.len(), "dropping undecodable frame: {}", e);
                continue;
            }
        };

        if enqueue(&out, msg, &stop).await.is_err() {
            break;
        }
    }

    tracing::debug!("parse pump stopped");
}

/// Encode messages from `input` and send them on `socket`.
///
/// Encode and send failures drop that one message. The socket is closed on
/// exit.
pub async fn write_pump<S: FrameSink>(
    mut input: mpsc::Receiver<Message>,
    socket: S,
    stop: CancellationToken,
) {
    tracing::debug!("write pump started");

    loop {
        let msg = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            msg = input.recv() => match msg {
                Some(msg) => msg,
                None => break,
            },
        };

        let bytes = match msg.encode() {
            Ok(bytes) => Bytes::from(bytes),
            Err(e) => {
                tracing::warn!(
                    transaction_uuid = %msg.transaction_uuid,
                    "dropping unencodable message: {}",
                    e
                );
                continue;
            }
        };

        let sent = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            r = socket.send(bytes) => r,
        };

        if let Err(e) = sent {
            tracing::warn!(
                msg_type = %msg.msg_type,
                transaction_uuid = %msg.transaction_uuid,
                "failed to send message: {}",
                e
            );
        }
    }

    if let Err(e) = socket.close() {
        tracing::debug!("write pump socket close: {}", e);
    }
    tracing::debug!("write pump stopped");
}
