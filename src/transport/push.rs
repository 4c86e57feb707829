//! Dialing side of a push/pull pair.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::writer::{writer_loop, OutboundFrame};
use super::{connect, Endpoint, FrameSink};
use crate::error::{RelayError, Result};
use crate::protocol::PROTO_PUSH;

/// Default outbound queue depth.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Default time a send may wait for queue space.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Default ceiling for the redial backoff.
pub const DEFAULT_MAX_REDIAL_BACKOFF: Duration = Duration::from_secs(30);

/// Push socket configuration.
#[derive(Debug, Clone)]
pub struct PushConfig {
    /// Frames that may be queued ahead of the writer task.
    pub queue_capacity: usize,
    /// Time a send may wait for queue space before failing.
    pub send_timeout: Duration,
    /// Ceiling for the redial backoff after the peer drops.
    pub max_redial_backoff: Duration,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            send_timeout: DEFAULT_SEND_TIMEOUT,
            max_redial_backoff: DEFAULT_MAX_REDIAL_BACKOFF,
        }
    }
}

impl PushConfig {
    /// Override the send timeout.
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Override the queue capacity.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }
}

/// A connected push socket.
///
/// The initial dial is synchronous: [`PushSocket::dial`] fails if nothing is
/// listening. Afterwards the writer task owns the connection and redials on
/// its own.
pub struct PushSocket {
    endpoint: Endpoint,
    tx: mpsc::Sender<OutboundFrame>,
    send_timeout: Duration,
    closed: AtomicBool,
    shutdown: CancellationToken,
}

impl PushSocket {
    /// Connect to a pull socket listening at `endpoint`.
    pub async fn dial(endpoint: &Endpoint, config: PushConfig) -> Result<Self> {
        let stream = connect(endpoint, PROTO_PUSH).await?;

        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let shutdown = CancellationToken::new();

        tokio::spawn(writer_loop(
            rx,
            stream,
            endpoint.clone(),
            config.max_redial_backoff,
            shutdown.clone(),
        ));

        tracing::debug!(endpoint = %endpoint, "push socket connected");

        Ok(Self {
            endpoint: endpoint.clone(),
            tx,
            send_timeout: config.send_timeout,
            closed: AtomicBool::new(false),
            shutdown,
        })
    }

    /// Queue a frame for the peer.
    ///
    /// # Errors
    ///
    /// - [`RelayError::Closed`] after [`close`](Self::close)
    /// - [`RelayError::SendTimeout`] if the queue stays full for the send timeout
    pub async fn send(&self, frame: Bytes) -> Result<()> {
        if self.is_closed() {
            return Err(RelayError::Closed);
        }

        match tokio::time::timeout(self.send_timeout, self.tx.send(OutboundFrame::new(frame)))
            .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(RelayError::Closed),
            Err(_) => Err(RelayError::SendTimeout),
        }
    }

    /// Stop the writer task and drop the connection.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(RelayError::AlreadyClosed);
        }
        self.shutdown.cancel();
        Ok(())
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Address this socket dials.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}

impl Drop for PushSocket {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for PushSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushSocket")
            .field("endpoint", &self.endpoint)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl FrameSink for PushSocket {
    fn send(&self, frame: Bytes) -> impl std::future::Future<Output = Result<()>> + Send {
        PushSocket::send(self, frame)
    }

    fn close(&self) -> Result<()> {
        PushSocket::close(self)
    }
}
