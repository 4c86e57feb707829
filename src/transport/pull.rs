//! Listening side of a push/pull pair.
//!
//! Every accepted connection gets its own reader task which splits the byte
//! stream into frames and feeds one shared bounded queue. `recv` drains that
//! queue, so frames from different peers interleave in arrival order.

use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{handshake, Endpoint, FrameSource};
use crate::error::{RelayError, Result};
use crate::protocol::{FrameBuffer, DEFAULT_MAX_FRAME_SIZE, PROTO_PULL};

/// Read buffer size per connection.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Pause after a failed accept so a full fd table does not spin the loop.
const ACCEPT_ERROR_DELAY: Duration = Duration::from_millis(100);

/// Pull socket configuration.
#[derive(Debug, Clone)]
pub struct PullConfig {
    /// Frames buffered between the reader tasks and `recv`.
    pub backlog: usize,
    /// Largest frame a peer may send before it is disconnected.
    pub max_frame_size: u64,
}

impl Default for PullConfig {
    fn default() -> Self {
        Self {
            backlog: 100,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl PullConfig {
    /// Override the backlog.
    pub fn with_backlog(mut self, backlog: usize) -> Self {
        self.backlog = backlog.max(1);
        self
    }
}

/// A listening pull socket.
pub struct PullSocket {
    local_addr: SocketAddr,
    rx: mpsc::Receiver<Bytes>,
    shutdown: CancellationToken,
    closed: bool,
}

impl PullSocket {
    /// Bind `endpoint` and start accepting pushers.
    ///
    /// Port 0 binds an ephemeral port; see [`local_addr`](Self::local_addr).
    pub async fn listen(endpoint: &Endpoint, config: PullConfig) -> Result<Self> {
        let listener = TcpListener::bind(endpoint.bind_addr()).await?;
        let local_addr = listener.local_addr()?;

        let (tx, rx) = mpsc::channel(config.backlog.max(1));
        let shutdown = CancellationToken::new();

        tokio::spawn(accept_loop(
            listener,
            tx,
            config.max_frame_size,
            shutdown.clone(),
        ));

        tracing::debug!(%local_addr, "pull socket listening");

        Ok(Self {
            local_addr,
            rx,
            shutdown,
            closed: false,
        })
    }

    /// Address actually bound.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait for the next frame from any connected pusher.
    ///
    /// Returns [`RelayError::Closed`] once the socket is closed.
    pub async fn recv(&mut self) -> Result<Bytes> {
        if self.closed {
            return Err(RelayError::Closed);
        }

        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(RelayError::Closed),
            frame = self.rx.recv() => frame.ok_or(RelayError::Closed),
        }
    }

    /// Stop listening and drop every connection.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Err(RelayError::AlreadyClosed);
        }
        self.closed = true;
        self.shutdown.cancel();
        self.rx.close();
        Ok(())
    }

    /// A token that fires when this socket is closed.
    pub fn closed_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}

impl Drop for PullSocket {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for PullSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PullSocket")
            .field("local_addr", &self.local_addr)
            .field("closed", &self.closed)
            .finish()
    }
}

impl FrameSource for PullSocket {
    fn recv(&mut self) -> impl std::future::Future<Output = Result<Bytes>> + Send {
        PullSocket::recv(self)
    }

    fn close(&mut self) -> Result<()> {
        PullSocket::close(self)
    }
}

async fn accept_loop(
    listener: TcpListener,
    tx: mpsc::Sender<Bytes>,
    max_frame_size: u64,
    shutdown: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            r = listener.accept() => r,
        };

        match accepted {
            Ok((stream, peer)) => {
                tokio::spawn(read_connection(
                    stream,
                    peer,
                    tx.clone(),
                    max_frame_size,
                    shutdown.clone(),
                ));
            }
            Err(e) => {
                tracing::warn!("accept failed: {}", e);
                tokio::time::sleep(ACCEPT_ERROR_DELAY).await;
            }
        }
    }
    tracing::debug!("pull accept loop stopped");
}

/// Read frames from one pusher until it disconnects or the socket closes.
async fn read_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    tx: mpsc::Sender<Bytes>,
    max_frame_size: u64,
    shutdown: CancellationToken,
) {
    if let Err(e) = handshake(&mut stream, PROTO_PULL).await {
        tracing::warn!(%peer, "rejecting connection: {}", e);
        return;
    }
    let _ = stream.set_nodelay(true);
    tracing::debug!(%peer, "pusher connected");

    let mut frame_buffer = FrameBuffer::with_max_frame(max_frame_size);
    let mut read_buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let n = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return,
            r = stream.read(&mut read_buf) => match r {
                Ok(0) => {
                    tracing::debug!(%peer, "pusher disconnected");
                    return;
                }
                Ok(n) => n,
                Err(e) => {
                    tracing::debug!(%peer, "read error: {}", e);
                    return;
                }
            },
        };

        let frames = match frame_buffer.push(&read_buf[..n]) {
            Ok(frames) => frames,
            Err(e) => {
                tracing::warn!(%peer, "dropping connection: {}", e);
                return;
            }
        };

        for frame in frames {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => return,
                r = tx.send(frame) => if r.is_err() { return },
            }
        }
    }
}
