//! Transport module - SP push/pull sockets over TCP.
//!
//! Provides:
//! - [`Endpoint`] parsing for `tcp://host:port` addresses
//! - [`PushSocket`]: dialing side, fire-and-forget sends through a writer task
//! - [`PullSocket`]: listening side, fan-in of every connected pusher
//!
//! The pumps are written against [`FrameSource`] and [`FrameSink`] so they can
//! be driven by in-memory sockets in tests.

mod endpoint;
mod pull;
mod push;
mod writer;

use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::{RelayError, Result};
use crate::protocol::{Handshake, HANDSHAKE_SIZE};

pub use endpoint::{Endpoint, TCP_SCHEME};
pub use pull::{PullConfig, PullSocket};
pub use push::{PushConfig, PushSocket};
pub use writer::OutboundFrame;

/// How long a peer gets to complete the SP handshake.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// How long a dial may take before it is treated as failed.
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Something frames can be received from.
pub trait FrameSource: Send + 'static {
    /// Wait for the next frame. Errors once the source is closed.
    fn recv(&mut self) -> impl Future<Output = Result<Bytes>> + Send;

    /// Close the source. A second close returns [`RelayError::AlreadyClosed`].
    fn close(&mut self) -> Result<()>;
}

/// Something frames can be sent to.
pub trait FrameSink: Send + Sync + 'static {
    /// Queue a frame for delivery.
    fn send(&self, frame: Bytes) -> impl Future<Output = Result<()>> + Send;

    /// Close the sink. A second close returns [`RelayError::AlreadyClosed`].
    fn close(&self) -> Result<()>;
}

/// Exchange SP handshakes and verify the peer pairs with `own`.
pub(crate) async fn handshake<S>(stream: &mut S, own: u16) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let exchange = async {
        stream.write_all(&Handshake::new(own).encode()).await?;
        stream.flush().await?;

        let mut buf = [0u8; HANDSHAKE_SIZE];
        stream.read_exact(&mut buf).await?;
        Handshake::decode(&buf)?.expect_peer_of(own)
    };

    tokio::time::timeout(HANDSHAKE_TIMEOUT, exchange)
        .await
        .map_err(|_| RelayError::Protocol("handshake timed out".to_string()))?
}

/// Dial `endpoint` and complete the handshake as `own`.
pub(crate) async fn connect(endpoint: &Endpoint, own: u16) -> Result<TcpStream> {
    let mut stream = tokio::time::timeout(DIAL_TIMEOUT, TcpStream::connect(endpoint.connect_addr()))
        .await
        .map_err(|_| {
            std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("dial {endpoint} timed out"),
            )
        })??;
    stream.set_nodelay(true)?;
    handshake(&mut stream, own).await?;
    Ok(stream)
}
