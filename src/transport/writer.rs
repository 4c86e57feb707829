//! Dedicated writer task behind every push socket.
//!
//! Frames are queued on an mpsc channel and written by a single task that
//! owns the TCP stream. When the connection drops the task redials with
//! capped exponential backoff; frames queued meanwhile wait in the channel.
//!
//! ```text
//! send() ─┐
//! send() ─┼─► mpsc::Sender<OutboundFrame> ─► Writer Task ─► TCP (SP frames)
//! send() ─┘
//! ```

use std::io::IoSlice;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{connect, Endpoint};
use crate::error::{RelayError, Result};
use crate::protocol::{encode_length, LENGTH_PREFIX_SIZE, PROTO_PUSH};

/// Maximum frames to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 64;

/// First redial delay after a dropped connection.
const INITIAL_REDIAL_DELAY: Duration = Duration::from_millis(100);

/// A frame ready to be written to the socket.
#[derive(Debug)]
pub struct OutboundFrame {
    /// Pre-encoded length prefix.
    pub header: [u8; LENGTH_PREFIX_SIZE],
    /// Payload bytes.
    pub payload: Bytes,
}

impl OutboundFrame {
    /// Create a new outbound frame.
    #[inline]
    pub fn new(payload: Bytes) -> Self {
        Self {
            header: encode_length(payload.len()),
            payload,
        }
    }

    /// Total size of this frame (prefix + payload).
    #[inline]
    pub fn size(&self) -> usize {
        LENGTH_PREFIX_SIZE + self.payload.len()
    }
}

/// Main writer loop - receives frames and writes them to the peer.
///
/// Exits when `shutdown` fires or every sender is gone, shutting the stream
/// down on the way out.
pub(crate) async fn writer_loop(
    mut rx: mpsc::Receiver<OutboundFrame>,
    stream: TcpStream,
    endpoint: Endpoint,
    max_backoff: Duration,
    shutdown: CancellationToken,
) {
    let mut stream = Some(stream);

    loop {
        let first = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            frame = rx.recv() => match frame {
                Some(f) => f,
                None => break,
            },
        };

        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        batch.push(first);
        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(frame) => batch.push(frame),
                Err(_) => break,
            }
        }

        if stream.is_none() {
            match redial(&endpoint, max_backoff, &shutdown).await {
                Some(s) => stream = Some(s),
                None => break,
            }
        }
        let Some(conn) = stream.as_mut() else {
            break;
        };

        let result = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            r = write_batch(conn, &batch) => r,
        };

        if let Err(e) = result {
            tracing::warn!(
                endpoint = %endpoint,
                dropped = batch.len(),
                "push write failed, redialing: {}",
                e
            );
            stream = None;
        }
    }

    if let Some(mut s) = stream {
        let _ = s.shutdown().await;
    }
    tracing::debug!(endpoint = %endpoint, "push writer stopped");
}

/// Reconnect to `endpoint`, backing off until it answers or `shutdown` fires.
async fn redial(
    endpoint: &Endpoint,
    max_backoff: Duration,
    shutdown: &CancellationToken,
) -> Option<TcpStream> {
    let mut delay = INITIAL_REDIAL_DELAY;

    loop {
        let attempt = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return None,
            r = connect(endpoint, PROTO_PUSH) => r,
        };

        match attempt {
            Ok(stream) => {
                tracing::info!(endpoint = %endpoint, "push socket reconnected");
                return Some(stream);
            }
            Err(e) => {
                tracing::debug!(endpoint = %endpoint, delay_ms = delay.as_millis() as u64, "redial failed: {}", e);
            }
        }

        tokio::select! {
            biased;
            _ = shutdown.cancelled() => return None,
            _ = tokio::time::sleep(delay) => {}
        }
        delay = (delay * 2).min(max_backoff.max(INITIAL_REDIAL_DELAY));
    }
}

/// Write a batch of frames using scatter/gather I/O (write_vectored).
pub(crate) async fn write_batch<W>(writer: &mut W, batch: &[OutboundFrame]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if batch.is_empty() {
        return Ok(());
    }

    let mut slices: Vec<IoSlice<'_>> = Vec::with_capacity(batch.len() * 2);
    for frame in batch {
        slices.push(IoSlice::new(&frame.header));
        if !frame.payload.is_empty() {
            slices.push(IoSlice::new(&frame.payload));
        }
    }

    let total_size: usize = batch.iter().map(|f| f.size()).sum();

    let written = writer.write_vectored(&slices).await?;
    if written == total_size {
        writer.flush().await?;
        return Ok(());
    }

    if written == 0 {
        return Err(RelayError::Io(std::io::Error::new(
            std::io::ErrorKind::WriteZero,
            "write_vectored returned 0",
        )));
    }

    // Partial write, continue with the remaining data
    let mut total_written = written;
    while total_written < total_size {
        let remaining_slices = build_remaining_slices(batch, total_written);
        if remaining_slices.is_empty() {
            break;
        }

        let written = writer.write_vectored(&remaining_slices).await?;
        if written == 0 {
            return Err(RelayError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }

        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// Build IoSlice array for remaining data after partial write.
fn build_remaining_slices(batch: &[OutboundFrame], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len() * 2);
    let mut skipped = 0;

    for frame in batch {
        let header_start = skipped;
        let header_end = skipped + LENGTH_PREFIX_SIZE;

        if skip_bytes < header_end {
            let start_in_header = skip_bytes.saturating_sub(header_start);
            slices.push(IoSlice::new(&frame.header[start_in_header..]));
        }
        skipped = header_end;

        if !frame.payload.is_empty() {
            let payload_start = skipped;
            let payload_end = skipped + frame.payload.len();

            if skip_bytes < payload_end {
                let start_in_payload = skip_bytes.saturating_sub(payload_start);
                slices.push(IoSlice::new(&frame.payload[start_in_payload..]));
            }
            skipped = payload_end;
        }
    }

    slices
}
