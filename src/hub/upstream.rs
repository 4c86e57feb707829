//! Boundary to the cloud connection.
//!
//! The cloud transport itself lives outside this crate. The hub only needs
//! to hand it messages and close it on shutdown.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;

use crate::error::{RelayError, Result};
use crate::handler::BoxFuture;
use crate::message::Message;

/// Sends cloud-bound messages.
pub trait Upstream: Send + Sync + 'static {
    /// Hand `msg` to the cloud connection.
    fn send(&self, msg: Message) -> BoxFuture<'_, Result<()>>;

    /// Close the cloud connection. A second close returns
    /// [`RelayError::AlreadyClosed`].
    fn close(&self) -> Result<()>;
}

/// [`Upstream`] that feeds a bounded channel.
///
/// Whatever owns the receiving half plays the cloud connection.
#[derive(Debug)]
pub struct ChannelUpstream {
    tx: mpsc::Sender<Message>,
    closed: AtomicBool,
}

impl ChannelUpstream {
    /// Create the upstream and the receiver its messages arrive on.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                closed: AtomicBool::new(false),
            },
            rx,
        )
    }
}

impl Upstream for ChannelUpstream {
    fn send(&self, msg: Message) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if self.closed.load(Ordering::Acquire) {
                return Err(RelayError::Closed);
            }
            self.tx.send(msg).await.map_err(|_| RelayError::Closed)
        })
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(RelayError::AlreadyClosed);
        }
        Ok(())
    }
}
