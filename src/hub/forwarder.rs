//! Hub-side handle for one registered service.
//!
//! A forwarder owns the push socket to its service and a heartbeat task that
//! probes the service with `ServiceAlive` messages. The heartbeat holds only a
//! weak reference, so it never keeps a forwarder alive on its own, and
//! [`Forwarder::close`] joins it before closing the socket.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::handler::{BoxFuture, MessageHandler};
use crate::message::{status, Message};
use crate::transport::{Endpoint, PushConfig, PushSocket};

/// Default interval between heartbeat probes.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Settings applied to every forwarder a registry creates.
#[derive(Debug, Clone)]
pub struct ForwarderConfig {
    /// Interval between `ServiceAlive` probes.
    pub heartbeat_interval: Duration,
    /// Push socket settings.
    pub push: PushConfig,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            push: PushConfig::default(),
        }
    }
}

/// A registered service.
pub struct Forwarder {
    name: String,
    url: String,
    last_alive: Mutex<Instant>,
    socket: PushSocket,
    stop: CancellationToken,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
}

impl Forwarder {
    /// Dial the service at `url` and start its heartbeat.
    pub async fn connect(name: &str, url: &str, config: &ForwarderConfig) -> Result<Arc<Self>> {
        let endpoint = Endpoint::parse(url)?;
        let socket = PushSocket::dial(&endpoint, config.push.clone()).await?;

        let forwarder = Arc::new(Self {
            name: name.to_string(),
            url: url.to_string(),
            last_alive: Mutex::new(Instant::now()),
            socket,
            stop: CancellationToken::new(),
            heartbeat: Mutex::new(None),
        });

        let handle = tokio::spawn(heartbeat_loop(
            Arc::downgrade(&forwarder),
            config.heartbeat_interval,
            forwarder.stop.clone(),
        ));
        *forwarder.heartbeat.lock() = Some(handle);

        Ok(forwarder)
    }

    /// Service name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Address the service asked to be pushed to.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// When the service last registered or reported alive.
    pub fn last_alive(&self) -> Instant {
        *self.last_alive.lock()
    }

    /// Time since [`last_alive`](Self::last_alive).
    pub fn idle(&self) -> Duration {
        self.last_alive().elapsed()
    }

    /// Record a sign of life from the service.
    pub fn touch(&self) {
        *self.last_alive.lock() = Instant::now();
    }

    /// Encode `msg` and queue it for the service.
    pub async fn send(&self, msg: &Message) -> Result<()> {
        let bytes = msg.encode()?;
        self.socket.send(Bytes::from(bytes)).await
    }

    /// Whether [`close`](Self::close) has run.
    pub fn is_closed(&self) -> bool {
        self.socket.is_closed()
    }

    /// Stop and join the heartbeat, then close the socket.
    ///
    /// A second call returns [`RelayError::AlreadyClosed`](crate::RelayError::AlreadyClosed).
    pub async fn close(&self) -> Result<()> {
        self.stop.cancel();
        let heartbeat = self.heartbeat.lock().take();
        if let Some(handle) = heartbeat {
            let _ = handle.await;
        }
        self.socket.close()
    }
}

impl MessageHandler for Forwarder {
    /// Deliver `msg` to the service.
    ///
    /// Returns a 503 reply for the original requester if the send fails.
    fn handle_message(&self, msg: Message) -> BoxFuture<'_, Option<Message>> {
        Box::pin(async move {
            tracing::debug!(
                service = %self.name,
                msg_type = %msg.msg_type,
                transaction_uuid = %msg.transaction_uuid,
                "handling message"
            );

            match self.send(&msg).await {
                Ok(()) => None,
                Err(e) => {
                    tracing::error!(service = %self.name, "failed to send message: {}", e);
                    Some(msg.error_reply(status::SERVICE_UNAVAILABLE, e))
                }
            }
        })
    }
}

impl Drop for Forwarder {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

impl std::fmt::Debug for Forwarder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Forwarder")
            .field("name", &self.name)
            .field("url", &self.url)
            .field("idle", &self.idle())
            .finish()
    }
}

async fn heartbeat_loop(forwarder: Weak<Forwarder>, interval: Duration, stop: CancellationToken) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let Some(forwarder) = forwarder.upgrade() else {
            break;
        };

        let reply = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            reply = forwarder.handle_message(Message::alive()) => reply,
        };

        // Nobody to deliver a failure to; the status is only logged.
        if let Some(reply) = reply {
            tracing::debug!(service = %forwarder.name, status = ?reply.status, "heartbeat not delivered");
        }
    }

    tracing::debug!("heartbeat stopped");
}
