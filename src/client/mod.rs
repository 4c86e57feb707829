//! Client counterpart for services attaching to the hub.
//!
//! The [`ClientBuilder`] provides a fluent API for configuring the service
//! and its handler. The [`Client`] manages the lifecycle:
//! 1. Validate configuration (before any socket is opened)
//! 2. Listen on the service address
//! 3. Dial the hub
//! 4. Start the pumps and the dispatch task
//! 5. Register now, and again on every tick of the register interval
//!
//! # Example
//!
//! ```no_run
//! use wrp_relay::client::Client;
//! use wrp_relay::handler::handler_fn;
//! use wrp_relay::message::create_response;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::builder()
//!         .name("config")
//!         .hub_url("tcp://127.0.0.1:6666")
//!         .service_url("tcp://127.0.0.1:13032")
//!         .handler(handler_fn(|msg| async move { Some(create_response(&msg)) }))
//!         .start()
//!         .await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     client.shutdown().await;
//!     Ok(())
//! }
//! ```

mod config;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::access::{unauthorized_reply, AllowMessage};
use crate::error::{RelayError, Result};
use crate::handler::MessageHandler;
use crate::message::{Message, MessageType};
use crate::pump::{enqueue, parse_pump, read_pump, write_pump};
use crate::transport::{PullConfig, PullSocket, PushConfig, PushSocket};

pub use config::{
    ClientConfig, ValidatedAddrs, DEFAULT_HUB_URL, DEFAULT_REGISTER_INTERVAL,
    DEFAULT_SERVICE_URL,
};

/// Builder for configuring and starting a [`Client`].
pub struct ClientBuilder {
    config: ClientConfig,
    handler: Option<Arc<dyn MessageHandler>>,
    filter: Option<Arc<dyn AllowMessage>>,
}

impl ClientBuilder {
    /// Create a builder with default addresses and no name.
    pub fn new() -> Self {
        Self::from_config(ClientConfig::default())
    }

    /// Start from an existing configuration.
    pub fn from_config(config: ClientConfig) -> Self {
        Self {
            config,
            handler: None,
            filter: None,
        }
    }

    /// Service name the hub routes by. Required.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Hub address. Only `tcp://` is accepted.
    pub fn hub_url(mut self, url: impl Into<String>) -> Self {
        self.config.hub_url = url.into();
        self
    }

    /// Address to listen on for the hub. Port 0 picks a free port.
    pub fn service_url(mut self, url: impl Into<String>) -> Self {
        self.config.service_url = url.into();
        self
    }

    /// Handler for every inbound message except alive probes. Required.
    pub fn handler(mut self, handler: impl MessageHandler) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Reject inbound messages `filter` does not allow with a 401 reply.
    pub fn filter(mut self, filter: impl AllowMessage + 'static) -> Self {
        self.filter = Some(Arc::new(filter));
        self
    }

    /// Interval between registrations.
    ///
    /// Default: 1 minute
    pub fn register_interval(mut self, interval: Duration) -> Self {
        self.config.register_interval = interval;
        self
    }

    /// Capacity of the internal queues.
    ///
    /// Default: 100
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    /// Validate, open both sockets, and start the client.
    pub async fn start(self) -> Result<Client> {
        let handler = self
            .handler
            .ok_or_else(|| RelayError::Config("handler must be defined".to_string()))?;
        Client::start(self.config, handler, self.filter).await
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A running service attached to the hub.
pub struct Client {
    name: String,
    url: String,
    local_addr: SocketAddr,
    outbound: mpsc::Sender<Message>,
    stop: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Client {
    /// Create a new client builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    async fn start(
        config: ClientConfig,
        handler: Arc<dyn MessageHandler>,
        filter: Option<Arc<dyn AllowMessage>>,
    ) -> Result<Self> {
        let addrs = config.validate()?;
        let capacity = config.queue_capacity;

        let pull = PullSocket::listen(
            &addrs.service,
            PullConfig::default().with_backlog(capacity),
        )
        .await?;
        let local_addr = pull.local_addr();

        let url = if addrs.service.port() == 0 {
            addrs.service.with_port(local_addr.port()).to_string()
        } else {
            config.service_url.clone()
        };
        tracing::info!(service = %config.name, %url, "listening for hub");

        let push = PushSocket::dial(
            &addrs.hub,
            PushConfig::default().with_queue_capacity(capacity),
        )
        .await?;

        let stop = CancellationToken::new();
        let (frame_tx, frame_rx) = mpsc::channel(capacity);
        let (inbound_tx, inbound_rx) = mpsc::channel(capacity);
        let (outbound_tx, outbound_rx) = mpsc::channel(capacity);

        let tasks = vec![
            tokio::spawn(read_pump(pull, frame_tx, stop.clone())),
            tokio::spawn(parse_pump(frame_rx, inbound_tx, stop.clone())),
            tokio::spawn(write_pump(outbound_rx, push, stop.clone())),
            tokio::spawn(dispatch_loop(
                inbound_rx,
                outbound_tx.clone(),
                handler,
                filter,
                stop.clone(),
            )),
            tokio::spawn(register_loop(
                Message::registration(config.name.as_str(), url.as_str()),
                outbound_tx.clone(),
                config.effective_register_interval(),
                stop.clone(),
            )),
        ];

        Ok(Self {
            name: config.name,
            url,
            local_addr,
            outbound: outbound_tx,
            stop,
            tasks,
        })
    }

    /// Service name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// URL advertised to the hub.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Address the service socket is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Queue `msg` for the hub.
    ///
    /// Blocks while the queue is full.
    ///
    /// # Errors
    ///
    /// - [`RelayError::Cancelled`] if `cancel` fires first
    /// - [`RelayError::Closed`] if the client is shutting down
    pub async fn send_message(&self, msg: Message, cancel: &CancellationToken) -> Result<()> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(RelayError::Cancelled),
            _ = self.stop.cancelled() => Err(RelayError::Closed),
            r = self.outbound.send(msg) => r.map_err(|_| RelayError::Closed),
        }
    }

    /// Stop every task and wait for them. The pumps close both sockets.
    pub async fn shutdown(self) {
        tracing::info!(service = %self.name, "stopping client");
        self.stop.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::warn!("client task ended abnormally: {}", e);
            }
        }
    }
}

/// Answer alive probes, pass everything else through the filter and handler.
async fn dispatch_loop(
    mut inbound: mpsc::Receiver<Message>,
    outbound: mpsc::Sender<Message>,
    handler: Arc<dyn MessageHandler>,
    filter: Option<Arc<dyn AllowMessage>>,
    stop: CancellationToken,
) {
    loop {
        let msg = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            msg = inbound.recv() => match msg {
                Some(msg) => msg,
                None => break,
            },
        };

        tracing::debug!(transaction_uuid = %msg.transaction_uuid, msg_type = %msg.msg_type, "received msg");

        let reply = match msg.msg_type {
            MessageType::ServiceAlive => Some(msg.alive_echo()),
            _ => {
                let verdict = match &filter {
                    Some(filter) => filter.allow(&msg),
                    None => Ok(()),
                };
                match verdict {
                    Ok(()) => tokio::select! {
                        biased;
                        _ = stop.cancelled() => break,
                        reply = handler.handle_message(msg) => reply,
                    },
                    Err(e) => {
                        tracing::warn!(source = %msg.source, "message rejected: {}", e);
                        Some(unauthorized_reply(&msg, &e))
                    }
                }
            }
        };

        if let Some(reply) = reply {
            if enqueue(&outbound, reply, &stop).await.is_err() {
                break;
            }
        }
    }

    tracing::debug!("client dispatch stopped");
}

/// Send `registration` now and on every tick until stopped.
async fn register_loop(
    registration: Message,
    outbound: mpsc::Sender<Message>,
    interval: Duration,
    stop: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        // The first tick completes immediately.
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if enqueue(&outbound, registration.clone(), &stop).await.is_err() {
            break;
        }
        tracing::debug!(service = %registration.service_name, "registration sent");
    }
}
