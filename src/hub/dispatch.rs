//! Hub-side protocol state machine for messages from attached services.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::registry::{Registration, Registry};
use super::upstream::Upstream;
use crate::message::{Message, MessageType};

/// Routes parsed messages by type.
pub struct Dispatcher {
    registry: Arc<Registry>,
    upstream: Arc<dyn Upstream>,
}

impl Dispatcher {
    /// Create a dispatcher over a shared registry and upstream.
    pub fn new(registry: Arc<Registry>, upstream: Arc<dyn Upstream>) -> Self {
        Self { registry, upstream }
    }

    /// Dispatch messages from `input` until `stop` fires.
    ///
    /// Whatever is still queued at that point is discarded.
    pub async fn run(self, mut input: mpsc::Receiver<Message>, stop: CancellationToken) {
        tracing::debug!("dispatcher started");

        loop {
            let msg = tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                msg = input.recv() => match msg {
                    Some(msg) => msg,
                    None => break,
                },
            };

            tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                _ = self.dispatch(msg) => {}
            }
        }

        tracing::debug!("dispatcher stopped");
    }

    /// Handle one message.
    pub async fn dispatch(&self, msg: Message) {
        match msg.msg_type {
            MessageType::ServiceRegistration => self.on_registration(&msg).await,
            MessageType::ServiceAlive => self.on_alive(&msg).await,
            MessageType::SimpleRequestResponse | MessageType::SimpleEvent => {
                self.forward_upstream(msg).await
            }
            MessageType::Authorization
            | MessageType::Create
            | MessageType::Retrieve
            | MessageType::Update
            | MessageType::Delete
            | MessageType::Unknown => {
                tracing::error!(
                    msg_type = %msg.msg_type,
                    source = %msg.source,
                    destination = %msg.destination,
                    "unexpected WRP message from local service"
                );
            }
        }
    }

    async fn on_registration(&self, msg: &Message) {
        tracing::debug!(service = %msg.service_name, url = %msg.url, "received service registration");

        match self.registry.register(&msg.service_name, &msg.url).await {
            Ok(Registration::Created(_)) => {
                tracing::info!(service = %msg.service_name, url = %msg.url, "service registered");
            }
            Ok(Registration::Refreshed(_)) => {
                tracing::debug!(service = %msg.service_name, "updated registration timestamp");
            }
            Err(e) => {
                tracing::error!(
                    service = %msg.service_name,
                    url = %msg.url,
                    "failed to register service: {}",
                    e
                );
            }
        }
    }

    async fn on_alive(&self, msg: &Message) {
        if self.registry.refresh(&msg.service_name).await {
            tracing::debug!(service = %msg.service_name, "updated alive timestamp");
        }
    }

    async fn forward_upstream(&self, msg: Message) {
        let transaction_uuid = msg.transaction_uuid.clone();
        if let Err(e) = self.upstream.send(msg).await {
            tracing::error!(%transaction_uuid, "failed to send message upstream: {}", e);
        }
    }
}
