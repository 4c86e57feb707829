//! Routes cloud-originated messages to registered services.

use std::sync::Arc;

use super::registry::Registry;
use super::upstream::Upstream;
use crate::access::{unauthorized_reply, AllowMessage};
use crate::error::Result;
use crate::handler::{BoxFuture, MessageHandler, Unimplemented};
use crate::message::Message;

/// Delivers messages from the cloud to the service named in their
/// destination.
///
/// Lookups never create forwarders: a message for a name nobody registered
/// gets a 501 reply from [`Unimplemented`].
pub struct Router {
    registry: Arc<Registry>,
    upstream: Arc<dyn Upstream>,
    filter: Option<Arc<dyn AllowMessage>>,
}

impl Router {
    /// Create a router with no access filter.
    pub fn new(registry: Arc<Registry>, upstream: Arc<dyn Upstream>) -> Self {
        Self {
            registry,
            upstream,
            filter: None,
        }
    }

    /// Reject messages `filter` does not allow with a 401 reply.
    pub fn with_filter(mut self, filter: impl AllowMessage + 'static) -> Self {
        self.filter = Some(Arc::new(filter));
        self
    }

    /// Route `msg`, returning the reply (if any) for the cloud.
    pub async fn handle(&self, msg: Message) -> Option<Message> {
        if let Some(filter) = &self.filter {
            if let Err(e) = filter.allow(&msg) {
                tracing::warn!(
                    source = %msg.source,
                    transaction_uuid = %msg.transaction_uuid,
                    "message rejected: {}",
                    e
                );
                return Some(unauthorized_reply(&msg, &e));
            }
        }

        let service = msg.destination_service();
        match self.registry.get(service).await {
            Some(forwarder) => forwarder.handle_message(msg).await,
            None => {
                tracing::debug!(service, "no registered service");
                Unimplemented.handle_message(msg).await
            }
        }
    }

    /// Route `msg` and send any reply upstream.
    pub async fn deliver(&self, msg: Message) -> Result<()> {
        if let Some(reply) = self.handle(msg).await {
            self.upstream.send(reply).await?;
        }
        Ok(())
    }
}

impl MessageHandler for Router {
    fn handle_message(&self, msg: Message) -> BoxFuture<'_, Option<Message>> {
        Box::pin(self.handle(msg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::block_by_partner_id;
    use crate::hub::upstream::ChannelUpstream;
    use crate::message::{status, MessageType};
    use crate::transport::{Endpoint, PullConfig, PullSocket};
    use tokio::sync::mpsc;

    fn setup() -> (Router, Arc<Registry>, mpsc::Receiver<Message>) {
        let registry = Arc::new(Registry::default());
        let (upstream, rx) = ChannelUpstream::new(10);
        (
            Router::new(registry.clone(), Arc::new(upstream)),
            registry,
            rx,
        )
    }

    fn request(dest: &str) -> Message {
        Message {
            msg_type: MessageType::SimpleRequestResponse,
            source: "dns:cloud".to_string(),
            destination: dest.to_string(),
            transaction_uuid: "tid".to_string(),
            partner_ids: vec!["comcast".to_string()],
            ..Message::default()
        }
    }

    #[tokio::test]
    async fn test_unregistered_name_gets_501_and_no_forwarder() {
        let (router, registry, _rx) = setup();

        let reply = router
            .handle(request("mac:112233445566/cfg"))
            .await
            .unwrap();

        assert_eq!(reply.status, Some(status::NOT_IMPLEMENTED));
        assert_eq!(reply.transaction_uuid, "tid");
        assert!(registry.get("cfg").await.is_none());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_registered_service_receives_message() {
        let (router, registry, _rx) = setup();
        let mut pull = PullSocket::listen(
            &Endpoint::parse("tcp://127.0.0.1:0").unwrap(),
            PullConfig::default(),
        )
        .await
        .unwrap();
        registry
            .register("cfg", &format!("tcp://{}", pull.local_addr()))
            .await
            .unwrap();

        let msg = request("mac:112233445566/cfg/some/path");
        assert!(router.handle(msg.clone()).await.is_none());

        let got = Message::decode(&pull.recv().await.unwrap()).unwrap();
        assert_eq!(got, msg);
    }

    #[tokio::test]
    async fn test_filter_rejects_with_401() {
        let (router, _registry, _rx) = setup();
        let router = router.with_filter(block_by_partner_id("other"));

        let reply = router.handle(request("cfg")).await.unwrap();
        assert_eq!(reply.status, Some(status::UNAUTHORIZED));
        assert_eq!(reply.destination, "dns:cloud");
    }

    #[tokio::test]
    async fn test_deliver_sends_reply_upstream() {
        let (router, _registry, mut rx) = setup();

        router.deliver(request("cfg")).await.unwrap();

        let reply = rx.recv().await.unwrap();
        assert_eq!(reply.status, Some(status::NOT_IMPLEMENTED));
        assert_eq!(reply.destination, "dns:cloud");
    }
}
