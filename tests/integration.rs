//! Integration tests for wrp-relay.
//!
//! These run a hub and attached clients over loopback TCP.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use wrp_relay::client::Client;
use wrp_relay::handler::handler_fn;
use wrp_relay::hub::{ChannelUpstream, Hub, RelayConfig};
use wrp_relay::message::{create_response, status, Message, MessageType};
use wrp_relay::transport::{Endpoint, PullConfig, PullSocket, PushConfig, PushSocket};
use wrp_relay::RelayError;

const DEVICE: &str = "mac:112233445566";

async fn start_hub(config: RelayConfig) -> (Hub, mpsc::Receiver<Message>) {
    let (upstream, to_cloud) = ChannelUpstream::new(100);
    let config = RelayConfig {
        local_url: "tcp://127.0.0.1:0".to_string(),
        ..config
    };
    let hub = Hub::start(config, Arc::new(upstream)).await.unwrap();
    (hub, to_cloud)
}

async fn start_client(hub: &Hub, name: &str, register_interval: Duration) -> Client {
    Client::builder()
        .name(name)
        .hub_url(format!("tcp://{}", hub.local_addr()))
        .service_url("tcp://127.0.0.1:0")
        .register_interval(register_interval)
        .handler(handler_fn(|msg: Message| async move {
            let mut reply = create_response(&msg);
            reply.payload = b"pong".to_vec();
            reply.status = Some(200);
            Some(reply)
        }))
        .start()
        .await
        .unwrap()
}

/// Poll `check` until it returns true or two seconds pass.
async fn wait_for<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !check().await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn cloud_request(service: &str, tid: &str) -> Message {
    Message {
        msg_type: MessageType::SimpleRequestResponse,
        source: "dns:talaria".to_string(),
        destination: format!("{DEVICE}/{service}"),
        transaction_uuid: tid.to_string(),
        payload: b"ping".to_vec(),
        ..Message::default()
    }
}

/// A WRP message survives the trip through a push/pull pair.
#[tokio::test]
async fn test_message_over_push_pull() {
    let mut pull = PullSocket::listen(
        &Endpoint::parse("tcp://127.0.0.1:0").unwrap(),
        PullConfig::default(),
    )
    .await
    .unwrap();
    let ep = Endpoint::parse(&format!("tcp://{}", pull.local_addr())).unwrap();
    let push = PushSocket::dial(&ep, PushConfig::default()).await.unwrap();

    let msg = cloud_request("config", "tid-wire");
    push.send(Bytes::from(msg.encode().unwrap())).await.unwrap();

    let frame = pull.recv().await.unwrap();
    assert_eq!(Message::decode(&frame).unwrap(), msg);
}

/// Many frames from one pusher arrive in order.
#[tokio::test]
async fn test_frame_order_preserved() {
    let mut pull = PullSocket::listen(
        &Endpoint::parse("tcp://127.0.0.1:0").unwrap(),
        PullConfig::default(),
    )
    .await
    .unwrap();
    let ep = Endpoint::parse(&format!("tcp://{}", pull.local_addr())).unwrap();
    let push = PushSocket::dial(&ep, PushConfig::default()).await.unwrap();

    for i in 0..50u32 {
        push.send(Bytes::from(i.to_be_bytes().to_vec())).await.unwrap();
    }
    for i in 0..50u32 {
        let frame = pull.recv().await.unwrap();
        assert_eq!(&frame[..], &i.to_be_bytes());
    }
}

/// Client registers, the cloud sends it a request, the reply goes upstream.
#[tokio::test]
async fn test_end_to_end_request_reply() {
    let (hub, mut to_cloud) = start_hub(RelayConfig::default()).await;
    let client = start_client(&hub, "cfg", Duration::from_secs(60)).await;

    let registry = hub.registry().clone();
    wait_for(|| {
        let registry = registry.clone();
        async move { registry.get("cfg").await.is_some() }
    })
    .await;

    let forwarder = hub.registry().get("cfg").await.unwrap();
    assert_eq!(forwarder.url(), client.url());
    assert!(forwarder.idle() < Duration::from_secs(1));

    hub.router()
        .deliver(cloud_request("cfg", "tid-1"))
        .await
        .unwrap();

    let reply = tokio::time::timeout(Duration::from_secs(2), to_cloud.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reply.msg_type, MessageType::SimpleRequestResponse);
    assert_eq!(reply.transaction_uuid, "tid-1");
    assert_eq!(reply.destination, "dns:talaria");
    assert_eq!(reply.source, format!("{DEVICE}/cfg"));
    assert_eq!(reply.payload, b"pong");

    client.shutdown().await;
    hub.shutdown().await.unwrap();
}

/// Periodic re-registration refreshes liveness without a second forwarder.
#[tokio::test]
async fn test_reregistration_refreshes() {
    let (hub, _to_cloud) = start_hub(RelayConfig::default()).await;
    let client = start_client(&hub, "cfg", Duration::from_millis(50)).await;

    let registry = hub.registry().clone();
    wait_for(|| {
        let registry = registry.clone();
        async move { registry.get("cfg").await.is_some() }
    })
    .await;
    let first = hub.registry().get("cfg").await.unwrap();
    let first_seen = first.last_alive();

    wait_for(|| {
        let first = first.clone();
        async move { first.last_alive() > first_seen }
    })
    .await;

    let again = hub.registry().get("cfg").await.unwrap();
    assert!(Arc::ptr_eq(&first, &again));
    assert_eq!(hub.registry().len().await, 1);

    client.shutdown().await;
    hub.shutdown().await.unwrap();
}

/// A request for a name nobody registered gets 501 and creates nothing.
#[tokio::test]
async fn test_unregistered_service() {
    let (hub, mut to_cloud) = start_hub(RelayConfig::default()).await;

    hub.router()
        .deliver(cloud_request("nobody", "tid-501"))
        .await
        .unwrap();

    let reply = to_cloud.recv().await.unwrap();
    assert_eq!(reply.status, Some(status::NOT_IMPLEMENTED));
    assert_eq!(reply.transaction_uuid, "tid-501");
    assert!(hub.registry().is_empty().await);

    hub.shutdown().await.unwrap();
}

/// Delivery over a dead forwarder yields a 503 carrying the transaction id.
#[tokio::test]
async fn test_transport_failure_yields_503() {
    let (hub, _to_cloud) = start_hub(RelayConfig::default()).await;
    let client = start_client(&hub, "cfg", Duration::from_secs(60)).await;

    let registry = hub.registry().clone();
    wait_for(|| {
        let registry = registry.clone();
        async move { registry.get("cfg").await.is_some() }
    })
    .await;
    hub.registry().get("cfg").await.unwrap().close().await.unwrap();

    let reply = hub
        .router()
        .handle(cloud_request("cfg", "tid-503"))
        .await
        .unwrap();
    assert_eq!(reply.status, Some(status::SERVICE_UNAVAILABLE));
    assert_eq!(reply.transaction_uuid, "tid-503");
    assert_eq!(reply.destination, "dns:talaria");

    client.shutdown().await;
    hub.shutdown().await.unwrap();
}

/// The partner id filter answers 401 before any lookup.
#[tokio::test]
async fn test_partner_filter() {
    let (hub, _to_cloud) = start_hub(RelayConfig {
        partner_id: Some("comcast".to_string()),
        ..RelayConfig::default()
    })
    .await;

    let mut msg = cloud_request("cfg", "tid-401");
    msg.partner_ids = vec!["other".to_string()];
    let reply = hub.router().handle(msg).await.unwrap();
    assert_eq!(reply.status, Some(status::UNAUTHORIZED));

    let mut msg = cloud_request("cfg", "tid-ok");
    msg.partner_ids = vec!["other".to_string(), "comcast".to_string()];
    let reply = hub.router().handle(msg).await.unwrap();
    assert_eq!(reply.status, Some(status::NOT_IMPLEMENTED));

    hub.shutdown().await.unwrap();
}

/// Events from a service travel upstream unchanged.
#[tokio::test]
async fn test_client_event_reaches_cloud() {
    let (hub, mut to_cloud) = start_hub(RelayConfig::default()).await;
    let client = start_client(&hub, "cfg", Duration::from_secs(60)).await;

    let event = Message {
        msg_type: MessageType::SimpleEvent,
        source: format!("{DEVICE}/cfg"),
        destination: "event:device-status".to_string(),
        payload: b"{\"up\":true}".to_vec(),
        ..Message::default()
    };
    client
        .send_message(event.clone(), &CancellationToken::new())
        .await
        .unwrap();

    let got = tokio::time::timeout(Duration::from_secs(2), to_cloud.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(got, event);

    client.shutdown().await;
    hub.shutdown().await.unwrap();
}

/// A cancelled send returns promptly with a cancellation error.
#[tokio::test]
async fn test_send_message_cancelled() {
    let (hub, _to_cloud) = start_hub(RelayConfig::default()).await;
    let client = start_client(&hub, "cfg", Duration::from_secs(60)).await;

    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = tokio::time::timeout(
        Duration::from_millis(500),
        client.send_message(Message::new(MessageType::SimpleEvent), &cancel),
    )
    .await
    .expect("send_message must not block past cancellation");
    assert!(matches!(result, Err(RelayError::Cancelled)));

    client.shutdown().await;
    hub.shutdown().await.unwrap();
}

/// Shutdown closes every forwarder exactly once.
#[tokio::test]
async fn test_shutdown_closes_forwarders() {
    let (hub, _to_cloud) = start_hub(RelayConfig::default()).await;
    let a = start_client(&hub, "a", Duration::from_secs(60)).await;
    let b = start_client(&hub, "b", Duration::from_secs(60)).await;

    let registry = hub.registry().clone();
    wait_for(|| {
        let registry = registry.clone();
        async move { registry.len().await == 2 }
    })
    .await;
    let forwarders = vec![
        registry.get("a").await.unwrap(),
        registry.get("b").await.unwrap(),
    ];

    a.shutdown().await;
    b.shutdown().await;
    hub.shutdown().await.unwrap();

    for forwarder in forwarders {
        assert!(forwarder.is_closed());
        assert!(matches!(
            forwarder.close().await,
            Err(RelayError::AlreadyClosed)
        ));
    }
}
