//! The hub: one pull socket shared by every attached service, a registry
//! of forwarders back to them, and the link to the cloud.
//!
//! ```text
//! services ─► PullSocket ─► read_pump ─► parse_pump ─► Dispatcher ─┬─► Registry
//!                                                                  └─► Upstream
//! cloud ─► Router ─► Registry ─► Forwarder ─► PushSocket ─► service
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use wrp_relay::hub::{ChannelUpstream, Hub, RelayConfig};
//!
//! # async fn run() -> wrp_relay::Result<()> {
//! let (upstream, mut to_cloud) = ChannelUpstream::new(100);
//! let hub = Hub::start(RelayConfig::default(), Arc::new(upstream)).await?;
//!
//! while let Some(msg) = to_cloud.recv().await {
//!     println!("{msg:?}");
//! }
//! hub.shutdown().await
//! # }
//! ```

mod dispatch;
mod forwarder;
mod reaper;
mod registry;
mod router;
mod upstream;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::access::block_by_partner_id;
use crate::error::{RelayError, Result};
use crate::pump::{parse_pump, read_pump, DEFAULT_QUEUE_CAPACITY};
use crate::transport::{Endpoint, PullConfig, PullSocket, PushConfig};

pub use dispatch::Dispatcher;
pub use forwarder::{Forwarder, ForwarderConfig, DEFAULT_HEARTBEAT_INTERVAL};
pub use registry::{Registration, Registry};
pub use router::Router;
pub use upstream::{ChannelUpstream, Upstream};

/// Default address services push to.
pub const DEFAULT_LOCAL_URL: &str = "tcp://127.0.0.1:6666";

/// Runtime settings of the relay itself.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address of the shared pull socket.
    pub local_url: String,
    /// Capacity of every internal queue.
    pub queue_capacity: usize,
    /// Interval between heartbeat probes to each service.
    pub heartbeat_interval: Duration,
    /// Time a send to a service may wait for queue space.
    pub send_timeout: Duration,
    /// Evict services silent for this long. `None` keeps them forever.
    pub service_ttl: Option<Duration>,
    /// Only route cloud messages carrying this partner id.
    pub partner_id: Option<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            local_url: DEFAULT_LOCAL_URL.to_string(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            send_timeout: Duration::from_secs(5),
            service_ttl: None,
            partner_id: None,
        }
    }
}

impl RelayConfig {
    /// Settings for the forwarders this relay creates.
    pub fn forwarder_config(&self) -> ForwarderConfig {
        ForwarderConfig {
            heartbeat_interval: self.heartbeat_interval,
            push: PushConfig::default()
                .with_queue_capacity(self.queue_capacity)
                .with_send_timeout(self.send_timeout),
        }
    }
}

/// A running hub.
pub struct Hub {
    registry: Arc<Registry>,
    router: Arc<Router>,
    upstream: Arc<dyn Upstream>,
    local_addr: SocketAddr,
    stop: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Hub {
    /// Bind the local pull socket and start the pipeline.
    pub async fn start(config: RelayConfig, upstream: Arc<dyn Upstream>) -> Result<Self> {
        if config.queue_capacity == 0 {
            return Err(RelayError::Config(
                "queue capacity must be at least 1".to_string(),
            ));
        }

        let endpoint = Endpoint::parse(&config.local_url)?;
        let pull = PullSocket::listen(
            &endpoint,
            PullConfig::default().with_backlog(config.queue_capacity),
        )
        .await?;
        let local_addr = pull.local_addr();

        let registry = Arc::new(Registry::new(config.forwarder_config()));
        let stop = CancellationToken::new();

        let (frame_tx, frame_rx) = mpsc::channel(config.queue_capacity);
        let (msg_tx, msg_rx) = mpsc::channel(config.queue_capacity);

        let mut tasks = vec![
            tokio::spawn(read_pump(pull, frame_tx, stop.clone())),
            tokio::spawn(parse_pump(frame_rx, msg_tx, stop.clone())),
            tokio::spawn(
                Dispatcher::new(registry.clone(), upstream.clone()).run(msg_rx, stop.clone()),
            ),
        ];

        if let Some(ttl) = config.service_ttl.filter(|ttl| !ttl.is_zero()) {
            tasks.push(tokio::spawn(reaper::reap_loop(
                registry.clone(),
                ttl,
                stop.clone(),
            )));
        }

        let mut router = Router::new(registry.clone(), upstream.clone());
        if let Some(partner_id) = config.partner_id.as_deref().filter(|p| !p.is_empty()) {
            router = router.with_filter(block_by_partner_id(partner_id));
        }

        tracing::info!(%local_addr, "hub listening");

        Ok(Self {
            registry,
            router: Arc::new(router),
            upstream,
            local_addr,
            stop,
            tasks,
        })
    }

    /// Address the pull socket is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Registered services.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Entry point for cloud-originated messages.
    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// Stop every task, close every forwarder, then close the upstream.
    pub async fn shutdown(self) -> Result<()> {
        self.stop.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::warn!("hub task ended abnormally: {}", e);
            }
        }

        self.registry.shutdown().await;
        self.upstream.close()?;

        tracing::info!("hub stopped");
        Ok(())
    }
}
