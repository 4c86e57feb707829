//! # wrp-relay
//!
//! Local WRP message relay ("hub") bridging one upstream cloud connection to
//! a dynamic set of locally attached services.
//!
//! ## Architecture
//!
//! - **Transport**: SP push/pull sockets over TCP, nanomsg-compatible framing
//! - **Pumps**: read (socket → frames), parse (frames → messages), write
//!   (messages → socket), joined by bounded queues
//! - **Hub**: dispatcher, forwarder registry with heartbeats, cloud router
//! - **Client**: the service-side counterpart that registers and answers
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use wrp_relay::client::Client;
//! use wrp_relay::handler::handler_fn;
//! use wrp_relay::hub::{ChannelUpstream, Hub, RelayConfig};
//! use wrp_relay::message::create_response;
//!
//! #[tokio::main]
//! async fn main() -> wrp_relay::Result<()> {
//!     let (upstream, _to_cloud) = ChannelUpstream::new(100);
//!     let hub = Hub::start(RelayConfig::default(), Arc::new(upstream)).await?;
//!
//!     let client = Client::builder()
//!         .name("config")
//!         .handler(handler_fn(|msg| async move { Some(create_response(&msg)) }))
//!         .start()
//!         .await?;
//!
//!     client.shutdown().await;
//!     hub.shutdown().await
//! }
//! ```

pub mod access;
pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod handler;
pub mod hub;
pub mod message;
pub mod protocol;
pub mod pump;
pub mod transport;

pub use client::{Client, ClientBuilder};
pub use error::{RelayError, Result};
pub use hub::{Hub, RelayConfig};
pub use message::{Message, MessageType};
