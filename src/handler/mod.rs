//! Handler module - the one-method capability behind every message consumer.
//!
//! Provides:
//! - [`MessageHandler`] - takes a message, maybe returns a reply
//! - [`handler_fn`] - adapts an async closure
//! - [`Unimplemented`] - the hub's default, answering 501
//!
//! # Example
//!
//! ```
//! use wrp_relay::handler::{handler_fn, MessageHandler};
//! use wrp_relay::message::create_response;
//!
//! let echo = handler_fn(|msg| async move { Some(create_response(&msg)) });
//! # let _ = &echo as &dyn MessageHandler;
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::message::{status, Message};

/// Boxed future for handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Something that consumes a message and may produce a reply.
pub trait MessageHandler: Send + Sync + 'static {
    /// Handle `msg`. A returned message is sent back toward its destination.
    fn handle_message(&self, msg: Message) -> BoxFuture<'_, Option<Message>>;
}

impl<H: MessageHandler + ?Sized> MessageHandler for Arc<H> {
    fn handle_message(&self, msg: Message) -> BoxFuture<'_, Option<Message>> {
        (**self).handle_message(msg)
    }
}

/// Handler backed by an async closure. Built with [`handler_fn`].
pub struct HandlerFn<F> {
    f: F,
}

impl<F, Fut> MessageHandler for HandlerFn<F>
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Option<Message>> + Send + 'static,
{
    fn handle_message(&self, msg: Message) -> BoxFuture<'_, Option<Message>> {
        Box::pin((self.f)(msg))
    }
}

/// Wrap an async closure as a [`MessageHandler`].
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Option<Message>> + Send + 'static,
{
    HandlerFn { f }
}

/// Answers every message with a 501 error reply.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unimplemented;

impl MessageHandler for Unimplemented {
    fn handle_message(&self, msg: Message) -> BoxFuture<'_, Option<Message>> {
        Box::pin(async move {
            tracing::debug!(
                destination = %msg.destination,
                transaction_uuid = %msg.transaction_uuid,
                "no handler for message"
            );
            Some(msg.error_reply(status::NOT_IMPLEMENTED, "Unimplemented"))
        })
    }
}
