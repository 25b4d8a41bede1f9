// src/domain/broker.rs

//! Broker domain abstractions.
//!
//! This module defines the interface the reception core uses to talk to a
//! lease-based broker. It intentionally avoids any reference to concrete
//! protocols, SDKs, or queue services.
//!
//! The adapter is responsible only for the network operations on a leased
//! message: extending the lease, deleting (acknowledging) the message and
//! releasing it back to the queue. Deciding *when* to call them is the job of
//! the lease renewal controller and the terminal operations on the receive
//! context.
//!
//! Concrete implementations of this interface live under `src/transport/`.
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::{BrokerError, MessageHandle};

/// The address a message was received on.
///
/// Its interpretation is broker-specific (queue URL, entity path, topic
/// subscription), but it is treated as an opaque identifier at the domain
/// level. Addresses are immutable, cheap to clone, and safe to share across
/// threads.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Address(pub Arc<str>);

impl<T> From<T> for Address
where
    T: Into<Arc<str>>,
{
    fn from(value: T) -> Self {
        // ---
        Address(value.into())
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Body of a delivered message, as the broker handed it over.
///
/// Queue services that deliver text bodies (SQS-style) use [`Text`]; the
/// bytes are only materialized when a consumer asks for them.
///
/// [`Text`]: MessageBody::Text
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MessageBody {
    /// UTF-8 text body
    Text(String),

    /// Raw binary body
    Binary(Bytes),
}

impl MessageBody {
    /// Materialize the body as bytes.
    pub fn to_bytes(&self) -> Bytes {
        // ---
        match self {
            MessageBody::Text(text) => Bytes::copy_from_slice(text.as_bytes()),
            MessageBody::Binary(bytes) => bytes.clone(),
        }
    }
}

/// A message currently leased to this consumer.
///
/// Produced by the broker adapter when a message is dequeued and handed to
/// the reception core. The reception core never fetches messages itself.
#[derive(Clone, Debug)]
pub struct DeliveredMessage {
    // ---
    /// Receipt handle of this delivery attempt.
    pub handle: MessageHandle,

    /// Message body, `None` when the broker envelope carries no body.
    pub body: Option<MessageBody>,

    /// True when the broker reports this is not the first delivery.
    pub redelivered: bool,

    /// Native broker attributes, in broker order.
    pub attributes: Vec<(String, String)>,
}

impl DeliveredMessage {
    /// Create a first-delivery message with a body and no attributes.
    pub fn new(handle: MessageHandle, body: MessageBody) -> Self {
        // ---
        Self {
            handle,
            body: Some(body),
            redelivered: false,
            attributes: Vec::new(),
        }
    }

    /// Mark the message as redelivered.
    pub fn with_redelivered(mut self, redelivered: bool) -> Self {
        self.redelivered = redelivered;
        self
    }

    /// Append a native attribute.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((key.into(), value.into()));
        self
    }
}

/// Broker adapter abstraction.
///
/// Implementations must ensure that:
/// - `extend_lock()` reports [`BrokerError::LockAlreadyGone`] when the
///   message is no longer in flight or the handle is invalid. The renewal
///   controller treats that as unrecoverable for this delivery.
/// - `extend_lock()` reports [`BrokerError::Transient`] for throttling and
///   connectivity problems and [`BrokerError::Timeout`] when the call timed
///   out. Both are retried.
/// - `release_message()` makes the message visible to other consumers
///   immediately.
///
/// The in-memory broker serves as the reference implementation of these
/// semantics.
///
/// # Notes
///
/// This trait uses `async_trait`; the expanded documentation may show explicit
/// lifetimes and a boxed `Future`. Consumers should treat methods as normal
/// `async fn`s.
#[async_trait::async_trait]
pub trait BrokerAdapter: Send + Sync {
    // ---
    /// Extend the lease on a message to `timeout` from now.
    async fn extend_lock(
        &self,
        handle: &MessageHandle,
        timeout: Duration,
    ) -> std::result::Result<(), BrokerError>;

    /// Delete (acknowledge) a message.
    async fn delete_message(&self, handle: &MessageHandle) -> std::result::Result<(), BrokerError>;

    /// Release a message so it is immediately visible to other consumers.
    async fn release_message(&self, handle: &MessageHandle)
        -> std::result::Result<(), BrokerError>;

    /// Native headers of a delivered message, in broker order.
    ///
    /// The default implementation returns the message attributes unchanged.
    fn native_headers(&self, message: &DeliveredMessage) -> Vec<(String, String)> {
        message.attributes.clone()
    }
}

/// Shared broker adapter pointer.
///
/// Cloning only bumps a reference count; every receive context of one
/// endpoint shares the same adapter.
pub type BrokerAdapterPtr = Arc<dyn BrokerAdapter>;
