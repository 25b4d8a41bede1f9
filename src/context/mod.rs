//! Receive context contracts.
//!
//! A received message is exposed to the processing pipeline through two
//! narrow capability traits implemented by one concrete type:
//!
//! - [`ReceiveContext`]: body and header access, timing, consumer
//!   notifications and the aggregate receive completion.
//! - [`ReceiveLockContext`]: the terminal operations that settle the message
//!   with the broker, and the lock check that guards exclusive side effects.
//!
//! Pipeline components that only read the message depend on the first;
//! the component that settles the message depends on the second.

mod leased;

use std::io::Cursor;
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;

use crate::{Address, ConsumeRecord, Headers, Result, SharedError};

pub use leased::LeasedReceiveContext;

/// Independent readable view over a message body.
///
/// Implements both `std::io::Read` and `tokio::io::AsyncRead`.
pub type BodyStream = Cursor<Bytes>;

/// Per-message contract consumed by the processing pipeline.
#[async_trait::async_trait]
pub trait ReceiveContext: Send + Sync {
    // ---
    /// Time elapsed since the message was handed to the reception core.
    fn elapsed_time(&self) -> Duration;

    /// Address the message was received on.
    fn input_address(&self) -> &Address;

    /// Content type from the transport headers, if any.
    fn content_type(&self) -> Option<&str>;

    /// True if the broker reports this is a redelivery.
    fn redelivered(&self) -> bool;

    /// Native headers of the broker envelope.
    fn transport_headers(&self) -> &Headers;

    /// True once a consumer reported success (and nothing faulted first).
    fn is_delivered(&self) -> bool;

    /// True once a fault was reported (and nothing was delivered first).
    fn is_faulted(&self) -> bool;

    /// Message body, materialized on first access and cached afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`ReceiveError::UnsupportedMessageFormat`](crate::ReceiveError::UnsupportedMessageFormat)
    /// if the broker envelope carries no body.
    fn body(&self) -> Result<Bytes>;

    /// A new stream over the body. Each call returns an independent reader.
    fn body_stream(&self) -> Result<BodyStream>;

    /// Record that a consumer handled the message.
    async fn notify_consumed(&self, record: ConsumeRecord);

    /// Record that a consumer failed to handle the message.
    async fn notify_faulted(&self, record: ConsumeRecord, error: SharedError);

    /// Record a fault that happened outside of any consumer.
    async fn notify_receive_faulted(&self, error: SharedError);

    /// Track a task that must finish before the receive is complete.
    ///
    /// # Errors
    ///
    /// Returns [`ReceiveError::ReceiveCompleted`](crate::ReceiveError::ReceiveCompleted)
    /// once [`receive_completed`](Self::receive_completed) has resolved.
    fn add_receive_task(&self, task: BoxFuture<'static, ()>) -> Result<()>;

    /// Resolves when every receive task has finished and the message was
    /// settled.
    fn receive_completed(&self) -> BoxFuture<'static, ()>;
}

/// Terminal operations on a leased message.
#[async_trait::async_trait]
pub trait ReceiveLockContext: Send + Sync {
    // ---
    /// Stop lease renewal and delete the message from the broker.
    ///
    /// Only the first terminal operation takes effect; later calls are
    /// ignored. Once the lease is known to be lost the message is not
    /// deleted: it may already belong to another consumer, and it settles as
    /// [`Disposition::LockLost`](crate::Disposition::LockLost).
    async fn complete(&self);

    /// Stop lease renewal and release the message so another consumer can
    /// retry it right away.
    ///
    /// A failing release is logged and never replaces `error`, which is what
    /// observers receive. After a lost lease nothing is released and `error`
    /// travels with the lock-lost disposition.
    async fn faulted(&self, error: SharedError);

    /// Fail with [`ReceiveError::MessageLockLost`](crate::ReceiveError::MessageLockLost)
    /// if the lease is known to be lost.
    fn validate_lock_status(&self) -> Result<()>;
}
