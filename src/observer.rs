//! Receive observers.
//!
//! Observers are notified about consumer outcomes and about the final
//! disposition of every message. They are purely informational: an observer
//! cannot change how a message is settled, and a slow observer delays only the
//! notification call that invoked it.

use std::sync::Arc;
use std::time::Duration;

use crate::{MessageHandle, SharedError};

/// Outcome of one consumer handling the message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumeRecord {
    /// Consumer type name, as reported by the pipeline.
    pub consumer_type: Arc<str>,

    /// Message type the consumer was invoked for.
    pub message_type: Arc<str>,

    /// Time spent in the consumer.
    pub duration: Duration,
}

impl ConsumeRecord {
    pub fn new(
        consumer_type: impl Into<Arc<str>>,
        message_type: impl Into<Arc<str>>,
        duration: Duration,
    ) -> Self {
        Self {
            consumer_type: consumer_type.into(),
            message_type: message_type.into(),
            duration,
        }
    }
}

/// One recording made on a receive context, in call order.
#[derive(Debug, Clone)]
pub enum ReceiveEvent {
    /// A consumer finished successfully.
    Consumed(ConsumeRecord),

    /// A consumer failed.
    ConsumeFaulted(ConsumeRecord, SharedError),

    /// Receiving failed outside of any consumer (e.g. deserialization).
    ReceiveFaulted(SharedError),
}

/// Final disposition of a message, reported exactly once.
#[derive(Debug, Clone)]
pub enum Disposition {
    /// Deleted from the broker.
    Completed,

    /// Released back to the broker; carries the original fault.
    Faulted(SharedError),

    /// The lease was lost before the message could be settled. Carries the
    /// original fault when the message was being faulted.
    LockLost { fault: Option<SharedError> },
}

/// Listener for receive-side notifications.
///
/// Every hook has a no-op default so observers implement only what they need.
#[async_trait::async_trait]
pub trait ReceiveObserver: Send + Sync {
    async fn post_consume(&self, _handle: &MessageHandle, _record: &ConsumeRecord) {}

    async fn consume_fault(
        &self,
        _handle: &MessageHandle,
        _record: &ConsumeRecord,
        _error: &SharedError,
    ) {
    }

    async fn receive_fault(&self, _handle: &MessageHandle, _error: &SharedError) {}

    /// Called once the message has been settled.
    async fn settled(&self, _handle: &MessageHandle, _disposition: &Disposition) {}
}

/// Shared observer pointer.
pub type ReceiveObserverPtr = Arc<dyn ReceiveObserver>;
