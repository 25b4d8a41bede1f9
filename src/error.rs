use std::sync::Arc;

use thiserror::Error;

use crate::MessageHandle;

/// Application-level error shared between the pipeline, observers and logs.
///
/// Faults are reported to several listeners, so the original error is kept
/// behind an `Arc` rather than boxed once and moved.
pub type SharedError = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced by the reception core to its callers.
#[derive(Error, Debug)]
pub enum ReceiveError {
    /// The broker envelope carries no body that can be materialized
    #[error("the message format is not supported: {0}")]
    UnsupportedMessageFormat(String),

    /// The broker lock on the message was lost; the message may already be
    /// delivered to another consumer
    #[error("message lock lost: {handle}")]
    MessageLockLost { handle: MessageHandle },

    /// A receive task was added after the aggregate completion resolved
    #[error("receive already completed; no further receive tasks may be added")]
    ReceiveCompleted,

    /// Settings rejected by validation
    #[error("invalid receive settings: {0}")]
    InvalidSettings(String),

    /// Broker adapter failure surfaced to the caller
    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),
}

/// Failures reported by a [`BrokerAdapter`](crate::BrokerAdapter).
///
/// The lease renewal controller classifies its reaction on these variants,
/// so adapters must map their native errors onto them carefully.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// The message is no longer in flight or the lock handle is invalid
    #[error("message lock already gone: {0}")]
    LockAlreadyGone(String),

    /// Recoverable broker failure (throttling, connectivity)
    #[error("transient broker error: {0}")]
    Transient(String),

    /// The broker call did not complete in time
    #[error("broker call timed out")]
    Timeout,

    /// The broker call was cancelled
    #[error("broker call cancelled")]
    Cancelled,

    /// Anything the adapter could not classify
    #[error("broker error: {0}")]
    Other(String),
}

/// Result type alias for reception operations
pub type Result<T> = std::result::Result<T, ReceiveError>;
