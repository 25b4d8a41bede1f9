//! Reception core for lease-based message brokers
//!
//! Brokers such as SQS lock a delivered message to one consumer for a bounded
//! visibility window. This library provides the consumer-side pieces that sit
//! between the broker adapter and a message-processing pipeline:
//!
//! - a receive context per delivered message (body, headers, timing,
//!   consumer notifications),
//! - background lease renewal with adaptive intervals and failure
//!   classification,
//! - completion tracking of the asynchronous work spawned while handling the
//!   message,
//! - settlement of the message as completed, faulted, or lock-lost.
//!

// Import all sub modules once...
mod context;
mod domain;
mod lock;
mod transport;

mod completion;
mod context_builder;
mod error;
mod handle;
mod macros;
mod observer;
mod settings;
mod util;

pub(crate) use macros::{log_debug, log_error, log_info, log_warn};

// Re-export main types
pub use context::{
    //
    BodyStream,
    LeasedReceiveContext,
    ReceiveContext,
    ReceiveLockContext,
};
pub use context_builder::ReceiveContextBuilder;

pub use completion::CompletionTracker;
pub use lock::{
    //
    LeaseRenewalController,
    LockState,
    RenewalHandle,
    RenewalPolicy,
    RenewalState,
    RenewalStatus,
    Settlement,
    StopReason,
};

pub use observer::{
    //
    ConsumeRecord,
    Disposition,
    ReceiveEvent,
    ReceiveObserver,
    ReceiveObserverPtr,
};

pub use settings::{
    //
    ReceiveSettings,
    DEFAULT_RENEWAL_FACTOR,
    DEFAULT_TRANSIENT_RETRY_DELAY,
    DEFAULT_VISIBILITY_TIMEOUT,
    MAX_VISIBILITY_TIMEOUT,
};

pub use error::{BrokerError, ReceiveError, Result, SharedError};
pub use handle::MessageHandle;

pub use transport::{create_memory_broker, MemoryBroker, RECEIVE_COUNT_ATTRIBUTE};

// --- public re-exports
pub use domain::{
    //
    Address,
    BrokerAdapter,
    BrokerAdapterPtr,
    DeliveredMessage,
    Headers,
    MessageBody,
};
