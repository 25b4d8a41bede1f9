//! Domain layer public interface.
//!
//! This module defines the broker-facing abstractions that are independent of
//! any concrete broker, wire protocol, or client library.
//!
//! All domain consumers must import symbols via this module, not by
//! referencing individual files directly.

mod broker;
mod headers;

// --- Broker domain re-exports ---

pub use broker::{
    //
    Address,
    BrokerAdapter,
    BrokerAdapterPtr,
    DeliveredMessage,
    MessageBody,
};

pub use headers::Headers;
