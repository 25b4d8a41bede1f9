//! Broker adapter implementations.
//!
//! This module provides concrete implementations of the domain-level
//! `BrokerAdapter` trait. Network adapters for specific queue services live
//! outside this crate and only need to implement the trait.
//!
//! Domain code must not depend on adapter-specific types.

mod memory;

pub use memory::{create_memory_broker, MemoryBroker, RECEIVE_COUNT_ATTRIBUTE};
