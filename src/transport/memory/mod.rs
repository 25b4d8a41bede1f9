// src/transport/memory/mod.rs

//! In-memory broker adapter.
//!
//! This module provides a pure in-process implementation of the domain-level
//! `BrokerAdapter` trait. It is intended primarily for testing, local
//! execution, and as a reference for lease semantics.
//!
//! ## Reference Semantics
//!
//! The in-memory broker establishes the following expectations for adapters:
//!
//! - A lease that ran out cannot be extended; the adapter reports
//!   `LockAlreadyGone`.
//! - A receipt handle is valid for exactly one delivery attempt.
//! - Releasing a message makes it visible to the next `receive()` at once.
//!
//! ## Non-Goals
//!
//! This broker does not attempt to emulate the failure modes or delivery
//! guarantees of any specific queue service. It exists to provide a clear,
//! deterministic baseline against which the reception core can be validated.

mod broker;

pub use broker::{create_memory_broker, MemoryBroker, RECEIVE_COUNT_ATTRIBUTE};
