// src/transport/memory/broker.rs

//! In-memory broker implementation.
//!
//! This file contains the concrete implementation of the domain-level
//! `BrokerAdapter` trait using in-process data structures only.
//!
//! The memory broker is the **reference implementation** of lease semantics.
//! Other adapters are expected to approximate this behavior as closely as
//! their underlying brokers allow and to document any unavoidable
//! deviations.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

use crate::util::lock_ignore_poison;
use crate::{
    // ---
    BrokerAdapter,
    BrokerError,
    DeliveredMessage,
    MessageBody,
    MessageHandle,
};

/// Attribute carrying how many times a message has been received.
pub const RECEIVE_COUNT_ATTRIBUTE: &str = "ReceiveCount";

#[derive(Debug, Clone)]
struct StoredMessage {
    body: Option<MessageBody>,
    attributes: Vec<(String, String)>,
    receive_count: u32,
}

#[derive(Debug)]
struct Leased {
    message: StoredMessage,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct State {
    ready: VecDeque<StoredMessage>,
    in_flight: HashMap<MessageHandle, Leased>,
    deleted: usize,
}

impl State {
    /// Return every expired lease to the front of the ready queue.
    fn reclaim_expired(&mut self, now: Instant) {
        // ---
        let expired: Vec<MessageHandle> = self
            .in_flight
            .iter()
            .filter(|(_, leased)| leased.expires_at <= now)
            .map(|(handle, _)| handle.clone())
            .collect();

        for handle in expired {
            if let Some(leased) = self.in_flight.remove(&handle) {
                crate::log_debug!("lease {handle} expired, message visible again");
                self.ready.push_front(leased.message);
            }
        }
    }
}

/// In-memory lease-based broker.
///
/// This broker simulates an SQS-style queue entirely within the process.
/// It is intended for testing and for running the reception core without a
/// real broker.
///
/// ## Semantics
///
/// - `receive()` leases the oldest visible message for the default
///   visibility timeout and hands out a fresh receipt handle.
/// - An expired lease makes the message visible again; its old handle can no
///   longer extend, delete or release it.
/// - `release_message()` makes the message visible again immediately.
/// - Time is measured with `tokio::time`, so paused test clocks apply.
///
/// ## Non-Goals
///
/// - Persistence or durability
/// - Network failure simulation
/// - Dead-letter queues or receive limits
#[derive(Debug)]
pub struct MemoryBroker {
    // ---
    visibility_timeout: Duration,
    state: Mutex<State>,
}

impl MemoryBroker {
    /// Create an empty broker leasing messages for `visibility_timeout`.
    pub fn new(visibility_timeout: Duration) -> Self {
        Self {
            visibility_timeout,
            state: Mutex::new(State::default()),
        }
    }

    /// Enqueue a message.
    pub fn enqueue(&self, body: MessageBody, attributes: Vec<(String, String)>) {
        // ---
        let mut state = lock_ignore_poison(&self.state);
        state.ready.push_back(StoredMessage {
            body: Some(body),
            attributes,
            receive_count: 0,
        });
    }

    /// Enqueue a text message without attributes.
    pub fn enqueue_text(&self, body: impl Into<String>) {
        self.enqueue(MessageBody::Text(body.into()), Vec::new());
    }

    /// Lease the next visible message, if any.
    pub fn receive(&self) -> Option<DeliveredMessage> {
        // ---
        let now = Instant::now();
        let mut state = lock_ignore_poison(&self.state);
        state.reclaim_expired(now);

        let mut message = state.ready.pop_front()?;
        message.receive_count += 1;

        let handle = MessageHandle::generate();
        let mut attributes = message.attributes.clone();
        attributes.push((
            RECEIVE_COUNT_ATTRIBUTE.to_string(),
            message.receive_count.to_string(),
        ));

        let delivered = DeliveredMessage {
            handle: handle.clone(),
            body: message.body.clone(),
            redelivered: message.receive_count > 1,
            attributes,
        };

        state.in_flight.insert(
            handle,
            Leased {
                message,
                expires_at: now + self.visibility_timeout,
            },
        );

        Some(delivered)
    }

    /// Messages waiting to be received (expired leases included).
    pub fn ready_len(&self) -> usize {
        // ---
        let mut state = lock_ignore_poison(&self.state);
        state.reclaim_expired(Instant::now());
        state.ready.len()
    }

    /// Messages currently leased.
    pub fn in_flight_len(&self) -> usize {
        // ---
        let mut state = lock_ignore_poison(&self.state);
        state.reclaim_expired(Instant::now());
        state.in_flight.len()
    }

    /// Messages deleted so far.
    pub fn deleted_count(&self) -> usize {
        lock_ignore_poison(&self.state).deleted
    }

    /// Remaining lease of a handle, `None` if it is not (or no longer) leased.
    pub fn lease_remaining(&self, handle: &MessageHandle) -> Option<Duration> {
        // ---
        let now = Instant::now();
        let state = lock_ignore_poison(&self.state);
        state
            .in_flight
            .get(handle)
            .filter(|leased| leased.expires_at > now)
            .map(|leased| leased.expires_at - now)
    }
}

fn invalid_handle(handle: &MessageHandle) -> BrokerError {
    BrokerError::LockAlreadyGone(format!("receipt handle is invalid: {handle}"))
}

#[async_trait::async_trait]
impl BrokerAdapter for MemoryBroker {
    // ---

    /// Reset the lease of an in-flight message to `timeout` from now.
    ///
    /// An expired lease is reclaimed first, so extending it reports
    /// `LockAlreadyGone`.
    async fn extend_lock(
        &self,
        handle: &MessageHandle,
        timeout: Duration,
    ) -> std::result::Result<(), BrokerError> {
        // ---
        let now = Instant::now();
        let mut state = lock_ignore_poison(&self.state);

        let expired = match state.in_flight.get_mut(handle) {
            None => return Err(invalid_handle(handle)),
            Some(leased) if leased.expires_at <= now => true,
            Some(leased) => {
                leased.expires_at = now + timeout;
                false
            }
        };

        if expired {
            state.reclaim_expired(now);
            return Err(BrokerError::LockAlreadyGone(format!(
                "message is no longer in flight: {handle}"
            )));
        }

        Ok(())
    }

    async fn delete_message(&self, handle: &MessageHandle) -> std::result::Result<(), BrokerError> {
        // ---
        let mut state = lock_ignore_poison(&self.state);
        state.reclaim_expired(Instant::now());

        match state.in_flight.remove(handle) {
            Some(_) => {
                state.deleted += 1;
                Ok(())
            }
            None => Err(invalid_handle(handle)),
        }
    }

    async fn release_message(
        &self,
        handle: &MessageHandle,
    ) -> std::result::Result<(), BrokerError> {
        // ---
        let mut state = lock_ignore_poison(&self.state);
        state.reclaim_expired(Instant::now());

        match state.in_flight.remove(handle) {
            Some(leased) => {
                state.ready.push_front(leased.message);
                Ok(())
            }
            None => Err(invalid_handle(handle)),
        }
    }
}

/// Create a new in-memory broker.
///
/// This broker is always available and requires no external resources.
pub fn create_memory_broker(visibility_timeout: Duration) -> Arc<MemoryBroker> {
    Arc::new(MemoryBroker::new(visibility_timeout))
}
