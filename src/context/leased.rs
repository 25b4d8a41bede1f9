// src/context/leased.rs

//! Receive context for messages delivered under a broker lease.
//!
//! The context starts a [`LeaseRenewalController`] as soon as it is created
//! and owns the cancellation token that stops it. The controller and the
//! terminal operations only meet through [`LockState`]:
//!
//! - a terminal operation records the settlement, then cancels the
//!   controller, then talks to the broker;
//! - the controller, on losing the lease, disables the lock and cancels
//!   itself before any later terminal operation can see the lock as held.
//!
//! Dropping the context cancels the controller.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::{BodyStream, ReceiveContext, ReceiveLockContext};
use crate::util::lock_ignore_poison;
use crate::{
    // ---
    Address,
    BrokerAdapterPtr,
    BrokerError,
    CompletionTracker,
    ConsumeRecord,
    DeliveredMessage,
    Disposition,
    Headers,
    LeaseRenewalController,
    LockState,
    MessageHandle,
    ReceiveError,
    ReceiveEvent,
    ReceiveObserverPtr,
    ReceiveSettings,
    RenewalHandle,
    RenewalPolicy,
    Result,
    Settlement,
    SharedError,
};

const NOT_REPORTED: u8 = 0;
const DELIVERED: u8 = 1;
const FAULTED: u8 = 2;

/// Receive context of one leased message.
///
/// Created through [`ReceiveContextBuilder`](crate::ReceiveContextBuilder).
/// Exactly one context exists per delivery; a redelivered message gets a new
/// context.
pub struct LeasedReceiveContext {
    message: DeliveredMessage,
    adapter: BrokerAdapterPtr,
    input_address: Address,
    received_at: Instant,
    headers: Headers,
    content_type: Option<Arc<str>>,
    body: OnceLock<Bytes>,

    // Delivery outcome: the first report decides it
    outcome: AtomicU8,
    events: Mutex<Vec<ReceiveEvent>>,
    observers: Vec<ReceiveObserverPtr>,

    lock: LockState,
    tracker: CompletionTracker,
    cancel: CancellationToken,
    renewal: RenewalHandle,
}

impl LeasedReceiveContext {
    /// Create the context and start lease renewal (internal use by
    /// ReceiveContextBuilder).
    ///
    /// Must be called from within a tokio runtime.
    pub(crate) fn start(
        message: DeliveredMessage,
        adapter: BrokerAdapterPtr,
        settings: &ReceiveSettings,
        observers: Vec<ReceiveObserverPtr>,
    ) -> Self {
        // ---
        let received_at = Instant::now();
        let headers = Headers::from_pairs(adapter.native_headers(&message));
        let content_type = headers.get_ignore_case("Content-Type").map(Arc::from);

        let lock = LockState::new(message.handle.clone());
        let cancel = CancellationToken::new();

        let renewal = LeaseRenewalController::spawn(
            adapter.clone(),
            lock.clone(),
            cancel.clone(),
            received_at,
            RenewalPolicy::from(settings),
        );

        crate::log_debug!(
            "receiving message {} on {} (redelivered: {})",
            message.handle,
            settings.input_address,
            message.redelivered
        );

        Self {
            message,
            adapter,
            input_address: settings.input_address.clone(),
            received_at,
            headers,
            content_type,
            body: OnceLock::new(),
            outcome: AtomicU8::new(NOT_REPORTED),
            events: Mutex::new(Vec::new()),
            observers,
            lock,
            tracker: CompletionTracker::new(),
            cancel,
            renewal,
        }
    }

    /// Receipt handle of this delivery.
    pub fn handle(&self) -> &MessageHandle {
        &self.message.handle
    }

    /// The message as the broker delivered it.
    pub fn message(&self) -> &DeliveredMessage {
        &self.message
    }

    /// Lease renewal status of this message.
    pub fn renewal(&self) -> &RenewalHandle {
        &self.renewal
    }

    /// Token cancelled the moment the lease is lost.
    ///
    /// Long-running consumers can select on it instead of polling
    /// [`validate_lock_status`](ReceiveLockContext::validate_lock_status).
    pub fn lock_lost(&self) -> CancellationToken {
        self.lock.lost_token()
    }

    /// True while the lease is believed valid.
    pub fn is_locked(&self) -> bool {
        self.lock.is_locked()
    }

    /// Disposition recorded by the terminal operations, if any.
    pub fn settlement(&self) -> Option<Settlement> {
        self.lock.settlement()
    }

    /// Snapshot of every consume and fault recording, in call order.
    pub fn receive_events(&self) -> Vec<ReceiveEvent> {
        lock_ignore_poison(&self.events).clone()
    }

    /// Number of receive tasks still running.
    pub fn pending_tasks(&self) -> usize {
        self.tracker.pending()
    }

    fn record(&self, event: ReceiveEvent, outcome: u8) {
        // ---
        lock_ignore_poison(&self.events).push(event);

        // Delivered and faulted are exclusive; later reports are only recorded
        let _ = self.outcome.compare_exchange(
            NOT_REPORTED,
            outcome,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    async fn notify_settled(&self, disposition: Disposition) {
        // ---
        for observer in &self.observers {
            observer.settled(self.handle(), &disposition).await;
        }
    }

    /// Record the settlement, or report why it was skipped.
    fn begin_settlement(&self, wanted: Settlement) -> Option<Settlement> {
        // ---
        let settlement = if self.lock.is_locked() {
            wanted
        } else {
            Settlement::LockLost
        };

        if self.lock.try_settle(settlement) {
            Some(settlement)
        } else {
            crate::log_debug!(
                "message {} already settled as {:?}, ignoring {:?}",
                self.handle(),
                self.lock.settlement(),
                wanted
            );
            None
        }
    }
}

#[async_trait::async_trait]
impl ReceiveContext for LeasedReceiveContext {
    // ---
    fn elapsed_time(&self) -> Duration {
        self.received_at.elapsed()
    }

    fn input_address(&self) -> &Address {
        &self.input_address
    }

    fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    fn redelivered(&self) -> bool {
        self.message.redelivered
    }

    fn transport_headers(&self) -> &Headers {
        &self.headers
    }

    fn is_delivered(&self) -> bool {
        self.outcome.load(Ordering::Acquire) == DELIVERED
    }

    fn is_faulted(&self) -> bool {
        self.outcome.load(Ordering::Acquire) == FAULTED
    }

    fn body(&self) -> Result<Bytes> {
        // ---
        let body = self.message.body.as_ref().ok_or_else(|| {
            ReceiveError::UnsupportedMessageFormat(format!(
                "message {} carries no body",
                self.message.handle
            ))
        })?;

        Ok(self.body.get_or_init(|| body.to_bytes()).clone())
    }

    fn body_stream(&self) -> Result<BodyStream> {
        Ok(BodyStream::new(self.body()?))
    }

    async fn notify_consumed(&self, record: ConsumeRecord) {
        // ---
        self.record(ReceiveEvent::Consumed(record.clone()), DELIVERED);

        for observer in &self.observers {
            observer.post_consume(self.handle(), &record).await;
        }
    }

    async fn notify_faulted(&self, record: ConsumeRecord, error: SharedError) {
        // ---
        self.record(
            ReceiveEvent::ConsumeFaulted(record.clone(), error.clone()),
            FAULTED,
        );

        for observer in &self.observers {
            observer.consume_fault(self.handle(), &record, &error).await;
        }
    }

    async fn notify_receive_faulted(&self, error: SharedError) {
        // ---
        self.record(ReceiveEvent::ReceiveFaulted(error.clone()), FAULTED);

        for observer in &self.observers {
            observer.receive_fault(self.handle(), &error).await;
        }
    }

    fn add_receive_task(&self, task: BoxFuture<'static, ()>) -> Result<()> {
        self.tracker.add(task)
    }

    fn receive_completed(&self) -> BoxFuture<'static, ()> {
        Box::pin(self.tracker.completed())
    }
}

#[async_trait::async_trait]
impl ReceiveLockContext for LeasedReceiveContext {
    // ---
    async fn complete(&self) {
        // ---
        let Some(settlement) = self.begin_settlement(Settlement::Completed) else {
            return;
        };

        self.cancel.cancel();

        let disposition = match settlement {
            Settlement::Completed => {
                if let Err(err) = self.adapter.delete_message(self.handle()).await {
                    crate::log_error!("failed to delete message {}: {err}", self.handle());
                }
                Disposition::Completed
            }
            _ => {
                crate::log_warn!(
                    "message {} lock lost before completion, not deleted",
                    self.handle()
                );
                Disposition::LockLost { fault: None }
            }
        };

        self.tracker.mark_terminal();
        self.notify_settled(disposition).await;
    }

    async fn faulted(&self, error: SharedError) {
        // ---
        let Some(settlement) = self.begin_settlement(Settlement::Faulted) else {
            return;
        };

        self.cancel.cancel();

        let disposition = match settlement {
            Settlement::Faulted => {
                match self.adapter.release_message(self.handle()).await {
                    Ok(()) => {
                        self.lock.disable();
                    }
                    Err(BrokerError::Cancelled) => {}
                    Err(err) => {
                        crate::log_error!(
                            "failed to release message {}: {err}, original fault: {error}",
                            self.handle()
                        );
                    }
                }
                Disposition::Faulted(error)
            }
            _ => {
                crate::log_warn!(
                    "message {} lock lost before fault could release it: {error}",
                    self.handle()
                );
                Disposition::LockLost { fault: Some(error) }
            }
        };

        self.tracker.mark_terminal();
        self.notify_settled(disposition).await;
    }

    fn validate_lock_status(&self) -> Result<()> {
        self.lock.validate()
    }
}

impl Drop for LeasedReceiveContext {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
