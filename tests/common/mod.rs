// tests/common/mod.rs

//! Shared test fixtures: a scriptable broker adapter, a recording observer
//! and logging setup.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

use mom_receive::{
    // ---
    BrokerAdapter,
    BrokerError,
    ConsumeRecord,
    DeliveredMessage,
    Disposition,
    MessageBody,
    MessageHandle,
    ReceiveObserver,
    SharedError,
};

/// One extend call seen by the scripted broker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtendCall {
    /// Time since the broker was created when the call started.
    pub at: Duration,
    /// Visibility timeout requested.
    pub timeout: Duration,
}

/// Broker adapter whose extend results are scripted by the test.
///
/// Extend calls pop results from the script in order; once the script is
/// exhausted every call succeeds.
pub struct ScriptedBroker {
    // ---
    start: Instant,
    extend_script: Mutex<VecDeque<Result<(), BrokerError>>>,
    extend_latency: Option<Duration>,
    release_result: Result<(), BrokerError>,

    extends: Mutex<Vec<ExtendCall>>,
    extends_finished: AtomicUsize,
    deletes: AtomicUsize,
    releases: AtomicUsize,
}

impl ScriptedBroker {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            extend_script: Mutex::new(VecDeque::new()),
            extend_latency: None,
            release_result: Ok(()),
            extends: Mutex::new(Vec::new()),
            extends_finished: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
        }
    }

    /// Results returned by successive extend calls.
    pub fn with_extend_results(self, results: Vec<Result<(), BrokerError>>) -> Self {
        *self.extend_script.lock().unwrap() = results.into();
        self
    }

    /// Make every extend call take `latency` before answering.
    pub fn with_extend_latency(mut self, latency: Duration) -> Self {
        self.extend_latency = Some(latency);
        self
    }

    /// Result of every release call.
    pub fn with_release_result(mut self, result: Result<(), BrokerError>) -> Self {
        self.release_result = result;
        self
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn extends(&self) -> Vec<ExtendCall> {
        self.extends.lock().unwrap().clone()
    }

    pub fn extends_finished(&self) -> usize {
        self.extends_finished.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    /// Time since the broker was created.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

#[async_trait::async_trait]
impl BrokerAdapter for ScriptedBroker {
    async fn extend_lock(&self, _handle: &MessageHandle, timeout: Duration) -> Result<(), BrokerError> {
        // ---
        self.extends.lock().unwrap().push(ExtendCall {
            at: self.start.elapsed(),
            timeout,
        });

        if let Some(latency) = self.extend_latency {
            tokio::time::sleep(latency).await;
        }

        let result = self
            .extend_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(()));

        self.extends_finished.fetch_add(1, Ordering::SeqCst);
        result
    }

    async fn delete_message(&self, _handle: &MessageHandle) -> Result<(), BrokerError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn release_message(&self, _handle: &MessageHandle) -> Result<(), BrokerError> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        self.release_result.clone()
    }
}

/// A text message with a fresh handle.
pub fn text_message(body: &str) -> DeliveredMessage {
    DeliveredMessage::new(MessageHandle::generate(), MessageBody::Text(body.to_string()))
}

/// Observer that records every notification it receives.
#[derive(Default)]
pub struct RecordingObserver {
    pub consumed: Mutex<Vec<ConsumeRecord>>,
    pub faults: Mutex<Vec<SharedError>>,
    pub dispositions: Mutex<Vec<Disposition>>,
}

impl RecordingObserver {
    pub fn dispositions(&self) -> Vec<Disposition> {
        self.dispositions.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ReceiveObserver for RecordingObserver {
    async fn post_consume(&self, _handle: &MessageHandle, record: &ConsumeRecord) {
        self.consumed.lock().unwrap().push(record.clone());
    }

    async fn consume_fault(&self, _handle: &MessageHandle, _record: &ConsumeRecord, error: &SharedError) {
        self.faults.lock().unwrap().push(error.clone());
    }

    async fn receive_fault(&self, _handle: &MessageHandle, error: &SharedError) {
        self.faults.lock().unwrap().push(error.clone());
    }

    async fn settled(&self, _handle: &MessageHandle, disposition: &Disposition) {
        self.dispositions.lock().unwrap().push(disposition.clone());
    }
}

/// Error raised by test consumers.
#[derive(Debug, thiserror::Error)]
#[error("consumer failed: {0}")]
pub struct ConsumerError(pub String);

pub fn consumer_error(msg: &str) -> SharedError {
    Arc::new(ConsumerError(msg.to_string()))
}

#[cfg(feature = "logging")]
mod imp {
    use std::sync::Once;
    use tracing_subscriber::EnvFilter;

    static INIT: Once = Once::new();

    pub fn init() {
        INIT.call_once(|| {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(EnvFilter::from_default_env())
                .with_test_writer()
                .try_init();
        });
    }
}

#[cfg(not(feature = "logging"))]
mod imp {
    #[inline]
    pub fn init() {}
}

pub fn init_logging() {
    imp::init();
}
