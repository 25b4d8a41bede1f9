//! Receive context builder.
//!
//! Provides a fluent builder API for creating the receive context of a
//! freshly delivered message, with lease timings and observers.

use std::sync::Arc;
use std::time::Duration;

use crate::{
    // ---
    Address,
    BrokerAdapterPtr,
    DeliveredMessage,
    LeasedReceiveContext,
    ReceiveObserver,
    ReceiveObserverPtr,
    ReceiveSettings,
    Result,
};

/// Builder for receive contexts.
///
/// Accepts the delivered message and the broker adapter that leased it, and
/// allows configuration of lease timings and observers. Building the context
/// starts lease renewal immediately.
///
/// # Examples
///
/// ```no_run
/// use mom_receive::{create_memory_broker, ReceiveContextBuilder, ReceiveLockContext};
/// use std::time::Duration;
///
/// # async fn example() -> mom_receive::Result<()> {
/// let broker = create_memory_broker(Duration::from_secs(30));
/// broker.enqueue_text("hello");
///
/// let message = broker.receive().expect("a message is ready");
/// let context = ReceiveContextBuilder::new(message, broker.clone())
///     .input_address("memory://orders")
///     .visibility_timeout(Duration::from_secs(30))
///     .build()?;
///
/// context.complete().await;
/// # Ok(())
/// # }
/// ```
pub struct ReceiveContextBuilder {
    // ---
    message: DeliveredMessage,
    adapter: BrokerAdapterPtr,
    settings: Option<ReceiveSettings>,

    // Individual overrides (applied on top of settings)
    input_address: Option<Address>,
    visibility_timeout: Option<Duration>,
    max_visibility_timeout: Option<Duration>,

    observers: Vec<ReceiveObserverPtr>,
}

impl ReceiveContextBuilder {
    /// Create a new builder for a delivered message.
    pub fn new(message: DeliveredMessage, adapter: BrokerAdapterPtr) -> Self {
        // ---
        Self {
            message,
            adapter,
            settings: None,
            input_address: None,
            visibility_timeout: None,
            max_visibility_timeout: None,
            observers: Vec::new(),
        }
    }

    /// Use endpoint-wide settings as the base.
    pub fn settings(mut self, settings: ReceiveSettings) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Set the input address.
    ///
    /// Default: `"unknown"`.
    pub fn input_address(mut self, address: impl Into<Address>) -> Self {
        self.input_address = Some(address.into());
        self
    }

    /// Set the lease duration granted at delivery.
    ///
    /// Default: 30s.
    pub fn visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = Some(timeout);
        self
    }

    /// Set the ceiling for lease extensions.
    ///
    /// Default: 12h.
    pub fn max_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.max_visibility_timeout = Some(timeout);
        self
    }

    /// Add an observer.
    pub fn observer(mut self, observer: Arc<dyn ReceiveObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Build the receive context (consumes self) and start lease renewal.
    ///
    /// # Errors
    ///
    /// Returns [`ReceiveError::InvalidSettings`](crate::ReceiveError::InvalidSettings)
    /// if the resulting settings do not validate.
    pub fn build(self) -> Result<LeasedReceiveContext> {
        // ---
        let mut settings = self
            .settings
            .unwrap_or_else(|| ReceiveSettings::new("unknown"));

        if let Some(address) = self.input_address {
            settings.input_address = address;
        }
        if let Some(timeout) = self.visibility_timeout {
            settings.visibility_timeout = timeout;
        }
        if let Some(timeout) = self.max_visibility_timeout {
            settings.max_visibility_timeout = timeout;
        }

        settings.validate()?;

        Ok(LeasedReceiveContext::start(
            self.message,
            self.adapter,
            &settings,
            self.observers,
        ))
    }
}
