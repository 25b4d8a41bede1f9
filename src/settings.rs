//! Public, broker-agnostic receive settings.
//!
//! This type intentionally contains no broker-specific concepts (queue URLs,
//! SDK client options). Broker adapters are responsible for mapping their own
//! configuration onto the visibility timeouts used here.

use std::time::Duration;

use crate::{Address, ReceiveError, Result};

/// Longest lease a broker will grant (SQS caps visibility at 12 hours).
pub const MAX_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(12 * 60 * 60);

/// Lease duration granted at delivery when nothing else is configured.
pub const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(30);

/// Share of the remaining lease to wait before renewing.
pub const DEFAULT_RENEWAL_FACTOR: f64 = 0.6;

/// Fixed wait before retrying an extension after a transient broker error.
pub const DEFAULT_TRANSIENT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Receive endpoint settings shared by every receive context it creates.
#[derive(Debug, Clone)]
pub struct ReceiveSettings {
    // ---
    /// Address the messages are received on.
    pub input_address: Address,

    /// Lease duration the broker granted at delivery.
    ///
    /// Default: 30 seconds
    pub visibility_timeout: Duration,

    /// Ceiling for lease extensions. Once an extension reaches it, renewal
    /// stops.
    ///
    /// Default: 12 hours
    pub max_visibility_timeout: Duration,

    /// Fraction of the remaining lease to wait before the next extension.
    ///
    /// Default: 0.6
    pub renewal_factor: f64,

    /// Delay before retrying an extension that failed with a transient error.
    ///
    /// Default: 1 second
    pub transient_retry_delay: Duration,

    /// Optional limit for a single extend call. When it elapses the attempt is
    /// treated as a broker timeout and retried immediately.
    ///
    /// Default: `None` (the adapter reports its own timeouts)
    pub extend_call_timeout: Option<Duration>,
}

impl ReceiveSettings {
    /// Create settings for the given input address with default lease timings.
    pub fn new(input_address: impl Into<Address>) -> Self {
        Self {
            input_address: input_address.into(),
            visibility_timeout: DEFAULT_VISIBILITY_TIMEOUT,
            max_visibility_timeout: MAX_VISIBILITY_TIMEOUT,
            renewal_factor: DEFAULT_RENEWAL_FACTOR,
            transient_retry_delay: DEFAULT_TRANSIENT_RETRY_DELAY,
            extend_call_timeout: None,
        }
    }

    /// Set the lease duration granted at delivery.
    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    /// Set the ceiling for lease extensions.
    pub fn with_max_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.max_visibility_timeout = timeout;
        self
    }

    /// Set the renewal factor.
    ///
    /// # Example
    ///
    /// ```
    /// use mom_receive::ReceiveSettings;
    ///
    /// let settings = ReceiveSettings::new("queue://orders").with_renewal_factor(0.5);
    /// assert!(settings.validate().is_ok());
    /// ```
    pub fn with_renewal_factor(mut self, factor: f64) -> Self {
        self.renewal_factor = factor;
        self
    }

    /// Set the retry delay used after transient broker errors.
    pub fn with_transient_retry_delay(mut self, delay: Duration) -> Self {
        self.transient_retry_delay = delay;
        self
    }

    /// Bound each extend call.
    pub fn with_extend_call_timeout(mut self, timeout: Duration) -> Self {
        self.extend_call_timeout = Some(timeout);
        self
    }

    /// Check the settings are usable for lease renewal.
    ///
    /// # Errors
    ///
    /// Returns [`ReceiveError::InvalidSettings`] when the visibility timeout is
    /// zero, the ceiling is below it or above [`MAX_VISIBILITY_TIMEOUT`], or
    /// the renewal factor is outside `(0, 1]`.
    pub fn validate(&self) -> Result<()> {
        // ---
        if self.visibility_timeout.is_zero() {
            return Err(ReceiveError::InvalidSettings(
                "visibility_timeout must be greater than zero".into(),
            ));
        }

        if self.max_visibility_timeout > MAX_VISIBILITY_TIMEOUT {
            return Err(ReceiveError::InvalidSettings(format!(
                "max_visibility_timeout ({:?}) exceeds the broker limit ({:?})",
                self.max_visibility_timeout, MAX_VISIBILITY_TIMEOUT
            )));
        }

        if self.max_visibility_timeout < self.visibility_timeout {
            return Err(ReceiveError::InvalidSettings(format!(
                "max_visibility_timeout ({:?}) is below visibility_timeout ({:?})",
                self.max_visibility_timeout, self.visibility_timeout
            )));
        }

        if !(self.renewal_factor > 0.0 && self.renewal_factor <= 1.0) {
            return Err(ReceiveError::InvalidSettings(format!(
                "renewal_factor must be in (0, 1], got {}",
                self.renewal_factor
            )));
        }

        Ok(())
    }
}
