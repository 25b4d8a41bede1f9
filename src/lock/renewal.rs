//! Lease renewal controller.
//!
//! One controller runs per received message, from the moment the receive
//! context is created until the message is settled, the lease is lost, or the
//! lease reaches the broker's ceiling.
//!
//! # Renewal cadence
//!
//! The controller waits `(visibility_timeout - elapsed) * renewal_factor`
//! before each extension, so with the default factor of 0.6 the remaining 40%
//! of the lease is kept as margin for scheduling jitter and clock drift.
//!
//! Every successful extension doubles the visibility timeout, capped at the
//! configured maximum. Reaching the maximum ends renewal: the broker will not
//! grant a longer lease.
//!
//! # Failure handling
//!
//! | Broker result                   | Reaction                                         |
//! |---------------------------------|--------------------------------------------------|
//! | `LockAlreadyGone`               | disable the lock, cancel, stop with `LockLost`   |
//! | `Transient`                     | retry the same extension after a fixed delay     |
//! | `Timeout`                       | retry the same extension immediately             |
//! | `Cancelled` / `Other`           | cancel, stop with `Cancelled`                    |
//!
//! Retries after a transient error or a timeout reuse the target timeout of
//! the failed attempt; the transient backoff and the lease growth are separate
//! timers that happen to share the loop.
//!
//! Cancelling the token only interrupts the wait between extensions. An
//! extend call already dispatched runs to completion, but its result is not
//! classified: the controller stops without touching the lock.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use crate::{BrokerAdapterPtr, BrokerError, LockState, ReceiveSettings};

/// Why a controller stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The message was settled by `complete()` or `fault()`.
    Completed,

    /// The broker reported the lease as gone.
    LockLost,

    /// The lease reached the maximum visibility timeout.
    Expired,

    /// Cancelled for any other reason (context dropped, unexpected error).
    Cancelled,
}

/// Controller state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewalState {
    /// Waiting for the next scheduled extension.
    Active,

    /// An extend call is in flight.
    Extending,

    /// Waiting to retry an extension that failed transiently.
    Backoff,

    /// Terminal.
    Stopped(StopReason),
}

/// Snapshot published by the controller on every state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenewalStatus {
    pub state: RenewalState,

    /// Last visibility timeout the broker confirmed.
    pub visibility_timeout: Duration,

    /// Number of successful extensions.
    pub extensions: u32,
}

/// Timing parameters of the controller, taken from [`ReceiveSettings`].
#[derive(Debug, Clone, Copy)]
pub struct RenewalPolicy {
    pub visibility_timeout: Duration,
    pub max_visibility_timeout: Duration,
    pub renewal_factor: f64,
    pub transient_retry_delay: Duration,
    pub extend_call_timeout: Option<Duration>,
}

impl From<&ReceiveSettings> for RenewalPolicy {
    fn from(settings: &ReceiveSettings) -> Self {
        // ---
        Self {
            visibility_timeout: settings.visibility_timeout,
            max_visibility_timeout: settings.max_visibility_timeout,
            renewal_factor: settings.renewal_factor,
            transient_retry_delay: settings.transient_retry_delay,
            extend_call_timeout: settings.extend_call_timeout,
        }
    }
}

impl RenewalPolicy {
    /// Delay before extending a lease of `timeout` when `elapsed` has passed
    /// since delivery. Zero once the lease is overdue.
    ///
    /// A product that does not fit a `Duration` falls back to the whole
    /// remaining lease.
    pub fn renewal_delay(&self, timeout: Duration, elapsed: Duration) -> Duration {
        // ---
        let remaining = timeout.saturating_sub(elapsed);
        Duration::try_from_secs_f64(remaining.as_secs_f64() * self.renewal_factor)
            .unwrap_or(remaining)
    }

    /// Visibility timeout to request after `current`: doubled, capped at the
    /// maximum.
    pub fn next_timeout(&self, current: Duration) -> Duration {
        current
            .checked_mul(2)
            .unwrap_or(self.max_visibility_timeout)
            .min(self.max_visibility_timeout)
    }
}

/// Observer side of a running controller.
#[derive(Debug, Clone)]
pub struct RenewalHandle {
    status: watch::Receiver<RenewalStatus>,
}

impl RenewalHandle {
    /// Latest published status.
    pub fn status(&self) -> RenewalStatus {
        *self.status.borrow()
    }

    /// Subscribe to status changes.
    pub fn subscribe(&self) -> watch::Receiver<RenewalStatus> {
        self.status.clone()
    }

    /// Wait until the controller stops.
    ///
    /// A controller task that vanished without publishing a reason (runtime
    /// shut down) counts as `Cancelled`.
    pub async fn stopped(&self) -> StopReason {
        // ---
        let mut rx = self.status.clone();
        let stopped = rx
            .wait_for(|s| matches!(s.state, RenewalState::Stopped(_)))
            .await
            .map(|s| s.state);

        match stopped {
            Ok(RenewalState::Stopped(reason)) => reason,
            _ => StopReason::Cancelled,
        }
    }
}

/// Background lease renewal for one message.
pub struct LeaseRenewalController {
    adapter: BrokerAdapterPtr,
    lock: LockState,
    cancel: CancellationToken,
    received_at: Instant,
    policy: RenewalPolicy,
    status: watch::Sender<RenewalStatus>,
}

impl LeaseRenewalController {
    /// Start renewing the lease described by `lock` on a new task.
    ///
    /// `cancel` is the only way to stop the controller from outside; the
    /// controller cancels it itself when it gives up on the lease.
    pub fn spawn(
        adapter: BrokerAdapterPtr,
        lock: LockState,
        cancel: CancellationToken,
        received_at: Instant,
        policy: RenewalPolicy,
    ) -> RenewalHandle {
        // ---
        let (status, rx) = watch::channel(RenewalStatus {
            state: RenewalState::Active,
            visibility_timeout: policy.visibility_timeout,
            extensions: 0,
        });

        let controller = Self {
            adapter,
            lock,
            cancel,
            received_at,
            policy,
            status,
        };

        tokio::spawn(controller.run());

        RenewalHandle { status: rx }
    }

    async fn run(self) -> StopReason {
        // ---
        let mut current = self.policy.visibility_timeout;
        let mut extensions = 0u32;
        let mut retry_target: Option<Duration> = None;
        let mut delay = self
            .policy
            .renewal_delay(current, self.received_at.elapsed());

        let reason = loop {
            let waiting = match retry_target {
                Some(_) => RenewalState::Backoff,
                None => RenewalState::Active,
            };
            self.publish(waiting, current, extensions);

            if delay.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => break self.cancelled_reason(),
                    _ = time::sleep(delay) => {}
                }
            }

            if self.cancel.is_cancelled() {
                break self.cancelled_reason();
            }

            let target = retry_target
                .take()
                .unwrap_or_else(|| self.policy.next_timeout(current));

            self.publish(RenewalState::Extending, current, extensions);

            let result = self.extend(target).await;

            // A terminal operation that ran during the call owns the lock now
            if self.cancel.is_cancelled() {
                if result.is_ok() {
                    current = target;
                    extensions += 1;
                }
                break self.cancelled_reason();
            }

            match result {
                Ok(()) => {
                    current = target;
                    extensions += 1;

                    crate::log_debug!(
                        "extended message {} visibility to {:?} ({:?} elapsed)",
                        self.lock.handle(),
                        current,
                        self.received_at.elapsed()
                    );

                    if current >= self.policy.max_visibility_timeout {
                        crate::log_info!(
                            "message {} reached the maximum visibility timeout {:?}",
                            self.lock.handle(),
                            current
                        );
                        break StopReason::Expired;
                    }

                    delay = self
                        .policy
                        .renewal_delay(current, self.received_at.elapsed());
                }
                Err(BrokerError::LockAlreadyGone(details)) => {
                    crate::log_warn!(
                        "message lock lost: {} ({details})",
                        self.lock.handle()
                    );

                    self.lock.disable();
                    self.cancel.cancel();
                    break StopReason::LockLost;
                }
                Err(BrokerError::Transient(details)) => {
                    crate::log_error!(
                        "failed to extend message {} visibility to {:?} ({:?} elapsed): {details}",
                        self.lock.handle(),
                        target,
                        self.received_at.elapsed()
                    );

                    retry_target = Some(target);
                    delay = self.policy.transient_retry_delay;
                }
                Err(BrokerError::Timeout) => {
                    crate::log_debug!(
                        "extend of message {} timed out, retrying",
                        self.lock.handle()
                    );

                    retry_target = Some(target);
                    delay = Duration::ZERO;
                }
                Err(err) => {
                    crate::log_error!(
                        "lease renewal of message {} aborted: {err}",
                        self.lock.handle()
                    );

                    self.cancel.cancel();
                    break StopReason::Cancelled;
                }
            }
        };

        self.publish(RenewalState::Stopped(reason), current, extensions);
        crate::log_debug!(
            "lease renewal of message {} stopped: {reason:?}",
            self.lock.handle()
        );

        reason
    }

    async fn extend(&self, timeout: Duration) -> Result<(), BrokerError> {
        // ---
        let call = self.adapter.extend_lock(self.lock.handle(), timeout);

        match self.policy.extend_call_timeout {
            Some(limit) => time::timeout(limit, call)
                .await
                .unwrap_or(Err(BrokerError::Timeout)),
            None => call.await,
        }
    }

    fn cancelled_reason(&self) -> StopReason {
        // ---
        if self.lock.is_settled() {
            StopReason::Completed
        } else {
            StopReason::Cancelled
        }
    }

    fn publish(&self, state: RenewalState, visibility_timeout: Duration, extensions: u32) {
        // ---
        self.status.send_replace(RenewalStatus {
            state,
            visibility_timeout,
            extensions,
        });
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    fn policy() -> RenewalPolicy {
        RenewalPolicy::from(&ReceiveSettings::new("queue://test"))
    }

    fn assert_close(actual: Duration, expected: Duration) {
        let diff = if actual > expected {
            actual - expected
        } else {
            expected - actual
        };
        assert!(
            diff < Duration::from_micros(1),
            "expected {expected:?}, got {actual:?}"
        );
    }

    #[test]
    fn test_first_delay_is_sixty_percent_of_lease() {
        // ---
        let delay = policy().renewal_delay(Duration::from_secs(30), Duration::ZERO);
        assert_close(delay, Duration::from_secs(18));
    }

    #[test]
    fn test_delay_after_first_extension() {
        // ---
        // Extended to 60s at 18s elapsed: (60 - 18) * 0.6
        let delay = policy().renewal_delay(Duration::from_secs(60), Duration::from_secs(18));
        assert_close(delay, Duration::from_millis(25_200));
    }

    #[test]
    fn test_overdue_lease_renews_immediately() {
        // ---
        let delay = policy().renewal_delay(Duration::from_secs(30), Duration::from_secs(45));
        assert_eq!(delay, Duration::ZERO);
    }

    #[test]
    fn test_next_timeout_doubles_up_to_ceiling() {
        // ---
        let policy = policy();
        let mut current = Duration::from_secs(30);
        let mut seen = vec![current];

        while current < policy.max_visibility_timeout {
            let next = policy.next_timeout(current);
            assert!(next >= current);
            assert!(next <= policy.max_visibility_timeout);
            current = next;
            seen.push(current);
        }

        assert_eq!(seen[1], Duration::from_secs(60));
        assert_eq!(seen[2], Duration::from_secs(120));
        assert_eq!(*seen.last().unwrap(), Duration::from_secs(43_200));
        // 30s * 2^11 = 61440s > 43200s, so the eleventh doubling is capped
        assert_eq!(seen.len(), 12);
    }

    #[test]
    fn test_next_timeout_saturates_on_overflow() {
        // ---
        let policy = RenewalPolicy {
            max_visibility_timeout: Duration::MAX,
            ..policy()
        };
        assert_eq!(policy.next_timeout(Duration::MAX), Duration::MAX);
    }

    #[test]
    fn test_delay_does_not_panic_on_huge_lease() {
        // ---
        let policy = RenewalPolicy {
            renewal_factor: 1.0,
            max_visibility_timeout: Duration::MAX,
            ..policy()
        };

        // Duration::MAX as f64 rounds up past the largest representable value
        assert_eq!(
            policy.renewal_delay(Duration::MAX, Duration::ZERO),
            Duration::MAX
        );
    }
}
