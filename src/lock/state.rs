//! Per-message lock flags.
//!
//! `LockState` is the only state shared between the lease renewal controller
//! and the terminal operations of a receive context. Both sides run on
//! independent schedules, so every flag is atomic and every transition is
//! one-way.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::{MessageHandle, ReceiveError, Result};

/// Final disposition recorded for a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Settlement {
    /// Deleted from the broker after successful processing.
    Completed = 1,

    /// Released back to the broker after a fault.
    Faulted = 2,

    /// The lease was lost before a terminal operation could be applied.
    LockLost = 3,
}

impl Settlement {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Settlement::Completed),
            2 => Some(Settlement::Faulted),
            3 => Some(Settlement::LockLost),
            _ => None,
        }
    }
}

const UNSETTLED: u8 = 0;

/// Lock flags of one received message.
///
/// Cloning shares the same flags.
#[derive(Clone, Debug)]
pub struct LockState {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    handle: MessageHandle,
    locked: AtomicBool,
    settlement: AtomicU8,
    lost: CancellationToken,
}

impl LockState {
    /// Create lock flags for a freshly delivered (locked) message.
    pub fn new(handle: MessageHandle) -> Self {
        // ---
        Self {
            inner: Arc::new(Inner {
                handle,
                locked: AtomicBool::new(true),
                settlement: AtomicU8::new(UNSETTLED),
                lost: CancellationToken::new(),
            }),
        }
    }

    /// Receipt handle the lock belongs to.
    pub fn handle(&self) -> &MessageHandle {
        &self.inner.handle
    }

    /// True while the lease is believed valid.
    pub fn is_locked(&self) -> bool {
        self.inner.locked.load(Ordering::Acquire)
    }

    /// Mark the lease as lost.
    ///
    /// Returns `true` only for the call that performed the transition. The
    /// flag never returns to locked.
    pub fn disable(&self) -> bool {
        // ---
        let was_locked = self.inner.locked.swap(false, Ordering::AcqRel);
        if was_locked {
            self.inner.lost.cancel();
        }
        was_locked
    }

    /// Fail with [`ReceiveError::MessageLockLost`] once the lease is lost.
    pub fn validate(&self) -> Result<()> {
        // ---
        if self.is_locked() {
            Ok(())
        } else {
            Err(ReceiveError::MessageLockLost {
                handle: self.inner.handle.clone(),
            })
        }
    }

    /// Token cancelled the moment the lease is lost.
    pub fn lost_token(&self) -> CancellationToken {
        self.inner.lost.clone()
    }

    /// Record the final disposition. Only the first call wins.
    pub fn try_settle(&self, settlement: Settlement) -> bool {
        self.inner
            .settlement
            .compare_exchange(
                UNSETTLED,
                settlement as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Disposition recorded so far, if any.
    pub fn settlement(&self) -> Option<Settlement> {
        Settlement::from_u8(self.inner.settlement.load(Ordering::Acquire))
    }

    pub fn is_settled(&self) -> bool {
        self.settlement().is_some()
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_starts_locked_and_unsettled() {
        // ---
        let state = LockState::new(MessageHandle::from("h-1"));

        assert!(state.is_locked());
        assert!(state.validate().is_ok());
        assert!(state.settlement().is_none());
        assert!(!state.lost_token().is_cancelled());
    }

    #[test]
    fn test_disable_is_one_way() {
        // ---
        let state = LockState::new(MessageHandle::from("h-1"));

        assert!(state.disable());
        assert!(!state.disable());
        assert!(!state.is_locked());
        assert!(state.lost_token().is_cancelled());

        for _ in 0..3 {
            match state.validate() {
                Err(ReceiveError::MessageLockLost { handle }) => assert_eq!(handle.as_str(), "h-1"),
                other => panic!("expected MessageLockLost, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_first_settlement_wins() {
        // ---
        let state = LockState::new(MessageHandle::from("h-1"));

        assert!(state.try_settle(Settlement::Completed));
        assert!(!state.try_settle(Settlement::Faulted));
        assert!(!state.try_settle(Settlement::Completed));
        assert_eq!(state.settlement(), Some(Settlement::Completed));
    }

    #[test]
    fn test_clones_share_flags() {
        // ---
        let state = LockState::new(MessageHandle::from("h-1"));
        let other = state.clone();

        other.disable();
        assert!(!state.is_locked());
    }
}
