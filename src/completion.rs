use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;

use crate::{ReceiveError, Result};

/// Progress shared between the tracker, its task guards and waiters.
#[derive(Debug, Default, Clone, Copy)]
struct Progress {
    pending: usize,
    terminal: bool,
    resolved: bool,
}

impl Progress {
    fn settle_if_done(&mut self) {
        if self.terminal && self.pending == 0 {
            self.resolved = true;
        }
    }
}

/// Tracks receive tasks spawned while a message is processed.
///
/// The aggregate completion resolves once every tracked task has finished
/// *and* the message reached a terminal state. Once resolved it stays
/// resolved, and no further tasks are accepted.
///
/// Cloning shares the same tracker.
#[derive(Debug, Clone)]
pub struct CompletionTracker {
    progress: Arc<watch::Sender<Progress>>,
}

impl Default for CompletionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl CompletionTracker {
    // ---

    /// Create an empty tracker
    pub fn new() -> Self {
        // ---
        let (tx, _rx) = watch::channel(Progress::default());
        Self {
            progress: Arc::new(tx),
        }
    }

    /// Track a task, spawning it on the current runtime.
    ///
    /// The task counts as pending until it returns or panics.
    ///
    /// # Errors
    ///
    /// Returns [`ReceiveError::ReceiveCompleted`] once the aggregate
    /// completion has resolved.
    pub fn add<F>(&self, task: F) -> Result<()>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        // ---
        let mut accepted = false;
        self.progress.send_modify(|p| {
            if !p.resolved {
                p.pending += 1;
                accepted = true;
            }
        });

        if !accepted {
            return Err(ReceiveError::ReceiveCompleted);
        }

        let guard = PendingGuard {
            progress: self.progress.clone(),
        };

        tokio::spawn(async move {
            let _guard = guard;
            task.await;
        });

        Ok(())
    }

    /// Mark the message as having reached a terminal state.
    pub fn mark_terminal(&self) {
        self.progress.send_modify(|p| {
            p.terminal = true;
            p.settle_if_done();
        });
    }

    /// Number of tracked tasks still running
    pub fn pending(&self) -> usize {
        self.progress.borrow().pending
    }

    /// True once the aggregate completion has resolved
    pub fn is_completed(&self) -> bool {
        self.progress.borrow().resolved
    }

    /// Future resolving with the aggregate completion.
    ///
    /// The future owns its share of the tracker, so it may outlive the
    /// receive context that handed it out.
    pub fn completed(&self) -> impl Future<Output = ()> + Send + 'static {
        // ---
        let progress = self.progress.clone();
        let mut rx = progress.subscribe();

        async move {
            // The sender lives in `progress`, so the channel cannot close here.
            let _ = rx.wait_for(|p| p.resolved).await;
            drop(progress);
        }
    }
}

/// Decrements the pending count when a tracked task ends, including by panic.
struct PendingGuard {
    progress: Arc<watch::Sender<Progress>>,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        // ---
        if std::thread::panicking() {
            crate::log_error!("receive task panicked");
        }

        self.progress.send_modify(|p| {
            p.pending = p.pending.saturating_sub(1);
            p.settle_if_done();
        });
    }
}
