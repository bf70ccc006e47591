//! Cooperative cancellation signal threaded through a turn's in-flight
//! LLM and tool awaits. Checked at phase boundaries and raced against
//! those awaits so an embedder can abort a turn without waiting for it
//! to reach a natural completion point.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// A cheaply cloneable, `Send + Sync` abort signal. Cloning shares the
/// same underlying flag, so any clone can cancel and every clone observes
/// it.
#[derive(Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the token cancelled and wakes every pending `cancelled()` await.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once the token is cancelled; resolves immediately if it
    /// already was. Meant to be raced via `tokio::select!` against the
    /// in-flight work it should abort.
    pub async fn cancelled(&self) {
        loop {
            if self.is_cancelled() {
                return;
            }
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}
