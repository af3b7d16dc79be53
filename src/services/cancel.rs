//! Cooperative cancellation shared between a job and whoever may stop it.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Notify;

use crate::services::clock::Sleeper;

#[derive(Debug, Default)]
struct Inner {
    stop: AtomicBool,
    notify: Notify,
}

/// Cloneable stop flag. Once set it stays set.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    inner: Arc<Inner>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.stop.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.stop.load(Ordering::SeqCst)
    }

    /// Resolves once [`CancelFlag::cancel`] has been called.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// Drives `fut` unless the flag trips first, in which case `fut` is
    /// dropped and `None` is returned.
    pub async fn run<F: Future>(&self, fut: F) -> Option<F::Output> {
        if self.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.cancelled() => None,
            out = fut => Some(out),
        }
    }

    /// Sleeps for `duration`; returns true if cancelled instead.
    pub async fn sleep(&self, sleeper: &dyn Sleeper, duration: Duration) -> bool {
        self.run(sleeper.sleep(duration)).await.is_none()
    }
}
