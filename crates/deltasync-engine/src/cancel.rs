//! Cooperative cancellation token.
//!
//! Built on a `tokio::sync::watch` channel so any clone can cancel and any
//! clone can await cancellation. Every external I/O in a cycle is guarded
//! by the token; cancellation surfaces as [`SyncError::Cancelled`].

use std::future::Future;
use std::sync::Arc;

use deltasync_types::{Result, SyncError};
use tokio::sync::watch;

/// Clonable cancellation token shared between a cycle and its caller.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    /// A fresh, uncancelled token.
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Signal cancellation to every clone of this token.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    /// True once [`cancel`](Self::cancel) was called on any clone.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Fail with [`SyncError::Cancelled`] naming the suspension point if
    /// cancellation was observed.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Cancelled`] when the token is cancelled.
    pub fn check(&self, what: &str) -> Result<()> {
        if self.is_cancelled() {
            Err(SyncError::cancelled(what))
        } else {
            Ok(())
        }
    }

    /// Resolve once the token is cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                // Sender gone without cancelling; stay pending forever.
                std::future::pending::<()>().await;
            }
        }
    }

    /// Run a fallible future, failing fast with [`SyncError::Cancelled`]
    /// when the token fires first.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Cancelled`] on cancellation, otherwise the
    /// future's own error.
    pub async fn guard<T>(
        &self,
        what: &str,
        fut: impl Future<Output = Result<T>> + Send,
    ) -> Result<T> {
        tokio::select! {
            biased;
            () = self.cancelled() => Err(SyncError::cancelled(what)),
            result = fut => result,
        }
    }
}
