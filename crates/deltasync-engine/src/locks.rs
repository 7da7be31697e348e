//! Per-client advisory locking.
//!
//! Concurrent cycles for different clients are allowed; two cycles for the
//! same client must serialize around the delta-through-commit steps. The
//! registry hands out one async mutex per client id.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Registry of per-client mutexes.
#[derive(Debug, Default)]
pub struct ClientLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ClientLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for a client, waiting if another cycle holds it.
    pub async fn acquire(&self, client_id: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(client_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }
}
