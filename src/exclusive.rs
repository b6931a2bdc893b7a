//! Keyed mutual exclusion for async actions.
use dashmap::DashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Runs async actions so that at most one action per key executes at any given time.
///
/// Actions for different keys never wait on each other.
/// Callers racing on the same key queue up on an async mutex: nobody spins, nobody blocks a
/// runtime thread.
#[derive(Debug)]
pub struct ExclusiveExecutor<K: Eq + Hash> {
    locks: DashMap<K, Arc<Mutex<()>>>,
}

impl<K: Eq + Hash> Default for ExclusiveExecutor<K> {
    fn default() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }
}

/// The cancellation token fired while waiting for exclusive access to a key.
#[derive(Debug, thiserror::Error)]
#[error("Cancelled while waiting for exclusive access")]
pub struct ExclusiveCancelled;

impl<K: Eq + Hash + Clone> ExclusiveExecutor<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `action` while holding the lock for `key`.
    pub async fn run_exclusively<F, T>(&self, key: &K, action: F) -> T
    where
        F: Future<Output = T>,
    {
        let lock = self.lock_for(key);
        let _guard = lock.lock().await;
        action.await
    }

    /// Same as [`ExclusiveExecutor::run_exclusively`], but gives up waiting for the lock
    /// if `cancellation` fires first.
    ///
    /// Once the lock is acquired the action runs to completion: cancellation is only
    /// observed while queueing.
    pub async fn run_exclusively_until<F, T>(
        &self,
        key: &K,
        cancellation: &CancellationToken,
        action: F,
    ) -> Result<T, ExclusiveCancelled>
    where
        F: Future<Output = T>,
    {
        let lock = self.lock_for(key);
        let _guard = tokio::select! {
            biased;
            _ = cancellation.cancelled() => return Err(ExclusiveCancelled),
            guard = lock.lock() => guard,
        };
        Ok(action.await)
    }

    /// Drop the lock for `key`.
    ///
    /// Actions already queued on the old lock still run exclusively among themselves.
    pub fn forget(&self, key: &K) {
        self.locks.remove(key);
    }

    fn lock_for(&self, key: &K) -> Arc<Mutex<()>> {
        // Clone the Arc out so the shard guard is released before awaiting.
        self.locks.entry(key.clone()).or_default().value().clone()
    }
}
