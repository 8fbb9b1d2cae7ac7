//! Keyed async mutexes.
//!
//! One registry per aggregate kind (bets, wallets). Holding a guard serializes work on a
//! single key inside this process only; cross-process safety comes from the conditional
//! updates and version guards in the store.

use parking_lot::Mutex;
use std::{collections::HashMap, hash::Hash, sync::Arc};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Registry size above which idle entries are dropped on the next acquire.
const PRUNE_THRESHOLD: usize = 1024;

/// Guard returned by [`KeyedLocks::acquire`]. The lock is released on drop.
pub type KeyedGuard = OwnedMutexGuard<()>;

pub struct KeyedLocks<K> {
    locks: Mutex<HashMap<K, Arc<AsyncMutex<()>>>>,
}

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }
}

impl<K> KeyedLocks<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    pub async fn acquire(&self, key: &K) -> KeyedGuard {
        let lock = {
            let mut locks = self.locks.lock();
            if locks.len() > PRUNE_THRESHOLD {
                // Only the registry holds an idle entry.
                locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            locks
                .entry(key.clone())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.lock().is_empty()
    }
}
