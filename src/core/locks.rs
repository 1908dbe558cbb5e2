//! Per-key async locks
//!
//! Serializes work on one account or one transaction while letting work on
//! different keys proceed in parallel. The lock table is a `DashMap` of shared
//! mutexes, the same fine-grained locking the stores use for their data.
//! Entries live only while some task holds or waits for them.

use dashmap::DashMap;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockTable<K> = DashMap<K, Arc<Mutex<()>>>;

/// Table of async mutexes keyed by `K`
///
/// Guards are owned, so they can be held across `.await` points (provider calls
/// excepted: the orchestrator never holds a lock while talking to a provider).
#[derive(Debug)]
pub struct KeyedLocks<K: Eq + Hash> {
    locks: Arc<LockTable<K>>,
}

/// Exclusive access to one key, released on drop
#[derive(Debug)]
pub struct KeyGuard<K: Eq + Hash> {
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<LockTable<K>>,
    key: K,
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    /// Create an empty lock table
    pub fn new() -> Self {
        Self {
            locks: Arc::new(DashMap::new()),
        }
    }

    /// Wait for exclusive access to `key`
    pub async fn lock(&self, key: &K) -> KeyGuard<K> {
        // The map shard guard is released before awaiting the mutex
        let mutex = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        KeyGuard {
            guard: Some(mutex.lock_owned().await),
            locks: Arc::clone(&self.locks),
            key: key.clone(),
        }
    }

    /// Keys currently held or waited for
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Whether no key is held or waited for
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl<K: Eq + Hash + Clone> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash> Drop for KeyGuard<K> {
    fn drop(&mut self) {
        // Releasing first drops this guard's handle on the mutex
        drop(self.guard.take());
        // Waiters hold their own handle, so a count of one means only the table
        // still refers to the mutex. The shard lock orders this with `lock`.
        self.locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}
