//! Per-key locking so overlapping batches serialize on shared records

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::types::*;

/// Guards held for the lifetime of one batch
#[derive(Debug)]
pub struct KeyGuards {
    guards: Vec<OwnedMutexGuard<()>>,
}

impl KeyGuards {
    pub fn len(&self) -> usize {
        self.guards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }
}

/// Registry of async mutexes, one per natural key in use
#[derive(Debug, Default)]
pub struct KeyLocks {
    locks: Mutex<HashMap<NaturalKey, Arc<AsyncMutex<()>>>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock every key, in sorted order so two batches can never deadlock
    pub async fn acquire(&self, keys: &BTreeSet<NaturalKey>) -> KeyGuards {
        let mutexes: Vec<Arc<AsyncMutex<()>>> = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            // Nobody else references these entries, so they can go
            locks.retain(|_, mutex| Arc::strong_count(mutex) > 1);
            keys.iter()
                .map(|key| locks.entry(key.clone()).or_default().clone())
                .collect()
        };

        let mut guards = Vec::with_capacity(mutexes.len());
        for mutex in mutexes {
            guards.push(mutex.lock_owned().await);
        }
        KeyGuards { guards }
    }

    /// Number of keys currently tracked
    pub fn tracked(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn keys(ids: &[&str]) -> BTreeSet<NaturalKey> {
        ids.iter().map(|id| NaturalKey::credit_note(id)).collect()
    }

    #[tokio::test]
    async fn test_overlapping_keys_wait() {
        let locks = Arc::new(KeyLocks::new());
        let held = locks.acquire(&keys(&["a", "b"])).await;
        assert_eq!(held.len(), 2);

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move { locks.acquire(&keys(&["b", "c"])).await.len() })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(held);
        assert_eq!(contender.await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_disjoint_keys_do_not_wait() {
        let locks = KeyLocks::new();
        let _first = locks.acquire(&keys(&["a"])).await;
        let second = tokio::time::timeout(Duration::from_millis(50), locks.acquire(&keys(&["z"])))
            .await
            .unwrap();
        assert_eq!(second.len(), 1);
    }

    #[tokio::test]
    async fn test_released_entries_are_pruned() {
        let locks = KeyLocks::new();
        drop(locks.acquire(&keys(&["a", "b"])).await);
        let _held = locks.acquire(&keys(&["c"])).await;
        assert_eq!(locks.tracked(), 1);
    }
}
