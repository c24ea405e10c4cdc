//! Per (item, language) serialisation
//!
//! Two acquisition attempts for the same item and language would race to
//! download or transcribe the same subtitle. [`ItemLocks`] hands out one
//! async mutex per key; the map entry is removed when its last holder or
//! waiter goes away, so the map only holds keys that are in use.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::trace;

type LockKey = (String, String);
type LockMap = HashMap<LockKey, Arc<AsyncMutex<()>>>;

#[derive(Debug, Default)]
pub struct ItemLocks {
    slots: Arc<Mutex<LockMap>>,
}

/// Held for the duration of one acquisition attempt
#[derive(Debug)]
pub struct ItemGuard {
    key: LockKey,
    slots: Arc<Mutex<LockMap>>,
    slot: Arc<AsyncMutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl ItemLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other attempt holds (`item_id`, `language`)
    pub async fn lock(&self, item_id: &str, language: &str) -> ItemGuard {
        let key = (item_id.to_string(), language.to_ascii_lowercase());
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(slots.entry(key.clone()).or_default())
        };

        let guard = Arc::clone(&slot).lock_owned().await;
        trace!(item_id = %key.0, language = %key.1, "Item lock acquired");

        ItemGuard {
            key,
            slots: Arc::clone(&self.slots),
            slot,
            guard: Some(guard),
        }
    }

    /// Keys currently held or waited on
    pub fn active(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Drop for ItemGuard {
    fn drop(&mut self) {
        // Release the async lock first so waiters can proceed
        drop(self.guard.take());

        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let unused = slots
            .get(&self.key)
            .is_some_and(|current| Arc::ptr_eq(current, &self.slot) && Arc::strong_count(current) == 2);
        if unused {
            slots.remove(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::task::JoinSet;

    #[tokio::test]
    async fn test_same_key_is_serialised() {
        let locks = Arc::new(ItemLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let mut tasks = JoinSet::new();
        for _ in 0..8 {
            let locks = Arc::clone(&locks);
            let inside = Arc::clone(&inside);
            let max_inside = Arc::clone(&max_inside);
            tasks.spawn(async move {
                let _guard = locks.lock("item-1", "en").await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_inside.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            });
        }
        while let Some(result) = tasks.join_next().await {
            result.unwrap();
        }

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert_eq!(locks.active(), 0);
    }

    #[tokio::test]
    async fn test_different_keys_do_not_block() {
        let locks = ItemLocks::new();
        let _a = locks.lock("item-1", "en").await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.lock("item-1", "fr")).await;
        assert!(b.is_ok());
        let c = tokio::time::timeout(Duration::from_millis(100), locks.lock("item-2", "en")).await;
        assert!(c.is_ok());
    }

    #[tokio::test]
    async fn test_language_key_is_case_insensitive() {
        let locks = ItemLocks::new();
        let _held = locks.lock("item-1", "EN").await;
        let blocked = tokio::time::timeout(Duration::from_millis(50), locks.lock("item-1", "en")).await;
        assert!(blocked.is_err());
    }

    #[tokio::test]
    async fn test_entry_removed_after_release() {
        let locks = ItemLocks::new();
        {
            let _guard = locks.lock("item-1", "en").await;
            assert_eq!(locks.active(), 1);
        }
        assert_eq!(locks.active(), 0);
    }
}
