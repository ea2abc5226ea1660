//! Named lock registry
//!
//! Process-wide exclusive locks keyed by string. Writers hold a key through a
//! [`LockGuard`]; readers that only need to know the key is free can probe it
//! with [`LockRegistry::is_busy`] or park on [`LockRegistry::wait`] without
//! contending for it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::debug;

/// Guards the length of stored CLIP embeddings
pub const EMBEDDING_DIMENSION_LOCK: &str = "embedding-dimension";

/// `true` while the key is held
type Slot = Arc<watch::Sender<bool>>;

#[derive(Default)]
pub struct LockRegistry {
    slots: Mutex<HashMap<String, Slot>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: &str) -> Slot {
        self.slots
            .lock()
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(watch::channel(false).0))
            .clone()
    }

    fn existing_slot(&self, key: &str) -> Option<Slot> {
        self.slots.lock().get(key).cloned()
    }

    /// Take the key if nobody holds it
    pub fn try_acquire(&self, key: &str) -> Option<LockGuard> {
        Self::try_take(key, self.slot(key))
    }

    fn try_take(key: &str, slot: Slot) -> Option<LockGuard> {
        let taken = slot.send_if_modified(|held| {
            if *held {
                false
            } else {
                *held = true;
                true
            }
        });

        if taken {
            debug!("Acquired lock {}", key);
            Some(LockGuard {
                key: key.to_string(),
                slot,
            })
        } else {
            None
        }
    }

    /// Take the key, waiting for the current holder to release it
    pub async fn acquire(&self, key: &str) -> LockGuard {
        let slot = self.slot(key);
        loop {
            if let Some(guard) = Self::try_take(key, slot.clone()) {
                return guard;
            }
            let mut rx = slot.subscribe();
            // the sender lives in `slot`, so this cannot fail
            let _ = rx.wait_for(|held| !*held).await;
        }
    }

    /// Run `f` while holding `key`. The key is released on every exit path,
    /// including errors returned by `f`, panics and cancellation.
    pub async fn with_lock<F, Fut, T>(&self, key: &str, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _guard = self.acquire(key).await;
        f().await
    }

    pub fn is_busy(&self, key: &str) -> bool {
        match self.existing_slot(key) {
            Some(slot) => {
                let held = *slot.borrow();
                held
            }
            None => false,
        }
    }

    /// Resolve once `key` is free. Does not take the key.
    pub async fn wait(&self, key: &str) {
        let Some(slot) = self.existing_slot(key) else {
            return;
        };
        let mut rx = slot.subscribe();
        let _ = rx.wait_for(|held| !*held).await;
    }
}

/// Exclusive hold on a key; released on drop
pub struct LockGuard {
    key: String,
    slot: Slot,
}

impl LockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.slot.send_replace(false);
        debug!("Released lock {}", self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_try_acquire_is_exclusive() {
        let locks = LockRegistry::new();
        let guard = locks.try_acquire("a").unwrap();
        assert!(locks.is_busy("a"));
        assert!(locks.try_acquire("a").is_none());
        // other keys are independent
        assert!(!locks.is_busy("b"));
        assert!(locks.try_acquire("b").is_some());

        drop(guard);
        assert!(!locks.is_busy("a"));
        assert!(locks.try_acquire("a").is_some());
    }

    #[tokio::test]
    async fn test_with_lock_releases_on_error() {
        let locks = LockRegistry::new();

        let result: Result<(), &str> = locks
            .with_lock(EMBEDDING_DIMENSION_LOCK, || async {
                assert!(locks.is_busy(EMBEDDING_DIMENSION_LOCK));
                Err("update failed")
            })
            .await;

        assert_eq!(result, Err("update failed"));
        assert!(!locks.is_busy(EMBEDDING_DIMENSION_LOCK));
    }

    #[tokio::test]
    async fn test_with_lock_releases_on_cancel() {
        let locks = Arc::new(LockRegistry::new());
        let task = {
            let locks = locks.clone();
            tokio::spawn(async move {
                locks
                    .with_lock("k", || tokio::time::sleep(Duration::from_secs(60)))
                    .await
            })
        };

        while !locks.is_busy("k") {
            tokio::task::yield_now().await;
        }
        task.abort();
        let _ = task.await;
        assert!(!locks.is_busy("k"));
    }

    #[tokio::test]
    async fn test_wait_on_free_key_returns_immediately() {
        let locks = LockRegistry::new();
        tokio::time::timeout(Duration::from_secs(1), locks.wait("never-held"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_unblocks_all_waiters() {
        let locks = Arc::new(LockRegistry::new());
        let guard = locks.try_acquire(EMBEDDING_DIMENSION_LOCK).unwrap();

        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let locks = locks.clone();
                tokio::spawn(async move {
                    locks.wait(EMBEDDING_DIMENSION_LOCK).await;
                    locks.is_busy(EMBEDDING_DIMENSION_LOCK)
                })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(waiters.iter().all(|w| !w.is_finished()));

        drop(guard);
        for waiter in waiters {
            let busy_after_resume = tokio::time::timeout(Duration::from_secs(1), waiter)
                .await
                .unwrap()
                .unwrap();
            assert!(!busy_after_resume);
        }
    }

    #[tokio::test]
    async fn test_acquire_waits_for_holder() {
        let locks = Arc::new(LockRegistry::new());
        let guard = locks.acquire("k").await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let guard = locks.acquire("k").await;
                guard.key().to_string()
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        let key = tokio::time::timeout(Duration::from_secs(1), contender).await.unwrap().unwrap();
        assert_eq!(key, "k");
        assert!(!locks.is_busy("k"));
    }
}
