use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Keyed async locks: at most one `ensure_thread` in flight per session name
/// per platform. Locks are created lazily and never removed; the key space
/// is bounded by the session namespace.
pub struct NameLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl NameLocks {
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    /// Acquire the lock for `name`, waiting behind any holder.
    pub async fn acquire(&self, name: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }
}

impl Default for NameLocks {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn concurrent_holders_serialise_per_name() {
        let locks = Arc::new(NameLocks::new());
        let creations = Arc::new(AtomicUsize::new(0));
        let created = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let locks = Arc::clone(&locks);
            let creations = Arc::clone(&creations);
            let created = Arc::clone(&created);
            tasks.push(tokio::spawn(async move {
                let _guard = locks.acquire("s1").await;
                // find-or-create under the lock: only the first creates
                if created.load(Ordering::SeqCst) == 0 {
                    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                    created.store(1, Ordering::SeqCst);
                    creations.fetch_add(1, Ordering::SeqCst);
                }
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }
        assert_eq!(creations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn different_names_do_not_contend() {
        let locks = NameLocks::new();
        let g1 = locks.acquire("a").await;
        // acquiring a different name must not block
        let g2 = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            locks.acquire("b"),
        )
        .await;
        assert!(g2.is_ok());
        drop(g1);
    }
}
