use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

/// Per-source-account mutual exclusion for reconciliation calls. Two
/// concurrent updates for the same account would otherwise race on the
/// "connection exists" check and double-create remote layers.
#[derive(Default)]
pub struct AccountLocks {
    inner: Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>,
}

impl AccountLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the lock for one account, held for the duration of a single
    /// reconciliation call.
    pub async fn acquire(&self, account_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().unwrap();
            // An entry whose Arc is only held by the map has no guard and no
            // waiter; reap those so the table does not grow by one entry per
            // account ever reconciled.
            map.retain(|id, l| *id == account_id || Arc::strong_count(l) > 1);
            map.entry(account_id)
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn serializes_access_per_account() {
        let locks = Arc::new(AccountLocks::new());
        let account = Uuid::new_v4();
        let counter = Arc::new(Mutex::new(0u32));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let counter = counter.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.acquire(account).await;
                let before = *counter.lock().unwrap();
                tokio::task::yield_now().await;
                *counter.lock().unwrap() = before + 1;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*counter.lock().unwrap(), 8);
    }

    #[tokio::test]
    async fn different_accounts_do_not_block_each_other() {
        let locks = AccountLocks::new();
        let _a = locks.acquire(Uuid::new_v4()).await;
        let _b = locks.acquire(Uuid::new_v4()).await;
    }

    #[tokio::test]
    async fn released_entries_are_reaped_on_the_next_acquire() {
        let locks = AccountLocks::new();

        drop(locks.acquire(Uuid::new_v4()).await);
        assert_eq!(locks.len(), 1);

        // Acquiring for another account sweeps the stale entry.
        let _guard = locks.acquire(Uuid::new_v4()).await;
        assert_eq!(locks.len(), 1);
    }

    #[tokio::test]
    async fn held_entries_survive_the_reap() {
        let locks = AccountLocks::new();
        let held = Uuid::new_v4();

        let _guard = locks.acquire(held).await;
        let _other = locks.acquire(Uuid::new_v4()).await;
        assert_eq!(locks.len(), 2);
    }
}
