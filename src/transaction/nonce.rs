//! Nonce 管理
//!
//! Per (account, chain) next-nonce tracking. The high-water mark is persisted
//! under `nonces` so a restart never reuses a nonce the node has not yet
//! counted as pending.

use ethers::types::Address;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use crate::core::domain::address_key;
use crate::core::errors::WalletError;
use crate::storage::{get_typed, keys, set_typed, KeyValueStore};

pub struct NonceTracker {
    store: Arc<dyn KeyValueStore>,
    locks: parking_lot::Mutex<HashMap<String, Arc<Mutex<()>>>>,
    /// In-process marks; cover commits whose write to the store failed
    issued: parking_lot::Mutex<HashMap<String, u64>>,
    /// Serializes read-modify-write of the shared `nonces` entry
    persist: Mutex<()>,
}

/// Held for the whole reserve, sign and broadcast sequence of one account.
pub struct NonceGuard {
    _guard: OwnedMutexGuard<()>,
}

fn tracker_key(address: &Address, chain_id: u64) -> String {
    format!("{}:{}", address_key(address), chain_id)
}

impl NonceTracker {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            locks: parking_lot::Mutex::new(HashMap::new()),
            issued: parking_lot::Mutex::new(HashMap::new()),
            persist: Mutex::new(()),
        }
    }

    /// Waits until no other send for this account and chain is in flight.
    pub async fn lock(&self, address: &Address, chain_id: u64) -> NonceGuard {
        let lock = self
            .locks
            .lock()
            .entry(tracker_key(address, chain_id))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        NonceGuard { _guard: lock.lock_owned().await }
    }

    /// Locally tracked next nonce, 0 if never used.
    pub async fn local_next(&self, address: &Address, chain_id: u64) -> Result<u64, WalletError> {
        let key = tracker_key(address, chain_id);
        let marks: Option<BTreeMap<String, u64>> = get_typed(self.store.as_ref(), keys::NONCES).await?;
        let stored = marks.and_then(|m| m.get(&key).copied()).unwrap_or(0);
        let issued = self.issued.lock().get(&key).copied().unwrap_or(0);
        Ok(stored.max(issued))
    }

    /// max(pending count on chain, local high-water mark).
    pub async fn next_nonce(
        &self,
        _guard: &NonceGuard,
        address: &Address,
        chain_id: u64,
        pending: u64,
    ) -> Result<u64, WalletError> {
        let local = self.local_next(address, chain_id).await?;
        let nonce = pending.max(local);
        debug!(address = ?address, chain_id, pending, local, nonce, "Nonce resolved");
        Ok(nonce)
    }

    /// Records that `nonce` was broadcast. Never moves the mark backwards.
    /// The in-process mark advances even when the store write fails.
    pub async fn commit(
        &self,
        _guard: &NonceGuard,
        address: &Address,
        chain_id: u64,
        nonce: u64,
    ) -> Result<(), WalletError> {
        let next = nonce
            .checked_add(1)
            .ok_or_else(|| WalletError::Validation(format!("Nonce overflow for {:?}", address)))?;

        let key = tracker_key(address, chain_id);
        {
            let mut issued = self.issued.lock();
            let mark = issued.entry(key.clone()).or_insert(0);
            *mark = (*mark).max(next);
        }

        let _persist = self.persist.lock().await;
        let mut marks: BTreeMap<String, u64> =
            get_typed(self.store.as_ref(), keys::NONCES).await?.unwrap_or_default();
        let entry = marks.entry(key).or_insert(0);
        if next > *entry {
            *entry = next;
            set_typed(self.store.as_ref(), keys::NONCES, &marks).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStore, WriteFault};
    use std::time::Duration;

    #[tokio::test]
    async fn test_next_nonce_takes_maximum() {
        let tracker = NonceTracker::new(Arc::new(MemoryStore::new()));
        let address = Address::repeat_byte(1);
        let guard = tracker.lock(&address, 1).await;

        assert_eq!(tracker.next_nonce(&guard, &address, 1, 5).await.unwrap(), 5);
        tracker.commit(&guard, &address, 1, 7).await.unwrap();
        assert_eq!(tracker.next_nonce(&guard, &address, 1, 5).await.unwrap(), 8);
        assert_eq!(tracker.next_nonce(&guard, &address, 1, 10).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_commit_never_decrements_and_is_per_chain() {
        let store = Arc::new(MemoryStore::new());
        let tracker = NonceTracker::new(store.clone());
        let address = Address::repeat_byte(2);
        let guard = tracker.lock(&address, 1).await;
        tracker.commit(&guard, &address, 1, 4).await.unwrap();
        tracker.commit(&guard, &address, 1, 2).await.unwrap();
        assert_eq!(tracker.local_next(&address, 1).await.unwrap(), 5);
        assert_eq!(tracker.local_next(&address, 137).await.unwrap(), 0);

        // survives a new tracker over the same store
        let reopened = NonceTracker::new(store);
        assert_eq!(reopened.local_next(&address, 1).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_unpersisted_commit_still_advances_in_process() {
        let store = Arc::new(MemoryStore::new());
        store.set_write_fault(keys::NONCES, Some(WriteFault::Fail));
        let tracker = NonceTracker::new(store.clone());
        let address = Address::repeat_byte(5);
        let guard = tracker.lock(&address, 1).await;

        assert_eq!(tracker.commit(&guard, &address, 1, 0).await.unwrap_err().kind(), "Storage");
        assert_eq!(tracker.next_nonce(&guard, &address, 1, 0).await.unwrap(), 1);
        assert!(!store.dump().await.contains_key(keys::NONCES));
    }

    #[tokio::test]
    async fn test_lock_is_exclusive_per_account() {
        let tracker = Arc::new(NonceTracker::new(Arc::new(MemoryStore::new())));
        let a = Address::repeat_byte(3);
        let b = Address::repeat_byte(4);

        let held = tracker.lock(&a, 1).await;
        // a different account is not blocked
        let _other = tracker.lock(&b, 1).await;

        let waiter = {
            let tracker = tracker.clone();
            tokio::spawn(async move {
                let _g = tracker.lock(&a, 1).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!waiter.is_finished());
        drop(held);
        waiter.await.unwrap();
    }
}
