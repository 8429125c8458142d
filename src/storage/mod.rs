//! Persistence backend.
//!
//! The engine stores two categories of data: the encrypted vault blob and
//! plain configuration (selected network, selected address, public account
//! list, nonce high-water marks, token list). The store itself performs no
//! schema validation; a missing key reads as `None` ("uninitialized").

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::core::errors::WalletError;

mod memory;
mod sqlite;

pub use memory::{MemoryStore, WriteFault};
pub use sqlite::SqliteStore;

/// Named keys written by the engine.
pub mod keys {
    pub const VAULT: &str = "vault";
    pub const ACCOUNTS: &str = "accounts";
    pub const SELECTED_ADDRESS: &str = "selectedAddress";
    pub const PROVIDER: &str = "provider";
    pub const NONCES: &str = "nonces";
    pub const TOKENS: &str = "tokens";
}

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, WalletError>;

    async fn set(&self, key: &str, value: Value) -> Result<(), WalletError>;

    async fn remove(&self, key: &str) -> Result<(), WalletError>;
}

/// Reads `key` and deserializes it; absent keys yield `None`.
pub async fn get_typed<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<T>, WalletError> {
    match store.get(key).await? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

pub async fn set_typed<T: Serialize + ?Sized>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> Result<(), WalletError> {
    store.set(key, serde_json::to_value(value)?).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn test_typed_helpers() {
        let store = MemoryStore::new();
        let mut nonces = BTreeMap::new();
        nonces.insert("0xabc:1".to_string(), 7u64);
        set_typed(&store, keys::NONCES, &nonces).await.unwrap();

        let loaded: Option<BTreeMap<String, u64>> =
            get_typed(&store, keys::NONCES).await.unwrap();
        assert_eq!(loaded.unwrap()["0xabc:1"], 7);

        let missing: Option<String> = get_typed(&store, keys::SELECTED_ADDRESS).await.unwrap();
        assert!(missing.is_none());
    }
}
