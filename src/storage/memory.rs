// In-process store used by tests and ephemeral sessions.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use super::KeyValueStore;
use crate::core::errors::WalletError;

/// Injected behavior for writes to one key.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WriteFault {
    Fail,
    Delay(Duration),
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, Value>>>,
    faults: Arc<parking_lot::Mutex<HashMap<String, WriteFault>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw snapshot of every entry, for asserting what reached "disk".
    pub async fn dump(&self) -> HashMap<String, Value> {
        self.entries.lock().await.clone()
    }

    /// Makes later writes to `key` fail or stall; `None` restores normal writes.
    pub fn set_write_fault(&self, key: &str, fault: Option<WriteFault>) {
        let mut faults = self.faults.lock();
        match fault {
            Some(f) => faults.insert(key.to_string(), f),
            None => faults.remove(key),
        };
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, WalletError> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), WalletError> {
        let fault = self.faults.lock().get(key).copied();
        match fault {
            Some(WriteFault::Fail) => {
                return Err(WalletError::Storage(format!("write to {} rejected", key)));
            }
            Some(WriteFault::Delay(d)) => tokio::time::sleep(d).await,
            None => {}
        }
        self.entries.lock().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), WalletError> {
        self.entries.lock().await.remove(key);
        Ok(())
    }
}
