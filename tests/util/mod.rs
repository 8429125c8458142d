#![allow(dead_code)]

use ethers::types::U256;
use std::sync::Arc;
use wallet_engine::provider::testing::{MockTransport, MockTransportFactory};
use wallet_engine::storage::{KeyValueStore, MemoryStore};
use wallet_engine::{WalletApp, WalletConfig};

pub const PASSWORD: &str = "correct-horse";
pub const PHRASE: &str =
    "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

pub fn one_gwei() -> U256 {
    U256::from(1_000_000_000u64)
}

pub struct TestApp {
    pub app: Arc<WalletApp>,
    pub mock: Arc<MockTransport>,
    pub store: Arc<MemoryStore>,
}

/// Engine on chain 1 backed by an in-memory store and a scripted node.
pub async fn start(base_fee: Option<U256>) -> TestApp {
    start_with(WalletConfig::for_testing(), MockTransport::ethereum(1, base_fee)).await
}

pub async fn start_with(config: WalletConfig, mock: Arc<MockTransport>) -> TestApp {
    let store = Arc::new(MemoryStore::new());
    let dyn_store: Arc<dyn KeyValueStore> = store.clone();
    let app = WalletApp::start(config, dyn_store, MockTransportFactory::single(mock.clone()))
        .await
        .expect("engine starts");
    TestApp { app, mock, store }
}
