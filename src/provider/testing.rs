//! Scripted JSON-RPC transport for tests.
//!
//! Each method gets a handler; every call is recorded so tests can assert on
//! what reached the "node" and when.

use async_trait::async_trait;
use ethers::types::{H256, U256};
use ethers::utils::keccak256;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use super::transport::{RpcTransport, TransportFactory};
use crate::core::domain::Network;
use crate::core::errors::WalletError;

type Handler = Arc<dyn Fn(&Value) -> Result<Value, WalletError> + Send + Sync>;

#[derive(Default)]
pub struct MockTransport {
    handlers: Mutex<HashMap<String, Handler>>,
    calls: Mutex<Vec<(String, Value)>>,
    delay: Mutex<Option<Duration>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A node on `chain_id` that accepts transactions and mines them on the
    /// next receipt lookup. `base_fee` of `None` makes it a pre-London chain.
    pub fn ethereum(chain_id: u64, base_fee: Option<U256>) -> Arc<Self> {
        let mock = Self::new();
        mock.on("eth_chainId", json!(format!("0x{:x}", chain_id)));
        mock.on("net_version", json!(chain_id.to_string()));
        let mut block = json!({
            "number": "0x10",
            "hash": format!("{:?}", H256::repeat_byte(0x11)),
            "timestamp": "0x6553f100",
            "gasLimit": "0x1c9c380",
        });
        if let Some(fee) = base_fee {
            block["baseFeePerGas"] = json!(fee);
        }
        mock.on("eth_getBlockByNumber", block);
        mock.on("eth_getTransactionCount", json!("0x0"));
        mock.on("eth_gasPrice", json!(U256::from(20_000_000_000u64)));
        mock.on("eth_estimateGas", json!("0x5208"));
        mock.on(
            "eth_feeHistory",
            json!({
                "oldestBlock": "0xc",
                "baseFeePerGas": ["0x3b9aca00", "0x3b9aca00", "0x3b9aca00", "0x3b9aca00", "0x3b9aca00", "0x3b9aca00"],
                "gasUsedRatio": [0.5, 0.5, 0.5, 0.5, 0.5],
                "reward": [
                    ["0x3b9aca00", "0x77359400", "0xb2d05e00"],
                    ["0x3b9aca00", "0x77359400", "0xb2d05e00"],
                    ["0x3b9aca00", "0x77359400", "0xb2d05e00"],
                    ["0x3b9aca00", "0x77359400", "0xb2d05e00"],
                    ["0x3b9aca00", "0x77359400", "0xb2d05e00"]
                ]
            }),
        );

        let broadcast: Arc<Mutex<HashSet<String>>> = Arc::default();
        let sent = broadcast.clone();
        mock.on_fn("eth_sendRawTransaction", move |params| {
            let raw = params[0].as_str().unwrap_or_default().trim_start_matches("0x");
            let bytes = hex::decode(raw)
                .map_err(|_| WalletError::from_rpc(-32602, "invalid raw transaction"))?;
            let hash = format!("{:?}", H256::from(keccak256(bytes)));
            sent.lock().insert(hash.clone());
            Ok(json!(hash))
        });
        mock.on_fn("eth_getTransactionReceipt", move |params| {
            let hash = params[0].as_str().unwrap_or_default().to_string();
            if broadcast.lock().contains(&hash) {
                Ok(json!({
                    "transactionHash": hash,
                    "blockNumber": "0x11",
                    "status": "0x1",
                }))
            } else {
                Ok(Value::Null)
            }
        });
        mock
    }

    /// Fixed response for `method`.
    pub fn on(&self, method: &str, response: Value) {
        self.on_fn(method, move |_| Ok(response.clone()));
    }

    pub fn on_error(&self, method: &str, error: WalletError) {
        self.on_fn(method, move |_| Err(error.clone()));
    }

    pub fn on_fn<F>(&self, method: &str, handler: F)
    where
        F: Fn(&Value) -> Result<Value, WalletError> + Send + Sync + 'static,
    {
        self.handlers.lock().insert(method.to_string(), Arc::new(handler));
    }

    /// Delays every response, to widen race windows in concurrency tests.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self, method: &str) -> usize {
        self.calls.lock().iter().filter(|(m, _)| m == method).count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl RpcTransport for MockTransport {
    async fn request(&self, method: &str, params: Value) -> Result<Value, WalletError> {
        self.calls.lock().push((method.to_string(), params.clone()));
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let handler = self.handlers.lock().get(method).cloned();
        match handler {
            Some(handler) => handler(&params),
            None => Err(WalletError::from_rpc(-32601, format!("method {} not found", method))),
        }
    }
}

/// Hands out mock transports by RPC URL, with an optional fallback.
#[derive(Default)]
pub struct MockTransportFactory {
    by_url: Mutex<HashMap<String, Arc<MockTransport>>>,
    fallback: Option<Arc<MockTransport>>,
}

impl MockTransportFactory {
    /// Every network resolves to `transport`.
    pub fn single(transport: Arc<MockTransport>) -> Arc<Self> {
        Arc::new(Self { by_url: Mutex::default(), fallback: Some(transport) })
    }

    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(&self, rpc_url: &str, transport: Arc<MockTransport>) {
        self.by_url.lock().insert(rpc_url.to_string(), transport);
    }
}

impl TransportFactory for MockTransportFactory {
    fn connect(&self, network: &Network) -> Result<Arc<dyn RpcTransport>, WalletError> {
        let transport = self.by_url.lock().get(&network.rpc_url).cloned();
        match transport.or_else(|| self.fallback.clone()) {
            Some(t) => Ok(t),
            None => Err(WalletError::NetworkUnavailable(format!(
                "no mock registered for {}",
                network.rpc_url
            ))),
        }
    }
}
