//! Active-network tracking and RPC access.
//!
//! Exactly one [`Network`] is current at a time. Operations that must not
//! straddle a network switch (nonce reservation, broadcast) hold a
//! [`NetworkLease`]; a switch waits for every outstanding lease before the new
//! network is installed and advertised on the change channel.

use ethers::types::{H256, U256, U64};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, OwnedRwLockReadGuard, RwLock};
use tracing::{debug, info, warn};

use crate::core::config::WalletConfig;
use crate::core::domain::{Network, NetworkType};
use crate::core::errors::WalletError;
use crate::storage::{get_typed, keys, set_typed, KeyValueStore};

pub mod testing;
pub mod transport;

pub use transport::{HttpTransport, HttpTransportFactory, RpcTransport, TransportFactory};

/// The fields of a block header the engine relies on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BlockSummary {
    pub number: Option<U64>,
    pub hash: Option<H256>,
    pub timestamp: U256,
    pub gas_limit: U256,
    pub base_fee_per_gas: Option<U256>,
}

/// Network plus the transport bound to it. Replaced wholesale on a switch.
#[derive(Clone)]
pub struct ActiveNetwork {
    pub network: Network,
    /// Incremented on every switch
    pub epoch: u64,
    transport: Arc<dyn RpcTransport>,
}

impl ActiveNetwork {
    pub fn transport(&self) -> Arc<dyn RpcTransport> {
        self.transport.clone()
    }
}

/// Holds the current network in place until dropped.
pub struct NetworkLease {
    guard: OwnedRwLockReadGuard<ActiveNetwork>,
    timeout: Duration,
}

impl NetworkLease {
    pub fn network(&self) -> &Network {
        &self.guard.network
    }

    pub fn epoch(&self) -> u64 {
        self.guard.epoch
    }

    pub fn transport(&self) -> Arc<dyn RpcTransport> {
        self.guard.transport.clone()
    }

    pub async fn query(&self, method: &str, params: Value) -> Result<Value, WalletError> {
        timed_request(self.guard.transport.as_ref(), method, params, self.timeout).await
    }
}

pub struct ProviderController {
    config: Arc<WalletConfig>,
    store: Arc<dyn KeyValueStore>,
    factory: Arc<dyn TransportFactory>,
    active: Arc<RwLock<ActiveNetwork>>,
    /// (epoch, compatible)
    eip1559: parking_lot::Mutex<Option<(u64, bool)>>,
    changes: watch::Sender<Network>,
    /// Serializes switches so the installed, persisted and advertised
    /// networks always agree.
    switching: tokio::sync::Mutex<()>,
    rpc_timeout: Duration,
}

impl ProviderController {
    /// Binds to the configured default network. Call
    /// [`initialize_provider`](Self::initialize_provider) to restore the
    /// persisted selection.
    pub fn new(
        config: Arc<WalletConfig>,
        store: Arc<dyn KeyValueStore>,
        factory: Arc<dyn TransportFactory>,
    ) -> Result<Self, WalletError> {
        let network = default_network(&config)?;
        let transport = factory.connect(&network)?;
        let (changes, _) = watch::channel(network.clone());
        let rpc_timeout = Duration::from_millis(config.rpc_timeout_ms);

        Ok(Self {
            config,
            store,
            factory,
            active: Arc::new(RwLock::new(ActiveNetwork { network, epoch: 0, transport })),
            eip1559: parking_lot::Mutex::new(None),
            changes,
            switching: tokio::sync::Mutex::new(()),
            rpc_timeout,
        })
    }

    /// Establishes the RPC client for the persisted (or default) network.
    pub async fn initialize_provider(&self) -> Result<Network, WalletError> {
        let stored: Option<Network> = match get_typed(self.store.as_ref(), keys::PROVIDER).await {
            Ok(n) => n,
            Err(e) => {
                warn!("Ignoring unreadable provider selection: {}", e);
                None
            }
        };
        let network = match stored {
            Some(n) => n,
            None => default_network(&self.config)?,
        };
        info!(chain_id = network.chain_id, "Initializing provider");
        self.switch(network).await
    }

    /// Switches to a custom endpoint.
    pub async fn set_rpc_target(&self, rpc_url: &str, chain_id: u64) -> Result<Network, WalletError> {
        reqwest::Url::parse(rpc_url.trim())
            .map_err(|e| WalletError::Validation(format!("Invalid RPC URL: {}", e)))?;
        self.switch(Network {
            chain_id,
            rpc_url: rpc_url.trim().to_string(),
            network_type: NetworkType::Custom,
        })
        .await
    }

    /// Switches to a built-in network.
    pub async fn set_provider_type(&self, chain_id: u64) -> Result<Network, WalletError> {
        let builtin = self.config.network_by_chain_id(chain_id).ok_or_else(|| {
            WalletError::Validation(format!("chain {} is not a built-in network", chain_id))
        })?;
        self.switch(Network {
            chain_id,
            rpc_url: builtin.rpc_url.clone(),
            network_type: NetworkType::BuiltIn,
        })
        .await
    }

    async fn switch(&self, network: Network) -> Result<Network, WalletError> {
        let transport = self.factory.connect(&network)?;

        let _switching = self.switching.lock().await;
        // A failed write leaves the old network installed.
        set_typed(self.store.as_ref(), keys::PROVIDER, &network).await?;

        // Blocks until every outstanding lease on the old network is released.
        let epoch = {
            let mut active = self.active.write().await;
            let epoch = active.epoch + 1;
            *active = ActiveNetwork { network: network.clone(), epoch, transport };
            *self.eip1559.lock() = None;
            epoch
        };

        info!(chain_id = network.chain_id, rpc_url = %network.rpc_url, epoch, "Network changed");
        self.changes.send_replace(network.clone());
        Ok(network)
    }

    /// Pins the current network until the lease is dropped.
    pub async fn lease(&self) -> NetworkLease {
        NetworkLease { guard: self.active.clone().read_owned().await, timeout: self.rpc_timeout }
    }

    /// Receives the new [`Network`] after every switch.
    pub fn subscribe(&self) -> watch::Receiver<Network> {
        self.changes.subscribe()
    }

    /// Snapshot of the active network. Requests made through the snapshot's
    /// transport keep going to that network even after a switch.
    pub async fn current(&self) -> ActiveNetwork {
        self.active.read().await.clone()
    }

    /// Epoch of the active network; changes on every switch.
    pub async fn epoch(&self) -> u64 {
        self.active.read().await.epoch
    }

    pub async fn get_current_network(&self) -> Network {
        self.active.read().await.network.clone()
    }

    pub async fn get_current_chain_id(&self) -> u64 {
        self.active.read().await.network.chain_id
    }

    /// Generic passthrough used by Transaction and GasFee.
    pub async fn query(&self, method: &str, params: Value) -> Result<Value, WalletError> {
        let transport = self.active.read().await.transport.clone();
        timed_request(transport.as_ref(), method, params, self.rpc_timeout).await
    }

    pub async fn query_as<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, WalletError> {
        decode(method, self.query(method, params).await?)
    }

    pub async fn get_latest_block(&self) -> Result<BlockSummary, WalletError> {
        let block: Option<BlockSummary> =
            self.query_as("eth_getBlockByNumber", json!(["latest", false])).await?;
        block.ok_or_else(|| WalletError::from_rpc(-32000, "latest block not available"))
    }

    pub async fn get_network_version(&self) -> Result<String, WalletError> {
        self.query_as("net_version", json!([])).await
    }

    /// Chain id as reported by the node, which may differ from the configured one.
    pub async fn get_network_id(&self) -> Result<u64, WalletError> {
        let id: U64 = self.query_as("eth_chainId", json!([])).await?;
        Ok(id.as_u64())
    }

    /// Whether the latest block carries a base fee. Cached until the network changes.
    pub async fn get_eip1559_compatibility(&self) -> Result<bool, WalletError> {
        let active = self.current().await;
        self.eip1559_compatibility_of(&active, self.rpc_timeout).await
    }

    /// Probes `active` specifically, so a caller working from a snapshot never
    /// mixes answers from two networks.
    pub async fn eip1559_compatibility_of(
        &self,
        active: &ActiveNetwork,
        timeout: Duration,
    ) -> Result<bool, WalletError> {
        if let Some((cached_epoch, compatible)) = *self.eip1559.lock() {
            if cached_epoch == active.epoch {
                return Ok(compatible);
            }
        }

        let block: Option<BlockSummary> = decode(
            "eth_getBlockByNumber",
            timed_request(
                active.transport.as_ref(),
                "eth_getBlockByNumber",
                json!(["latest", false]),
                timeout,
            )
            .await?,
        )?;
        let compatible = block.map(|b| b.base_fee_per_gas.is_some()).unwrap_or(false);
        debug!(chain_id = active.network.chain_id, compatible, "EIP-1559 probe");
        *self.eip1559.lock() = Some((active.epoch, compatible));
        Ok(compatible)
    }
}

fn default_network(config: &WalletConfig) -> Result<Network, WalletError> {
    let builtin = config.network_by_chain_id(config.default_chain_id).ok_or_else(|| {
        WalletError::Config(format!("default chain {} not configured", config.default_chain_id))
    })?;
    Ok(Network {
        chain_id: builtin.chain_id,
        rpc_url: builtin.rpc_url.clone(),
        network_type: NetworkType::BuiltIn,
    })
}

pub(crate) async fn timed_request(
    transport: &dyn RpcTransport,
    method: &str,
    params: Value,
    timeout: Duration,
) -> Result<Value, WalletError> {
    match tokio::time::timeout(timeout, transport.request(method, params)).await {
        Ok(result) => result,
        Err(_) => Err(WalletError::NetworkUnavailable(format!(
            "{} timed out after {:?}",
            method, timeout
        ))),
    }
}

pub(crate) fn decode<T: DeserializeOwned>(method: &str, value: Value) -> Result<T, WalletError> {
    serde_json::from_value(value)
        .map_err(|e| WalletError::Serialization(format!("unexpected {} response: {}", method, e)))
}

#[cfg(test)]
mod tests {
    use super::testing::{MockTransport, MockTransportFactory};
    use super::*;
    use crate::storage::{MemoryStore, WriteFault};

    fn controller(factory: Arc<MockTransportFactory>) -> (ProviderController, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let provider =
            ProviderController::new(Arc::new(WalletConfig::for_testing()), store.clone(), factory)
                .unwrap();
        (provider, store)
    }

    #[tokio::test]
    async fn test_initialize_defaults_to_mainnet() {
        let mock = MockTransport::ethereum(1, Some(U256::from(1_000_000_000u64)));
        let (provider, store) = controller(MockTransportFactory::single(mock));
        let network = provider.initialize_provider().await.unwrap();
        assert_eq!(network.chain_id, 1);
        assert_eq!(network.network_type, NetworkType::BuiltIn);
        assert!(store.dump().await.contains_key(keys::PROVIDER));
    }

    #[tokio::test]
    async fn test_initialize_restores_persisted_selection() {
        let mock = MockTransport::ethereum(1337, None);
        let (provider, store) = controller(MockTransportFactory::single(mock));
        set_typed(
            store.as_ref(),
            keys::PROVIDER,
            &Network {
                chain_id: 1337,
                rpc_url: "http://localhost:8545".into(),
                network_type: NetworkType::Custom,
            },
        )
        .await
        .unwrap();

        provider.initialize_provider().await.unwrap();
        assert_eq!(provider.get_current_chain_id().await, 1337);
    }

    #[tokio::test]
    async fn test_switch_emits_change_and_resets_eip1559_cache() {
        let london = MockTransport::ethereum(1, Some(U256::from(1_000_000_000u64)));
        let legacy = MockTransport::ethereum(1337, None);
        let factory = MockTransportFactory::new();
        factory.register("https://eth.llamarpc.com", london.clone());
        factory.register("http://localhost:8545", legacy.clone());
        let (provider, _) = controller(factory);

        let mut changes = provider.subscribe();
        assert!(provider.get_eip1559_compatibility().await.unwrap());
        // second probe is served from cache
        assert!(provider.get_eip1559_compatibility().await.unwrap());
        assert_eq!(london.call_count("eth_getBlockByNumber"), 1);

        provider.set_rpc_target("http://localhost:8545", 1337).await.unwrap();
        changes.changed().await.unwrap();
        assert_eq!(changes.borrow().chain_id, 1337);
        assert!(!provider.get_eip1559_compatibility().await.unwrap());
        assert_eq!(legacy.call_count("eth_getBlockByNumber"), 1);
    }

    #[tokio::test]
    async fn test_switch_waits_for_outstanding_lease() {
        let mock = MockTransport::ethereum(1, None);
        let (provider, _) = controller(MockTransportFactory::single(mock));
        let provider = Arc::new(provider);

        let lease = provider.lease().await;
        let switching = {
            let provider = provider.clone();
            tokio::spawn(async move { provider.set_provider_type(11155111).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!switching.is_finished());
        assert_eq!(lease.network().chain_id, 1);

        drop(lease);
        switching.await.unwrap().unwrap();
        assert_eq!(provider.get_current_chain_id().await, 11155111);
    }

    #[tokio::test]
    async fn test_overlapping_switches_agree_on_final_network() {
        let factory = MockTransportFactory::single(MockTransport::ethereum(1, None));
        let store = Arc::new(MemoryStore::new());
        let provider = Arc::new(
            ProviderController::new(Arc::new(WalletConfig::for_testing()), store.clone(), factory)
                .unwrap(),
        );
        let changes = provider.subscribe();

        // the first switch stalls while persisting
        store.set_write_fault(keys::PROVIDER, Some(WriteFault::Delay(Duration::from_millis(100))));
        let slow = {
            let provider = provider.clone();
            tokio::spawn(async move { provider.set_provider_type(11155111).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        store.set_write_fault(keys::PROVIDER, None);
        provider.set_rpc_target("http://localhost:8545", 1337).await.unwrap();
        slow.await.unwrap().unwrap();

        let active = provider.get_current_network().await;
        let stored: Network = get_typed(store.as_ref(), keys::PROVIDER).await.unwrap().unwrap();
        assert_eq!(stored, active);
        assert_eq!(*changes.borrow(), active);
        assert_eq!(active.chain_id, 1337);
        assert_eq!(provider.epoch().await, 2);
    }

    #[tokio::test]
    async fn test_failed_persist_keeps_old_network() {
        let (provider, store) = controller(MockTransportFactory::single(MockTransport::new()));
        store.set_write_fault(keys::PROVIDER, Some(WriteFault::Fail));
        let err = provider.set_provider_type(11155111).await.unwrap_err();
        assert_eq!(err.kind(), "Storage");
        assert_eq!(provider.get_current_chain_id().await, 1);
        assert_eq!(provider.epoch().await, 0);
    }

    #[tokio::test]
    async fn test_unknown_builtin_rejected() {
        let (provider, _) = controller(MockTransportFactory::single(MockTransport::new()));
        assert_eq!(provider.set_provider_type(4242).await.unwrap_err().kind(), "Validation");
        assert_eq!(
            provider.set_rpc_target("::nope::", 5).await.unwrap_err().kind(),
            "Validation"
        );
    }

    #[tokio::test]
    async fn test_read_only_queries() {
        let mock = MockTransport::ethereum(137, Some(U256::from(30_000_000_000u64)));
        let (provider, _) = controller(MockTransportFactory::single(mock));
        assert_eq!(provider.get_network_version().await.unwrap(), "137");
        assert_eq!(provider.get_network_id().await.unwrap(), 137);
        let block = provider.get_latest_block().await.unwrap();
        assert_eq!(block.number, Some(U64::from(16)));
        assert_eq!(block.base_fee_per_gas, Some(U256::from(30_000_000_000u64)));
    }

    #[tokio::test]
    async fn test_query_errors_are_classified() {
        let mock = MockTransport::new();
        mock.on_error("eth_call", WalletError::from_rpc(3, "execution reverted"));
        mock.set_delay(Some(Duration::from_secs(5)));
        let (provider, _) = controller(MockTransportFactory::single(mock.clone()));
        // rpc_timeout_ms is 1s in the test config
        let err = provider.query("eth_call", json!([])).await.unwrap_err();
        assert!(matches!(err, WalletError::NetworkUnavailable(_)));

        mock.set_delay(None);
        let err = provider.query("eth_call", json!([])).await.unwrap_err();
        assert_eq!(err.kind(), "RpcError");
    }
}
