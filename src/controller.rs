//! Wires the controllers together and exposes them through the
//! `{type, payload}` message protocol.
//!
//! Startup order is Provider, then Keyring, then GasFee and Transaction,
//! which both read from the first two. Teardown runs the other way round.

use ethers::types::{Address, U256};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::config::WalletConfig;
use crate::core::domain::KeyType;
use crate::core::errors::WalletError;
use crate::gas::{GasFeeController, PollToken};
use crate::keyring::{ImportStrategy, KeyringController};
use crate::provider::{ProviderController, TransportFactory};
use crate::storage::KeyValueStore;
use crate::tokens::{Token, TokenRegistry};
use crate::transaction::{TransactionController, TxParams};

/// One variant per exposed operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum Request {
    // keyring
    GenerateMnemonic,
    ValidateMnemonic { mnemonic: String },
    CreateNewVaultAndKeychain { password: String },
    CreateNewVaultAndRestore { password: String, mnemonic: String },
    UnlockKeyrings { password: String },
    VerifyPassword { password: String },
    SetLocked,
    IsUnlocked,
    CreateNewAccount,
    #[serde(rename_all = "camelCase")]
    ExportKey { address: Address, key_type: KeyType, password: String },
    #[serde(rename = "exportKeystoreV3", rename_all = "camelCase")]
    ExportKeystoreV3 { private_key: String, password: String },
    ImportAccountStrategy(ImportStrategy),
    GetAccounts,
    GetStoreAccounts,
    GetSelectedAddress,
    SetSelectedAddress { address: Address },

    // provider
    #[serde(rename_all = "camelCase")]
    SetRpcTarget { rpc_url: String, chain_id: u64 },
    #[serde(rename_all = "camelCase")]
    SetProviderType { chain_id: u64 },
    GetCurrentNetwork,
    GetLatestBlock,
    GetNetworkVersion,
    GetCurrentChainId,
    GetNetworkId,
    #[serde(rename = "getEIP1559Compatibility")]
    GetEip1559Compatibility,
    Query {
        method: String,
        #[serde(default)]
        params: Value,
    },

    // gas
    FetchGasFeeEstimates,
    GetGasFeeEstimatesAndStartPolling,
    #[serde(rename_all = "camelCase")]
    DisconnectPoller { poll_token: PollToken },
    StopPolling,
    #[serde(rename_all = "camelCase")]
    GetTimeEstimate { max_priority_fee_per_gas: U256, max_fee_per_gas: U256 },

    // transactions
    AddUnapprovedTransaction(TxParams),
    ApproveTransaction { id: Uuid },
    RejectTransaction { id: Uuid },
    SendRawTransaction(TxParams),
    GetTransactions,
    GetTransaction { id: Uuid },

    // tokens
    GetTokens,
    AddToken(Token),
}

impl Request {
    /// Variant name as it appears on the wire, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Request::GenerateMnemonic => "generateMnemonic",
            Request::ValidateMnemonic { .. } => "validateMnemonic",
            Request::CreateNewVaultAndKeychain { .. } => "createNewVaultAndKeychain",
            Request::CreateNewVaultAndRestore { .. } => "createNewVaultAndRestore",
            Request::UnlockKeyrings { .. } => "unlockKeyrings",
            Request::VerifyPassword { .. } => "verifyPassword",
            Request::SetLocked => "setLocked",
            Request::IsUnlocked => "isUnlocked",
            Request::CreateNewAccount => "createNewAccount",
            Request::ExportKey { .. } => "exportKey",
            Request::ExportKeystoreV3 { .. } => "exportKeystoreV3",
            Request::ImportAccountStrategy(_) => "importAccountStrategy",
            Request::GetAccounts => "getAccounts",
            Request::GetStoreAccounts => "getStoreAccounts",
            Request::GetSelectedAddress => "getSelectedAddress",
            Request::SetSelectedAddress { .. } => "setSelectedAddress",
            Request::SetRpcTarget { .. } => "setRpcTarget",
            Request::SetProviderType { .. } => "setProviderType",
            Request::GetCurrentNetwork => "getCurrentNetwork",
            Request::GetLatestBlock => "getLatestBlock",
            Request::GetNetworkVersion => "getNetworkVersion",
            Request::GetCurrentChainId => "getCurrentChainId",
            Request::GetNetworkId => "getNetworkId",
            Request::GetEip1559Compatibility => "getEIP1559Compatibility",
            Request::Query { .. } => "query",
            Request::FetchGasFeeEstimates => "fetchGasFeeEstimates",
            Request::GetGasFeeEstimatesAndStartPolling => "getGasFeeEstimatesAndStartPolling",
            Request::DisconnectPoller { .. } => "disconnectPoller",
            Request::StopPolling => "stopPolling",
            Request::GetTimeEstimate { .. } => "getTimeEstimate",
            Request::AddUnapprovedTransaction(_) => "addUnapprovedTransaction",
            Request::ApproveTransaction { .. } => "approveTransaction",
            Request::RejectTransaction { .. } => "rejectTransaction",
            Request::SendRawTransaction(_) => "sendRawTransaction",
            Request::GetTransactions => "getTransactions",
            Request::GetTransaction { .. } => "getTransaction",
            Request::GetTokens => "getTokens",
            Request::AddToken(_) => "addToken",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
}

impl From<&WalletError> for ErrorBody {
    fn from(err: &WalletError) -> Self {
        Self { kind: err.kind().to_string(), message: err.to_string() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Response {
    Error { error: ErrorBody },
    Result { result: Value },
}

impl Response {
    pub fn ok(result: Value) -> Self {
        Response::Result { result }
    }

    pub fn err(err: &WalletError) -> Self {
        Response::Error { error: ErrorBody::from(err) }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Response::Result { .. })
    }
}

pub struct WalletApp {
    pub config: Arc<WalletConfig>,
    pub provider: Arc<ProviderController>,
    pub keyring: Arc<KeyringController>,
    pub gas: Arc<GasFeeController>,
    pub transactions: Arc<TransactionController>,
    pub tokens: TokenRegistry,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl WalletApp {
    /// Builds every controller, restores the persisted network and starts the
    /// background listeners.
    pub async fn start(
        config: WalletConfig,
        store: Arc<dyn KeyValueStore>,
        factory: Arc<dyn TransportFactory>,
    ) -> Result<Arc<Self>, WalletError> {
        config.validate()?;
        let config = Arc::new(config);

        let provider = Arc::new(ProviderController::new(config.clone(), store.clone(), factory)?);
        provider.initialize_provider().await?;

        let keyring = Arc::new(KeyringController::new(config.clone(), store.clone()));

        let oracle = GasFeeController::oracle_from_config(&config)?;
        let gas = Arc::new(GasFeeController::new(config.clone(), provider.clone(), oracle));
        let transactions = Arc::new(TransactionController::new(
            config.clone(),
            store.clone(),
            provider.clone(),
            keyring.clone(),
            gas.clone(),
        ));
        let tokens = TokenRegistry::new(store, keyring.clone());

        let app = Arc::new(Self {
            config,
            provider,
            keyring,
            gas,
            transactions,
            tokens,
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
        });
        app.spawn_network_listener();
        app.spawn_auto_lock();
        info!(chain_id = app.provider.get_current_chain_id().await, "Wallet engine started");
        Ok(app)
    }

    /// Clears network-scoped state after every switch.
    fn spawn_network_listener(&self) {
        let mut changes = self.provider.subscribe();
        let gas = self.gas.clone();
        let keyring = self.keyring.clone();
        let cancel = self.shutdown.clone();
        self.tasks.spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    changed = changes.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let chain_id = changes.borrow_and_update().chain_id;
                        gas.reset();
                        if let Err(e) = keyring.refresh_selected_address().await {
                            warn!(chain_id, "Selected address refresh failed: {}", e);
                        }
                        debug!(chain_id, "Network change handled");
                    }
                }
            }
        });
    }

    fn spawn_auto_lock(&self) {
        let idle = self.config.security.auto_lock_secs;
        if idle == 0 {
            return;
        }
        let keyring = self.keyring.clone();
        let gas = self.gas.clone();
        let cancel = self.shutdown.clone();
        let period = Duration::from_secs((idle / 4).clamp(1, 30));
        self.tasks.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if keyring.enforce_auto_lock().await {
                            gas.stop_polling().await;
                        }
                    }
                }
            }
        });
    }

    /// Runs one request; failures come back as `{"error": …}`.
    pub async fn handle(self: &Arc<Self>, request: Request) -> Response {
        let name = request.name();
        match self.dispatch(request).await {
            Ok(result) => {
                debug!(request = %name, "Request handled");
                Response::ok(result)
            }
            Err(e) => {
                if e.is_critical() {
                    warn!(request = %name, kind = e.kind(), "Request failed: {}", e);
                } else {
                    debug!(request = %name, kind = e.kind(), "Request failed: {}", e);
                }
                Response::err(&e)
            }
        }
    }

    /// Parses and runs one JSON message.
    pub async fn handle_json(self: &Arc<Self>, line: &str) -> Response {
        match serde_json::from_str::<Request>(line) {
            Ok(request) => self.handle(request).await,
            Err(e) => Response::err(&WalletError::Validation(format!("malformed request: {}", e))),
        }
    }

    async fn dispatch(self: &Arc<Self>, request: Request) -> Result<Value, WalletError> {
        let value = match request {
            Request::GenerateMnemonic => {
                let phrase = self.keyring.generate_mnemonic()?;
                json!(phrase.as_str())
            }
            Request::ValidateMnemonic { mnemonic } => json!(self.keyring.validate_mnemonic(&mnemonic)),
            Request::CreateNewVaultAndKeychain { password } => {
                json!(self.keyring.create_new_vault_and_keychain(&password).await?)
            }
            Request::CreateNewVaultAndRestore { password, mnemonic } => {
                json!(self.keyring.create_new_vault_and_restore(&password, &mnemonic).await?)
            }
            Request::UnlockKeyrings { password } => {
                self.keyring.unlock_keyrings(&password).await?;
                json!(self.keyring.get_accounts().await?)
            }
            Request::VerifyPassword { password } => {
                self.keyring.verify_password(&password).await?;
                json!(true)
            }
            Request::SetLocked => {
                self.keyring.set_locked().await;
                self.gas.stop_polling().await;
                Value::Null
            }
            Request::IsUnlocked => json!(self.keyring.is_unlocked().await),
            Request::CreateNewAccount => json!(self.keyring.create_new_account().await?),
            Request::ExportKey { address, key_type, password } => {
                let key = self.keyring.export_key(address, key_type, &password).await?;
                json!(key.as_str())
            }
            Request::ExportKeystoreV3 { private_key, password } => {
                let keystore = self.keyring.export_keystore_v3(&private_key, &password)?;
                serde_json::from_str(&keystore)?
            }
            Request::ImportAccountStrategy(strategy) => {
                json!(self.keyring.import_account_strategy(strategy).await?)
            }
            Request::GetAccounts => json!(self.keyring.get_accounts().await?),
            Request::GetStoreAccounts => json!(self.keyring.get_store_accounts().await?),
            Request::GetSelectedAddress => json!(self.keyring.get_selected_address().await?),
            Request::SetSelectedAddress { address } => {
                self.keyring.set_selected_address(address).await?;
                json!(address)
            }

            Request::SetRpcTarget { rpc_url, chain_id } => {
                json!(self.provider.set_rpc_target(&rpc_url, chain_id).await?)
            }
            Request::SetProviderType { chain_id } => {
                json!(self.provider.set_provider_type(chain_id).await?)
            }
            Request::GetCurrentNetwork => json!(self.provider.get_current_network().await),
            Request::GetLatestBlock => json!(self.provider.get_latest_block().await?),
            Request::GetNetworkVersion => json!(self.provider.get_network_version().await?),
            Request::GetCurrentChainId => json!(self.provider.get_current_chain_id().await),
            Request::GetNetworkId => json!(self.provider.get_network_id().await?),
            Request::GetEip1559Compatibility => {
                json!(self.provider.get_eip1559_compatibility().await?)
            }
            Request::Query { method, params } => {
                let params = if params.is_null() { json!([]) } else { params };
                self.provider.query(&method, params).await?
            }

            Request::FetchGasFeeEstimates => json!(self.gas.fetch_gas_fee_estimates().await?),
            Request::GetGasFeeEstimatesAndStartPolling => {
                let (token, estimate) = self.gas.get_gas_fee_estimates_and_start_polling().await?;
                json!({ "pollToken": token, "gasFeeEstimates": estimate })
            }
            Request::DisconnectPoller { poll_token } => {
                self.gas.disconnect_poller(poll_token).await?;
                Value::Null
            }
            Request::StopPolling => {
                self.gas.stop_polling().await;
                Value::Null
            }
            Request::GetTimeEstimate { max_priority_fee_per_gas, max_fee_per_gas } => json!(
                self.gas.get_time_estimate(max_priority_fee_per_gas, max_fee_per_gas).await?
            ),

            Request::AddUnapprovedTransaction(params) => {
                json!(self.transactions.add_unapproved_transaction(params).await?)
            }
            Request::ApproveTransaction { id } => {
                json!(self.transactions.approve_transaction(id).await?)
            }
            Request::RejectTransaction { id } => {
                json!(self.transactions.reject_transaction(id).await?)
            }
            Request::SendRawTransaction(params) => {
                json!(self.transactions.send_raw_transaction(params).await?)
            }
            Request::GetTransactions => json!(self.transactions.get_transactions()),
            Request::GetTransaction { id } => json!(self.transactions.get_transaction(id)?),

            Request::GetTokens => json!(self.tokens.get_tokens().await?),
            Request::AddToken(token) => json!(self.tokens.add_token(token).await?),
        };
        Ok(value)
    }

    /// Stops every background task and locks the vault.
    pub async fn teardown(&self) {
        self.gas.stop_polling().await;
        self.transactions.teardown().await;
        self.shutdown.cancel();
        self.tasks.close();
        self.tasks.wait().await;
        self.keyring.set_locked().await;
        info!("Wallet engine stopped");
    }
}
