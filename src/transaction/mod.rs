//! Transaction lifecycle: build, sign, broadcast and track.
//!
//! ```text
//! Unapproved ─► Signed ─► Submitted ─► Confirmed | Failed | Dropped
//!      └──────► Rejected
//! ```
//!
//! For one (account, chain) the nonce reservation, signing and broadcast run
//! under a single lock, and the network is leased for the same span so a
//! switch cannot land in the middle. The local nonce mark only advances after
//! the node accepted the transaction.

use ethers::types::{
    transaction::eip2718::TypedTransaction, Bytes, Eip1559TransactionRequest, TransactionRequest,
    H256, U256, U64,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::core::config::WalletConfig;
use crate::core::errors::WalletError;
use crate::gas::{FeeSuggestion, GasFeeController};
use crate::keyring::KeyringController;
use crate::provider::{
    decode, timed_request, ActiveNetwork, NetworkLease, ProviderController, RpcTransport,
};
use crate::storage::KeyValueStore;

pub mod meta;
pub mod nonce;

pub use meta::{StatusChange, TransactionMeta, TransactionStatus, TxError, TxParams};
pub use nonce::NonceTracker;

/// Receipt fields the tracker needs.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptSummary {
    pub transaction_hash: H256,
    #[serde(default)]
    pub block_number: Option<U64>,
    #[serde(default)]
    pub status: Option<U64>,
}

pub struct TransactionController {
    config: Arc<WalletConfig>,
    provider: Arc<ProviderController>,
    keyring: Arc<KeyringController>,
    gas: Arc<GasFeeController>,
    nonces: NonceTracker,
    metas: parking_lot::RwLock<Vec<TransactionMeta>>,
    shutdown: CancellationToken,
    pollers: TaskTracker,
}

impl TransactionController {
    pub fn new(
        config: Arc<WalletConfig>,
        store: Arc<dyn KeyValueStore>,
        provider: Arc<ProviderController>,
        keyring: Arc<KeyringController>,
        gas: Arc<GasFeeController>,
    ) -> Self {
        Self {
            config,
            provider,
            keyring,
            gas,
            nonces: NonceTracker::new(store),
            metas: parking_lot::RwLock::new(Vec::new()),
            shutdown: CancellationToken::new(),
            pollers: TaskTracker::new(),
        }
    }

    /// Records a transaction awaiting approval on the active network.
    pub async fn add_unapproved_transaction(
        &self,
        tx_params: TxParams,
    ) -> Result<TransactionMeta, WalletError> {
        let chain_id = self.provider.get_current_chain_id().await;
        let meta = TransactionMeta::new(tx_params, chain_id);
        info!(tx_id = %meta.id, chain_id, "Transaction added");
        self.metas.write().push(meta.clone());
        Ok(meta)
    }

    pub async fn reject_transaction(&self, id: Uuid) -> Result<TransactionMeta, WalletError> {
        let meta = self.update(id, |meta| meta.transition(TransactionStatus::Rejected))?;
        info!(tx_id = %id, "Transaction rejected");
        Ok(meta)
    }

    /// Adds and immediately approves.
    pub async fn send_raw_transaction(
        self: &Arc<Self>,
        tx_params: TxParams,
    ) -> Result<TransactionMeta, WalletError> {
        let meta = self.add_unapproved_transaction(tx_params).await?;
        self.approve_transaction(meta.id).await
    }

    /// Signs and broadcasts an unapproved transaction, then starts tracking it.
    pub async fn approve_transaction(
        self: &Arc<Self>,
        id: Uuid,
    ) -> Result<TransactionMeta, WalletError> {
        match self.submit(id).await {
            Ok((meta, transport)) => {
                self.spawn_receipt_poller(meta.clone(), transport);
                Ok(meta)
            }
            Err(e) => {
                // Unknown or already-processed ids leave no trace on any meta.
                if !matches!(e, WalletError::UnknownTransaction(_) | WalletError::InvalidStateTransition(_))
                {
                    self.mark_failed(id, &e);
                }
                Err(e)
            }
        }
    }

    async fn submit(
        &self,
        id: Uuid,
    ) -> Result<(TransactionMeta, Arc<dyn RpcTransport>), WalletError> {
        let meta = self.get_transaction(id)?;
        if meta.status != TransactionStatus::Unapproved {
            return Err(WalletError::InvalidStateTransition(format!(
                "{} is {:?}, expected Unapproved",
                id, meta.status
            )));
        }

        let snapshot = self.provider.current().await;
        if snapshot.network.chain_id != meta.chain_id {
            return Err(WalletError::NetworkChanged);
        }
        let from = meta.tx_params.from;
        let mut tx = self.build_transaction(&snapshot, &meta.tx_params).await?;

        // From here until broadcast the network cannot change.
        let lease = self.provider.lease().await;
        if lease.epoch() != snapshot.epoch {
            return Err(WalletError::NetworkChanged);
        }
        let chain_id = lease.network().chain_id;
        let guard = self.nonces.lock(&from, chain_id).await;

        let pending: U256 = decode(
            "eth_getTransactionCount",
            lease.query("eth_getTransactionCount", json!([from, "pending"])).await?,
        )?;
        let nonce = self.nonces.next_nonce(&guard, &from, chain_id, pending.low_u64()).await?;
        tx.set_nonce(nonce);

        let raw = self.keyring.sign_transaction(from, &tx, chain_id).await?;
        let mut tx_params = meta.tx_params.clone();
        apply_to_params(&mut tx_params, &tx, nonce);
        self.update(id, |m| {
            m.tx_params = tx_params.clone();
            m.transition(TransactionStatus::Signed)
        })?;
        debug!(tx_id = %id, nonce, "Transaction signed");

        let hash = self.broadcast(&lease, &raw).await?;
        // On the network now; record it before anything else can fail.
        let meta = self.update(id, |m| {
            m.hash = Some(hash);
            m.transition(TransactionStatus::Submitted)
        })?;
        if let Err(e) = self.nonces.commit(&guard, &from, chain_id, nonce).await {
            warn!(tx_id = %id, nonce, error = %e, "Nonce mark not persisted");
        }
        drop(guard);
        info!(tx_id = %id, hash = ?hash, nonce, chain_id, "Transaction submitted");
        Ok((meta, lease.transport()))
    }

    async fn build_transaction(
        &self,
        snapshot: &ActiveNetwork,
        params: &TxParams,
    ) -> Result<TypedTransaction, WalletError> {
        let timeout = Duration::from_millis(self.config.rpc_timeout_ms);

        let gas = match params.gas {
            Some(gas) => gas,
            None if params.has_calldata() => {
                let call = json!({
                    "from": params.from,
                    "to": params.to,
                    "value": params.value.unwrap_or_default(),
                    "data": params.data,
                });
                decode(
                    "eth_estimateGas",
                    timed_request(snapshot.transport().as_ref(), "eth_estimateGas", json!([call]), timeout)
                        .await?,
                )?
            }
            None => U256::from(self.config.transaction.default_gas_limit),
        };

        let fees = match (params.gas_price, params.max_fee_per_gas) {
            (Some(gas_price), _) => FeeSuggestion::Legacy { gas_price },
            (None, Some(max_fee_per_gas)) => FeeSuggestion::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas: params.max_priority_fee_per_gas.unwrap_or(max_fee_per_gas),
            },
            (None, None) => self.gas.estimate_for(snapshot).await?.medium(),
        };

        let chain_id = snapshot.network.chain_id;
        let tx: TypedTransaction = match fees {
            FeeSuggestion::Eip1559 { max_fee_per_gas, max_priority_fee_per_gas } => {
                let mut req = Eip1559TransactionRequest::new()
                    .from(params.from)
                    .value(params.value.unwrap_or_default())
                    .gas(gas)
                    .max_fee_per_gas(max_fee_per_gas)
                    .max_priority_fee_per_gas(max_priority_fee_per_gas)
                    .chain_id(chain_id);
                if let Some(to) = params.to {
                    req = req.to(to);
                }
                if let Some(data) = &params.data {
                    req = req.data(data.clone());
                }
                req.into()
            }
            FeeSuggestion::Legacy { gas_price } => {
                let mut req = TransactionRequest::new()
                    .from(params.from)
                    .value(params.value.unwrap_or_default())
                    .gas(gas)
                    .gas_price(gas_price)
                    .chain_id(chain_id);
                if let Some(to) = params.to {
                    req = req.to(to);
                }
                if let Some(data) = &params.data {
                    req = req.data(data.clone());
                }
                req.into()
            }
        };
        Ok(tx)
    }

    /// Retries only transport failures, with exponential backoff.
    async fn broadcast(&self, lease: &NetworkLease, raw: &Bytes) -> Result<H256, WalletError> {
        let cfg = &self.config.transaction;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match lease.query("eth_sendRawTransaction", json!([raw])).await {
                Ok(value) => return decode("eth_sendRawTransaction", value),
                Err(e) if e.is_retryable() && attempt < cfg.max_broadcast_attempts => {
                    let delay = backoff(cfg.backoff_base_ms, cfg.backoff_max_ms, attempt);
                    warn!(attempt, delay_ms = delay.as_millis() as u64, "Broadcast failed, retrying: {}", e);
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    error!(attempt, kind = e.kind(), "Broadcast failed: {}", e);
                    return Err(e);
                }
            }
        }
    }

    fn spawn_receipt_poller(
        self: &Arc<Self>,
        meta: TransactionMeta,
        transport: Arc<dyn RpcTransport>,
    ) {
        let controller = Arc::downgrade(self);
        let cancel = self.shutdown.child_token();
        let interval = Duration::from_millis(self.config.transaction.receipt_poll_interval_ms);
        let timeout = Duration::from_millis(self.config.rpc_timeout_ms);
        self.pollers.spawn(poll_receipt(controller, meta, transport, cancel, interval, timeout));
    }

    fn mark_failed(&self, id: Uuid, err: &WalletError) {
        let result = self.update(id, |m| {
            m.error = Some(TxError::from(err));
            m.transition(TransactionStatus::Failed)
        });
        if let Err(e) = result {
            debug!(tx_id = %id, "Could not mark transaction failed: {}", e);
        }
    }

    /// Applies `f` to the meta; the change is kept only if `f` succeeds.
    fn update<F>(&self, id: Uuid, f: F) -> Result<TransactionMeta, WalletError>
    where
        F: FnOnce(&mut TransactionMeta) -> Result<(), WalletError>,
    {
        let mut metas = self.metas.write();
        let meta = metas
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| WalletError::UnknownTransaction(id.to_string()))?;
        let mut next = meta.clone();
        f(&mut next)?;
        *meta = next.clone();
        Ok(next)
    }

    pub fn get_transaction(&self, id: Uuid) -> Result<TransactionMeta, WalletError> {
        self.metas
            .read()
            .iter()
            .find(|m| m.id == id)
            .cloned()
            .ok_or_else(|| WalletError::UnknownTransaction(id.to_string()))
    }

    pub fn get_transactions(&self) -> Vec<TransactionMeta> {
        self.metas.read().clone()
    }

    /// Marks submitted siblings sharing `confirmed`'s nonce as replaced.
    fn drop_replaced(&self, confirmed: &TransactionMeta) {
        let Some(nonce) = confirmed.nonce() else { return };
        let mut metas = self.metas.write();
        for meta in metas.iter_mut().filter(|m| {
            m.id != confirmed.id
                && m.status == TransactionStatus::Submitted
                && m.chain_id == confirmed.chain_id
                && m.tx_params.from == confirmed.tx_params.from
                && m.nonce() == Some(nonce)
        }) {
            if meta.transition(TransactionStatus::Dropped).is_ok() {
                info!(tx_id = %meta.id, replaced_by = ?confirmed.hash, "Transaction dropped");
            }
        }
    }

    /// Cancels receipt polling and waits for the pollers to exit.
    pub async fn teardown(&self) {
        self.shutdown.cancel();
        self.pollers.close();
        self.pollers.wait().await;
        debug!("Transaction pollers stopped");
    }
}

fn backoff(base_ms: u64, max_ms: u64, attempt: u32) -> Duration {
    let factor = 1u64.checked_shl(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
    Duration::from_millis(base_ms.saturating_mul(factor).min(max_ms))
}

fn apply_to_params(params: &mut TxParams, tx: &TypedTransaction, nonce: u64) {
    params.nonce = Some(U256::from(nonce));
    params.gas = tx.gas().copied();
    match tx {
        TypedTransaction::Eip1559(req) => {
            params.max_fee_per_gas = req.max_fee_per_gas;
            params.max_priority_fee_per_gas = req.max_priority_fee_per_gas;
        }
        _ => params.gas_price = tx.gas_price(),
    }
}

enum ReceiptOutcome {
    Pending,
    Confirmed(Option<U64>),
    Reverted(Option<U64>),
    Dropped,
}

async fn fetch_receipt(
    transport: &dyn RpcTransport,
    hash: H256,
    timeout: Duration,
) -> Result<Option<ReceiptSummary>, WalletError> {
    let value = timed_request(transport, "eth_getTransactionReceipt", json!([hash]), timeout).await?;
    decode("eth_getTransactionReceipt", value)
}

async fn check_receipt(
    transport: &dyn RpcTransport,
    meta: &TransactionMeta,
    hash: H256,
    timeout: Duration,
) -> Result<ReceiptOutcome, WalletError> {
    if let Some(receipt) = fetch_receipt(transport, hash, timeout).await? {
        return Ok(match receipt.status {
            Some(status) if status.is_zero() => ReceiptOutcome::Reverted(receipt.block_number),
            _ => ReceiptOutcome::Confirmed(receipt.block_number),
        });
    }

    // No receipt: if the account's mined nonce already passed ours, something
    // else took the slot.
    let Some(nonce) = meta.nonce() else { return Ok(ReceiptOutcome::Pending) };
    let mined: Value = timed_request(
        transport,
        "eth_getTransactionCount",
        json!([meta.tx_params.from, "latest"]),
        timeout,
    )
    .await?;
    let mined: U256 = decode("eth_getTransactionCount", mined)?;
    if mined > nonce && fetch_receipt(transport, hash, timeout).await?.is_none() {
        return Ok(ReceiptOutcome::Dropped);
    }
    Ok(ReceiptOutcome::Pending)
}

async fn poll_receipt(
    controller: Weak<TransactionController>,
    meta: TransactionMeta,
    transport: Arc<dyn RpcTransport>,
    cancel: CancellationToken,
    interval: Duration,
    timeout: Duration,
) {
    let Some(hash) = meta.hash else { return };
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(tx_id = %meta.id, "Receipt polling cancelled");
                return;
            }
            _ = tokio::time::sleep(interval) => {}
        }

        let outcome = match check_receipt(transport.as_ref(), &meta, hash, timeout).await {
            Ok(outcome) => outcome,
            Err(e) => {
                debug!(tx_id = %meta.id, "Receipt lookup failed: {}", e);
                continue;
            }
        };
        let Some(this) = controller.upgrade() else { return };

        // The meta may already be terminal if a replacement was confirmed.
        let result = match outcome {
            ReceiptOutcome::Pending => continue,
            ReceiptOutcome::Confirmed(block) => this
                .update(meta.id, |m| {
                    m.block_number = block;
                    m.transition(TransactionStatus::Confirmed)
                })
                .map(|confirmed| {
                    info!(tx_id = %meta.id, hash = ?hash, block = ?block, "Transaction confirmed");
                    this.drop_replaced(&confirmed);
                }),
            ReceiptOutcome::Reverted(block) => this
                .update(meta.id, |m| {
                    m.block_number = block;
                    m.error = Some(TxError {
                        kind: "Reverted".into(),
                        message: "transaction reverted on chain".into(),
                    });
                    m.transition(TransactionStatus::Failed)
                })
                .map(|_| warn!(tx_id = %meta.id, hash = ?hash, "Transaction reverted")),
            ReceiptOutcome::Dropped => this
                .update(meta.id, |m| m.transition(TransactionStatus::Dropped))
                .map(|_| info!(tx_id = %meta.id, hash = ?hash, "Transaction dropped")),
        };
        if let Err(e) = result {
            debug!(tx_id = %meta.id, "Receipt poller stopping: {}", e);
        }
        return;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::testing::{MockTransport, MockTransportFactory};
    use crate::storage::{keys, MemoryStore, WriteFault};
    use ethers::types::Address;

    const PHRASE: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    struct Harness {
        mock: Arc<MockTransport>,
        provider: Arc<ProviderController>,
        txs: Arc<TransactionController>,
        store: Arc<MemoryStore>,
        from: Address,
    }

    async fn harness(mock: Arc<MockTransport>) -> Harness {
        let config = Arc::new(WalletConfig::for_testing());
        let memory = Arc::new(MemoryStore::new());
        let store: Arc<dyn KeyValueStore> = memory.clone();
        let provider = Arc::new(
            ProviderController::new(config.clone(), store.clone(), MockTransportFactory::single(mock.clone()))
                .unwrap(),
        );
        let keyring = Arc::new(KeyringController::new(config.clone(), store.clone()));
        let from = keyring.create_new_vault_and_restore("correct-horse", PHRASE).await.unwrap()[0].address;
        let gas = Arc::new(GasFeeController::new(config.clone(), provider.clone(), None));
        let txs = Arc::new(TransactionController::new(config, store, provider.clone(), keyring, gas));
        Harness { mock, provider, txs, store: memory, from }
    }

    fn transfer(from: Address) -> TxParams {
        TxParams {
            from,
            to: Some(Address::repeat_byte(0xab)),
            value: Some(U256::exp10(18)),
            ..Default::default()
        }
    }

    async fn wait_for(txs: &TransactionController, id: Uuid, status: TransactionStatus) -> TransactionMeta {
        for _ in 0..200 {
            let meta = txs.get_transaction(id).unwrap();
            if meta.status == status {
                return meta;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("transaction {} never reached {:?}", id, status);
    }

    #[tokio::test]
    async fn test_send_progresses_to_confirmed() {
        let h = harness(MockTransport::ethereum(1, Some(U256::from(1_000_000_000u64)))).await;
        let meta = h.txs.send_raw_transaction(transfer(h.from)).await.unwrap();
        assert_eq!(meta.status, TransactionStatus::Submitted);
        assert_eq!(meta.chain_id, 1);
        assert!(meta.hash.is_some());
        assert!(meta.tx_params.max_fee_per_gas.is_some());

        let confirmed = wait_for(&h.txs, meta.id, TransactionStatus::Confirmed).await;
        assert_eq!(confirmed.block_number, Some(U64::from(0x11)));
        let statuses: Vec<_> = confirmed.history.iter().map(|c| c.status).collect();
        assert_eq!(
            statuses,
            vec![
                TransactionStatus::Unapproved,
                TransactionStatus::Signed,
                TransactionStatus::Submitted,
                TransactionStatus::Confirmed
            ]
        );
        h.txs.teardown().await;
    }

    #[tokio::test]
    async fn test_broadcast_is_recorded_even_if_nonce_mark_cannot_be_saved() {
        let h = harness(MockTransport::ethereum(1, None)).await;
        h.store.set_write_fault(keys::NONCES, Some(WriteFault::Fail));

        let meta = h.txs.send_raw_transaction(transfer(h.from)).await.unwrap();
        assert_eq!(meta.status, TransactionStatus::Submitted);
        assert!(meta.hash.is_some());
        assert_eq!(h.mock.call_count("eth_sendRawTransaction"), 1);

        // the node still says 0 pending; the in-process mark prevents reuse
        let next = h.txs.send_raw_transaction(transfer(h.from)).await.unwrap();
        assert_eq!(next.tx_params.nonce, Some(U256::one()));
        h.txs.teardown().await;
    }

    #[tokio::test]
    async fn test_legacy_network_gets_gas_price() {
        let h = harness(MockTransport::ethereum(1, None)).await;
        let meta = h.txs.send_raw_transaction(transfer(h.from)).await.unwrap();
        assert_eq!(meta.tx_params.gas_price, Some(U256::from(20_000_000_000u64)));
        assert_eq!(meta.tx_params.gas, Some(U256::from(21_000u64)));
        assert!(meta.tx_params.max_fee_per_gas.is_none());
        h.txs.teardown().await;
    }

    #[tokio::test]
    async fn test_insufficient_funds_is_not_retried_and_keeps_nonce() {
        let h = harness(MockTransport::ethereum(1, None)).await;
        h.mock.on_error(
            "eth_sendRawTransaction",
            WalletError::from_rpc(-32000, "insufficient funds for gas * price + value"),
        );

        let err = h.txs.send_raw_transaction(transfer(h.from)).await.unwrap_err();
        assert_eq!(err.kind(), "InsufficientFunds");
        assert_eq!(h.mock.call_count("eth_sendRawTransaction"), 1);

        let failed = &h.txs.get_transactions()[0];
        assert_eq!(failed.status, TransactionStatus::Failed);
        assert_eq!(failed.error.as_ref().map(|e| e.kind.as_str()), Some("InsufficientFunds"));
        assert_eq!(h.txs.nonces.local_next(&h.from, 1).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_network_unavailable_is_retried_then_fails() {
        let h = harness(MockTransport::ethereum(1, None)).await;
        h.mock.on_error("eth_sendRawTransaction", WalletError::NetworkUnavailable("reset".into()));

        let err = h.txs.send_raw_transaction(transfer(h.from)).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(h.mock.call_count("eth_sendRawTransaction"), 5);
        assert_eq!(h.txs.get_transactions()[0].status, TransactionStatus::Failed);
    }

    #[tokio::test]
    async fn test_reject_and_double_approve() {
        let h = harness(MockTransport::ethereum(1, None)).await;
        let meta = h.txs.add_unapproved_transaction(transfer(h.from)).await.unwrap();
        let rejected = h.txs.reject_transaction(meta.id).await.unwrap();
        assert_eq!(rejected.status, TransactionStatus::Rejected);

        let err = h.txs.approve_transaction(meta.id).await.unwrap_err();
        assert_eq!(err.kind(), "InvalidStateTransition");
        assert_eq!(h.txs.get_transaction(meta.id).unwrap().status, TransactionStatus::Rejected);

        let err = h.txs.approve_transaction(Uuid::new_v4()).await.unwrap_err();
        assert_eq!(err.kind(), "UnknownTransaction");
    }

    #[tokio::test]
    async fn test_network_switch_between_add_and_approve() {
        let h = harness(MockTransport::ethereum(1, None)).await;
        let meta = h.txs.add_unapproved_transaction(transfer(h.from)).await.unwrap();
        h.provider.set_provider_type(137).await.unwrap();

        assert_eq!(h.txs.approve_transaction(meta.id).await.unwrap_err(), WalletError::NetworkChanged);
        assert_eq!(h.mock.call_count("eth_sendRawTransaction"), 0);
    }

    #[tokio::test]
    async fn test_calldata_uses_estimate_gas() {
        let h = harness(MockTransport::ethereum(1, None)).await;
        h.mock.on("eth_estimateGas", json!("0xea60"));
        let mut params = transfer(h.from);
        params.data = Some(Bytes::from(vec![0xa9, 0x05, 0x9c, 0xbb]));
        let meta = h.txs.send_raw_transaction(params).await.unwrap();
        assert_eq!(meta.tx_params.gas, Some(U256::from(60_000u64)));
        h.txs.teardown().await;
    }

    #[tokio::test]
    async fn test_replacement_marks_original_dropped() {
        let mock = MockTransport::ethereum(1, None);
        // nothing is ever mined for the first broadcast
        mock.on("eth_getTransactionReceipt", Value::Null);
        let h = harness(mock).await;

        let original = h.txs.send_raw_transaction(transfer(h.from)).await.unwrap();
        let mut replacement = original.clone();
        replacement.id = Uuid::new_v4();
        replacement.hash = Some(H256::repeat_byte(0x22));
        replacement.status = TransactionStatus::Confirmed;
        h.txs.drop_replaced(&replacement);

        assert_eq!(h.txs.get_transaction(original.id).unwrap().status, TransactionStatus::Dropped);
        h.txs.teardown().await;
    }

    #[test]
    fn test_backoff_is_capped() {
        assert_eq!(backoff(500, 8_000, 1), Duration::from_millis(500));
        assert_eq!(backoff(500, 8_000, 3), Duration::from_millis(2_000));
        assert_eq!(backoff(500, 8_000, 10), Duration::from_millis(8_000));
        assert_eq!(backoff(500, 8_000, 200), Duration::from_millis(8_000));
    }
}
