//! Fee estimation and the shared fee-polling loop.
//!
//! Estimates resolve in order: fee market (EIP-1559 networks), legacy oracle,
//! then a bare `eth_gasPrice`. Each step runs under its own timeout and falls
//! through on failure.

use ethers::types::{FeeHistory, U256};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::config::WalletConfig;
use crate::core::errors::WalletError;
use crate::provider::{decode, timed_request, ActiveNetwork, ProviderController};

pub mod fee_market;
pub mod oracle;

pub use oracle::{HttpGasOracle, LegacyGasOracle};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Eip1559Fee {
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
    pub min_wait_time_estimate_ms: u64,
    pub max_wait_time_estimate_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeMarketEstimate {
    pub low: Eip1559Fee,
    pub medium: Eip1559Fee,
    pub high: Eip1559Fee,
    pub estimated_base_fee: U256,
}

/// Wait-time hint the legacy oracle may attach to a tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitTimeHint {
    pub min_wait_time_estimate_ms: u64,
    pub max_wait_time_estimate_ms: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyWaitTimes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low: Option<WaitTimeHint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub medium: Option<WaitTimeHint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high: Option<WaitTimeHint>,
}

/// Gas prices in wei.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyGasPrices {
    pub low: U256,
    pub medium: U256,
    pub high: U256,
    #[serde(default)]
    pub wait_times: LegacyWaitTimes,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EthGasPriceEstimate {
    pub gas_price: U256,
}

/// Fee suggestion tagged by the fee model that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "gasEstimateType", rename_all = "kebab-case")]
pub enum GasFeeEstimate {
    FeeMarket(FeeMarketEstimate),
    Legacy(LegacyGasPrices),
    EthGasPrice(EthGasPriceEstimate),
}

/// Fee fields to put on a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeSuggestion {
    Eip1559 { max_fee_per_gas: U256, max_priority_fee_per_gas: U256 },
    Legacy { gas_price: U256 },
}

impl GasFeeEstimate {
    pub fn is_eip1559(&self) -> bool {
        matches!(self, GasFeeEstimate::FeeMarket(_))
    }

    /// The middle tier, or the sole tier for `eth_gasPrice`.
    pub fn medium(&self) -> FeeSuggestion {
        match self {
            GasFeeEstimate::FeeMarket(e) => FeeSuggestion::Eip1559 {
                max_fee_per_gas: e.medium.max_fee_per_gas,
                max_priority_fee_per_gas: e.medium.max_priority_fee_per_gas,
            },
            GasFeeEstimate::Legacy(p) => FeeSuggestion::Legacy { gas_price: p.medium },
            GasFeeEstimate::EthGasPrice(p) => FeeSuggestion::Legacy { gas_price: p.gas_price },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeEstimate {
    pub lower_bound_seconds: u64,
    /// `None` when the fee is below every tier
    pub upper_bound_seconds: Option<u64>,
}

const BELOW_LOW: TimeEstimate = TimeEstimate { lower_bound_seconds: 60, upper_bound_seconds: None };

/// Handle for one subscriber of the polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PollToken(Uuid);

impl std::fmt::Display for PollToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Default)]
struct Poller {
    tokens: HashSet<PollToken>,
    cancel: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
}

pub struct GasFeeController {
    config: Arc<WalletConfig>,
    provider: Arc<ProviderController>,
    oracle: Option<Arc<dyn LegacyGasOracle>>,
    /// Last estimate and the network epoch it was fetched on
    latest: parking_lot::RwLock<Option<(u64, GasFeeEstimate)>>,
    poller: Mutex<Poller>,
}

impl GasFeeController {
    pub fn new(
        config: Arc<WalletConfig>,
        provider: Arc<ProviderController>,
        oracle: Option<Arc<dyn LegacyGasOracle>>,
    ) -> Self {
        Self {
            config,
            provider,
            oracle,
            latest: parking_lot::RwLock::new(None),
            poller: Mutex::new(Poller::default()),
        }
    }

    /// Builds the HTTP oracle from config, if one is configured.
    pub fn oracle_from_config(
        config: &WalletConfig,
    ) -> Result<Option<Arc<dyn LegacyGasOracle>>, WalletError> {
        match &config.gas.legacy_oracle_url {
            Some(url) => {
                let oracle =
                    HttpGasOracle::new(url.clone(), Duration::from_millis(config.gas.step_timeout_ms))?;
                Ok(Some(Arc::new(oracle)))
            }
            None => Ok(None),
        }
    }

    fn step_timeout(&self) -> Duration {
        Duration::from_millis(self.config.gas.step_timeout_ms)
    }

    /// Resolves a fresh estimate for the active network and caches it.
    pub async fn fetch_gas_fee_estimates(&self) -> Result<GasFeeEstimate, WalletError> {
        let active = self.provider.current().await;
        self.resolve(&active).await
    }

    /// Estimate for a network snapshot; reuses the cached one when it was
    /// fetched on that same network.
    pub async fn estimate_for(&self, active: &ActiveNetwork) -> Result<GasFeeEstimate, WalletError> {
        if let Some((epoch, estimate)) = &*self.latest.read() {
            if *epoch == active.epoch {
                return Ok(estimate.clone());
            }
        }
        self.resolve(active).await
    }

    async fn resolve(&self, active: &ActiveNetwork) -> Result<GasFeeEstimate, WalletError> {
        let chain_id = active.network.chain_id;

        let estimate = match self.fee_market_step(active).await {
            Ok(Some(estimate)) => estimate,
            Ok(None) => self.legacy_steps(active).await?,
            Err(e) => {
                warn!(chain_id, "Fee market estimate failed, falling back: {}", e);
                self.legacy_steps(active).await?
            }
        };

        // A switch during the fetch leaves the result describing the old network.
        if self.provider.epoch().await == active.epoch {
            *self.latest.write() = Some((active.epoch, estimate.clone()));
        } else {
            debug!(chain_id, "Network changed during fee fetch; estimate not cached");
        }
        Ok(estimate)
    }

    /// `Ok(None)` when the network has no base fee.
    async fn fee_market_step(
        &self,
        active: &ActiveNetwork,
    ) -> Result<Option<GasFeeEstimate>, WalletError> {
        let timeout = self.step_timeout();
        let step = async {
            if !self.provider.eip1559_compatibility_of(active, timeout).await? {
                return Ok(None);
            }
            let params = json!([
                format!("0x{:x}", self.config.gas.fee_history_blocks),
                "latest",
                fee_market::REWARD_PERCENTILES
            ]);
            let history: FeeHistory = decode(
                "eth_feeHistory",
                timed_request(active.transport().as_ref(), "eth_feeHistory", params, timeout).await?,
            )?;
            Ok::<_, WalletError>(Some(GasFeeEstimate::FeeMarket(fee_market::calculate(&history)?)))
        };
        match tokio::time::timeout(timeout, step).await {
            Ok(result) => result,
            Err(_) => Err(WalletError::NetworkUnavailable("fee market step timed out".into())),
        }
    }

    async fn legacy_steps(&self, active: &ActiveNetwork) -> Result<GasFeeEstimate, WalletError> {
        let chain_id = active.network.chain_id;
        let timeout = self.step_timeout();

        if let Some(oracle) = &self.oracle {
            if self.config.gas.legacy_oracle_chain_ids.contains(&chain_id) {
                match tokio::time::timeout(timeout, oracle.fetch(chain_id)).await {
                    Ok(Ok(prices)) => return Ok(GasFeeEstimate::Legacy(prices)),
                    Ok(Err(e)) => warn!(chain_id, "Legacy gas oracle failed: {}", e),
                    Err(_) => warn!(chain_id, "Legacy gas oracle timed out"),
                }
            }
        }

        let price: U256 = decode(
            "eth_gasPrice",
            timed_request(active.transport().as_ref(), "eth_gasPrice", json!([]), timeout).await?,
        )?;
        Ok(GasFeeEstimate::EthGasPrice(EthGasPriceEstimate { gas_price: price }))
    }

    /// Last estimate for the active network, if any.
    pub async fn latest_estimate(&self) -> Option<GasFeeEstimate> {
        let epoch = self.provider.epoch().await;
        match &*self.latest.read() {
            Some((fetched_on, estimate)) if *fetched_on == epoch => Some(estimate.clone()),
            _ => None,
        }
    }

    /// Drops the cached estimate; called when the active network changes.
    pub fn reset(&self) {
        *self.latest.write() = None;
    }

    /// Fetches now and subscribes to the shared polling loop.
    pub async fn get_gas_fee_estimates_and_start_polling(
        self: &Arc<Self>,
    ) -> Result<(PollToken, GasFeeEstimate), WalletError> {
        let estimate = self.fetch_gas_fee_estimates().await?;
        let token = PollToken(Uuid::new_v4());

        let mut poller = self.poller.lock().await;
        poller.tokens.insert(token);
        if poller.task.is_none() {
            let cancel = CancellationToken::new();
            let period = Duration::from_millis(self.config.gas.poll_interval_ms);
            poller.task = Some(tokio::spawn(poll_loop(Arc::downgrade(self), cancel.clone(), period)));
            poller.cancel = Some(cancel);
            info!(interval_ms = self.config.gas.poll_interval_ms, "Gas fee polling started");
        }
        debug!(%token, subscribers = poller.tokens.len(), "Poll token issued");
        Ok((token, estimate))
    }

    /// Releases a subscriber. The loop stops with the last one.
    pub async fn disconnect_poller(&self, token: PollToken) -> Result<(), WalletError> {
        let mut poller = self.poller.lock().await;
        if !poller.tokens.remove(&token) {
            warn!(%token, "disconnectPoller called with unknown token");
            return Err(WalletError::UnknownToken(token.to_string()));
        }
        if poller.tokens.is_empty() {
            halt(&mut poller).await;
        }
        Ok(())
    }

    /// Stops the loop regardless of live subscribers.
    pub async fn stop_polling(&self) {
        let mut poller = self.poller.lock().await;
        poller.tokens.clear();
        halt(&mut poller).await;
    }

    pub async fn is_polling(&self) -> bool {
        self.poller.lock().await.task.is_some()
    }

    /// Which bucket the given fees fall into against the last estimate.
    pub async fn get_time_estimate(
        &self,
        max_priority_fee_per_gas: U256,
        max_fee_per_gas: U256,
    ) -> Result<TimeEstimate, WalletError> {
        let estimate = self.latest_estimate().await.ok_or(WalletError::NoFeeHistory)?;
        Ok(time_estimate(&estimate, max_priority_fee_per_gas, max_fee_per_gas))
    }
}

async fn halt(poller: &mut Poller) {
    if let Some(cancel) = poller.cancel.take() {
        cancel.cancel();
    }
    if let Some(task) = poller.task.take() {
        // Lets an in-progress fetch finish; nothing is scheduled after this returns.
        if let Err(e) = task.await {
            warn!("Gas fee poll task ended abnormally: {}", e);
        }
        info!("Gas fee polling stopped");
    }
}

async fn poll_loop(controller: Weak<GasFeeController>, cancel: CancellationToken, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // the subscriber that started the loop already fetched
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let Some(controller) = controller.upgrade() else { break };
                if let Err(e) = controller.fetch_gas_fee_estimates().await {
                    warn!("Scheduled gas fee fetch failed: {}", e);
                }
            }
        }
    }
}

fn time_estimate(estimate: &GasFeeEstimate, max_priority: U256, max_fee: U256) -> TimeEstimate {
    let bucket = |min_ms: u64, max_ms: u64| TimeEstimate {
        lower_bound_seconds: min_ms / 1000,
        upper_bound_seconds: Some(max_ms / 1000),
    };
    match estimate {
        GasFeeEstimate::FeeMarket(e) => {
            let effective = max_priority.min(max_fee.saturating_sub(e.estimated_base_fee));
            [&e.high, &e.medium, &e.low]
                .into_iter()
                .find(|tier| effective >= tier.max_priority_fee_per_gas)
                .map(|tier| bucket(tier.min_wait_time_estimate_ms, tier.max_wait_time_estimate_ms))
                .unwrap_or(BELOW_LOW)
        }
        GasFeeEstimate::Legacy(p) => {
            let hinted = |hint: Option<WaitTimeHint>, min_ms: u64, max_ms: u64| match hint {
                Some(h) => bucket(h.min_wait_time_estimate_ms, h.max_wait_time_estimate_ms),
                None => bucket(min_ms, max_ms),
            };
            if max_fee >= p.high {
                hinted(p.wait_times.high, 0, 15_000)
            } else if max_fee >= p.medium {
                hinted(p.wait_times.medium, 15_000, 30_000)
            } else if max_fee >= p.low {
                hinted(p.wait_times.low, 30_000, 60_000)
            } else {
                BELOW_LOW
            }
        }
        GasFeeEstimate::EthGasPrice(p) => {
            if max_fee >= p.gas_price {
                bucket(15_000, 30_000)
            } else {
                BELOW_LOW
            }
        }
    }
}
