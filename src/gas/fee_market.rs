//! EIP-1559 tier calculation from `eth_feeHistory`.

use ethers::types::{FeeHistory, U256};

use super::{Eip1559Fee, FeeMarketEstimate};
use crate::core::errors::WalletError;

/// Reward percentiles requested from the node, one per tier (low, medium, high).
pub const REWARD_PERCENTILES: [f64; 3] = [10.0, 20.0, 30.0];

struct TierSettings {
    /// Base fee headroom, in percent of the next block's base fee
    base_fee_percent: u64,
    min_wait_ms: u64,
    max_wait_ms: u64,
}

const TIERS: [TierSettings; 3] = [
    TierSettings { base_fee_percent: 110, min_wait_ms: 30_000, max_wait_ms: 60_000 },
    TierSettings { base_fee_percent: 120, min_wait_ms: 15_000, max_wait_ms: 30_000 },
    TierSettings { base_fee_percent: 125, min_wait_ms: 0, max_wait_ms: 15_000 },
];

/// Builds the three tiers from a fee history window.
///
/// The priority fee of each tier is the median of the matching reward
/// percentile across the window; the max fee adds that to the next block's
/// base fee scaled by the tier's headroom.
pub fn calculate(history: &FeeHistory) -> Result<FeeMarketEstimate, WalletError> {
    let base_fee = *history
        .base_fee_per_gas
        .last()
        .ok_or_else(|| WalletError::Validation("fee history has no base fee".into()))?;

    let mut tiers = Vec::with_capacity(TIERS.len());
    for (index, settings) in TIERS.iter().enumerate() {
        let samples: Vec<U256> =
            history.reward.iter().filter_map(|block| block.get(index).copied()).collect();
        let priority = median(samples);
        let max_fee = base_fee
            .checked_mul(U256::from(settings.base_fee_percent))
            .map(|scaled| scaled / U256::from(100u64))
            .and_then(|scaled| scaled.checked_add(priority))
            .ok_or_else(|| WalletError::Validation("fee history values out of range".into()))?;
        tiers.push(Eip1559Fee {
            max_fee_per_gas: max_fee,
            max_priority_fee_per_gas: priority,
            min_wait_time_estimate_ms: settings.min_wait_ms,
            max_wait_time_estimate_ms: settings.max_wait_ms,
        });
    }

    let mut tiers = tiers.into_iter();
    match (tiers.next(), tiers.next(), tiers.next()) {
        (Some(low), Some(medium), Some(high)) => {
            Ok(FeeMarketEstimate { low, medium, high, estimated_base_fee: base_fee })
        }
        _ => Err(WalletError::Validation("fee tiers incomplete".into())),
    }
}

fn median(mut samples: Vec<U256>) -> U256 {
    if samples.is_empty() {
        return U256::zero();
    }
    samples.sort();
    let mid = samples.len() / 2;
    if samples.len() % 2 == 0 {
        // (a + b) / 2 without overflowing the sum
        let (low, high) = (samples[mid - 1], samples[mid]);
        low / 2 + high / 2 + (low % 2 + high % 2) / 2
    } else {
        samples[mid]
    }
}
