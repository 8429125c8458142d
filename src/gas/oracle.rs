//! Legacy gas-price oracle client.
//!
//! The oracle answers `{low, medium, high}` in gwei (decimal strings or
//! numbers), optionally as objects carrying a `gasPrice` and wait-time hints.

use async_trait::async_trait;
use ethers::types::U256;
use ethers::utils::parse_units;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use super::{LegacyGasPrices, LegacyWaitTimes, WaitTimeHint};
use crate::core::errors::WalletError;

#[async_trait]
pub trait LegacyGasOracle: Send + Sync {
    async fn fetch(&self, chain_id: u64) -> Result<LegacyGasPrices, WalletError>;
}

/// Oracle reached over HTTP. `{chain_id}` in the URL template is substituted.
pub struct HttpGasOracle {
    client: reqwest::Client,
    url_template: String,
}

impl HttpGasOracle {
    pub fn new(url_template: impl Into<String>, timeout: Duration) -> Result<Self, WalletError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| WalletError::Config(format!("Failed to build oracle client: {}", e)))?;
        Ok(Self { client, url_template: url_template.into() })
    }

    fn url_for(&self, chain_id: u64) -> String {
        self.url_template.replace("{chain_id}", &chain_id.to_string())
    }
}

#[async_trait]
impl LegacyGasOracle for HttpGasOracle {
    async fn fetch(&self, chain_id: u64) -> Result<LegacyGasPrices, WalletError> {
        let url = self.url_for(chain_id);
        debug!(chain_id, "Querying legacy gas oracle");

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| WalletError::NetworkUnavailable(format!("gas oracle: {}", e)))?;
        if !resp.status().is_success() {
            return Err(WalletError::NetworkUnavailable(format!(
                "gas oracle returned HTTP {}",
                resp.status()
            )));
        }
        let body: Value = resp
            .json()
            .await
            .map_err(|e| WalletError::Serialization(format!("gas oracle body: {}", e)))?;
        parse_prices(&body)
    }
}

pub(crate) fn parse_prices(body: &Value) -> Result<LegacyGasPrices, WalletError> {
    Ok(LegacyGasPrices {
        low: tier_price(body, "low")?,
        medium: tier_price(body, "medium")?,
        high: tier_price(body, "high")?,
        wait_times: LegacyWaitTimes {
            low: wait_hint(&body["low"]),
            medium: wait_hint(&body["medium"]),
            high: wait_hint(&body["high"]),
        },
    })
}

/// `minWaitTimeEstimate`/`maxWaitTimeEstimate` in milliseconds, both required.
fn wait_hint(tier: &Value) -> Option<WaitTimeHint> {
    let min = tier.get("minWaitTimeEstimate")?.as_u64()?;
    let max = tier.get("maxWaitTimeEstimate")?.as_u64()?;
    (min <= max).then_some(WaitTimeHint {
        min_wait_time_estimate_ms: min,
        max_wait_time_estimate_ms: max,
    })
}

fn tier_price(body: &Value, tier: &str) -> Result<U256, WalletError> {
    let value = match &body[tier] {
        Value::Object(fields) => fields.get("gasPrice").cloned().unwrap_or(Value::Null),
        other => other.clone(),
    };
    let gwei = match value {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        _ => {
            return Err(WalletError::Serialization(format!("gas oracle is missing tier {}", tier)))
        }
    };
    let wei = parse_units(gwei.trim(), "gwei")
        .map_err(|e| WalletError::Serialization(format!("gas oracle tier {}: {}", tier, e)))?;
    Ok(wei.into())
}
