use chrono::{DateTime, Utc};
use ethers::types::{Address, Bytes, H256, U256, U64};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::errors::WalletError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransactionStatus {
    Unapproved,
    Rejected,
    Signed,
    Submitted,
    Confirmed,
    Failed,
    Dropped,
}

impl TransactionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransactionStatus::Rejected
                | TransactionStatus::Confirmed
                | TransactionStatus::Failed
                | TransactionStatus::Dropped
        )
    }

    /// Statuses only move forward.
    pub fn can_transition_to(self, next: TransactionStatus) -> bool {
        use TransactionStatus::*;
        matches!(
            (self, next),
            (Unapproved, Signed | Rejected | Failed)
                | (Signed, Submitted | Failed)
                | (Submitted, Confirmed | Failed | Dropped)
        )
    }
}

/// Caller-supplied transaction fields. Missing fee and gas fields are filled
/// in before signing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxParams {
    pub from: Address,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Bytes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_price: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_fee_per_gas: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_priority_fee_per_gas: Option<U256>,
}

impl TxParams {
    pub fn has_calldata(&self) -> bool {
        self.data.as_ref().map(|d| !d.is_empty()).unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChange {
    pub status: TransactionStatus,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxError {
    pub kind: String,
    pub message: String,
}

impl From<&WalletError> for TxError {
    fn from(err: &WalletError) -> Self {
        Self { kind: err.kind().to_string(), message: err.to_string() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionMeta {
    pub id: Uuid,
    pub tx_params: TxParams,
    pub status: TransactionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<H256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_number: Option<U64>,
    pub created_at: DateTime<Utc>,
    /// Chain the transaction was created for
    pub chain_id: u64,
    pub history: Vec<StatusChange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TxError>,
}

impl TransactionMeta {
    pub fn new(tx_params: TxParams, chain_id: u64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tx_params,
            status: TransactionStatus::Unapproved,
            hash: None,
            block_number: None,
            created_at: now,
            chain_id,
            history: vec![StatusChange { status: TransactionStatus::Unapproved, at: now }],
            error: None,
        }
    }

    /// Moves to `next`, recording it in the history.
    pub fn transition(&mut self, next: TransactionStatus) -> Result<(), WalletError> {
        if !self.status.can_transition_to(next) {
            return Err(WalletError::InvalidStateTransition(format!(
                "{:?} -> {:?} for {}",
                self.status, next, self.id
            )));
        }
        self.status = next;
        self.history.push(StatusChange { status: next, at: Utc::now() });
        Ok(())
    }

    pub fn nonce(&self) -> Option<U256> {
        self.tx_params.nonce
    }
}
