//! Error taxonomy shared by every controller.
//!
//! Kinds are kept distinct so a caller can tell "wrong password" apart from
//! "corrupted data", and a transient network failure apart from a node that
//! rejected the transaction.

use thiserror::Error;

/// Custom error type for wallet operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum WalletError {
    /// The derived key failed the vault verification tag.
    #[error("Invalid password")]
    InvalidPassword,

    /// The password does not meet the configured policy.
    #[error("Weak password: {0}")]
    WeakPassword(String),

    /// Mnemonic checksum or wordlist validation failed.
    #[error("Invalid mnemonic")]
    InvalidMnemonic,

    /// Operation requires an unlocked vault.
    #[error("Wallet is locked")]
    Locked,

    #[error("Unknown account: {0}")]
    UnknownAccount(String),

    #[error("Account already exists: {0}")]
    DuplicateAccount(String),

    /// Ciphertext failed its integrity check. Fatal, never retried.
    #[error("Vault corrupted: {0}")]
    VaultCorrupted(String),

    /// Transport failure or timeout talking to the RPC endpoint.
    #[error("Network unavailable: {0}")]
    NetworkUnavailable(String),

    /// Well-formed JSON-RPC error response, surfaced verbatim.
    #[error("RPC error {code}: {message}")]
    RpcError { code: i64, message: String },

    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("Gas too low: {0}")]
    GasTooLow(String),

    #[error("Nonce too low: {0}")]
    NonceTooLow(String),

    /// The active network was switched while the operation was in flight.
    #[error("Network changed while operation was in flight")]
    NetworkChanged,

    #[error("No gas fee estimate has been fetched yet")]
    NoFeeHistory,

    #[error("Unknown poll token: {0}")]
    UnknownToken(String),

    #[error("Unknown transaction: {0}")]
    UnknownTransaction(String),

    #[error("Invalid status transition: {0}")]
    InvalidStateTransition(String),

    /// Persistence backend failure.
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl WalletError {
    /// Stable tag used on the wire by the message protocol.
    pub fn kind(&self) -> &'static str {
        match self {
            WalletError::InvalidPassword => "InvalidPassword",
            WalletError::WeakPassword(_) => "WeakPassword",
            WalletError::InvalidMnemonic => "InvalidMnemonic",
            WalletError::Locked => "Locked",
            WalletError::UnknownAccount(_) => "UnknownAccount",
            WalletError::DuplicateAccount(_) => "DuplicateAccount",
            WalletError::VaultCorrupted(_) => "VaultCorrupted",
            WalletError::NetworkUnavailable(_) => "NetworkUnavailable",
            WalletError::RpcError { .. } => "RpcError",
            WalletError::InsufficientFunds(_) => "InsufficientFunds",
            WalletError::GasTooLow(_) => "GasTooLow",
            WalletError::NonceTooLow(_) => "NonceTooLow",
            WalletError::NetworkChanged => "NetworkChanged",
            WalletError::NoFeeHistory => "NoFeeHistory",
            WalletError::UnknownToken(_) => "UnknownToken",
            WalletError::UnknownTransaction(_) => "UnknownTransaction",
            WalletError::InvalidStateTransition(_) => "InvalidStateTransition",
            WalletError::Storage(_) => "Storage",
            WalletError::Serialization(_) => "Serialization",
            WalletError::Crypto(_) => "Crypto",
            WalletError::Validation(_) => "Validation",
            WalletError::Config(_) => "Config",
        }
    }

    /// Only transient network failures are retried internally.
    pub fn is_retryable(&self) -> bool {
        matches!(self, WalletError::NetworkUnavailable(_))
    }

    /// Failures that indicate damaged key material rather than bad input.
    pub fn is_critical(&self) -> bool {
        matches!(self, WalletError::VaultCorrupted(_) | WalletError::Crypto(_))
    }

    /// Maps a node's JSON-RPC error onto the user-actionable kinds.
    ///
    /// Nodes disagree on codes (geth uses -32000 for nearly everything), so the
    /// message text is what gets inspected.
    pub fn from_rpc(code: i64, message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        if lower.contains("insufficient funds") {
            WalletError::InsufficientFunds(message)
        } else if lower.contains("intrinsic gas too low")
            || lower.contains("gas too low")
            || lower.contains("underpriced")
        {
            WalletError::GasTooLow(message)
        } else if lower.contains("nonce too low") {
            WalletError::NonceTooLow(message)
        } else {
            WalletError::RpcError { code, message }
        }
    }
}

impl From<serde_json::Error> for WalletError {
    fn from(err: serde_json::Error) -> Self {
        WalletError::Serialization(err.to_string())
    }
}

impl From<sqlx::Error> for WalletError {
    fn from(err: sqlx::Error) -> Self {
        WalletError::Storage(err.to_string())
    }
}

impl From<anyhow::Error> for WalletError {
    fn from(err: anyhow::Error) -> Self {
        WalletError::Storage(err.to_string())
    }
}
