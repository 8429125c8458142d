//! Plain data types shared across controllers.

use ethers::types::Address;
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::core::errors::WalletError;

/// An account visible to callers. Never carries key material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub address: Address,
    /// Uncompressed SEC1 public key, 0x-prefixed hex
    pub public_key: String,
    /// Set for HD accounts only
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub derivation_index: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NetworkType {
    BuiltIn,
    Custom,
}

/// A selectable chain endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Network {
    pub chain_id: u64,
    pub rpc_url: String,
    #[serde(rename = "type")]
    pub network_type: NetworkType,
}

/// Which half of a key pair `exportKey` returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    Private,
    Public,
}

/// 32-byte secp256k1 secret, zeroized on drop.
pub struct PrivateKey(Secret<[u8; 32]>);

impl PrivateKey {
    pub fn new(k: [u8; 32]) -> Self {
        Self(Secret::new(k))
    }

    /// Scoped access to the underlying secret bytes. Prefer this over holding
    /// a copy so the bytes never outlive the closure.
    pub fn with_secret<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&[u8; 32]) -> R,
    {
        f(self.0.expose_secret())
    }

    pub fn try_from_slice(slice: &[u8]) -> Result<Self, WalletError> {
        if slice.len() != 32 {
            return Err(WalletError::Validation("Private key must be 32 bytes".into()));
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(slice);
        let key = Self::new(arr);
        arr.zeroize();
        Ok(key)
    }

    /// Parses 64 hex chars with or without a `0x` prefix.
    pub fn from_hex(input: &str) -> Result<Self, WalletError> {
        let trimmed = input.trim();
        let stripped = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        let mut bytes = zeroize::Zeroizing::new(
            hex::decode(stripped)
                .map_err(|_| WalletError::Validation("Private key is not valid hex".into()))?,
        );
        let key = Self::try_from_slice(&bytes);
        bytes.zeroize();
        key
    }
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PrivateKey([REDACTED])")
    }
}

/// Lowercase 0x-prefixed hex form used as a storage key component.
pub fn address_key(address: &Address) -> String {
    format!("{:?}", address)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_private_key_from_hex_with_and_without_prefix() {
        let hex_key = "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";
        let a = PrivateKey::from_hex(hex_key).unwrap();
        let b = PrivateKey::from_hex(&format!("0x{}", hex_key)).unwrap();
        assert_eq!(a.with_secret(|k| *k), b.with_secret(|k| *k));
    }

    #[test]
    fn test_private_key_rejects_bad_input() {
        assert!(PrivateKey::from_hex("0x1234").is_err());
        assert!(PrivateKey::from_hex("zz").is_err());
        assert!(PrivateKey::try_from_slice(&[1u8; 31]).is_err());
    }

    #[test]
    fn test_debug_redacts() {
        let key = PrivateKey::new([7u8; 32]);
        assert_eq!(format!("{:?}", key), "PrivateKey([REDACTED])");
    }

    #[test]
    fn test_network_serializes_type_tag() {
        let network = Network {
            chain_id: 1,
            rpc_url: "http://localhost:8545".into(),
            network_type: NetworkType::BuiltIn,
        };
        let json = serde_json::to_value(&network).unwrap();
        assert_eq!(json["type"], "built-in");
        assert_eq!(json["chainId"], 1);
    }
}
