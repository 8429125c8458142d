//! BIP32/BIP44 account derivation from a mnemonic.
//!
//! Accounts live at `<hd_path>/<index>`, e.g. `m/44'/60'/0'/0/0` for the first
//! Ethereum account. The key only exists inside the returned [`LocalWallet`],
//! whose signing key zeroizes itself on drop.

use ethers::signers::{coins_bip39::English, LocalWallet, MnemonicBuilder, Signer};
use tracing::debug;

use crate::core::domain::{Account, PrivateKey};
use crate::core::errors::WalletError;

/// Full derivation path for `index` under `hd_path`.
pub fn derivation_path(hd_path: &str, index: u32) -> String {
    format!("{}/{}", hd_path.trim_end_matches('/'), index)
}

/// Derives the signer at `index`. Deterministic: the same phrase, path and
/// index always produce the same key.
pub fn derive_wallet(phrase: &str, hd_path: &str, index: u32) -> Result<LocalWallet, WalletError> {
    let path = derivation_path(hd_path, index);
    debug!(index, "Deriving HD account");

    MnemonicBuilder::<English>::default()
        .phrase(phrase)
        .derivation_path(&path)
        .map_err(|e| WalletError::Crypto(format!("Invalid derivation path: {}", e)))?
        .build()
        .map_err(|_| WalletError::InvalidMnemonic)
}

/// Builds a signer from a raw secret.
pub fn wallet_from_private_key(key: &PrivateKey) -> Result<LocalWallet, WalletError> {
    key.with_secret(|bytes| LocalWallet::from_bytes(bytes))
        .map_err(|e| WalletError::Validation(format!("Invalid private key: {}", e)))
}

/// Uncompressed SEC1 public key as 0x-prefixed hex.
pub fn public_key_hex(wallet: &LocalWallet) -> String {
    let point = wallet.signer().verifying_key().to_encoded_point(false);
    format!("0x{}", hex::encode(point.as_bytes()))
}

pub fn account_for(wallet: &LocalWallet, derivation_index: Option<u32>) -> Account {
    Account { address: wallet.address(), public_key: public_key_hex(wallet), derivation_index }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PHRASE: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";
    const PATH: &str = "m/44'/60'/0'/0";

    #[test]
    fn test_derivation_path() {
        assert_eq!(derivation_path(PATH, 3), "m/44'/60'/0'/0/3");
        assert_eq!(derivation_path("m/44'/60'/0'/0/", 0), "m/44'/60'/0'/0/0");
    }

    #[test]
    fn test_known_first_address() {
        let wallet = derive_wallet(PHRASE, PATH, 0).unwrap();
        assert_eq!(
            format!("{:?}", wallet.address()),
            "0x9858effd232b4033e47d90003d41ec34ecaeda94"
        );
    }

    #[test]
    fn test_derivation_is_deterministic() {
        for index in 0..3 {
            let a = account_for(&derive_wallet(PHRASE, PATH, index).unwrap(), Some(index));
            let b = account_for(&derive_wallet(PHRASE, PATH, index).unwrap(), Some(index));
            assert_eq!(a, b);
        }
        let first = derive_wallet(PHRASE, PATH, 0).unwrap();
        let second = derive_wallet(PHRASE, PATH, 1).unwrap();
        assert_ne!(first.address(), second.address());
    }

    #[test]
    fn test_public_key_is_uncompressed() {
        let wallet = derive_wallet(PHRASE, PATH, 0).unwrap();
        let pk = public_key_hex(&wallet);
        assert!(pk.starts_with("0x04"));
        assert_eq!(pk.len(), 2 + 130);
    }

    #[test]
    fn test_wallet_from_private_key() {
        let key = PrivateKey::from_hex(
            "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318",
        )
        .unwrap();
        let wallet = wallet_from_private_key(&key).unwrap();
        assert_eq!(
            format!("{:?}", wallet.address()),
            "0x2c7536e3605d9c16a7a3d7b1898e529396a65c23"
        );
    }
}
