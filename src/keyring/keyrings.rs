//! In-memory keyrings and their serialized vault form.

use ethers::signers::{LocalWallet, Signer};
use ethers::types::Address;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, Zeroizing};

use crate::core::domain::{Account, PrivateKey};
use crate::core::errors::WalletError;
use crate::crypto::hd::{account_for, derive_wallet, wallet_from_private_key};
use crate::security::secret::{secret_hex, SecretText};

/// Vault plaintext for one keyring. Secrets are zeroized when dropped.
#[derive(Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SerializedKeyring {
    #[serde(rename = "HD Key Tree", rename_all = "camelCase")]
    Hd { mnemonic: Zeroizing<String>, hd_path: String, number_of_accounts: u32 },
    #[serde(rename = "Simple Key Pair", rename_all = "camelCase")]
    Imported { private_key: Zeroizing<String> },
}

/// `0x`-prefixed private key of `wallet`. The intermediate scalar bytes are
/// scrubbed before returning.
pub fn private_key_hex(wallet: &LocalWallet) -> SecretText {
    let mut bytes = wallet.signer().to_bytes();
    let hex = secret_hex(bytes.as_slice());
    bytes.as_mut_slice().zeroize();
    hex
}

/// HD keyring: one mnemonic, sequential indices.
pub struct HdKeyring {
    mnemonic: SecretText,
    hd_path: String,
    wallets: Vec<LocalWallet>,
}

impl HdKeyring {
    /// New keyring with account 0 derived.
    pub fn new(mnemonic: SecretText, hd_path: &str) -> Result<Self, WalletError> {
        let mut keyring = Self { mnemonic, hd_path: hd_path.to_string(), wallets: Vec::new() };
        keyring.add_account()?;
        Ok(keyring)
    }

    /// Derives the next sequential index.
    pub fn add_account(&mut self) -> Result<Account, WalletError> {
        let index = self.wallets.len() as u32;
        let wallet = derive_wallet(&self.mnemonic, &self.hd_path, index)?;
        let account = account_for(&wallet, Some(index));
        self.wallets.push(wallet);
        Ok(account)
    }

    /// Undoes the latest [`add_account`](Self::add_account). Account 0 is kept.
    pub fn discard_last_account(&mut self) {
        if self.wallets.len() > 1 {
            self.wallets.pop();
        }
    }
}

pub enum Keyring {
    Hd(HdKeyring),
    Imported(LocalWallet),
}

impl Keyring {
    pub fn imported(key: &PrivateKey) -> Result<Self, WalletError> {
        Ok(Keyring::Imported(wallet_from_private_key(key)?))
    }

    pub fn accounts(&self) -> Vec<Account> {
        match self {
            Keyring::Hd(hd) => hd
                .wallets
                .iter()
                .enumerate()
                .map(|(i, w)| account_for(w, Some(i as u32)))
                .collect(),
            Keyring::Imported(wallet) => vec![account_for(wallet, None)],
        }
    }

    pub fn wallet_for(&self, address: &Address) -> Option<&LocalWallet> {
        match self {
            Keyring::Hd(hd) => hd.wallets.iter().find(|w| w.address() == *address),
            Keyring::Imported(wallet) => Some(wallet).filter(|w| w.address() == *address),
        }
    }

    pub fn serialize(&self) -> SerializedKeyring {
        match self {
            Keyring::Hd(hd) => SerializedKeyring::Hd {
                mnemonic: Zeroizing::new(hd.mnemonic.to_string()),
                hd_path: hd.hd_path.clone(),
                number_of_accounts: hd.wallets.len() as u32,
            },
            Keyring::Imported(wallet) => {
                SerializedKeyring::Imported { private_key: private_key_hex(wallet) }
            }
        }
    }

    pub fn restore(serialized: &SerializedKeyring) -> Result<Self, WalletError> {
        match serialized {
            SerializedKeyring::Hd { mnemonic, hd_path, number_of_accounts } => {
                let mut hd = HdKeyring {
                    mnemonic: Zeroizing::new(mnemonic.to_string()),
                    hd_path: hd_path.clone(),
                    wallets: Vec::new(),
                };
                for _ in 0..(*number_of_accounts).max(1) {
                    hd.add_account()?;
                }
                Ok(Keyring::Hd(hd))
            }
            SerializedKeyring::Imported { private_key } => {
                Keyring::imported(&PrivateKey::from_hex(private_key)?)
            }
        }
    }
}
