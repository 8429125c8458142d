//! Per-account watched token list.

use ethers::types::Address;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

use crate::core::domain::address_key;
use crate::core::errors::WalletError;
use crate::keyring::KeyringController;
use crate::storage::{get_typed, keys, set_typed, KeyValueStore};

const MAX_SYMBOL_LEN: usize = 11;
const MAX_DECIMALS: u8 = 36;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub address: Address,
    pub symbol: String,
    pub decimals: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl Token {
    fn validate(&self) -> Result<(), WalletError> {
        let symbol = self.symbol.trim();
        if symbol.is_empty() || symbol.len() > MAX_SYMBOL_LEN {
            return Err(WalletError::Validation(format!(
                "token symbol must be 1-{} characters",
                MAX_SYMBOL_LEN
            )));
        }
        if self.decimals > MAX_DECIMALS {
            return Err(WalletError::Validation(format!(
                "token decimals must be at most {}",
                MAX_DECIMALS
            )));
        }
        Ok(())
    }
}

/// Stored as `{ "<selected address>": [Token, ..] }`.
type TokenTable = BTreeMap<String, Vec<Token>>;

pub struct TokenRegistry {
    store: Arc<dyn KeyValueStore>,
    keyring: Arc<KeyringController>,
    write: tokio::sync::Mutex<()>,
}

impl TokenRegistry {
    pub fn new(store: Arc<dyn KeyValueStore>, keyring: Arc<KeyringController>) -> Self {
        Self { store, keyring, write: tokio::sync::Mutex::new(()) }
    }

    async fn selected(&self) -> Result<Address, WalletError> {
        self.keyring
            .get_selected_address()
            .await?
            .ok_or_else(|| WalletError::Validation("no account selected".into()))
    }

    /// Tokens of the selected account; empty when nothing is selected.
    pub async fn get_tokens(&self) -> Result<Vec<Token>, WalletError> {
        let Some(owner) = self.keyring.get_selected_address().await? else {
            return Ok(Vec::new());
        };
        let table: TokenTable = get_typed(self.store.as_ref(), keys::TOKENS).await?.unwrap_or_default();
        Ok(table.get(&address_key(&owner)).cloned().unwrap_or_default())
    }

    /// Adds `token` for the selected account, replacing an entry with the
    /// same contract address. Returns the updated list.
    pub async fn add_token(&self, token: Token) -> Result<Vec<Token>, WalletError> {
        token.validate()?;
        let owner = self.selected().await?;

        let _write = self.write.lock().await;
        let mut table: TokenTable =
            get_typed(self.store.as_ref(), keys::TOKENS).await?.unwrap_or_default();
        let list = table.entry(address_key(&owner)).or_default();
        match list.iter_mut().find(|t| t.address == token.address) {
            Some(existing) => *existing = token.clone(),
            None => list.push(token.clone()),
        }
        let updated = list.clone();
        set_typed(self.store.as_ref(), keys::TOKENS, &table).await?;
        info!(owner = ?owner, token = ?token.address, symbol = %token.symbol, "Token added");
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::WalletConfig;
    use crate::storage::MemoryStore;
    use pretty_assertions::assert_eq;

    fn dai() -> Token {
        Token {
            address: "0x6b175474e89094c44da98b954eedeac495271d0f".parse().unwrap(),
            symbol: "DAI".into(),
            decimals: 18,
            image: None,
        }
    }

    async fn registry() -> (TokenRegistry, Arc<KeyringController>) {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let keyring = Arc::new(KeyringController::new(Arc::new(WalletConfig::for_testing()), store.clone()));
        (TokenRegistry::new(store, keyring.clone()), keyring)
    }

    #[tokio::test]
    async fn test_no_selection() {
        let (tokens, _) = registry().await;
        assert!(tokens.get_tokens().await.unwrap().is_empty());
        assert_eq!(tokens.add_token(dai()).await.unwrap_err().kind(), "Validation");
    }

    #[tokio::test]
    async fn test_add_replaces_same_address_per_account() {
        let (tokens, keyring) = registry().await;
        keyring.create_new_vault_and_keychain("correct-horse").await.unwrap();
        tokens.add_token(dai()).await.unwrap();

        let renamed = Token { symbol: "xDAI".into(), image: Some("dai.svg".into()), ..dai() };
        let list = tokens.add_token(renamed.clone()).await.unwrap();
        assert_eq!(list, vec![renamed]);

        // a second account starts with its own empty list
        keyring.create_new_account().await.unwrap();
        assert!(tokens.get_tokens().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_bad_metadata() {
        let (tokens, keyring) = registry().await;
        keyring.create_new_vault_and_keychain("correct-horse").await.unwrap();
        let long = Token { symbol: "ABCDEFGHIJKL".into(), ..dai() };
        assert!(tokens.add_token(long).await.is_err());
        let precise = Token { decimals: 77, ..dai() };
        assert!(tokens.add_token(precise).await.is_err());
    }
}
