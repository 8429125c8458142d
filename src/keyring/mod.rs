//! Key custody: vault lifecycle, HD accounts, signing, import and export.
//!
//! ## State
//! ```text
//! Locked ──unlock / create──► Unlocked ──set_locked / idle timeout──► Locked
//! ```
//! Mutations (create, unlock, new account, import, lock) take the write half
//! of the state lock, so a concurrent request waits for the account list to
//! settle instead of seeing it half-updated. Signing and export share the
//! read half.

use ethers::signers::Signer;
use ethers::types::{transaction::eip2718::TypedTransaction, Address, Bytes};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::core::config::WalletConfig;
use crate::core::domain::{Account, KeyType, PrivateKey};
use crate::core::errors::WalletError;
use crate::crypto::{self, hd::public_key_hex};
use crate::security::password_validator::{validate_password, PasswordPolicy};
use crate::security::secret::SecretText;
use crate::storage::{get_typed, keys, set_typed, KeyValueStore};

mod keyrings;
pub mod vault;

pub use keyrings::{private_key_hex, HdKeyring, Keyring, SerializedKeyring};
pub use vault::{VaultEnvelope, VaultKey};

/// How `importAccountStrategy` receives the key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "camelCase")]
pub enum ImportStrategy {
    #[serde(rename_all = "camelCase")]
    PrivateKey { private_key: String },
    Json { json: String, password: String },
}

struct Unlocked {
    keyrings: Vec<Keyring>,
    key: VaultKey,
}

impl Unlocked {
    fn accounts(&self) -> Vec<Account> {
        self.keyrings.iter().flat_map(|k| k.accounts()).collect()
    }

    fn owns(&self, address: &Address) -> bool {
        self.keyrings.iter().any(|k| k.wallet_for(address).is_some())
    }
}

pub struct KeyringController {
    config: Arc<WalletConfig>,
    store: Arc<dyn KeyValueStore>,
    state: RwLock<Option<Unlocked>>,
    last_activity: parking_lot::Mutex<Instant>,
}

impl KeyringController {
    pub fn new(config: Arc<WalletConfig>, store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            config,
            store,
            state: RwLock::new(None),
            last_activity: parking_lot::Mutex::new(Instant::now()),
        }
    }

    fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    fn password_policy(&self) -> PasswordPolicy {
        let security = &self.config.security;
        if security.strict_passwords {
            let strict = PasswordPolicy::strict();
            PasswordPolicy { min_length: strict.min_length.max(security.min_password_length), ..strict }
        } else {
            PasswordPolicy::with_min_length(security.min_password_length)
        }
    }

    pub fn generate_mnemonic(&self) -> Result<SecretText, WalletError> {
        crypto::generate_mnemonic(self.config.security.mnemonic_word_count)
    }

    pub fn validate_mnemonic(&self, phrase: &str) -> bool {
        crypto::validate_mnemonic(phrase)
    }

    /// Creates a vault around a freshly generated mnemonic.
    pub async fn create_new_vault_and_keychain(
        &self,
        password: &str,
    ) -> Result<Vec<Account>, WalletError> {
        validate_password(password, &self.password_policy())?;
        let mnemonic = self.generate_mnemonic()?;
        self.create_vault(password, mnemonic).await
    }

    /// Creates a vault from an existing mnemonic, replacing any stored vault.
    pub async fn create_new_vault_and_restore(
        &self,
        password: &str,
        mnemonic: &str,
    ) -> Result<Vec<Account>, WalletError> {
        validate_password(password, &self.password_policy())?;
        let mnemonic = crypto::parse_mnemonic(mnemonic)?;
        self.create_vault(password, mnemonic).await
    }

    async fn create_vault(
        &self,
        password: &str,
        mnemonic: SecretText,
    ) -> Result<Vec<Account>, WalletError> {
        let mut state = self.state.write().await;

        let keyring = HdKeyring::new(mnemonic, &self.config.security.hd_path)?;
        let unlocked = Unlocked {
            keyrings: vec![Keyring::Hd(keyring)],
            key: VaultKey::generate(password, self.config.security.vault_kdf)?,
        };
        self.persist(&unlocked).await?;

        let accounts = unlocked.accounts();
        if let Some(first) = accounts.first() {
            set_typed(self.store.as_ref(), keys::SELECTED_ADDRESS, &first.address).await?;
            info!(address = ?first.address, "Vault created");
        }
        *state = Some(unlocked);
        self.touch();
        Ok(accounts)
    }

    /// Decrypts the stored vault. Calling it again while unlocked only checks
    /// the password.
    pub async fn unlock_keyrings(&self, password: &str) -> Result<(), WalletError> {
        let mut state = self.state.write().await;

        if let Some(unlocked) = state.as_ref() {
            if unlocked.key.matches(password)? {
                debug!("Vault already unlocked");
                self.touch();
                return Ok(());
            }
            return Err(WalletError::InvalidPassword);
        }

        let envelope = self.load_envelope().await?;
        let key = VaultKey::open(&envelope, password)?;
        let plaintext = key.unseal(&envelope)?;
        let serialized: Vec<SerializedKeyring> = serde_json::from_slice(&plaintext)
            .map_err(|e| WalletError::VaultCorrupted(format!("vault payload unreadable: {}", e)))?;
        let keyrings = serialized
            .iter()
            .map(Keyring::restore)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| WalletError::VaultCorrupted(format!("keyring unreadable: {}", e)))?;

        let unlocked = Unlocked { keyrings, key };
        info!(accounts = unlocked.accounts().len(), "Vault unlocked");
        *state = Some(unlocked);
        self.touch();
        Ok(())
    }

    /// Checks `password` against the stored vault without unlocking it.
    pub async fn verify_password(&self, password: &str) -> Result<(), WalletError> {
        let envelope = self.load_envelope().await?;
        VaultKey::open(&envelope, password).map(|_| ())
    }

    /// Drops every decrypted keyring.
    pub async fn set_locked(&self) {
        let mut state = self.state.write().await;
        if state.take().is_some() {
            info!("Vault locked");
        }
    }

    pub async fn is_unlocked(&self) -> bool {
        self.state.read().await.is_some()
    }

    /// Locks the vault once it has been idle for `auto_lock_secs`. Returns
    /// whether it locked.
    pub async fn enforce_auto_lock(&self) -> bool {
        let timeout = self.config.security.auto_lock_secs;
        if timeout == 0 || self.last_activity.lock().elapsed() < Duration::from_secs(timeout) {
            return false;
        }
        let mut state = self.state.write().await;
        if state.take().is_some() {
            info!(idle_secs = timeout, "Vault auto-locked");
            return true;
        }
        false
    }

    pub async fn create_new_account(&self) -> Result<Account, WalletError> {
        let mut guard = self.state.write().await;
        let unlocked = guard.as_mut().ok_or(WalletError::Locked)?;

        let position = unlocked
            .keyrings
            .iter()
            .position(|k| matches!(k, Keyring::Hd(_)))
            .ok_or_else(|| WalletError::Validation("no HD keyring in vault".into()))?;
        let Keyring::Hd(hd) = &mut unlocked.keyrings[position] else {
            return Err(WalletError::Validation("no HD keyring in vault".into()));
        };
        let account = hd.add_account()?;

        if let Err(e) = self.persist(unlocked).await {
            if let Keyring::Hd(hd) = &mut unlocked.keyrings[position] {
                hd.discard_last_account();
            }
            return Err(e);
        }
        set_typed(self.store.as_ref(), keys::SELECTED_ADDRESS, &account.address).await?;
        info!(address = ?account.address, index = ?account.derivation_index, "Account created");
        self.touch();
        Ok(account)
    }

    /// Signs `tx` for `chain_id` and returns the raw RLP bytes.
    pub async fn sign_transaction(
        &self,
        address: Address,
        tx: &TypedTransaction,
        chain_id: u64,
    ) -> Result<Bytes, WalletError> {
        let guard = self.state.read().await;
        let unlocked = guard.as_ref().ok_or(WalletError::Locked)?;
        let wallet = unlocked
            .keyrings
            .iter()
            .find_map(|k| k.wallet_for(&address))
            .ok_or_else(|| WalletError::UnknownAccount(format!("{:?}", address)))?;

        let mut tx = tx.clone();
        tx.set_chain_id(chain_id);
        tx.set_from(address);
        let signature = wallet
            .clone()
            .with_chain_id(chain_id)
            .sign_transaction_sync(&tx)
            .map_err(|e| WalletError::Crypto(format!("Signing failed: {}", e)))?;
        self.touch();
        debug!(address = ?address, chain_id, "Transaction signed");
        Ok(tx.rlp_signed(&signature))
    }

    /// Returns the private or public key of `address` after re-checking the
    /// password.
    pub async fn export_key(
        &self,
        address: Address,
        key_type: KeyType,
        password: &str,
    ) -> Result<SecretText, WalletError> {
        self.verify_password(password).await?;

        let guard = self.state.read().await;
        let unlocked = guard.as_ref().ok_or(WalletError::Locked)?;
        let wallet = unlocked
            .keyrings
            .iter()
            .find_map(|k| k.wallet_for(&address))
            .ok_or_else(|| WalletError::UnknownAccount(format!("{:?}", address)))?;

        self.touch();
        match key_type {
            KeyType::Private => {
                warn!(address = ?address, "Private key exported");
                Ok(private_key_hex(wallet))
            }
            KeyType::Public => Ok(Zeroizing::new(public_key_hex(wallet))),
        }
    }

    /// Encodes a raw private key as a keystore v3 JSON document.
    pub fn export_keystore_v3(
        &self,
        private_key: &str,
        password: &str,
    ) -> Result<String, WalletError> {
        let key = PrivateKey::from_hex(private_key)?;
        let keystore =
            crypto::encrypt_keystore(&key, password, self.config.security.keystore_kdf)?;
        Ok(serde_json::to_string(&keystore)?)
    }

    /// Adds an imported key and selects it.
    pub async fn import_account_strategy(
        &self,
        strategy: ImportStrategy,
    ) -> Result<Address, WalletError> {
        let key = match &strategy {
            ImportStrategy::PrivateKey { private_key } => PrivateKey::from_hex(private_key)?,
            ImportStrategy::Json { json, password } => crypto::decrypt_keystore_json(json, password)?,
        };
        let keyring = Keyring::imported(&key)?;
        let address = keyring.accounts()[0].address;

        let mut guard = self.state.write().await;
        let unlocked = guard.as_mut().ok_or(WalletError::Locked)?;
        if unlocked.owns(&address) {
            return Err(WalletError::DuplicateAccount(format!("{:?}", address)));
        }
        unlocked.keyrings.push(keyring);
        if let Err(e) = self.persist(unlocked).await {
            unlocked.keyrings.pop();
            return Err(e);
        }

        set_typed(self.store.as_ref(), keys::SELECTED_ADDRESS, &address).await?;
        info!(address = ?address, "Account imported");
        self.touch();
        Ok(address)
    }

    /// Accounts of the unlocked vault.
    pub async fn get_accounts(&self) -> Result<Vec<Account>, WalletError> {
        let guard = self.state.read().await;
        Ok(guard.as_ref().ok_or(WalletError::Locked)?.accounts())
    }

    /// Persisted public account list; readable while locked.
    pub async fn get_store_accounts(&self) -> Result<Vec<Address>, WalletError> {
        Ok(get_typed(self.store.as_ref(), keys::ACCOUNTS).await?.unwrap_or_default())
    }

    pub async fn get_selected_address(&self) -> Result<Option<Address>, WalletError> {
        get_typed(self.store.as_ref(), keys::SELECTED_ADDRESS).await
    }

    pub async fn set_selected_address(&self, address: Address) -> Result<(), WalletError> {
        if !self.get_store_accounts().await?.contains(&address) {
            return Err(WalletError::UnknownAccount(format!("{:?}", address)));
        }
        set_typed(self.store.as_ref(), keys::SELECTED_ADDRESS, &address).await
    }

    /// Re-selects the first account only if the stored selection is missing
    /// or no longer owned. Returns whether anything was written.
    pub async fn refresh_selected_address(&self) -> Result<bool, WalletError> {
        let accounts = self.get_store_accounts().await?;
        let selected = self.get_selected_address().await?;
        match (selected, accounts.first()) {
            (Some(current), _) if accounts.contains(&current) => Ok(false),
            (_, Some(first)) => {
                set_typed(self.store.as_ref(), keys::SELECTED_ADDRESS, first).await?;
                debug!(address = ?first, "Selected address reconciled");
                Ok(true)
            }
            (_, None) => Ok(false),
        }
    }

    async fn load_envelope(&self) -> Result<VaultEnvelope, WalletError> {
        let value = self
            .store
            .get(keys::VAULT)
            .await?
            .ok_or_else(|| WalletError::Validation("no vault has been created".into()))?;
        serde_json::from_value(value)
            .map_err(|e| WalletError::VaultCorrupted(format!("vault envelope unreadable: {}", e)))
    }

    async fn persist(&self, unlocked: &Unlocked) -> Result<(), WalletError> {
        let serialized: Vec<SerializedKeyring> =
            unlocked.keyrings.iter().map(Keyring::serialize).collect();
        let plaintext = Zeroizing::new(serde_json::to_vec(&serialized)?);
        let envelope = unlocked.key.seal(&plaintext)?;

        set_typed(self.store.as_ref(), keys::VAULT, &envelope).await?;
        let addresses: Vec<Address> = unlocked.accounts().into_iter().map(|a| a.address).collect();
        set_typed(self.store.as_ref(), keys::ACCOUNTS, &addresses).await?;
        Ok(())
    }
}
