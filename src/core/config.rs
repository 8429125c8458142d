use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::core::errors::WalletError;

/// Scrypt cost parameters. `log_n` is the base-2 logarithm of N.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScryptConfig {
    pub log_n: u8,
    pub r: u32,
    pub p: u32,
}

impl ScryptConfig {
    pub fn n(&self) -> u64 {
        1u64 << self.log_n
    }

    /// Vault default: N=2^17, r=8, p=1.
    pub fn vault_default() -> Self {
        Self { log_n: 17, r: 8, p: 1 }
    }

    /// Keystore v3 default used by most wallets on export (N=2^13).
    pub fn keystore_default() -> Self {
        Self { log_n: 13, r: 8, p: 1 }
    }

    /// Cheap parameters for tests only.
    pub fn insecure_fast() -> Self {
        Self { log_n: 4, r: 8, p: 1 }
    }
}

/// Security configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// KDF used to derive the vault encryption key
    pub vault_kdf: ScryptConfig,

    /// KDF written into exported keystore v3 files
    pub keystore_kdf: ScryptConfig,

    /// Minimum password length accepted at vault creation
    pub min_password_length: usize,

    /// Also require an uppercase letter, a digit and a strong score
    pub strict_passwords: bool,

    /// Lock the vault after this many idle seconds (0 disables)
    pub auto_lock_secs: u64,

    /// HD path prefix; the account index is appended
    pub hd_path: String,

    /// Words in a freshly generated mnemonic (12 or 24)
    pub mnemonic_word_count: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            vault_kdf: ScryptConfig::vault_default(),
            keystore_kdf: ScryptConfig::keystore_default(),
            min_password_length: 8,
            strict_passwords: false,
            auto_lock_secs: 0,
            hd_path: "m/44'/60'/0'/0".to_string(),
            mnemonic_word_count: 12,
        }
    }
}

/// Blockchain network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub name: String,
    pub rpc_url: String,
    pub chain_id: u64,
}

/// Gas fee estimation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GasConfig {
    pub poll_interval_ms: u64,
    /// Upper bound for each resolution step (fee market, oracle, eth_gasPrice)
    pub step_timeout_ms: u64,
    /// `{chain_id}` is substituted with the active chain id
    pub legacy_oracle_url: Option<String>,
    pub legacy_oracle_chain_ids: Vec<u64>,
    pub fee_history_blocks: u64,
}

impl Default for GasConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 10_000,
            step_timeout_ms: 5_000,
            legacy_oracle_url: Some(
                "https://gas.api.cx.metamask.io/networks/{chain_id}/gasPrices".to_string(),
            ),
            legacy_oracle_chain_ids: vec![1],
            fee_history_blocks: 5,
        }
    }
}

/// Transaction broadcast and tracking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionConfig {
    pub max_broadcast_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub receipt_poll_interval_ms: u64,
    pub default_gas_limit: u64,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            max_broadcast_attempts: 5,
            backoff_base_ms: 500,
            backoff_max_ms: 8_000,
            receipt_poll_interval_ms: 4_000,
            default_gas_limit: 21_000,
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub database_url: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { database_url: "sqlite://./data/wallet.db?mode=rwc".to_string() }
    }
}

/// wallet配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletConfig {
    /// Built-in networks keyed by a short name ("eth", "sepolia", ...)
    pub networks: BTreeMap<String, NetworkConfig>,
    pub default_chain_id: u64,
    pub rpc_timeout_ms: u64,
    pub security: SecurityConfig,
    pub gas: GasConfig,
    pub transaction: TransactionConfig,
    pub storage: StorageConfig,
}

impl Default for WalletConfig {
    fn default() -> Self {
        let mut networks = BTreeMap::new();
        for (key, chain_id, name, rpc_url) in [
            ("eth", 1u64, "Ethereum Mainnet", "https://eth.llamarpc.com"),
            ("sepolia", 11155111, "Sepolia Testnet", "https://rpc.sepolia.org"),
            ("polygon", 137, "Polygon Mainnet", "https://polygon-rpc.com"),
            ("bsc", 56, "BSC Mainnet", "https://bsc-dataseed.binance.org"),
        ] {
            networks.insert(
                key.to_string(),
                NetworkConfig { name: name.to_string(), rpc_url: rpc_url.to_string(), chain_id },
            );
        }

        Self {
            networks,
            default_chain_id: 1,
            rpc_timeout_ms: 10_000,
            security: SecurityConfig::default(),
            gas: GasConfig::default(),
            transaction: TransactionConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl WalletConfig {
    /// Parse a TOML document; missing sections fall back to defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, WalletError> {
        let config: WalletConfig =
            toml::from_str(content).map_err(|e| WalletError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, WalletError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            WalletError::Config(format!("cannot read {}: {}", path.as_ref().display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Built-in network for a chain id.
    pub fn network_by_chain_id(&self, chain_id: u64) -> Option<&NetworkConfig> {
        self.networks.values().find(|n| n.chain_id == chain_id)
    }

    pub fn validate(&self) -> Result<(), WalletError> {
        if self.network_by_chain_id(self.default_chain_id).is_none() {
            return Err(WalletError::Config(format!(
                "default_chain_id {} is not a configured network",
                self.default_chain_id
            )));
        }
        if !matches!(self.security.mnemonic_word_count, 12 | 24) {
            return Err(WalletError::Config("mnemonic_word_count must be 12 or 24".into()));
        }
        if self.transaction.max_broadcast_attempts == 0 {
            return Err(WalletError::Config("max_broadcast_attempts must be at least 1".into()));
        }
        Ok(())
    }

    /// Configuration with cheap KDFs and short intervals, for tests.
    pub fn for_testing() -> Self {
        let mut config = Self::default();
        config.security.vault_kdf = ScryptConfig::insecure_fast();
        config.security.keystore_kdf = ScryptConfig::insecure_fast();
        config.gas.poll_interval_ms = 50;
        config.gas.step_timeout_ms = 500;
        config.gas.legacy_oracle_url = None;
        config.transaction.backoff_base_ms = 1;
        config.transaction.backoff_max_ms = 5;
        config.transaction.receipt_poll_interval_ms = 10;
        config.rpc_timeout_ms = 1_000;
        config
    }
}
