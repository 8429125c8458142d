//! Password-encrypted vault envelope.
//!
//! ```text
//! password ─ scrypt(salt) ─► 64 bytes ─┬─ [0..32]  AES-256-GCM key
//!                                      └─ [32..64] HMAC-SHA256 key ─► verifier
//! ```
//!
//! The verifier lets a wrong password be told apart from damaged ciphertext:
//! a verifier mismatch is [`WalletError::InvalidPassword`], while a matching
//! verifier followed by an AEAD failure is [`WalletError::VaultCorrupted`].

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm,
};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::debug;
use zeroize::Zeroizing;

use crate::core::config::ScryptConfig;
use crate::core::errors::WalletError;
use crate::crypto::kdf::KeyDerivation;
use crate::security::secret::{ct_eq, SecretVec};

type HmacSha256 = Hmac<Sha256>;

const VAULT_VERSION: u8 = 1;
const SALT_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const VERIFIER_LABEL: &[u8] = b"wallet-engine/vault/verifier";
const VAULT_AAD: &[u8] = b"wallet-engine/vault/v1";

/// What gets persisted under the `vault` key. Contains no plaintext.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VaultEnvelope {
    pub version: u8,
    pub kdf: ScryptConfig,
    pub salt: String,
    pub verifier: String,
    pub nonce: String,
    pub ciphertext: String,
}

/// Key material derived from the password, held only while unlocked.
pub struct VaultKey {
    kdf: ScryptConfig,
    salt: Vec<u8>,
    cipher_key: Zeroizing<[u8; 32]>,
    verifier: [u8; 32],
}

impl VaultKey {
    /// Derives a key under a fresh random salt.
    pub fn generate(password: &str, kdf: ScryptConfig) -> Result<Self, WalletError> {
        Self::derive(password, kdf, KeyDerivation::generate_salt(SALT_LEN))
    }

    fn derive(password: &str, kdf: ScryptConfig, salt: Vec<u8>) -> Result<Self, WalletError> {
        debug!(log_n = kdf.log_n, "Deriving vault key");
        let derived = KeyDerivation::scrypt(kdf).derive_key(password.as_bytes(), &salt, 64)?;

        let mut cipher_key = Zeroizing::new([0u8; 32]);
        cipher_key.copy_from_slice(&derived[..32]);
        let verifier = compute_verifier(&derived[32..64])?;

        Ok(Self { kdf, salt, cipher_key, verifier })
    }

    /// Re-derives the key for `envelope` and checks the verifier.
    pub fn open(envelope: &VaultEnvelope, password: &str) -> Result<Self, WalletError> {
        if envelope.version != VAULT_VERSION {
            return Err(WalletError::VaultCorrupted(format!(
                "unsupported vault version {}",
                envelope.version
            )));
        }
        let key = Self::derive(password, envelope.kdf, decode_field("salt", &envelope.salt)?)?;
        let stored = decode_field("verifier", &envelope.verifier)?;
        if !ct_eq(&key.verifier, &stored) {
            return Err(WalletError::InvalidPassword);
        }
        Ok(key)
    }

    /// Whether `password` derives this same key.
    pub fn matches(&self, password: &str) -> Result<bool, WalletError> {
        let other = Self::derive(password, self.kdf, self.salt.clone())?;
        Ok(ct_eq(&self.verifier, &other.verifier))
    }

    /// Encrypts `plaintext` under a fresh nonce.
    pub fn seal(&self, plaintext: &[u8]) -> Result<VaultEnvelope, WalletError> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce);

        let cipher = Aes256Gcm::new_from_slice(self.cipher_key.as_slice())
            .map_err(|_| WalletError::Crypto("Failed to initialize AES cipher".into()))?;
        let ciphertext = cipher
            .encrypt(
                aes_gcm::Nonce::from_slice(&nonce),
                Payload { msg: plaintext, aad: VAULT_AAD },
            )
            .map_err(|_| WalletError::Crypto("Failed to encrypt vault".into()))?;

        Ok(VaultEnvelope {
            version: VAULT_VERSION,
            kdf: self.kdf,
            salt: hex::encode(&self.salt),
            verifier: hex::encode(self.verifier),
            nonce: hex::encode(nonce),
            ciphertext: hex::encode(ciphertext),
        })
    }

    pub fn unseal(&self, envelope: &VaultEnvelope) -> Result<SecretVec, WalletError> {
        let nonce = decode_field("nonce", &envelope.nonce)?;
        if nonce.len() != NONCE_LEN {
            return Err(WalletError::VaultCorrupted("nonce has wrong length".into()));
        }
        let ciphertext = decode_field("ciphertext", &envelope.ciphertext)?;

        let cipher = Aes256Gcm::new_from_slice(self.cipher_key.as_slice())
            .map_err(|_| WalletError::Crypto("Failed to initialize AES cipher".into()))?;
        let plaintext = cipher
            .decrypt(
                aes_gcm::Nonce::from_slice(&nonce),
                Payload { msg: ciphertext.as_ref(), aad: VAULT_AAD },
            )
            .map_err(|_| WalletError::VaultCorrupted("ciphertext failed authentication".into()))?;
        Ok(Zeroizing::new(plaintext))
    }
}

fn compute_verifier(mac_key: &[u8]) -> Result<[u8; 32], WalletError> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(mac_key)
        .map_err(|_| WalletError::Crypto("Invalid HMAC key".into()))?;
    mac.update(VERIFIER_LABEL);
    Ok(mac.finalize().into_bytes().into())
}

fn decode_field(name: &str, value: &str) -> Result<Vec<u8>, WalletError> {
    hex::decode(value).map_err(|_| WalletError::VaultCorrupted(format!("vault {} is not hex", name)))
}
