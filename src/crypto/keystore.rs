//! Keystore v3 (Web3 Secret Storage) encoding.
//!
//! Layout: a KDF (scrypt on export, scrypt or pbkdf2-hmac-sha256 on import)
//! stretches the password into 32 bytes; the first 16 are the AES-128-CTR key
//! over the raw private key, the last 16 are prefixed to the ciphertext and
//! hashed with Keccak-256 to form the MAC.

use aes::Aes128;
use ctr::cipher::{KeyIvInit, StreamCipher};
use ethers::signers::Signer;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::core::config::ScryptConfig;
use crate::core::domain::PrivateKey;
use crate::core::errors::WalletError;
use crate::crypto::hd::wallet_from_private_key;
use crate::crypto::kdf::KeyDerivation;
use crate::security::secret::ct_eq;

type Aes128Ctr = ctr::Ctr128BE<Aes128>;

const DKLEN: usize = 32;
const CIPHER: &str = "aes-128-ctr";

/// Upper bounds on imported KDF work. Geth's "standard" scrypt (n = 2^18,
/// r = 8) uses 256 MiB and the reference PBKDF2 vector uses 2^18 rounds.
const MAX_PBKDF2_ROUNDS: u32 = 10_000_000;
const MAX_SCRYPT_MEMORY: u64 = 512 * 1024 * 1024;
const MAX_SCRYPT_P: u32 = 16;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeystoreV3 {
    pub version: u8,
    pub id: Uuid,
    /// Lowercase hex without `0x`, as written by geth
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub address: Option<String>,
    #[serde(alias = "Crypto")]
    pub crypto: CryptoSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CryptoSection {
    pub cipher: String,
    pub cipherparams: CipherParams,
    pub ciphertext: String,
    pub kdf: String,
    pub kdfparams: KdfParams,
    pub mac: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CipherParams {
    pub iv: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KdfParams {
    Scrypt { dklen: usize, n: u64, p: u32, r: u32, salt: String },
    Pbkdf2 { c: u32, dklen: usize, prf: String, salt: String },
}

/// Encrypts `key` under `password` into a keystore v3 document.
pub fn encrypt_keystore(
    key: &PrivateKey,
    password: &str,
    kdf: ScryptConfig,
) -> Result<KeystoreV3, WalletError> {
    let salt = KeyDerivation::generate_salt(32);
    let mut iv = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut iv);

    let derived = KeyDerivation::scrypt(kdf).derive_key(password.as_bytes(), &salt, DKLEN)?;

    let mut ciphertext = key.with_secret(|bytes| bytes.to_vec());
    apply_ctr(&derived[..16], &iv, &mut ciphertext)?;
    let mac = compute_mac(&derived[16..32], &ciphertext);

    let address = format!("{:x}", wallet_from_private_key(key)?.address());

    Ok(KeystoreV3 {
        version: 3,
        id: Uuid::new_v4(),
        address: Some(address),
        crypto: CryptoSection {
            cipher: CIPHER.to_string(),
            cipherparams: CipherParams { iv: hex::encode(iv) },
            ciphertext: hex::encode(&ciphertext),
            kdf: "scrypt".to_string(),
            kdfparams: KdfParams::Scrypt {
                dklen: DKLEN,
                n: kdf.n(),
                p: kdf.p,
                r: kdf.r,
                salt: hex::encode(salt),
            },
            mac: hex::encode(mac),
        },
    })
}

/// Recovers the private key. A MAC mismatch means the password is wrong.
pub fn decrypt_keystore(keystore: &KeystoreV3, password: &str) -> Result<PrivateKey, WalletError> {
    if keystore.version != 3 {
        return Err(WalletError::Validation(format!(
            "unsupported keystore version {}",
            keystore.version
        )));
    }
    let crypto = &keystore.crypto;
    if crypto.cipher != CIPHER {
        return Err(WalletError::Validation(format!("unsupported cipher {}", crypto.cipher)));
    }

    let derived = match &crypto.kdfparams {
        KdfParams::Scrypt { dklen, n, p, r, salt } => {
            check_dklen(*dklen)?;
            if !n.is_power_of_two() || *n < 2 {
                return Err(WalletError::Validation(format!("invalid scrypt n {}", n)));
            }
            let memory = 128u64.saturating_mul(u64::from(*r)).saturating_mul(*n);
            if *r == 0 || *p == 0 || *p > MAX_SCRYPT_P || memory > MAX_SCRYPT_MEMORY {
                return Err(WalletError::Validation(format!(
                    "scrypt parameters out of range (n={}, r={}, p={})",
                    n, r, p
                )));
            }
            let config = ScryptConfig { log_n: n.trailing_zeros() as u8, r: *r, p: *p };
            KeyDerivation::scrypt(config).derive_key(
                password.as_bytes(),
                &decode_field("salt", salt)?,
                DKLEN,
            )?
        }
        KdfParams::Pbkdf2 { c, dklen, prf, salt } => {
            check_dklen(*dklen)?;
            if prf != "hmac-sha256" {
                return Err(WalletError::Validation(format!("unsupported prf {}", prf)));
            }
            if *c == 0 || *c > MAX_PBKDF2_ROUNDS {
                return Err(WalletError::Validation(format!("pbkdf2 round count {} out of range", c)));
            }
            KeyDerivation::pbkdf2(*c).derive_key(
                password.as_bytes(),
                &decode_field("salt", salt)?,
                DKLEN,
            )?
        }
    };

    let ciphertext = decode_field("ciphertext", &crypto.ciphertext)?;
    let expected_mac = decode_field("mac", &crypto.mac)?;
    if !ct_eq(&compute_mac(&derived[16..32], &ciphertext), &expected_mac) {
        return Err(WalletError::InvalidPassword);
    }

    let iv = decode_field("iv", &crypto.cipherparams.iv)?;
    let mut plaintext = Zeroizing::new(ciphertext);
    apply_ctr(&derived[..16], &iv, &mut plaintext)?;
    PrivateKey::try_from_slice(&plaintext)
}

/// Parses and decrypts a keystore JSON document.
pub fn decrypt_keystore_json(json: &str, password: &str) -> Result<PrivateKey, WalletError> {
    let keystore: KeystoreV3 = serde_json::from_str(json)
        .map_err(|e| WalletError::Validation(format!("Invalid keystore JSON: {}", e)))?;
    decrypt_keystore(&keystore, password)
}

fn check_dklen(dklen: usize) -> Result<(), WalletError> {
    if dklen != DKLEN {
        return Err(WalletError::Validation(format!("unsupported keystore dklen {}", dklen)));
    }
    Ok(())
}

fn apply_ctr(key: &[u8], iv: &[u8], buf: &mut [u8]) -> Result<(), WalletError> {
    let mut cipher = Aes128Ctr::new_from_slices(key, iv)
        .map_err(|_| WalletError::Validation("invalid AES-128-CTR key or IV length".into()))?;
    cipher.apply_keystream(buf);
    Ok(())
}

fn compute_mac(mac_key: &[u8], ciphertext: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(mac_key);
    hasher.update(ciphertext);
    hasher.finalize().into()
}

fn decode_field(name: &str, value: &str) -> Result<Vec<u8>, WalletError> {
    hex::decode(value.trim_start_matches("0x"))
        .map_err(|_| WalletError::Validation(format!("keystore field {} is not hex", name)))
}
