use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use scrypt::Params;
use sha2::Sha256;
use tracing::debug;
use zeroize::Zeroizing;

use crate::core::config::ScryptConfig;
use crate::core::errors::WalletError;

#[derive(Debug, Clone, PartialEq)]
pub enum KDFAlgorithm {
    PBKDF2 { iterations: u32 },
    Scrypt { log_n: u8, r: u32, p: u32 },
}

/// Password-based key derivation used by the vault and by keystore v3 files.
pub struct KeyDerivation {
    algorithm: KDFAlgorithm,
}

impl KeyDerivation {
    pub fn new(algorithm: KDFAlgorithm) -> Self {
        Self { algorithm }
    }

    pub fn pbkdf2(iterations: u32) -> Self {
        Self::new(KDFAlgorithm::PBKDF2 { iterations })
    }

    pub fn scrypt(config: ScryptConfig) -> Self {
        Self::new(KDFAlgorithm::Scrypt { log_n: config.log_n, r: config.r, p: config.p })
    }

    pub fn algorithm(&self) -> &KDFAlgorithm {
        &self.algorithm
    }

    pub fn derive_key(
        &self,
        password: &[u8],
        salt: &[u8],
        key_length: usize,
    ) -> Result<Zeroizing<Vec<u8>>, WalletError> {
        debug!("Deriving key with length {} bytes", key_length);

        match &self.algorithm {
            KDFAlgorithm::PBKDF2 { iterations } => {
                let mut key = Zeroizing::new(vec![0u8; key_length]);
                pbkdf2_hmac::<Sha256>(password, salt, *iterations, &mut key);
                Ok(key)
            }
            KDFAlgorithm::Scrypt { log_n, r, p } => {
                let params = Params::new(*log_n, *r, *p, key_length)
                    .map_err(|e| WalletError::Crypto(format!("Invalid scrypt parameters: {}", e)))?;
                let mut key = Zeroizing::new(vec![0u8; key_length]);
                scrypt::scrypt(password, salt, &params, &mut key)
                    .map_err(|e| WalletError::Crypto(format!("Scrypt derivation failed: {}", e)))?;
                Ok(key)
            }
        }
    }

    pub fn generate_salt(length: usize) -> Vec<u8> {
        let mut salt = vec![0u8; length];
        rand::rngs::OsRng.fill_bytes(&mut salt);
        salt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pbkdf2_derivation() {
        let kdf = KeyDerivation::pbkdf2(1000);
        let key1 = kdf.derive_key(b"test_password", b"test_salt_123", 32).unwrap();
        let key2 = kdf.derive_key(b"test_password", b"test_salt_123", 32).unwrap();
        assert_eq!(key1, key2);
        assert_eq!(key1.len(), 32);

        let key3 = kdf.derive_key(b"test_password", b"different_salt", 32).unwrap();
        assert_ne!(key1, key3);
    }

    #[test]
    fn test_scrypt_derivation() {
        let kdf = KeyDerivation::scrypt(ScryptConfig::insecure_fast());
        let key = kdf.derive_key(b"test_password", b"test_salt_123", 32).unwrap();
        assert_eq!(key.len(), 32);
        let key2 = kdf.derive_key(b"test_password", b"test_salt_123", 32).unwrap();
        assert_eq!(key, key2);
    }

    #[test]
    fn test_scrypt_rejects_bad_params() {
        let kdf = KeyDerivation::scrypt(ScryptConfig { log_n: 4, r: 0, p: 1 });
        assert!(kdf.derive_key(b"pw", b"salt", 32).is_err());
    }

    #[test]
    fn test_salt_generation() {
        let salt1 = KeyDerivation::generate_salt(16);
        let salt2 = KeyDerivation::generate_salt(16);
        assert_eq!(salt1.len(), 16);
        assert_ne!(salt1, salt2);
    }
}
