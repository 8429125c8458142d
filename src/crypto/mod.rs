//! Stateless key material handling: password KDFs, BIP39 mnemonics, HD
//! derivation and keystore v3 interchange.

pub mod hd;
pub mod kdf;
pub mod keystore;
pub mod mnemonic;

pub use kdf::{KDFAlgorithm, KeyDerivation};
pub use keystore::{decrypt_keystore, decrypt_keystore_json, encrypt_keystore, KeystoreV3};
pub use mnemonic::{generate_mnemonic, parse_mnemonic, validate_mnemonic};
