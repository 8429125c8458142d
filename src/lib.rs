#![allow(clippy::needless_return)]
#![allow(clippy::doc_lazy_continuation)]
// src/lib.rs
//! Background wallet engine: key custody, network access, fee estimation and
//! transaction lifecycle behind a JSON message protocol.

pub mod controller;
pub mod core;
pub mod crypto;
pub mod gas;
pub mod keyring;
pub mod provider;
pub mod security;
pub mod storage;
pub mod tokens;
pub mod transaction;

pub use controller::{Request, Response, WalletApp};
pub use core::config::WalletConfig;
pub use core::errors::WalletError;
