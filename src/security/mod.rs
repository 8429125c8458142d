//! Password policy and secret-buffer helpers.

pub mod password_validator;
pub mod secret;

pub use password_validator::{validate_password, PasswordPolicy, PasswordStrength};
pub use secret::{SecretText, SecretVec};
