//! Password policy checked before a vault is created.

use crate::core::errors::WalletError;

/// Password强度等级
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PasswordStrength {
    Weak,
    Medium,
    Strong,
    VeryStrong,
}

#[derive(Debug, Clone)]
pub struct PasswordPolicy {
    pub min_length: usize,
    pub require_uppercase: bool,
    pub require_digit: bool,
    pub min_strength: PasswordStrength,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            min_length: 8,
            require_uppercase: false,
            require_digit: false,
            min_strength: PasswordStrength::Medium,
        }
    }
}

impl PasswordPolicy {
    pub fn with_min_length(min_length: usize) -> Self {
        Self { min_length, ..Self::default() }
    }

    /// Policy for high-value deployments.
    pub fn strict() -> Self {
        Self {
            min_length: 12,
            require_uppercase: true,
            require_digit: true,
            min_strength: PasswordStrength::Strong,
        }
    }
}

const COMMON_PASSWORDS: &[&str] = &[
    "password", "123456", "12345678", "qwerty", "abc123", "letmein", "welcome", "monkey",
    "iloveyou", "admin",
];

/// Checks `password` against `policy`, returning its strength.
///
/// Failures are reported as [`WalletError::WeakPassword`] with a reason that is
/// safe to show to the user (it never echoes the password).
pub fn validate_password(
    password: &str,
    policy: &PasswordPolicy,
) -> Result<PasswordStrength, WalletError> {
    if password.is_empty() {
        return Err(WalletError::WeakPassword("password must not be empty".into()));
    }

    if password.chars().count() < policy.min_length {
        return Err(WalletError::WeakPassword(format!(
            "password must be at least {} characters",
            policy.min_length
        )));
    }

    if policy.require_uppercase && !password.chars().any(|c| c.is_ascii_uppercase()) {
        return Err(WalletError::WeakPassword(
            "password must contain an uppercase letter".into(),
        ));
    }

    if policy.require_digit && !password.chars().any(|c| c.is_ascii_digit()) {
        return Err(WalletError::WeakPassword("password must contain a digit".into()));
    }

    let lower = password.to_lowercase();
    if COMMON_PASSWORDS.iter().any(|weak| lower.contains(weak)) {
        return Err(WalletError::WeakPassword("password is too common".into()));
    }

    let strength = calculate_password_strength(password);
    if strength < policy.min_strength {
        return Err(WalletError::WeakPassword(format!(
            "password strength {:?} is below the required {:?}",
            strength, policy.min_strength
        )));
    }

    Ok(strength)
}

fn calculate_password_strength(password: &str) -> PasswordStrength {
    let mut score = match password.chars().count() {
        0..=7 => 0,
        8..=11 => 1,
        12..=15 => 2,
        _ => 3,
    };

    if password.chars().any(|c| c.is_ascii_lowercase()) {
        score += 1;
    }
    if password.chars().any(|c| c.is_ascii_uppercase()) {
        score += 1;
    }
    if password.chars().any(|c| c.is_ascii_digit()) {
        score += 1;
    }
    if password.chars().any(|c| !c.is_alphanumeric()) {
        score += 2;
    }

    match score {
        0..=2 => PasswordStrength::Weak,
        3..=5 => PasswordStrength::Medium,
        6..=7 => PasswordStrength::Strong,
        _ => PasswordStrength::VeryStrong,
    }
}
