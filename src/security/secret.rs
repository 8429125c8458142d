//! Small helpers and aliases for secret buffers that must be zeroized on drop.
use zeroize::Zeroizing;

/// Common alias for secret byte buffers which will be zeroed when dropped.
pub type SecretVec = Zeroizing<Vec<u8>>;

/// Secret text (mnemonics, exported keys) zeroed when dropped.
pub type SecretText = Zeroizing<String>;

/// Constant-time equality for MACs and verification tags.
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    use subtle::ConstantTimeEq;
    a.len() == b.len() && bool::from(a.ct_eq(b))
}

/// 0x-prefixed hex of a secret, in a buffer that zeroes itself.
pub fn secret_hex(bytes: &[u8]) -> SecretText {
    let mut digits = Zeroizing::new(vec![0u8; bytes.len() * 2]);
    // buffer length always matches, so this cannot fail
    let _ = hex::encode_to_slice(bytes, &mut digits[..]);
    let mut out = Zeroizing::new(String::with_capacity(2 + digits.len()));
    out.push_str("0x");
    out.extend(digits.iter().map(|&b| b as char));
    out
}
