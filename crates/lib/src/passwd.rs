//! Passphrase hashing for account credentials
//!
//! Provides salt generation, Argon2id hashing with an explicit salt, and
//! constant-time verification. The salt and hash are kept as separate raw
//! byte strings because the stored credential record carries them as
//! distinct fields.
//!
//! A salt is generated for every account at registration, even when no
//! passphrase is set, so that adding a passphrase later cannot betray that
//! there was none before.

use argon2::Argon2;
use rand::RngCore;
use subtle::ConstantTimeEq;
use thiserror::Error;

/// Salt length in bytes.
pub const SALT_LENGTH: usize = 16;

/// Derived hash length in bytes.
pub const HASH_LENGTH: usize = 32;

/// Error types for passphrase handling.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PasswdError {
    #[error("Passphrase hashing failed: {reason}")]
    HashingFailed { reason: String },

    #[error("Passphrase does not match")]
    Mismatch,
}

/// Generate a fresh random salt.
pub fn new_salt() -> Vec<u8> {
    let mut salt = vec![0u8; SALT_LENGTH];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    salt
}

/// Hash a passphrase with the given salt using Argon2id.
///
/// # Arguments
/// * `salt` - The per-account salt (from [`new_salt`])
/// * `passphrase` - The passphrase to hash
///
/// # Returns
/// The raw derived hash bytes.
pub fn hash(salt: &[u8], passphrase: &str) -> Result<Vec<u8>, PasswdError> {
    let mut out = vec![0u8; HASH_LENGTH];
    Argon2::default()
        .hash_password_into(passphrase.as_bytes(), salt, &mut out)
        .map_err(|e| PasswdError::HashingFailed {
            reason: e.to_string(),
        })?;
    Ok(out)
}

/// Verify a passphrase against a stored hash and salt.
///
/// The comparison runs in time independent of the position of the first
/// differing byte. An empty stored hash means the account has no
/// passphrase and never verifies.
///
/// # Returns
/// `Ok(())` if the passphrase matches, `Err(PasswdError::Mismatch)`
/// otherwise.
pub fn verify(stored_hash: &[u8], salt: &[u8], passphrase: &str) -> Result<(), PasswdError> {
    if stored_hash.is_empty() {
        return Err(PasswdError::Mismatch);
    }

    let candidate = hash(salt, passphrase)?;
    if bool::from(candidate.as_slice().ct_eq(stored_hash)) {
        Ok(())
    } else {
        Err(PasswdError::Mismatch)
    }
}

/// Compare a submitted verification code against a stored one in constant
/// time. Lengths are public; contents are not.
pub fn codes_match(submitted: &str, stored: &str) -> bool {
    bool::from(submitted.as_bytes().ct_eq(stored.as_bytes()))
}
