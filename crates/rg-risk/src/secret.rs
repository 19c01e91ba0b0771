//! Local unlock secret: `salt$sha256hex(salt || secret)`.

use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

pub const MIN_SECRET_LEN: usize = 4;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SecretError {
    TooShort { min: usize },
    NotConfigured,
}

impl fmt::Display for SecretError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecretError::TooShort { min } => {
                write!(f, "SECRET_TOO_SHORT: secret must be at least {min} characters")
            }
            SecretError::NotConfigured => write!(f, "SECRET_NOT_CONFIGURED"),
        }
    }
}

impl std::error::Error for SecretError {}

fn digest(salt: &str, secret: &str) -> String {
    let mut h = Sha256::new();
    h.update(salt.as_bytes());
    h.update(secret.as_bytes());
    hex::encode(h.finalize())
}

/// Hash a new secret with a fresh random salt.
pub fn hash_secret(secret: &str) -> Result<String, SecretError> {
    if secret.chars().count() < MIN_SECRET_LEN {
        return Err(SecretError::TooShort {
            min: MIN_SECRET_LEN,
        });
    }
    let salt = Uuid::new_v4().simple().to_string();
    Ok(format!("{salt}${}", digest(&salt, secret)))
}

/// Check `candidate` against a stored `salt$hex` value. Malformed stored
/// values never verify.
pub fn verify_secret(stored: &str, candidate: &str) -> bool {
    let Some((salt, expected)) = stored.split_once('$') else {
        return false;
    };
    if salt.is_empty() || expected.is_empty() {
        return false;
    }
    constant_time_eq(digest(salt, candidate).as_bytes(), expected.as_bytes())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
