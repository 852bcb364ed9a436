//! Bcrypt helpers for admin credentials.
//! The host only ever sees bcrypt hashes, so everything here is about making
//! sure a configured value really is one before the host starts.

use thiserror::Error;

/// Cost used by `hash-pw` when none is given. Matches the host's own tool.
pub const DEFAULT_COST: u32 = 8;
const MIN_COST: u32 = 4;
const MAX_COST: u32 = 31;

const HASH_LEN: usize = 60;
const SALT_AND_DIGEST_LEN: usize = 53;
const PREFIXES: [&str; 3] = ["$2a$", "$2b$", "$2y$"];

/// Values shipped in settings templates that must never reach the host.
const KNOWN_PLACEHOLDERS: [&str; 2] = [
    "$2b$08$REPLACE_WITH_REAL_BCRYPT_HASH",
    "$2a$08$REPLACE_WITH_REAL_BCRYPT_HASH",
];
const PLACEHOLDER_MARKERS: [&str; 3] = ["REPLACE_WITH", "CHANGE_ME", "CHANGEME"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HashShapeError {
    #[error("expected 60 bytes, found {0}")]
    Length(usize),
    #[error("unsupported prefix; expected $2a$, $2b$ or $2y$")]
    Prefix,
    #[error("cost factor must be two digits between 04 and 31")]
    Cost,
    #[error("salt and digest contain characters outside the bcrypt alphabet")]
    Alphabet,
}

/// Returns true when the value is a template placeholder rather than a hash.
pub fn is_placeholder(value: &str) -> bool {
    let trimmed = value.trim();
    KNOWN_PLACEHOLDERS.contains(&trimmed)
        || PLACEHOLDER_MARKERS
            .iter()
            .any(|marker| trimmed.to_ascii_uppercase().contains(marker))
}

/// Checks that `value` has the shape `$2[aby]$NN$<22 salt><31 digest>`.
/// The value itself is never part of the error.
pub fn validate_bcrypt_hash(value: &str) -> Result<(), HashShapeError> {
    if value.len() != HASH_LEN {
        return Err(HashShapeError::Length(value.len()));
    }
    if !PREFIXES.iter().any(|prefix| value.starts_with(prefix)) {
        return Err(HashShapeError::Prefix);
    }

    let bytes = value.as_bytes();
    let cost_digits = &bytes[4..6];
    if !cost_digits.iter().all(u8::is_ascii_digit) || bytes[6] != b'$' {
        return Err(HashShapeError::Cost);
    }
    let cost = u32::from(cost_digits[0] - b'0') * 10 + u32::from(cost_digits[1] - b'0');
    if !(MIN_COST..=MAX_COST).contains(&cost) {
        return Err(HashShapeError::Cost);
    }

    let tail = &bytes[7..];
    debug_assert_eq!(tail.len(), SALT_AND_DIGEST_LEN);
    if !tail.iter().all(|b| b.is_ascii_alphanumeric() || *b == b'.' || *b == b'/') {
        return Err(HashShapeError::Alphabet);
    }
    Ok(())
}

/// Hashes a plaintext password with bcrypt at the given cost.
pub fn hash_password(plaintext: &str, cost: u32) -> Result<String, bcrypt::BcryptError> {
    bcrypt::hash(plaintext, cost)
}

/// Verifies a plaintext password against a stored bcrypt hash.
/// Malformed hashes verify as `false`.
pub fn verify_password(plaintext: &str, stored_hash: &str) -> bool {
    bcrypt::verify(plaintext, stored_hash).unwrap_or(false)
}
