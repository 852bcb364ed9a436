//! SHA-256 digests used to fingerprint the settings file that was validated.

use sha2::{Digest, Sha256};

/// Produces a raw SHA-256 digest of the provided bytes.
pub fn sha256_digest(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Returns the hexadecimal representation of a SHA-256 digest.
pub fn sha256_hex(data: &[u8]) -> String {
    let digest = sha256_digest(data);
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::{sha256_digest, sha256_hex};
    use hex::ToHex;

    #[test]
    fn hashes_to_hex() {
        assert_eq!(
            sha256_hex(b"flowgate"),
            "bb1fc19ac4b9a2381f80b2bc9c29b46008acba9af4ea75cf39dd2bbdc4adff2a"
        );
        assert_eq!(sha256_digest(b"flowgate").encode_hex::<String>(), sha256_hex(b"flowgate"));
    }
}
