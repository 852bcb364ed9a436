//! Vault for password hashes that should not sit in the settings file in the
//! clear. Envelopes are ChaCha20-Poly1305 nonce + ciphertext + tag, base64
//! encoded so they embed directly in JSON as `passwordSecret`.

use std::fmt;
use std::fs;
use std::path::Path;

use argon2::{Algorithm, Argon2, Params, Version};
use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine};
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroize;

const TAG_SIZE: usize = 16;
const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum SecretVaultError {
    #[error("invalid key length; expected 32 bytes")]
    InvalidKeyLength,
    #[error("argon2 derivation failed: {0}")]
    DerivationFailed(String),
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),
    #[error("key source unreadable: {0}")]
    KeySourceUnreadable(String),
    #[error("base64 decoding of {field} failed: {reason}")]
    Base64DecodeFailed { field: &'static str, reason: String },
    #[error("decrypted secret is not valid utf-8")]
    NotUtf8,
}

/// Serializable envelope for an encrypted value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EncryptedSecret {
    pub nonce: String,
    pub ciphertext: String,
    pub tag: String,
}

/// Holds the symmetric key used to open `passwordSecret` envelopes.
pub struct SecretVault {
    key: Key,
}

fn decode_field(field: &'static str, value: &str) -> Result<Vec<u8>, SecretVaultError> {
    STANDARD_NO_PAD
        .decode(value.trim().as_bytes())
        .map_err(|e| SecretVaultError::Base64DecodeFailed {
            field,
            reason: format!("{e}"),
        })
}

impl SecretVault {
    pub fn from_key_bytes(key_bytes: &[u8]) -> Result<Self, SecretVaultError> {
        if key_bytes.len() != KEY_LEN {
            return Err(SecretVaultError::InvalidKeyLength);
        }
        let mut key = Key::default();
        key.copy_from_slice(key_bytes);
        Ok(Self { key })
    }

    /// Reads a base64-encoded key from an environment variable.
    pub fn from_env_var(var: &str) -> Result<Self, SecretVaultError> {
        let encoded = std::env::var(var)
            .map_err(|e| SecretVaultError::KeySourceUnreadable(format!("{var}: {e}")))?;
        let mut decoded = decode_field("key", &encoded)?;
        let vault = Self::from_key_bytes(&decoded);
        decoded.zeroize();
        vault
    }

    /// Reads a base64-encoded key from disk.
    pub fn from_key_file(path: &Path) -> Result<Self, SecretVaultError> {
        let content = fs::read_to_string(path).map_err(|e| {
            SecretVaultError::KeySourceUnreadable(format!("{}: {e}", path.display()))
        })?;
        let mut decoded = decode_field("key", &content)?;
        let vault = Self::from_key_bytes(&decoded);
        decoded.zeroize();
        vault
    }

    /// Derives a key from an operator passphrase with Argon2id.
    /// The salt is stored next to the envelopes in the settings file.
    pub fn derive_from_passphrase(passphrase: &str, salt: &[u8]) -> Result<Self, SecretVaultError> {
        let params = Params::new(19 * 1024, 3, 1, Some(KEY_LEN))
            .map_err(|e| SecretVaultError::DerivationFailed(format!("{e}")))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let mut output = [0u8; KEY_LEN];
        argon2
            .hash_password_into(passphrase.as_bytes(), salt, &mut output)
            .map_err(|e| SecretVaultError::DerivationFailed(format!("{e}")))?;

        let vault = SecretVault::from_key_bytes(&output);
        output.zeroize();
        vault
    }

    pub fn encrypt_secret(&self, plaintext: &[u8]) -> Result<EncryptedSecret, SecretVaultError> {
        let cipher = ChaCha20Poly1305::new(&self.key);
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);

        let mut sealed = cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| SecretVaultError::EncryptionFailed(format!("{e}")))?;
        if sealed.len() < TAG_SIZE {
            return Err(SecretVaultError::EncryptionFailed(
                "ciphertext shorter than authentication tag".to_string(),
            ));
        }
        let tag = sealed.split_off(sealed.len() - TAG_SIZE);

        Ok(EncryptedSecret {
            nonce: STANDARD_NO_PAD.encode(nonce),
            ciphertext: STANDARD_NO_PAD.encode(&sealed),
            tag: STANDARD_NO_PAD.encode(tag),
        })
    }

    pub fn decrypt_secret(&self, secret: &EncryptedSecret) -> Result<Vec<u8>, SecretVaultError> {
        let nonce = decode_field("nonce", &secret.nonce)?;
        let mut sealed = decode_field("ciphertext", &secret.ciphertext)?;
        sealed.extend_from_slice(&decode_field("tag", &secret.tag)?);

        if nonce.len() != NONCE_LEN {
            return Err(SecretVaultError::DecryptionFailed(
                "nonce length mismatch".to_string(),
            ));
        }

        ChaCha20Poly1305::new(&self.key)
            .decrypt(Nonce::from_slice(&nonce), sealed.as_ref())
            .map_err(|e| SecretVaultError::DecryptionFailed(format!("{e}")))
    }

    /// Opens an envelope that holds text, such as a bcrypt hash.
    pub fn decrypt_utf8(&self, secret: &EncryptedSecret) -> Result<String, SecretVaultError> {
        let bytes = self.decrypt_secret(secret)?;
        String::from_utf8(bytes).map_err(|e| {
            let mut raw = e.into_bytes();
            raw.zeroize();
            SecretVaultError::NotUtf8
        })
    }
}

impl fmt::Debug for SecretVault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretVault").field("key", &"<redacted>").finish()
    }
}

impl Drop for SecretVault {
    fn drop(&mut self) {
        self.key.as_mut_slice().zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::{EncryptedSecret, SecretVault};
    use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine};

    #[test]
    fn seals_and_opens_a_hash() {
        let vault = SecretVault::from_key_bytes(&[42u8; 32]).expect("key should be valid");
        let envelope = vault
            .encrypt_secret(b"$2b$08$hash")
            .expect("encryption should succeed");
        assert_eq!(vault.decrypt_utf8(&envelope).unwrap(), "$2b$08$hash");
    }

    #[test]
    fn derives_key_from_passphrase() {
        let salt = b"static-test-salt-123";
        let sealer = SecretVault::derive_from_passphrase("pa55phrase", salt)
            .expect("derivation should succeed");
        let opener = SecretVault::derive_from_passphrase("pa55phrase", salt)
            .expect("derivation should succeed");
        let envelope = sealer.encrypt_secret(b"payload").expect("encryption should work");
        assert_eq!(opener.decrypt_secret(&envelope).unwrap(), b"payload");
    }

    #[test]
    fn rejects_bad_keys() {
        let err = SecretVault::from_key_bytes(&[1u8; 16]).unwrap_err();
        assert!(format!("{err}").contains("invalid key length"));
    }

    #[test]
    fn debug_output_hides_key() {
        let vault = SecretVault::from_key_bytes(&[0x41u8; 32]).unwrap();
        let printed = format!("{vault:?}");
        assert!(printed.contains("<redacted>"));
        assert!(!printed.contains("65"));
        assert!(!printed.contains("AAAA"));
    }

    #[test]
    fn rejects_envelopes_with_short_nonce() {
        let vault = SecretVault::from_key_bytes(&[7u8; 32]).unwrap();
        let mut envelope = vault.encrypt_secret(b"payload").unwrap();
        assert_eq!(STANDARD_NO_PAD.decode(&envelope.nonce).unwrap().len(), 12);
        envelope.nonce = STANDARD_NO_PAD.encode([0u8; 8]);
        let err = vault.decrypt_secret(&envelope).unwrap_err();
        assert!(format!("{err}").contains("nonce length mismatch"));
    }

    #[test]
    fn wrong_key_cannot_open_envelope() {
        let sealer = SecretVault::from_key_bytes(&[7u8; 32]).unwrap();
        let other = SecretVault::from_key_bytes(&[8u8; 32]).unwrap();
        let envelope = sealer.encrypt_secret(b"payload").unwrap();
        let err = other.decrypt_secret(&envelope).unwrap_err();
        assert!(format!("{err}").contains("decryption failed"));
    }

    #[test]
    fn reports_which_field_is_not_base64() {
        let vault = SecretVault::from_key_bytes(&[7u8; 32]).expect("valid key");
        let bogus = EncryptedSecret {
            nonce: STANDARD_NO_PAD.encode([0u8; 12]),
            ciphertext: "***".to_string(),
            tag: STANDARD_NO_PAD.encode([0u8; 16]),
        };
        let err = vault.decrypt_secret(&bogus).unwrap_err();
        assert!(format!("{err}").contains("ciphertext"));
    }
}
