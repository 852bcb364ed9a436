//! Settings provider for the host's `adminAuth` block.
//!
//! The settings file is read once at startup, every password hash source is
//! resolved (literal, environment variable, or vault envelope), and the result
//! is validated before anything is handed to the host. Hash values never show
//! up in errors, logs, or `Debug` output.

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::crypto::integrity::sha256_hex;
use crate::crypto::passwords::{is_placeholder, validate_bcrypt_hash, HashShapeError};
use crate::crypto::secrets::{EncryptedSecret, SecretVault};

/// Environment variable naming the settings file.
pub const SETTINGS_ENV: &str = "FLOWGATE_SETTINGS";
pub const DEFAULT_SETTINGS_PATH: &str = "settings.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("settings file unreadable: {0}")]
    Io(String),
    #[error("settings parse failed: {0}")]
    Parse(String),
    #[error("adminAuth.users[{index}].username must not be empty")]
    EmptyUsername { index: usize },
    #[error("adminAuth.users[{index}].username must not have leading or trailing whitespace")]
    PaddedUsername { index: usize },
    #[error("adminAuth.users: duplicate username '{0}'")]
    DuplicateUsername(String),
    #[error("adminAuth.users['{0}'].permissions must not be empty")]
    EmptyPermissions(String),
    #[error("adminAuth.users['{0}'].password is missing")]
    MissingHash(String),
    #[error("adminAuth.users['{0}'].password is a placeholder; generate a real hash with hash-pw")]
    PlaceholderHash(String),
    #[error("adminAuth.users['{username}'].password is not a bcrypt hash: {reason}")]
    MalformedHash {
        username: String,
        reason: HashShapeError,
    },
    #[error("adminAuth.users['{0}'] must set exactly one of password, passwordEnv or passwordSecret")]
    AmbiguousHashSource(String),
    #[error("adminAuth.users['{username}'].passwordEnv: environment variable {var} is not set")]
    MissingEnvVar { username: String, var: String },
    #[error("adminAuth.users['{username}'].passwordSecret: {reason}")]
    Secret { username: String, reason: String },
    #[error("vault error: {0}")]
    Vault(String),
    #[error("passwordSecret is used but no vault key source is configured")]
    MissingKeySource,
    #[error("adminAuth.sessionExpiryTime must be greater than zero")]
    InvalidSessionExpiry,
    #[error("adminAuth.default.permissions must not be empty")]
    EmptyDefaultPermissions,
}

/// Authentication strategy selected for the admin interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthType {
    #[default]
    Credentials,
}

/// A single admin account as the host expects it.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct UserRecord {
    pub username: String,
    #[serde(rename = "password")]
    pub password_hash: String,
    pub permissions: String,
}

impl fmt::Debug for UserRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserRecord")
            .field("username", &self.username)
            .field("password_hash", &"<redacted>")
            .field("permissions", &self.permissions)
            .finish()
    }
}

/// Permissions granted to visitors who have not logged in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnonymousAccess {
    pub permissions: String,
}

/// The validated `adminAuth` block. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminAuthConfig {
    #[serde(rename = "type")]
    pub auth_type: AuthType,
    pub users: Vec<UserRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_expiry_time: Option<u64>,
    #[serde(rename = "default", skip_serializing_if = "Option::is_none")]
    pub anonymous: Option<AnonymousAccess>,
}

impl AdminAuthConfig {
    /// Checks every invariant of the block. Usernames are checked before hashes
    /// so a broken account list is reported first.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_usernames(self.users.iter().map(|u| u.username.as_str()))?;

        for user in &self.users {
            let username = user.username.clone();
            let hash = user.password_hash.as_str();
            if hash.trim().is_empty() {
                return Err(ConfigError::MissingHash(username));
            }
            if is_placeholder(hash) {
                return Err(ConfigError::PlaceholderHash(username));
            }
            validate_bcrypt_hash(hash)
                .map_err(|reason| ConfigError::MalformedHash { username: username.clone(), reason })?;
            if user.permissions.trim().is_empty() {
                return Err(ConfigError::EmptyPermissions(username));
            }
        }

        if self.session_expiry_time == Some(0) {
            return Err(ConfigError::InvalidSessionExpiry);
        }
        if let Some(anonymous) = &self.anonymous {
            if anonymous.permissions.trim().is_empty() {
                return Err(ConfigError::EmptyDefaultPermissions);
            }
        }
        Ok(())
    }

    pub fn find_user(&self, username: &str) -> Option<&UserRecord> {
        self.users.iter().find(|u| u.username == username)
    }

    pub fn default_permissions(&self) -> Option<&str> {
        self.anonymous.as_ref().map(|a| a.permissions.as_str())
    }

    /// The settings object handed to the host: `{"adminAuth": {...}}`.
    pub fn to_host_json(&self) -> serde_json::Value {
        json!({ "adminAuth": self })
    }
}

fn check_usernames<'a>(names: impl Iterator<Item = &'a str>) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for (index, name) in names.enumerate() {
        if name.trim().is_empty() {
            return Err(ConfigError::EmptyUsername { index });
        }
        if name.trim() != name {
            return Err(ConfigError::PaddedUsername { index });
        }
        if !seen.insert(name) {
            return Err(ConfigError::DuplicateUsername(name.to_string()));
        }
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct VaultConfig {
    /// Base64-encoded 32 byte key stored in an environment variable.
    pub key_env: Option<String>,
    /// Path to a file that contains the base64-encoded key.
    pub key_path: Option<PathBuf>,
    /// Environment variable holding a passphrase for Argon2id derivation.
    pub passphrase_env: Option<String>,
    /// Base64-encoded salt used alongside the passphrase.
    pub salt_b64: Option<String>,
}

impl VaultConfig {
    fn build_vault(&self) -> Result<SecretVault, ConfigError> {
        if let Some(var) = &self.key_env {
            return SecretVault::from_env_var(var).map_err(|e| ConfigError::Vault(format!("{e}")));
        }
        if let Some(path) = &self.key_path {
            return SecretVault::from_key_file(path).map_err(|e| ConfigError::Vault(format!("{e}")));
        }
        if let (Some(pass_env), Some(salt_b64)) = (&self.passphrase_env, &self.salt_b64) {
            let passphrase = std::env::var(pass_env)
                .map_err(|e| ConfigError::Vault(format!("{pass_env}: {e}")))?;
            let salt = STANDARD_NO_PAD
                .decode(salt_b64.as_bytes())
                .map_err(|e| ConfigError::Vault(format!("salt_b64: {e}")))?;
            return SecretVault::derive_from_passphrase(&passphrase, &salt)
                .map_err(|e| ConfigError::Vault(format!("{e}")));
        }
        Err(ConfigError::MissingKeySource)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawUserRecord {
    username: String,
    #[serde(default, alias = "passwordHash")]
    password: Option<String>,
    #[serde(default)]
    password_env: Option<String>,
    #[serde(default)]
    password_secret: Option<EncryptedSecret>,
    permissions: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAdminAuth {
    #[serde(rename = "type", alias = "authType")]
    auth_type: AuthType,
    #[serde(default)]
    users: Vec<RawUserRecord>,
    #[serde(default)]
    session_expiry_time: Option<u64>,
    #[serde(default)]
    default: Option<AnonymousAccess>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSettings {
    admin_auth: RawAdminAuth,
    #[serde(default)]
    vault: Option<VaultConfig>,
}

impl RawUserRecord {
    fn resolve(self, vault: Option<&SecretVault>) -> Result<UserRecord, ConfigError> {
        let username = self.username;
        let sources = [
            self.password.is_some(),
            self.password_env.is_some(),
            self.password_secret.is_some(),
        ];
        match sources.iter().filter(|set| **set).count() {
            0 => return Err(ConfigError::MissingHash(username)),
            1 => {}
            _ => return Err(ConfigError::AmbiguousHashSource(username)),
        }

        let password_hash = if let Some(hash) = self.password {
            hash
        } else if let Some(var) = self.password_env {
            std::env::var(&var).map_err(|_| ConfigError::MissingEnvVar {
                username: username.clone(),
                var,
            })?
        } else if let Some(envelope) = self.password_secret {
            let vault = vault.ok_or(ConfigError::MissingKeySource)?;
            vault.decrypt_utf8(&envelope).map_err(|e| ConfigError::Secret {
                username: username.clone(),
                reason: format!("{e}"),
            })?
        } else {
            return Err(ConfigError::MissingHash(username));
        };

        Ok(UserRecord {
            username,
            password_hash,
            permissions: self.permissions,
        })
    }
}

/// Parses, resolves and validates a settings document held in memory.
pub fn parse_admin_auth(raw_json: &str) -> Result<AdminAuthConfig, ConfigError> {
    let raw: RawSettings =
        serde_json::from_str(raw_json).map_err(|e| ConfigError::Parse(format!("{e}")))?;
    let admin_auth = raw.admin_auth;

    check_usernames(admin_auth.users.iter().map(|u| u.username.as_str()))?;

    let vault = if admin_auth.users.iter().any(|u| u.password_secret.is_some()) {
        let vault_config = raw.vault.as_ref().ok_or(ConfigError::MissingKeySource)?;
        Some(vault_config.build_vault()?)
    } else {
        None
    };

    let users = admin_auth
        .users
        .into_iter()
        .map(|user| user.resolve(vault.as_ref()))
        .collect::<Result<Vec<_>, _>>()?;

    let config = AdminAuthConfig {
        auth_type: admin_auth.auth_type,
        users,
        session_expiry_time: admin_auth.session_expiry_time,
        anonymous: admin_auth.default,
    };
    config.validate()?;

    if config.users.is_empty() {
        warn!("adminAuth has no users; the host decides whether the editor is left open");
    }
    Ok(config)
}

/// A validated block together with the digest of the exact bytes it came from.
#[derive(Debug, Clone)]
pub struct LoadedSettings {
    pub config: AdminAuthConfig,
    pub sha256: String,
}

/// Reads the settings file once, fingerprints it and validates it.
pub fn load_settings(path: impl AsRef<Path>) -> Result<LoadedSettings, ConfigError> {
    let path = path.as_ref();
    let raw_json = fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("{}: {e}", path.display())))?;
    let sha256 = sha256_hex(raw_json.as_bytes());
    debug!(path = %path.display(), sha256 = %sha256, "read settings file");

    let config = parse_admin_auth(&raw_json)?;
    debug!(
        usernames = ?config.users.iter().map(|u| u.username.as_str()).collect::<Vec<_>>(),
        "resolved admin users"
    );
    info!(path = %path.display(), users = config.users.len(), "admin auth loaded");
    Ok(LoadedSettings { config, sha256 })
}

/// Loads the admin-auth block from a settings file.
pub fn load_admin_auth_from(path: impl AsRef<Path>) -> Result<AdminAuthConfig, ConfigError> {
    load_settings(path).map(|loaded| loaded.config)
}

/// Resolves the settings path from `FLOWGATE_SETTINGS`, falling back to
/// `settings.json` in the working directory.
pub fn settings_path() -> PathBuf {
    std::env::var(SETTINGS_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_SETTINGS_PATH))
}

/// Loads the admin-auth block from the process's configured settings file.
pub fn load_admin_auth() -> Result<AdminAuthConfig, ConfigError> {
    load_admin_auth_from(settings_path())
}
