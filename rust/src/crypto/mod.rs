//! Credential handling for the admin-auth block: bcrypt hash checks, the
//! vault for encrypted hashes, and settings file fingerprints.

pub mod integrity;
pub mod passwords;
pub mod secrets;
