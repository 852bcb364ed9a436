//! Admin-auth settings provider for flow-based automation hosts.
//! The host gets a fully validated `adminAuth` block or it does not start.

pub mod config;
pub mod crypto;
