//! Operator CLI for the admin-auth settings. `check` is meant to run right
//! before the host starts so a broken or placeholder credential never ships.

use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use flowgate_settings::config::{
    load_admin_auth_from, load_settings, DEFAULT_SETTINGS_PATH, SETTINGS_ENV,
};
use flowgate_settings::crypto::passwords::{hash_password, verify_password, DEFAULT_COST};
use flowgate_settings::crypto::secrets::SecretVault;
use serde_json::json;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Admin-auth settings tooling for flow-based automation hosts.
#[derive(Debug, Parser)]
#[command(name = "flowgate", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Load and validate the settings file, printing a redacted summary.
    Check {
        #[arg(long, env = SETTINGS_ENV, default_value = DEFAULT_SETTINGS_PATH)]
        settings: PathBuf,
    },
    /// Print the validated `adminAuth` object in the shape the host consumes.
    Render {
        #[arg(long, env = SETTINGS_ENV, default_value = DEFAULT_SETTINGS_PATH)]
        settings: PathBuf,
    },
    /// Read a password from stdin and print its bcrypt hash.
    HashPw {
        #[arg(long, default_value_t = DEFAULT_COST, value_parser = clap::value_parser!(u32).range(4..=31))]
        cost: u32,
    },
    /// Read a password from stdin and check it against a configured user.
    Verify {
        #[arg(long)]
        username: String,
        #[arg(long, env = SETTINGS_ENV, default_value = DEFAULT_SETTINGS_PATH)]
        settings: PathBuf,
    },
    /// Read a value from stdin and print a vault envelope for `passwordSecret`.
    EncryptSecret {
        /// Environment variable holding the base64 vault key.
        #[arg(long)]
        key_env: String,
    },
}

fn read_stdin_line() -> Result<String, String> {
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .map_err(|e| format!("unable to read stdin: {e}"))?;
    let value = line.trim_end_matches(['\r', '\n']).to_string();
    if value.is_empty() {
        return Err("no input on stdin".to_string());
    }
    Ok(value)
}

fn check(settings: &Path) -> Result<String, String> {
    let loaded = load_settings(settings).map_err(|e| format!("{e}"))?;
    let config = &loaded.config;
    let users: Vec<_> = config
        .users
        .iter()
        .map(|u| json!({ "username": u.username, "permissions": u.permissions, "password": "<redacted>" }))
        .collect();
    let summary = json!({
        "settings": settings.display().to_string(),
        "sha256": loaded.sha256,
        "type": config.auth_type,
        "users": users,
        "sessionExpiryTime": config.session_expiry_time,
        "defaultPermissions": config.default_permissions(),
    });
    serde_json::to_string_pretty(&summary).map_err(|e| format!("{e}"))
}

fn render(settings: &Path) -> Result<String, String> {
    let config = load_admin_auth_from(settings).map_err(|e| format!("{e}"))?;
    serde_json::to_string_pretty(&config.to_host_json()).map_err(|e| format!("{e}"))
}

fn hash_pw(password: &str, cost: u32) -> Result<String, String> {
    hash_password(password, cost).map_err(|e| format!("hashing failed: {e}"))
}

/// The password is only requested once the settings file has loaded.
fn verify(
    settings: &Path,
    username: &str,
    password: impl FnOnce() -> Result<String, String>,
) -> Result<String, String> {
    let config = load_admin_auth_from(settings).map_err(|e| format!("{e}"))?;
    let user = config
        .find_user(username)
        .ok_or_else(|| format!("no user named '{username}' in adminAuth"))?;
    let matches = verify_password(&password()?, &user.password_hash);
    Ok(if matches { "match" } else { "no-match" }.to_string())
}

fn encrypt_secret(key_env: &str, value: &str) -> Result<String, String> {
    let vault = SecretVault::from_env_var(key_env).map_err(|e| format!("vault setup failed: {e}"))?;
    let envelope = vault
        .encrypt_secret(value.as_bytes())
        .map_err(|e| format!("encryption failed: {e}"))?;
    serde_json::to_string_pretty(&envelope).map_err(|e| format!("{e}"))
}

fn run(command: &Commands) -> Result<String, String> {
    match command {
        Commands::Check { settings } => check(settings),
        Commands::Render { settings } => render(settings),
        Commands::HashPw { cost } => hash_pw(&read_stdin_line()?, *cost),
        Commands::Verify { username, settings } => verify(settings, username, read_stdin_line),
        Commands::EncryptSecret { key_env } => encrypt_secret(key_env, &read_stdin_line()?),
    }
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr))
        .init();

    let cli = Cli::parse();
    match run(&cli.command) {
        Ok(output) => {
            println!("{output}");
            info!("done");
            ExitCode::SUCCESS
        }
        Err(message) => {
            error!("{message}");
            eprintln!("flowgate: {message}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{check, hash_pw, render, run, verify, Cli, Commands};
    use clap::Parser;
    use serde_json::json;
    use std::fs;
    use tempfile::NamedTempFile;

    const HASH: &str = "$2b$08$wuAqPiKJlVN27eF5qJp.RuQYuy6ZYONW7a/UWYxDTtwKFCdB8F19y";
    const PLACEHOLDER: &str = "$2b$08$REPLACE_WITH_REAL_BCRYPT_HASH";

    fn settings_file(hash: &str) -> NamedTempFile {
        let file = NamedTempFile::new().expect("temp file");
        let body = json!({
            "adminAuth": {
                "type": "credentials",
                "users": [{ "username": "admin", "password": hash, "permissions": "*" }]
            }
        });
        fs::write(file.path(), body.to_string()).unwrap();
        file
    }

    #[test]
    fn parses_hash_pw_cost() {
        let cli = Cli::try_parse_from(["flowgate", "hash-pw", "--cost", "10"]).unwrap();
        assert!(matches!(cli.command, Commands::HashPw { cost: 10 }));
        assert!(Cli::try_parse_from(["flowgate", "hash-pw", "--cost", "2"]).is_err());
    }

    #[test]
    fn verify_requires_username() {
        assert!(Cli::try_parse_from(["flowgate", "verify"]).is_err());
        let cli = Cli::try_parse_from([
            "flowgate", "verify", "--username", "admin", "--settings", "s.json",
        ])
        .unwrap();
        match cli.command {
            Commands::Verify { username, settings } => {
                assert_eq!(username, "admin");
                assert_eq!(settings.to_str(), Some("s.json"));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn check_fails_on_placeholder_without_echoing_it() {
        let file = settings_file(PLACEHOLDER);
        let command = Commands::Check { settings: file.path().to_path_buf() };

        let message = run(&command).unwrap_err();
        assert!(message.contains("adminAuth.users['admin'].password"));
        assert!(!message.contains(PLACEHOLDER));

        let message = render(file.path()).unwrap_err();
        assert!(message.contains("adminAuth.users['admin'].password"));
        assert!(!message.contains(PLACEHOLDER));
    }

    #[test]
    fn check_prints_redacted_summary_with_digest() {
        let file = settings_file(HASH);
        let output = check(file.path()).expect("valid settings should pass");
        let summary: serde_json::Value = serde_json::from_str(&output).unwrap();

        assert_eq!(summary["users"][0]["username"], "admin");
        assert_eq!(summary["users"][0]["password"], "<redacted>");
        assert_eq!(summary["sha256"].as_str().map(str::len), Some(64));
        assert!(!output.contains(HASH));
    }

    #[test]
    fn render_emits_host_object() {
        let file = settings_file(HASH);
        let output = render(file.path()).expect("valid settings should render");
        let host: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(host["adminAuth"]["type"], "credentials");
        assert_eq!(host["adminAuth"]["users"][0]["password"], HASH);
    }

    #[test]
    fn verify_checks_password_against_configured_user() {
        let hash = hash_pw("s3cret", 4).expect("hashing should succeed");
        let file = settings_file(&hash);

        assert_eq!(verify(file.path(), "admin", || Ok("s3cret".to_string())).unwrap(), "match");
        assert_eq!(verify(file.path(), "admin", || Ok("nope".to_string())).unwrap(), "no-match");
        let err = verify(file.path(), "ghost", || Ok("s3cret".to_string())).unwrap_err();
        assert!(err.contains("ghost"));
    }

    #[test]
    fn verify_fails_before_asking_for_a_password() {
        let file = settings_file(PLACEHOLDER);
        let err = verify(file.path(), "admin", || panic!("password must not be read")).unwrap_err();
        assert!(err.contains("placeholder"));
    }
}
