//! cirrus: offline tooling for the Cirrus drive client
//!
//! Commands:
//!   register <identity>   - prompt for a password, print SRP salt + verifier
//!   unlock [--salt <b64>] - derive the password key and keep it in the secret store
//!   device                - print this machine's device identifier
//!   lock                  - forget the stored key
//!   recovery new          - generate a 24-word recovery phrase
//!   recovery check        - check a phrase against the stored key
//!   config show           - display the active configuration

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info};

use cirrus_core::config::CirrusConfig;
use cirrus_crypto::encoding::{b64_decode, b64_encode};
use cirrus_crypto::kdf::{derive_key, generate_salt, KdfParams, SALT_SIZE};
use cirrus_crypto::recovery::verify_recovery_phrase;
use cirrus_crypto::{generate_recovery_phrase, SrpClient, SrpGroup};
use cirrus_secrets::{device_identifier, open_store, DerivedKeyVault, DeviceFacts};

#[derive(Parser, Debug)]
#[command(name = "cirrus", version, about = "Cirrus encrypted drive tooling")]
struct Cli {
    /// Path to cirrus.toml
    #[arg(long, short = 'c', env = "CIRRUS_CONFIG", default_value = "cirrus.toml")]
    config: PathBuf,

    /// Log filter (overridden by RUST_LOG)
    #[arg(long, env = "CIRRUS_LOG")]
    log: Option<String>,

    /// Log output format
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create SRP registration credentials for an account
    Register {
        /// Account identity, usually an email address
        identity: String,
    },

    /// Derive the password key and store it in the secret store
    Unlock {
        /// Account salt, base64. A fresh salt is drawn and printed when omitted.
        #[arg(long)]
        salt: Option<String>,
    },

    /// Print the device identifier sent at login
    Device,

    /// Remove the stored password key
    Lock,

    /// Recovery phrase management
    Recovery {
        #[command(subcommand)]
        action: RecoveryAction,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum RecoveryAction {
    /// Generate a new phrase
    New {
        /// Keep the phrase-derived key in the secret store
        #[arg(long)]
        store: bool,
    },
    /// Check a phrase against the stored key
    Check,
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (defaults merged with the file)
    Show,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = CirrusConfig::load(&cli.config)?;

    let level = cli.log.clone().unwrap_or_else(|| config.client.log_level.clone());
    let format = cli.log_format.unwrap_or(match config.client.log_format.as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Text,
    });
    init_logging(&level, format);
    debug!(config = %cli.config.display(), "configuration loaded");

    match cli.command {
        Commands::Register { identity } => cmd_register(&identity),
        Commands::Unlock { salt } => cmd_unlock(&config, salt.as_deref()),
        Commands::Device => cmd_device(),
        Commands::Lock => cmd_lock(&config),
        Commands::Recovery {
            action: RecoveryAction::New { store },
        } => cmd_recovery_new(&config, store),
        Commands::Recovery {
            action: RecoveryAction::Check,
        } => cmd_recovery_check(&config),
        Commands::Config {
            action: ConfigAction::Show,
        } => cmd_config_show(&config, &cli.config),
    }
}

fn init_logging(level: &str, format: LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(fmt::layer().json().with_writer(std::io::stderr)).init(),
        LogFormat::Text => registry.with(fmt::layer().with_writer(std::io::stderr)).init(),
    }
}

fn prompt_new_password() -> Result<SecretString> {
    let first = SecretString::from(rpassword::prompt_password("Password: ").context("reading password")?);
    let second =
        SecretString::from(rpassword::prompt_password("Repeat password: ").context("reading password")?);
    if first.expose_secret() != second.expose_secret() {
        bail!("passwords do not match");
    }
    if first.expose_secret().is_empty() {
        bail!("password must not be empty");
    }
    Ok(first)
}

fn vault(config: &CirrusConfig) -> Result<DerivedKeyVault> {
    let store = open_store(&config.secrets)?;
    Ok(DerivedKeyVault::new(store))
}

fn kdf_params(config: &CirrusConfig) -> KdfParams {
    KdfParams {
        mem_cost_kib: config.kdf.argon2_mem_cost_kib,
        time_cost: config.kdf.argon2_time_cost,
        parallelism: config.kdf.argon2_parallelism,
    }
}

fn parse_salt(encoded: &str) -> Result<[u8; SALT_SIZE]> {
    let bytes = b64_decode(encoded).context("salt is not valid base64")?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| anyhow::anyhow!("salt must be {SALT_SIZE} bytes, got {}", bytes.len()))
}

// ── `cirrus register` ─────────────────────────────────────────────────────────

fn cmd_register(identity: &str) -> Result<()> {
    let password = prompt_new_password()?;
    let group = SrpGroup::rfc5054_2048()?;
    let mut client = SrpClient::new(group, identity)?;
    let registration = client.generate_registration_credentials(&password)?;

    info!(identity, "registration credentials generated");
    let out = serde_json::json!({
        "identity": identity,
        "salt": b64_encode(&registration.salt),
        "verifier": b64_encode(&registration.verifier),
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

// ── `cirrus unlock` / `cirrus lock` ──────────────────────────────────────────

fn cmd_unlock(config: &CirrusConfig, salt: Option<&str>) -> Result<()> {
    let salt = match salt {
        Some(encoded) => parse_salt(encoded)?,
        None => {
            let salt = generate_salt();
            println!("New salt (keep it with the account): {}", b64_encode(&salt));
            salt
        }
    };
    let password = SecretString::from(rpassword::prompt_password("Password: ").context("reading password")?);
    let key = derive_key(&password, &salt, &kdf_params(config))?;
    vault(config)?.persist(&key)?;
    println!("Key stored in {} backend ({}).", config.secrets.backend, config.secrets.service);
    Ok(())
}

fn cmd_lock(config: &CirrusConfig) -> Result<()> {
    vault(config)?.forget()?;
    println!("Stored key removed.");
    Ok(())
}

// ── `cirrus device` ───────────────────────────────────────────────────────────

fn cmd_device() -> Result<()> {
    let facts = DeviceFacts::collect(env!("CARGO_PKG_VERSION"));
    debug!(hostname = %facts.hostname, os = %facts.os, "collected device facts");
    let identifier = device_identifier(&facts);
    println!("{}", serde_json::to_string_pretty(&identifier)?);
    Ok(())
}

// ── `cirrus recovery` ─────────────────────────────────────────────────────────

fn cmd_recovery_new(config: &CirrusConfig, store: bool) -> Result<()> {
    let (phrase, key) = generate_recovery_phrase()?;

    println!("Write these words down and keep them offline:");
    println!();
    for (i, word) in phrase.split_whitespace().enumerate() {
        println!("  {:>2}. {word}", i + 1);
    }
    println!();

    if store {
        vault(config)?.persist(&key)?;
        println!("Recovery key stored in {} backend.", config.secrets.backend);
    }
    Ok(())
}

fn cmd_recovery_check(config: &CirrusConfig) -> Result<()> {
    let Some(stored) = vault(config)?.load()? else {
        bail!("no key stored in the {} backend", config.secrets.backend);
    };
    let phrase = rpassword::prompt_password("Recovery phrase: ").context("reading phrase")?;
    if !verify_recovery_phrase(&phrase, &stored) {
        bail!("recovery phrase does not match the stored key");
    }
    println!("Recovery phrase matches.");
    Ok(())
}

// ── `cirrus config show` ──────────────────────────────────────────────────────

fn cmd_config_show(config: &CirrusConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}
