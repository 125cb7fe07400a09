//! yvaultd: yvault daemon
//!
//! Usage:
//!   yvaultd [--config /etc/yvault/yvault.toml] [run]
//!   yvaultd add-user <id> [--name NAME] [--storage BYTES] [--send BYTES]
//!   yvaultd usage <id>
//!
//! `run` (the default) keeps the services alive: periodic sweeps of expired
//! sends, idle visitors, and queued backend deletions, plus the metrics
//! endpoint. The other commands operate on the state file and exit.

mod admin;
mod daemon;
mod metrics;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use tracing::info;
use yvault_core::config::VaultConfig;

#[derive(Parser, Debug)]
#[command(name = "yvaultd", version, about = "yvault daemon")]
struct Cli {
    /// Path to yvault.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "YVAULT_CONFIG",
        default_value = "/etc/yvault/yvault.toml"
    )]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides [server].log_level
    #[arg(long, env = "YVAULT_LOG")]
    log: Option<String>,

    /// Log format; overrides [server].log_format
    #[arg(long, env = "YVAULT_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the daemon (default)
    Run,
    /// Provision a user row with the configured default allowances
    AddUser {
        id: String,
        /// Public name shown to share recipients
        #[arg(long)]
        name: Option<String>,
        /// Storage allowance in bytes (-1 = unlimited)
        #[arg(long, allow_hyphen_values = true)]
        storage: Option<i64>,
        /// Send allowance in bytes (-1 = unlimited)
        #[arg(long, allow_hyphen_values = true)]
        send: Option<i64>,
    },
    /// Print a user's storage and send usage as JSON
    Usage { id: String },
}

#[derive(Clone, Copy, Debug, ValueEnum, PartialEq, Eq)]
enum LogFormat {
    Json,
    Text,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config, found) = load_config(&cli.config).await?;

    let level = cli.log.clone().unwrap_or_else(|| config.server.log_level.clone());
    let format = match cli.log_format {
        Some(format) => format,
        None => LogFormat::from_str(&config.server.log_format, true)
            .map_err(|e| anyhow::anyhow!("[server].log_format: {e}"))?,
    };
    init_logging(&level, format);

    if !found {
        tracing::warn!(
            "config file not found: {}  (using defaults)",
            cli.config.display()
        );
    }
    config.validate().context("validating configuration")?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            info!(
                version = env!("CARGO_PKG_VERSION"),
                config = %cli.config.display(),
                "yvaultd starting"
            );
            daemon::run(config).await
        }
        Command::AddUser {
            id,
            name,
            storage,
            send,
        } => admin::add_user(&config, &id, name, storage, send),
        Command::Usage { id } => admin::print_usage(&config, &id),
    }
}

/// Parse the config file; a missing file yields the defaults and `false`.
async fn load_config(path: &Path) -> Result<(VaultConfig, bool)> {
    if !path.exists() {
        return Ok((VaultConfig::default(), false));
    }
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading config {}", path.display()))?;
    let config =
        toml::from_str(&content).with_context(|| format!("parsing config {}", path.display()))?;
    Ok((config, true))
}

fn init_logging(level: &str, format: LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json())
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .init();
        }
    }
}
