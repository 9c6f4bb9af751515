//! WolfGate - VPN Gateway Peer Provisioning
//!
//! Command line entry point: initializes the gateway, serves the HTTP API
//! and runs one-shot user administration.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wolfgate::api::HttpServer;
use wolfgate::config::WolfGateConfig;
use wolfgate::error::{Error, Result};
use wolfgate::gateway::{ConfigDocument, LoadOutcome};
use wolfgate::sync::{DeleteOutcome, SyncEngine};

/// WolfGate - VPN Gateway Peer Provisioning
#[derive(Parser)]
#[command(name = "wolfgate")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "wolfgate.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "wolfgate.toml")]
        output: PathBuf,

        /// Gateway WireGuard config path
        #[arg(long)]
        gateway_config: Option<PathBuf>,

        /// Public endpoint handed to clients (host:port)
        #[arg(long)]
        endpoint: Option<String>,
    },

    /// Start the HTTP API
    Start,

    /// Create a VPN user
    AddUser {
        username: String,

        /// Tunnel address for the user (CIDR)
        allowed_ips: String,

        /// Print the client's wg-quick file instead of JSON
        #[arg(long)]
        wg_quick: bool,
    },

    /// List VPN users
    ListUsers,

    /// Show a user's client config
    ShowUser {
        username: String,

        /// Print the client's wg-quick file instead of JSON
        #[arg(long)]
        wg_quick: bool,
    },

    /// Revoke a VPN user
    DeleteUser { username: String },

    /// Write the peer block of a user whose create did not finish
    RetryUser { username: String },

    /// Compare registry and gateway config, restoring missing peers
    Reconcile,

    /// Check configuration and gateway config files for errors
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Init {
        output,
        gateway_config,
        endpoint,
    } = cli.command
    {
        init_logging(cli.log_level.as_deref().unwrap_or("info"));
        return run_init(output, gateway_config, endpoint);
    }

    let config = match WolfGateConfig::from_file(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            init_logging(cli.log_level.as_deref().unwrap_or("info"));
            tracing::error!("Failed to load configuration from {:?}: {}", cli.config, e);
            tracing::error!("Run `wolfgate init` to create one");
            return Err(e);
        }
    };
    init_logging(cli.log_level.as_deref().unwrap_or(&config.logging.level));

    match cli.command {
        Commands::Init { .. } => Ok(()),
        Commands::Start => run_start(config).await,
        Commands::AddUser {
            username,
            allowed_ips,
            wg_quick,
        } => run_add_user(config, username, allowed_ips, wg_quick).await,
        Commands::ListUsers => run_list_users(config).await,
        Commands::ShowUser { username, wg_quick } => run_show_user(config, username, wg_quick).await,
        Commands::DeleteUser { username } => run_delete_user(config, username).await,
        Commands::RetryUser { username } => run_retry_user(config, username).await,
        Commands::Reconcile => run_reconcile(config).await,
        Commands::CheckConfig => run_check_config(config),
    }
}

/// Initialize logging
fn init_logging(level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Write a default configuration file
fn run_init(output: PathBuf, gateway_config: Option<PathBuf>, endpoint: Option<String>) -> Result<()> {
    if output.exists() {
        return Err(Error::Config(format!("{:?} already exists", output)));
    }

    let mut config = WolfGateConfig::default();
    if let Some(path) = gateway_config {
        config.gateway.config_path = path;
    }
    if let Some(endpoint) = endpoint {
        config.gateway.endpoint = endpoint;
    }
    config.validate()?;

    std::fs::write(&output, config.to_toml()?)?;
    tracing::info!("Configuration written to {:?}", output);
    println!("Configuration written to {}", output.display());
    Ok(())
}

/// Serve the HTTP API
async fn run_start(config: WolfGateConfig) -> Result<()> {
    tracing::info!("Starting WolfGate...");

    let engine = Arc::new(open_engine(&config)?);
    tracing::info!(
        "Gateway {} listening on UDP {} (public key {})",
        engine.gateway().address(),
        engine.gateway().listen_port(),
        engine.gateway().public_key()
    );

    // Never restores peer blocks on its own; a block missing for a live
    // user is left for `wolfgate reconcile`
    let report = engine.audit().await?;
    if !report.is_clean() {
        tracing::warn!(
            "Startup audit: {} interrupted delete(s) finished, {} user(s) without peer block, {} orphaned block(s)",
            report.revoked.len(),
            report.missing.len(),
            report.orphaned.len()
        );
    }
    if !report.missing.is_empty() {
        tracing::warn!("Run `wolfgate reconcile` to restore peer blocks for: {}", report.missing.join(", "));
    }

    HttpServer::new(config.api.clone(), engine).start().await
}

async fn run_add_user(config: WolfGateConfig, username: String, allowed_ips: String, wg_quick: bool) -> Result<()> {
    let engine = open_engine(&config)?;
    let created = match engine.create_user(&username, &allowed_ips).await {
        Ok(created) => created,
        Err(e) => {
            if e.is_retryable() {
                tracing::error!("Run `wolfgate retry-user {}` once the config file is writable", username);
            }
            return Err(e);
        }
    };

    if wg_quick {
        print!("{}", created.client.render());
    } else {
        print_json(&created)?;
    }
    Ok(())
}

async fn run_list_users(config: WolfGateConfig) -> Result<()> {
    let engine = open_engine(&config)?;
    let users = engine.list_users().await?;

    println!("{:<24} {:<20} {:<46} CREATED", "USERNAME", "ALLOWED IPS", "PUBLIC KEY");
    for user in &users {
        println!(
            "{:<24} {:<20} {:<46} {}{}",
            user.username,
            user.allowed_ips,
            user.public_key,
            user.created_at.format("%Y-%m-%d %H:%M:%S"),
            if user.revoking { "  (revoking)" } else { "" }
        );
    }
    println!("{} user(s)", users.len());
    Ok(())
}

async fn run_show_user(config: WolfGateConfig, username: String, wg_quick: bool) -> Result<()> {
    let engine = open_engine(&config)?;
    let client = engine
        .client_config(&username)
        .await?
        .ok_or(Error::NotFound(username))?;

    if wg_quick {
        print!("{}", client.render());
    } else {
        print_json(&client)?;
    }
    Ok(())
}

async fn run_delete_user(config: WolfGateConfig, username: String) -> Result<()> {
    let engine = open_engine(&config)?;
    match engine.delete_user(&username).await? {
        DeleteOutcome::Deleted => {
            println!("User '{}' deleted", username);
            Ok(())
        }
        DeleteOutcome::NotFound => Err(Error::NotFound(username)),
    }
}

async fn run_retry_user(config: WolfGateConfig, username: String) -> Result<()> {
    let engine = open_engine(&config)?;
    let created = engine.retry_config(&username).await?;
    if created.already_present() {
        println!("Peer block for '{}' already present", username);
    } else {
        println!("Peer block for '{}' restored", username);
    }
    Ok(())
}

async fn run_reconcile(config: WolfGateConfig) -> Result<()> {
    let engine = open_engine(&config)?;
    let report = engine.reconcile().await?;

    if report.is_clean() {
        println!("Registry and gateway config agree");
        return Ok(());
    }
    for name in &report.revoked {
        println!("revoked   {}", name);
    }
    for name in &report.restored {
        println!("restored  {}", name);
    }
    for name in &report.orphaned {
        println!("orphaned  {}", name);
    }
    Ok(())
}

fn run_check_config(config: WolfGateConfig) -> Result<()> {
    println!("Configuration OK");

    match ConfigDocument::load(&config.gateway.config_path)? {
        LoadOutcome::Loaded(doc) => {
            println!(
                "Gateway config {} OK: Address {}, ListenPort {}, {} peer(s)",
                config.gateway.config_path.display(),
                doc.interface().address(),
                doc.interface().listen_port(),
                doc.peers().len()
            );
        }
        LoadOutcome::CreateDefault => {
            println!(
                "Gateway config {} does not exist yet; it is created on first start",
                config.gateway.config_path.display()
            );
        }
    }
    Ok(())
}

fn open_engine(config: &WolfGateConfig) -> Result<SyncEngine> {
    SyncEngine::open(config).map_err(|e| {
        tracing::error!("Failed to open gateway: {}", e);
        e
    })
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| Error::Config(format!("Failed to serialize output: {}", e)))?;
    println!("{}", json);
    Ok(())
}
