//! CLI parser and command dispatch.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::{load_settings, Settings};

#[derive(Parser)]
#[command(name = "kotoscan")]
#[command(about = "Scan images of Japanese text and annotate selected spans")]
#[command(version)]
pub struct Cli {
    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true, env = "KOTOSCAN_CONFIG")]
    config: Option<PathBuf>,

    /// Data directory (overrides config file)
    #[arg(long, global = true, env = "KOTOSCAN_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Start the API server
    Serve {
        /// Bind address: a port, a host, or host:port
        #[arg(short, long, default_value = "127.0.0.1:8080", env = "KOTOSCAN_BIND")]
        bind: String,
    },

    /// Run pending database migrations and exit
    Migrate,
}

/// Parse args and run the selected command.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(cli.config.as_deref(), cli.data_dir.clone())?;

    match cli.command {
        Commands::Serve { bind } => cmd_serve(&settings, &bind).await,
        Commands::Migrate => cmd_migrate(&settings).await,
    }
}

/// Run migrations, then start the server.
async fn cmd_serve(settings: &Settings, bind: &str) -> anyhow::Result<()> {
    let (host, port) = parse_bind_address(bind)?;

    cmd_migrate(settings).await?;

    let shutdown = CancellationToken::new();
    crate::server::serve(settings, &host, port, shutdown).await
}

/// Ensure directories exist and apply pending migrations.
async fn cmd_migrate(settings: &Settings) -> anyhow::Result<()> {
    settings.ensure_dirs()?;
    crate::repository::run_migrations(&settings.database_url())
        .await
        .map_err(|e| anyhow::anyhow!("database migration failed: {}", e))?;
    info!(database_url = %settings.database_url(), "database ready");
    Ok(())
}

/// Parse a bind address that can be:
/// - Just a port: "3030" -> 127.0.0.1:3030
/// - Just a host: "0.0.0.0" -> 0.0.0.0:8080
/// - Host and port: "0.0.0.0:3030" -> 0.0.0.0:3030
fn parse_bind_address(bind: &str) -> anyhow::Result<(String, u16)> {
    if let Ok(port) = bind.parse::<u16>() {
        return Ok(("127.0.0.1".to_string(), port));
    }

    if let Some((host, port_str)) = bind.rsplit_once(':') {
        if let Ok(port) = port_str.parse::<u16>() {
            return Ok((host.to_string(), port));
        }
    }

    Ok((bind.to_string(), 8080))
}
