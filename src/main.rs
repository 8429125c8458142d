// src/main.rs
//! Wallet engine process entry point.
//! Reads one JSON request per line from stdin and answers on stdout.
use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use wallet_engine::provider::HttpTransportFactory;
use wallet_engine::storage::SqliteStore;
use wallet_engine::{WalletApp, WalletConfig};

#[derive(Parser)]
#[command(name = "wallet-engine")]
#[command(about = "Wallet engine speaking JSON lines over stdio")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Args {
    /// TOML configuration file; built-in defaults when omitted
    #[arg(long, env = "CONFIG_PATH")]
    config: Option<PathBuf>,

    /// Overrides `storage.database_url`
    #[arg(long, env = "DATABASE_URL")]
    database: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // stdout carries responses, so logs go to stderr
    init_logging()?;

    info!("Starting wallet engine v{}", env!("CARGO_PKG_VERSION"));

    let mut config = match &args.config {
        Some(path) => WalletConfig::load(path)?,
        None => WalletConfig::default(),
    };
    if let Some(url) = args.database {
        config.storage.database_url = url;
    }

    let store = Arc::new(SqliteStore::new_with_url(&config.storage.database_url).await?);
    let factory = Arc::new(HttpTransportFactory::new(Duration::from_millis(config.rpc_timeout_ms)));
    let app = WalletApp::start(config, store, factory).await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                None
            }
        };
        let Some(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }

        let response = app.handle_json(&line).await;
        let mut out = serde_json::to_vec(&response)?;
        out.push(b'\n');
        if let Err(e) = stdout.write_all(&out).await {
            warn!("stdout closed: {}", e);
            break;
        }
        stdout.flush().await?;
    }

    app.teardown().await;
    Ok(())
}

fn init_logging() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn,hyper=info"));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}
