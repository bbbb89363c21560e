//! Edge-worker server binary.
//!
//! # Architecture Overview
//!
//! ```text
//!                     ┌───────────────────────────────────────────────┐
//!                     │                 EDGE SERVER                   │
//!                     │                                               │
//!   Client Request    │  ┌─────────┐   ┌──────────┐   ┌────────────┐ │
//!   ──────────────────┼─▶│  http   │──▶│ dispatch │──▶│  routing   │ │
//!                     │  │ server  │   │ pipeline │   │   table    │ │
//!                     │  └─────────┘   └────┬─────┘   └────────────┘ │
//!                     │                     │                        │
//!                     │                     ▼                        │
//!                     │              ┌────────────┐   ┌────────────┐ │
//!                     │              │   worker   │──▶│ JS isolate │ │
//!                     │              │  registry  │   │  (thread)  │ │
//!                     │              └────────────┘   └─────┬──────┘ │
//!                     │                                     │        │
//!   Client Response   │  ┌──────────────────────────────────┘        │
//!   ◀─────────────────┼──┘                                           │
//!                     │  ┌─────────────────────────────────────────┐ │
//!                     │  │          Cross-Cutting Concerns         │ │
//!                     │  │  ┌────────┐ ┌──────┐ ┌───────────────┐  │ │
//!                     │  │  │ config │ │  kv  │ │  supervisor   │  │ │
//!                     │  │  │        │ │store │ │ (fork pool)   │  │ │
//!                     │  │  └────────┘ └──────┘ └───────────────┘  │ │
//!                     │  └─────────────────────────────────────────┘ │
//!                     └───────────────────────────────────────────────┘
//! ```

use std::path::{Path, PathBuf};

use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use edgeserve::config::{load_config, ServerConfig};
use edgeserve::{supervisor, HttpServer, Shutdown};

const DEFAULT_CONFIG_FILE: &str = "edgeserve.toml";

#[derive(Parser, Debug)]
#[command(name = "edgeserve", about = "Service-worker style edge server", version)]
struct Cli {
    /// Path to the TOML config file. Defaults to ./edgeserve.toml, then the
    /// executable's directory; built-in defaults when neither exists.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Serve from this process even when max_servers asks for a pool.
    #[arg(long)]
    standalone: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "edgeserve=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = resolve_config(cli.config.as_deref())?;

    tracing::info!(
        bind_address = %config.bind_address(),
        worker_root = %config.workers.root,
        failure_mode = ?config.workers.failure_mode,
        "Configuration loaded"
    );

    edgeserve::kv::configure(&config.kv.dir);

    let servers = supervisor::effective_servers(&config.listener);
    if servers > 1 && !cli.standalone && !supervisor::is_child() {
        supervisor::run_pool(servers).await?;
        return Ok(());
    }

    let std_listener = supervisor::bind_shared(&config.bind_address())?;
    let listener = TcpListener::from_std(std_listener)?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    let server = HttpServer::new(config)?;
    server.run(listener, shutdown.subscribe()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Loads config from the explicit path, or the first default location that
/// exists. An explicit path that fails to load is fatal; absent defaults
/// fall back to the built-in configuration.
fn resolve_config(explicit: Option<&Path>) -> Result<ServerConfig, Box<dyn std::error::Error>> {
    if let Some(path) = explicit {
        return Ok(load_config(path)?);
    }
    for candidate in default_config_paths() {
        if candidate.exists() {
            return Ok(load_config(&candidate)?);
        }
    }
    tracing::info!("No config file found, using defaults");
    Ok(ServerConfig::default())
}

fn default_config_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(DEFAULT_CONFIG_FILE)];
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            paths.push(dir.join(DEFAULT_CONFIG_FILE));
        }
    }
    paths
}
