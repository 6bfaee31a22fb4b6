//! promvaultd — the promvault daemon.
//!
//! Single binary that assembles:
//! - State store (redb)
//! - Registry directory (one actor per registry name)
//! - HTTP API
//!
//! # Usage
//!
//! ```text
//! promvaultd serve --port 9464 --data-dir /var/lib/promvault
//! promvaultd serve --config /etc/promvault/promvault.toml
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use promvault_core::PromvaultConfig;
use promvault_registry::{RegistryConfig, RegistryDirectory};
use promvault_state::StateStore;
use tracing::info;

const DEFAULT_DATA_DIR: &str = "/var/lib/promvault";

#[derive(Parser)]
#[command(name = "promvaultd", about = "promvault daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve registries over HTTP.
    Serve {
        /// Port to listen on (overrides the config file).
        #[arg(long)]
        port: Option<u16>,

        /// Data directory for snapshots (overrides the config file).
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Path to promvault.toml.
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,promvaultd=debug,promvault=debug")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            port,
            data_dir,
            config,
        } => {
            let file_config = match config {
                Some(path) => {
                    let loaded = PromvaultConfig::from_file(&path)?;
                    info!(path = ?path, "configuration loaded");
                    loaded
                }
                None => PromvaultConfig::default(),
            };
            let port = port.unwrap_or_else(|| file_config.port());
            let data_dir = data_dir
                .or_else(|| file_config.data_dir().map(PathBuf::from))
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
            run_serve(port, data_dir, RegistryConfig::from_config(&file_config)?).await
        }
    }
}

async fn run_serve(port: u16, data_dir: PathBuf, config: RegistryConfig) -> anyhow::Result<()> {
    info!("promvault daemon starting");

    std::fs::create_dir_all(&data_dir)?;
    let db_path = data_dir.join("promvault.redb");
    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    info!(
        quiescence_window = ?config.quiescence_window,
        write_timeout = ?config.write_timeout,
        max_samples_per_series = ?config.max_samples_per_series,
        idle_timeout = ?config.idle_timeout,
        "registry directory initialized"
    );
    let directory = Arc::new(RegistryDirectory::new(Arc::new(store), config));

    let router = promvault_api::build_router(directory.clone());
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    let server = axum::serve(listener, router).with_graceful_shutdown(async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C handler");
        info!("shutdown signal received");
    });

    server.await?;

    // Write out anything still inside its quiescence window.
    directory.shutdown_all().await;

    info!("promvault daemon stopped");
    Ok(())
}
