//! Coordinator binary

use clap::{Parser, Subcommand};
use minidfs::{Config, Coordinator};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "minidfs-coord")]
#[command(about = "minidfs coordinator: node health, replication and recovery")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start coordinator server
    Serve {
        /// Config file (TOML, extension optional)
        #[arg(long, default_value = "minidfs")]
        config: PathBuf,

        /// Bind address for HTTP
        #[arg(long)]
        bind: Option<SocketAddr>,

        /// Database directory (in-memory if omitted)
        #[arg(long)]
        db: Option<PathBuf>,

        /// Default replication factor for uploads
        #[arg(long)]
        replicas: Option<usize>,

        /// Seconds of silence before a node is declared lost
        #[arg(long)]
        heartbeat_timeout: Option<u64>,

        /// Stop retrying a recovery after this many failed attempts
        #[arg(long)]
        max_attempts: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            bind,
            db,
            replicas,
            heartbeat_timeout,
            max_attempts,
        } => {
            // Load config from file and environment, then apply CLI overrides
            let mut config = Config::load_from(&config)?;
            if let Some(bind) = bind {
                config.coordinator.bind_addr = bind;
            }
            if db.is_some() {
                config.coordinator.db_path = db;
            }
            if let Some(replicas) = replicas {
                config.coordinator.default_replication_factor = replicas;
            }
            if let Some(timeout) = heartbeat_timeout {
                config.health.heartbeat_timeout_secs = timeout;
            }
            if max_attempts.is_some() {
                config.recovery.max_attempts = max_attempts;
            }

            tracing_subscriber::registry()
                .with(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| config.log_level.clone().into()),
                )
                .with(tracing_subscriber::fmt::layer())
                .init();

            let coord = Coordinator::new(config)?;
            coord.serve().await?;
        }
    }

    Ok(())
}
