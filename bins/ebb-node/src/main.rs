//! Ebb ledger daemon.
//!
//! Opens the RocksDB ledger, starts the sentinel and the JSON-RPC audit
//! server, then closes one epoch per interval until interrupted.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use ebb_core::constants::{DEFAULT_EPOCH_BUDGET, DEFAULT_EPOCH_INTERVAL_SECS, DEFAULT_RPC_PORT};
use ebb_node_lib::{start_rpc_server, Node, NodeConfig};
use tracing::info;

/// Ebb distribution ledger node.
#[derive(Parser, Debug)]
#[command(
    name = "ebb-node",
    version,
    about = "Ebb token distribution ledger with JSON-RPC audit server"
)]
struct Args {
    /// Data directory for the ledger and default feed files
    #[arg(long, default_value = None)]
    data_dir: Option<PathBuf>,

    /// RPC server bind address
    #[arg(long, default_value = "127.0.0.1")]
    rpc_bind: String,

    /// RPC server port
    #[arg(long, default_value_t = DEFAULT_RPC_PORT)]
    rpc_port: u16,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log output format ("text" or "json")
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Seconds between epoch ticks
    #[arg(long, default_value_t = DEFAULT_EPOCH_INTERVAL_SECS)]
    epoch_interval_secs: u64,

    /// Reward budget per epoch, in minor units
    #[arg(long, default_value_t = DEFAULT_EPOCH_BUDGET)]
    epoch_budget: u64,

    /// Policy TOML file; EBB_* environment variables override it
    #[arg(long)]
    policy: Option<PathBuf>,

    /// Wallet snapshot file (JSON array)
    #[arg(long)]
    wallet_feed: Option<PathBuf>,

    /// Engagement event log (JSON lines)
    #[arg(long)]
    event_feed: Option<PathBuf>,
}

impl Args {
    fn into_config(self) -> NodeConfig {
        NodeConfig {
            data_dir: self
                .data_dir
                .unwrap_or_else(|| NodeConfig::default().data_dir),
            rpc_bind: self.rpc_bind,
            rpc_port: self.rpc_port,
            log_level: self.log_level,
            log_format: self.log_format,
            epoch_interval_secs: self.epoch_interval_secs,
            epoch_budget: self.epoch_budget,
            policy_path: self.policy,
            wallet_feed_path: self.wallet_feed,
            event_feed_path: self.event_feed,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Args::parse().into_config();
    init_logging(&config.log_level, &config.log_format);

    info!("Ebb node v{}", env!("CARGO_PKG_VERSION"));
    info!("data_dir: {:?}", config.data_dir);
    info!("rpc_addr: {}", config.rpc_addr());
    info!("wallet_feed: {:?}", config.wallet_feed());
    info!("event_feed: {:?}", config.event_feed());
    info!(
        "epoch: every {}s, budget {}",
        config.epoch_interval().as_secs(),
        config.epoch_budget
    );

    let node = Node::open(config.clone())
        .await
        .context("failed to open node")?;

    let rpc_handle = start_rpc_server(&config.rpc_addr(), node.clone())
        .await
        .context("failed to start RPC server")?;
    info!("RPC server listening on {}", config.rpc_addr());
    info!("Ebb node running (Ctrl+C to stop)");

    tokio::select! {
        _ = node.run() => {
            info!("epoch loop exited");
        }
        res = tokio::signal::ctrl_c() => {
            res.context("failed to listen for Ctrl+C")?;
            info!("shutdown signal received");
        }
    }

    rpc_handle.stop().ok();
    info!("RPC server stopped");
    info!("Ebb node shutdown complete");
    Ok(())
}

/// Initialize tracing subscriber with the given log level and output format.
///
/// `format = "json"` selects structured JSON output; anything else is
/// human-readable text.
fn init_logging(level_str: &str, format: &str) {
    use tracing_subscriber::filter::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_str));

    if format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_level(true))
            .init();
    }
}
