//! Node configuration for the Ebb ledger daemon.
//!
//! [`NodeConfig`] carries the operational settings (paths, RPC binding,
//! epoch cadence). Economic parameters live in the [`Policy`], loaded by
//! [`load_policy`] from an optional TOML file layered under `EBB_`-prefixed
//! environment variables, and validated before it is accepted.

use std::path::{Path, PathBuf};
use std::time::Duration;

use ebb_core::constants::{DEFAULT_EPOCH_BUDGET, DEFAULT_EPOCH_INTERVAL_SECS, DEFAULT_RPC_PORT};
use ebb_core::error::PolicyError;
use ebb_core::policy::Policy;

/// Prefix of environment variables overriding policy fields. Nested fields
/// are separated by `__`, e.g. `EBB_DECAY__LAMBDA_MAX_PPB=15000000`.
pub const POLICY_ENV_PREFIX: &str = "EBB";

/// Configuration for a node instance.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Root directory for all persistent data.
    pub data_dir: PathBuf,
    /// IP address for the JSON-RPC server to bind to.
    pub rpc_bind: String,
    /// Port for the JSON-RPC server.
    pub rpc_port: u16,
    /// Log level filter string (e.g. "info", "debug", "ebb_node_lib=trace").
    pub log_level: String,
    /// Log output format: "text" or "json".
    pub log_format: String,
    /// Seconds between epoch ticks.
    pub epoch_interval_secs: u64,
    /// Reward budget per epoch, in minor units.
    pub epoch_budget: u64,
    /// Optional policy TOML file.
    pub policy_path: Option<PathBuf>,
    /// Wallet snapshot feed (JSON array). Defaults to `<data_dir>/wallets.json`.
    pub wallet_feed_path: Option<PathBuf>,
    /// Engagement event log (JSON lines). Defaults to `<data_dir>/events.jsonl`.
    pub event_feed_path: Option<PathBuf>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ebb");

        Self {
            data_dir,
            rpc_bind: "127.0.0.1".to_string(),
            rpc_port: DEFAULT_RPC_PORT,
            log_level: "info".to_string(),
            log_format: "text".to_string(),
            epoch_interval_secs: DEFAULT_EPOCH_INTERVAL_SECS,
            epoch_budget: DEFAULT_EPOCH_BUDGET,
            policy_path: None,
            wallet_feed_path: None,
            event_feed_path: None,
        }
    }
}

impl NodeConfig {
    /// Path to the RocksDB ledger directory.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("ledger")
    }

    /// Socket address string for the RPC server.
    pub fn rpc_addr(&self) -> String {
        format!("{}:{}", self.rpc_bind, self.rpc_port)
    }

    pub fn wallet_feed(&self) -> PathBuf {
        self.wallet_feed_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("wallets.json"))
    }

    pub fn event_feed(&self) -> PathBuf {
        self.event_feed_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("events.jsonl"))
    }

    pub fn epoch_interval(&self) -> Duration {
        Duration::from_secs(self.epoch_interval_secs.max(1))
    }
}

/// Load and validate the policy.
///
/// Sources, lowest precedence first: built-in defaults, the TOML file at
/// `path` (required when given), then `EBB_*` environment variables.
pub fn load_policy(path: Option<&Path>) -> Result<Policy, PolicyError> {
    let mut builder = config::Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(
            config::File::new(&path.to_string_lossy(), config::FileFormat::Toml).required(true),
        );
    }
    builder = builder.add_source(
        config::Environment::with_prefix(POLICY_ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    );

    let policy: Policy = builder
        .build()
        .and_then(|c| c.try_deserialize())
        .map_err(|e| PolicyError::Load(e.to_string()))?;
    policy.validated()
}
