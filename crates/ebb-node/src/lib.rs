//! Ebb node library: epoch coordination, RocksDB ledger storage, file feeds
//! and the JSON-RPC audit API.

pub mod config;
pub mod coordinator;
pub mod feed;
pub mod node;
pub mod rpc;
pub mod storage;

pub use config::{load_policy, NodeConfig};
pub use coordinator::{EpochCoordinator, TickReport, TickState};
pub use node::Node;
pub use rpc::start_rpc_server;
pub use storage::{RocksAlertLog, RocksLedgerStore};
