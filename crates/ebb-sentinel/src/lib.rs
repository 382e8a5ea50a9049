//! # ebb-sentinel — Statistical screening of committed epochs.
//!
//! Consumes committed [`EpochEntry`](ebb_core::ledger::EpochEntry) records
//! and flags reward concentration, velocity spikes and identical-reward
//! clustering. Findings are advisory [`SentinelAlert`]s, never errors.

pub mod alert;
pub mod checks;
pub mod sentinel;
pub mod service;

pub use alert::{AlertType, Evidence, SentinelAlert};
pub use sentinel::ParticipationSentinel;
pub use service::{spawn_sentinel, AlertStore, MemoryAlertLog, SentinelHandle};
