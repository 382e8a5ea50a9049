//! Cross-crate test suite for Ebb.
//!
//! Integration tests drive the coordinator, ledger, decay engine and
//! sentinel together, and try to break ledger invariants under randomized
//! and adversarial inputs.

pub mod helpers;
