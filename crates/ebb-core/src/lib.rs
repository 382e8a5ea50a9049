//! # ebb-core
//! Foundation types, ledger, classifier and distribution for Ebb.

pub mod classifier;
pub mod constants;
pub mod distribution;
pub mod error;
pub mod ledger;
pub mod merkle;
pub mod policy;
pub mod traits;
pub mod types;
pub mod wallet;
