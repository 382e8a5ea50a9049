//! # ebb-decay — Inactivity decay engine.
//!
//! All calculations use integer arithmetic only for determinism.
//!
//! - **Saturating curve**: the base per-epoch rate rises from `lambda_min`
//!   toward `lambda_max` as inactivity grows, halfway at `k` epochs.
//! - **Activity bands**: the base rate is scaled by the wallet's band
//!   multiplier and held within `[lambda_min, lambda_max]`.
//! - **Continuous decay**: `balance * exp(-rate * dt)` with a fixed-point
//!   exponential; dust is swept to zero.
//! - **Routing**: decayed value is split between the network reserve and
//!   the treasury.

pub mod curve;
pub mod engine;
pub mod routing;

pub use curve::{exp_neg_ppb, saturating_rate_ppb};
pub use engine::DecayEngine;
pub use routing::split_decayed;
