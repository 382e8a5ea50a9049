//! Trait interfaces between Ebb crates.
//!
//! - [`DecayCalculator`] — decay math engine (ebb-decay implements)
//! - [`WalletFeed`] — external wallet snapshot source (ebb-node implements)
//! - [`EventFeed`] — external engagement event stream (ebb-node implements)

use crate::classifier::EngagementEvent;
use crate::error::{DecayError, EbbError};
use crate::types::{DecayBand, DecayOutcome, DecayRouting, Wallet, WalletRecord};

/// Pure computation of per-wallet decay.
///
/// All decay math uses integer arithmetic with fixed-point precision.
pub trait DecayCalculator: Send + Sync {
    /// Activity band of `wallet` at `epoch`.
    fn band(&self, wallet: &Wallet, epoch: u64) -> DecayBand;

    /// Base per-epoch rate for `inactive_epochs` of inactivity, in ppb.
    fn base_rate_ppb(&self, inactive_epochs: u64) -> Result<u64, DecayError>;

    /// Base rate scaled by the band multiplier and held within the policy bounds.
    fn effective_rate_ppb(&self, wallet: &Wallet, epoch: u64) -> Result<u64, DecayError>;

    /// Decay `wallet` over `dt` epochs ending at `epoch`.
    fn decay_wallet(&self, wallet: &Wallet, epoch: u64, dt: u64) -> Result<DecayOutcome, DecayError>;

    /// Split a tick's total decayed value between network and treasury.
    fn route(&self, decayed_total: u64) -> Result<DecayRouting, DecayError>;
}

/// Source of the per-tick wallet snapshot. Pulled once per tick before decay.
pub trait WalletFeed: Send + Sync {
    fn pull(&self, epoch: u64) -> Result<Vec<WalletRecord>, EbbError>;
}

/// Append-only engagement event stream. Delivery is at-least-once; the
/// classifier dedupes by event id.
pub trait EventFeed: Send + Sync {
    /// Events available up to and including `epoch`.
    fn drain(&self, epoch: u64) -> Result<Vec<EngagementEvent>, EbbError>;
}
