//! Decay engine implementing the [`DecayCalculator`] trait.
//!
//! Per wallet and epoch: the base rate comes from the saturating curve over
//! inactive epochs, is scaled by the wallet's band multiplier and clamped to
//! `[lambda_min, lambda_max]`; the balance then shrinks by `exp(-rate * dt)`.
//! Results under the dust threshold go to zero.

use ebb_core::constants::{BPS_PRECISION, RATE_PRECISION};
use ebb_core::error::DecayError;
use ebb_core::policy::{DecayPolicy, Policy, RedistributionPolicy};
use ebb_core::traits::DecayCalculator;
use ebb_core::types::{DecayBand, DecayOutcome, DecayRouting, Wallet};
use tracing::trace;

use crate::curve::{exp_neg_ppb, saturating_rate_ppb};
use crate::routing::split_decayed;

#[derive(Debug, Clone, Default)]
pub struct DecayEngine {
    decay: DecayPolicy,
    redistribution: RedistributionPolicy,
}

impl DecayEngine {
    pub fn new(decay: DecayPolicy, redistribution: RedistributionPolicy) -> Self {
        Self {
            decay,
            redistribution,
        }
    }

    pub fn from_policy(policy: &Policy) -> Self {
        Self::new(policy.decay.clone(), policy.redistribution.clone())
    }

    pub fn policy(&self) -> &DecayPolicy {
        &self.decay
    }

    fn multiplier_bps(&self, band: DecayBand) -> u64 {
        let bands = &self.decay.bands;
        match band {
            DecayBand::Active => bands.active_multiplier_bps,
            DecayBand::Moderate => bands.moderate_multiplier_bps,
            DecayBand::Passive => bands.passive_multiplier_bps,
            DecayBand::Dormant => bands.dormant_multiplier_bps,
        }
    }

    /// Decay every wallet in `wallets` for one step. Stops at the first error.
    pub fn decay_batch(&self, wallets: &[Wallet], epoch: u64, dt: u64) -> Result<Vec<DecayOutcome>, DecayError> {
        wallets
            .iter()
            .map(|w| self.decay_wallet(w, epoch, dt))
            .collect()
    }
}

impl DecayCalculator for DecayEngine {
    fn band(&self, wallet: &Wallet, epoch: u64) -> DecayBand {
        if !wallet.has_history() {
            return DecayBand::Moderate;
        }
        if wallet.inactive_epochs(epoch) >= self.decay.dormant_recycle_epochs {
            return DecayBand::Dormant;
        }

        let bands = &self.decay.bands;
        let score = wallet.activity_score_bps;
        if score >= bands.active_min_score_bps {
            DecayBand::Active
        } else if score >= bands.moderate_min_score_bps {
            DecayBand::Moderate
        } else if score >= bands.passive_min_score_bps {
            DecayBand::Passive
        } else {
            DecayBand::Dormant
        }
    }

    fn base_rate_ppb(&self, inactive_epochs: u64) -> Result<u64, DecayError> {
        saturating_rate_ppb(
            self.decay.lambda_min_ppb,
            self.decay.lambda_max_ppb,
            self.decay.half_saturation_epochs,
            inactive_epochs,
        )
    }

    fn effective_rate_ppb(&self, wallet: &Wallet, epoch: u64) -> Result<u64, DecayError> {
        let base = self.base_rate_ppb(wallet.inactive_epochs(epoch))?;
        let scaled = (base as u128)
            .checked_mul(self.multiplier_bps(self.band(wallet, epoch)) as u128)
            .ok_or(DecayError::ArithmeticOverflow)?
            / BPS_PRECISION as u128;
        let clamped = scaled.clamp(
            self.decay.lambda_min_ppb as u128,
            self.decay.lambda_max_ppb as u128,
        );
        Ok(clamped as u64)
    }

    fn decay_wallet(&self, wallet: &Wallet, epoch: u64, dt: u64) -> Result<DecayOutcome, DecayError> {
        let band = self.band(wallet, epoch);
        let rate_ppb = self.effective_rate_ppb(wallet, epoch)?;

        let new_balance = if dt == 0 || wallet.balance == 0 {
            wallet.balance
        } else {
            let exponent = rate_ppb.checked_mul(dt).unwrap_or(u64::MAX);
            let retention = exp_neg_ppb(exponent)?;
            let kept = (wallet.balance as u128)
                .checked_mul(retention as u128)
                .ok_or(DecayError::ArithmeticOverflow)?
                / RATE_PRECISION as u128;
            let kept = kept as u64;
            if kept < self.decay.dust_threshold { 0 } else { kept }
        };

        let decayed = wallet.balance - new_balance;
        trace!(
            epoch,
            participant = %wallet.participant_id,
            ?band,
            rate_ppb,
            decayed,
            "wallet decayed"
        );

        Ok(DecayOutcome {
            participant_id: wallet.participant_id.clone(),
            previous_balance: wallet.balance,
            new_balance,
            decayed,
            band,
            rate_ppb,
        })
    }

    fn route(&self, decayed_total: u64) -> Result<DecayRouting, DecayError> {
        split_decayed(decayed_total, self.redistribution.network_bps)
    }
}
