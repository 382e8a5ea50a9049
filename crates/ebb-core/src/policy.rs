//! Validated policy parameters.
//!
//! A [`Policy`] is deserialized from configuration, checked once with
//! [`Policy::validate`], and then shared immutably. Replacing it means
//! validating a new one; a rejected policy never displaces the active one.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::error::PolicyError;

/// One named reward pool and its share of the epoch budget.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Pool {
    pub name: String,
    /// Share of the epoch budget in basis points.
    pub bps: u64,
}

/// Ordered pool table. Index `i < PARTICIPANT_TYPE_COUNT` is drawable by
/// participants of type `>= i`; the rest are reserve pools.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(transparent)]
pub struct PoolConfig {
    pub pools: Vec<Pool>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pools: DEFAULT_POOLS
                .iter()
                .map(|(name, bps)| Pool {
                    name: (*name).to_string(),
                    bps: *bps,
                })
                .collect(),
        }
    }
}

impl PoolConfig {
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.pools.len() < PARTICIPANT_TYPE_COUNT {
            return Err(PolicyError::TooFewPools {
                required: PARTICIPANT_TYPE_COUNT,
                got: self.pools.len(),
            });
        }

        let mut seen = HashSet::new();
        for pool in &self.pools {
            if pool.name.is_empty() {
                return Err(PolicyError::EmptyPoolName);
            }
            if !seen.insert(pool.name.as_str()) {
                return Err(PolicyError::DuplicatePool(pool.name.clone()));
            }
        }

        let total = self
            .pools
            .iter()
            .try_fold(0u64, |acc, p| acc.checked_add(p.bps))
            .unwrap_or(u64::MAX);
        if total != BPS_PRECISION {
            return Err(PolicyError::PoolSum(total));
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.pools.iter().position(|p| p.name == name)
    }

    /// Whether the pool at `index` is drawn by participants (as opposed to a reserve pool).
    pub fn is_participant_pool(index: usize) -> bool {
        index < PARTICIPANT_TYPE_COUNT
    }
}

/// Score thresholds and decay multipliers per [`DecayBand`](crate::types::DecayBand).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct BandPolicy {
    pub active_min_score_bps: u16,
    pub moderate_min_score_bps: u16,
    pub passive_min_score_bps: u16,
    pub active_multiplier_bps: u64,
    pub moderate_multiplier_bps: u64,
    pub passive_multiplier_bps: u64,
    pub dormant_multiplier_bps: u64,
}

impl Default for BandPolicy {
    fn default() -> Self {
        Self {
            active_min_score_bps: BAND_ACTIVE_MIN_SCORE_BPS,
            moderate_min_score_bps: BAND_MODERATE_MIN_SCORE_BPS,
            passive_min_score_bps: BAND_PASSIVE_MIN_SCORE_BPS,
            active_multiplier_bps: BAND_ACTIVE_MULTIPLIER_BPS,
            moderate_multiplier_bps: BAND_MODERATE_MULTIPLIER_BPS,
            passive_multiplier_bps: BAND_PASSIVE_MULTIPLIER_BPS,
            dormant_multiplier_bps: BAND_DORMANT_MULTIPLIER_BPS,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct DecayPolicy {
    pub lambda_min_ppb: u64,
    pub lambda_max_ppb: u64,
    pub half_saturation_epochs: u64,
    pub dust_threshold: u64,
    /// Inactive epochs after which a wallet is treated as dormant.
    pub dormant_recycle_epochs: u64,
    pub bands: BandPolicy,
}

impl Default for DecayPolicy {
    fn default() -> Self {
        Self {
            lambda_min_ppb: DECAY_LAMBDA_MIN_PPB,
            lambda_max_ppb: DECAY_LAMBDA_MAX_PPB,
            half_saturation_epochs: DECAY_HALF_SATURATION_EPOCHS,
            dust_threshold: DECAY_DUST_THRESHOLD,
            dormant_recycle_epochs: DORMANT_RECYCLE_EPOCHS,
            bands: BandPolicy::default(),
        }
    }
}

impl DecayPolicy {
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.lambda_min_ppb == 0
            || self.lambda_min_ppb > self.lambda_max_ppb
            || self.lambda_max_ppb >= RATE_PRECISION
        {
            return Err(PolicyError::DecayBounds {
                min: self.lambda_min_ppb,
                max: self.lambda_max_ppb,
            });
        }
        if self.half_saturation_epochs == 0 {
            return Err(PolicyError::ZeroHalfSaturation);
        }
        if self.dormant_recycle_epochs == 0 {
            return Err(PolicyError::Bands("dormant_recycle_epochs must be positive".into()));
        }

        let b = &self.bands;
        if b.active_min_score_bps as u64 > BPS_PRECISION
            || b.active_min_score_bps <= b.moderate_min_score_bps
            || b.moderate_min_score_bps <= b.passive_min_score_bps
        {
            return Err(PolicyError::Bands("score thresholds must strictly descend within 0..=10000".into()));
        }
        if b.active_multiplier_bps == 0
            || b.active_multiplier_bps > b.moderate_multiplier_bps
            || b.moderate_multiplier_bps > b.passive_multiplier_bps
            || b.passive_multiplier_bps > b.dormant_multiplier_bps
        {
            return Err(PolicyError::Bands("multipliers must be positive and non-decreasing toward dormant".into()));
        }
        Ok(())
    }
}

/// Split of decayed value between the network pool and the treasury.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct RedistributionPolicy {
    pub network_bps: u64,
    pub min_network_bps: u64,
    pub max_network_bps: u64,
    pub network_reserve: String,
    pub treasury_reserve: String,
}

impl Default for RedistributionPolicy {
    fn default() -> Self {
        Self {
            network_bps: REDISTRIBUTION_NETWORK_BPS,
            min_network_bps: REDISTRIBUTION_MIN_NETWORK_BPS,
            max_network_bps: REDISTRIBUTION_MAX_NETWORK_BPS,
            network_reserve: NETWORK_RESERVE.to_string(),
            treasury_reserve: TREASURY_RESERVE.to_string(),
        }
    }
}

impl RedistributionPolicy {
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.min_network_bps > self.max_network_bps
            || self.max_network_bps > BPS_PRECISION
            || !(self.min_network_bps..=self.max_network_bps).contains(&self.network_bps)
        {
            return Err(PolicyError::RedistributionOutOfBounds {
                ratio: self.network_bps,
                min: self.min_network_bps,
                max: self.max_network_bps,
            });
        }
        if self.network_reserve.is_empty()
            || self.treasury_reserve.is_empty()
            || self.network_reserve == self.treasury_reserve
        {
            return Err(PolicyError::Load("reserve names must be distinct and non-empty".into()));
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct ClassifierPolicy {
    pub window_epochs: u64,
    pub idle_step_epochs: u64,
    pub tier1_min_magnitude: u64,
    pub tier2_min_magnitude: u64,
    pub elevation_quorum: usize,
    pub dedup_horizon_epochs: u64,
}

impl Default for ClassifierPolicy {
    fn default() -> Self {
        Self {
            window_epochs: CLASSIFIER_WINDOW_EPOCHS,
            idle_step_epochs: CLASSIFIER_IDLE_STEP_EPOCHS,
            tier1_min_magnitude: CLASSIFIER_TIER1_MIN_MAGNITUDE,
            tier2_min_magnitude: CLASSIFIER_TIER2_MIN_MAGNITUDE,
            elevation_quorum: CLASSIFIER_ELEVATION_QUORUM,
            dedup_horizon_epochs: CLASSIFIER_DEDUP_HORIZON_EPOCHS,
        }
    }
}

impl ClassifierPolicy {
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.window_epochs == 0 || self.idle_step_epochs == 0 {
            return Err(PolicyError::Classifier("window and idle step must be positive".into()));
        }
        if self.tier1_min_magnitude == 0 || self.tier1_min_magnitude > self.tier2_min_magnitude {
            return Err(PolicyError::Classifier("tier thresholds must satisfy 0 < tier1 <= tier2".into()));
        }
        if self.elevation_quorum == 0 {
            return Err(PolicyError::Classifier("elevation quorum must be positive".into()));
        }
        if self.dedup_horizon_epochs < self.window_epochs {
            return Err(PolicyError::Classifier("dedup horizon shorter than window".into()));
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct DistributionPolicy {
    /// Claimed fraction of an accessible pool per activity tier, in bps.
    pub activity_share_bps: [u64; 3],
    pub rounding_tolerance: u64,
}

impl Default for DistributionPolicy {
    fn default() -> Self {
        Self {
            activity_share_bps: ACTIVITY_SHARE_BPS,
            rounding_tolerance: DEFAULT_ROUNDING_TOLERANCE,
        }
    }
}

impl DistributionPolicy {
    pub fn validate(&self) -> Result<(), PolicyError> {
        let shares = &self.activity_share_bps;
        if shares.iter().any(|s| *s == 0 || *s > BPS_PRECISION) {
            return Err(PolicyError::ActivityShare("each share must be in 1..=10000".into()));
        }
        if !shares.windows(2).all(|w| w[0] < w[1]) {
            return Err(PolicyError::ActivityShare("shares must strictly increase with tier".into()));
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct SentinelPolicy {
    pub gini_threshold_bps: u64,
    pub velocity_multiplier: u64,
    pub velocity_window_epochs: usize,
    pub sybil_min_group: usize,
    pub sybil_precision: u64,
    pub top_earners: usize,
}

impl Default for SentinelPolicy {
    fn default() -> Self {
        Self {
            gini_threshold_bps: SENTINEL_GINI_THRESHOLD_BPS,
            velocity_multiplier: SENTINEL_VELOCITY_MULTIPLIER,
            velocity_window_epochs: SENTINEL_VELOCITY_WINDOW_EPOCHS,
            sybil_min_group: SENTINEL_SYBIL_MIN_GROUP,
            sybil_precision: SENTINEL_SYBIL_PRECISION,
            top_earners: SENTINEL_TOP_EARNERS,
        }
    }
}

impl SentinelPolicy {
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.gini_threshold_bps > BPS_PRECISION {
            return Err(PolicyError::Sentinel("gini threshold above 10000 bps".into()));
        }
        if self.velocity_multiplier == 0 || self.velocity_window_epochs == 0 {
            return Err(PolicyError::Sentinel("velocity parameters must be positive".into()));
        }
        if self.sybil_min_group < 2 || self.sybil_precision == 0 {
            return Err(PolicyError::Sentinel("sybil group >= 2 and precision > 0 required".into()));
        }
        if self.top_earners == 0 {
            return Err(PolicyError::Sentinel("top_earners must be positive".into()));
        }
        Ok(())
    }
}

/// The full policy set.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Policy {
    pub pools: PoolConfig,
    pub decay: DecayPolicy,
    pub redistribution: RedistributionPolicy,
    pub classifier: ClassifierPolicy,
    pub distribution: DistributionPolicy,
    pub sentinel: SentinelPolicy,
}

impl Policy {
    /// Check every section. The first failing section's error is returned.
    pub fn validate(&self) -> Result<(), PolicyError> {
        self.pools.validate()?;
        self.decay.validate()?;
        self.redistribution.validate()?;
        self.classifier.validate()?;
        self.distribution.validate()?;
        self.sentinel.validate()?;
        Ok(())
    }

    /// Validate and return `self`, for builder-style loading.
    pub fn validated(self) -> Result<Self, PolicyError> {
        self.validate()?;
        Ok(self)
    }
}
