//! Protocol constants. All monetary values in minor units (1 EBB = 10^8 minor units).
//!
//! Everything tunable here is only a *default*: the live values come from the
//! validated [`Policy`](crate::policy::Policy) loaded by the node.

pub const UNIT: u64 = 100_000_000;

/// Denominator for percentages and ratios expressed in basis points.
pub const BPS_PRECISION: u64 = 10_000;

/// Denominator for per-epoch decay rates (parts-per-billion).
pub const RATE_PRECISION: u64 = 1_000_000_000;

/// `e^-1` scaled by [`RATE_PRECISION`], rounded to nearest.
pub const E_INV_PPB: u64 = 367_879_441;

/// Number of participant types (0, 1, 2). Pool index `t` is drawable by every
/// participant of type `>= t`; pools at or beyond this index are reserve pools.
pub const PARTICIPANT_TYPE_COUNT: usize = 3;

/// Prefix of reserve account ids recorded in `participant_rewards`.
pub const RESERVE_PREFIX: &str = "pool:";

pub const DEFAULT_RPC_PORT: u16 = 18_640;
pub const DEFAULT_EPOCH_INTERVAL_SECS: u64 = 86_400;
pub const DEFAULT_EPOCH_BUDGET: u64 = 10_000 * UNIT;

// --- Pools ---

/// Default pool table: (name, bps). Sums to [`BPS_PRECISION`].
pub const DEFAULT_POOLS: [(&str, u64); 5] = [
    ("base", 6_000),
    ("partner", 1_600),
    ("founder", 400),
    ("network", 1_600),
    ("fund", 400),
];

// --- Decay ---

/// Floor of the saturating decay curve: 0.1% per epoch.
pub const DECAY_LAMBDA_MIN_PPB: u64 = 1_000_000;
/// Ceiling of the saturating decay curve: 2% per epoch.
pub const DECAY_LAMBDA_MAX_PPB: u64 = 20_000_000;
/// Inactive epochs at which the curve reaches halfway between min and max.
pub const DECAY_HALF_SATURATION_EPOCHS: u64 = 30;
/// Balances that would fall below this after decay are zeroed.
pub const DECAY_DUST_THRESHOLD: u64 = 1_000;

pub const BAND_ACTIVE_MULTIPLIER_BPS: u64 = 5_000;
pub const BAND_MODERATE_MULTIPLIER_BPS: u64 = 10_000;
pub const BAND_PASSIVE_MULTIPLIER_BPS: u64 = 20_000;
pub const BAND_DORMANT_MULTIPLIER_BPS: u64 = 25_000;

/// Activity score (bps) at or above which a wallet is in the active band.
pub const BAND_ACTIVE_MIN_SCORE_BPS: u16 = 7_500;
/// Activity score (bps) at or above which a wallet is in the moderate band.
pub const BAND_MODERATE_MIN_SCORE_BPS: u16 = 4_000;
/// Activity score (bps) at or above which a wallet is in the passive band.
pub const BAND_PASSIVE_MIN_SCORE_BPS: u16 = 1_000;

/// Inactive epochs after which a wallet is dormant regardless of its score.
pub const DORMANT_RECYCLE_EPOCHS: u64 = 30;

/// Share of decayed value routed to the network pool; the rest goes to treasury.
pub const REDISTRIBUTION_NETWORK_BPS: u64 = 8_000;
pub const REDISTRIBUTION_MIN_NETWORK_BPS: u64 = 5_000;
pub const REDISTRIBUTION_MAX_NETWORK_BPS: u64 = 9_500;

pub const NETWORK_RESERVE: &str = "network";
pub const TREASURY_RESERVE: &str = "treasury";

// --- Classifier ---

/// Rolling contribution window, in epochs.
pub const CLASSIFIER_WINDOW_EPOCHS: u64 = 30;
/// Consecutive idle epochs per one-level tier step-down.
pub const CLASSIFIER_IDLE_STEP_EPOCHS: u64 = 7;
/// Window magnitude needed for tier 1.
pub const CLASSIFIER_TIER1_MIN_MAGNITUDE: u64 = 10;
/// Window magnitude needed for tier 2.
pub const CLASSIFIER_TIER2_MIN_MAGNITUDE: u64 = 100;
/// Approvals required to elevate a participant's type.
pub const CLASSIFIER_ELEVATION_QUORUM: usize = 2;
/// Epochs an event id is remembered for deduplication.
pub const CLASSIFIER_DEDUP_HORIZON_EPOCHS: u64 = 90;

// --- Distribution ---

/// Fraction of each accessible pool claimed per activity tier, indexed by tier.
pub const ACTIVITY_SHARE_BPS: [u64; 3] = [400, 1_600, 8_000];

/// Allowed |sum(rewards) - total| in minor units. Apportionment is exact, so
/// the default admits no drift at all.
pub const DEFAULT_ROUNDING_TOLERANCE: u64 = 0;

// --- Sentinel ---

pub const SENTINEL_GINI_THRESHOLD_BPS: u64 = 8_000;
pub const SENTINEL_VELOCITY_MULTIPLIER: u64 = 10;
/// Epochs of reward history kept per participant for the velocity baseline.
pub const SENTINEL_VELOCITY_WINDOW_EPOCHS: usize = 30;
pub const SENTINEL_SYBIL_MIN_GROUP: usize = 5;
/// Rewards are bucketed to this many minor units (0.01 EBB) before grouping.
pub const SENTINEL_SYBIL_PRECISION: u64 = UNIT / 100;
pub const SENTINEL_TOP_EARNERS: usize = 5;
