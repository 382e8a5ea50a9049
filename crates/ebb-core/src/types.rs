//! Core ledger types: hashes, participants, wallets, classifications.
//!
//! All monetary values are in minor units (1 EBB = 10^8 minor units).
//! Activity scores are basis points (`0..=10_000`).

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::{BPS_PRECISION, RESERVE_PREFIX};
use crate::error::ValidationError;

/// A 32-byte hash value.
///
/// Used for entry hashes (SHA-256) and reward Merkle roots (BLAKE3).
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// The zero hash (32 zero bytes). Also the genesis `prev_hash`.
    pub const ZERO: Self = Self([0u8; 32]);

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Parse a 64-character hex string.
    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        let arr: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Opaque participant identifier assigned by the external registration system.
///
/// Ids starting with [`RESERVE_PREFIX`] are reserved for pool reserve
/// accounts and never belong to a wallet.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord,
    bincode::Encode, bincode::Decode,
)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    /// Validate an externally supplied id.
    pub fn parse(raw: impl Into<String>) -> Result<Self, ValidationError> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(ValidationError::EmptyParticipantId);
        }
        if raw.starts_with(RESERVE_PREFIX) {
            return Err(ValidationError::ReservedParticipantId(raw));
        }
        Ok(Self(raw))
    }

    /// The reserve account for the named pool.
    pub fn reserve(pool: &str) -> Self {
        Self(format!("{RESERVE_PREFIX}{pool}"))
    }

    pub fn is_reserve(&self) -> bool {
        self.0.starts_with(RESERVE_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Participant type. Controls which pools a participant may draw from:
/// type `t` draws from every pool with index `<= t`.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
    bincode::Encode, bincode::Decode,
)]
pub enum ParticipantType {
    #[default]
    Base,
    Partner,
    Founder,
}

impl ParticipantType {
    pub const ALL: [Self; 3] = [Self::Base, Self::Partner, Self::Founder];

    pub fn index(self) -> usize {
        match self {
            Self::Base => 0,
            Self::Partner => 1,
            Self::Founder => 2,
        }
    }

    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(Self::Base),
            1 => Some(Self::Partner),
            2 => Some(Self::Founder),
            _ => None,
        }
    }

    /// Whether this type may draw from the pool at `pool_index`.
    pub fn can_draw(self, pool_index: usize) -> bool {
        pool_index <= self.index()
    }
}

/// Activity tier (0..=2). Controls the fraction of each accessible pool
/// a participant claims.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
    bincode::Encode, bincode::Decode,
)]
pub enum ActivityTier {
    #[default]
    Low,
    Mid,
    High,
}

impl ActivityTier {
    pub fn index(self) -> usize {
        match self {
            Self::Low => 0,
            Self::Mid => 1,
            Self::High => 2,
        }
    }

    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(Self::Low),
            1 => Some(Self::Mid),
            2 => Some(Self::High),
            _ => None,
        }
    }

    /// One level lower, saturating at [`ActivityTier::Low`].
    pub fn step_down(self) -> Self {
        match self {
            Self::High => Self::Mid,
            Self::Mid | Self::Low => Self::Low,
        }
    }
}

/// Decay band derived from a wallet's activity score. Selects the multiplier
/// applied to the base decay rate.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DecayBand {
    Active,
    Moderate,
    Passive,
    Dormant,
}

/// Result of decaying one wallet over one step.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct DecayOutcome {
    pub participant_id: ParticipantId,
    pub previous_balance: u64,
    pub new_balance: u64,
    /// `previous_balance - new_balance`, dust included.
    pub decayed: u64,
    pub band: DecayBand,
    /// Effective per-epoch rate applied, in ppb.
    pub rate_ppb: u64,
}

/// Where a tick's decayed value went.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DecayRouting {
    pub decayed_total: u64,
    pub network_credit: u64,
    pub treasury_credit: u64,
}

/// A participant wallet as held by the [`WalletStore`](crate::wallet::WalletStore).
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct Wallet {
    pub participant_id: ParticipantId,
    /// Balance in minor units. Unsigned: a wallet can never go negative.
    pub balance: u64,
    /// Activity score in basis points (`0..=10_000`).
    pub activity_score_bps: u16,
    /// Last epoch with qualifying activity; `None` for a wallet with no history.
    pub last_active_epoch: Option<u64>,
    /// Epoch the wallet was first seen.
    pub registered_epoch: u64,
    pub is_founding_member: bool,
}

impl Wallet {
    /// Epochs since the wallet was last active (or registered, if never active).
    pub fn inactive_epochs(&self, current_epoch: u64) -> u64 {
        current_epoch.saturating_sub(self.last_active_epoch.unwrap_or(self.registered_epoch))
    }

    pub fn has_history(&self) -> bool {
        self.last_active_epoch.is_some()
    }
}

/// A raw record from the external wallet snapshot feed.
///
/// Untrusted: converted to a [`Wallet`] only through [`WalletRecord::validate`].
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct WalletRecord {
    pub participant_id: String,
    pub balance: i64,
    pub activity_score: f64,
    #[serde(default)]
    pub last_active_epoch: Option<u64>,
    #[serde(default)]
    pub is_founding_member: bool,
}

/// Validated fields of a [`WalletRecord`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatedRecord {
    pub participant_id: ParticipantId,
    pub balance: u64,
    pub activity_score_bps: u16,
    pub last_active_epoch: Option<u64>,
    pub is_founding_member: bool,
}

impl WalletRecord {
    /// Check the record for the tick at `current_epoch`.
    ///
    /// Rejects negative balances, non-finite or out-of-range activity scores,
    /// reserved ids and last-active epochs in the future.
    pub fn validate(&self, current_epoch: u64) -> Result<ValidatedRecord, ValidationError> {
        let participant_id = ParticipantId::parse(self.participant_id.clone())?;

        if self.balance < 0 {
            return Err(ValidationError::NegativeBalance {
                participant: self.participant_id.clone(),
                balance: self.balance,
            });
        }

        if !self.activity_score.is_finite() || !(0.0..=1.0).contains(&self.activity_score) {
            return Err(ValidationError::ActivityScoreOutOfRange {
                participant: self.participant_id.clone(),
                score: self.activity_score,
            });
        }

        if let Some(last_active) = self.last_active_epoch {
            if last_active > current_epoch {
                return Err(ValidationError::LastActiveInFuture {
                    participant: self.participant_id.clone(),
                    last_active,
                    current: current_epoch,
                });
            }
        }

        // Scores arrive as floats from the feed; everything past this point is bps.
        let activity_score_bps = (self.activity_score * BPS_PRECISION as f64).round() as u16;

        Ok(ValidatedRecord {
            participant_id,
            balance: self.balance as u64,
            activity_score_bps,
            last_active_epoch: self.last_active_epoch,
            is_founding_member: self.is_founding_member,
        })
    }
}

/// Per-tick classification of a participant. Derived, never stored on its own.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct Classification {
    pub participant_id: ParticipantId,
    pub participant_type: ParticipantType,
    pub activity_tier: ActivityTier,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, balance: i64, score: f64) -> WalletRecord {
        WalletRecord {
            participant_id: id.to_string(),
            balance,
            activity_score: score,
            last_active_epoch: None,
            is_founding_member: false,
        }
    }

    #[test]
    fn hash_hex_roundtrip() {
        let h = Hash256([0xAB; 32]);
        assert_eq!(Hash256::from_hex(&h.to_hex()), Some(h));
        assert_eq!(h.to_string(), h.to_hex());
    }

    #[test]
    fn hash_from_hex_rejects_bad_length() {
        assert!(Hash256::from_hex("abcd").is_none());
        assert!(Hash256::from_hex("zz").is_none());
    }

    #[test]
    fn participant_id_rejects_empty_and_reserved() {
        assert_eq!(ParticipantId::parse(""), Err(ValidationError::EmptyParticipantId));
        assert!(matches!(
            ParticipantId::parse("pool:network"),
            Err(ValidationError::ReservedParticipantId(_))
        ));
        assert!(ParticipantId::parse("alice").is_ok());
    }

    #[test]
    fn reserve_ids_are_flagged() {
        let r = ParticipantId::reserve("network");
        assert!(r.is_reserve());
        assert_eq!(r.as_str(), "pool:network");
        assert!(!ParticipantId::parse("bob").unwrap().is_reserve());
    }

    #[test]
    fn cumulative_pool_access() {
        assert!(ParticipantType::Base.can_draw(0));
        assert!(!ParticipantType::Base.can_draw(1));
        assert!(ParticipantType::Partner.can_draw(1));
        assert!(!ParticipantType::Partner.can_draw(2));
        assert!(ParticipantType::Founder.can_draw(0));
        assert!(ParticipantType::Founder.can_draw(2));
        assert!(!ParticipantType::Founder.can_draw(3));
    }

    #[test]
    fn type_and_tier_index_roundtrip() {
        for t in ParticipantType::ALL {
            assert_eq!(ParticipantType::from_index(t.index() as u8), Some(t));
        }
        assert_eq!(ParticipantType::from_index(3), None);
        assert_eq!(ActivityTier::from_index(2), Some(ActivityTier::High));
        assert_eq!(ActivityTier::from_index(7), None);
    }

    #[test]
    fn tier_step_down_saturates() {
        assert_eq!(ActivityTier::High.step_down(), ActivityTier::Mid);
        assert_eq!(ActivityTier::Mid.step_down(), ActivityTier::Low);
        assert_eq!(ActivityTier::Low.step_down(), ActivityTier::Low);
    }

    #[test]
    fn validate_accepts_well_formed_record() {
        let v = record("alice", 500, 0.75).validate(10).unwrap();
        assert_eq!(v.balance, 500);
        assert_eq!(v.activity_score_bps, 7_500);
    }

    #[test]
    fn validate_rejects_negative_balance() {
        assert!(matches!(
            record("alice", -1, 0.5).validate(0),
            Err(ValidationError::NegativeBalance { balance: -1, .. })
        ));
    }

    #[test]
    fn validate_rejects_score_out_of_range() {
        for score in [-0.01, 1.01, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                record("alice", 1, score).validate(0),
                Err(ValidationError::ActivityScoreOutOfRange { .. })
            ));
        }
    }

    #[test]
    fn validate_rejects_future_activity() {
        let mut r = record("alice", 1, 0.5);
        r.last_active_epoch = Some(11);
        assert!(matches!(
            r.validate(10),
            Err(ValidationError::LastActiveInFuture { .. })
        ));
    }

    #[test]
    fn inactive_epochs_falls_back_to_registration() {
        let w = Wallet {
            participant_id: ParticipantId::parse("a").unwrap(),
            balance: 0,
            activity_score_bps: 0,
            last_active_epoch: None,
            registered_epoch: 4,
            is_founding_member: false,
        };
        assert_eq!(w.inactive_epochs(10), 6);
        assert_eq!(w.inactive_epochs(2), 0);
    }
}
