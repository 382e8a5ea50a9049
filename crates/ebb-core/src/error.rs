//! Error types for the Ebb ledger.
//!
//! Fatal and advisory outcomes are kept apart: everything here is an error;
//! sentinel findings are plain data (see `ebb-sentinel`).
use thiserror::Error;

/// Malformed wallet or event input. The offending participant is excluded
/// from the tick; the tick itself continues.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("empty participant id")] EmptyParticipantId,
    #[error("participant id uses reserved prefix: {0}")] ReservedParticipantId(String),
    #[error("negative balance for {participant}: {balance}")] NegativeBalance { participant: String, balance: i64 },
    #[error("activity score out of range for {participant}: {score}")] ActivityScoreOutOfRange { participant: String, score: f64 },
    #[error("last active epoch {last_active} is after current epoch {current} for {participant}")] LastActiveInFuture { participant: String, last_active: u64, current: u64 },
    #[error("duplicate wallet record: {0}")] DuplicateRecord(String),
    #[error("balance overflow for {0}")] BalanceOverflow(String),
    #[error("unknown wallet: {0}")] UnknownWallet(String),
}

/// Reward or pool totals do not match `total_distributed`. Fatal to the tick.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConservationViolation {
    #[error("reward sum {got} differs from total {expected} beyond tolerance {tolerance}")] RewardSum { expected: u64, got: u64, tolerance: u64 },
    #[error("pool allocation sum {got} differs from total {expected}")] PoolSum { expected: u64, got: u64 },
    #[error("decay routing lost value: decayed {decayed}, routed {routed}")] DecayRouting { decayed: u64, routed: u64 },
    #[error("arithmetic overflow while distributing")] Overflow,
}

/// Hash or link mismatch in the ledger. Fatal: ledger writes halt until the
/// chain verifies again.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainIntegrityError {
    #[error("entry hash mismatch at epoch {0}")] HashMismatch(u64),
    #[error("prev hash link broken at epoch {0}")] LinkMismatch(u64),
    #[error("merkle root mismatch at epoch {0}")] MerkleRootMismatch(u64),
    #[error("entry missing at epoch {0}")] MissingEntry(u64),
    #[error("ledger halted after integrity failure at epoch {0}")] Halted(u64),
}

impl ChainIntegrityError {
    /// The epoch the failure was detected at.
    pub fn epoch(&self) -> u64 {
        match self {
            Self::HashMismatch(e)
            | Self::LinkMismatch(e)
            | Self::MerkleRootMismatch(e)
            | Self::MissingEntry(e)
            | Self::Halted(e) => *e,
        }
    }
}

/// Invalid policy. Rejected at load time; the previous policy stays active.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    #[error("pool percentages sum to {0} bps, expected 10000")] PoolSum(u64),
    #[error("need at least {required} pools, got {got}")] TooFewPools { required: usize, got: usize },
    #[error("duplicate pool name: {0}")] DuplicatePool(String),
    #[error("empty pool name")] EmptyPoolName,
    #[error("invalid decay bounds: min {min}, max {max}")] DecayBounds { min: u64, max: u64 },
    #[error("half-saturation constant must be positive")] ZeroHalfSaturation,
    #[error("redistribution ratio {ratio} outside [{min}, {max}]")] RedistributionOutOfBounds { ratio: u64, min: u64, max: u64 },
    #[error("invalid activity share table: {0}")] ActivityShare(String),
    #[error("invalid band configuration: {0}")] Bands(String),
    #[error("invalid classifier configuration: {0}")] Classifier(String),
    #[error("invalid sentinel configuration: {0}")] Sentinel(String),
    #[error("load: {0}")] Load(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecayError {
    #[error("arithmetic overflow")] ArithmeticOverflow,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClassifierError {
    #[error("unknown participant: {0}")] UnknownParticipant(String),
    #[error("invalid participant type index: {0}")] InvalidType(u8),
    #[error("empty event id")] EmptyEventId,
    #[error("event {event_id} is for epoch {epoch}, after current epoch {current}")] FutureEvent { event_id: String, epoch: u64, current: u64 },
    #[error("approver {approver} cannot elevate to type {target}")] UnauthorizedApprover { approver: String, target: u8 },
    #[error("participant {0} cannot approve its own elevation")] SelfApproval(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("epoch not found: {0}")] EpochNotFound(u64),
    #[error("out of order append: expected epoch {expected}, got {got}")] OutOfOrder { expected: u64, got: u64 },
    #[error("duplicate epoch: {0}")] DuplicateEpoch(u64),
    #[error("participant {participant} has no reward in epoch {epoch}")] ParticipantNotInEpoch { epoch: u64, participant: String },
    #[error("invalid range: {from}..={to}")] InvalidRange { from: u64, to: u64 },
    #[error(transparent)] Integrity(#[from] ChainIntegrityError),
    #[error(transparent)] Conservation(#[from] ConservationViolation),
    #[error("serialization: {0}")] Serialization(String),
    #[error("storage: {0}")] Storage(String),
}

/// Sentinel plumbing failures. Never fatal to a tick.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SentinelError {
    #[error("sentinel task stopped")] Stopped,
    #[error("alert storage: {0}")] Storage(String),
}

/// Why a tick did not commit.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TickError {
    #[error("a tick is already in progress")] Busy,
    #[error("no eligible wallets")] NoEligibleWallets,
    #[error(transparent)] Decay(#[from] DecayError),
    #[error(transparent)] Conservation(#[from] ConservationViolation),
    #[error(transparent)] Ledger(#[from] LedgerError),
    #[error("feed: {0}")] Feed(String),
    #[error("tick aborted: {0}")] Aborted(String),
}

#[derive(Error, Debug)]
pub enum EbbError {
    #[error(transparent)] Validation(#[from] ValidationError),
    #[error(transparent)] Conservation(#[from] ConservationViolation),
    #[error(transparent)] Integrity(#[from] ChainIntegrityError),
    #[error(transparent)] Policy(#[from] PolicyError),
    #[error(transparent)] Decay(#[from] DecayError),
    #[error(transparent)] Classifier(#[from] ClassifierError),
    #[error(transparent)] Ledger(#[from] LedgerError),
    #[error(transparent)] Tick(#[from] TickError),
    #[error(transparent)] Sentinel(#[from] SentinelError),
    #[error("storage: {0}")] Storage(String),
    #[error("io: {0}")] Io(String),
}
