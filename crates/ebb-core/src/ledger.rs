//! Hash-chained epoch ledger.
//!
//! One immutable [`EpochEntry`] per epoch. `entry_hash` is
//! `SHA-256(bincode(fields) || prev_hash)`, the chain starts at epoch 0 with
//! `prev_hash = Hash256::ZERO`, and the BLAKE3 Merkle root over each epoch's
//! rewards is kept in a side index keyed by epoch number.
//!
//! [`EpochLedger::append`] is the single write path. A failed
//! [`EpochLedger::verify_chain`] halts it until a later verification of the
//! failing epoch succeeds.
//!
//! The wallet and classifier state reached by a tick can be written with its
//! entry ([`EpochLedger::append_with_state`]), so a restart resumes from the
//! last committed epoch.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{error, info};

use crate::classifier::ClassifierState;
use crate::distribution::check_conservation;
use crate::error::{ChainIntegrityError, LedgerError};
use crate::merkle::{RewardProof, RewardTree, rewards_root};
use crate::types::{Hash256, ParticipantId};
use crate::wallet::WalletStore;

/// An epoch's outcome before it is chained.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct EpochDraft {
    pub epoch_number: u64,
    /// Unix seconds.
    pub timestamp: u64,
    pub total_distributed: u64,
    pub pool_allocations: BTreeMap<String, u64>,
    pub participant_rewards: BTreeMap<ParticipantId, u64>,
}

/// A committed, immutable ledger record.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct EpochEntry {
    pub epoch_number: u64,
    pub timestamp: u64,
    pub total_distributed: u64,
    pub pool_allocations: BTreeMap<String, u64>,
    pub participant_rewards: BTreeMap<ParticipantId, u64>,
    pub entry_hash: Hash256,
    pub prev_hash: Hash256,
}

impl EpochEntry {
    /// Chain `draft` onto `prev_hash`.
    pub fn seal(draft: EpochDraft, prev_hash: Hash256) -> Result<Self, LedgerError> {
        let mut entry = Self {
            epoch_number: draft.epoch_number,
            timestamp: draft.timestamp,
            total_distributed: draft.total_distributed,
            pool_allocations: draft.pool_allocations,
            participant_rewards: draft.participant_rewards,
            entry_hash: Hash256::ZERO,
            prev_hash,
        };
        entry.entry_hash = entry.compute_hash()?;
        Ok(entry)
    }

    /// Recompute `entry_hash` from the other fields.
    pub fn compute_hash(&self) -> Result<Hash256, LedgerError> {
        let fields = (
            self.epoch_number,
            self.timestamp,
            self.total_distributed,
            &self.pool_allocations,
            &self.participant_rewards,
        );
        let encoded = bincode::encode_to_vec(fields, bincode::config::standard())
            .map_err(|e| LedgerError::Serialization(e.to_string()))?;

        let mut hasher = Sha256::new();
        hasher.update(&encoded);
        hasher.update(self.prev_hash.as_bytes());
        Ok(Hash256(hasher.finalize().into()))
    }

    pub fn merkle_root(&self) -> Hash256 {
        rewards_root(&self.participant_rewards)
    }

    pub fn reward_of(&self, participant: &ParticipantId) -> Option<u64> {
        self.participant_rewards.get(participant).copied()
    }

    /// Rewards paid to participants, reserve accounts excluded.
    pub fn participant_only(&self) -> impl Iterator<Item = (&ParticipantId, &u64)> {
        self.participant_rewards.iter().filter(|(id, _)| !id.is_reserve())
    }
}

/// Wallet and classifier state as of the committed epoch `epoch`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CommittedState {
    pub epoch: u64,
    pub wallets: WalletStore,
    pub classifier: ClassifierState,
}

/// Storage backend for the ledger: an append-only entry log keyed by epoch
/// plus the Merkle-root side index.
///
/// Implementations never overwrite an existing epoch. Not thread-safe on its
/// own; callers wrap the ledger in a lock.
pub trait LedgerStore: Send + Sync {
    /// Persist `entry`, its Merkle root and the encoded state reached with it,
    /// all or nothing. `None` clears any stored state. Fails on a duplicate
    /// epoch.
    fn append(
        &mut self,
        entry: &EpochEntry,
        merkle_root: Hash256,
        state: Option<&[u8]>,
    ) -> Result<(), LedgerError>;

    /// Encoded state written with the latest entry, if any.
    fn committed_state(&self) -> Result<Option<Vec<u8>>, LedgerError>;

    fn get_entry(&self, epoch: u64) -> Result<Option<EpochEntry>, LedgerError>;

    fn get_merkle_root(&self, epoch: u64) -> Result<Option<Hash256>, LedgerError>;

    /// Latest `(epoch, entry_hash)`, or `None` for an empty ledger.
    fn tip(&self) -> Result<Option<(u64, Hash256)>, LedgerError>;

    /// Epoch of the integrity failure that halted writes, if any.
    fn halted_at(&self) -> Result<Option<u64>, LedgerError>;

    fn set_halted(&mut self, epoch: Option<u64>) -> Result<(), LedgerError>;

    /// Number of committed entries.
    ///
    /// Default implementation: epochs are contiguous from 0, so `tip + 1`.
    fn entry_count(&self) -> Result<u64, LedgerError> {
        Ok(self.tip()?.map(|(epoch, _)| epoch + 1).unwrap_or(0))
    }
}

/// In-memory [`LedgerStore`] for tests and tooling.
#[derive(Debug, Default, Clone)]
pub struct MemoryLedgerStore {
    entries: BTreeMap<u64, EpochEntry>,
    roots: BTreeMap<u64, Hash256>,
    halted: Option<u64>,
    state: Option<Vec<u8>>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(any(test, feature = "testing"))]
impl MemoryLedgerStore {
    /// Mutate a stored entry in place, bypassing every check.
    pub fn tamper_entry(&mut self, epoch: u64, f: impl FnOnce(&mut EpochEntry)) -> bool {
        match self.entries.get_mut(&epoch) {
            Some(entry) => {
                f(entry);
                true
            }
            None => false,
        }
    }

    /// Overwrite a stored Merkle root.
    pub fn tamper_merkle_root(&mut self, epoch: u64, root: Hash256) {
        self.roots.insert(epoch, root);
    }

    pub fn remove_entry(&mut self, epoch: u64) {
        self.entries.remove(&epoch);
    }
}

impl LedgerStore for MemoryLedgerStore {
    fn append(
        &mut self,
        entry: &EpochEntry,
        merkle_root: Hash256,
        state: Option<&[u8]>,
    ) -> Result<(), LedgerError> {
        if self.entries.contains_key(&entry.epoch_number) {
            return Err(LedgerError::DuplicateEpoch(entry.epoch_number));
        }
        self.entries.insert(entry.epoch_number, entry.clone());
        self.roots.insert(entry.epoch_number, merkle_root);
        self.state = state.map(<[u8]>::to_vec);
        Ok(())
    }

    fn committed_state(&self) -> Result<Option<Vec<u8>>, LedgerError> {
        Ok(self.state.clone())
    }

    fn get_entry(&self, epoch: u64) -> Result<Option<EpochEntry>, LedgerError> {
        Ok(self.entries.get(&epoch).cloned())
    }

    fn get_merkle_root(&self, epoch: u64) -> Result<Option<Hash256>, LedgerError> {
        Ok(self.roots.get(&epoch).copied())
    }

    fn tip(&self) -> Result<Option<(u64, Hash256)>, LedgerError> {
        Ok(self
            .entries
            .last_key_value()
            .map(|(epoch, entry)| (*epoch, entry.entry_hash)))
    }

    fn halted_at(&self) -> Result<Option<u64>, LedgerError> {
        Ok(self.halted)
    }

    fn set_halted(&mut self, epoch: Option<u64>) -> Result<(), LedgerError> {
        self.halted = epoch;
        Ok(())
    }
}

pub struct EpochLedger<S: LedgerStore> {
    store: S,
    rounding_tolerance: u64,
}

impl<S: LedgerStore> EpochLedger<S> {
    pub fn new(store: S, rounding_tolerance: u64) -> Self {
        Self {
            store,
            rounding_tolerance,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    #[cfg(any(test, feature = "testing"))]
    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn set_rounding_tolerance(&mut self, tolerance: u64) {
        self.rounding_tolerance = tolerance;
    }

    /// The epoch number the next `append` must carry.
    pub fn next_epoch(&self) -> Result<u64, LedgerError> {
        Ok(self.store.tip()?.map(|(epoch, _)| epoch + 1).unwrap_or(0))
    }

    pub fn tip(&self) -> Result<Option<(u64, Hash256)>, LedgerError> {
        self.store.tip()
    }

    pub fn halted_at(&self) -> Result<Option<u64>, LedgerError> {
        self.store.halted_at()
    }

    /// Chain and persist a draft.
    ///
    /// # Errors
    ///
    /// Refuses while halted, on a non-contiguous epoch number and on any
    /// conservation violation. Nothing is written on error.
    pub fn append(&mut self, draft: EpochDraft) -> Result<EpochEntry, LedgerError> {
        self.commit(draft, None)
    }

    /// [`append`](Self::append), storing `wallets` and `classifier` as the
    /// state reached at the draft's epoch in the same write.
    pub fn append_with_state(
        &mut self,
        draft: EpochDraft,
        wallets: &WalletStore,
        classifier: &ClassifierState,
    ) -> Result<EpochEntry, LedgerError> {
        let state = bincode::encode_to_vec(
            (draft.epoch_number, wallets, classifier),
            bincode::config::standard(),
        )
        .map_err(|e| LedgerError::Serialization(e.to_string()))?;
        self.commit(draft, Some(&state))
    }

    /// State stored with the tip entry. `None` when the ledger is empty or
    /// the tip was appended without state.
    pub fn committed_state(&self) -> Result<Option<CommittedState>, LedgerError> {
        let Some(bytes) = self.store.committed_state()? else {
            return Ok(None);
        };
        let ((epoch, wallets, classifier), _): ((u64, WalletStore, ClassifierState), usize) =
            bincode::decode_from_slice(&bytes, bincode::config::standard())
                .map_err(|e| LedgerError::Serialization(e.to_string()))?;

        let tip = self.store.tip()?.map(|(tip, _)| tip);
        if tip != Some(epoch) {
            return Err(LedgerError::Storage(format!(
                "committed state is for epoch {epoch}, ledger tip is {tip:?}"
            )));
        }
        Ok(Some(CommittedState {
            epoch,
            wallets,
            classifier,
        }))
    }

    fn commit(&mut self, draft: EpochDraft, state: Option<&[u8]>) -> Result<EpochEntry, LedgerError> {
        if let Some(epoch) = self.store.halted_at()? {
            return Err(ChainIntegrityError::Halted(epoch).into());
        }

        let tip = self.store.tip()?;
        let expected = tip.map(|(epoch, _)| epoch + 1).unwrap_or(0);
        if draft.epoch_number < expected {
            return Err(LedgerError::DuplicateEpoch(draft.epoch_number));
        }
        if draft.epoch_number != expected {
            return Err(LedgerError::OutOfOrder {
                expected,
                got: draft.epoch_number,
            });
        }

        check_conservation(
            draft.total_distributed,
            &draft.pool_allocations,
            &draft.participant_rewards,
            self.rounding_tolerance,
        )?;

        let prev_hash = tip.map(|(_, hash)| hash).unwrap_or(Hash256::ZERO);
        let entry = EpochEntry::seal(draft, prev_hash)?;
        let root = entry.merkle_root();
        self.store.append(&entry, root, state)?;

        info!(
            epoch = entry.epoch_number,
            hash = %entry.entry_hash,
            merkle_root = %root,
            total = entry.total_distributed,
            rewards = entry.participant_rewards.len(),
            "epoch committed"
        );
        Ok(entry)
    }

    pub fn get(&self, epoch: u64) -> Result<EpochEntry, LedgerError> {
        self.store
            .get_entry(epoch)?
            .ok_or(LedgerError::EpochNotFound(epoch))
    }

    pub fn latest(&self) -> Result<Option<EpochEntry>, LedgerError> {
        match self.store.tip()? {
            Some((epoch, _)) => self.store.get_entry(epoch),
            None => Ok(None),
        }
    }

    pub fn merkle_root(&self, epoch: u64) -> Result<Hash256, LedgerError> {
        self.store
            .get_merkle_root(epoch)?
            .ok_or(LedgerError::EpochNotFound(epoch))
    }

    /// Inclusion proof for `participant`'s reward in `epoch`.
    pub fn merkle_proof(&self, epoch: u64, participant: &ParticipantId) -> Result<RewardProof, LedgerError> {
        let entry = self.get(epoch)?;
        RewardTree::from_rewards(&entry.participant_rewards)
            .proof(participant)
            .ok_or_else(|| LedgerError::ParticipantNotInEpoch {
                epoch,
                participant: participant.to_string(),
            })
    }

    /// Recheck every entry in `from..=to`: its own hash, its link to the
    /// previous entry, and its Merkle root against the side index.
    ///
    /// The first failure halts appends and is returned with its epoch. A
    /// clean pass over the halted epoch lifts the halt. A range reaching past
    /// the tip is refused with [`LedgerError::EpochNotFound`] and never halts.
    pub fn verify_chain(&mut self, from: u64, to: u64) -> Result<(), LedgerError> {
        if from > to {
            return Err(LedgerError::InvalidRange { from, to });
        }
        let Some((tip, _)) = self.store.tip()? else {
            return Err(LedgerError::EpochNotFound(from));
        };
        if to > tip {
            return Err(LedgerError::EpochNotFound(tip + 1));
        }

        match self.check_range(from, to)? {
            Ok(()) => {
                if let Some(halted) = self.store.halted_at()? {
                    // A halt recorded past the tip has no entry to re-verify;
                    // a clean pass up to the tip clears it.
                    if (from..=to).contains(&halted) || (halted > tip && to == tip) {
                        info!(epoch = halted, "chain verified, ledger writes resumed");
                        self.store.set_halted(None)?;
                    }
                }
                Ok(())
            }
            Err(failure) => {
                let epoch = failure.epoch();
                error!(epoch, error = %failure, "chain integrity failure, halting ledger writes");
                let halted = match self.store.halted_at()? {
                    Some(existing) => existing.min(epoch),
                    None => epoch,
                };
                self.store.set_halted(Some(halted))?;
                Err(failure.into())
            }
        }
    }

    /// Verify the whole chain. An empty ledger is valid.
    pub fn verify_all(&mut self) -> Result<(), LedgerError> {
        match self.store.tip()? {
            Some((tip, _)) => self.verify_chain(0, tip),
            None => Ok(()),
        }
    }

    pub fn is_chain_valid(&mut self) -> bool {
        self.verify_all().is_ok()
    }

    /// Outer error: storage failure. Inner error: integrity failure.
    fn check_range(&self, from: u64, to: u64) -> Result<Result<(), ChainIntegrityError>, LedgerError> {
        let mut prev_hash = if from == 0 {
            Hash256::ZERO
        } else {
            match self.store.get_entry(from - 1)? {
                Some(prev) => prev.entry_hash,
                None => return Ok(Err(ChainIntegrityError::MissingEntry(from - 1))),
            }
        };

        for epoch in from..=to {
            let Some(entry) = self.store.get_entry(epoch)? else {
                return Ok(Err(ChainIntegrityError::MissingEntry(epoch)));
            };
            if entry.epoch_number != epoch || entry.compute_hash()? != entry.entry_hash {
                return Ok(Err(ChainIntegrityError::HashMismatch(epoch)));
            }
            if entry.prev_hash != prev_hash {
                return Ok(Err(ChainIntegrityError::LinkMismatch(epoch)));
            }
            match self.store.get_merkle_root(epoch)? {
                Some(root) if root == entry.merkle_root() => {}
                Some(_) => return Ok(Err(ChainIntegrityError::MerkleRootMismatch(epoch))),
                None => return Ok(Err(ChainIntegrityError::MissingEntry(epoch))),
            }
            prev_hash = entry.entry_hash;
        }
        Ok(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConservationViolation;

    fn pid(s: &str) -> ParticipantId {
        ParticipantId::parse(s).unwrap()
    }

    fn draft(epoch: u64, rewards: &[(&str, u64)]) -> EpochDraft {
        let participant_rewards: BTreeMap<ParticipantId, u64> =
            rewards.iter().map(|(id, amt)| (pid(id), *amt)).collect();
        let total: u64 = participant_rewards.values().sum();
        EpochDraft {
            epoch_number: epoch,
            timestamp: 1_700_000_000 + epoch * 86_400,
            total_distributed: total,
            pool_allocations: [("base".to_string(), total)].into_iter().collect(),
            participant_rewards,
        }
    }

    fn ledger_with(n: u64) -> EpochLedger<MemoryLedgerStore> {
        let mut ledger = EpochLedger::new(MemoryLedgerStore::new(), 0);
        for epoch in 0..n {
            ledger
                .append(draft(epoch, &[("alice", 100 + epoch), ("bob", 50), ("carol", 7)]))
                .unwrap();
        }
        ledger
    }

    #[test]
    fn genesis_links_to_zero() {
        let ledger = ledger_with(1);
        let e0 = ledger.get(0).unwrap();
        assert_eq!(e0.prev_hash, Hash256::ZERO);
        assert_eq!(e0.compute_hash().unwrap(), e0.entry_hash);
    }

    #[test]
    fn entries_link_to_predecessor() {
        let ledger = ledger_with(5);
        for n in 1..5 {
            assert_eq!(
                ledger.get(n).unwrap().prev_hash,
                ledger.get(n - 1).unwrap().entry_hash
            );
        }
        assert_eq!(ledger.next_epoch().unwrap(), 5);
        assert_eq!(ledger.store().entry_count().unwrap(), 5);
    }

    #[test]
    fn hash_is_deterministic() {
        let a = EpochEntry::seal(draft(0, &[("a", 1), ("b", 2)]), Hash256::ZERO).unwrap();
        let b = EpochEntry::seal(draft(0, &[("b", 2), ("a", 1)]), Hash256::ZERO).unwrap();
        assert_eq!(a.entry_hash, b.entry_hash);
        let c = EpochEntry::seal(draft(0, &[("a", 1), ("b", 2)]), Hash256([1; 32])).unwrap();
        assert_ne!(a.entry_hash, c.entry_hash);
    }

    #[test]
    fn out_of_order_and_duplicate_appends_rejected() {
        let mut ledger = ledger_with(2);
        assert_eq!(
            ledger.append(draft(5, &[("a", 1)])),
            Err(LedgerError::OutOfOrder { expected: 2, got: 5 })
        );
        assert_eq!(
            ledger.append(draft(1, &[("a", 1)])),
            Err(LedgerError::DuplicateEpoch(1))
        );
    }

    #[test]
    fn append_rejects_conservation_violation() {
        let mut ledger = ledger_with(0);
        let mut d = draft(0, &[("a", 10)]);
        d.total_distributed = 11;
        d.pool_allocations.insert("base".into(), 11);
        assert!(matches!(
            ledger.append(d),
            Err(LedgerError::Conservation(ConservationViolation::RewardSum { .. }))
        ));
        assert_eq!(ledger.next_epoch().unwrap(), 0);
    }

    #[test]
    fn untouched_chain_verifies() {
        let mut ledger = ledger_with(6);
        assert!(ledger.verify_chain(0, 5).is_ok());
        assert!(ledger.verify_chain(2, 4).is_ok());
        assert!(ledger.is_chain_valid());
        assert!(EpochLedger::new(MemoryLedgerStore::new(), 0).is_chain_valid());
    }

    #[test]
    fn invalid_range_rejected() {
        let mut ledger = ledger_with(3);
        assert_eq!(
            ledger.verify_chain(2, 1),
            Err(LedgerError::InvalidRange { from: 2, to: 1 })
        );
    }

    #[test]
    fn tampered_reward_without_rehash_fails_at_epoch() {
        let mut ledger = ledger_with(6);
        ledger.store_mut().tamper_entry(3, |e| {
            *e.participant_rewards.get_mut(&pid("bob")).unwrap() += 1;
        });
        assert_eq!(
            ledger.verify_chain(0, 5),
            Err(LedgerError::Integrity(ChainIntegrityError::HashMismatch(3)))
        );
    }

    #[test]
    fn tampered_and_rehashed_entry_fails_at_exact_epoch() {
        let mut ledger = ledger_with(6);
        ledger.store_mut().tamper_entry(3, |e| {
            *e.participant_rewards.get_mut(&pid("bob")).unwrap() += 1;
            *e.participant_rewards.get_mut(&pid("alice")).unwrap() -= 1;
            e.entry_hash = e.compute_hash().unwrap();
        });
        assert_eq!(
            ledger.verify_chain(0, 5),
            Err(LedgerError::Integrity(ChainIntegrityError::MerkleRootMismatch(3)))
        );
        assert!(!ledger.is_chain_valid());
    }

    #[test]
    fn rewritten_side_index_still_breaks_link() {
        let mut ledger = ledger_with(6);
        let mut forged_root = Hash256::ZERO;
        ledger.store_mut().tamper_entry(3, |e| {
            *e.participant_rewards.get_mut(&pid("bob")).unwrap() += 1;
            e.entry_hash = e.compute_hash().unwrap();
            forged_root = e.merkle_root();
        });
        ledger.store_mut().tamper_merkle_root(3, forged_root);
        assert_eq!(
            ledger.verify_chain(0, 5),
            Err(LedgerError::Integrity(ChainIntegrityError::LinkMismatch(4)))
        );
    }

    #[test]
    fn integrity_failure_halts_appends_until_reverified() {
        let mut ledger = ledger_with(3);
        let original = ledger.get(1).unwrap();
        ledger.store_mut().tamper_entry(1, |e| e.timestamp += 1);
        assert!(ledger.verify_all().is_err());
        assert_eq!(ledger.halted_at().unwrap(), Some(1));
        assert_eq!(
            ledger.append(draft(3, &[("a", 1)])),
            Err(LedgerError::Integrity(ChainIntegrityError::Halted(1)))
        );

        // Restore the entry; a clean pass over epoch 1 lifts the halt.
        ledger.store_mut().tamper_entry(1, |e| *e = original.clone());
        ledger.verify_all().unwrap();
        assert_eq!(ledger.halted_at().unwrap(), None);
        assert!(ledger.append(draft(3, &[("a", 1)])).is_ok());
    }

    #[test]
    fn range_past_tip_is_refused_without_halting() {
        let mut ledger = ledger_with(3);
        assert_eq!(ledger.verify_chain(0, 5), Err(LedgerError::EpochNotFound(3)));
        assert_eq!(ledger.verify_chain(3, 3), Err(LedgerError::EpochNotFound(3)));
        assert_eq!(ledger.halted_at().unwrap(), None);
        assert!(ledger.append(draft(3, &[("a", 1)])).is_ok());

        let mut empty = EpochLedger::new(MemoryLedgerStore::new(), 0);
        assert_eq!(empty.verify_chain(0, 0), Err(LedgerError::EpochNotFound(0)));
        assert_eq!(empty.halted_at().unwrap(), None);
    }

    #[test]
    fn halt_recorded_past_tip_clears_on_full_pass() {
        let mut ledger = ledger_with(3);
        ledger.store_mut().set_halted(Some(3)).unwrap();
        assert!(ledger.append(draft(3, &[("a", 1)])).is_err());
        ledger.verify_all().unwrap();
        assert_eq!(ledger.halted_at().unwrap(), None);
        assert!(ledger.append(draft(3, &[("a", 1)])).is_ok());
    }

    #[test]
    fn clean_pass_elsewhere_keeps_halt() {
        let mut ledger = ledger_with(4);
        ledger.store_mut().tamper_entry(3, |e| e.timestamp += 1);
        assert!(ledger.verify_all().is_err());
        assert!(ledger.verify_chain(0, 2).is_ok());
        assert_eq!(ledger.halted_at().unwrap(), Some(3));
    }

    #[test]
    fn missing_entry_reported() {
        let mut ledger = ledger_with(4);
        ledger.store_mut().remove_entry(2);
        assert_eq!(
            ledger.verify_chain(0, 1),
            Ok(())
        );
        assert_eq!(
            ledger.verify_chain(3, 3),
            Err(LedgerError::Integrity(ChainIntegrityError::MissingEntry(2)))
        );
    }

    #[test]
    fn merkle_proof_verifies_against_side_index() {
        let ledger = ledger_with(3);
        let proof = ledger.merkle_proof(2, &pid("alice")).unwrap();
        assert_eq!(proof.amount, 102);
        assert!(proof.verify(&ledger.merkle_root(2).unwrap()));
        assert!(!proof.verify(&ledger.merkle_root(1).unwrap()));
    }

    #[test]
    fn merkle_proof_for_absent_participant() {
        let ledger = ledger_with(1);
        assert!(matches!(
            ledger.merkle_proof(0, &pid("zed")),
            Err(LedgerError::ParticipantNotInEpoch { epoch: 0, .. })
        ));
        assert_eq!(
            ledger.merkle_proof(9, &pid("alice")),
            Err(LedgerError::EpochNotFound(9))
        );
    }

    #[test]
    fn state_travels_with_its_entry() {
        use crate::classifier::ParticipantClassifier;
        use crate::policy::ClassifierPolicy;
        use crate::types::WalletRecord;

        let mut ledger = ledger_with(2);
        assert_eq!(ledger.committed_state().unwrap(), None);

        let mut wallets = WalletStore::new();
        wallets.ingest(
            &[WalletRecord {
                participant_id: "alice".into(),
                balance: 500,
                activity_score: 0.5,
                last_active_epoch: None,
                is_founding_member: true,
            }],
            2,
        );
        let mut classifier = ParticipantClassifier::new(ClassifierPolicy::default());
        classifier.register(pid("alice"), crate::types::ParticipantType::Partner);

        ledger
            .append_with_state(draft(2, &[("alice", 1)]), &wallets, classifier.state())
            .unwrap();
        let state = ledger.committed_state().unwrap().unwrap();
        assert_eq!(state.epoch, 2);
        assert_eq!(state.wallets, wallets);
        assert_eq!(&state.classifier, classifier.state());

        // A plain append drops the now stale state.
        ledger.append(draft(3, &[("alice", 1)])).unwrap();
        assert_eq!(ledger.committed_state().unwrap(), None);
    }

    #[test]
    fn rejected_append_keeps_previous_state() {
        let mut ledger = ledger_with(0);
        let wallets = WalletStore::new();
        let classifier = ClassifierState::default();
        ledger
            .append_with_state(draft(0, &[("a", 1)]), &wallets, &classifier)
            .unwrap();
        assert!(ledger
            .append_with_state(draft(5, &[("a", 1)]), &wallets, &classifier)
            .is_err());
        assert_eq!(ledger.committed_state().unwrap().unwrap().epoch, 0);
    }

    #[test]
    fn entry_roundtrips_through_bincode() {
        let ledger = ledger_with(1);
        let entry = ledger.get(0).unwrap();
        let bytes = bincode::encode_to_vec(&entry, bincode::config::standard()).unwrap();
        let (decoded, _): (EpochEntry, usize) =
            bincode::decode_from_slice(&bytes, bincode::config::standard()).unwrap();
        assert_eq!(decoded, entry);
        assert_eq!(decoded.compute_hash().unwrap(), entry.entry_hash);
    }

    #[test]
    fn participant_only_skips_reserves() {
        let mut d = draft(0, &[("a", 5)]);
        d.participant_rewards.insert(ParticipantId::reserve("network"), 3);
        d.total_distributed = 8;
        d.pool_allocations.insert("base".into(), 8);
        let entry = EpochEntry::seal(d, Hash256::ZERO).unwrap();
        assert_eq!(entry.participant_only().count(), 1);
    }
}
