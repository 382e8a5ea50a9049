//! Participant wallet store.
//!
//! Holds every known [`Wallet`] plus the reserve accounts that absorb
//! unclaimed pools and routed decay. The store is never mutated piecemeal
//! during a tick: the coordinator reads a snapshot, computes a
//! [`WalletDeltas`] set, and applies it in one step with [`WalletStore::apply`].

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ValidationError;
use crate::types::{ParticipantId, Wallet, WalletRecord};

/// A feed record rejected for this tick.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Exclusion {
    pub participant_id: String,
    pub reason: String,
    #[serde(skip)]
    pub error: Option<ValidationError>,
}

impl Exclusion {
    fn new(participant_id: &str, error: ValidationError) -> Self {
        Self {
            participant_id: participant_id.to_string(),
            reason: error.to_string(),
            error: Some(error),
        }
    }
}

/// Result of ingesting one feed snapshot.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct IngestOutcome {
    /// Participants whose record validated and who take part in this tick.
    pub eligible: BTreeSet<ParticipantId>,
    pub excluded: Vec<Exclusion>,
    /// How many of `eligible` were seen for the first time.
    pub registered: usize,
}

/// Balance changes computed by one tick, applied all at once.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WalletDeltas {
    /// New absolute balance per participant wallet.
    pub balances: BTreeMap<ParticipantId, u64>,
    /// Amounts added to reserve accounts.
    pub reserve_credits: BTreeMap<ParticipantId, u64>,
}

impl WalletDeltas {
    pub fn credit_reserve(&mut self, account: ParticipantId, amount: u64) -> Result<(), ValidationError> {
        if amount == 0 {
            return Ok(());
        }
        let slot = self.reserve_credits.entry(account.clone()).or_insert(0);
        *slot = slot
            .checked_add(amount)
            .ok_or_else(|| ValidationError::BalanceOverflow(account.to_string()))?;
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.balances.is_empty() && self.reserve_credits.is_empty()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct WalletStore {
    wallets: BTreeMap<ParticipantId, Wallet>,
    reserves: BTreeMap<ParticipantId, u64>,
}

impl WalletStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a feed snapshot for the tick at `epoch`.
    ///
    /// New participants are registered with the feed balance. For known
    /// participants the stored balance stands (it carries every prior decay
    /// and reward); score, last-active epoch and founding flag are refreshed.
    /// Malformed records are excluded and logged, not retried. A participant
    /// listed more than once is ambiguous: every copy is excluded and nothing
    /// is stored for it.
    pub fn ingest(&mut self, records: &[WalletRecord], epoch: u64) -> IngestOutcome {
        let mut outcome = IngestOutcome::default();
        let mut copies: BTreeMap<&str, usize> = BTreeMap::new();
        for record in records {
            *copies.entry(record.participant_id.as_str()).or_default() += 1;
        }

        for record in records {
            let validated = match record.validate(epoch) {
                Ok(v) => v,
                Err(e) => {
                    warn!(epoch, participant = %record.participant_id, error = %e, "wallet excluded");
                    outcome.excluded.push(Exclusion::new(&record.participant_id, e));
                    continue;
                }
            };

            if copies.get(record.participant_id.as_str()).copied().unwrap_or(0) > 1 {
                let e = ValidationError::DuplicateRecord(record.participant_id.clone());
                warn!(epoch, participant = %record.participant_id, "duplicate wallet record excluded");
                outcome.excluded.push(Exclusion::new(&record.participant_id, e));
                continue;
            }

            match self.wallets.get_mut(&validated.participant_id) {
                Some(wallet) => {
                    wallet.activity_score_bps = validated.activity_score_bps;
                    wallet.last_active_epoch = validated
                        .last_active_epoch
                        .max(wallet.last_active_epoch);
                    wallet.is_founding_member = validated.is_founding_member;
                }
                None => {
                    debug!(epoch, participant = %validated.participant_id, balance = validated.balance, "wallet registered");
                    self.wallets.insert(
                        validated.participant_id.clone(),
                        Wallet {
                            participant_id: validated.participant_id.clone(),
                            balance: validated.balance,
                            activity_score_bps: validated.activity_score_bps,
                            last_active_epoch: validated.last_active_epoch,
                            registered_epoch: epoch,
                            is_founding_member: validated.is_founding_member,
                        },
                    );
                    outcome.registered += 1;
                }
            }
            outcome.eligible.insert(validated.participant_id);
        }

        outcome
    }

    /// Copies of the named wallets, in participant-id order. Unknown ids are skipped.
    pub fn snapshot(&self, ids: &BTreeSet<ParticipantId>) -> Vec<Wallet> {
        ids.iter().filter_map(|id| self.wallets.get(id).cloned()).collect()
    }

    /// Apply a tick's deltas atomically.
    ///
    /// Every delta is checked before anything is written; on error the store
    /// is unchanged.
    pub fn apply(&mut self, deltas: &WalletDeltas) -> Result<(), ValidationError> {
        for id in deltas.balances.keys() {
            if !self.wallets.contains_key(id) {
                return Err(ValidationError::UnknownWallet(id.to_string()));
            }
        }

        let mut new_reserves = Vec::with_capacity(deltas.reserve_credits.len());
        for (account, credit) in &deltas.reserve_credits {
            let current = self.reserves.get(account).copied().unwrap_or(0);
            let updated = current
                .checked_add(*credit)
                .ok_or_else(|| ValidationError::BalanceOverflow(account.to_string()))?;
            new_reserves.push((account.clone(), updated));
        }

        for (id, balance) in &deltas.balances {
            if let Some(wallet) = self.wallets.get_mut(id) {
                wallet.balance = *balance;
            }
        }
        self.reserves.extend(new_reserves);
        Ok(())
    }

    pub fn get(&self, id: &ParticipantId) -> Option<&Wallet> {
        self.wallets.get(id)
    }

    pub fn reserve_balance(&self, account: &ParticipantId) -> u64 {
        self.reserves.get(account).copied().unwrap_or(0)
    }

    pub fn reserves(&self) -> impl Iterator<Item = (&ParticipantId, &u64)> {
        self.reserves.iter()
    }

    pub fn wallets(&self) -> impl Iterator<Item = &Wallet> {
        self.wallets.values()
    }

    pub fn len(&self) -> usize {
        self.wallets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wallets.is_empty()
    }

    /// Sum of all wallet and reserve balances, saturating.
    pub fn total_holdings(&self) -> u64 {
        self.wallets
            .values()
            .map(|w| w.balance)
            .chain(self.reserves.values().copied())
            .fold(0u64, u64::saturating_add)
    }
}
