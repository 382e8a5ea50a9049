//! Epoch tick orchestration.
//!
//! One tick runs `Idle → Decaying → Classifying → Distributing → Committing
//! → Analyzing → Idle`. Ticks never overlap: a second call while one is in
//! flight gets [`TickError::Busy`].
//!
//! Every computation before the ledger append works on private copies of the
//! wallet store and classifier. A failure anywhere up to and including the
//! append drops those copies, so the shared state and the ledger are exactly
//! as they were. The append writes the new wallet and classifier state with
//! the entry; once it succeeds the copies are installed and the entry is
//! handed to the sentinel. Sentinel trouble is logged, never fatal.

use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use ebb_core::classifier::ParticipantClassifier;
use ebb_core::distribution::{DistributionEngine, DistributionOutcome};
use ebb_core::error::{
    ChainIntegrityError, ConservationViolation, EbbError, LedgerError, PolicyError, TickError,
};
use ebb_core::ledger::{EpochDraft, EpochEntry, EpochLedger, LedgerStore};
use ebb_core::merkle::RewardProof;
use ebb_core::policy::{Policy, RedistributionPolicy};
use ebb_core::traits::{DecayCalculator, EventFeed, WalletFeed};
use ebb_core::types::{
    ActivityTier, DecayOutcome, DecayRouting, Hash256, ParticipantId, ParticipantType, Wallet,
};
use ebb_core::wallet::{Exclusion, WalletDeltas, WalletStore};
use ebb_decay::DecayEngine;
use ebb_sentinel::SentinelHandle;

/// Epochs of decay applied per tick.
const DECAY_STEP_EPOCHS: u64 = 1;

/// Coordinator phase. Moves forward only; always returns to `Idle`.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TickState {
    Idle,
    Decaying,
    Classifying,
    Distributing,
    Committing,
    Analyzing,
}

impl fmt::Display for TickState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Decaying => "decaying",
            Self::Classifying => "classifying",
            Self::Distributing => "distributing",
            Self::Committing => "committing",
            Self::Analyzing => "analyzing",
        };
        f.write_str(s)
    }
}

/// Summary of one committed tick.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TickReport {
    pub epoch: u64,
    pub entry_hash: Hash256,
    pub merkle_root: Hash256,
    pub total_distributed: u64,
    /// Wallets that took part in the tick.
    pub participants: usize,
    /// Wallets seen for the first time this tick.
    pub registered: usize,
    pub excluded: Vec<Exclusion>,
    pub events_accepted: usize,
    pub events_duplicate: usize,
    pub events_stale: usize,
    pub events_rejected: usize,
    pub elevated: Vec<(ParticipantId, ParticipantType)>,
    pub routing: DecayRouting,
    /// Part of `total_distributed` credited to reserve accounts.
    pub reserve_total: u64,
}

/// Resets the coordinator to `Idle` however the tick ends.
struct TickGuard<'a> {
    state: &'a Mutex<TickState>,
    epoch: u64,
}

impl TickGuard<'_> {
    fn advance(&self, next: TickState) {
        let mut state = self.state.lock();
        let from = *state;
        debug!(epoch = self.epoch, %from, to = %next, "tick phase");
        *state = next;
    }
}

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        *self.state.lock() = TickState::Idle;
    }
}

fn aborted(e: impl fmt::Display) -> TickError {
    TickError::Aborted(e.to_string())
}

pub struct EpochCoordinator<S: LedgerStore> {
    state: Mutex<TickState>,
    policy: RwLock<Arc<Policy>>,
    wallets: RwLock<WalletStore>,
    classifier: Mutex<ParticipantClassifier>,
    ledger: RwLock<EpochLedger<S>>,
    wallet_feed: Arc<dyn WalletFeed>,
    event_feed: Arc<dyn EventFeed>,
    sentinel: Option<SentinelHandle>,
    decay_workers: usize,
}

impl<S: LedgerStore> EpochCoordinator<S> {
    /// Build a coordinator over `store`. The policy is validated first.
    ///
    /// Wallets, reserves and classifier histories resume from the state
    /// stored with the ledger tip.
    pub fn new(
        policy: Policy,
        store: S,
        wallet_feed: Arc<dyn WalletFeed>,
        event_feed: Arc<dyn EventFeed>,
    ) -> Result<Self, EbbError> {
        let policy = policy.validated()?;
        let ledger = EpochLedger::new(store, policy.distribution.rounding_tolerance);
        let (wallets, classifier) = match ledger.committed_state()? {
            Some(state) => {
                info!(
                    epoch = state.epoch,
                    wallets = state.wallets.len(),
                    participants = state.classifier.participant_count(),
                    "resumed committed state"
                );
                (
                    state.wallets,
                    ParticipantClassifier::from_state(policy.classifier.clone(), state.classifier),
                )
            }
            None => {
                if let Some((tip, _)) = ledger.tip()? {
                    warn!(tip, "ledger tip carries no committed state, starting with empty wallets");
                }
                (WalletStore::new(), ParticipantClassifier::new(policy.classifier.clone()))
            }
        };

        let decay_workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Ok(Self {
            state: Mutex::new(TickState::Idle),
            classifier: Mutex::new(classifier),
            ledger: RwLock::new(ledger),
            policy: RwLock::new(Arc::new(policy)),
            wallets: RwLock::new(wallets),
            wallet_feed,
            event_feed,
            sentinel: None,
            decay_workers,
        })
    }

    /// Hand every committed entry to a running sentinel.
    pub fn with_sentinel(mut self, sentinel: SentinelHandle) -> Self {
        self.sentinel = Some(sentinel);
        self
    }

    /// Number of parallel decay workers (at least one).
    pub fn with_decay_workers(mut self, workers: usize) -> Self {
        self.decay_workers = workers.max(1);
        self
    }

    pub fn state(&self) -> TickState {
        *self.state.lock()
    }

    pub fn policy(&self) -> Arc<Policy> {
        Arc::clone(&self.policy.read())
    }

    pub fn sentinel(&self) -> Option<&SentinelHandle> {
        self.sentinel.as_ref()
    }

    /// Replace the active policy. An invalid policy is rejected and the
    /// current one stays. A tick already running finishes on the old policy.
    pub fn reload_policy(&self, policy: Policy) -> Result<(), PolicyError> {
        let policy = policy.validated()?;
        self.ledger
            .write()
            .set_rounding_tolerance(policy.distribution.rounding_tolerance);
        self.classifier.lock().set_policy(policy.classifier.clone());
        if let Some(sentinel) = &self.sentinel {
            sentinel.update_policy(policy.sentinel.clone());
        }
        *self.policy.write() = Arc::new(policy);
        info!("policy reloaded");
        Ok(())
    }

    /// Seed a participant's type from an external registry. Refused while a
    /// tick is running. Persisted with the next committed entry.
    pub fn register_participant(
        &self,
        id: ParticipantId,
        participant_type: ParticipantType,
    ) -> Result<(), TickError> {
        let state = self.state.lock();
        if *state != TickState::Idle {
            return Err(TickError::Busy);
        }
        self.classifier.lock().register(id, participant_type);
        drop(state);
        Ok(())
    }

    fn begin(&self, epoch: u64) -> Result<TickGuard<'_>, TickError> {
        let mut state = self.state.lock();
        if *state != TickState::Idle {
            return Err(TickError::Busy);
        }
        *state = TickState::Decaying;
        Ok(TickGuard {
            state: &self.state,
            epoch,
        })
    }

    /// Run one tick distributing `budget` minor units, stamped `timestamp`.
    ///
    /// # Errors
    ///
    /// [`TickError::Busy`] if a tick is in flight. Any other error means the
    /// tick was aborted with no side effects.
    pub async fn tick(&self, budget: u64, timestamp: u64) -> Result<TickReport, TickError> {
        let (epoch, halted) = {
            let ledger = self.ledger.read();
            (ledger.next_epoch()?, ledger.halted_at()?)
        };
        let guard = self.begin(epoch)?;
        if let Some(at) = halted {
            return Err(LedgerError::from(ChainIntegrityError::Halted(at)).into());
        }

        info!(epoch, budget, "tick started");
        let result = self.run_tick(&guard, epoch, budget, timestamp).await;
        match &result {
            Ok(report) => info!(
                epoch,
                participants = report.participants,
                excluded = report.excluded.len(),
                total = report.total_distributed,
                decayed = report.routing.decayed_total,
                "tick committed"
            ),
            Err(e) => warn!(epoch, error = %e, "tick aborted, nothing applied"),
        }
        result
    }

    async fn run_tick(
        &self,
        guard: &TickGuard<'_>,
        epoch: u64,
        budget: u64,
        timestamp: u64,
    ) -> Result<TickReport, TickError> {
        let policy = self.policy();

        // --- Decaying ---
        let records = self
            .wallet_feed
            .pull(epoch)
            .map_err(|e| TickError::Feed(e.to_string()))?;
        let events = self
            .event_feed
            .drain(epoch)
            .map_err(|e| TickError::Feed(e.to_string()))?;

        let mut wallets = self.wallets.read().clone();
        let ingest = wallets.ingest(&records, epoch);
        if ingest.eligible.is_empty() {
            return Err(TickError::NoEligibleWallets);
        }
        let snapshot = wallets.snapshot(&ingest.eligible);

        let engine = Arc::new(DecayEngine::from_policy(&policy));
        let decayed = decay_parallel(Arc::clone(&engine), &snapshot, epoch, self.decay_workers).await?;
        let decayed_total = decayed
            .iter()
            .try_fold(0u64, |acc, o| acc.checked_add(o.decayed))
            .ok_or(ConservationViolation::Overflow)?;
        let routing = engine.route(decayed_total)?;
        let routed = routing.network_credit.checked_add(routing.treasury_credit);
        if routed != Some(decayed_total) {
            return Err(ConservationViolation::DecayRouting {
                decayed: decayed_total,
                routed: routed.unwrap_or(u64::MAX),
            }
            .into());
        }

        // --- Classifying ---
        guard.advance(TickState::Classifying);
        let mut classifier = self.classifier.lock().clone();
        classifier.set_policy(policy.classifier.clone());
        let recorded = classifier.record_events(&events, epoch);
        let plan = classifier.plan(&snapshot, epoch);

        // --- Distributing ---
        guard.advance(TickState::Distributing);
        let distribution = DistributionEngine::new(policy.pools.clone(), policy.distribution.clone())
            .distribute(budget, &plan.classifications)?;
        let deltas = build_deltas(&decayed, &distribution, &routing, &policy.redistribution)?;

        // --- Committing ---
        guard.advance(TickState::Committing);
        wallets.apply(&deltas).map_err(aborted)?;
        let draft = EpochDraft {
            epoch_number: epoch,
            timestamp,
            total_distributed: distribution.total_distributed,
            pool_allocations: distribution.pool_allocations.clone(),
            participant_rewards: distribution.participant_rewards.clone(),
        };
        classifier.commit(plan);
        let entry = self
            .ledger
            .write()
            .append_with_state(draft, &wallets, classifier.state())?;

        // The entry is permanent from here on.
        *self.wallets.write() = wallets;
        classifier.set_policy(self.policy().classifier.clone());
        *self.classifier.lock() = classifier;

        // --- Analyzing ---
        guard.advance(TickState::Analyzing);
        if let Some(sentinel) = &self.sentinel {
            if let Err(e) = sentinel.submit(entry.clone()) {
                warn!(epoch, error = %e, "sentinel unavailable, entry not analyzed");
            }
        }

        Ok(TickReport {
            epoch,
            entry_hash: entry.entry_hash,
            merkle_root: entry.merkle_root(),
            total_distributed: entry.total_distributed,
            participants: ingest.eligible.len(),
            registered: ingest.registered,
            excluded: ingest.excluded,
            events_accepted: recorded.accepted,
            events_duplicate: recorded.duplicates,
            events_stale: recorded.stale,
            events_rejected: recorded.rejected.len(),
            elevated: recorded.elevated,
            routing,
            reserve_total: distribution.reserve_total(),
        })
    }

    // --- Read-only audit API ---

    pub fn get_entry(&self, epoch: u64) -> Result<EpochEntry, LedgerError> {
        self.ledger.read().get(epoch)
    }

    pub fn latest_entry(&self) -> Result<Option<EpochEntry>, LedgerError> {
        self.ledger.read().latest()
    }

    pub fn merkle_root(&self, epoch: u64) -> Result<Hash256, LedgerError> {
        self.ledger.read().merkle_root(epoch)
    }

    pub fn merkle_proof(&self, epoch: u64, participant: &ParticipantId) -> Result<RewardProof, LedgerError> {
        self.ledger.read().merkle_proof(epoch, participant)
    }

    /// Verify `from..=to`. A failure halts ticks until a later pass over the
    /// failing epoch succeeds.
    pub fn verify_chain(&self, from: u64, to: u64) -> Result<(), LedgerError> {
        self.ledger.write().verify_chain(from, to)
    }

    pub fn verify_all(&self) -> Result<(), LedgerError> {
        self.ledger.write().verify_all()
    }

    pub fn next_epoch(&self) -> Result<u64, LedgerError> {
        self.ledger.read().next_epoch()
    }

    pub fn tip(&self) -> Result<Option<(u64, Hash256)>, LedgerError> {
        self.ledger.read().tip()
    }

    pub fn halted_at(&self) -> Result<Option<u64>, LedgerError> {
        self.ledger.read().halted_at()
    }

    pub fn wallet(&self, id: &ParticipantId) -> Option<Wallet> {
        self.wallets.read().get(id).cloned()
    }

    pub fn wallet_count(&self) -> usize {
        self.wallets.read().len()
    }

    /// Balance of the reserve account for `name` (a pool or reserve name).
    pub fn reserve_balance(&self, name: &str) -> u64 {
        self.wallets
            .read()
            .reserve_balance(&ParticipantId::reserve(name))
    }

    /// Sum of every wallet and reserve balance.
    pub fn total_holdings(&self) -> u64 {
        self.wallets.read().total_holdings()
    }

    pub fn classification(&self, id: &ParticipantId) -> Option<(ParticipantType, ActivityTier)> {
        let classifier = self.classifier.lock();
        Some((classifier.participant_type(id)?, classifier.activity_tier(id)?))
    }

    /// Direct ledger access for integrity tests.
    #[cfg(any(test, feature = "testing"))]
    pub fn with_ledger_mut<R>(&self, f: impl FnOnce(&mut EpochLedger<S>) -> R) -> R {
        f(&mut self.ledger.write())
    }
}

/// Decay `wallets` on up to `workers` blocking threads and join the results
/// in input order.
async fn decay_parallel(
    engine: Arc<DecayEngine>,
    wallets: &[Wallet],
    epoch: u64,
    workers: usize,
) -> Result<Vec<DecayOutcome>, TickError> {
    let chunk_size = wallets.len().div_ceil(workers.max(1)).max(1);
    let mut set = JoinSet::new();
    for (index, chunk) in wallets.chunks(chunk_size).enumerate() {
        let engine = Arc::clone(&engine);
        let chunk = chunk.to_vec();
        set.spawn_blocking(move || (index, engine.decay_batch(&chunk, epoch, DECAY_STEP_EPOCHS)));
    }

    let mut parts = Vec::with_capacity(set.len());
    while let Some(joined) = set.join_next().await {
        let (index, result) = joined.map_err(|e| aborted(format!("decay worker failed: {e}")))?;
        parts.push((index, result?));
    }
    parts.sort_by_key(|(index, _)| *index);
    Ok(parts.into_iter().flat_map(|(_, outcomes)| outcomes).collect())
}

/// Post-decay balances plus rewards, and every reserve credit of the tick.
fn build_deltas(
    decayed: &[DecayOutcome],
    distribution: &DistributionOutcome,
    routing: &DecayRouting,
    redistribution: &RedistributionPolicy,
) -> Result<WalletDeltas, TickError> {
    let mut deltas = WalletDeltas::default();
    for outcome in decayed {
        deltas
            .balances
            .insert(outcome.participant_id.clone(), outcome.new_balance);
    }

    for (id, reward) in &distribution.participant_rewards {
        if id.is_reserve() {
            deltas.credit_reserve(id.clone(), *reward).map_err(aborted)?;
            continue;
        }
        let balance = deltas
            .balances
            .get_mut(id)
            .ok_or_else(|| aborted(format!("reward for participant outside the tick: {id}")))?;
        *balance = balance
            .checked_add(*reward)
            .ok_or_else(|| aborted(format!("balance overflow for {id}")))?;
    }

    deltas
        .credit_reserve(ParticipantId::reserve(&redistribution.network_reserve), routing.network_credit)
        .map_err(aborted)?;
    deltas
        .credit_reserve(ParticipantId::reserve(&redistribution.treasury_reserve), routing.treasury_credit)
        .map_err(aborted)?;
    Ok(deltas)
}
