//! Shared builders for scenario and property tests.

use std::collections::BTreeMap;
use std::sync::Arc;

use ebb_core::classifier::{EngagementEvent, EventKind};
use ebb_core::constants::UNIT;
use ebb_core::ledger::{EpochDraft, EpochEntry, MemoryLedgerStore};
use ebb_core::policy::Policy;
use ebb_core::types::{Hash256, ParticipantId, WalletRecord};
use ebb_node_lib::coordinator::EpochCoordinator;
use ebb_node_lib::feed::{MemoryEventFeed, MemoryWalletFeed};

/// Parse a participant id, panicking on invalid input.
pub fn pid(id: &str) -> ParticipantId {
    ParticipantId::parse(id).unwrap()
}

/// A well-formed wallet record with `tokens` whole tokens.
pub fn record(id: &str, tokens: u64, score: f64) -> WalletRecord {
    WalletRecord {
        participant_id: id.to_string(),
        balance: (tokens * UNIT) as i64,
        activity_score: score,
        last_active_epoch: None,
        is_founding_member: false,
    }
}

pub fn founder(id: &str, tokens: u64, score: f64) -> WalletRecord {
    WalletRecord {
        is_founding_member: true,
        ..record(id, tokens, score)
    }
}

pub fn contribution(event_id: &str, participant: &str, epoch: u64, magnitude: u64) -> EngagementEvent {
    EngagementEvent {
        event_id: event_id.to_string(),
        participant_id: participant.to_string(),
        epoch,
        kind: EventKind::Contribution { magnitude },
    }
}

/// Coordinator over in-memory storage and feeds.
pub struct Harness {
    pub coordinator: EpochCoordinator<MemoryLedgerStore>,
    pub wallets: Arc<MemoryWalletFeed>,
    pub events: Arc<MemoryEventFeed>,
}

impl Harness {
    pub fn new(records: Vec<WalletRecord>) -> Self {
        Self::with_policy(Policy::default(), records)
    }

    pub fn with_policy(policy: Policy, records: Vec<WalletRecord>) -> Self {
        let wallets = Arc::new(MemoryWalletFeed::new(records));
        let events = Arc::new(MemoryEventFeed::new());
        let coordinator = EpochCoordinator::new(
            policy,
            MemoryLedgerStore::new(),
            wallets.clone(),
            events.clone(),
        )
        .unwrap()
        .with_decay_workers(4);
        Self {
            coordinator,
            wallets,
            events,
        }
    }
}

/// Seal a standalone entry paying `rewards` (reserves included) at `epoch`.
pub fn sealed_entry(epoch: u64, rewards: &[(&str, u64)]) -> EpochEntry {
    let participant_rewards: BTreeMap<ParticipantId, u64> =
        rewards.iter().map(|(id, amt)| (pid(id), *amt)).collect();
    let total: u64 = participant_rewards.values().sum();
    EpochEntry::seal(
        EpochDraft {
            epoch_number: epoch,
            timestamp: epoch * 86_400,
            total_distributed: total,
            pool_allocations: [("base".to_string(), total)].into_iter().collect(),
            participant_rewards,
        },
        Hash256::ZERO,
    )
    .unwrap()
}
