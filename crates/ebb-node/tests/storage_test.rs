//! RocksDB ledger persistence through the public API.

use std::collections::BTreeMap;
use std::sync::Arc;

use ebb_core::classifier::{EngagementEvent, EventKind};
use ebb_core::constants::UNIT;
use ebb_core::error::LedgerError;
use ebb_core::ledger::{EpochDraft, EpochLedger, LedgerStore};
use ebb_core::policy::Policy;
use ebb_core::types::{ParticipantId, ParticipantType, WalletRecord};
use ebb_node_lib::coordinator::EpochCoordinator;
use ebb_node_lib::feed::{MemoryEventFeed, MemoryWalletFeed};
use ebb_node_lib::RocksLedgerStore;

fn pid(s: &str) -> ParticipantId {
    ParticipantId::parse(s).unwrap()
}

fn draft(epoch: u64) -> EpochDraft {
    let rewards: BTreeMap<ParticipantId, u64> = [
        (pid("alice"), 600 + epoch),
        (pid("bob"), 400 - epoch),
    ]
    .into_iter()
    .collect();
    EpochDraft {
        epoch_number: epoch,
        timestamp: 1_700_000_000 + epoch * 86_400,
        total_distributed: 1_000,
        pool_allocations: [("base".to_string(), 1_000)].into_iter().collect(),
        participant_rewards: rewards,
    }
}

#[test]
fn chain_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger");

    let tip_hash = {
        let store = RocksLedgerStore::open(&path).unwrap();
        let mut ledger = EpochLedger::new(store, 0);
        for epoch in 0..5 {
            ledger.append(draft(epoch)).unwrap();
        }
        ledger.store().flush().unwrap();
        ledger.tip().unwrap().unwrap().1
    };

    let store = RocksLedgerStore::open(&path).unwrap();
    let mut ledger = EpochLedger::new(store, 0);
    assert_eq!(ledger.tip().unwrap(), Some((4, tip_hash)));
    assert_eq!(ledger.next_epoch().unwrap(), 5);
    ledger.verify_all().unwrap();

    // Chain links are intact across the reopen.
    for epoch in 1..5 {
        let prev = ledger.get(epoch - 1).unwrap();
        assert_eq!(ledger.get(epoch).unwrap().prev_hash, prev.entry_hash);
    }

    let proof = ledger.merkle_proof(3, &pid("bob")).unwrap();
    assert_eq!(proof.amount, 397);
    assert!(proof.verify(&ledger.merkle_root(3).unwrap()));

    ledger.append(draft(5)).unwrap();
    assert_eq!(ledger.next_epoch().unwrap(), 5 + 1);
}

#[test]
fn out_of_order_append_leaves_store_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let store = RocksLedgerStore::open(dir.path().join("ledger")).unwrap();
    let mut ledger = EpochLedger::new(store, 0);
    ledger.append(draft(0)).unwrap();

    assert!(ledger.append(draft(2)).is_err());
    assert!(ledger.append(draft(0)).is_err());
    assert_eq!(ledger.store().get_entry(2).unwrap(), None);
    assert_eq!(ledger.next_epoch().unwrap(), 1);
}

#[tokio::test]
async fn coordinator_ticks_persist() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger");
    let records: Vec<WalletRecord> = (0..8)
        .map(|i| WalletRecord {
            participant_id: format!("holder-{i}"),
            balance: ((i + 1) * 250 * UNIT) as i64,
            activity_score: 0.1 * i as f64,
            last_active_epoch: None,
            is_founding_member: i == 0,
        })
        .collect();

    {
        let coord = EpochCoordinator::new(
            Policy::default(),
            RocksLedgerStore::open(&path).unwrap(),
            Arc::new(MemoryWalletFeed::new(records)),
            Arc::new(MemoryEventFeed::new()),
        )
        .unwrap();
        for epoch in 0..3 {
            let report = coord.tick(10_000 * UNIT, epoch * 60).await.unwrap();
            assert_eq!(report.epoch, epoch);
            assert_eq!(report.excluded.len(), 0);
        }
    }

    let store = RocksLedgerStore::open(&path).unwrap();
    let mut ledger = EpochLedger::new(store, 0);
    assert_eq!(ledger.next_epoch().unwrap(), 3);
    ledger.verify_all().unwrap();
    for epoch in 0..3 {
        let entry = ledger.get(epoch).unwrap();
        assert_eq!(entry.participant_rewards.values().sum::<u64>(), 10_000 * UNIT);
        assert_eq!(ledger.merkle_root(epoch).unwrap(), entry.merkle_root());
    }
}

fn holder(id: &str, tokens: u64, founding: bool) -> WalletRecord {
    WalletRecord {
        participant_id: id.to_string(),
        balance: (tokens * UNIT) as i64,
        activity_score: 0.6,
        last_active_epoch: None,
        is_founding_member: founding,
    }
}

fn open_coordinator(
    path: &std::path::Path,
    wallets: &Arc<MemoryWalletFeed>,
    events: &Arc<MemoryEventFeed>,
) -> EpochCoordinator<RocksLedgerStore> {
    EpochCoordinator::new(
        Policy::default(),
        RocksLedgerStore::open(path).unwrap(),
        wallets.clone(),
        events.clone(),
    )
    .unwrap()
}

#[tokio::test]
async fn wallets_reserves_and_types_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger");
    let wallets = Arc::new(MemoryWalletFeed::new(vec![
        holder("f1", 500, true),
        holder("f2", 500, true),
        holder("carol", 200, false),
    ]));
    let events = Arc::new(MemoryEventFeed::new());
    for (id, approver) in [("ap-1", "f1"), ("ap-2", "f2")] {
        events.push(EngagementEvent {
            event_id: id.into(),
            participant_id: "carol".into(),
            epoch: 1,
            kind: EventKind::ElevationApproval {
                target_type: 1,
                approver: approver.into(),
            },
        });
    }

    let (holdings, network, treasury, carol) = {
        let coord = open_coordinator(&path, &wallets, &events);
        coord.tick(10_000 * UNIT, 0).await.unwrap();
        let report = coord.tick(10_000 * UNIT, 60).await.unwrap();
        assert_eq!(report.elevated, vec![(pid("carol"), ParticipantType::Partner)]);
        (
            coord.total_holdings(),
            coord.reserve_balance("network"),
            coord.reserve_balance("treasury"),
            coord.wallet(&pid("carol")).unwrap(),
        )
    };
    assert!(carol.balance > 200 * UNIT);
    assert!(treasury > 0);

    let coord = open_coordinator(&path, &wallets, &events);
    assert_eq!(coord.total_holdings(), holdings);
    assert_eq!(coord.reserve_balance("network"), network);
    assert_eq!(coord.reserve_balance("treasury"), treasury);
    assert_eq!(coord.wallet(&pid("carol")), Some(carol));
    assert_eq!(
        coord.classification(&pid("carol")).map(|(t, _)| t),
        Some(ParticipantType::Partner)
    );

    // The feed balance is ignored for a known wallet after the restart.
    let report = coord.tick(10_000 * UNIT, 120).await.unwrap();
    assert_eq!(report.registered, 0);
    assert_eq!(report.events_duplicate, 2);
    assert_eq!(coord.total_holdings(), holdings + 10_000 * UNIT);
}

#[tokio::test]
async fn verify_past_tip_leaves_ledger_writable_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger");
    let wallets = Arc::new(MemoryWalletFeed::new(vec![holder("solo", 100, false)]));
    let events = Arc::new(MemoryEventFeed::new());

    {
        let coord = open_coordinator(&path, &wallets, &events);
        coord.tick(10_000 * UNIT, 0).await.unwrap();
        assert_eq!(coord.verify_chain(0, 99), Err(LedgerError::EpochNotFound(1)));
        assert_eq!(coord.halted_at().unwrap(), None);
    }

    let coord = open_coordinator(&path, &wallets, &events);
    assert_eq!(coord.halted_at().unwrap(), None);
    assert_eq!(coord.tick(10_000 * UNIT, 60).await.unwrap().epoch, 1);
}
