//! End-to-end scenarios across coordinator, ledger, decay and sentinel.

use std::time::Duration;

use ebb_core::constants::UNIT;
use ebb_core::distribution::DistributionEngine;
use ebb_core::error::{ChainIntegrityError, LedgerError, TickError};
use ebb_core::types::{ActivityTier, Classification, ParticipantId, ParticipantType};
use ebb_sentinel::{
    spawn_sentinel, AlertType, Evidence, MemoryAlertLog, ParticipationSentinel,
};
use ebb_tests::helpers::{contribution, founder, pid, record, sealed_entry, Harness};

const BUDGET: u64 = 10_000 * UNIT;

// ---------------------------------------------------------------------------
// Distribution
// ---------------------------------------------------------------------------

#[tokio::test]
async fn founder_and_member_split_the_reference_budget() {
    let h = Harness::new(vec![
        founder("founder", 1_000, 0.9),
        record("member", 1_000, 0.5),
    ]);
    h.events.push(contribution("f-1", "founder", 0, 150));
    h.events.push(contribution("m-1", "member", 0, 20));

    h.coordinator.tick(BUDGET, 0).await.unwrap();

    assert_eq!(
        h.coordinator.classification(&pid("founder")),
        Some((ParticipantType::Founder, ActivityTier::High))
    );
    assert_eq!(
        h.coordinator.classification(&pid("member")),
        Some((ParticipantType::Base, ActivityTier::Mid))
    );

    let entry = h.coordinator.get_entry(0).unwrap();
    assert_eq!(entry.reward_of(&pid("founder")), Some(7_000 * UNIT));
    assert_eq!(entry.reward_of(&pid("member")), Some(1_000 * UNIT));
    assert_eq!(entry.reward_of(&ParticipantId::reserve("network")), Some(1_600 * UNIT));
    assert_eq!(entry.reward_of(&ParticipantId::reserve("fund")), Some(400 * UNIT));

    // Claims before redistribution, from the same classifications.
    let policy = h.coordinator.policy();
    let engine = DistributionEngine::new(policy.pools.clone(), policy.distribution.clone());
    let classes = [
        Classification {
            participant_id: pid("founder"),
            participant_type: ParticipantType::Founder,
            activity_tier: ActivityTier::High,
        },
        Classification {
            participant_id: pid("member"),
            participant_type: ParticipantType::Base,
            activity_tier: ActivityTier::Mid,
        },
    ];
    let outcome = engine.distribute(BUDGET, &classes).unwrap();
    let founder_claim = outcome.shares[&pid("founder")].claimed;
    let member_claim = outcome.shares[&pid("member")].claimed;
    let unclaimed: u64 = outcome
        .pools
        .iter()
        .filter(|p| !p.to_reserve)
        .map(|p| p.unclaimed)
        .sum();
    assert_eq!(founder_claim, 6_400 * UNIT);
    assert_eq!(founder_claim + member_claim + unclaimed, 8_000 * UNIT);
    assert_eq!(outcome.participant_rewards, entry.participant_rewards);
}

#[tokio::test]
async fn active_founder_out_earns_inactive_founder() {
    let h = Harness::new(vec![
        founder("busy", 500, 0.9),
        founder("idle", 500, 0.1),
        record("someone", 500, 0.5),
    ]);
    for epoch in 0..4 {
        h.events
            .push(contribution(&format!("busy-{epoch}"), "busy", epoch, 120));
        h.coordinator.tick(BUDGET, epoch).await.unwrap();

        let entry = h.coordinator.get_entry(epoch).unwrap();
        let busy = entry.reward_of(&pid("busy")).unwrap_or(0);
        let idle = entry.reward_of(&pid("idle")).unwrap_or(0);
        assert!(busy > idle, "epoch {epoch}: busy {busy} <= idle {idle}");
    }
}

#[tokio::test]
async fn holdings_grow_by_budget_every_tick() {
    let h = Harness::new(vec![
        record("a", 2_000, 0.95),
        record("b", 300, 0.4),
        record("c", 50, 0.05),
        record("d", 0, 0.0),
    ]);
    let mut expected = 2_350 * UNIT;
    for epoch in 0..5 {
        if epoch % 2 == 0 {
            h.events.push(contribution(&format!("a-{epoch}"), "a", epoch, 40));
        }
        let report = h.coordinator.tick(BUDGET, epoch * 60).await.unwrap();
        expected += BUDGET;
        assert_eq!(h.coordinator.total_holdings(), expected);

        let entry = h.coordinator.get_entry(epoch).unwrap();
        assert_eq!(entry.total_distributed, BUDGET);
        assert_eq!(entry.pool_allocations.values().sum::<u64>(), BUDGET);
        assert_eq!(entry.participant_rewards.values().sum::<u64>(), BUDGET);
        assert_eq!(
            report.routing.network_credit + report.routing.treasury_credit,
            report.routing.decayed_total
        );
    }
    h.coordinator.verify_all().unwrap();
}

#[tokio::test]
async fn bad_records_sit_out_without_blocking_the_tick() {
    let mut bad_score = record("overscored", 10, 0.5);
    bad_score.activity_score = 1.5;
    let mut negative = record("negative", 10, 0.5);
    negative.balance = -5;

    let h = Harness::new(vec![record("fine", 100, 0.6), bad_score, negative]);
    let report = h.coordinator.tick(BUDGET, 0).await.unwrap();

    let mut excluded: Vec<&str> = report
        .excluded
        .iter()
        .map(|e| e.participant_id.as_str())
        .collect();
    excluded.sort_unstable();
    assert_eq!(excluded, ["negative", "overscored"]);

    let entry = h.coordinator.get_entry(0).unwrap();
    assert!(entry.reward_of(&pid("fine")).is_some());
    assert!(entry.reward_of(&pid("negative")).is_none());
}

// ---------------------------------------------------------------------------
// Ledger integrity
// ---------------------------------------------------------------------------

#[tokio::test]
async fn rehashed_reward_tamper_fails_at_that_epoch() {
    let h = Harness::new(vec![
        record("alice", 800, 0.8),
        record("bob", 200, 0.3),
        record("carol", 50, 0.6),
    ]);
    for epoch in 0..5 {
        h.coordinator.tick(BUDGET, epoch).await.unwrap();
    }
    h.coordinator.verify_all().unwrap();

    let tampered = h.coordinator.with_ledger_mut(|ledger| {
        ledger.store_mut().tamper_entry(2, |entry| {
            // Shift one unit between participants: sums still balance.
            *entry.participant_rewards.get_mut(&pid("alice")).unwrap() += 1;
            *entry.participant_rewards.get_mut(&pid("bob")).unwrap() -= 1;
            entry.entry_hash = entry.compute_hash().unwrap();
        })
    });
    assert!(tampered);

    let err = h.coordinator.verify_chain(0, 4).unwrap_err();
    match err {
        LedgerError::Integrity(e) => assert_eq!(e.epoch(), 2),
        other => panic!("expected integrity failure, got {other:?}"),
    }
    // Epochs before the tamper still verify.
    h.coordinator.verify_chain(0, 1).unwrap();

    assert_eq!(h.coordinator.halted_at().unwrap(), Some(2));
    assert_eq!(
        h.coordinator.tick(BUDGET, 5).await.unwrap_err(),
        TickError::Ledger(LedgerError::Integrity(ChainIntegrityError::Halted(2)))
    );
}

#[tokio::test]
async fn proofs_verify_against_committed_roots() {
    let h = Harness::new(
        (0..9)
            .map(|i| record(&format!("p{i}"), 100 * (i + 1), 0.1 * i as f64))
            .collect(),
    );
    h.coordinator.tick(BUDGET, 0).await.unwrap();

    let root = h.coordinator.merkle_root(0).unwrap();
    let entry = h.coordinator.get_entry(0).unwrap();
    for (id, amount) in &entry.participant_rewards {
        let proof = h.coordinator.merkle_proof(0, id).unwrap();
        assert_eq!(proof.amount, *amount);
        assert!(proof.verify(&root), "proof for {id} failed");
    }
    assert!(matches!(
        h.coordinator.merkle_proof(0, &pid("stranger")),
        Err(LedgerError::ParticipantNotInEpoch { .. })
    ));
}

// ---------------------------------------------------------------------------
// Sentinel
// ---------------------------------------------------------------------------

#[test]
fn six_identical_rewards_raise_one_sybil_alert() {
    let rewards: Vec<(String, u64)> = (0..6).map(|i| (format!("twin-{i}"), 42 * UNIT)).collect();
    let refs: Vec<(&str, u64)> = rewards.iter().map(|(id, amt)| (id.as_str(), *amt)).collect();
    let entry = sealed_entry(0, &refs);

    let mut sentinel = ParticipationSentinel::new(Default::default());
    let alerts = sentinel.analyze(&entry);

    assert_eq!(alerts.len(), 1);
    let alert = &alerts[0];
    assert_eq!(alert.alert_type, AlertType::SybilPattern);
    assert_eq!(alert.participant_ids.len(), 6);
    match &alert.evidence {
        Evidence::Sybil { group_size, .. } => assert_eq!(*group_size, 6),
        other => panic!("unexpected evidence {other:?}"),
    }
}

#[test]
fn spread_rewards_raise_nothing() {
    let entry = sealed_entry(
        0,
        &[("a", 10 * UNIT), ("b", 13 * UNIT), ("c", 17 * UNIT), ("d", 21 * UNIT), ("e", 30 * UNIT)],
    );
    let mut sentinel = ParticipationSentinel::new(Default::default());
    assert!(sentinel.analyze(&entry).is_empty());
}

#[tokio::test]
async fn committed_sybil_epoch_reaches_subscribers_and_log() {
    let (sentinel, _task) = spawn_sentinel(
        ParticipationSentinel::new(Default::default()),
        Box::new(MemoryAlertLog::new()),
    );
    let mut alerts = sentinel.subscribe_alerts();

    let h = Harness::new((0..6).map(|i| record(&format!("clone-{i}"), 42, 0.5)).collect());
    let coordinator = h.coordinator.with_sentinel(sentinel.clone());
    coordinator.tick(BUDGET, 0).await.unwrap();

    let alert = tokio::time::timeout(Duration::from_secs(2), alerts.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(alert.alert_type, AlertType::SybilPattern);
    assert_eq!(alert.participant_ids.len(), 6);
    assert!(alert.participant_ids.iter().all(|id| !id.is_reserve()));
    assert_eq!(sentinel.alerts(0, 0).unwrap().len(), 1);
}
