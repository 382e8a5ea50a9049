//! The participation sentinel: runs every check over a committed entry.
//!
//! Read-only with respect to the ledger. Reserve accounts are ignored.
//! Entries must arrive in epoch order; stale or repeated entries are skipped
//! so the velocity baselines are advanced exactly once per epoch.

use std::collections::BTreeMap;

use ebb_core::ledger::EpochEntry;
use ebb_core::policy::SentinelPolicy;
use ebb_core::types::ParticipantId;
use tracing::{debug, info};

use crate::alert::SentinelAlert;
use crate::checks::{check_concentration, check_sybil, check_velocity, RewardBaseline};

#[derive(Debug, Clone)]
pub struct ParticipationSentinel {
    policy: SentinelPolicy,
    baselines: BTreeMap<ParticipantId, RewardBaseline>,
    last_epoch: Option<u64>,
}

impl ParticipationSentinel {
    pub fn new(policy: SentinelPolicy) -> Self {
        Self {
            policy,
            baselines: BTreeMap::new(),
            last_epoch: None,
        }
    }

    pub fn policy(&self) -> &SentinelPolicy {
        &self.policy
    }

    pub fn set_policy(&mut self, policy: SentinelPolicy) {
        for baseline in self.baselines.values_mut() {
            baseline.set_window(policy.velocity_window_epochs);
        }
        self.policy = policy;
    }

    pub fn last_epoch(&self) -> Option<u64> {
        self.last_epoch
    }

    /// Screen one committed entry. Velocity is judged against history up to
    /// the previous epoch; this epoch's rewards join the baselines afterwards.
    pub fn analyze(&mut self, entry: &EpochEntry) -> Vec<SentinelAlert> {
        if self.last_epoch.is_some_and(|last| entry.epoch_number <= last) {
            debug!(epoch = entry.epoch_number, "entry already analyzed, skipping");
            return Vec::new();
        }

        let rewards: Vec<(&ParticipantId, u64)> =
            entry.participant_only().map(|(id, r)| (id, *r)).collect();
        let epoch = entry.epoch_number;

        let mut alerts = Vec::new();
        alerts.extend(check_concentration(epoch, &rewards, &self.policy));
        alerts.extend(check_velocity(epoch, &rewards, &self.baselines, &self.policy));
        alerts.extend(check_sybil(epoch, &rewards, &self.policy));

        let window = self.policy.velocity_window_epochs;
        for (id, reward) in &rewards {
            self.baselines
                .entry((*id).clone())
                .or_insert_with(|| RewardBaseline::new(window))
                .push(*reward);
        }
        self.last_epoch = Some(epoch);

        for alert in &alerts {
            info!(
                epoch,
                alert_type = %alert.alert_type,
                severity_bps = alert.severity_bps,
                participants = alert.participant_ids.len(),
                "sentinel alert"
            );
        }
        debug!(epoch, participants = rewards.len(), alerts = alerts.len(), "epoch analyzed");
        alerts
    }
}
