//! Participant classification: sticky type, rolling activity tier.
//!
//! Type only moves up, and only through an elevation quorum: enough distinct
//! participants already at (or above) the target type must approve. Founding
//! members start at [`ParticipantType::Founder`].
//!
//! The activity tier is recomputed every epoch from the magnitude of
//! contributions inside a rolling window. Each run of `idle_step_epochs`
//! consecutive idle epochs steps the tier down one level; new activity lifts
//! it straight back to whatever the window supports.
//!
//! Classification is two-phase so an aborted tick leaves no trace:
//! [`ParticipantClassifier::plan`] computes classifications and the next
//! state without mutating anything, [`ParticipantClassifier::commit`]
//! installs it. The committed part is a [`ClassifierState`], which the
//! ledger stores with each entry.
//!
//! Event ids are remembered for `dedup_horizon_epochs`. Events dated before
//! that horizon are dropped as stale, so a feed that redelivers its whole log
//! never replays them.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::ClassifierError;
use crate::policy::ClassifierPolicy;
use crate::types::{ActivityTier, Classification, ParticipantId, ParticipantType, Wallet};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    Contribution { magnitude: u64 },
    Collaboration { magnitude: u64 },
    /// `approver` endorses raising the event's participant to `target_type`.
    ElevationApproval { target_type: u8, approver: String },
}

/// One entry of the engagement event stream. Delivery is at-least-once.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct EngagementEvent {
    pub event_id: String,
    pub participant_id: String,
    pub epoch: u64,
    pub kind: EventKind,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RecordOutcome {
    pub accepted: usize,
    pub duplicates: usize,
    /// Events older than the dedup horizon.
    pub stale: usize,
    pub rejected: Vec<(String, ClassifierError)>,
    /// Participants whose type was raised by approvals in this batch.
    pub elevated: Vec<(ParticipantId, ParticipantType)>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, bincode::Encode, bincode::Decode)]
struct History {
    participant_type: ParticipantType,
    tier: ActivityTier,
    idle_epochs: u64,
    /// `(epoch, magnitude)` of contributions, oldest first.
    window: VecDeque<(u64, u64)>,
    /// Activity recorded since the last committed classification.
    pending_activity: bool,
    approvals: BTreeMap<ParticipantType, BTreeSet<ParticipantId>>,
    last_classified: Option<u64>,
}

impl History {
    fn window_sum(&self, epoch: u64, window_epochs: u64) -> u64 {
        let start = epoch.saturating_sub(window_epochs.saturating_sub(1));
        self.window
            .iter()
            .filter(|(e, _)| *e >= start && *e <= epoch)
            .fold(0u64, |acc, (_, m)| acc.saturating_add(*m))
    }
}

/// Classifications for one epoch plus the state to install on commit.
#[derive(Clone, Debug)]
pub struct ClassificationPlan {
    pub epoch: u64,
    pub classifications: Vec<Classification>,
    next: BTreeMap<ParticipantId, History>,
}

/// Committed classifier state: participant histories and recent event ids.
#[derive(Clone, Debug, Default, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct ClassifierState {
    histories: BTreeMap<ParticipantId, History>,
    /// Event id → epoch it was recorded for.
    seen_events: BTreeMap<String, u64>,
}

impl ClassifierState {
    pub fn participant_count(&self) -> usize {
        self.histories.len()
    }
}

#[derive(Clone, Debug)]
pub struct ParticipantClassifier {
    policy: ClassifierPolicy,
    state: ClassifierState,
}

impl ParticipantClassifier {
    pub fn new(policy: ClassifierPolicy) -> Self {
        Self::from_state(policy, ClassifierState::default())
    }

    /// Resume from a previously committed state.
    pub fn from_state(policy: ClassifierPolicy, state: ClassifierState) -> Self {
        Self { policy, state }
    }

    pub fn state(&self) -> &ClassifierState {
        &self.state
    }

    /// Swap in a new (already validated) policy. History is kept.
    pub fn set_policy(&mut self, policy: ClassifierPolicy) {
        self.policy = policy;
    }

    pub fn participant_type(&self, id: &ParticipantId) -> Option<ParticipantType> {
        self.state.histories.get(id).map(|h| h.participant_type)
    }

    pub fn activity_tier(&self, id: &ParticipantId) -> Option<ActivityTier> {
        self.state.histories.get(id).map(|h| h.tier)
    }

    /// Seed a participant's type, e.g. from an external registry. Never lowers it.
    pub fn register(&mut self, id: ParticipantId, participant_type: ParticipantType) {
        let history = self.state.histories.entry(id).or_default();
        history.participant_type = history.participant_type.max(participant_type);
    }

    fn tier_for(&self, magnitude: u64) -> ActivityTier {
        if magnitude >= self.policy.tier2_min_magnitude {
            ActivityTier::High
        } else if magnitude >= self.policy.tier1_min_magnitude {
            ActivityTier::Mid
        } else {
            ActivityTier::Low
        }
    }

    /// Fold a batch of engagement events into participant histories.
    ///
    /// Events already seen (by id) are dropped, as are events dated before
    /// the dedup horizon. Events dated after `current_epoch` are rejected.
    pub fn record_events(&mut self, events: &[EngagementEvent], current_epoch: u64) -> RecordOutcome {
        let mut outcome = RecordOutcome::default();
        let horizon = current_epoch.saturating_sub(self.policy.dedup_horizon_epochs);

        for event in events {
            if self.state.seen_events.contains_key(&event.event_id) {
                outcome.duplicates += 1;
                continue;
            }
            // Ids this old are no longer remembered, so it may be a replay.
            if event.epoch < horizon {
                outcome.stale += 1;
                continue;
            }
            match self.record_one(event, current_epoch) {
                Ok(elevated) => {
                    self.state.seen_events.insert(event.event_id.clone(), event.epoch);
                    outcome.accepted += 1;
                    if let Some(e) = elevated {
                        outcome.elevated.push(e);
                    }
                }
                Err(e) => {
                    warn!(event_id = %event.event_id, participant = %event.participant_id, error = %e, "event rejected");
                    outcome.rejected.push((event.event_id.clone(), e));
                }
            }
        }

        if outcome.duplicates > 0 || outcome.stale > 0 {
            debug!(
                duplicates = outcome.duplicates,
                stale = outcome.stale,
                "dropped redelivered events"
            );
        }
        outcome
    }

    fn record_one(
        &mut self,
        event: &EngagementEvent,
        current_epoch: u64,
    ) -> Result<Option<(ParticipantId, ParticipantType)>, ClassifierError> {
        if event.event_id.is_empty() {
            return Err(ClassifierError::EmptyEventId);
        }
        if event.epoch > current_epoch {
            return Err(ClassifierError::FutureEvent {
                event_id: event.event_id.clone(),
                epoch: event.epoch,
                current: current_epoch,
            });
        }
        let participant = ParticipantId::parse(event.participant_id.clone())
            .map_err(|_| ClassifierError::UnknownParticipant(event.participant_id.clone()))?;

        match &event.kind {
            EventKind::Contribution { magnitude } | EventKind::Collaboration { magnitude } => {
                let history = self.state.histories.entry(participant).or_default();
                history.window.push_back((event.epoch, *magnitude));
                history.pending_activity = true;
                Ok(None)
            }
            EventKind::ElevationApproval { target_type, approver } => {
                let target = ParticipantType::from_index(*target_type)
                    .ok_or(ClassifierError::InvalidType(*target_type))?;
                let approver = ParticipantId::parse(approver.clone())
                    .map_err(|_| ClassifierError::UnknownParticipant(approver.clone()))?;
                if approver == participant {
                    return Err(ClassifierError::SelfApproval(participant.to_string()));
                }
                let approver_type = self
                    .state
                    .histories
                    .get(&approver)
                    .map(|h| h.participant_type)
                    .ok_or_else(|| ClassifierError::UnknownParticipant(approver.to_string()))?;
                if approver_type < target {
                    return Err(ClassifierError::UnauthorizedApprover {
                        approver: approver.to_string(),
                        target: *target_type,
                    });
                }

                let quorum = self.policy.elevation_quorum;
                let history = self.state.histories.entry(participant.clone()).or_default();
                if history.participant_type >= target {
                    return Ok(None);
                }
                let approvers = history.approvals.entry(target).or_default();
                approvers.insert(approver);
                if approvers.len() < quorum {
                    return Ok(None);
                }

                history.participant_type = target;
                history.approvals.retain(|t, _| *t > target);
                info!(participant = %participant, new_type = target.index(), "participant elevated");
                Ok(Some((participant, target)))
            }
        }
    }

    /// Classify the given wallets for `epoch` without mutating state.
    pub fn plan(&self, wallets: &[Wallet], epoch: u64) -> ClassificationPlan {
        let window_epochs = self.policy.window_epochs;
        let mut next = BTreeMap::new();
        let mut classifications = Vec::with_capacity(wallets.len());

        for wallet in wallets {
            let mut history = self
                .state
                .histories
                .get(&wallet.participant_id)
                .cloned()
                .unwrap_or_default();

            if wallet.is_founding_member {
                history.participant_type = history.participant_type.max(ParticipantType::Founder);
            }

            let already_classified = history.last_classified == Some(epoch);
            if !already_classified {
                let supported = self.tier_for(history.window_sum(epoch, window_epochs));
                if history.pending_activity {
                    history.idle_epochs = 0;
                    history.tier = supported;
                } else {
                    let gap = match history.last_classified {
                        Some(prev) => epoch.saturating_sub(prev).max(1),
                        None => 1,
                    };
                    let step = self.policy.idle_step_epochs.max(1);
                    let before = history.idle_epochs / step;
                    history.idle_epochs = history.idle_epochs.saturating_add(gap);
                    for _ in before..history.idle_epochs / step {
                        history.tier = history.tier.step_down();
                    }
                    history.tier = history.tier.min(supported);
                }
                history.pending_activity = false;
                history.last_classified = Some(epoch);
                let start = epoch.saturating_sub(window_epochs.saturating_sub(1));
                history.window.retain(|(e, _)| *e >= start);
            }

            debug!(
                epoch,
                participant = %wallet.participant_id,
                participant_type = history.participant_type.index(),
                tier = history.tier.index(),
                "classified"
            );
            classifications.push(Classification {
                participant_id: wallet.participant_id.clone(),
                participant_type: history.participant_type,
                activity_tier: history.tier,
            });
            next.insert(wallet.participant_id.clone(), history);
        }

        ClassificationPlan {
            epoch,
            classifications,
            next,
        }
    }

    /// Install a plan's state and expire old event ids.
    pub fn commit(&mut self, plan: ClassificationPlan) {
        self.state.histories.extend(plan.next);
        let horizon = plan.epoch.saturating_sub(self.policy.dedup_horizon_epochs);
        self.state.seen_events.retain(|_, e| *e >= horizon);
    }

    pub fn seen_event_count(&self) -> usize {
        self.state.seen_events.len()
    }
}
