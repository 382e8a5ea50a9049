//! Statistical checks over one epoch's participant rewards.
//!
//! Each check is independent and pure; the stateful velocity baseline lives
//! in [`RewardBaseline`] and is advanced by the caller after the checks run.
//! All arithmetic is integer.

use std::collections::{BTreeMap, VecDeque};

use ebb_core::constants::BPS_PRECISION;
use ebb_core::policy::SentinelPolicy;
use ebb_core::types::ParticipantId;

use crate::alert::{AlertType, Earner, Evidence, SentinelAlert};

/// Gini coefficient of `values`, in basis points.
///
/// Sorted ascending, `G = Σ (2i - n + 1) * x_i / (n * Σx)` for 0-based `i`.
/// Returns 0 for fewer than two values or a zero total.
///
/// ```
/// use ebb_sentinel::checks::gini_bps;
///
/// assert_eq!(gini_bps(&[5, 5, 5, 5]), 0);
/// assert_eq!(gini_bps(&[0, 0, 0, 100]), 7_500);
/// ```
pub fn gini_bps(values: &[u64]) -> u64 {
    let n = values.len();
    if n < 2 {
        return 0;
    }
    let total: u128 = values.iter().map(|v| *v as u128).sum();
    if total == 0 {
        return 0;
    }

    let mut sorted = values.to_vec();
    sorted.sort_unstable();

    let n_i = n as i128;
    let numerator: i128 = sorted
        .iter()
        .enumerate()
        .map(|(i, x)| (2 * i as i128 - n_i + 1) * *x as i128)
        .sum();
    let gini = numerator.max(0) as u128 * BPS_PRECISION as u128 / (n as u128 * total);
    gini.min(BPS_PRECISION as u128) as u64
}

/// Rolling per-participant reward history for the velocity check.
///
/// # Invariants
///
/// * `rewards.len() <= window`
/// * `sum` equals `rewards.iter().sum::<u64>()` (saturating)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewardBaseline {
    rewards: VecDeque<u64>,
    sum: u64,
    window: usize,
}

impl RewardBaseline {
    /// Create an empty baseline that keeps at most `window` epochs.
    ///
    /// ```
    /// use ebb_sentinel::checks::RewardBaseline;
    ///
    /// let b = RewardBaseline::new(30);
    /// assert_eq!(b.epoch_count(), 0);
    /// assert_eq!(b.mean(), 0);
    /// ```
    pub fn new(window: usize) -> Self {
        Self {
            rewards: VecDeque::with_capacity(window),
            sum: 0,
            window: window.max(1),
        }
    }

    /// Record one epoch's reward, evicting the oldest when full.
    ///
    /// ```
    /// use ebb_sentinel::checks::RewardBaseline;
    ///
    /// let mut b = RewardBaseline::new(2);
    /// b.push(100);
    /// b.push(200);
    /// b.push(600);
    /// assert_eq!(b.epoch_count(), 2);
    /// assert_eq!(b.mean(), 400);
    /// ```
    pub fn push(&mut self, reward: u64) {
        if self.rewards.len() == self.window {
            if let Some(oldest) = self.rewards.pop_front() {
                self.sum = self.sum.saturating_sub(oldest);
            }
        }
        self.rewards.push_back(reward);
        self.sum = self.sum.saturating_add(reward);
    }

    pub fn epoch_count(&self) -> usize {
        self.rewards.len()
    }

    /// Arithmetic mean; 0 when empty.
    pub fn mean(&self) -> u64 {
        match self.rewards.len() as u64 {
            0 => 0,
            count => self.sum / count,
        }
    }

    pub fn set_window(&mut self, window: usize) {
        self.window = window.max(1);
        while self.rewards.len() > self.window {
            if let Some(oldest) = self.rewards.pop_front() {
                self.sum = self.sum.saturating_sub(oldest);
            }
        }
    }
}

/// Fires when the Gini coefficient of participant rewards exceeds the
/// threshold. Severity is the Gini coefficient itself.
pub fn check_concentration(
    epoch: u64,
    rewards: &[(&ParticipantId, u64)],
    policy: &SentinelPolicy,
) -> Option<SentinelAlert> {
    let values: Vec<u64> = rewards.iter().map(|(_, r)| *r).collect();
    let gini = gini_bps(&values);
    if gini <= policy.gini_threshold_bps {
        return None;
    }

    let mut ranked: Vec<(&ParticipantId, u64)> = rewards.to_vec();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    ranked.truncate(policy.top_earners);

    let total: u128 = values.iter().map(|v| *v as u128).sum();
    let top_total: u128 = ranked.iter().map(|(_, r)| *r as u128).sum();
    let top_share_bps = if total == 0 {
        0
    } else {
        (top_total * BPS_PRECISION as u128 / total) as u64
    };

    Some(SentinelAlert {
        epoch_number: epoch,
        alert_type: AlertType::Concentration,
        severity_bps: gini,
        participant_ids: ranked.iter().map(|(id, _)| (*id).clone()).collect(),
        evidence: Evidence::Concentration {
            gini_bps: gini,
            top_earners: ranked
                .iter()
                .map(|(id, r)| Earner {
                    participant_id: (*id).clone(),
                    reward: *r,
                })
                .collect(),
            top_share_bps,
            participants: rewards.len(),
        },
        recommended_action: "review pool weights and top earners' activity for this epoch".into(),
    })
}

/// Fires for each participant whose reward exceeds `multiplier` times their
/// trailing average (average must be positive). Severity is the fraction of
/// the reward above that threshold.
pub fn check_velocity(
    epoch: u64,
    rewards: &[(&ParticipantId, u64)],
    baselines: &BTreeMap<ParticipantId, RewardBaseline>,
    policy: &SentinelPolicy,
) -> Vec<SentinelAlert> {
    let mut alerts = Vec::new();
    for (id, reward) in rewards {
        let Some(baseline) = baselines.get(*id) else {
            continue;
        };
        let average = baseline.mean();
        if average == 0 {
            continue;
        }
        let threshold = (average as u128) * policy.velocity_multiplier as u128;
        if (*reward as u128) <= threshold {
            continue;
        }

        let severity_bps =
            ((*reward as u128 - threshold) * BPS_PRECISION as u128 / *reward as u128) as u64;
        alerts.push(SentinelAlert {
            epoch_number: epoch,
            alert_type: AlertType::VelocityAnomaly,
            severity_bps,
            participant_ids: vec![(*id).clone()],
            evidence: Evidence::Velocity {
                reward: *reward,
                average,
                epochs_observed: baseline.epoch_count(),
            },
            recommended_action: "verify the engagement events behind this reward spike".into(),
        });
    }
    alerts
}

/// Groups participants by reward rounded to `sybil_precision`; every group
/// of at least `sybil_min_group` fires once. Severity grows with group size
/// and saturates at twice the minimum.
pub fn check_sybil(
    epoch: u64,
    rewards: &[(&ParticipantId, u64)],
    policy: &SentinelPolicy,
) -> Vec<SentinelAlert> {
    let precision = policy.sybil_precision.max(1);
    let mut groups: BTreeMap<u64, Vec<ParticipantId>> = BTreeMap::new();
    for (id, reward) in rewards {
        let rounded = reward.saturating_add(precision / 2) / precision;
        groups.entry(rounded).or_default().push((*id).clone());
    }

    let min_group = policy.sybil_min_group.max(1);
    groups
        .into_iter()
        .filter(|(_, ids)| ids.len() >= min_group)
        .map(|(rounded, mut ids)| {
            ids.sort();
            let size = ids.len();
            let severity_bps =
                (size as u64 * BPS_PRECISION / (2 * min_group as u64)).min(BPS_PRECISION);
            SentinelAlert {
                epoch_number: epoch,
                alert_type: AlertType::SybilPattern,
                severity_bps,
                participant_ids: ids,
                evidence: Evidence::Sybil {
                    rounded_reward: rounded.saturating_mul(precision),
                    group_size: size,
                },
                recommended_action: "check the group for shared registration or funding sources".into(),
            }
        })
        .collect()
}
