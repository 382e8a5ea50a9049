//! Epoch budget distribution.
//!
//! The budget is split across the configured pools by basis points. Each
//! participant pool is then divided among the participants allowed to draw
//! from it (type `>= pool index`): every eligible participant claims
//! `allocation * activity_share[tier]`, and the whole allocation is
//! apportioned by claim weight. That gives every claimant their claim plus a
//! pro-rata slice of the unclaimed remainder, or scales claims down when a
//! pool is oversubscribed. Nothing is left idle: pools with no eligible
//! participant and the reserve pools are credited to reserve accounts.
//!
//! All arithmetic is integer. Rounding leftovers are handed out one minor
//! unit at a time by largest remainder, ties going to the smaller
//! participant id, so the output is deterministic and conserves value exactly.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::constants::BPS_PRECISION;
use crate::error::ConservationViolation;
use crate::policy::{DistributionPolicy, PoolConfig};
use crate::types::{Classification, ParticipantId};

/// What happened inside one pool.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PoolOutcome {
    pub name: String,
    pub allocation: u64,
    /// Sum of raw claims (may exceed `allocation`).
    pub claimed: u64,
    /// Portion of the allocation not covered by claims, redistributed pro-rata.
    pub unclaimed: u64,
    pub oversubscribed: bool,
    /// Set when the whole allocation went to the pool's reserve account.
    pub to_reserve: bool,
    pub eligible: usize,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct ParticipantShare {
    /// Raw claims summed over accessible pools.
    pub claimed: u64,
    /// Final reward after apportionment.
    pub reward: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DistributionOutcome {
    pub total_distributed: u64,
    pub pool_allocations: BTreeMap<String, u64>,
    /// Final rewards, reserve accounts included. Zero rewards are omitted.
    pub participant_rewards: BTreeMap<ParticipantId, u64>,
    pub pools: Vec<PoolOutcome>,
    pub shares: BTreeMap<ParticipantId, ParticipantShare>,
}

impl DistributionOutcome {
    pub fn reserve_total(&self) -> u64 {
        self.participant_rewards
            .iter()
            .filter(|(id, _)| id.is_reserve())
            .map(|(_, amt)| *amt)
            .sum()
    }
}

/// Split `total` across `weights` proportionally, exactly.
///
/// Floors first, then hands out the leftover units by largest fractional
/// remainder (ties to the smaller id). When every weight is zero the total is
/// split evenly the same way. Output is aligned with `weights`.
pub fn apportion(total: u64, weights: &[(&ParticipantId, u64)]) -> Vec<u64> {
    if weights.is_empty() {
        return Vec::new();
    }

    let weight_sum: u128 = weights.iter().map(|(_, w)| *w as u128).sum();
    let (effective, denom): (Vec<u128>, u128) = if weight_sum == 0 {
        (vec![1; weights.len()], weights.len() as u128)
    } else {
        (weights.iter().map(|(_, w)| *w as u128).collect(), weight_sum)
    };

    let total_wide = total as u128;
    let mut shares = Vec::with_capacity(weights.len());
    let mut remainders = Vec::with_capacity(weights.len());
    let mut assigned: u128 = 0;
    for (i, w) in effective.iter().enumerate() {
        let product = total_wide * w;
        let share = product / denom;
        assigned += share;
        shares.push(share as u64);
        remainders.push((product % denom, i));
    }

    // Leftover is strictly less than the number of participants.
    let leftover = (total_wide - assigned) as usize;
    remainders.sort_by(|(ra, ia), (rb, ib)| rb.cmp(ra).then_with(|| weights[*ia].0.cmp(weights[*ib].0)));
    for (_, i) in remainders.into_iter().take(leftover) {
        shares[i] += 1;
    }
    shares
}

#[derive(Clone, Debug)]
pub struct DistributionEngine {
    pools: PoolConfig,
    policy: DistributionPolicy,
}

impl DistributionEngine {
    pub fn new(pools: PoolConfig, policy: DistributionPolicy) -> Self {
        Self { pools, policy }
    }

    /// Split `budget` across pools by bps. The rounding remainder goes to the
    /// last pool, so the allocations always sum to `budget`.
    pub fn allocate_pools(&self, budget: u64) -> Result<Vec<(String, u64)>, ConservationViolation> {
        let mut allocations = Vec::with_capacity(self.pools.len());
        let mut assigned: u64 = 0;
        for pool in &self.pools.pools {
            let amount = (budget as u128 * pool.bps as u128 / BPS_PRECISION as u128) as u64;
            assigned = assigned
                .checked_add(amount)
                .ok_or(ConservationViolation::Overflow)?;
            allocations.push((pool.name.clone(), amount));
        }

        let remainder = budget
            .checked_sub(assigned)
            .ok_or(ConservationViolation::PoolSum { expected: budget, got: assigned })?;
        if let Some(last) = allocations.last_mut() {
            last.1 += remainder;
        }
        Ok(allocations)
    }

    /// Distribute `budget` across the classified participants.
    pub fn distribute(
        &self,
        budget: u64,
        classifications: &[Classification],
    ) -> Result<DistributionOutcome, ConservationViolation> {
        let allocations = self.allocate_pools(budget)?;

        let mut rewards: BTreeMap<ParticipantId, u64> = BTreeMap::new();
        let mut shares: BTreeMap<ParticipantId, ParticipantShare> = BTreeMap::new();
        let mut pools = Vec::with_capacity(allocations.len());

        for (index, (name, allocation)) in allocations.iter().enumerate() {
            let allocation = *allocation;
            let eligible: Vec<&Classification> = if PoolConfig::is_participant_pool(index) {
                classifications
                    .iter()
                    .filter(|c| c.participant_type.can_draw(index))
                    .collect()
            } else {
                Vec::new()
            };

            if eligible.is_empty() {
                credit(&mut rewards, ParticipantId::reserve(name), allocation)?;
                pools.push(PoolOutcome {
                    name: name.clone(),
                    allocation,
                    claimed: 0,
                    unclaimed: allocation,
                    oversubscribed: false,
                    to_reserve: true,
                    eligible: 0,
                });
                continue;
            }

            let claims: Vec<(&ParticipantId, u64)> = eligible
                .iter()
                .map(|c| {
                    let share_bps = self.policy.activity_share_bps[c.activity_tier.index()];
                    let claim = (allocation as u128 * share_bps as u128 / BPS_PRECISION as u128) as u64;
                    (&c.participant_id, claim)
                })
                .collect();
            let claimed = claims
                .iter()
                .try_fold(0u64, |acc, (_, c)| acc.checked_add(*c))
                .ok_or(ConservationViolation::Overflow)?;

            let finals = apportion(allocation, &claims);
            for ((id, claim), reward) in claims.iter().zip(&finals) {
                trace!(pool = %name, participant = %id, claim, reward, "pool share");
                let entry = shares.entry((*id).clone()).or_default();
                entry.claimed = entry.claimed.saturating_add(*claim);
                entry.reward = entry.reward.saturating_add(*reward);
                credit(&mut rewards, (*id).clone(), *reward)?;
            }

            pools.push(PoolOutcome {
                name: name.clone(),
                allocation,
                claimed,
                unclaimed: allocation.saturating_sub(claimed),
                oversubscribed: claimed > allocation,
                to_reserve: false,
                eligible: eligible.len(),
            });
        }

        rewards.retain(|_, amount| *amount > 0);

        let outcome = DistributionOutcome {
            total_distributed: budget,
            pool_allocations: allocations.into_iter().collect(),
            participant_rewards: rewards,
            pools,
            shares,
        };
        check_conservation(
            outcome.total_distributed,
            &outcome.pool_allocations,
            &outcome.participant_rewards,
            self.policy.rounding_tolerance,
        )?;

        debug!(
            budget,
            participants = outcome.shares.len(),
            reserve = outcome.reserve_total(),
            "distribution computed"
        );
        Ok(outcome)
    }
}

fn credit(
    rewards: &mut BTreeMap<ParticipantId, u64>,
    id: ParticipantId,
    amount: u64,
) -> Result<(), ConservationViolation> {
    let slot = rewards.entry(id).or_insert(0);
    *slot = slot.checked_add(amount).ok_or(ConservationViolation::Overflow)?;
    Ok(())
}

/// Check that pool allocations sum to `total` exactly and rewards sum to it
/// within `tolerance`.
pub fn check_conservation<'a, P, R>(
    total: u64,
    pool_allocations: P,
    participant_rewards: R,
    tolerance: u64,
) -> Result<(), ConservationViolation>
where
    P: IntoIterator<Item = (&'a String, &'a u64)>,
    R: IntoIterator<Item = (&'a ParticipantId, &'a u64)>,
{
    let pool_sum = pool_allocations
        .into_iter()
        .try_fold(0u64, |acc, (_, v)| acc.checked_add(*v))
        .ok_or(ConservationViolation::Overflow)?;
    if pool_sum != total {
        return Err(ConservationViolation::PoolSum {
            expected: total,
            got: pool_sum,
        });
    }

    let reward_sum = participant_rewards
        .into_iter()
        .try_fold(0u64, |acc, (_, v)| acc.checked_add(*v))
        .ok_or(ConservationViolation::Overflow)?;
    if reward_sum.abs_diff(total) > tolerance {
        return Err(ConservationViolation::RewardSum {
            expected: total,
            got: reward_sum,
            tolerance,
        });
    }
    Ok(())
}
