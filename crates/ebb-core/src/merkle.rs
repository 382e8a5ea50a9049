//! BLAKE3 Merkle tree over an epoch's `(participant_id, reward)` pairs.
//!
//! Uses domain-separated hashing to prevent second-preimage attacks:
//! - Leaf hash: `BLAKE3(0x00 || len(id) as u32 LE || id || amount as u64 LE)`
//! - Internal node: `BLAKE3(0x01 || left || right)`
//!
//! Pairs are sorted by participant id before hashing, so the root does not
//! depend on input order. Odd-length layers duplicate their last element.
//! Empty trees produce [`Hash256::ZERO`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{Hash256, ParticipantId};

const LEAF_PREFIX: u8 = 0x00;
const NODE_PREFIX: u8 = 0x01;

/// Domain-separated leaf hash of one reward pair.
pub fn reward_leaf(participant: &ParticipantId, amount: u64) -> Hash256 {
    let id = participant.as_str().as_bytes();
    let mut hasher = blake3::Hasher::new();
    hasher.update(&[LEAF_PREFIX]);
    hasher.update(&(id.len() as u32).to_le_bytes());
    hasher.update(id);
    hasher.update(&amount.to_le_bytes());
    Hash256(hasher.finalize().into())
}

/// Domain-separated internal node hash: `BLAKE3(0x01 || left || right)`.
pub fn node_hash(left: &Hash256, right: &Hash256) -> Hash256 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&[NODE_PREFIX]);
    hasher.update(left.as_bytes());
    hasher.update(right.as_bytes());
    Hash256(hasher.finalize().into())
}

fn next_layer(layer: &[Hash256]) -> Vec<Hash256> {
    let mut next = Vec::with_capacity(layer.len().div_ceil(2));
    for pair in layer.chunks(2) {
        let left = &pair[0];
        let right = pair.get(1).unwrap_or(left);
        next.push(node_hash(left, right));
    }
    next
}

/// Merkle root over arbitrary-order reward pairs.
///
/// Sorts by participant id first. Cheaper than building a [`RewardTree`]
/// when no proofs are needed.
pub fn rewards_root<'a, I>(rewards: I) -> Hash256
where
    I: IntoIterator<Item = (&'a ParticipantId, &'a u64)>,
{
    let mut pairs: Vec<(&ParticipantId, u64)> =
        rewards.into_iter().map(|(id, amount)| (id, *amount)).collect();
    if pairs.is_empty() {
        return Hash256::ZERO;
    }
    pairs.sort_by(|a, b| a.0.cmp(b.0));

    let mut current: Vec<Hash256> = pairs.iter().map(|(id, amt)| reward_leaf(id, *amt)).collect();
    while current.len() > 1 {
        current = next_layer(&current);
    }
    current[0]
}

/// Full reward tree supporting inclusion proofs.
#[derive(Clone, Debug)]
pub struct RewardTree {
    /// Sorted `(participant, amount)` pairs; index matches the leaf layer.
    leaves: Vec<(ParticipantId, u64)>,
    /// `layers[0]` = leaf hashes, `layers[last]` = `[root]`.
    layers: Vec<Vec<Hash256>>,
}

impl RewardTree {
    pub fn from_rewards(rewards: &BTreeMap<ParticipantId, u64>) -> Self {
        // BTreeMap iteration is already sorted by participant id.
        let leaves: Vec<(ParticipantId, u64)> =
            rewards.iter().map(|(id, amt)| (id.clone(), *amt)).collect();
        if leaves.is_empty() {
            return Self {
                leaves,
                layers: Vec::new(),
            };
        }

        let mut layers = vec![leaves
            .iter()
            .map(|(id, amt)| reward_leaf(id, *amt))
            .collect::<Vec<_>>()];
        while let Some(last) = layers.last() {
            if last.len() <= 1 {
                break;
            }
            let next = next_layer(last);
            layers.push(next);
        }

        Self { leaves, layers }
    }

    pub fn root(&self) -> Hash256 {
        self.layers
            .last()
            .and_then(|l| l.first())
            .copied()
            .unwrap_or(Hash256::ZERO)
    }

    pub fn leaf_count(&self) -> usize {
        self.leaves.len()
    }

    /// Inclusion proof for `participant`, or `None` if they have no reward leaf.
    pub fn proof(&self, participant: &ParticipantId) -> Option<RewardProof> {
        let index = self
            .leaves
            .binary_search_by(|(id, _)| id.cmp(participant))
            .ok()?;
        self.proof_at(index)
    }

    fn proof_at(&self, index: usize) -> Option<RewardProof> {
        let (participant, amount) = self.leaves.get(index)?.clone();
        let mut path = Vec::new();
        let mut pos = index;

        for layer in &self.layers[..self.layers.len() - 1] {
            let sibling = layer.get(pos ^ 1).copied().unwrap_or(layer[pos]);
            let side = if pos % 2 == 0 { Side::Right } else { Side::Left };
            path.push(ProofStep { hash: sibling, side });
            pos /= 2;
        }

        Some(RewardProof {
            leaf_index: index,
            participant,
            amount,
            path,
        })
    }
}

/// Which side a sibling hash is on relative to the current node.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub enum Side {
    Left,
    Right,
}

#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct ProofStep {
    pub hash: Hash256,
    pub side: Side,
}

/// Proof that `participant` received `amount` in an epoch with a given root.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct RewardProof {
    pub leaf_index: usize,
    pub participant: ParticipantId,
    pub amount: u64,
    /// Sibling hashes from leaf level up to root.
    pub path: Vec<ProofStep>,
}

impl RewardProof {
    /// Recompute the root from the leaf and sibling path and compare.
    pub fn verify(&self, expected_root: &Hash256) -> bool {
        let mut current = reward_leaf(&self.participant, self.amount);
        for step in &self.path {
            current = match step.side {
                Side::Left => node_hash(&step.hash, &current),
                Side::Right => node_hash(&current, &step.hash),
            };
        }
        current == *expected_root
    }
}
