//! JSON-RPC audit API.
//!
//! Uses jsonrpsee 0.24 to expose read-only access to the ledger and the
//! alert log, plus an explicit policy reload. Merkle proofs are returned in
//! a self-contained form that [`ProofJson::verify`] checks offline.

use std::sync::Arc;

use jsonrpsee::core::async_trait;
use jsonrpsee::proc_macros::rpc;
use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::types::ErrorObjectOwned;
use serde::{Deserialize, Serialize};

use ebb_core::constants::RESERVE_PREFIX;
use ebb_core::error::{EbbError, LedgerError};
use ebb_core::ledger::EpochEntry;
use ebb_core::merkle::{ProofStep, RewardProof, Side};
use ebb_core::types::{Hash256, ParticipantId};
use ebb_sentinel::SentinelAlert;

use crate::node::Node;

/// JSON representation of a ledger entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryJson {
    pub epoch_number: u64,
    /// Unix seconds.
    pub timestamp: u64,
    pub total_distributed: u64,
    pub pool_allocations: Vec<(String, u64)>,
    pub participant_rewards: Vec<(String, u64)>,
    pub entry_hash: String,
    pub prev_hash: String,
    pub merkle_root: String,
}

impl From<&EpochEntry> for EntryJson {
    fn from(entry: &EpochEntry) -> Self {
        Self {
            epoch_number: entry.epoch_number,
            timestamp: entry.timestamp,
            total_distributed: entry.total_distributed,
            pool_allocations: entry
                .pool_allocations
                .iter()
                .map(|(name, amt)| (name.clone(), *amt))
                .collect(),
            participant_rewards: entry
                .participant_rewards
                .iter()
                .map(|(id, amt)| (id.to_string(), *amt))
                .collect(),
            entry_hash: entry.entry_hash.to_hex(),
            prev_hash: entry.prev_hash.to_hex(),
            merkle_root: entry.merkle_root().to_hex(),
        }
    }
}

/// Result of a chain verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyJson {
    pub valid: bool,
    pub from: u64,
    pub to: u64,
    /// First epoch that failed, when `valid` is false.
    pub failed_epoch: Option<u64>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProofStepJson {
    pub hash: String,
    /// "left" or "right": the side the sibling sits on.
    pub side: String,
}

/// Self-contained reward inclusion proof.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProofJson {
    pub epoch_number: u64,
    pub participant_id: String,
    pub amount: u64,
    pub leaf_index: usize,
    pub merkle_root: String,
    pub path: Vec<ProofStepJson>,
}

impl ProofJson {
    pub fn new(epoch_number: u64, proof: &RewardProof, merkle_root: Hash256) -> Self {
        Self {
            epoch_number,
            participant_id: proof.participant.to_string(),
            amount: proof.amount,
            leaf_index: proof.leaf_index,
            merkle_root: merkle_root.to_hex(),
            path: proof
                .path
                .iter()
                .map(|step| ProofStepJson {
                    hash: step.hash.to_hex(),
                    side: match step.side {
                        Side::Left => "left".to_string(),
                        Side::Right => "right".to_string(),
                    },
                })
                .collect(),
        }
    }

    /// Decode back into a [`RewardProof`] and the root it claims.
    pub fn to_proof(&self) -> Result<(RewardProof, Hash256), String> {
        let root = Hash256::from_hex(&self.merkle_root).ok_or("invalid merkle root hex")?;
        let participant = match self.participant_id.strip_prefix(RESERVE_PREFIX) {
            Some(pool) => ParticipantId::reserve(pool),
            None => ParticipantId::parse(self.participant_id.clone()).map_err(|e| e.to_string())?,
        };
        let path = self
            .path
            .iter()
            .map(|step| -> Result<ProofStep, &'static str> {
                let hash = Hash256::from_hex(&step.hash).ok_or("invalid proof hash hex")?;
                let side = match step.side.as_str() {
                    "left" => Side::Left,
                    "right" => Side::Right,
                    _ => return Err("proof side must be left or right"),
                };
                Ok(ProofStep { hash, side })
            })
            .collect::<Result<Vec<_>, &str>>()?;
        Ok((
            RewardProof {
                leaf_index: self.leaf_index,
                participant,
                amount: self.amount,
                path,
            },
            root,
        ))
    }

    /// Recompute the root from the leaf and path and compare.
    pub fn verify(&self) -> Result<bool, String> {
        let (proof, root) = self.to_proof()?;
        Ok(proof.verify(&root))
    }
}

/// General node info.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInfoJson {
    /// Epoch the next tick will commit.
    pub next_epoch: u64,
    /// Hash of the latest entry, empty for an empty ledger.
    pub tip_hash: String,
    pub halted_at: Option<u64>,
    pub state: String,
    pub wallets: usize,
    pub network_reserve: u64,
    pub treasury_reserve: u64,
    pub alerts: u64,
}

/// Parse a participant id parameter.
fn parse_participant(raw: &str) -> Result<ParticipantId, ErrorObjectOwned> {
    ParticipantId::parse(raw).map_err(|e| rpc_error(-8, &format!("invalid participant id: {e}")))
}

/// Create a JSON-RPC error.
fn rpc_error(code: i32, msg: &str) -> ErrorObjectOwned {
    ErrorObjectOwned::owned(code, msg.to_string(), None::<()>)
}

fn ledger_error(e: LedgerError) -> ErrorObjectOwned {
    let code = match &e {
        LedgerError::EpochNotFound(_) | LedgerError::ParticipantNotInEpoch { .. } => -5,
        LedgerError::InvalidRange { .. } => -8,
        _ => -1,
    };
    rpc_error(code, &e.to_string())
}

/// The Ebb audit JSON-RPC interface.
#[rpc(server)]
pub trait EbbRpc {
    /// Returns the ledger entry for an epoch.
    #[method(name = "getentry")]
    async fn get_entry(&self, epoch: u64) -> Result<EntryJson, ErrorObjectOwned>;

    /// Returns the latest ledger entry, or null for an empty ledger.
    #[method(name = "getlatestentry")]
    async fn get_latest_entry(&self) -> Result<Option<EntryJson>, ErrorObjectOwned>;

    /// Verifies the chain over `from..=to` (whole chain by default).
    #[method(name = "verifychain")]
    async fn verify_chain(
        &self,
        from: Option<u64>,
        to: Option<u64>,
    ) -> Result<VerifyJson, ErrorObjectOwned>;

    /// Returns an inclusion proof for a participant's reward in an epoch.
    #[method(name = "getmerkleproof")]
    async fn get_merkle_proof(
        &self,
        epoch: u64,
        participant_id: String,
    ) -> Result<ProofJson, ErrorObjectOwned>;

    /// Returns stored sentinel alerts for epochs in `from..=to`.
    #[method(name = "getalerts")]
    async fn get_alerts(&self, from: u64, to: u64) -> Result<Vec<SentinelAlert>, ErrorObjectOwned>;

    /// Returns general node info.
    #[method(name = "getinfo")]
    async fn get_info(&self) -> Result<NodeInfoJson, ErrorObjectOwned>;

    /// Re-reads and validates the policy; the old policy stays on error.
    #[method(name = "reloadpolicy")]
    async fn reload_policy(&self) -> Result<bool, ErrorObjectOwned>;
}

/// Implementation of the Ebb JSON-RPC server.
pub struct RpcServerImpl {
    node: Arc<Node>,
}

impl RpcServerImpl {
    pub fn new(node: Arc<Node>) -> Self {
        Self { node }
    }
}

#[async_trait]
impl EbbRpcServer for RpcServerImpl {
    async fn get_entry(&self, epoch: u64) -> Result<EntryJson, ErrorObjectOwned> {
        let entry = self
            .node
            .coordinator()
            .get_entry(epoch)
            .map_err(ledger_error)?;
        Ok(EntryJson::from(&entry))
    }

    async fn get_latest_entry(&self) -> Result<Option<EntryJson>, ErrorObjectOwned> {
        let entry = self
            .node
            .coordinator()
            .latest_entry()
            .map_err(ledger_error)?;
        Ok(entry.as_ref().map(EntryJson::from))
    }

    async fn verify_chain(
        &self,
        from: Option<u64>,
        to: Option<u64>,
    ) -> Result<VerifyJson, ErrorObjectOwned> {
        let coordinator = self.node.coordinator();
        let tip = coordinator
            .tip()
            .map_err(ledger_error)?
            .map(|(epoch, _)| epoch);
        let from = from.unwrap_or(0);
        let Some(to) = to.or(tip) else {
            // Empty ledger: nothing to verify.
            return Ok(VerifyJson {
                valid: true,
                from,
                to: from,
                failed_epoch: None,
                error: None,
            });
        };

        match coordinator.verify_chain(from, to) {
            Ok(()) => Ok(VerifyJson {
                valid: true,
                from,
                to,
                failed_epoch: None,
                error: None,
            }),
            Err(LedgerError::Integrity(e)) => Ok(VerifyJson {
                valid: false,
                from,
                to,
                failed_epoch: Some(e.epoch()),
                error: Some(e.to_string()),
            }),
            Err(e) => Err(ledger_error(e)),
        }
    }

    async fn get_merkle_proof(
        &self,
        epoch: u64,
        participant_id: String,
    ) -> Result<ProofJson, ErrorObjectOwned> {
        let participant = parse_participant(&participant_id)?;
        let coordinator = self.node.coordinator();
        let proof = coordinator
            .merkle_proof(epoch, &participant)
            .map_err(ledger_error)?;
        let root = coordinator.merkle_root(epoch).map_err(ledger_error)?;
        Ok(ProofJson::new(epoch, &proof, root))
    }

    async fn get_alerts(&self, from: u64, to: u64) -> Result<Vec<SentinelAlert>, ErrorObjectOwned> {
        if from > to {
            return Err(rpc_error(-8, "from must not exceed to"));
        }
        self.node
            .sentinel()
            .alerts(from, to)
            .map_err(|e| rpc_error(-1, &e.to_string()))
    }

    async fn get_info(&self) -> Result<NodeInfoJson, ErrorObjectOwned> {
        let coordinator = self.node.coordinator();
        let policy = coordinator.policy();
        let tip_hash = coordinator
            .tip()
            .map_err(ledger_error)?
            .map(|(_, hash)| hash.to_hex())
            .unwrap_or_default();

        Ok(NodeInfoJson {
            next_epoch: coordinator.next_epoch().map_err(ledger_error)?,
            tip_hash,
            halted_at: coordinator.halted_at().map_err(ledger_error)?,
            state: coordinator.state().to_string(),
            wallets: coordinator.wallet_count(),
            network_reserve: coordinator.reserve_balance(&policy.redistribution.network_reserve),
            treasury_reserve: coordinator.reserve_balance(&policy.redistribution.treasury_reserve),
            alerts: self
                .node
                .sentinel()
                .alert_count()
                .map_err(|e| rpc_error(-1, &e.to_string()))?,
        })
    }

    async fn reload_policy(&self) -> Result<bool, ErrorObjectOwned> {
        self.node
            .reload_policy()
            .map_err(|e| rpc_error(-32, &e.to_string()))?;
        Ok(true)
    }
}

/// Start the JSON-RPC server on the given address.
///
/// Returns a [`ServerHandle`] that can be used to stop the server.
pub async fn start_rpc_server(addr: &str, node: Arc<Node>) -> Result<ServerHandle, EbbError> {
    let server = Server::builder()
        .build(addr)
        .await
        .map_err(|e| EbbError::Io(format!("RPC server error: {e}")))?;

    let rpc_impl = RpcServerImpl::new(node);
    let handle = server.start(rpc_impl.into_rpc());

    Ok(handle)
}
