//! Chain state view.
//!
//! Read-only access to the operator set: stakes, BLS keys, and dispersal
//! sockets indexed by block number. The view is a pure function of block
//! height, so snapshots are safe to cache and share.
//!
//! [`StaticChainState`] is the fixed-table implementation used by tests and
//! simulation; a production implementation reads the staking contracts.

use async_trait::async_trait;
use dahlia_types::{
    BlsPublicKey, BlsSecretKey, OperatorId, OperatorInfo, OperatorSocket, OperatorState, QuorumId,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Errors from chain reads.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainError {
    /// The requested block is not available (ahead of head or pruned).
    #[error("no state for block {0}")]
    UnknownBlock(u64),

    /// A quorum in the request has no on-chain registration.
    #[error("unknown quorum {0}")]
    UnknownQuorum(QuorumId),

    /// RPC-level failure talking to the chain.
    #[error("chain read failed: {0}")]
    Transport(String),
}

/// Snapshot of operator set, stakes, sockets, and BLS keys at a reference
/// block.
#[async_trait]
pub trait ChainState: Send + Sync {
    /// Latest finalized block number.
    async fn current_block(&self) -> Result<u64, ChainError>;

    /// Operator state for `quorums` at `reference_block`.
    async fn operator_state(
        &self,
        reference_block: u64,
        quorums: &[QuorumId],
    ) -> Result<Arc<OperatorState>, ChainError>;
}

/// Fixed operator table serving every block height.
///
/// Holds the secret keys it generated so tests can produce operator
/// signatures without a real node.
pub struct StaticChainState {
    block: AtomicU64,
    quorums: BTreeMap<QuorumId, BTreeMap<OperatorId, OperatorInfo>>,
    keypairs: BTreeMap<OperatorId, BlsSecretKey>,
}

impl StaticChainState {
    /// Build a chain state from a per-quorum stake table, deriving one
    /// deterministic BLS keypair and socket per operator.
    ///
    /// Socket ports are assigned from 32000 in table order, one per
    /// distinct operator.
    pub fn from_stakes(
        current_block: u64,
        stakes: &BTreeMap<QuorumId, BTreeMap<OperatorId, u64>>,
    ) -> Self {
        let mut keypairs = BTreeMap::new();
        let mut sockets = BTreeMap::new();
        let mut next_port = 32000u16;
        for members in stakes.values() {
            for id in members.keys() {
                keypairs
                    .entry(*id)
                    .or_insert_with(|| BlsSecretKey::from_seed(id.as_bytes()));
                sockets.entry(*id).or_insert_with(|| {
                    let socket = OperatorSocket::new(format!("127.0.0.1:{next_port}"));
                    next_port += 1;
                    socket
                });
            }
        }

        let quorums = stakes
            .iter()
            .map(|(q, members)| {
                let members = members
                    .iter()
                    .map(|(id, stake)| {
                        let info = OperatorInfo {
                            stake: *stake,
                            public_key: keypairs[id].public_key(),
                            socket: sockets[id].clone(),
                        };
                        (*id, info)
                    })
                    .collect();
                (*q, members)
            })
            .collect();

        Self {
            block: AtomicU64::new(current_block),
            quorums,
            keypairs,
        }
    }

    /// Advance the reported head block.
    pub fn set_block(&self, block: u64) {
        self.block.store(block, Ordering::Relaxed);
    }

    /// Secret key of an operator, for signing in tests.
    pub fn secret_key(&self, operator: OperatorId) -> Option<&BlsSecretKey> {
        self.keypairs.get(&operator)
    }

    /// Public key of an operator.
    pub fn public_key(&self, operator: OperatorId) -> Option<BlsPublicKey> {
        self.keypairs.get(&operator).map(|k| k.public_key())
    }

    /// Socket of an operator, from any quorum it belongs to.
    pub fn socket(&self, operator: OperatorId) -> Option<&OperatorSocket> {
        self.quorums
            .values()
            .find_map(|members| members.get(&operator))
            .map(|info| &info.socket)
    }
}

#[async_trait]
impl ChainState for StaticChainState {
    async fn current_block(&self) -> Result<u64, ChainError> {
        Ok(self.block.load(Ordering::Relaxed))
    }

    async fn operator_state(
        &self,
        reference_block: u64,
        quorums: &[QuorumId],
    ) -> Result<Arc<OperatorState>, ChainError> {
        let head = self.block.load(Ordering::Relaxed);
        if reference_block > head {
            return Err(ChainError::UnknownBlock(reference_block));
        }
        let mut selected = BTreeMap::new();
        for q in quorums {
            let members = self
                .quorums
                .get(q)
                .ok_or(ChainError::UnknownQuorum(*q))?
                .clone();
            selected.insert(*q, members);
        }
        Ok(Arc::new(OperatorState::new(reference_block, selected)))
    }
}
