//! Operator set snapshot at a reference block.

use crate::identifiers::{OperatorId, OperatorSocket, QuorumId};
use crate::BlsPublicKey;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Stake, key, and endpoint of one operator within a quorum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorInfo {
    /// Stake weight within the quorum.
    pub stake: u64,
    /// BLS public key signatures are verified against.
    pub public_key: BlsPublicKey,
    /// Dispersal endpoint.
    pub socket: OperatorSocket,
}

/// Membership of one quorum: operators and their total stake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumOperators {
    /// Operators in the quorum, keyed by id.
    pub operators: BTreeMap<OperatorId, OperatorInfo>,
    /// Sum of member stakes.
    pub total_stake: u64,
}

/// Snapshot of the operator set at a reference block.
///
/// Immutable after construction; shared across the fan-out and aggregation
/// stages behind an `Arc`. Pure function of block height, so safe to cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorState {
    /// Block height the snapshot was taken at.
    pub reference_block: u64,
    quorums: BTreeMap<QuorumId, QuorumOperators>,
}

impl OperatorState {
    /// Build a snapshot from per-quorum membership tables.
    pub fn new(
        reference_block: u64,
        quorums: BTreeMap<QuorumId, BTreeMap<OperatorId, OperatorInfo>>,
    ) -> Self {
        let quorums = quorums
            .into_iter()
            .map(|(q, operators)| {
                let total_stake = operators.values().map(|o| o.stake).sum();
                (
                    q,
                    QuorumOperators {
                        operators,
                        total_stake,
                    },
                )
            })
            .collect();
        Self {
            reference_block,
            quorums,
        }
    }

    /// Quorum ids present in this snapshot, ascending.
    pub fn quorums(&self) -> impl Iterator<Item = QuorumId> + '_ {
        self.quorums.keys().copied()
    }

    /// Membership of one quorum.
    pub fn quorum(&self, quorum: QuorumId) -> Option<&QuorumOperators> {
        self.quorums.get(&quorum)
    }

    /// Union of operators across all quorums in the snapshot: the committee
    /// a batch over these quorums must be dispatched to.
    pub fn committee(&self) -> BTreeSet<OperatorId> {
        self.quorums
            .values()
            .flat_map(|q| q.operators.keys().copied())
            .collect()
    }

    /// Quorums the given operator is a member of, ascending.
    pub fn operator_quorums(&self, operator: OperatorId) -> Vec<QuorumId> {
        self.quorums
            .iter()
            .filter(|(_, members)| members.operators.contains_key(&operator))
            .map(|(q, _)| *q)
            .collect()
    }

    /// Info for an operator, from any quorum it belongs to.
    ///
    /// Key and socket are chain-global, so any membership row will do.
    pub fn operator_info(&self, operator: OperatorId) -> Option<&OperatorInfo> {
        self.quorums
            .values()
            .find_map(|q| q.operators.get(&operator))
    }

    /// Stake of `operator` within `quorum`, if a member.
    pub fn stake(&self, quorum: QuorumId, operator: OperatorId) -> Option<u64> {
        self.quorums
            .get(&quorum)
            .and_then(|q| q.operators.get(&operator))
            .map(|o| o.stake)
    }

    /// Total stake of `quorum`.
    pub fn total_stake(&self, quorum: QuorumId) -> Option<u64> {
        self.quorums.get(&quorum).map(|q| q.total_stake)
    }
}
