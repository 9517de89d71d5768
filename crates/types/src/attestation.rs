//! Aggregated batch attestation.

use crate::batch::BatchHeader;
use crate::crypto::{BlsPublicKey, BlsSignature};
use crate::identifiers::QuorumId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Aggregated BLS multi-signature plus per-quorum stake accounting for one
/// batch.
///
/// An attestation is persisted even when no quorum met its threshold: the
/// **empty attestation** (all list fields empty, no sigma, no aggregate key)
/// distinguishes "the dispatcher tried and failed" from "the dispatcher
/// never ran".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attestation {
    /// Header of the attested batch.
    pub batch_header: BatchHeader,
    /// When aggregation finalized (nanoseconds since epoch).
    pub attested_at: u64,
    /// Public keys of committee members that produced no valid signature.
    pub non_signer_pubkeys: Vec<BlsPublicKey>,
    /// G2 aggregate public key over all signers.
    pub apk_g2: Option<BlsPublicKey>,
    /// Per-quorum aggregate public key over that quorum's signers.
    pub quorum_apks: BTreeMap<QuorumId, BlsPublicKey>,
    /// Aggregate G1 signature over all signers.
    pub sigma: Option<BlsSignature>,
    /// Quorums whose signed stake met the confirmation threshold.
    pub quorum_numbers: Vec<QuorumId>,
    /// Signed stake percentage (0-100, floored) per quorum in the batch
    /// union.
    pub quorum_results: BTreeMap<QuorumId, u8>,
}

impl Attestation {
    /// The empty attestation for a batch where no quorum reached threshold.
    pub fn empty(batch_header: BatchHeader, attested_at: u64) -> Self {
        Self {
            batch_header,
            attested_at,
            non_signer_pubkeys: Vec::new(),
            apk_g2: None,
            quorum_apks: BTreeMap::new(),
            sigma: None,
            quorum_numbers: Vec::new(),
            quorum_results: BTreeMap::new(),
        }
    }

    /// Whether this is the empty attestation.
    pub fn is_empty(&self) -> bool {
        self.sigma.is_none()
    }

    /// Signed stake percentage for one quorum, if recorded.
    pub fn quorum_result(&self, quorum: QuorumId) -> Option<u8> {
        self.quorum_results.get(&quorum).copied()
    }

    /// Whether every quorum in `quorums` met its threshold.
    pub fn covers(&self, quorums: &[QuorumId]) -> bool {
        quorums.iter().all(|q| self.quorum_numbers.contains(q))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Hash;

    fn header() -> BatchHeader {
        BatchHeader {
            batch_root: Hash::from_bytes(b"root"),
            reference_block_number: 90,
        }
    }

    #[test]
    fn test_empty_attestation() {
        let att = Attestation::empty(header(), 1);
        assert!(att.is_empty());
        assert!(att.non_signer_pubkeys.is_empty());
        assert!(att.quorum_numbers.is_empty());
        assert!(att.quorum_results.is_empty());
        assert!(!att.covers(&[QuorumId(0)]));
        assert!(att.covers(&[]));
    }

    #[test]
    fn test_covers_requires_all_quorums() {
        let mut att = Attestation::empty(header(), 1);
        att.quorum_numbers = vec![QuorumId(1)];
        assert!(att.covers(&[QuorumId(1)]));
        assert!(!att.covers(&[QuorumId(0), QuorumId(1)]));
    }
}
