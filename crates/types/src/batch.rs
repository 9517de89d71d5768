//! Batch types: header, certificate list, inclusion proofs, and the
//! per-operator chunk assignment.

use crate::blob::{BlobCertificate, BlobKey};
use crate::identifiers::OperatorId;
use crate::merkle::{MerkleProof, MerkleTree};
use crate::operator::OperatorState;
use crate::Hash;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Identity of a batch: the Merkle root over its certificate hashes and the
/// block height the operator set was snapshotted at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchHeader {
    /// Root of the certificate Merkle tree.
    pub batch_root: Hash,
    /// Reference block for stakes and sockets.
    pub reference_block_number: u64,
}

impl BatchHeader {
    /// Canonical batch header hash: Keccak-256 over root and block number.
    ///
    /// This is the message operators sign, so the encoding is fixed:
    /// 32-byte root followed by the big-endian block number.
    pub fn hash(&self) -> Hash {
        Hash::from_parts(&[
            self.batch_root.as_bytes(),
            &self.reference_block_number.to_be_bytes(),
        ])
    }
}

/// A batch header plus the certificates it commits to, in leaf order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    /// The batch header.
    pub header: BatchHeader,
    /// Certificates in Merkle leaf order.
    pub blob_certificates: Vec<BlobCertificate>,
}

/// Per-blob Merkle proof into the batch root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobInclusionInfo {
    /// Key of the included blob.
    pub blob_key: BlobKey,
    /// Header of the batch the blob is included in.
    pub batch_header: BatchHeader,
    /// Root the proof verifies against. Duplicates
    /// `batch_header.batch_root` so the record is self-contained for
    /// readers that only fetch the proof.
    pub batch_root: Hash,
    /// Leaf position; contiguous `[0, N)` within a batch.
    pub blob_index: u32,
    /// Proof that the certificate hash is the leaf at `blob_index`.
    pub inclusion_proof: MerkleProof,
}

/// Everything the fan-out and collection stages need for one batch.
#[derive(Debug, Clone)]
pub struct BatchData {
    /// The batch itself.
    pub batch: Batch,
    /// Cached `batch.header.hash()`.
    pub batch_header_hash: Hash,
    /// Blob keys in leaf order.
    pub blob_keys: Vec<BlobKey>,
    /// Operator set at the batch's reference block.
    pub operator_state: Arc<OperatorState>,
    /// Inclusion proofs in leaf order.
    pub inclusion_infos: Vec<BlobInclusionInfo>,
}

/// Chunks one operator must store for a batch, given as certificate indices.
///
/// The dispatcher only forwards assignments; chunk indices within each blob
/// are derived operator-side from the same reference-block state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkAssignment {
    /// Indices into the batch's certificate list.
    pub blob_indices: Vec<u32>,
}

impl ChunkAssignment {
    /// Whether the operator has nothing to store for this batch.
    pub fn is_empty(&self) -> bool {
        self.blob_indices.is_empty()
    }
}

/// Compute the chunk assignment for one operator: every certificate whose
/// quorum set intersects the operator's quorum membership at the reference
/// block.
pub fn chunk_assignment(
    batch: &Batch,
    state: &OperatorState,
    operator: OperatorId,
) -> ChunkAssignment {
    let memberships = state.operator_quorums(operator);
    let blob_indices = batch
        .blob_certificates
        .iter()
        .enumerate()
        .filter(|(_, cert)| {
            cert.blob_header
                .quorum_numbers
                .iter()
                .any(|q| memberships.contains(q))
        })
        .map(|(i, _)| i as u32)
        .collect();
    ChunkAssignment { blob_indices }
}

/// Build the Merkle tree over a batch's certificate hashes and emit one
/// inclusion info per blob, in leaf order.
///
/// Deterministic in the certificate order, so re-running on the same batch
/// reproduces identical proofs.
pub fn build_inclusion_infos(batch: &Batch) -> Vec<BlobInclusionInfo> {
    let leaves: Vec<Hash> = batch.blob_certificates.iter().map(|c| c.hash()).collect();
    let tree = MerkleTree::build(&leaves);
    batch
        .blob_certificates
        .iter()
        .enumerate()
        .map(|(i, cert)| BlobInclusionInfo {
            blob_key: cert.blob_header.blob_key(),
            batch_header: batch.header,
            batch_root: batch.header.batch_root,
            blob_index: i as u32,
            inclusion_proof: tree
                .proof(i)
                .expect("index enumerated from the same leaf set"),
        })
        .collect()
}
