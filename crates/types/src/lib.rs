//! Core types for the Dahlia data-availability dispersal network.
//!
//! This crate provides the foundational types used throughout the disperser
//! control plane:
//!
//! - **Primitives**: keccak-256 [`Hash`], BLS keys and signatures
//! - **Identifiers**: [`OperatorId`], [`QuorumId`], [`BlobKey`], etc.
//! - **Blob lifecycle**: [`BlobHeader`], [`BlobCertificate`], [`BlobMetadata`]
//! - **Batch types**: [`BatchHeader`], [`BatchData`], [`BlobInclusionInfo`]
//! - **Attestation**: aggregated multi-signature plus per-quorum stake accounting
//! - **Operator set**: stake, keys, and sockets snapshotted at a reference block
//!
//! # Design Philosophy
//!
//! This crate is self-contained with minimal dependencies. It does not depend
//! on any other workspace crates, making it the foundation layer. All hashing
//! that feeds signatures or Merkle proofs goes through explicit canonical
//! encoders so the resulting digests are stable across serde changes.

mod attestation;
mod batch;
mod blob;
mod crypto;
mod hash;
mod identifiers;
mod merkle;
mod operator;
mod signing;

pub use attestation::Attestation;
pub use batch::{
    build_inclusion_infos, chunk_assignment, Batch, BatchData, BatchHeader, BlobInclusionInfo,
    ChunkAssignment,
};
pub use blob::{
    BlobCertificate, BlobCommitments, BlobHeader, BlobKey, BlobMetadata, BlobStatus,
    PaymentMetadata,
};
pub use crypto::{BlsPublicKey, BlsSecretKey, BlsSignature, CryptoError};
pub use hash::Hash;
pub use identifiers::{AccountId, BlobVersion, OperatorId, OperatorSocket, QuorumId, RelayKey};
pub use merkle::{MerkleProof, MerkleTree};
pub use operator::{OperatorInfo, OperatorState, QuorumOperators};
pub use signing::store_chunks_message;
