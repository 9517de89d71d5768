//! The blob metadata store trait and its supporting types.

use async_trait::async_trait;
use dahlia_types::{
    Attestation, BatchHeader, BlobCertificate, BlobInclusionInfo, BlobKey, BlobMetadata,
    BlobStatus, Hash,
};
use serde::{Deserialize, Serialize};

/// Errors returned by store operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    /// No record under the requested key.
    #[error("not found")]
    NotFound,

    /// A different value already exists under the primary key, or the
    /// status is already the requested one.
    #[error("conflict on existing record")]
    Conflict,

    /// Backend hiccup; safe to retry.
    #[error("transient storage failure: {0}")]
    Transient(String),

    /// The blob status state machine forbids this transition.
    #[error("invalid status transition from {from} to {to}")]
    InvalidTransition {
        /// Status currently recorded.
        from: BlobStatus,
        /// Status that was requested.
        to: BlobStatus,
    },
}

/// Position in the encoded-blob queue.
///
/// Ordered by `(updated_at, blob_key)` ascending; [`BlobMetadataStore::fetch_encoded`]
/// returns only records strictly after the cursor, so repeated fetches make
/// monotone progress and cannot skip blobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Cursor {
    /// `updated_at` of the last record consumed.
    pub updated_at: u64,
    /// Key of the last record consumed; tie-break within one timestamp.
    pub blob_key: BlobKey,
}

/// One page of encoded blobs.
#[derive(Debug, Clone)]
pub struct EncodedPage {
    /// Records in `(updated_at, blob_key)` ascending order, at most the
    /// requested limit.
    pub metadata: Vec<BlobMetadata>,
    /// Position of the last returned record; `None` when the page is empty.
    pub next_cursor: Option<Cursor>,
}

/// Persisted queue of blob records plus batch and attestation storage.
///
/// Implementations are internally thread-safe; every method is safe to call
/// concurrently. All writes are idempotent on their primary keys.
#[async_trait]
pub trait BlobMetadataStore: Send + Sync {
    /// Fetch at most `limit` blobs in `Encoded` status with position
    /// strictly after `cursor`, ordered by `(updated_at, blob_key)`
    /// ascending.
    async fn fetch_encoded(
        &self,
        cursor: Option<Cursor>,
        limit: u32,
    ) -> Result<EncodedPage, StorageError>;

    /// Fetch one blob's metadata.
    async fn get_blob_metadata(&self, blob_key: BlobKey) -> Result<BlobMetadata, StorageError>;

    /// Create a blob record (ingestion path and tests).
    async fn put_blob_metadata(&self, metadata: BlobMetadata) -> Result<(), StorageError>;

    /// Move a blob to `new_status`, bumping `updated_at`.
    ///
    /// Rejects transitions the state machine forbids; setting the status it
    /// already has returns [`StorageError::Conflict`].
    async fn update_blob_status(
        &self,
        blob_key: BlobKey,
        new_status: BlobStatus,
    ) -> Result<(), StorageError>;

    /// Fetch the certificate for a blob.
    async fn get_certificate(&self, blob_key: BlobKey) -> Result<BlobCertificate, StorageError>;

    /// Store a certificate (encoding path and tests).
    async fn put_certificate(&self, certificate: BlobCertificate) -> Result<(), StorageError>;

    /// Fetch a batch header by its hash.
    async fn get_batch_header(&self, batch_header_hash: Hash)
        -> Result<BatchHeader, StorageError>;

    /// Persist a batch header, keyed by its hash.
    async fn put_batch_header(&self, header: BatchHeader) -> Result<(), StorageError>;

    /// Fetch the inclusion info for `(blob_key, batch_header_hash)`.
    async fn get_inclusion_info(
        &self,
        blob_key: BlobKey,
        batch_header_hash: Hash,
    ) -> Result<BlobInclusionInfo, StorageError>;

    /// Persist an inclusion info, keyed by `(blob_key, batch_header_hash)`.
    async fn put_inclusion_info(&self, info: BlobInclusionInfo) -> Result<(), StorageError>;

    /// Fetch the attestation for a batch.
    async fn get_attestation(&self, batch_header_hash: Hash) -> Result<Attestation, StorageError>;

    /// Persist an attestation, keyed by its batch header hash.
    async fn put_attestation(&self, attestation: Attestation) -> Result<(), StorageError>;
}
