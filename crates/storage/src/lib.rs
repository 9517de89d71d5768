//! Blob metadata store contract.
//!
//! Defines the [`BlobMetadataStore`] interface implemented by persistent
//! backends and by the in-memory store (`dahlia-storage-memory`) used in
//! tests and local runs.
//!
//! # Failure semantics
//!
//! - Reads may return [`StorageError::NotFound`].
//! - Writes may return [`StorageError::Conflict`]: a value already exists
//!   under the primary key. Callers treat this as success after a re-read
//!   confirms the prior write.
//! - Writes may return [`StorageError::Transient`]: retried by the caller
//!   with exponential backoff.
//! - [`BlobMetadataStore::update_blob_status`] rejects transitions the blob
//!   status state machine does not permit.

mod store;

pub use store::{BlobMetadataStore, Cursor, EncodedPage, StorageError};
