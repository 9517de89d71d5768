//! In-memory implementation of the blob metadata store.
//!
//! Backs the dispatcher test harness and local single-process runs. Enforces
//! the same contract a persistent backend must: status state machine,
//! idempotent keyed writes, and `(updated_at, blob_key)`-ordered pagination
//! of encoded blobs.

mod store;

pub use store::MemoryBlobStore;
