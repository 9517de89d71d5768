//! In-flight blob tracking.

use dahlia_types::BlobKey;
use parking_lot::Mutex;
use std::collections::HashSet;

/// Set of blob keys currently claimed by a batch.
///
/// Deduplicates candidates across cursor restarts: a key in this set is in
/// flight in the current or a previous tick and must not be batched again.
/// The durable `Encoded -> GatheringSignatures` transition is the
/// authoritative claim; this set only avoids re-fetch churn, so it can be
/// rebuilt after a restart by scanning `GatheringSignatures` rows.
#[derive(Debug, Default)]
pub struct BlobSet {
    inner: Mutex<HashSet<BlobKey>>,
}

impl BlobSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a key as in flight.
    pub fn add_blob(&self, blob_key: BlobKey) {
        self.inner.lock().insert(blob_key);
    }

    /// Whether a key is in flight.
    pub fn contains(&self, blob_key: &BlobKey) -> bool {
        self.inner.lock().contains(blob_key)
    }

    /// Stop tracking a key.
    pub fn remove_blob(&self, blob_key: &BlobKey) {
        self.inner.lock().remove(blob_key);
    }

    /// Number of keys in flight.
    pub fn size(&self) -> usize {
        self.inner.lock().len()
    }
}
