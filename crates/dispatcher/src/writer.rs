//! Attestation persistence.
//!
//! Writes are issued so that the attestation becoming visible implies the
//! batch header and every inclusion info are already visible:
//!
//! ```text
//! batch header → inclusion infos → attestation → per-blob status
//! ```
//!
//! All writes are idempotent on their primary keys. `Conflict` is resolved
//! by re-reading and comparing with what this batch would have written;
//! `Transient` is retried with jittered exponential backoff.

use crate::error::DispatchError;
use dahlia_metrics as metrics;
use dahlia_storage::{BlobMetadataStore, StorageError};
use dahlia_types::{Attestation, BatchData, BlobKey, BlobStatus};
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Starting backoff for transient storage failures.
const INITIAL_BACKOFF: Duration = Duration::from_millis(50);

/// Backoff ceiling for storage retries.
const MAX_BACKOFF: Duration = Duration::from_secs(1);

/// Persists batch outcomes in visibility order.
pub struct AttestationWriter<S> {
    store: Arc<S>,
    num_retries: u32,
}

impl<S: BlobMetadataStore> AttestationWriter<S> {
    /// Create a writer over the store.
    pub fn new(store: Arc<S>, num_retries: u32) -> Self {
        Self { store, num_retries }
    }

    /// Persist the batch header, inclusion infos, attestation, and the
    /// terminal status of every blob, in that order.
    pub async fn persist(
        &self,
        batch_data: &BatchData,
        attestation: &Attestation,
        statuses: &[(BlobKey, BlobStatus)],
    ) -> Result<(), DispatchError> {
        let header = batch_data.batch.header;
        let batch_header_hash = batch_data.batch_header_hash;

        let result = retry_transient(self.num_retries, || self.store.put_batch_header(header)).await;
        if let Err(StorageError::Conflict) = result {
            let existing = self.store.get_batch_header(batch_header_hash).await?;
            if existing != header {
                return Err(DispatchError::Invariant(format!(
                    "conflicting batch header under hash {batch_header_hash}"
                )));
            }
        } else {
            result?;
        }

        for info in &batch_data.inclusion_infos {
            let result =
                retry_transient(self.num_retries, || self.store.put_inclusion_info(info.clone()))
                    .await;
            if let Err(StorageError::Conflict) = result {
                let existing = self
                    .store
                    .get_inclusion_info(info.blob_key, batch_header_hash)
                    .await?;
                if existing != *info {
                    return Err(DispatchError::Invariant(format!(
                        "conflicting inclusion info for blob {} in batch {batch_header_hash}",
                        info.blob_key
                    )));
                }
            } else {
                result?;
            }
        }

        let result = retry_transient(self.num_retries, || {
            self.store.put_attestation(attestation.clone())
        })
        .await;
        if let Err(StorageError::Conflict) = result {
            // A previous run of the same batch may have attested at a
            // different instant; everything else must agree.
            let existing = self.store.get_attestation(batch_header_hash).await?;
            let mut comparable = existing.clone();
            comparable.attested_at = attestation.attested_at;
            if comparable != *attestation {
                return Err(DispatchError::Invariant(format!(
                    "conflicting attestation under hash {batch_header_hash}"
                )));
            }
            debug!(%batch_header_hash, "attestation already persisted");
        } else {
            result?;
        }

        for (key, status) in statuses {
            self.update_status(*key, *status).await?;
            metrics::record_blob_terminal(*status == BlobStatus::Complete);
        }

        Ok(())
    }

    /// Move one blob to its terminal status, tolerating a re-run that
    /// already did so.
    async fn update_status(&self, key: BlobKey, status: BlobStatus) -> Result<(), DispatchError> {
        let result =
            retry_transient(self.num_retries, || self.store.update_blob_status(key, status))
                .await;
        match result {
            Ok(()) => Ok(()),
            Err(StorageError::Conflict) => {
                let meta = self.store.get_blob_metadata(key).await?;
                if meta.status == status {
                    debug!(blob_key = %key, %status, "terminal status already recorded");
                    Ok(())
                } else {
                    Err(DispatchError::Invariant(format!(
                        "blob {key} in status {} while finalizing to {status}",
                        meta.status
                    )))
                }
            }
            Err(StorageError::InvalidTransition { from, to }) => {
                // At most one terminal transition per blob; a different
                // terminal state than ours is an invariant violation.
                Err(DispatchError::Invariant(format!(
                    "blob {key}: illegal transition {from} -> {to}"
                )))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Retry `op` on transient failures with jittered exponential backoff, up
/// to `max_retries` retries.
pub(crate) async fn retry_transient<T, Fut, F>(
    max_retries: u32,
    mut op: F,
) -> Result<T, StorageError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StorageError>>,
{
    let mut backoff = INITIAL_BACKOFF;
    let mut attempt = 0u32;
    loop {
        match op().await {
            Err(StorageError::Transient(reason)) if attempt < max_retries => {
                attempt += 1;
                warn!(%reason, attempt, "transient storage failure, retrying");
                let jitter = rand::thread_rng().gen_range(0.0..0.25);
                tokio::time::sleep(backoff.mul_f64(1.0 + jitter)).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[tokio::test]
    async fn test_retry_transient_eventually_succeeds() {
        let failures = Cell::new(2u32);
        let result = retry_transient(3, || {
            let failures = &failures;
            async move {
                let remaining = failures.get();
                if remaining > 0 {
                    failures.set(remaining - 1);
                    Err(StorageError::Transient("flaky".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result, Ok(42));
    }

    #[tokio::test]
    async fn test_retry_transient_exhausts_budget() {
        let attempts = Cell::new(0u32);
        let result: Result<(), _> = retry_transient(2, || {
            attempts.set(attempts.get() + 1);
            async { Err(StorageError::Transient("down".into())) }
        })
        .await;
        assert!(matches!(result, Err(StorageError::Transient(_))));
        // One initial attempt plus two retries.
        assert_eq!(attempts.get(), 3);
    }

    #[tokio::test]
    async fn test_retry_transient_passes_through_other_errors() {
        let attempts = Cell::new(0u32);
        let result: Result<(), _> = retry_transient(5, || {
            attempts.set(attempts.get() + 1);
            async { Err(StorageError::NotFound) }
        })
        .await;
        assert_eq!(result, Err(StorageError::NotFound));
        assert_eq!(attempts.get(), 1);
    }
}
