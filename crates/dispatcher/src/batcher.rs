//! Batch building: pull encoded blobs, claim them, and commit to a Merkle
//! root.

use crate::dispatcher::Dispatcher;
use crate::error::DispatchError;
use crate::writer::retry_transient;
use dahlia_chain::ChainState;
use dahlia_network::NodeClientManager;
use dahlia_storage::{BlobMetadataStore, StorageError};
use dahlia_types::{
    build_inclusion_infos, Batch, BatchData, BatchHeader, BlobCertificate, BlobMetadata,
    BlobStatus, MerkleTree, QuorumId,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, error, warn};

impl<S, C, M> Dispatcher<S, C, M>
where
    S: BlobMetadataStore + 'static,
    C: ChainState + 'static,
    M: NodeClientManager + 'static,
{
    /// Build the next batch at `reference_block`.
    ///
    /// Pulls at most `max_batch_size` encoded blobs from the cursor
    /// position, skips keys already in flight, claims the chosen blobs by
    /// transitioning them to `GatheringSignatures`, and returns the batch
    /// with its Merkle inclusion proofs.
    ///
    /// When the fetch returns a partial page the cursor has reached the end
    /// of the queue and resets to zero, so blobs whose `updated_at` moved
    /// backwards relative to the cursor (retries) are picked up on the next
    /// full sweep.
    pub async fn new_batch(&self, reference_block: u64) -> Result<BatchData, DispatchError> {
        let cursor = *self.cursor.lock();
        let page = retry_transient(self.config.num_request_retries, || {
            self.store.fetch_encoded(cursor, self.config.max_batch_size)
        })
        .await?;

        let full_page = page.metadata.len() as u32 >= self.config.max_batch_size;
        *self.cursor.lock() = if full_page { page.next_cursor } else { None };

        let now_secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let candidates: Vec<BlobMetadata> = page
            .metadata
            .into_iter()
            .filter(|meta| {
                let key = meta.blob_key();
                if self.blob_set.contains(&key) {
                    debug!(blob_key = %key, "blob already in flight, skipping");
                    return false;
                }
                if meta.expiry < now_secs {
                    warn!(blob_key = %key, expiry = meta.expiry, "blob expired, skipping");
                    return false;
                }
                true
            })
            .collect();

        if candidates.is_empty() {
            dahlia_metrics::record_empty_tick();
            return Err(DispatchError::NoBlobsToDispatch);
        }

        let mut certificates: Vec<BlobCertificate> = Vec::with_capacity(candidates.len());
        for meta in &candidates {
            let key = meta.blob_key();
            match retry_transient(self.config.num_request_retries, || {
                self.store.get_certificate(key)
            })
            .await
            {
                Ok(cert) => {
                    if cert.blob_header.blob_key() != key {
                        error!(blob_key = %key, "certificate key mismatch, dropping blob");
                        continue;
                    }
                    certificates.push(cert);
                }
                Err(StorageError::NotFound) => {
                    // The fetch just returned this key; a missing
                    // certificate is an impossible state.
                    error!(blob_key = %key, "certificate missing for encoded blob, dropping");
                }
                Err(e) => return Err(e.into()),
            }
        }
        if certificates.is_empty() {
            return Err(DispatchError::NoBlobsToDispatch);
        }

        let quorums: BTreeSet<QuorumId> = certificates
            .iter()
            .flat_map(|c| c.blob_header.quorum_numbers.iter().copied())
            .collect();
        let quorums: Vec<QuorumId> = quorums.into_iter().collect();
        let operator_state = self
            .chain
            .operator_state(reference_block, &quorums)
            .await?;

        let leaves: Vec<_> = certificates.iter().map(|c| c.hash()).collect();
        let tree = MerkleTree::build(&leaves);
        let header = BatchHeader {
            batch_root: tree.root(),
            reference_block_number: reference_block,
        };
        let batch = Batch {
            header,
            blob_certificates: certificates,
        };
        let batch_header_hash = header.hash();
        let inclusion_infos = build_inclusion_infos(&batch);
        let blob_keys: Vec<_> = batch
            .blob_certificates
            .iter()
            .map(|c| c.blob_header.blob_key())
            .collect();

        // Claim the blobs. The durable transition is what prevents double
        // dispatch even if the in-memory set is lost across a restart.
        for key in &blob_keys {
            let result = retry_transient(self.config.num_request_retries, || {
                self.store
                    .update_blob_status(*key, BlobStatus::GatheringSignatures)
            })
            .await;
            match result {
                Ok(()) => {}
                Err(StorageError::Conflict) => {
                    // Another writer got there first; confirm and move on.
                    let meta = self.store.get_blob_metadata(*key).await?;
                    if meta.status != BlobStatus::GatheringSignatures {
                        return Err(DispatchError::Invariant(format!(
                            "blob {key} in status {} after claim conflict",
                            meta.status
                        )));
                    }
                }
                Err(e) => return Err(e.into()),
            }

            if let Some(callback) = &self.before_dispatch {
                if let Err(e) = callback(*key) {
                    warn!(blob_key = %key, error = %e, "before-dispatch callback failed");
                }
            }
        }

        for key in &blob_keys {
            self.blob_set.add_blob(*key);
        }

        dahlia_metrics::record_batch_built(blob_keys.len());
        debug!(
            batch_header_hash = %batch_header_hash,
            num_blobs = blob_keys.len(),
            reference_block,
            "built batch"
        );

        Ok(BatchData {
            batch,
            batch_header_hash,
            blob_keys,
            operator_state: Arc::clone(&operator_state),
            inclusion_infos,
        })
    }
}
