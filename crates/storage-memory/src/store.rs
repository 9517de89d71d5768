//! The in-memory store.

use async_trait::async_trait;
use dahlia_storage::{BlobMetadataStore, Cursor, EncodedPage, StorageError};
use dahlia_types::{
    Attestation, BatchHeader, BlobCertificate, BlobInclusionInfo, BlobKey, BlobMetadata,
    BlobStatus, Hash,
};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Default)]
struct Inner {
    metadata: HashMap<BlobKey, BlobMetadata>,
    /// `(updated_at, blob_key)` index over all blob records; pagination
    /// order for `fetch_encoded`.
    by_updated: BTreeSet<(u64, BlobKey)>,
    certificates: HashMap<BlobKey, BlobCertificate>,
    batch_headers: HashMap<Hash, BatchHeader>,
    inclusion_infos: HashMap<(BlobKey, Hash), BlobInclusionInfo>,
    attestations: HashMap<Hash, Attestation>,
    /// Last timestamp handed out; keeps `updated_at` strictly increasing
    /// even when the wall clock stalls.
    last_ts: u64,
}

impl Inner {
    fn next_timestamp(&mut self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        self.last_ts = now.max(self.last_ts + 1);
        self.last_ts
    }
}

/// In-memory [`BlobMetadataStore`] guarded by a single RwLock.
#[derive(Default)]
pub struct MemoryBlobStore {
    inner: RwLock<Inner>,
}

impl MemoryBlobStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of blob records (introspection for tests).
    pub fn blob_count(&self) -> usize {
        self.inner.read().metadata.len()
    }
}

#[async_trait]
impl BlobMetadataStore for MemoryBlobStore {
    async fn fetch_encoded(
        &self,
        cursor: Option<Cursor>,
        limit: u32,
    ) -> Result<EncodedPage, StorageError> {
        let inner = self.inner.read();
        let start = cursor.map(|c| (c.updated_at, c.blob_key));

        let mut metadata = Vec::new();
        for &(updated_at, blob_key) in inner.by_updated.iter() {
            if metadata.len() >= limit as usize {
                break;
            }
            // Strictly after the cursor position.
            if let Some(start) = start {
                if (updated_at, blob_key) <= start {
                    continue;
                }
            }
            let Some(meta) = inner.metadata.get(&blob_key) else {
                continue;
            };
            if meta.status == BlobStatus::Encoded {
                metadata.push(meta.clone());
            }
        }

        let next_cursor = metadata.last().map(|m| Cursor {
            updated_at: m.updated_at,
            blob_key: m.blob_key(),
        });
        Ok(EncodedPage {
            metadata,
            next_cursor,
        })
    }

    async fn get_blob_metadata(&self, blob_key: BlobKey) -> Result<BlobMetadata, StorageError> {
        self.inner
            .read()
            .metadata
            .get(&blob_key)
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    async fn put_blob_metadata(&self, mut metadata: BlobMetadata) -> Result<(), StorageError> {
        let mut inner = self.inner.write();
        let key = metadata.blob_key();
        if let Some(existing) = inner.metadata.get(&key) {
            if *existing == metadata {
                return Ok(());
            }
            return Err(StorageError::Conflict);
        }
        if metadata.updated_at == 0 {
            metadata.updated_at = inner.next_timestamp();
        }
        inner.by_updated.insert((metadata.updated_at, key));
        inner.metadata.insert(key, metadata);
        Ok(())
    }

    async fn update_blob_status(
        &self,
        blob_key: BlobKey,
        new_status: BlobStatus,
    ) -> Result<(), StorageError> {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        let ts = inner.next_timestamp();
        let Some(meta) = inner.metadata.get_mut(&blob_key) else {
            return Err(StorageError::NotFound);
        };
        if meta.status == new_status {
            return Err(StorageError::Conflict);
        }
        if !meta.status.can_transition_to(new_status) {
            return Err(StorageError::InvalidTransition {
                from: meta.status,
                to: new_status,
            });
        }
        let old_pos = (meta.updated_at, blob_key);
        meta.status = new_status;
        meta.updated_at = ts;
        inner.by_updated.remove(&old_pos);
        inner.by_updated.insert((ts, blob_key));
        Ok(())
    }

    async fn get_certificate(&self, blob_key: BlobKey) -> Result<BlobCertificate, StorageError> {
        self.inner
            .read()
            .certificates
            .get(&blob_key)
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    async fn put_certificate(&self, certificate: BlobCertificate) -> Result<(), StorageError> {
        let mut inner = self.inner.write();
        let key = certificate.blob_header.blob_key();
        match inner.certificates.get(&key) {
            Some(existing) if *existing == certificate => Ok(()),
            Some(_) => Err(StorageError::Conflict),
            None => {
                inner.certificates.insert(key, certificate);
                Ok(())
            }
        }
    }

    async fn get_batch_header(
        &self,
        batch_header_hash: Hash,
    ) -> Result<BatchHeader, StorageError> {
        self.inner
            .read()
            .batch_headers
            .get(&batch_header_hash)
            .copied()
            .ok_or(StorageError::NotFound)
    }

    async fn put_batch_header(&self, header: BatchHeader) -> Result<(), StorageError> {
        let mut inner = self.inner.write();
        let hash = header.hash();
        match inner.batch_headers.get(&hash) {
            Some(existing) if *existing == header => Ok(()),
            Some(_) => Err(StorageError::Conflict),
            None => {
                inner.batch_headers.insert(hash, header);
                Ok(())
            }
        }
    }

    async fn get_inclusion_info(
        &self,
        blob_key: BlobKey,
        batch_header_hash: Hash,
    ) -> Result<BlobInclusionInfo, StorageError> {
        self.inner
            .read()
            .inclusion_infos
            .get(&(blob_key, batch_header_hash))
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    async fn put_inclusion_info(&self, info: BlobInclusionInfo) -> Result<(), StorageError> {
        let mut inner = self.inner.write();
        let key = (info.blob_key, info.batch_header.hash());
        match inner.inclusion_infos.get(&key) {
            Some(existing) if *existing == info => Ok(()),
            Some(_) => Err(StorageError::Conflict),
            None => {
                inner.inclusion_infos.insert(key, info);
                Ok(())
            }
        }
    }

    async fn get_attestation(&self, batch_header_hash: Hash) -> Result<Attestation, StorageError> {
        self.inner
            .read()
            .attestations
            .get(&batch_header_hash)
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    async fn put_attestation(&self, attestation: Attestation) -> Result<(), StorageError> {
        let mut inner = self.inner.write();
        let hash = attestation.batch_header.hash();
        match inner.attestations.get(&hash) {
            Some(existing) if *existing == attestation => Ok(()),
            Some(_) => Err(StorageError::Conflict),
            None => {
                inner.attestations.insert(hash, attestation);
                Ok(())
            }
        }
    }
}
