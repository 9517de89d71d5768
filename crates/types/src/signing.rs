//! Signing messages for operator attestations.
//!
//! Operators sign exactly one message per batch: the canonical batch
//! header hash, as raw bytes. No protocol-level prefix is added, so any
//! conforming operator implementation can derive the message from the
//! batch header alone. Cross-protocol domain separation comes from the
//! hash-to-curve ciphersuite tag in [`crate::crypto::BLS_DST`], which is
//! applied inside every `sign`/`verify`.

use crate::batch::BatchHeader;

/// Build the signing message for a `StoreChunks` attestation: the
/// canonical batch header hash.
///
/// This is used for:
/// - Individual operator signatures returned from `StoreChunks`
/// - Aggregate signature verification in the attestation
pub fn store_chunks_message(batch_header: &BatchHeader) -> Vec<u8> {
    batch_header.hash().as_bytes().to_vec()
}
