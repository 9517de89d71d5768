//! Blob lifecycle types: headers, certificates, metadata, and status.

use crate::identifiers::{AccountId, BlobVersion, QuorumId, RelayKey};
use crate::Hash;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 32-byte content-addressed identifier of a blob header.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlobKey([u8; 32]);

impl BlobKey {
    /// Create a blob key from raw bytes.
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get bytes as slice reference.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for BlobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.to_hex();
        write!(f, "BlobKey({}..{})", &hex[..8], &hex[56..])
    }
}

impl fmt::Display for BlobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Lifecycle of a blob through the disperser.
///
/// ```text
/// Queued → Encoded → GatheringSignatures → { Complete | Failed }
/// ```
///
/// Only `Encoded` blobs are eligible for a new batch. `GatheringSignatures`
/// marks that a batch has claimed the blob; the terminal classification
/// happens during signature collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlobStatus {
    /// Accepted by ingestion, awaiting encoding.
    Queued,
    /// Erasure-encoded; eligible for batching.
    Encoded,
    /// Claimed by a batch; dispersal in flight.
    GatheringSignatures,
    /// Terminal: a sufficient stake-weighted quorum stored the blob.
    Complete,
    /// Terminal: the blob's quorums did not reach threshold.
    Failed,
}

impl BlobStatus {
    /// Whether this status admits no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, BlobStatus::Complete | BlobStatus::Failed)
    }

    /// Whether the state machine permits moving from `self` to `next`.
    pub fn can_transition_to(&self, next: BlobStatus) -> bool {
        matches!(
            (self, next),
            (BlobStatus::Queued, BlobStatus::Encoded)
                | (BlobStatus::Encoded, BlobStatus::GatheringSignatures)
                | (BlobStatus::GatheringSignatures, BlobStatus::Complete)
                | (BlobStatus::GatheringSignatures, BlobStatus::Failed)
        )
    }
}

impl fmt::Display for BlobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BlobStatus::Queued => "Queued",
            BlobStatus::Encoded => "Encoded",
            BlobStatus::GatheringSignatures => "GatheringSignatures",
            BlobStatus::Complete => "Complete",
            BlobStatus::Failed => "Failed",
        };
        write!(f, "{s}")
    }
}

/// Payment accounting carried in the blob header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PaymentMetadata {
    /// Paying account.
    pub account: AccountId,
    /// Client-declared dispersal timestamp (nanoseconds since epoch).
    pub timestamp: u64,
    /// Running total paid by this account.
    pub cumulative_payment: u128,
}

/// Erasure-coding commitments for a blob. Opaque to the dispatcher; produced
/// by the encoder and verified operator-side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BlobCommitments {
    /// KZG commitment to the blob polynomial.
    pub commitment: Vec<u8>,
    /// Commitment to the length polynomial.
    pub length_commitment: Vec<u8>,
    /// Proof for the length commitment.
    pub length_proof: Vec<u8>,
    /// Blob length in field elements.
    pub length: u32,
}

/// Header describing one blob dispersal request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobHeader {
    /// Header encoding version.
    pub version: BlobVersion,
    /// Quorums the blob is dispersed into.
    pub quorum_numbers: Vec<QuorumId>,
    /// Erasure-coding commitments.
    pub commitments: BlobCommitments,
    /// Payment metadata.
    pub payment: PaymentMetadata,
}

impl BlobHeader {
    /// Content-addressed key of this header: Keccak-256 over the canonical
    /// encoding.
    pub fn blob_key(&self) -> BlobKey {
        BlobKey(Hash::from_bytes(&self.canonical_bytes()).to_bytes())
    }

    /// Deterministic byte encoding used for hashing. Every field
    /// participates; variable-length fields are length-prefixed.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(128);
        buf.extend_from_slice(&self.version.0.to_be_bytes());
        buf.push(self.quorum_numbers.len() as u8);
        for q in &self.quorum_numbers {
            buf.push(q.0);
        }
        put_bytes(&mut buf, &self.commitments.commitment);
        put_bytes(&mut buf, &self.commitments.length_commitment);
        put_bytes(&mut buf, &self.commitments.length_proof);
        buf.extend_from_slice(&self.commitments.length.to_be_bytes());
        buf.extend_from_slice(&self.payment.account.0);
        buf.extend_from_slice(&self.payment.timestamp.to_be_bytes());
        buf.extend_from_slice(&self.payment.cumulative_payment.to_be_bytes());
        buf
    }
}

/// A blob header plus the relay placement decided by the encoder, signed by
/// the client where required.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobCertificate {
    /// The blob header.
    pub blob_header: BlobHeader,
    /// Client signature over the blob key; empty when unsigned.
    pub signature: Vec<u8>,
    /// Relays serving the blob's chunks, in placement order.
    pub relay_keys: Vec<RelayKey>,
}

impl BlobCertificate {
    /// Canonical certificate hash; the Merkle tree leaf for this blob.
    pub fn hash(&self) -> Hash {
        let mut buf = self.blob_header.canonical_bytes();
        put_bytes(&mut buf, &self.signature);
        buf.extend_from_slice(&(self.relay_keys.len() as u32).to_be_bytes());
        for rk in &self.relay_keys {
            buf.extend_from_slice(&rk.0.to_be_bytes());
        }
        Hash::from_bytes(&buf)
    }
}

/// Mutable record tracking a blob through the dispersal state machine.
///
/// `updated_at` is a monotonic nanosecond timestamp used as the dispatcher's
/// cursor key; the store bumps it on every status transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobMetadata {
    /// The blob header.
    pub blob_header: BlobHeader,
    /// Current lifecycle status.
    pub status: BlobStatus,
    /// Expiry (unix seconds); past-expiry blobs are dropped from batches.
    pub expiry: u64,
    /// Dispersal attempts consumed by the ingestion path.
    pub num_retries: u32,
    /// Monotonic nanosecond timestamp of the last mutation.
    pub updated_at: u64,
}

impl BlobMetadata {
    /// Key of the underlying blob.
    pub fn blob_key(&self) -> BlobKey {
        self.blob_header.blob_key()
    }
}

fn put_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    buf.extend_from_slice(bytes);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(quorums: &[u8]) -> BlobHeader {
        BlobHeader {
            version: BlobVersion(0),
            quorum_numbers: quorums.iter().copied().map(QuorumId).collect(),
            commitments: BlobCommitments {
                commitment: vec![1, 2, 3],
                length_commitment: vec![4, 5],
                length_proof: vec![6],
                length: 64,
            },
            payment: PaymentMetadata {
                account: AccountId([7u8; 20]),
                timestamp: 1,
                cumulative_payment: 532,
            },
        }
    }

    #[test]
    fn test_blob_key_deterministic() {
        assert_eq!(header(&[0, 1]).blob_key(), header(&[0, 1]).blob_key());
        assert_ne!(header(&[0, 1]).blob_key(), header(&[0]).blob_key());
    }

    #[test]
    fn test_certificate_hash_covers_relay_keys() {
        let cert = BlobCertificate {
            blob_header: header(&[0]),
            signature: vec![],
            relay_keys: vec![RelayKey(0), RelayKey(1)],
        };
        let mut other = cert.clone();
        other.relay_keys = vec![RelayKey(1), RelayKey(0)];
        assert_ne!(cert.hash(), other.hash());
    }

    #[test]
    fn test_length_prefix_prevents_field_bleed() {
        // Moving a byte across the signature/relay boundary must change the hash.
        let a = BlobCertificate {
            blob_header: header(&[0]),
            signature: vec![1, 2],
            relay_keys: vec![],
        };
        let b = BlobCertificate {
            blob_header: header(&[0]),
            signature: vec![1],
            relay_keys: vec![RelayKey(2)],
        };
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn test_status_transitions() {
        use BlobStatus::*;
        assert!(Queued.can_transition_to(Encoded));
        assert!(Encoded.can_transition_to(GatheringSignatures));
        assert!(GatheringSignatures.can_transition_to(Complete));
        assert!(GatheringSignatures.can_transition_to(Failed));

        assert!(!Encoded.can_transition_to(Complete));
        assert!(!Complete.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Encoded));
        assert!(!Encoded.can_transition_to(Encoded));

        assert!(Complete.is_terminal());
        assert!(Failed.is_terminal());
        assert!(!GatheringSignatures.is_terminal());
    }
}
