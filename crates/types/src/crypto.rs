//! BLS12-381 keys and signatures for batch attestations.
//!
//! Uses the min-sig ciphersuite: signatures live in G1 (48 bytes compressed)
//! and public keys in G2 (96 bytes compressed). This keeps the per-operator
//! signature small on the wire while the attestation carries a single G2
//! aggregate public key for verification.
//!
//! ## Helper Functions
//! - `BlsSecretKey::generate()` / `from_seed()` - key generation
//! - `BlsSignature::aggregate()` / `BlsPublicKey::aggregate()` - aggregation
//! - `BlsSignature::verify()` - single pairing check

use blst::min_sig as bls;
use blst::BLST_ERROR;
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Ciphersuite tag for all batch attestation signatures.
///
/// Hash-to-curve domain separation; every `sign`/`verify` in this crate
/// uses this tag, so a signature can never be replayed in another protocol.
pub const BLS_DST: &[u8] = b"DAHLIA_BATCH_V1_BLS_SIG_BLS12381G1_XMD:SHA-256_SSWU_RO_";

/// Errors from BLS operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    /// Bytes did not decode to a valid curve point.
    #[error("invalid point encoding")]
    InvalidPoint,

    /// Aggregation over an empty set.
    #[error("cannot aggregate an empty set")]
    EmptyAggregation,

    /// Key generation failed (seed too short).
    #[error("key generation failed")]
    KeyGen,
}

/// BLS12-381 secret key (scalar).
#[derive(Clone)]
pub struct BlsSecretKey(bls::SecretKey);

impl BlsSecretKey {
    /// Generate a new random secret key.
    pub fn generate() -> Self {
        let mut ikm = [0u8; 32];
        rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut ikm);
        Self::from_seed(&ikm)
    }

    /// Derive a secret key from a 32-byte seed (deterministic, for tests).
    ///
    /// Uses blst's `key_gen` which hashes the full seed to derive a valid
    /// BLS scalar.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let sk = bls::SecretKey::key_gen(seed, &[]).expect("32-byte ikm is always sufficient");
        Self(sk)
    }

    /// Sign a message under the crate ciphersuite tag.
    pub fn sign(&self, message: &[u8]) -> BlsSignature {
        let sig = self.0.sign(message, BLS_DST, &[]);
        BlsSignature(sig.to_bytes())
    }

    /// The corresponding G2 public key.
    pub fn public_key(&self) -> BlsPublicKey {
        BlsPublicKey(self.0.sk_to_pk().to_bytes())
    }
}

impl fmt::Debug for BlsSecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlsSecretKey(..)")
    }
}

/// BLS12-381 G2 public key, stored compressed.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlsPublicKey([u8; 96]);

impl BlsPublicKey {
    /// Decode from compressed bytes, validating the point is in the group.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let pk = bls::PublicKey::key_validate(bytes).map_err(|_| CryptoError::InvalidPoint)?;
        Ok(Self(pk.to_bytes()))
    }

    /// Compressed encoding.
    pub fn to_bytes(self) -> [u8; 96] {
        self.0
    }

    /// Compressed encoding as a slice.
    pub fn as_bytes(&self) -> &[u8; 96] {
        &self.0
    }

    /// Aggregate a set of public keys into one.
    ///
    /// # Errors
    ///
    /// Returns an error for an empty set or if any key fails the group check.
    pub fn aggregate(keys: &[BlsPublicKey]) -> Result<BlsPublicKey, CryptoError> {
        if keys.is_empty() {
            return Err(CryptoError::EmptyAggregation);
        }
        let parsed: Vec<bls::PublicKey> = keys
            .iter()
            .map(|k| bls::PublicKey::from_bytes(&k.0).map_err(|_| CryptoError::InvalidPoint))
            .collect::<Result<_, _>>()?;
        let refs: Vec<&bls::PublicKey> = parsed.iter().collect();
        let agg = bls::AggregatePublicKey::aggregate(&refs, true)
            .map_err(|_| CryptoError::InvalidPoint)?;
        Ok(BlsPublicKey(agg.to_public_key().to_bytes()))
    }
}

impl fmt::Debug for BlsPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = hex::encode(&self.0[..4]);
        write!(f, "BlsPublicKey({hex}..)")
    }
}

/// BLS12-381 G1 signature, stored compressed.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlsSignature([u8; 48]);

impl BlsSignature {
    /// Decode from compressed bytes, validating the point is in the group.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let sig = bls::Signature::sig_validate(bytes, false).map_err(|_| CryptoError::InvalidPoint)?;
        Ok(Self(sig.to_bytes()))
    }

    /// Compressed encoding.
    pub fn to_bytes(self) -> [u8; 48] {
        self.0
    }

    /// Compressed encoding as a slice.
    pub fn as_bytes(&self) -> &[u8; 48] {
        &self.0
    }

    /// Verify this signature over `message` against `public_key`.
    pub fn verify(&self, message: &[u8], public_key: &BlsPublicKey) -> bool {
        let sig = match bls::Signature::from_bytes(&self.0) {
            Ok(s) => s,
            Err(_) => return false,
        };
        let pk = match bls::PublicKey::from_bytes(&public_key.0) {
            Ok(p) => p,
            Err(_) => return false,
        };
        sig.verify(true, message, BLS_DST, &[], &pk, true) == BLST_ERROR::BLST_SUCCESS
    }

    /// Aggregate a set of signatures into one.
    ///
    /// # Errors
    ///
    /// Returns an error for an empty set or if any signature fails the
    /// group check.
    pub fn aggregate(signatures: &[BlsSignature]) -> Result<BlsSignature, CryptoError> {
        if signatures.is_empty() {
            return Err(CryptoError::EmptyAggregation);
        }
        let parsed: Vec<bls::Signature> = signatures
            .iter()
            .map(|s| bls::Signature::from_bytes(&s.0).map_err(|_| CryptoError::InvalidPoint))
            .collect::<Result<_, _>>()?;
        let refs: Vec<&bls::Signature> = parsed.iter().collect();
        let agg = bls::AggregateSignature::aggregate(&refs, true)
            .map_err(|_| CryptoError::InvalidPoint)?;
        Ok(BlsSignature(agg.to_signature().to_bytes()))
    }
}

impl fmt::Debug for BlsSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = hex::encode(&self.0[..4]);
        write!(f, "BlsSignature({hex}..)")
    }
}

// Serde support: encode points as hex strings so the derives on containing
// types stay simple and store backends remain human-inspectable.

impl Serialize for BlsPublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for BlsPublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(DeError::custom)?;
        BlsPublicKey::from_bytes(&bytes).map_err(DeError::custom)
    }
}

impl Serialize for BlsSignature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for BlsSignature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(DeError::custom)?;
        BlsSignature::from_bytes(&bytes).map_err(DeError::custom)
    }
}
