//! Identifier newtypes used throughout the dispersal network.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a quorum: a named subset of the operator set with its own
/// stake distribution and thresholds.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct QuorumId(pub u8);

impl fmt::Display for QuorumId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "q{}", self.0)
    }
}

/// Unique 32-byte identifier of an operator node.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OperatorId([u8; 32]);

impl OperatorId {
    /// Create an operator id from raw bytes.
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Parse an operator id from a 64-character hex string.
    pub fn from_hex(hex: &str) -> Result<Self, OperatorIdParseError> {
        if hex.len() != 64 {
            return Err(OperatorIdParseError::InvalidLength(hex.len()));
        }
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(hex, &mut bytes).map_err(|_| OperatorIdParseError::InvalidHex)?;
        Ok(Self(bytes))
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Get bytes as slice reference.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for OperatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.to_hex();
        write!(f, "OperatorId({}..{})", &hex[..8], &hex[56..])
    }
}

impl fmt::Display for OperatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Errors that can occur when parsing an operator id.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OperatorIdParseError {
    /// Hex string has the wrong length.
    #[error("invalid operator id length: expected 64 hex chars, got {0}")]
    InvalidLength(usize),

    /// Invalid hex characters.
    #[error("invalid hex in operator id")]
    InvalidHex,
}

/// Identifies a relay that serves chunks for a blob.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct RelayKey(pub u16);

/// Version of the blob header encoding.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct BlobVersion(pub u16);

/// Dispersal endpoint of an operator, `host:port`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OperatorSocket(String);

impl OperatorSocket {
    /// Create a socket from its string form.
    pub fn new(socket: impl Into<String>) -> Self {
        Self(socket.into())
    }

    /// The `host:port` string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OperatorSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// On-chain account that pays for a dispersal.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct AccountId(pub [u8; 20]);

impl fmt::Debug for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccountId(0x{})", hex::encode(self.0))
    }
}
