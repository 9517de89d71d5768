//! BLS signature aggregation with per-quorum stake accounting.
//!
//! Signatures stream in one at a time and are verified eagerly; stake sums
//! accumulate per quorum so collection can terminate early once every
//! quorum in the batch has met its confirmation threshold. Finalization
//! aggregates the signer keys and signatures into the batch attestation.

use crate::liveness::now_nanos;
use dahlia_types::{
    store_chunks_message, Attestation, BatchHeader, BlsPublicKey, BlsSignature, OperatorId,
    OperatorState, QuorumId,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, error};

/// Stake-fraction thresholds for one quorum, in percent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecurityThresholds {
    /// Minimum signed stake for the quorum to count as attested.
    pub confirmation_threshold: u8,
    /// Stake fraction assumed adversarial; carried for chain verification,
    /// not consulted by the dispatcher's complete/failed decision.
    pub adversarial_threshold: u8,
}

impl Default for SecurityThresholds {
    fn default() -> Self {
        Self {
            confirmation_threshold: 55,
            adversarial_threshold: 33,
        }
    }
}

/// Per-quorum threshold table with a default for unlisted quorums.
#[derive(Debug, Clone, Default)]
pub struct QuorumThresholds {
    default: SecurityThresholds,
    overrides: BTreeMap<QuorumId, SecurityThresholds>,
}

impl QuorumThresholds {
    /// Table using `default` for every quorum.
    pub fn uniform(default: SecurityThresholds) -> Self {
        Self {
            default,
            overrides: BTreeMap::new(),
        }
    }

    /// Override the thresholds of one quorum.
    pub fn with_override(mut self, quorum: QuorumId, thresholds: SecurityThresholds) -> Self {
        self.overrides.insert(quorum, thresholds);
        self
    }

    /// Confirmation threshold for a quorum.
    pub fn confirmation(&self, quorum: QuorumId) -> u8 {
        self.overrides
            .get(&quorum)
            .unwrap_or(&self.default)
            .confirmation_threshold
    }
}

/// Why a received signature was discarded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AggregationError {
    /// Signer is not in the batch's operator state.
    #[error("operator {0} not in the batch operator state")]
    UnknownOperator(OperatorId),

    /// Signer already contributed a valid signature.
    #[error("duplicate signature from operator {0}")]
    Duplicate(OperatorId),

    /// Signature did not verify against the operator's key.
    #[error("invalid signature from operator {0}")]
    InvalidSignature(OperatorId),
}

/// Stateless aggregator factory; holds only the threshold table.
#[derive(Debug, Clone, Default)]
pub struct SignatureAggregator {
    thresholds: QuorumThresholds,
}

impl SignatureAggregator {
    /// Create an aggregator with the given threshold table.
    pub fn new(thresholds: QuorumThresholds) -> Self {
        Self { thresholds }
    }

    /// Start accumulating signatures for one batch.
    pub fn begin(&self, batch_header: BatchHeader, state: Arc<OperatorState>) -> Aggregation {
        Aggregation {
            thresholds: self.thresholds.clone(),
            message: store_chunks_message(&batch_header),
            batch_header,
            state,
            signers: BTreeMap::new(),
            signed_stake: BTreeMap::new(),
        }
    }
}

/// Running aggregation state for one batch.
pub struct Aggregation {
    thresholds: QuorumThresholds,
    message: Vec<u8>,
    batch_header: BatchHeader,
    state: Arc<OperatorState>,
    /// Valid signatures by operator, ordered by operator id so aggregation
    /// is deterministic.
    signers: BTreeMap<OperatorId, BlsSignature>,
    /// Running signed-stake sum per quorum.
    signed_stake: BTreeMap<QuorumId, u64>,
}

impl Aggregation {
    /// Verify and account one signature.
    ///
    /// Invalid or duplicate signatures are reported back but leave the
    /// accumulated state untouched; the caller logs and keeps draining.
    pub fn receive(
        &mut self,
        operator: OperatorId,
        signature: BlsSignature,
    ) -> Result<(), AggregationError> {
        if self.signers.contains_key(&operator) {
            return Err(AggregationError::Duplicate(operator));
        }
        let info = self
            .state
            .operator_info(operator)
            .ok_or(AggregationError::UnknownOperator(operator))?;
        if !signature.verify(&self.message, &info.public_key) {
            return Err(AggregationError::InvalidSignature(operator));
        }

        self.signers.insert(operator, signature);
        for quorum in self.state.operator_quorums(operator) {
            let stake = self
                .state
                .stake(quorum, operator)
                .expect("membership came from the same state");
            *self.signed_stake.entry(quorum).or_default() += stake;
        }
        Ok(())
    }

    /// Signed stake percentage for a quorum, floored to an integer.
    pub fn signed_percent(&self, quorum: QuorumId) -> u8 {
        let signed = self.signed_stake.get(&quorum).copied().unwrap_or(0);
        let total = self.state.total_stake(quorum).unwrap_or(0);
        if total == 0 {
            return 0;
        }
        (100u128 * signed as u128 / total as u128) as u8
    }

    /// Whether one quorum has reached its confirmation threshold.
    pub fn quorum_met(&self, quorum: QuorumId) -> bool {
        self.signed_percent(quorum) >= self.thresholds.confirmation(quorum)
    }

    /// Whether every quorum in the batch has reached threshold; collection
    /// may stop early when this turns true.
    pub fn all_quorums_met(&self) -> bool {
        self.state.quorums().all(|q| self.quorum_met(q))
    }

    /// Number of valid signatures received.
    pub fn signer_count(&self) -> usize {
        self.signers.len()
    }

    /// Build the terminal attestation.
    ///
    /// If no quorum met its threshold the result is the **empty
    /// attestation**, still persisted so that "tried and failed" is
    /// auditable.
    pub fn finalize(self) -> Attestation {
        let attested_at = now_nanos();

        let quorum_numbers: Vec<QuorumId> =
            self.state.quorums().filter(|q| self.quorum_met(*q)).collect();
        if quorum_numbers.is_empty() {
            debug!(
                batch_header_hash = %self.batch_header.hash(),
                signers = self.signers.len(),
                "no quorum met threshold, emitting empty attestation"
            );
            return Attestation::empty(self.batch_header, attested_at);
        }

        let quorum_results: BTreeMap<QuorumId, u8> = self
            .state
            .quorums()
            .map(|q| (q, self.signed_percent(q)))
            .collect();

        let signer_set: BTreeSet<OperatorId> = self.signers.keys().copied().collect();
        let signer_keys: Vec<BlsPublicKey> = self
            .signers
            .keys()
            .filter_map(|id| self.state.operator_info(*id))
            .map(|info| info.public_key)
            .collect();
        let signatures: Vec<BlsSignature> = self.signers.values().copied().collect();

        // Aggregation over a non-empty signer set cannot fail: every point
        // was already group-checked during receive. Guard anyway so a bug
        // degrades to the empty attestation instead of a panic.
        let (sigma, apk_g2) = match (
            BlsSignature::aggregate(&signatures),
            BlsPublicKey::aggregate(&signer_keys),
        ) {
            (Ok(sigma), Ok(apk)) => (Some(sigma), Some(apk)),
            (sig, apk) => {
                error!(?sig, ?apk, "aggregation over verified points failed");
                return Attestation::empty(self.batch_header, attested_at);
            }
        };

        let mut quorum_apks = BTreeMap::new();
        for quorum in self.state.quorums() {
            let members = match self.state.quorum(quorum) {
                Some(members) => members,
                None => continue,
            };
            let keys: Vec<BlsPublicKey> = members
                .operators
                .iter()
                .filter(|(id, _)| signer_set.contains(id))
                .map(|(_, info)| info.public_key)
                .collect();
            if let Ok(apk) = BlsPublicKey::aggregate(&keys) {
                quorum_apks.insert(quorum, apk);
            }
        }

        let non_signer_pubkeys: Vec<BlsPublicKey> = self
            .state
            .committee()
            .into_iter()
            .filter(|id| !signer_set.contains(id))
            .filter_map(|id| self.state.operator_info(id))
            .map(|info| info.public_key)
            .collect();

        Attestation {
            batch_header: self.batch_header,
            attested_at,
            non_signer_pubkeys,
            apk_g2,
            quorum_apks,
            sigma,
            quorum_numbers,
            quorum_results,
        }
    }
}
