//! Signature collection: drain the fan-out channel under the batch
//! attestation deadline, aggregate, classify, persist.

use crate::dispatcher::Dispatcher;
use crate::error::DispatchError;
use crate::fanout::SigningMessage;
use dahlia_chain::ChainState;
use dahlia_network::NodeClientManager;
use dahlia_storage::BlobMetadataStore;
use dahlia_types::{BatchData, BlobKey, BlobStatus};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

impl<S, C, M> Dispatcher<S, C, M>
where
    S: BlobMetadataStore + 'static,
    C: ChainState + 'static,
    M: NodeClientManager + 'static,
{
    /// Collect signatures for one batch and finalize it.
    ///
    /// Drains `rx` until every operator has responded, every quorum has met
    /// its threshold, the batch attestation deadline passes, or `cancel`
    /// fires, whichever comes first. The resulting attestation (possibly
    /// empty) and the terminal status of every blob are then persisted.
    ///
    /// Re-running on the same `BatchData` after a crash is idempotent: all
    /// writes are keyed by batch header hash and blob key.
    pub async fn handle_signatures(
        &self,
        cancel: &CancellationToken,
        batch_data: &BatchData,
        mut rx: mpsc::Receiver<SigningMessage>,
    ) -> Result<(), DispatchError> {
        self.liveness.signal();
        let started = Instant::now();

        let deadline = tokio::time::sleep(self.config.batch_attestation_timeout);
        tokio::pin!(deadline);
        let mut tick = tokio::time::interval(self.config.signature_tick_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut aggregation = self
            .aggregator
            .begin(batch_data.batch.header, batch_data.operator_state.clone());

        loop {
            tokio::select! {
                message = rx.recv() => match message {
                    Some(SigningMessage { operator_id, result }) => match result {
                        Ok(signature) => match aggregation.receive(operator_id, signature) {
                            Ok(()) => {
                                dahlia_metrics::record_signature_received(true);
                                if aggregation.all_quorums_met() {
                                    debug!(
                                        batch_header_hash = %batch_data.batch_header_hash,
                                        "every quorum met threshold, stopping collection early"
                                    );
                                    break;
                                }
                            }
                            Err(e) => {
                                dahlia_metrics::record_signature_received(false);
                                debug!(operator = %operator_id, error = %e, "discarding signature");
                            }
                        },
                        // The fan-out already warned with the socket; the
                        // operator simply contributes no signature.
                        Err(_) => {}
                    },
                    None => {
                        debug!("all operators responded");
                        break;
                    }
                },
                _ = tick.tick() => {
                    self.liveness.signal();
                }
                _ = &mut deadline => {
                    debug!(
                        batch_header_hash = %batch_data.batch_header_hash,
                        signers = aggregation.signer_count(),
                        "batch attestation deadline reached"
                    );
                    break;
                }
                _ = cancel.cancelled() => {
                    debug!("signature collection cancelled");
                    break;
                }
            }
        }
        self.liveness.signal();

        let attestation = aggregation.finalize();
        dahlia_metrics::record_attestation(
            attestation.quorum_numbers.len(),
            started.elapsed().as_secs_f64(),
        );

        // A blob succeeds iff every quorum it was dispersed into is
        // attested.
        let statuses: Vec<(BlobKey, BlobStatus)> = batch_data
            .batch
            .blob_certificates
            .iter()
            .map(|cert| {
                let key = cert.blob_header.blob_key();
                let status = if attestation.covers(&cert.blob_header.quorum_numbers) {
                    BlobStatus::Complete
                } else {
                    BlobStatus::Failed
                };
                (key, status)
            })
            .collect();

        let num_complete = statuses
            .iter()
            .filter(|(_, s)| *s == BlobStatus::Complete)
            .count();
        info!(
            batch_header_hash = %batch_data.batch_header_hash,
            num_blobs = statuses.len(),
            num_complete,
            quorums_met = attestation.quorum_numbers.len(),
            empty_attestation = attestation.is_empty(),
            "batch finalized"
        );
        if num_complete < statuses.len() {
            warn!(
                batch_header_hash = %batch_data.batch_header_hash,
                num_failed = statuses.len() - num_complete,
                "blobs failed to reach quorum"
            );
        }

        let result = self
            .writer
            .persist(batch_data, &attestation, &statuses)
            .await;

        // The batch is finished either way; release the keys so future
        // ticks can pick the blobs up again once the ingestion path
        // re-queues them.
        for key in &batch_data.blob_keys {
            self.blob_set.remove_blob(key);
        }

        result
    }
}
