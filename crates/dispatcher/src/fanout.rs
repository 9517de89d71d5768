//! Fan-out: per-operator `StoreChunks` dispatch with bounded concurrency,
//! per-attempt timeouts, and jittered retry.

use crate::dispatcher::Dispatcher;
use crate::error::DispatchError;
use dahlia_chain::ChainState;
use dahlia_network::{ClientError, NodeClientManager};
use dahlia_storage::BlobMetadataStore;
use dahlia_types::{
    chunk_assignment, Batch, BatchData, BlsSignature, ChunkAssignment, OperatorId, OperatorSocket,
};
use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Starting backoff between attempts to one operator.
const INITIAL_BACKOFF: Duration = Duration::from_millis(100);

/// Backoff ceiling.
const MAX_BACKOFF: Duration = Duration::from_secs(2);

/// Terminal outcome of dispatching to one operator.
#[derive(Debug)]
pub struct SigningMessage {
    /// The operator that was dispatched to.
    pub operator_id: OperatorId,
    /// Its signature, or the last error once retries were exhausted.
    pub result: Result<BlsSignature, ClientError>,
}

impl<S, C, M> Dispatcher<S, C, M>
where
    S: BlobMetadataStore + 'static,
    C: ChainState + 'static,
    M: NodeClientManager + 'static,
{
    /// Dispatch `StoreChunks` to every committee member of the batch.
    ///
    /// Returns a channel of per-operator outcomes. The channel closes when
    /// every operator has terminally responded; cancelling `cancel`
    /// releases outstanding workers promptly, so the caller enforces the
    /// batch attestation deadline by cancelling the token.
    pub async fn handle_batch(
        &self,
        cancel: &CancellationToken,
        batch_data: &BatchData,
    ) -> Result<mpsc::Receiver<SigningMessage>, DispatchError> {
        let state = Arc::clone(&batch_data.operator_state);
        let committee = state.committee();
        if committee.is_empty() {
            return Err(DispatchError::Invariant(
                "batch committee is empty".to_string(),
            ));
        }

        let batch = Arc::new(batch_data.batch.clone());
        let (tx, rx) = mpsc::channel(committee.len());
        let semaphore = Arc::new(Semaphore::new(self.config.num_concurrent_requests));

        for operator_id in committee {
            let Some(info) = state.operator_info(operator_id) else {
                // committee() enumerated this id from the same state.
                continue;
            };
            let assignment = chunk_assignment(&batch, &state, operator_id);
            if assignment.is_empty() {
                debug!(operator = %operator_id, "operator has no chunks in batch, skipping");
                continue;
            }

            let socket = info.socket.clone();
            let batch = Arc::clone(&batch);
            let clients = Arc::clone(&self.clients);
            let tx = tx.clone();
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            let attestation_timeout = self.config.attestation_timeout;
            let num_request_retries = self.config.num_request_retries;

            tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                let result = tokio::select! {
                    _ = cancel.cancelled() => Err(ClientError::Shutdown),
                    result = store_chunks_with_retries(
                        clients.as_ref(),
                        &socket,
                        &batch,
                        &assignment,
                        attestation_timeout,
                        num_request_retries,
                    ) => result,
                };
                match &result {
                    Err(ClientError::Shutdown) => {}
                    Err(e) => {
                        warn!(operator = %operator_id, socket = %socket, error = %e, "dispatch to operator failed");
                    }
                    Ok(_) => {}
                }
                let _ = tx
                    .send(SigningMessage {
                        operator_id,
                        result,
                    })
                    .await;
            });
        }

        // Workers hold the only remaining senders; the channel closes once
        // the last one responds.
        drop(tx);
        Ok(rx)
    }
}

/// One operator's dispatch: per-attempt timeout, retry on retryable errors
/// with jittered exponential backoff.
async fn store_chunks_with_retries<M: NodeClientManager + ?Sized>(
    clients: &M,
    socket: &OperatorSocket,
    batch: &Batch,
    assignment: &ChunkAssignment,
    attestation_timeout: Duration,
    num_request_retries: u32,
) -> Result<BlsSignature, ClientError> {
    let mut backoff = INITIAL_BACKOFF;
    let mut last_error = ClientError::Timeout;

    for attempt in 0..=num_request_retries {
        let started = Instant::now();
        let outcome = async {
            let client = clients.get_client(socket).await?;
            tokio::time::timeout(attestation_timeout, client.store_chunks(batch, assignment))
                .await
                .map_err(|_| ClientError::Timeout)?
        }
        .await;

        match outcome {
            Ok(signature) => {
                dahlia_metrics::record_store_chunks(true, started.elapsed().as_secs_f64());
                return Ok(signature);
            }
            Err(e) => {
                dahlia_metrics::record_store_chunks(false, started.elapsed().as_secs_f64());
                debug!(socket = %socket, attempt, error = %e, "store chunks attempt failed");
                if !e.is_retryable() {
                    return Err(e);
                }
                last_error = e;
            }
        }

        if attempt < num_request_retries {
            tokio::time::sleep(jittered(backoff)).await;
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }

    dahlia_metrics::record_dispatch_failure();
    Err(last_error)
}

/// Add up to 25% random jitter so retries from a batch don't synchronize.
fn jittered(backoff: Duration) -> Duration {
    backoff.mul_f64(1.0 + rand::thread_rng().gen_range(0.0..0.25))
}
