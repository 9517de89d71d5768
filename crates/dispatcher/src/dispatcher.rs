//! The dispatcher: periodic driver composing batching, fan-out, and
//! signature collection.

use crate::aggregation::SignatureAggregator;
use crate::blob_set::BlobSet;
use crate::config::{ConfigError, DispatcherConfig};
use crate::error::DispatchError;
use crate::liveness::{HeartbeatMessage, Liveness};
use crate::writer::AttestationWriter;
use dahlia_chain::ChainState;
use dahlia_network::NodeClientManager;
use dahlia_storage::{BlobMetadataStore, Cursor};
use dahlia_types::BlobKey;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Hook invoked once per blob key when the key leaves `Encoded`.
///
/// Used by upstream stages (the encoder queue) to drop their own tracking
/// set. Errors are logged and do not abort the batch.
pub type BeforeDispatchFn =
    Arc<dyn Fn(BlobKey) -> Result<(), Box<dyn std::error::Error + Send + Sync>> + Send + Sync>;

/// Periodic driver of the dispersal pipeline.
///
/// Every `pull_interval` the dispatcher pulls a page of encoded blobs,
/// builds a batch, fans out `StoreChunks` to the committee, collects
/// signatures until the attestation deadline, and persists the outcome.
/// All collaborators are injected; a single instance owns the queue.
pub struct Dispatcher<S, C, M> {
    pub(crate) config: DispatcherConfig,
    pub(crate) store: Arc<S>,
    pub(crate) chain: Arc<C>,
    pub(crate) clients: Arc<M>,
    pub(crate) aggregator: SignatureAggregator,
    pub(crate) writer: AttestationWriter<S>,
    pub(crate) blob_set: Arc<BlobSet>,
    pub(crate) cursor: Mutex<Option<Cursor>>,
    pub(crate) before_dispatch: Option<BeforeDispatchFn>,
    pub(crate) liveness: Liveness,
}

impl<S, C, M> Dispatcher<S, C, M>
where
    S: BlobMetadataStore + 'static,
    C: ChainState + 'static,
    M: NodeClientManager + 'static,
{
    /// Construct a dispatcher from its collaborators.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: DispatcherConfig,
        store: Arc<S>,
        chain: Arc<C>,
        clients: Arc<M>,
        aggregator: SignatureAggregator,
        blob_set: Arc<BlobSet>,
        before_dispatch: Option<BeforeDispatchFn>,
        liveness_tx: mpsc::Sender<HeartbeatMessage>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let writer = AttestationWriter::new(store.clone(), config.num_request_retries);
        Ok(Self {
            config,
            store,
            chain,
            clients,
            aggregator,
            writer,
            blob_set,
            cursor: Mutex::new(None),
            before_dispatch,
            liveness: Liveness::new(liveness_tx),
        })
    }

    /// The in-flight blob set, for external introspection.
    pub fn blob_set(&self) -> &Arc<BlobSet> {
        &self.blob_set
    }

    /// Run the dispatch loop until `cancel` fires.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.pull_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            pull_interval_ms = self.config.pull_interval.as_millis() as u64,
            max_batch_size = self.config.max_batch_size,
            "dispatcher started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("dispatcher stopping");
                    return;
                }
                _ = interval.tick() => {}
            }

            self.liveness.signal();
            match self.handle_tick(&cancel).await {
                Ok(()) => {}
                Err(DispatchError::NoBlobsToDispatch) => {
                    debug!("no blobs to dispatch");
                }
                Err(DispatchError::Fatal(reason)) => {
                    // Collaborator loss: skip the tick, stay up, and keep
                    // heartbeating so the condition is visible downstream.
                    error!(%reason, "tick aborted");
                    self.liveness.signal();
                }
                Err(e) => {
                    warn!(error = %e, "tick failed");
                }
            }
        }
    }

    /// One tick: build a batch, fan out, collect signatures.
    pub async fn handle_tick(&self, cancel: &CancellationToken) -> Result<(), DispatchError> {
        let current_block = self
            .chain
            .current_block()
            .await
            .map_err(|e| DispatchError::Fatal(format!("chain head unavailable: {e}")))?;
        let reference_block = current_block.saturating_sub(self.config.finalization_block_delay);

        let batch_data = self.new_batch(reference_block).await?;

        // The batch token lets the collector release fan-out workers as
        // soon as the attestation deadline passes.
        let batch_cancel = cancel.child_token();
        let rx = match self.handle_batch(&batch_cancel, &batch_data).await {
            Ok(rx) => rx,
            Err(e) => {
                // Fan-out never started; release the claims so the keys do
                // not pin the in-flight set forever.
                for key in &batch_data.blob_keys {
                    self.blob_set.remove_blob(key);
                }
                return Err(e);
            }
        };
        let result = self.handle_signatures(&batch_cancel, &batch_data, rx).await;
        batch_cancel.cancel();
        result
    }
}
