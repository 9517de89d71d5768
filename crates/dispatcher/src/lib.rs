//! The disperser control plane's dispatcher.
//!
//! The dispatcher drives a blob from `Encoded` to a terminal status:
//!
//! ```text
//!  metadata store ──► new_batch ──► handle_batch ──► handle_signatures
//!   (cursor over       Merkle tree,   StoreChunks        drain signature
//!    Encoded blobs)    claim blobs    fan-out with       channel, aggregate,
//!                                     retries            classify, persist
//! ```
//!
//! Every tick, [`Dispatcher::run`] pulls a page of encoded blobs, groups
//! them into a batch bounded by `max_batch_size`, fans out per-operator
//! `StoreChunks` requests under bounded concurrency, collects BLS
//! signatures until the batch attestation deadline, aggregates them per
//! quorum under stake-weighted thresholds, and persists the attestation
//! plus terminal blob statuses.
//!
//! All collaborators are injected; there is no global mutable state. A
//! single dispatcher instance must own the queue; horizontal scale needs
//! external leader election.

mod aggregation;
mod batcher;
mod blob_set;
mod collector;
mod config;
mod dispatcher;
mod error;
mod fanout;
mod liveness;
mod writer;

pub use aggregation::{
    Aggregation, AggregationError, QuorumThresholds, SecurityThresholds, SignatureAggregator,
};
pub use blob_set::BlobSet;
pub use config::{ConfigError, DispatcherConfig};
pub use dispatcher::{BeforeDispatchFn, Dispatcher};
pub use error::DispatchError;
pub use fanout::SigningMessage;
pub use liveness::{HeartbeatMessage, Liveness, COMPONENT};
pub use writer::AttestationWriter;
