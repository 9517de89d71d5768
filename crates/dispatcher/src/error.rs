//! Dispatcher error taxonomy.

use dahlia_chain::ChainError;
use dahlia_storage::StorageError;

/// Errors surfaced by dispatcher operations.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The tick found no eligible blobs. Expected; logged at debug.
    #[error("no blobs to dispatch")]
    NoBlobsToDispatch,

    /// Metadata store failure that survived the retry budget.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Chain view failure.
    #[error(transparent)]
    Chain(#[from] ChainError),

    /// The store reported an impossible state; the tick continues without
    /// the offending record.
    #[error("invariant violated: {0}")]
    Invariant(String),

    /// Loss of a collaborator for the whole tick; the loop skips the tick
    /// but the process stays up.
    #[error("tick aborted: {0}")]
    Fatal(String),
}
