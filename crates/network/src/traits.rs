//! Node client traits and the caching client pool.

use async_trait::async_trait;
use dahlia_types::{Batch, BlsSignature, ChunkAssignment, OperatorSocket};
use dashmap::DashMap;
use std::sync::Arc;

/// Error returned when a `StoreChunks` call fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// The per-attempt deadline elapsed.
    #[error("request timed out")]
    Timeout,

    /// Transport failure; safe to retry.
    #[error("transport error: {0}")]
    Transport(String),

    /// The operator answered with a protocol-level rejection.
    #[error("operator rejected request: {0}")]
    Rejected(String),

    /// The endpoint could not be dialed.
    #[error("unreachable endpoint: {0}")]
    Unreachable(OperatorSocket),

    /// The client pool is shutting down.
    #[error("shutting down")]
    Shutdown,
}

impl ClientError {
    /// Whether a retry against the same endpoint can plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::Timeout | ClientError::Transport(_) | ClientError::Unreachable(_)
        )
    }
}

/// RPC surface of one operator node, as seen by the dispatcher.
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// Ask the operator to store its assigned chunks for a batch.
    ///
    /// The operator validates the assignment against the batch's reference
    /// block and, on success, returns its BLS signature over the batch
    /// header hash.
    async fn store_chunks(
        &self,
        batch: &Batch,
        assignment: &ChunkAssignment,
    ) -> Result<BlsSignature, ClientError>;
}

/// Hands out clients keyed by dispersal endpoint.
///
/// The manager owns connection reuse: repeated calls for the same socket
/// return the same client, and the client bounds its own per-endpoint
/// concurrency.
#[async_trait]
pub trait NodeClientManager: Send + Sync {
    /// Get (or establish) the client for an endpoint.
    async fn get_client(
        &self,
        socket: &OperatorSocket,
    ) -> Result<Arc<dyn NodeClient>, ClientError>;
}

/// Dials a fresh client for an endpoint. Implemented by the transport layer
/// (gRPC in production, scripted mocks in tests).
#[async_trait]
pub trait Connect: Send + Sync {
    /// Establish a new client for `socket`.
    async fn connect(&self, socket: &OperatorSocket) -> Result<Arc<dyn NodeClient>, ClientError>;
}

/// [`NodeClientManager`] that caches one client per endpoint.
///
/// Concurrent `get_client` calls for a missing endpoint may race; the
/// winner's client is kept and the loser's dropped, which is harmless since
/// clients are stateless handles over a shared connection.
pub struct CachingClientManager<C> {
    connector: C,
    clients: DashMap<OperatorSocket, Arc<dyn NodeClient>>,
}

impl<C: Connect> CachingClientManager<C> {
    /// Create a manager around a connector.
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            clients: DashMap::new(),
        }
    }

    /// Number of cached endpoints.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[async_trait]
impl<C: Connect> NodeClientManager for CachingClientManager<C> {
    async fn get_client(
        &self,
        socket: &OperatorSocket,
    ) -> Result<Arc<dyn NodeClient>, ClientError> {
        if let Some(client) = self.clients.get(socket) {
            return Ok(client.clone());
        }
        let client = self.connector.connect(socket).await?;
        self.clients.insert(socket.clone(), client.clone());
        Ok(client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NullClient;

    #[async_trait]
    impl NodeClient for NullClient {
        async fn store_chunks(
            &self,
            _batch: &Batch,
            _assignment: &ChunkAssignment,
        ) -> Result<BlsSignature, ClientError> {
            Err(ClientError::Transport("null".into()))
        }
    }

    struct CountingConnector(AtomicUsize);

    #[async_trait]
    impl Connect for CountingConnector {
        async fn connect(
            &self,
            _socket: &OperatorSocket,
        ) -> Result<Arc<dyn NodeClient>, ClientError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(NullClient))
        }
    }

    #[tokio::test]
    async fn test_client_reuse_per_endpoint() {
        let manager = CachingClientManager::new(CountingConnector(AtomicUsize::new(0)));
        let a = OperatorSocket::new("127.0.0.1:32000");
        let b = OperatorSocket::new("127.0.0.1:32001");

        manager.get_client(&a).await.unwrap();
        manager.get_client(&a).await.unwrap();
        manager.get_client(&b).await.unwrap();

        assert_eq!(manager.connector.0.load(Ordering::SeqCst), 2);
        assert_eq!(manager.len(), 2);
    }

    #[test]
    fn test_retryable_classification() {
        assert!(ClientError::Timeout.is_retryable());
        assert!(ClientError::Transport("reset".into()).is_retryable());
        assert!(!ClientError::Rejected("bad assignment".into()).is_retryable());
        assert!(!ClientError::Shutdown.is_retryable());
    }
}
