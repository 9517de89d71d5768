//! Scripted in-memory node clients.
//!
//! Test double for the operator RPC layer: each endpoint is registered with
//! a [`MockBehavior`] describing how the "operator" responds to
//! `StoreChunks`. Used by the dispatcher's integration tests the way the
//! memory network backs the consensus simulator.

use async_trait::async_trait;
use dahlia_network::{ClientError, NodeClient, NodeClientManager};
use dahlia_types::{store_chunks_message, Batch, BlsSecretKey, BlsSignature, ChunkAssignment, OperatorSocket};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// How a mock operator responds to `StoreChunks`.
pub enum MockBehavior {
    /// Sign the batch header hash with this key.
    Sign(BlsSecretKey),
    /// Fail every attempt with a transport error.
    Fail,
    /// Fail the first `n` attempts, then sign.
    FailThenSign(u32, BlsSecretKey),
    /// Sign, but with a signature by the wrong key (invalid at the
    /// aggregator).
    SignWithWrongKey(BlsSecretKey),
    /// Sleep for the given duration before signing; drives timeout paths.
    DelayThenSign(Duration, BlsSecretKey),
    /// Never respond.
    Hang,
}

/// One scripted operator endpoint.
pub struct MockNodeClient {
    behavior: MockBehavior,
    attempts: AtomicUsize,
    /// Assignments observed across calls, for test assertions.
    seen_assignments: Mutex<Vec<ChunkAssignment>>,
}

impl MockNodeClient {
    /// Create a client with the given behavior.
    pub fn new(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            attempts: AtomicUsize::new(0),
            seen_assignments: Mutex::new(Vec::new()),
        }
    }

    /// Number of `store_chunks` attempts observed.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Assignments observed so far.
    pub fn seen_assignments(&self) -> Vec<ChunkAssignment> {
        self.seen_assignments.lock().clone()
    }
}

#[async_trait]
impl NodeClient for MockNodeClient {
    async fn store_chunks(
        &self,
        batch: &Batch,
        assignment: &ChunkAssignment,
    ) -> Result<BlsSignature, ClientError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        self.seen_assignments.lock().push(assignment.clone());

        let message = store_chunks_message(&batch.header);
        match &self.behavior {
            MockBehavior::Sign(key) => Ok(key.sign(&message)),
            MockBehavior::Fail => Err(ClientError::Transport("scripted failure".into())),
            MockBehavior::FailThenSign(n, key) => {
                if (attempt as u32) < *n {
                    Err(ClientError::Transport("scripted failure".into()))
                } else {
                    Ok(key.sign(&message))
                }
            }
            MockBehavior::SignWithWrongKey(key) => Ok(key.sign(b"some other message")),
            MockBehavior::DelayThenSign(delay, key) => {
                tokio::time::sleep(*delay).await;
                Ok(key.sign(&message))
            }
            MockBehavior::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            }
        }
    }
}

/// [`NodeClientManager`] over a registry of scripted endpoints.
#[derive(Default)]
pub struct MemoryClientManager {
    clients: DashMap<OperatorSocket, Arc<MockNodeClient>>,
}

impl MemoryClientManager {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the behavior for an endpoint, returning the client so tests
    /// can inspect it later.
    pub fn register(
        &self,
        socket: OperatorSocket,
        behavior: MockBehavior,
    ) -> Arc<MockNodeClient> {
        let client = Arc::new(MockNodeClient::new(behavior));
        self.clients.insert(socket, client.clone());
        client
    }
}

#[async_trait]
impl NodeClientManager for MemoryClientManager {
    async fn get_client(
        &self,
        socket: &OperatorSocket,
    ) -> Result<Arc<dyn NodeClient>, ClientError> {
        self.clients
            .get(socket)
            .map(|c| c.clone() as Arc<dyn NodeClient>)
            .ok_or_else(|| ClientError::Unreachable(socket.clone()))
    }
}
