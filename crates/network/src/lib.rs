//! Operator node clients.
//!
//! Defines the [`NodeClient`] interface the fan-out engine speaks to
//! operators, and the [`NodeClientManager`] that owns connection reuse.
//! Production managers dial gRPC; the memory backend
//! (`dahlia-network-memory`) serves scripted clients for tests.

mod traits;

pub use traits::{CachingClientManager, ClientError, Connect, NodeClient, NodeClientManager};
