//! # opal-cluster
//!
//! Cluster membership coordination for Opal.
//!
//! Storage nodes announce themselves to a single coordinator on startup;
//! once the configured number of nodes has joined, the coordinator splits
//! the key-hash space into tablets, assigns each tablet to a node, and
//! broadcasts the resulting [`KeySpace`] so every node knows the full
//! routing map. The protocol runs over a [`Transport`] abstraction with a
//! TCP implementation for deployment and an in-process implementation for
//! tests.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod coordinator;
mod keyspace;
mod message;

/// Network transport for cluster messages
pub mod transport;

pub use coordinator::{Coordinator, COORDINATOR_NODE_ID};
pub use keyspace::{KeySpace, TabletAssignment};
pub use message::{ClusterMessage, JoinAccepted, JoinRequest};
pub use transport::{MemoryNetwork, MemoryTransport, TcpTransport, Transport};
