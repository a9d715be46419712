//! Configuration for Opal.
//!
//! This module provides configuration structures for the storage node and
//! the cluster coordinator.

mod node;

pub use node::{ClusterConfig, NodeConfig, TabletConfig};
