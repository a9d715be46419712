//! Cluster protocol messages.

use serde::{Deserialize, Serialize};

use opal_common::types::NodeId;

use crate::keyspace::KeySpace;

/// A message exchanged between storage nodes and the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClusterMessage {
    /// A storage node asks to join the cluster.
    Join(JoinRequest),
    /// The coordinator accepts a join and publishes the tablet map.
    JoinAccepted(JoinAccepted),
    /// The coordinator rejects a join.
    JoinRejected {
        /// Why the join was refused.
        reason: String,
    },
    /// A storage node announces departure.
    Leave {
        /// The departing node.
        node_id: NodeId,
    },
}

/// Join request payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinRequest {
    /// Bytes of persistent memory the node contributes.
    pub nvm_size: u64,
}

/// Join acceptance payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinAccepted {
    /// The accepted node (echoed back for confirmation).
    pub node_id: NodeId,
    /// The full tablet map of the formed cluster.
    pub keyspace: KeySpace,
}
