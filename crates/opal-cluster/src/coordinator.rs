//! The cluster coordinator.
//!
//! A single coordinator process forms the cluster: it collects join
//! requests from storage nodes, and once the configured number has
//! arrived it partitions the key-hash space into tablets, assigns them,
//! and broadcasts the map to every member. After formation the
//! coordinator keeps serving the map but accepts no further joins.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};

use opal_common::config::ClusterConfig;
use opal_common::error::{OpalError, OpalResult};
use opal_common::types::NodeId;

use crate::keyspace::KeySpace;
use crate::message::{ClusterMessage, JoinAccepted, JoinRequest};
use crate::transport::Transport;

/// Well-known node ID of the coordinator.
///
/// Storage nodes use IDs from 1 upward; 0 is reserved for the
/// coordinator.
pub const COORDINATOR_NODE_ID: NodeId = NodeId::new(0);

/// Mutable coordinator state, updated as joins arrive.
#[derive(Debug, Default)]
struct State {
    /// Nodes that have joined, in arrival order.
    joined: Vec<NodeId>,
    /// Total persistent memory contributed by joined nodes.
    total_storage: u64,
    /// The tablet map, once the cluster has formed.
    keyspace: Option<KeySpace>,
}

/// The cluster coordinator.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use opal_cluster::{Coordinator, MemoryNetwork, COORDINATOR_NODE_ID};
/// use opal_common::config::ClusterConfig;
///
/// # async fn run() {
/// let network = MemoryNetwork::shared();
/// let transport = Arc::new(network.create_transport(COORDINATOR_NODE_ID));
/// let coordinator = Coordinator::new(transport, ClusterConfig::default()).unwrap();
/// coordinator.run().await;
/// # }
/// ```
pub struct Coordinator {
    transport: Arc<dyn Transport>,
    config: ClusterConfig,
    state: Mutex<State>,
}

impl Coordinator {
    /// Creates a coordinator over the given transport.
    ///
    /// # Errors
    ///
    /// Returns [`OpalError::InvalidConfig`] if the cluster configuration
    /// fails validation.
    pub fn new(transport: Arc<dyn Transport>, config: ClusterConfig) -> OpalResult<Self> {
        config
            .validate()
            .map_err(|message| OpalError::InvalidConfig { message })?;
        if config.tablet_count % config.cluster_size != 0 {
            return Err(OpalError::InvalidConfig {
                message: "tablet_count must be a multiple of cluster_size".to_string(),
            });
        }
        Ok(Self {
            transport,
            config,
            state: Mutex::new(State::default()),
        })
    }

    /// Serves the join protocol until the transport closes.
    pub async fn run(&self) {
        info!(
            cluster_size = self.config.cluster_size,
            tablet_count = self.config.tablet_count,
            "coordinator waiting for joins"
        );
        while let Some(incoming) = self.transport.recv().await {
            self.handle(incoming.from, incoming.message);
        }
        info!("coordinator transport closed, stopping");
    }

    /// Returns true once all expected nodes have joined.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state.lock().keyspace.is_some()
    }

    /// Returns the tablet map, if the cluster has formed.
    #[must_use]
    pub fn keyspace(&self) -> Option<KeySpace> {
        self.state.lock().keyspace.clone()
    }

    /// Returns the number of nodes that have joined so far.
    #[must_use]
    pub fn joined_count(&self) -> usize {
        self.state.lock().joined.len()
    }

    /// Returns the total persistent memory contributed by joined nodes.
    #[must_use]
    pub fn total_storage(&self) -> u64 {
        self.state.lock().total_storage
    }

    /// Dispatches one incoming message.
    fn handle(&self, from: NodeId, message: ClusterMessage) {
        match message {
            ClusterMessage::Join(request) => self.handle_join(from, &request),
            ClusterMessage::Leave { node_id } => {
                // Departure handling beyond logging needs tablet
                // re-assignment, which the join protocol does not cover.
                warn!(%node_id, "node left after formation");
            }
            other => {
                warn!(%from, ?other, "unexpected message");
            }
        }
    }

    /// Registers a join; forms the cluster when the last node arrives.
    fn handle_join(&self, from: NodeId, request: &JoinRequest) {
        let mut state = self.state.lock();

        if let Some(reason) = self.refuse_reason(&state, from) {
            warn!(%from, reason, "rejecting join");
            let _ = self
                .transport
                .send(from, ClusterMessage::JoinRejected { reason });
            return;
        }

        state.joined.push(from);
        state.total_storage += request.nvm_size;
        info!(
            %from,
            nvm_size = request.nvm_size,
            joined = state.joined.len(),
            expected = self.config.cluster_size,
            "join accepted"
        );

        if state.joined.len() == self.config.cluster_size {
            let keyspace = KeySpace::assign(&state.joined, self.config.tablet_count);
            info!(
                nodes = state.joined.len(),
                tablets = keyspace.len(),
                total_storage = state.total_storage,
                "all joins received, assigning tablets"
            );

            for &node_id in &state.joined {
                let response = ClusterMessage::JoinAccepted(JoinAccepted {
                    node_id,
                    keyspace: keyspace.clone(),
                });
                if let Err(e) = self.transport.send(node_id, response) {
                    warn!(%node_id, error = %e, "failed to deliver join acceptance");
                }
            }
            state.keyspace = Some(keyspace);
        }
    }

    /// Returns why a join from `from` must be refused, if it must.
    fn refuse_reason(&self, state: &State, from: NodeId) -> Option<String> {
        if from == COORDINATOR_NODE_ID || !from.is_valid() {
            Some(format!("reserved node id {from}"))
        } else if state.keyspace.is_some() {
            Some("cluster already formed".to_string())
        } else if state.joined.contains(&from) {
            Some(format!("node {from} already joined"))
        } else {
            None
        }
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Coordinator")
            .field("cluster_size", &self.config.cluster_size)
            .field("joined", &state.joined.len())
            .field("formed", &state.keyspace.is_some())
            .finish()
    }
}
