//! In-memory transport for testing.
//!
//! Uses channels for communication between transports in the same
//! process, and can simulate one-way network partitions for failure
//! testing.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::sync::Mutex as TokioMutex;

use opal_common::types::NodeId;

use crate::message::ClusterMessage;

use super::{IncomingMessage, Transport, TransportError, TransportResult};

/// Channel capacity for each node's inbox.
const CHANNEL_CAPACITY: usize = 1000;

/// A shared network for memory transports.
///
/// All [`MemoryTransport`] instances connected to the same network can
/// communicate with each other.
#[derive(Debug)]
pub struct MemoryNetwork {
    /// Senders to each node's inbox.
    nodes: DashMap<NodeId, mpsc::Sender<IncomingMessage>>,
    /// One-way partitions: messages from `.0` to `.1` are dropped.
    partitions: RwLock<Vec<(NodeId, NodeId)>>,
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryNetwork {
    /// Creates a new memory network.
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: DashMap::new(),
            partitions: RwLock::new(Vec::new()),
        }
    }

    /// Creates a new memory network wrapped in `Arc`.
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Creates a new transport connected to this network.
    pub fn create_transport(self: &Arc<Self>, node_id: NodeId) -> MemoryTransport {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        self.nodes.insert(node_id, tx);

        MemoryTransport {
            node_id,
            network: Arc::clone(self),
            inbox: TokioMutex::new(rx),
            closed: AtomicBool::new(false),
        }
    }

    /// Drops all messages from `from` to `to` until healed.
    pub fn add_partition(&self, from: NodeId, to: NodeId) {
        self.partitions.write().push((from, to));
    }

    /// Removes all partitions.
    pub fn heal_all(&self) {
        self.partitions.write().clear();
    }

    /// Checks if there's a partition from `from` to `to`.
    pub fn is_partitioned(&self, from: NodeId, to: NodeId) -> bool {
        self.partitions
            .read()
            .iter()
            .any(|&(f, t)| f == from && t == to)
    }

    /// Sends a message through the network.
    fn send(&self, from: NodeId, to: NodeId, message: ClusterMessage) -> TransportResult<()> {
        if self.is_partitioned(from, to) {
            // Silently drop, simulating network failure.
            return Ok(());
        }

        let sender = self.nodes.get(&to).ok_or(TransportError::UnknownNode(to))?;

        sender
            .try_send(IncomingMessage::new(from, message))
            .map_err(|_| TransportError::ConnectionFailed {
                node_id: to,
                reason: "channel full or closed".to_string(),
            })
    }

    /// Returns all connected node IDs.
    #[must_use]
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.iter().map(|e| *e.key()).collect()
    }
}

/// In-memory transport for testing.
pub struct MemoryTransport {
    /// This node's ID.
    node_id: NodeId,
    /// The shared network.
    network: Arc<MemoryNetwork>,
    /// Incoming message channel.
    inbox: TokioMutex<mpsc::Receiver<IncomingMessage>>,
    /// Whether the transport is closed.
    closed: AtomicBool,
}

impl std::fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("node_id", &self.node_id)
            .field("closed", &self.closed)
            .finish()
    }
}

impl Transport for MemoryTransport {
    fn send(&self, to: NodeId, message: ClusterMessage) -> TransportResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        self.network.send(self.node_id, to, message)
    }

    fn recv(&self) -> Pin<Box<dyn Future<Output = Option<IncomingMessage>> + Send + '_>> {
        Box::pin(async move {
            if self.closed.load(Ordering::Acquire) {
                return None;
            }

            let mut inbox = self.inbox.lock().await;
            inbox.recv().await
        })
    }

    fn try_recv(&self) -> Option<IncomingMessage> {
        if self.closed.load(Ordering::Acquire) {
            return None;
        }

        match self.inbox.try_lock() {
            Ok(mut inbox) => inbox.try_recv().ok(),
            Err(_) => None,
        }
    }

    fn broadcast(&self, message: ClusterMessage) -> TransportResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }

        for peer_id in self.peers() {
            // Individual send failures don't abort the broadcast.
            let _ = self.send(peer_id, message.clone());
        }
        Ok(())
    }

    fn local_id(&self) -> NodeId {
        self.node_id
    }

    fn peers(&self) -> Vec<NodeId> {
        self.network
            .node_ids()
            .into_iter()
            .filter(|&id| id != self.node_id)
            .collect()
    }

    fn close(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            self.closed.store(true, Ordering::Release);
            self.network.nodes.remove(&self.node_id);
        })
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::JoinRequest;

    fn join_msg() -> ClusterMessage {
        ClusterMessage::Join(JoinRequest { nvm_size: 1 << 26 })
    }

    #[tokio::test]
    async fn test_send_recv() {
        let network = MemoryNetwork::shared();
        let t1 = network.create_transport(NodeId::new(1));
        let t2 = network.create_transport(NodeId::new(2));

        t1.send(NodeId::new(2), join_msg()).unwrap();

        let received = t2.recv().await.unwrap();
        assert_eq!(received.from, NodeId::new(1));
        assert_eq!(received.message, join_msg());
    }

    #[tokio::test]
    async fn test_broadcast() {
        let network = MemoryNetwork::shared();
        let t1 = network.create_transport(NodeId::new(1));
        let t2 = network.create_transport(NodeId::new(2));
        let t3 = network.create_transport(NodeId::new(3));

        t1.broadcast(join_msg()).unwrap();

        assert_eq!(t2.recv().await.unwrap().from, NodeId::new(1));
        assert_eq!(t3.recv().await.unwrap().from, NodeId::new(1));
    }

    #[tokio::test]
    async fn test_partition_drops_messages() {
        let network = MemoryNetwork::shared();
        let t1 = network.create_transport(NodeId::new(1));
        let t2 = network.create_transport(NodeId::new(2));

        network.add_partition(NodeId::new(1), NodeId::new(2));

        // Dropped silently.
        t1.send(NodeId::new(2), join_msg()).unwrap();
        assert!(t2.try_recv().is_none());

        // The reverse direction still works.
        t2.send(NodeId::new(1), join_msg()).unwrap();
        assert_eq!(t1.recv().await.unwrap().from, NodeId::new(2));

        // Healing restores delivery.
        network.heal_all();
        t1.send(NodeId::new(2), join_msg()).unwrap();
        assert_eq!(t2.recv().await.unwrap().from, NodeId::new(1));
    }

    #[tokio::test]
    async fn test_close() {
        let network = MemoryNetwork::shared();
        let t1 = network.create_transport(NodeId::new(1));
        let t2 = network.create_transport(NodeId::new(2));

        t1.close().await;
        assert!(t1.is_closed());
        assert!(matches!(
            t1.send(NodeId::new(2), join_msg()),
            Err(TransportError::Closed)
        ));
        assert!(matches!(
            t2.send(NodeId::new(1), join_msg()),
            Err(TransportError::UnknownNode(_))
        ));
    }

    #[test]
    fn test_peers_excludes_self() {
        let network = MemoryNetwork::shared();
        let t1 = network.create_transport(NodeId::new(1));
        let _t2 = network.create_transport(NodeId::new(2));

        let peers = t1.peers();
        assert_eq!(peers, vec![NodeId::new(2)]);
    }
}
