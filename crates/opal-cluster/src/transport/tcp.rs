//! TCP-based transport for deployment.
//!
//! Features:
//! - Message framing with length prefixes
//! - Peers registered from inbound connections: when a node connects and
//!   sends its first frame, the transport binds that connection to the
//!   sender's ID so replies flow back over the same socket. This is what
//!   lets the coordinator answer joins without knowing node addresses in
//!   advance.
//! - Outbound connections for nodes that dial a known address (for
//!   example, the coordinator's).

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use dashmap::DashMap;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{
    tcp::{OwnedReadHalf, OwnedWriteHalf},
    TcpListener, TcpStream,
};
use tokio::sync::mpsc;
use tokio::sync::Mutex as TokioMutex;
use tracing::{debug, error, info, warn};

use opal_common::types::NodeId;

use crate::message::ClusterMessage;

use super::frame;
use super::{IncomingMessage, NodeAddr, Transport, TransportError, TransportResult};

/// Connection state for a peer.
struct PeerConnection {
    /// Sender for outgoing messages.
    outbox: mpsc::Sender<ClusterMessage>,
}

/// TCP-based transport.
///
/// Manages framed TCP connections to peers; see the module docs for the
/// connection model.
pub struct TcpTransport {
    /// This node's ID.
    node_id: NodeId,
    /// This node's listen address (resolved, so port 0 works).
    listen_addr: SocketAddr,
    /// Peer connections.
    peers: DashMap<NodeId, PeerConnection>,
    /// Incoming message channel.
    inbox_tx: mpsc::Sender<IncomingMessage>,
    /// Incoming message receiver.
    inbox_rx: TokioMutex<mpsc::Receiver<IncomingMessage>>,
    /// Whether the transport is closed.
    closed: AtomicBool,
    /// Shutdown signal sender.
    shutdown_tx: mpsc::Sender<()>,
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTransport")
            .field("node_id", &self.node_id)
            .field("listen_addr", &self.listen_addr)
            .field("closed", &self.closed)
            .finish()
    }
}

impl TcpTransport {
    /// Creates a TCP transport listening on `listen_addr`.
    pub async fn bind(node_id: NodeId, listen_addr: SocketAddr) -> TransportResult<Arc<Self>> {
        let (inbox_tx, inbox_rx) = mpsc::channel(1000);
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let listener = TcpListener::bind(listen_addr).await?;
        let listen_addr = listener.local_addr()?;
        info!("cluster transport listening on {}", listen_addr);

        let transport = Arc::new(Self {
            node_id,
            listen_addr,
            peers: DashMap::new(),
            inbox_tx,
            inbox_rx: TokioMutex::new(inbox_rx),
            closed: AtomicBool::new(false),
            shutdown_tx,
        });

        let accept_transport = Arc::clone(&transport);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, addr)) => {
                                debug!("accepted connection from {}", addr);
                                let transport = Arc::clone(&accept_transport);
                                tokio::spawn(async move {
                                    transport.run_connection(stream, None);
                                });
                            }
                            Err(e) => {
                                error!("accept error: {}", e);
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("transport shutdown requested");
                        break;
                    }
                }
            }
        });

        Ok(transport)
    }

    /// Returns the resolved listen address.
    #[must_use]
    pub fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }

    /// Dials a peer at a known address and registers it for sending.
    pub async fn connect(self: &Arc<Self>, peer: NodeAddr) -> TransportResult<()> {
        if self.peers.contains_key(&peer.node_id) {
            return Ok(());
        }

        debug!("connecting to peer {} at {}", peer.node_id, peer.addr);
        let stream =
            TcpStream::connect(peer.addr)
                .await
                .map_err(|e| TransportError::ConnectionFailed {
                    node_id: peer.node_id,
                    reason: e.to_string(),
                })?;

        self.run_connection(stream, Some(peer.node_id));
        info!("connected to peer {} at {}", peer.node_id, peer.addr);
        Ok(())
    }

    /// Spawns the reader and writer tasks for one connection.
    ///
    /// For outbound connections the peer ID is known up front; for
    /// inbound connections it is learned from the first frame and
    /// registered then.
    fn run_connection(self: &Arc<Self>, stream: TcpStream, peer_id: Option<NodeId>) {
        let (read_half, write_half) = stream.into_split();
        let (outbox_tx, outbox_rx) = mpsc::channel::<ClusterMessage>(100);

        if let Some(peer_id) = peer_id {
            self.peers.insert(peer_id, PeerConnection { outbox: outbox_tx.clone() });
        }

        tokio::spawn(Self::write_loop(self.node_id, write_half, outbox_rx));

        let transport = Arc::clone(self);
        tokio::spawn(async move {
            let learned = transport.read_loop(read_half, peer_id, outbox_tx).await;
            if let Some(peer_id) = learned.or(peer_id) {
                transport.peers.remove(&peer_id);
                debug!("connection to peer {} closed", peer_id);
            }
        });
    }

    /// Writes framed outbox messages to the socket until the outbox
    /// closes.
    async fn write_loop(
        node_id: NodeId,
        mut write_half: OwnedWriteHalf,
        mut outbox_rx: mpsc::Receiver<ClusterMessage>,
    ) {
        while let Some(message) = outbox_rx.recv().await {
            match frame::encode(node_id, &message) {
                Ok(data) => {
                    if let Err(e) = write_half.write_all(&data).await {
                        warn!("write error: {}", e);
                        break;
                    }
                }
                Err(e) => {
                    warn!("encode error: {}", e);
                }
            }
        }
    }

    /// Reads frames into the inbox until the socket closes; returns the
    /// peer ID learned from the first frame of an inbound connection.
    async fn read_loop(
        &self,
        mut read_half: OwnedReadHalf,
        mut peer_id: Option<NodeId>,
        outbox_tx: mpsc::Sender<ClusterMessage>,
    ) -> Option<NodeId> {
        let mut buf = BytesMut::with_capacity(4096);

        loop {
            match read_half.read_buf(&mut buf).await {
                Ok(0) => return peer_id,
                Ok(_) => {
                    while let Some(size) = frame::frame_size(&buf) {
                        let frame_data = buf.split_to(size).freeze();
                        match frame::decode(frame_data) {
                            Ok((from, message)) => {
                                if peer_id.is_none() {
                                    // Inbound connection: bind it to the
                                    // sender so replies use this socket.
                                    peer_id = Some(from);
                                    self.peers.insert(
                                        from,
                                        PeerConnection {
                                            outbox: outbox_tx.clone(),
                                        },
                                    );
                                }
                                let msg = IncomingMessage::new(from, message);
                                if self.inbox_tx.send(msg).await.is_err() {
                                    return peer_id;
                                }
                            }
                            Err(e) => {
                                warn!("decode error: {}", e);
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!("read error: {}", e);
                    return peer_id;
                }
            }
        }
    }
}

impl Transport for TcpTransport {
    fn send(&self, to: NodeId, message: ClusterMessage) -> TransportResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }

        if let Some(peer) = self.peers.get(&to) {
            peer.outbox
                .try_send(message)
                .map_err(|_| TransportError::ConnectionFailed {
                    node_id: to,
                    reason: "channel full or closed".to_string(),
                })
        } else {
            Err(TransportError::UnknownNode(to))
        }
    }

    fn recv(&self) -> Pin<Box<dyn Future<Output = Option<IncomingMessage>> + Send + '_>> {
        Box::pin(async move {
            if self.closed.load(Ordering::Acquire) {
                return None;
            }

            let mut inbox = self.inbox_rx.lock().await;
            inbox.recv().await
        })
    }

    fn try_recv(&self) -> Option<IncomingMessage> {
        if self.closed.load(Ordering::Acquire) {
            return None;
        }

        match self.inbox_rx.try_lock() {
            Ok(mut inbox) => inbox.try_recv().ok(),
            Err(_) => None,
        }
    }

    fn broadcast(&self, message: ClusterMessage) -> TransportResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }

        for peer in self.peers.iter() {
            let _ = peer.outbox.try_send(message.clone());
        }
        Ok(())
    }

    fn local_id(&self) -> NodeId {
        self.node_id
    }

    fn peers(&self) -> Vec<NodeId> {
        self.peers.iter().map(|e| *e.key()).collect()
    }

    fn close(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            self.closed.store(true, Ordering::Release);
            let _ = self.shutdown_tx.send(()).await;
            self.peers.clear();
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
    use std::time::Duration;

    fn any_addr() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    fn join_msg() -> ClusterMessage {
        ClusterMessage::Join(JoinRequest { nvm_size: 1 << 26 })
    }

    #[tokio::test]
    async fn test_bind_and_close() {
        let transport = TcpTransport::bind(NodeId::new(1), any_addr()).await.unwrap();

        assert_eq!(transport.local_id(), NodeId::new(1));
        assert!(!transport.is_closed());
        assert_ne!(transport.listen_addr().port(), 0);

        transport.close().await;
        assert!(transport.is_closed());
    }

    #[tokio::test]
    async fn test_dial_send_and_reply_over_same_socket() {
        let server = TcpTransport::bind(NodeId::new(0), any_addr()).await.unwrap();
        let client = TcpTransport::bind(NodeId::new(7), any_addr()).await.unwrap();

        client
            .connect(NodeAddr::new(NodeId::new(0), server.listen_addr()))
            .await
            .unwrap();

        // Client speaks first; the server learns the peer from the frame.
        client.send(NodeId::new(0), join_msg()).unwrap();
        let received = tokio::time::timeout(Duration::from_secs(1), server.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.from, NodeId::new(7));

        // Server replies without ever having dialed the client.
        server
            .send(
                NodeId::new(7),
                ClusterMessage::JoinRejected {
                    reason: "test".to_string(),
                },
            )
            .unwrap();
        let reply = tokio::time::timeout(Duration::from_secs(1), client.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.from, NodeId::new(0));

        client.close().await;
        server.close().await;
    }

    #[tokio::test]
    async fn test_send_to_unknown_peer() {
        let transport = TcpTransport::bind(NodeId::new(1), any_addr()).await.unwrap();
        assert!(matches!(
            transport.send(NodeId::new(99), join_msg()),
            Err(TransportError::UnknownNode(_))
        ));
        transport.close().await;
    }

    #[tokio::test]
    async fn test_broadcast_reaches_all_dialed_peers() {
        let server1 = TcpTransport::bind(NodeId::new(1), any_addr()).await.unwrap();
        let server2 = TcpTransport::bind(NodeId::new(2), any_addr()).await.unwrap();
        let hub = TcpTransport::bind(NodeId::new(0), any_addr()).await.unwrap();

        hub.connect(NodeAddr::new(NodeId::new(1), server1.listen_addr()))
            .await
            .unwrap();
        hub.connect(NodeAddr::new(NodeId::new(2), server2.listen_addr()))
            .await
            .unwrap();

        hub.broadcast(join_msg()).unwrap();

        let r1 = tokio::time::timeout(Duration::from_secs(1), server1.recv())
            .await
            .unwrap();
        let r2 = tokio::time::timeout(Duration::from_secs(1), server2.recv())
            .await
            .unwrap();
        assert!(r1.is_some());
        assert!(r2.is_some());

        hub.close().await;
        server1.close().await;
        server2.close().await;
    }
}
