//! Network transport layer for cluster messages.
//!
//! The transport abstracts how [`ClusterMessage`]s move between the
//! coordinator and storage nodes:
//!
//! - [`Transport`] trait: abstract send/receive interface
//! - [`TcpTransport`]: TCP-based transport for deployment
//! - [`MemoryTransport`]: in-process transport for tests
//!
//! Messages are bincode-encoded and carried in length-prefixed frames, so
//! a stream transport can split them back out without any delimiter
//! scanning.

mod memory;
mod tcp;

pub use memory::{MemoryNetwork, MemoryTransport};
pub use tcp::TcpTransport;

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;

use thiserror::Error;

use opal_common::types::NodeId;

use crate::message::ClusterMessage;

/// Errors that can occur in transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection to a peer failed.
    #[error("connection failed to node {node_id}: {reason}")]
    ConnectionFailed {
        /// The target node.
        node_id: NodeId,
        /// The reason for failure.
        reason: String,
    },

    /// Message serialization failed.
    #[error("serialization failed: {0}")]
    SerializationFailed(String),

    /// Message deserialization failed.
    #[error("deserialization failed: {0}")]
    DeserializationFailed(String),

    /// The transport is closed.
    #[error("transport closed")]
    Closed,

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The target node is unknown.
    #[error("unknown node: {0}")]
    UnknownNode(NodeId),
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Network address for a node.
#[derive(Debug, Clone)]
pub struct NodeAddr {
    /// The node ID.
    pub node_id: NodeId,
    /// The network address.
    pub addr: SocketAddr,
}

impl NodeAddr {
    /// Creates a new node address.
    #[must_use]
    pub fn new(node_id: NodeId, addr: SocketAddr) -> Self {
        Self { node_id, addr }
    }
}

/// An incoming message from a peer.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    /// The sender node ID.
    pub from: NodeId,
    /// The message.
    pub message: ClusterMessage,
}

impl IncomingMessage {
    /// Creates a new incoming message.
    #[must_use]
    pub fn new(from: NodeId, message: ClusterMessage) -> Self {
        Self { from, message }
    }
}

/// Trait for network transport implementations.
///
/// Abstracts the network layer so the coordinator logic runs unchanged
/// over TCP in deployment and over channels in tests.
pub trait Transport: Send + Sync {
    /// Sends a message to a peer.
    ///
    /// Fire-and-forget: the message is queued and the method returns
    /// immediately.
    fn send(&self, to: NodeId, message: ClusterMessage) -> TransportResult<()>;

    /// Receives the next incoming message.
    ///
    /// Returns `None` if the transport is closed.
    fn recv(&self) -> Pin<Box<dyn Future<Output = Option<IncomingMessage>> + Send + '_>>;

    /// Tries to receive a message without blocking.
    fn try_recv(&self) -> Option<IncomingMessage>;

    /// Broadcasts a message to all connected peers.
    fn broadcast(&self, message: ClusterMessage) -> TransportResult<()>;

    /// Returns the local node ID.
    fn local_id(&self) -> NodeId;

    /// Returns the connected peer IDs.
    fn peers(&self) -> Vec<NodeId>;

    /// Closes the transport.
    fn close(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;

    /// Returns true if the transport is closed.
    fn is_closed(&self) -> bool;
}

/// Message frame format for wire transmission.
///
/// ```text
/// +----------+----------+----------+------------------+
/// | Magic(4) | From(4)  | Len(4)   | Payload(Len)     |
/// +----------+----------+----------+------------------+
/// ```
pub mod frame {
    use bytes::{Buf, BufMut, Bytes, BytesMut};

    use opal_common::types::NodeId;

    use crate::message::ClusterMessage;

    use super::{TransportError, TransportResult};

    /// Magic number for message framing ("OPAL").
    pub const FRAME_MAGIC: u32 = 0x4F50_414C;

    /// Maximum message size (4 MB). Cluster messages are small; anything
    /// larger is a framing error.
    pub const MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

    /// Header size in bytes.
    pub const HEADER_SIZE: usize = 4 + 4 + 4; // magic + from + len

    /// Encodes a message into a frame.
    pub fn encode(from: NodeId, message: &ClusterMessage) -> TransportResult<Bytes> {
        let payload = bincode::serialize(message)
            .map_err(|e| TransportError::SerializationFailed(e.to_string()))?;

        if payload.len() > MAX_MESSAGE_SIZE {
            return Err(TransportError::SerializationFailed(format!(
                "message too large: {} bytes",
                payload.len()
            )));
        }

        let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
        buf.put_u32(FRAME_MAGIC);
        buf.put_u32(from.as_u32());
        buf.put_u32(payload.len() as u32);
        buf.put_slice(&payload);

        Ok(buf.freeze())
    }

    /// Decodes a frame into `(from, message)`.
    pub fn decode(mut data: Bytes) -> TransportResult<(NodeId, ClusterMessage)> {
        if data.len() < HEADER_SIZE {
            return Err(TransportError::DeserializationFailed(
                "frame too short".to_string(),
            ));
        }

        let magic = data.get_u32();
        if magic != FRAME_MAGIC {
            return Err(TransportError::DeserializationFailed(format!(
                "invalid magic: {magic:08x}"
            )));
        }

        let from = NodeId::new(data.get_u32());
        let len = data.get_u32() as usize;

        if len > MAX_MESSAGE_SIZE {
            return Err(TransportError::DeserializationFailed(format!(
                "message too large: {len} bytes"
            )));
        }

        if data.len() < len {
            return Err(TransportError::DeserializationFailed(
                "incomplete frame".to_string(),
            ));
        }

        let payload = data.slice(..len);
        let message: ClusterMessage = bincode::deserialize(&payload)
            .map_err(|e| TransportError::DeserializationFailed(e.to_string()))?;

        Ok((from, message))
    }

    /// Checks if a buffer contains a complete frame.
    ///
    /// Returns the frame size if complete, or `None` if more data is
    /// needed.
    pub fn frame_size(data: &[u8]) -> Option<usize> {
        if data.len() < HEADER_SIZE {
            return None;
        }

        let len = u32::from_be_bytes([data[8], data[9], data[10], data[11]]) as usize;
        let total = HEADER_SIZE + len;

        if data.len() >= total {
            Some(total)
        } else {
            None
        }
    }

}
