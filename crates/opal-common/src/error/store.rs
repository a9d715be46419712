//! Store error types.
//!
//! Note that the arena allocator itself is not represented here: its
//! contract has exactly two outcomes (capacity exhaustion, signaled by
//! `None`, and caller contract violations, which panic). `OpalError`
//! covers the fallible surfaces layered above it.

use std::fmt;
use thiserror::Error;

use crate::types::NodeId;

/// Error codes for categorizing errors.
///
/// These codes can be used for programmatic error handling and
/// are stable across versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    // General errors (0x0000 - 0x00FF)
    /// Unknown or unspecified error.
    Unknown = 0x0000,
    /// Internal error (bug).
    Internal = 0x0001,
    /// Invalid argument provided.
    InvalidArgument = 0x0002,

    // I/O errors (0x0100 - 0x01FF)
    /// General I/O error.
    Io = 0x0100,
    /// Data corruption detected.
    Corruption = 0x0101,

    // Tablet errors (0x0200 - 0x02FF)
    /// Key not found.
    KeyNotFound = 0x0200,
    /// Key too large.
    KeyTooLarge = 0x0201,
    /// Value too large.
    ValueTooLarge = 0x0202,
    /// Arena capacity exhausted.
    StoreFull = 0x0203,

    // Cluster errors (0x0300 - 0x03FF)
    /// Node not found in cluster.
    NodeNotFound = 0x0300,
    /// Cluster already has its configured number of nodes.
    ClusterFull = 0x0301,
    /// Cluster has not finished forming.
    NotReady = 0x0302,
}

impl ErrorCode {
    /// Returns the numeric code.
    #[inline]
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Returns the error category name.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match (*self as u16) >> 8 {
            0x00 => "General",
            0x01 => "I/O",
            0x02 => "Tablet",
            0x03 => "Cluster",
            _ => "Unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// The main error type for Opal.
///
/// # Example
///
/// ```rust
/// use opal_common::error::{OpalError, OpalResult};
/// use opal_common::types::{Key, Value};
///
/// fn lookup(_key: &Key) -> OpalResult<Value> {
///     Err(OpalError::KeyNotFound)
/// }
/// ```
#[derive(Debug, Error)]
pub enum OpalError {
    /// Internal error - this indicates a bug.
    #[error("internal error: {message}")]
    Internal {
        /// Error message.
        message: String,
    },

    /// Invalid argument provided.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Error message.
        message: String,
    },

    /// I/O error from the underlying system.
    #[error("I/O error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Data corruption detected.
    #[error("data corruption detected: {message}")]
    Corruption {
        /// Description of the corruption.
        message: String,
    },

    /// Key not found.
    #[error("key not found")]
    KeyNotFound,

    /// Key is too large.
    #[error("key size {size} exceeds maximum {max_size}")]
    KeyTooLarge {
        /// Actual key size.
        size: usize,
        /// Maximum allowed size.
        max_size: usize,
    },

    /// Value is too large.
    #[error("value size {size} exceeds maximum {max_size}")]
    ValueTooLarge {
        /// Actual value size.
        size: usize,
        /// Maximum allowed size.
        max_size: usize,
    },

    /// The arena has no free block large enough for the record.
    #[error("store is full, cannot allocate {needed} bytes")]
    StoreFull {
        /// Bytes the rejected record needed.
        needed: usize,
    },

    /// Node not found.
    #[error("node {node_id} not found")]
    NodeNotFound {
        /// The missing node.
        node_id: NodeId,
    },

    /// The cluster already has its configured number of nodes.
    #[error("cluster is full: {capacity} nodes already joined")]
    ClusterFull {
        /// Configured cluster size.
        capacity: usize,
    },

    /// The cluster has not finished forming.
    #[error("cluster not ready: {joined} of {expected} nodes joined")]
    NotReady {
        /// Nodes joined so far.
        joined: usize,
        /// Nodes required.
        expected: usize,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Error message.
        message: String,
    },
}

impl OpalError {
    /// Returns the error code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Internal { .. } => ErrorCode::Internal,
            Self::InvalidArgument { .. } | Self::InvalidConfig { .. } => {
                ErrorCode::InvalidArgument
            }
            Self::Io { .. } => ErrorCode::Io,
            Self::Corruption { .. } => ErrorCode::Corruption,
            Self::KeyNotFound => ErrorCode::KeyNotFound,
            Self::KeyTooLarge { .. } => ErrorCode::KeyTooLarge,
            Self::ValueTooLarge { .. } => ErrorCode::ValueTooLarge,
            Self::StoreFull { .. } => ErrorCode::StoreFull,
            Self::NodeNotFound { .. } => ErrorCode::NodeNotFound,
            Self::ClusterFull { .. } => ErrorCode::ClusterFull,
            Self::NotReady { .. } => ErrorCode::NotReady,
        }
    }

    /// Returns true if this error is retryable.
    ///
    /// A full store may have space again after evictions; a forming
    /// cluster becomes ready once all joins arrive.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreFull { .. } | Self::NotReady { .. })
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a corruption error.
    #[must_use]
    pub fn corruption(message: impl Into<String>) -> Self {
        Self::Corruption {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code() {
        let err = OpalError::StoreFull { needed: 64 };
        assert_eq!(err.code(), ErrorCode::StoreFull);
        assert_eq!(err.code().category(), "Tablet");
    }

    #[test]
    fn test_error_display() {
        let err = OpalError::NodeNotFound {
            node_id: NodeId::new(5),
        };
        assert_eq!(err.to_string(), "node 5 not found");
    }

    #[test]
    fn test_retryable() {
        assert!(OpalError::StoreFull { needed: 16 }.is_retryable());
        assert!(OpalError::NotReady {
            joined: 1,
            expected: 3
        }
        .is_retryable());
        assert!(!OpalError::KeyNotFound.is_retryable());
    }

    #[test]
    fn test_io_error_from() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: OpalError = io_err.into();
        assert_eq!(err.code(), ErrorCode::Io);
    }
}
