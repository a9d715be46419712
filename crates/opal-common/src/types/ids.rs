//! Core identifier types for Opal.
//!
//! These types provide type-safe wrappers around numeric identifiers,
//! preventing accidental misuse of different ID types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Storage node identifier.
///
/// Node IDs are assigned by the coordinator when a node's join request is
/// accepted; before that a node has no valid ID.
///
/// # Example
///
/// ```rust
/// use opal_common::types::NodeId;
///
/// let node = NodeId::new(3);
/// assert_eq!(node.as_u32(), 3);
/// assert!(node.is_valid());
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct NodeId(u32);

impl NodeId {
    /// Invalid node ID constant, used as a sentinel value.
    pub const INVALID: Self = Self(u32::MAX);

    /// Creates a new `NodeId` from a raw u32 value.
    #[inline]
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw u32 value.
    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Checks if this is a valid node ID.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != Self::INVALID.0
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "NodeId(INVALID)")
        } else {
            write!(f, "NodeId({})", self.0)
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for NodeId {
    #[inline]
    fn from(id: u32) -> Self {
        Self::new(id)
    }
}

impl From<NodeId> for u32 {
    #[inline]
    fn from(id: NodeId) -> Self {
        id.0
    }
}

/// Tablet identifier.
///
/// A tablet is one contiguous partition of the key-hash space, served by
/// exactly one storage node at a time. Tablet IDs are dense indexes into
/// the cluster's key-space map.
///
/// # Example
///
/// ```rust
/// use opal_common::types::TabletId;
///
/// let tablet = TabletId::new(0);
/// assert_eq!(tablet.next(), TabletId::new(1));
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct TabletId(u32);

impl TabletId {
    /// Invalid tablet ID constant, used as a sentinel value.
    pub const INVALID: Self = Self(u32::MAX);

    /// First valid tablet ID.
    pub const FIRST: Self = Self(0);

    /// Creates a new `TabletId` from a raw u32 value.
    #[inline]
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw u32 value.
    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Returns the next tablet ID.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Checks if this is a valid tablet ID.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != Self::INVALID.0
    }
}

impl fmt::Debug for TabletId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "TabletId(INVALID)")
        } else {
            write!(f, "TabletId({})", self.0)
        }
    }
}

impl fmt::Display for TabletId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for TabletId {
    #[inline]
    fn from(id: u32) -> Self {
        Self::new(id)
    }
}

impl From<TabletId> for u32 {
    #[inline]
    fn from(id: TabletId) -> Self {
        id.0
    }
}
