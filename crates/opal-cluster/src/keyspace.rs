//! Key-space partitioning.
//!
//! The coordinator owns the only authoritative [`KeySpace`]; nodes receive
//! copies in their join acceptance and use them to route requests. The map
//! is immutable once the cluster has formed; membership changes are out
//! of scope for the join protocol.

use serde::{Deserialize, Serialize};

use opal_common::types::{KeyHash, KeyHashRange, NodeId, TabletId};

/// One tablet: a contiguous hash range served by one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabletAssignment {
    /// The tablet.
    pub tablet_id: TabletId,
    /// The hash range the tablet covers.
    pub range: KeyHashRange,
    /// The node serving the tablet.
    pub node_id: NodeId,
}

/// The cluster's tablet map: a partition of the full key-hash space.
///
/// Tablets are stored in ascending range order, so routing is a direct
/// index computation over equal-width ranges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeySpace {
    assignments: Vec<TabletAssignment>,
}

impl KeySpace {
    /// Splits the full hash space into `tablet_count` equal tablets and
    /// assigns them to `nodes` in contiguous runs.
    ///
    /// # Panics
    ///
    /// Panics if `nodes` is empty, `tablet_count` is not a power of two,
    /// or `tablet_count` is not a multiple of the node count, all of which
    /// are guaranteed by configuration validation before a cluster forms.
    #[must_use]
    pub fn assign(nodes: &[NodeId], tablet_count: usize) -> Self {
        assert!(!nodes.is_empty(), "cannot assign tablets to zero nodes");
        assert!(
            tablet_count % nodes.len() == 0,
            "tablet count must divide evenly across nodes"
        );
        let per_node = tablet_count / nodes.len();

        let assignments = KeyHashRange::split_full(tablet_count)
            .into_iter()
            .enumerate()
            .map(|(i, range)| TabletAssignment {
                tablet_id: TabletId::new(i as u32),
                range,
                node_id: nodes[i / per_node],
            })
            .collect();
        Self { assignments }
    }

    /// Returns the number of tablets.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    /// Returns true if the map holds no tablets.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    /// Returns all assignments in range order.
    #[must_use]
    pub fn assignments(&self) -> &[TabletAssignment] {
        &self.assignments
    }

    /// Returns the tablet covering `hash`.
    #[must_use]
    pub fn tablet_for(&self, hash: KeyHash) -> &TabletAssignment {
        // Equal-width ranges: the tablet index is the high bits of the hash.
        let count = self.assignments.len() as u64;
        let idx = if count <= 1 {
            0
        } else {
            let width = (u64::MAX / count).wrapping_add(1);
            (hash.as_u64() / width) as usize
        };
        let assignment = &self.assignments[idx.min(self.assignments.len() - 1)];
        debug_assert!(assignment.range.contains(hash));
        assignment
    }

    /// Returns the node serving `hash`.
    #[inline]
    #[must_use]
    pub fn node_for(&self, hash: KeyHash) -> NodeId {
        self.tablet_for(hash).node_id
    }

    /// Returns the tablets served by `node`.
    #[must_use]
    pub fn tablets_of(&self, node: NodeId) -> Vec<TabletId> {
        self.assignments
            .iter()
            .filter(|a| a.node_id == node)
            .map(|a| a.tablet_id)
            .collect()
    }
}
