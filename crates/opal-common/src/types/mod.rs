//! Type definitions for Opal.
//!
//! This module contains all core type definitions used across the store.

mod hash;
mod ids;
mod keys;

pub use hash::{KeyHash, KeyHashRange};
pub use ids::{NodeId, TabletId};
pub use keys::{Key, Value};
