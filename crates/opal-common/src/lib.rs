//! # opal-common
//!
//! Common types, errors, and utilities for Opal.
//!
//! This crate provides the foundational types and abstractions used across
//! all Opal components. It includes:
//!
//! - **Types**: Core identifiers (`NodeId`, `TabletId`), keys, values, and
//!   key hashing
//! - **Errors**: Unified error handling with `OpalError`
//! - **Config**: Store and cluster configuration structures
//! - **Constants**: System-wide constants and limits
//!
//! ## Example
//!
//! ```rust
//! use opal_common::types::{Key, KeyHash, NodeId, Value};
//! use opal_common::error::OpalResult;
//!
//! fn example() -> OpalResult<()> {
//!     let node_id = NodeId::new(3);
//!     let key = Key::from_bytes(b"hello");
//!     let value = Value::from_bytes(b"world");
//!     let hash = KeyHash::of(key.as_bytes());
//!     assert!(node_id.is_valid());
//!     assert_ne!(hash, KeyHash::of(value.as_bytes()));
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod constants;
pub mod error;
pub mod types;

// Re-export commonly used items at the crate root
pub use constants::*;
pub use error::{OpalError, OpalResult};
pub use types::{Key, KeyHash, KeyHashRange, NodeId, TabletId, Value};
