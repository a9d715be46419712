//! Error handling for Opal.
//!
//! This module provides a unified error type and result alias used
//! across all Opal components.

mod store;

pub use store::{ErrorCode, OpalError};

/// Result type alias for Opal operations.
pub type OpalResult<T> = std::result::Result<T, OpalError>;
