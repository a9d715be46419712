//! # opal-tablet
//!
//! Hash-bucket record store over the arena allocator.
//!
//! A tablet serves one contiguous slice of the key-hash space. Records are
//! serialized into arena blocks obtained from
//! [`opal_nvm::Allocator::alloc`] and chained per hash bucket through a
//! `next` handle embedded in each record, newest first. The tablet is the
//! allocator's sole consumer and drives it single-threaded, matching the
//! allocator's concurrency contract.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod record;
mod tablet;

pub use tablet::Tablet;
