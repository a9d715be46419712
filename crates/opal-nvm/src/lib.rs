//! # opal-nvm
//!
//! Arena allocator for the persistent-memory data region of an Opal
//! storage node.
//!
//! A fixed 64 MiB arena is carved into variable-size blocks that hold
//! serialized records. The allocator is a segregated free-list design with
//! boundary-tag coalescing:
//!
//! - allocated blocks pay a single 4-byte header word of overhead;
//! - free blocks additionally carry two intrusive list links and a footer
//!   word, which is what lets a later free coalesce with them in O(1);
//! - one free list per 16-byte size class, LIFO, with heads stored in the
//!   arena itself so the whole structure lives in persistent memory.
//!
//! The allocator performs no synchronization and no I/O; one arena instance
//! must be driven by one writer at a time (see [`allocator::Allocator`]).

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Block allocation, freeing, and arena bootstrap
pub mod allocator;

/// Raw arena byte access and write observation
pub mod arena;

/// Invariant auditing for tests and diagnostics
pub mod audit;

/// Block header/footer encoding and handles
pub mod block;

mod free_list;

pub use allocator::Allocator;
pub use arena::{Arena, ModificationLog, WriteObserver};
pub use audit::{AuditError, AuditReport};
pub use block::Handle;
