//! logmeta Storage - Crash-safe local persistence
//!
//! This crate implements the durable file primitives used by the metadata
//! service:
//! - Retry policies for transient I/O failures
//! - Atomic file replacement (write to a `.tmp` sibling, fsync, rename)
//! - Checksummed snapshot files published through the atomic writer

pub mod atomic_file;
pub mod retry;
pub mod snapshot;

// Re-exports
pub use atomic_file::{AtomicFileWriter, TMP_EXTENSION};
pub use retry::RetryPolicy;
pub use snapshot::{SnapshotHeader, SnapshotStore};
