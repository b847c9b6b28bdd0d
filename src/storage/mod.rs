//! In-memory storage engine.
//!
//! The keyspace is a sharded map with TTL metadata and sampled LRU
//! eviction; a background sweeper handles active expiry; snapshots are
//! best-effort point-in-time copies.

mod db;
mod expiry;
pub mod snapshot;

pub use db::{Db, DbStats, KeyspaceStats, MemoryManager};
pub use expiry::{ExpiryConfig, ExpiryManager};
pub use snapshot::{SnapshotLoadResult, SnapshotLoader, SnapshotSaveResult, SnapshotWriter};
