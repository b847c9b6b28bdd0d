//! # Fiscus
//!
//! An in-memory key-value store for financial workloads, speaking the
//! Redis wire protocol.
//!
//! Fiscus is a complete server implementation with:
//! - RESP framing over async TCP
//! - A TTL-aware keyspace with sampled LRU eviction
//! - Sorted indices with order-book views (best bid/ask, spread, depth)
//! - Geospatial point indices (radius, box, distance, geohash)
//! - HyperLogLog cardinality registers with merge
//! - A schemaless document store with predicate queries
//! - Pub/sub channel and pattern fan-out
//! - Sandboxed Lua scripting with keyspace callbacks
//! - A 16384-slot cluster routing map with failover
//!
//! ## Example
//!
//! ```no_run
//! use fiscus::{Config, Result, Server};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Config::default();
//!     let server = Arc::new(Server::new(config));
//!     server.run().await
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    rust_2018_idioms,
    trivial_casts,
    trivial_numeric_casts,
    unused_lifetimes,
    unused_qualifications
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::type_complexity // boxed async command handler signatures
)]

/// Command parsing and execution layer.
pub mod commands;
/// Error types and result aliases.
pub mod error;
/// RESP protocol implementation.
pub mod protocol;
/// TCP server, pub/sub, and cluster routing.
pub mod server;
/// In-memory storage engine and snapshots.
pub mod storage;
/// Typed indices and core value types.
pub mod types;

pub use error::{Error, Result};
pub use protocol::{Frame, RespParser};
pub use server::{Config, Server};
pub use storage::Db;
pub use types::{FiscusValue, Key};

/// Crate version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Protocol compatibility version reported by INFO.
pub const REDIS_VERSION: &str = "7.4.0";

/// Default server port.
pub const DEFAULT_PORT: u16 = 6379;

/// Maximum inline request size (64 KiB).
pub const MAX_INLINE_SIZE: usize = 64 * 1024;

/// Maximum bulk string size (512 MiB).
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Maximum number of elements in a command array.
pub const MAX_ARGUMENTS: usize = 1_000_000;

/// Maximum number of concurrent clients.
pub const MAX_CLIENTS: usize = 10_000;
