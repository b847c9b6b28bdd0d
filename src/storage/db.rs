//! The keyspace.
//!
//! # Thread Safety
//!
//! The main store is a `DashMap`, giving lock-free reads in the common case
//! and per-shard write locking. Typed index payloads carry their own
//! interior `RwLock`s, so a writer on one sorted index never excludes
//! readers of the rest of the keyspace.
//!
//! # Expiry
//!
//! Two paths cooperate: lazy expiry removes a dead key when a reader
//! touches it, and the background sweeper (`ExpiryManager`) scans the
//! expires table on a cadence. Readers never observe expired payloads.

use crate::error::{CommandError, Error, Result};
use crate::server::cluster::SharedClusterManager;
use crate::server::config::MaxMemoryPolicy;
use crate::server::pubsub::SharedPubSubHub;
use crate::types::document::DocumentStore;
use crate::types::{
    Expiry, FiscusValue, Key, StoredValue, Timestamp, ValueType, current_timestamp_ms,
};
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::RwLock;
use rand::seq::IteratorRandom;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::debug;

/// Number of keys sampled per eviction pass.
const EVICTION_SAMPLE: usize = 5;

/// Memory budget enforcement for the keyspace.
#[derive(Debug)]
pub struct MemoryManager {
    /// Maximum memory in bytes (0 = no limit)
    maxmemory: AtomicUsize,
    /// Eviction policy
    policy: RwLock<MaxMemoryPolicy>,
    /// Count of keys evicted
    evicted_keys: AtomicU64,
}

impl MemoryManager {
    /// Create a new memory manager.
    pub fn new(maxmemory: usize, policy: MaxMemoryPolicy) -> Self {
        Self {
            maxmemory: AtomicUsize::new(maxmemory),
            policy: RwLock::new(policy),
            evicted_keys: AtomicU64::new(0),
        }
    }

    /// Check if a memory limit is configured.
    pub fn is_limited(&self) -> bool {
        self.maxmemory.load(Ordering::Relaxed) > 0
    }

    /// Get the memory limit.
    pub fn maxmemory(&self) -> usize {
        self.maxmemory.load(Ordering::Relaxed)
    }

    /// Get the eviction policy.
    pub fn policy(&self) -> MaxMemoryPolicy {
        *self.policy.read()
    }

    /// Count of evicted keys.
    pub fn evicted_keys(&self) -> u64 {
        self.evicted_keys.load(Ordering::Relaxed)
    }

    /// Record an eviction.
    pub fn record_eviction(&self) {
        self.evicted_keys.fetch_add(1, Ordering::Relaxed);
    }
}

impl Default for MemoryManager {
    fn default() -> Self {
        Self::new(0, MaxMemoryPolicy::NoEviction)
    }
}

/// Keyspace statistics.
#[derive(Debug, Default)]
pub struct DbStats {
    /// Total number of key lookups that hit
    pub hits: AtomicU64,
    /// Number of lookups that missed
    pub misses: AtomicU64,
    /// Number of expired keys removed (lazy + active)
    pub expired_keys: AtomicU64,
    /// Number of keys evicted under the memory budget
    pub evicted_keys: AtomicU64,
}

/// A point-in-time stats readout for `stats()` / INFO.
#[derive(Debug, Clone)]
pub struct KeyspaceStats {
    /// Live key count (includes not-yet-swept expired keys)
    pub total_keys: usize,
    /// Keys carrying an expiry
    pub expires: usize,
    /// Estimated memory usage in bytes
    pub memory_bytes: usize,
    /// Lookup hits
    pub hits: u64,
    /// Lookup misses
    pub misses: u64,
    /// Expired-key removals
    pub expired_keys: u64,
    /// Evictions
    pub evicted_keys: u64,
}

/// The keyspace.
#[derive(Debug)]
pub struct Db {
    /// Main key-value store
    data: DashMap<Key, StoredValue>,

    /// Keys with expiration times, for efficient expiry scanning
    expires: DashMap<Key, Timestamp>,

    /// Last access time per key, for LRU eviction sampling
    access_times: DashMap<Key, u64>,

    /// Statistics
    stats: DbStats,

    /// Memory budget
    memory: Arc<MemoryManager>,

    /// Pub/Sub hub (shared with the server)
    pubsub: SharedPubSubHub,

    /// Document store
    documents: Arc<DocumentStore>,

    /// Cluster routing map
    cluster: SharedClusterManager,

    /// Snapshot file path (SAVE command target)
    snapshot_path: RwLock<Option<PathBuf>>,
}

impl Db {
    /// Create a new keyspace with the given collaborators.
    pub fn new(
        pubsub: SharedPubSubHub,
        cluster: SharedClusterManager,
        memory: Arc<MemoryManager>,
    ) -> Self {
        Self {
            data: DashMap::new(),
            expires: DashMap::new(),
            access_times: DashMap::new(),
            stats: DbStats::default(),
            memory,
            pubsub,
            documents: Arc::new(DocumentStore::new()),
            cluster,
            snapshot_path: RwLock::new(None),
        }
    }

    /// Set the snapshot file path (from config at startup).
    pub fn set_snapshot_path(&self, path: Option<PathBuf>) {
        *self.snapshot_path.write() = path;
    }

    /// The snapshot file path, if configured.
    pub fn snapshot_path(&self) -> Option<PathBuf> {
        self.snapshot_path.read().clone()
    }

    /// The pub/sub hub.
    #[inline]
    pub fn pubsub(&self) -> &SharedPubSubHub {
        &self.pubsub
    }

    /// The document store.
    #[inline]
    pub fn documents(&self) -> &Arc<DocumentStore> {
        &self.documents
    }

    /// The cluster routing map.
    #[inline]
    pub fn cluster(&self) -> &SharedClusterManager {
        &self.cluster
    }

    /// The memory manager.
    #[inline]
    pub fn memory(&self) -> &Arc<MemoryManager> {
        &self.memory
    }

    /// Raw stats counters.
    #[inline]
    pub fn raw_stats(&self) -> &DbStats {
        &self.stats
    }

    /// Number of keys (includes expired keys not yet swept).
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the keyspace is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    // ───────────────────────────────────────────────────────────────────
    // Reads
    // ───────────────────────────────────────────────────────────────────

    /// Get a value by key.
    ///
    /// Expired keys read as absent and are removed on the spot.
    pub fn get(&self, key: &Key) -> Option<FiscusValue> {
        let Some(entry) = self.data.get(key) else {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        if entry.is_expired() {
            drop(entry);
            self.remove_expired(key);
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        entry.touch();
        self.access_times
            .insert(key.clone(), current_timestamp_ms() as u64);
        self.stats.hits.fetch_add(1, Ordering::Relaxed);
        Some(entry.value.clone())
    }

    /// Get a value, requiring a specific type tag.
    pub fn get_typed(&self, key: &Key, expected: ValueType) -> Result<Option<FiscusValue>> {
        match self.get(key) {
            Some(value) if value.value_type() == expected => Ok(Some(value)),
            Some(_) => Err(Error::Command(CommandError::WrongType)),
            None => Ok(None),
        }
    }

    /// Get a string value.
    pub fn get_string(&self, key: &Key) -> Result<Option<Bytes>> {
        match self.get(key) {
            Some(FiscusValue::String(s)) => Ok(Some(s)),
            Some(_) => Err(Error::Command(CommandError::WrongType)),
            None => Ok(None),
        }
    }

    /// Check if a key exists (with lazy expiry).
    pub fn exists(&self, key: &Key) -> bool {
        match self.data.get(key) {
            Some(entry) if entry.is_expired() => {
                drop(entry);
                self.remove_expired(key);
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    /// Non-expired keys matching a glob pattern.
    ///
    /// Takes a snapshot under shard read access; the caller formats the
    /// result without holding any keyspace lock.
    pub fn keys(&self, pattern: &[u8]) -> Vec<Key> {
        self.data
            .iter()
            .filter(|entry| !entry.value().is_expired())
            .filter(|entry| entry.key().matches_pattern(pattern))
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// TTL readback in seconds: -2 absent or expired, -1 no expiry,
    /// otherwise remaining whole seconds.
    pub fn ttl(&self, key: &Key) -> i64 {
        match self.data.get(key) {
            None => -2,
            Some(entry) if entry.is_expired() => {
                drop(entry);
                self.remove_expired(key);
                -2
            }
            Some(entry) => entry.ttl().unwrap_or(-1),
        }
    }

    // ───────────────────────────────────────────────────────────────────
    // Writes
    // ───────────────────────────────────────────────────────────────────

    /// Set a value with no expiry.
    pub fn set(&self, key: Key, value: FiscusValue) {
        self.set_with_expiry(key, value, Expiry::Never);
    }

    /// Set a value with an expiry.
    pub fn set_with_expiry(&self, key: Key, value: FiscusValue, expiry: Expiry) {
        self.maybe_evict();

        match expiry {
            Expiry::Never => {
                self.expires.remove(&key);
            }
            Expiry::At(ts) => {
                self.expires.insert(key.clone(), ts);
            }
        }

        self.access_times
            .insert(key.clone(), current_timestamp_ms() as u64);
        self.data
            .insert(key, StoredValue::with_expiry(value, expiry));
    }

    /// Fetch the typed index under a key, creating it if absent.
    ///
    /// Creation goes through the shard entry so two concurrent writers
    /// always observe the same index. Fails with a type error if the key
    /// holds a different payload.
    pub fn get_or_create(&self, key: &Key, kind: ValueType) -> Result<FiscusValue> {
        if let Some(entry) = self.data.get(key) {
            if entry.is_expired() {
                drop(entry);
                self.remove_expired(key);
            } else if entry.value.value_type() == kind {
                entry.touch();
                return Ok(entry.value.clone());
            } else {
                return Err(Error::Command(CommandError::WrongType));
            }
        }

        self.maybe_evict();

        let entry = self.data.entry(key.clone()).or_insert_with(|| {
            let value = match kind {
                ValueType::ZSet => FiscusValue::new_zset(),
                ValueType::Geo => FiscusValue::new_geo(),
                ValueType::Hll => FiscusValue::new_hll(),
                ValueType::String => FiscusValue::string(Bytes::new()),
            };
            StoredValue::new(value)
        });

        // A racing writer may have created a different payload type
        if entry.value.value_type() != kind {
            return Err(Error::Command(CommandError::WrongType));
        }

        self.access_times
            .insert(key.clone(), current_timestamp_ms() as u64);
        Ok(entry.value.clone())
    }

    /// Delete a key. Returns true if it existed.
    pub fn delete(&self, key: &Key) -> bool {
        let removed = self.data.remove(key).is_some();
        self.expires.remove(key);
        self.access_times.remove(key);
        removed
    }

    /// Set an expiry on an existing key. Returns false if the key is absent.
    pub fn expire(&self, key: &Key, expiry: Expiry) -> bool {
        match self.data.get_mut(key) {
            Some(mut entry) => {
                if entry.is_expired() {
                    drop(entry);
                    self.remove_expired(key);
                    return false;
                }
                entry.expiry = expiry;
                entry.mark_updated();
                match expiry {
                    Expiry::Never => {
                        self.expires.remove(key);
                    }
                    Expiry::At(ts) => {
                        self.expires.insert(key.clone(), ts);
                    }
                }
                true
            }
            None => false,
        }
    }

    /// Remove all keys and documents.
    pub fn flush(&self) {
        self.data.clear();
        self.expires.clear();
        self.access_times.clear();
        self.documents.clear();
    }

    // ───────────────────────────────────────────────────────────────────
    // Expiry and eviction
    // ───────────────────────────────────────────────────────────────────

    /// One active-expiry pass: scan the expires table and delete dead keys.
    /// Returns the number removed.
    pub fn expire_keys(&self, limit: usize) -> usize {
        let now = current_timestamp_ms();
        let victims: Vec<Key> = self
            .expires
            .iter()
            .filter(|entry| now >= *entry.value())
            .take(limit)
            .map(|entry| entry.key().clone())
            .collect();

        let count = victims.len();
        for key in victims {
            self.delete(&key);
            self.stats.expired_keys.fetch_add(1, Ordering::Relaxed);
        }
        count
    }

    /// Evict keys while the estimated footprint exceeds the budget.
    ///
    /// Selection scans a small random sample and evicts the least recently
    /// used of it. Correctness only requires that no live referenced item
    /// is corrupted; the policy is a heuristic.
    fn maybe_evict(&self) {
        if !self.memory.is_limited() {
            return;
        }
        if self.memory.policy() == MaxMemoryPolicy::NoEviction {
            return;
        }

        let limit = self.memory.maxmemory();
        let mut guard = 0;
        while self.estimated_memory() > limit && guard < 64 {
            guard += 1;
            let Some(victim) = self.pick_eviction_victim() else {
                break;
            };
            debug!(key = %victim, "evicting key under memory pressure");
            self.delete(&victim);
            self.memory.record_eviction();
            self.stats.evicted_keys.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Pick the stalest key from a random sample.
    fn pick_eviction_victim(&self) -> Option<Key> {
        let mut rng = rand::thread_rng();

        let sample: Vec<Key> = match self.memory.policy() {
            MaxMemoryPolicy::VolatileLru => self
                .expires
                .iter()
                .map(|e| e.key().clone())
                .choose_multiple(&mut rng, EVICTION_SAMPLE),
            _ => self
                .data
                .iter()
                .map(|e| e.key().clone())
                .choose_multiple(&mut rng, EVICTION_SAMPLE),
        };

        sample
            .into_iter()
            .min_by_key(|key| self.access_times.get(key).map(|t| *t).unwrap_or(0))
    }

    /// Estimated memory footprint of the keyspace in bytes.
    pub fn estimated_memory(&self) -> usize {
        self.data
            .iter()
            .map(|entry| entry.key().len() + 48 + entry.value().value.memory_usage())
            .sum()
    }

    /// A point-in-time stats readout.
    pub fn stats(&self) -> KeyspaceStats {
        KeyspaceStats {
            total_keys: self.data.len(),
            expires: self.expires.len(),
            memory_bytes: self.estimated_memory(),
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            expired_keys: self.stats.expired_keys.load(Ordering::Relaxed),
            evicted_keys: self.stats.evicted_keys.load(Ordering::Relaxed),
        }
    }

    /// Snapshot support: copy out all live entries.
    pub fn entries(&self) -> Vec<(Key, StoredValue)> {
        self.data
            .iter()
            .filter(|entry| !entry.value().is_expired())
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    fn remove_expired(&self, key: &Key) {
        if self.data.remove(key).is_some() {
            self.stats.expired_keys.fetch_add(1, Ordering::Relaxed);
        }
        self.expires.remove(key);
        self.access_times.remove(key);
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::cluster::ClusterManager;
    use crate::server::pubsub::PubSubHub;

    fn test_db() -> Db {
        Db::new(
            Arc::new(PubSubHub::new()),
            Arc::new(ClusterManager::standalone()),
            Arc::new(MemoryManager::default()),
        )
    }

    #[test]
    fn test_set_get_roundtrip() {
        let db = test_db();
        db.set(Key::from("foo"), FiscusValue::string("bar"));
        let value = db.get(&Key::from("foo")).unwrap();
        assert_eq!(value.as_string(), Some(&Bytes::from("bar")));
    }

    #[test]
    fn test_get_missing_counts_miss() {
        let db = test_db();
        assert!(db.get(&Key::from("missing")).is_none());
        assert_eq!(db.raw_stats().misses.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_delete() {
        let db = test_db();
        db.set(Key::from("foo"), FiscusValue::string("bar"));
        assert!(db.delete(&Key::from("foo")));
        assert!(!db.delete(&Key::from("foo")));
        assert!(db.get(&Key::from("foo")).is_none());
    }

    #[test]
    fn test_lazy_expiry() {
        let db = test_db();
        db.set_with_expiry(
            Key::from("gone"),
            FiscusValue::string("x"),
            Expiry::At(0),
        );
        assert!(db.get(&Key::from("gone")).is_none());
        assert!(!db.exists(&Key::from("gone")));
        assert_eq!(db.len(), 0);
        assert_eq!(db.raw_stats().expired_keys.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_ttl_readback() {
        let db = test_db();
        assert_eq!(db.ttl(&Key::from("absent")), -2);

        db.set(Key::from("forever"), FiscusValue::string("x"));
        assert_eq!(db.ttl(&Key::from("forever")), -1);

        db.set_with_expiry(
            Key::from("timed"),
            FiscusValue::string("x"),
            Expiry::from_seconds(100),
        );
        let ttl = db.ttl(&Key::from("timed"));
        assert!(ttl > 90 && ttl <= 100);
    }

    #[test]
    fn test_expire_existing_key() {
        let db = test_db();
        db.set(Key::from("k"), FiscusValue::string("v"));
        assert!(db.expire(&Key::from("k"), Expiry::from_seconds(50)));
        assert!(db.ttl(&Key::from("k")) > 0);

        assert!(!db.expire(&Key::from("absent"), Expiry::from_seconds(50)));
    }

    #[test]
    fn test_keys_pattern() {
        let db = test_db();
        db.set(Key::from("user:1"), FiscusValue::string("a"));
        db.set(Key::from("user:2"), FiscusValue::string("b"));
        db.set(Key::from("order:1"), FiscusValue::string("c"));

        let mut users = db.keys(b"user:*");
        users.sort();
        assert_eq!(users.len(), 2);
        assert_eq!(db.keys(b"*").len(), 3);
    }

    #[test]
    fn test_keys_skips_expired() {
        let db = test_db();
        db.set(Key::from("live"), FiscusValue::string("a"));
        db.set_with_expiry(Key::from("dead"), FiscusValue::string("b"), Expiry::At(0));
        assert_eq!(db.keys(b"*").len(), 1);
    }

    #[test]
    fn test_active_expire_pass() {
        let db = test_db();
        for i in 0..10 {
            db.set_with_expiry(
                Key::from(format!("dead:{i}")),
                FiscusValue::string("x"),
                Expiry::At(0),
            );
        }
        db.set(Key::from("live"), FiscusValue::string("x"));

        let removed = db.expire_keys(100);
        assert_eq!(removed, 10);
        assert_eq!(db.len(), 1);
    }

    #[test]
    fn test_type_checked_access() {
        let db = test_db();
        db.set(Key::from("s"), FiscusValue::string("x"));

        assert!(db.get_typed(&Key::from("s"), ValueType::String).is_ok());
        assert!(db.get_typed(&Key::from("s"), ValueType::ZSet).is_err());
        assert!(db
            .get_typed(&Key::from("absent"), ValueType::ZSet)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_get_or_create_zset() {
        let db = test_db();
        let v = db.get_or_create(&Key::from("z"), ValueType::ZSet).unwrap();
        v.as_zset().unwrap().write().add(Bytes::from("m"), 1.0);

        // Second fetch sees the same index
        let v2 = db.get_or_create(&Key::from("z"), ValueType::ZSet).unwrap();
        assert_eq!(v2.as_zset().unwrap().read().len(), 1);

        // Type mismatch refused
        db.set(Key::from("s"), FiscusValue::string("x"));
        assert!(db.get_or_create(&Key::from("s"), ValueType::ZSet).is_err());
    }

    #[test]
    fn test_flush() {
        let db = test_db();
        db.set(Key::from("a"), FiscusValue::string("1"));
        db.set(Key::from("b"), FiscusValue::string("2"));
        db.flush();
        assert!(db.is_empty());
    }

    #[test]
    fn test_eviction_under_budget() {
        let memory = Arc::new(MemoryManager::new(512, MaxMemoryPolicy::AllKeysLru));
        let db = Db::new(
            Arc::new(PubSubHub::new()),
            Arc::new(ClusterManager::standalone()),
            memory.clone(),
        );

        for i in 0..64 {
            db.set(
                Key::from(format!("key:{i}")),
                FiscusValue::string("0123456789abcdef0123456789abcdef"),
            );
        }

        assert!(memory.evicted_keys() > 0);
        assert!(db.len() < 64);
    }
}
