//! Polymorphic keyspace value.
//!
//! The keyspace stores a tagged sum of payload types. Collection payloads
//! sit behind `Arc<parking_lot::RwLock<_>>` so readers proceed concurrently
//! while a writer on one index never blocks the rest of the keyspace.

use super::{Expiry, GeoIndex, HyperLogLog, SortedSet, Timestamp, current_timestamp_ms};
use bytes::Bytes;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// A value stored under a keyspace key.
#[derive(Debug, Clone)]
pub enum FiscusValue {
    /// String value (binary-safe bytes)
    String(Bytes),

    /// Sorted index (score-ordered multimap; backs order books and leaderboards)
    ZSet(Arc<parking_lot::RwLock<SortedSet>>),

    /// Geospatial point index
    Geo(Arc<parking_lot::RwLock<GeoIndex>>),

    /// Cardinality register bank
    Hll(Arc<parking_lot::RwLock<HyperLogLog>>),
}

impl FiscusValue {
    /// Create a new string value.
    #[inline]
    pub fn string(data: impl Into<Bytes>) -> Self {
        Self::String(data.into())
    }

    /// Create a new empty sorted index.
    #[inline]
    pub fn new_zset() -> Self {
        Self::ZSet(Arc::new(parking_lot::RwLock::new(SortedSet::new())))
    }

    /// Create a new empty geospatial index.
    #[inline]
    pub fn new_geo() -> Self {
        Self::Geo(Arc::new(parking_lot::RwLock::new(GeoIndex::new())))
    }

    /// Create a new cardinality register bank with the default precision.
    #[inline]
    pub fn new_hll() -> Self {
        Self::Hll(Arc::new(parking_lot::RwLock::new(HyperLogLog::default())))
    }

    /// Wrap an existing sorted index.
    #[inline]
    pub fn from_zset(zset: SortedSet) -> Self {
        Self::ZSet(Arc::new(parking_lot::RwLock::new(zset)))
    }

    /// Wrap an existing geo index.
    #[inline]
    pub fn from_geo(geo: GeoIndex) -> Self {
        Self::Geo(Arc::new(parking_lot::RwLock::new(geo)))
    }

    /// Wrap an existing register bank.
    #[inline]
    pub fn from_hll(hll: HyperLogLog) -> Self {
        Self::Hll(Arc::new(parking_lot::RwLock::new(hll)))
    }

    /// Returns the type tag of this value.
    #[inline]
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::String(_) => ValueType::String,
            Self::ZSet(_) => ValueType::ZSet,
            Self::Geo(_) => ValueType::Geo,
            Self::Hll(_) => ValueType::Hll,
        }
    }

    /// Try to get a reference to the string payload.
    #[inline]
    pub fn as_string(&self) -> Option<&Bytes> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get a reference to the sorted index.
    #[inline]
    pub fn as_zset(&self) -> Option<&Arc<parking_lot::RwLock<SortedSet>>> {
        match self {
            Self::ZSet(z) => Some(z),
            _ => None,
        }
    }

    /// Try to get a reference to the geo index.
    #[inline]
    pub fn as_geo(&self) -> Option<&Arc<parking_lot::RwLock<GeoIndex>>> {
        match self {
            Self::Geo(g) => Some(g),
            _ => None,
        }
    }

    /// Try to get a reference to the register bank.
    #[inline]
    pub fn as_hll(&self) -> Option<&Arc<parking_lot::RwLock<HyperLogLog>>> {
        match self {
            Self::Hll(h) => Some(h),
            _ => None,
        }
    }

    /// Try to parse the string payload as an integer.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::String(s) => std::str::from_utf8(s).ok()?.parse().ok(),
            _ => None,
        }
    }

    /// Try to parse the string payload as a float.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::String(s) => std::str::from_utf8(s).ok()?.parse().ok(),
            _ => None,
        }
    }

    /// Estimate the memory footprint of this value in bytes.
    pub fn memory_usage(&self) -> usize {
        let base = size_of::<Self>();
        match self {
            Self::String(s) => base + s.len(),
            Self::ZSet(z) => base + z.read().memory_usage(),
            Self::Geo(g) => base + g.read().memory_usage(),
            Self::Hll(h) => base + h.read().register_count(),
        }
    }
}

impl From<&str> for FiscusValue {
    fn from(s: &str) -> Self {
        Self::String(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<String> for FiscusValue {
    fn from(s: String) -> Self {
        Self::String(Bytes::from(s))
    }
}

impl From<Bytes> for FiscusValue {
    fn from(b: Bytes) -> Self {
        Self::String(b)
    }
}

impl From<i64> for FiscusValue {
    fn from(n: i64) -> Self {
        Self::String(Bytes::from(n.to_string()))
    }
}

impl From<f64> for FiscusValue {
    fn from(n: f64) -> Self {
        Self::String(Bytes::from(n.to_string()))
    }
}

/// The type tag of a stored value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ValueType {
    /// String type
    String = 0,
    /// Sorted index type
    ZSet = 1,
    /// Geospatial index type
    Geo = 2,
    /// Cardinality register type
    Hll = 3,
}

impl ValueType {
    /// Returns the type name as surfaced on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::ZSet => "zset",
            Self::Geo => "geo",
            Self::Hll => "hll",
        }
    }
}

impl std::fmt::Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored value with lifecycle metadata.
#[derive(Debug)]
pub struct StoredValue {
    /// The actual value
    pub value: FiscusValue,
    /// Optional expiration time
    pub expiry: Expiry,
    /// Creation instant (milliseconds since epoch)
    pub created_at: Timestamp,
    /// Last-update instant (milliseconds since epoch)
    pub updated_at: Timestamp,
    /// Number of read accesses
    pub access_count: AtomicU64,
}

impl StoredValue {
    /// Create a new stored value with no expiration.
    #[inline]
    pub fn new(value: FiscusValue) -> Self {
        Self::with_expiry(value, Expiry::Never)
    }

    /// Create a new stored value with expiration.
    pub fn with_expiry(value: FiscusValue, expiry: Expiry) -> Self {
        let now = current_timestamp_ms();
        Self {
            value,
            expiry,
            created_at: now,
            updated_at: now,
            access_count: AtomicU64::new(0),
        }
    }

    /// Check if this value has expired.
    #[inline]
    pub fn is_expired(&self) -> bool {
        self.expiry.is_expired()
    }

    /// Record a read access.
    #[inline]
    pub fn touch(&self) {
        self.access_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Mark the value as updated now.
    #[inline]
    pub fn mark_updated(&mut self) {
        self.updated_at = current_timestamp_ms();
    }

    /// Get the TTL in whole seconds.
    #[inline]
    pub fn ttl(&self) -> Option<i64> {
        self.expiry.ttl_seconds()
    }
}

impl Clone for StoredValue {
    fn clone(&self) -> Self {
        Self {
            value: self.value.clone(),
            expiry: self.expiry,
            created_at: self.created_at,
            updated_at: self.updated_at,
            access_count: AtomicU64::new(self.access_count.load(Ordering::Relaxed)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_value() {
        let v = FiscusValue::string("hello");
        assert_eq!(v.value_type(), ValueType::String);
        assert_eq!(v.as_string(), Some(&Bytes::from("hello")));
    }

    #[test]
    fn test_value_type_tags() {
        assert_eq!(FiscusValue::new_zset().value_type(), ValueType::ZSet);
        assert_eq!(FiscusValue::new_geo().value_type(), ValueType::Geo);
        assert_eq!(FiscusValue::new_hll().value_type(), ValueType::Hll);
    }

    #[test]
    fn test_integer_parsing() {
        assert_eq!(FiscusValue::string("42").as_i64(), Some(42));
        assert_eq!(FiscusValue::string("-100").as_i64(), Some(-100));
        assert_eq!(FiscusValue::string("not a number").as_i64(), None);
        assert_eq!(FiscusValue::new_zset().as_i64(), None);
    }

    #[test]
    fn test_stored_value_expiry() {
        let sv = StoredValue::new(FiscusValue::string("test"));
        assert!(!sv.is_expired());
        assert!(sv.ttl().is_none());

        let sv = StoredValue::with_expiry(FiscusValue::string("test"), Expiry::from_seconds(10));
        assert!(!sv.is_expired());
        assert!(sv.ttl().is_some());

        let sv = StoredValue::with_expiry(FiscusValue::string("test"), Expiry::At(0));
        assert!(sv.is_expired());
    }

    #[test]
    fn test_access_counter() {
        let sv = StoredValue::new(FiscusValue::string("x"));
        sv.touch();
        sv.touch();
        assert_eq!(sv.access_count.load(Ordering::Relaxed), 2);
    }
}
