//! Core fiscus types.
//!
//! The typed indices here form the data-plane kernel: the sorted index
//! backing order books and leaderboards, the geospatial index, the
//! probabilistic cardinality registers, and the document store.

mod key;
mod value;

pub mod document;
pub mod geo;
pub mod hyperloglog;
pub mod sorted_set;

pub use document::{Document, DocumentStore, Predicate, PredicateOp, QueryResult};
pub use geo::{GeoIndex, GeoPoint, GeoUnit};
pub use hyperloglog::HyperLogLog;
pub use key::{glob_match, Key};
pub use sorted_set::{BookLevel, ScoreBound, SortedSet, SortedSetEntry};
pub use value::{FiscusValue, StoredValue, ValueType};

/// Score type for sorted indices (IEEE 754 double).
pub type Score = f64;

/// Timestamp in milliseconds since Unix epoch.
pub type Timestamp = i64;

/// Get current timestamp in milliseconds.
#[inline]
#[must_use]
pub fn current_timestamp_ms() -> Timestamp {
    chrono::Utc::now().timestamp_millis()
}

/// Expiration time representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Expiry {
    /// No expiration
    #[default]
    Never,
    /// Expire at specific timestamp (milliseconds since epoch)
    At(Timestamp),
}

impl Expiry {
    /// Create expiry from TTL in seconds.
    /// A TTL of 0 causes immediate expiration.
    #[must_use]
    pub fn from_seconds(seconds: i64) -> Self {
        if seconds < 0 {
            Self::Never
        } else {
            let ms = seconds.saturating_mul(1000);
            Self::At(current_timestamp_ms().saturating_add(ms))
        }
    }

    /// Create expiry from TTL in milliseconds.
    #[must_use]
    pub fn from_millis(millis: i64) -> Self {
        if millis < 0 {
            Self::Never
        } else {
            Self::At(current_timestamp_ms().saturating_add(millis))
        }
    }

    /// Create expiry at an absolute millisecond timestamp.
    #[must_use]
    pub fn at_millis(timestamp: Timestamp) -> Self {
        Self::At(timestamp)
    }

    /// Check if this expiry has passed.
    #[inline]
    #[must_use]
    pub fn is_expired(&self) -> bool {
        match self {
            Self::Never => false,
            Self::At(ts) => current_timestamp_ms() >= *ts,
        }
    }

    /// Get remaining TTL in milliseconds, or None if no expiry.
    #[must_use]
    pub fn ttl_millis(&self) -> Option<i64> {
        match self {
            Self::Never => None,
            Self::At(ts) => Some(ts.saturating_sub(current_timestamp_ms()).max(0)),
        }
    }

    /// Get remaining TTL in whole seconds, or None if no expiry.
    #[must_use]
    pub fn ttl_seconds(&self) -> Option<i64> {
        self.ttl_millis().map(|ms| ms / 1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_from_seconds() {
        let expiry = Expiry::from_seconds(10);
        assert!(!expiry.is_expired());
        assert!(expiry.ttl_seconds().unwrap() <= 10);
        assert!(expiry.ttl_seconds().unwrap() >= 9);
    }

    #[test]
    fn test_expiry_never() {
        let expiry = Expiry::Never;
        assert!(!expiry.is_expired());
        assert!(expiry.ttl_millis().is_none());
    }

    #[test]
    fn test_expiry_past() {
        let expiry = Expiry::At(0);
        assert!(expiry.is_expired());
        assert_eq!(expiry.ttl_millis(), Some(0));
    }
}
