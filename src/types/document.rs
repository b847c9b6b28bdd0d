//! Schemaless document store with predicate queries.
//!
//! Documents are nested JSON-like mappings addressed by dot-delimited field
//! paths. Equality probes can be served from optional per-field value
//! indexes; every other predicate falls back to a scan.

use super::{Timestamp, current_timestamp_ms};
use crate::error::{CommandError, Result};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// A stored document.
#[derive(Debug, Clone)]
pub struct Document {
    /// Document identifier
    pub id: String,
    /// The document body (object at the root)
    pub data: Value,
    /// Creation instant (milliseconds since epoch)
    pub created: Timestamp,
    /// Last-modification instant (milliseconds since epoch)
    pub modified: Timestamp,
    /// Optional absolute expiry instant (milliseconds since epoch)
    pub expires_at: Option<Timestamp>,
}

impl Document {
    /// Check whether this document has expired.
    #[inline]
    pub fn is_expired(&self) -> bool {
        self.expires_at
            .is_some_and(|exp| current_timestamp_ms() >= exp)
    }

    /// Look up a dot-delimited field path in the document body.
    pub fn field(&self, path: &str) -> Option<&Value> {
        lookup_path(&self.data, path)
    }
}

/// Predicate operators for document queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredicateOp {
    /// Equality
    Eq,
    /// Inequality
    Ne,
    /// Strictly less than
    Lt,
    /// Less than or equal
    Le,
    /// Strictly greater than
    Gt,
    /// Greater than or equal
    Ge,
    /// Substring containment (string comparison)
    Contains,
    /// String prefix
    StartsWith,
    /// String suffix
    EndsWith,
}

impl PredicateOp {
    /// Parse an operator token.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "=" | "==" => Ok(Self::Eq),
            "!=" => Ok(Self::Ne),
            "<" => Ok(Self::Lt),
            "<=" => Ok(Self::Le),
            ">" => Ok(Self::Gt),
            ">=" => Ok(Self::Ge),
            "contains" => Ok(Self::Contains),
            "starts_with" => Ok(Self::StartsWith),
            "ends_with" => Ok(Self::EndsWith),
            other => Err(CommandError::UnknownOperator(other.to_string()).into()),
        }
    }
}

/// A single query predicate.
#[derive(Debug, Clone)]
pub struct Predicate {
    /// Dot-delimited field path
    pub field: String,
    /// Comparison operator
    pub op: PredicateOp,
    /// Comparison value
    pub value: Value,
}

impl Predicate {
    /// Create a new predicate.
    pub fn new(field: impl Into<String>, op: PredicateOp, value: Value) -> Self {
        Self {
            field: field.into(),
            op,
            value,
        }
    }

    /// Evaluate this predicate against a document.
    fn matches(&self, doc: &Document) -> bool {
        let value = doc.field(&self.field);
        match self.op {
            PredicateOp::Eq => value == Some(&self.value),
            PredicateOp::Ne => value != Some(&self.value),
            PredicateOp::Lt => compare(value, &self.value).is_some_and(|o| o.is_lt()),
            PredicateOp::Le => compare(value, &self.value).is_some_and(|o| o.is_le()),
            PredicateOp::Gt => compare(value, &self.value).is_some_and(|o| o.is_gt()),
            PredicateOp::Ge => compare(value, &self.value).is_some_and(|o| o.is_ge()),
            PredicateOp::Contains => {
                string_pair(value, &self.value).is_some_and(|(v, q)| v.contains(&q))
            }
            PredicateOp::StartsWith => {
                string_pair(value, &self.value).is_some_and(|(v, q)| v.starts_with(&q))
            }
            PredicateOp::EndsWith => {
                string_pair(value, &self.value).is_some_and(|(v, q)| v.ends_with(&q))
            }
        }
    }
}

/// A page of query results.
#[derive(Debug, Clone)]
pub struct QueryResult {
    /// Matching documents for the requested page
    pub documents: Vec<Document>,
    /// Total matches before pagination
    pub total: usize,
}

/// Per-field equality index: canonical value encoding -> document ids.
#[derive(Debug, Default)]
struct FieldIndex {
    values: HashMap<String, HashSet<String>>,
}

/// The document store.
///
/// Documents and indexes live behind separate guards: reads of unindexed
/// fields scan the document table without touching the index lock.
#[derive(Debug, Default)]
pub struct DocumentStore {
    documents: DashMap<String, Document>,
    indexes: RwLock<HashMap<String, FieldIndex>>,
}

impl DocumentStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents, including not-yet-swept expired ones.
    #[inline]
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// Returns true if no documents are stored.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Insert or replace a document. The body must be a JSON object.
    /// `ttl_millis` of None means no expiry.
    pub fn set(&self, id: impl Into<String>, data: Value, ttl_millis: Option<i64>) -> Result<()> {
        if !data.is_object() {
            return Err(CommandError::SyntaxError.into());
        }

        let id = id.into();
        let now = current_timestamp_ms();
        let created = self
            .documents
            .get(&id)
            .map(|existing| existing.created)
            .unwrap_or(now);

        let doc = Document {
            id: id.clone(),
            data,
            created,
            modified: now,
            expires_at: ttl_millis.map(|ttl| now.saturating_add(ttl.max(0))),
        };

        self.unindex_document(&id);
        self.index_document(&doc);
        self.documents.insert(id, doc);
        Ok(())
    }

    /// Fetch a document. Expired documents read as absent and are removed.
    pub fn get(&self, id: &str) -> Option<Document> {
        let doc = self.documents.get(id)?;
        if doc.is_expired() {
            drop(doc);
            self.delete(id);
            return None;
        }
        Some(doc.clone())
    }

    /// Delete a document. Returns true if it existed.
    pub fn delete(&self, id: &str) -> bool {
        if self.documents.remove(id).is_some() {
            self.unindex_document(id);
            true
        } else {
            false
        }
    }

    /// Create an equality index over a field path and backfill it from
    /// existing documents.
    pub fn create_index(&self, field: &str) -> Result<()> {
        let mut indexes = self.indexes.write();
        if indexes.contains_key(field) {
            return Err(CommandError::IndexExists(field.to_string()).into());
        }

        let mut index = FieldIndex::default();
        for entry in self.documents.iter() {
            if let Some(value) = entry.value().field(field) {
                index
                    .values
                    .entry(canonical(value))
                    .or_default()
                    .insert(entry.key().clone());
            }
        }
        indexes.insert(field.to_string(), index);
        Ok(())
    }

    /// Names of indexed fields.
    pub fn indexed_fields(&self) -> Vec<String> {
        self.indexes.read().keys().cloned().collect()
    }

    /// Evaluate a conjunctive query.
    ///
    /// The first predicate selects the seed id set; each subsequent
    /// predicate prunes it. Expired documents are filtered at read.
    pub fn query(&self, predicates: &[Predicate], limit: usize, offset: usize) -> QueryResult {
        let mut matching: Option<HashSet<String>> = None;

        for predicate in predicates {
            let ids = self.ids_for_predicate(predicate);
            matching = Some(match matching {
                None => ids,
                Some(prev) => prev.intersection(&ids).cloned().collect(),
            });
            if matching.as_ref().is_some_and(HashSet::is_empty) {
                break;
            }
        }

        let mut documents: Vec<Document> = match matching {
            // No predicates: every live document matches
            None => self
                .documents
                .iter()
                .filter(|e| !e.value().is_expired())
                .map(|e| e.value().clone())
                .collect(),
            Some(ids) => ids
                .iter()
                .filter_map(|id| self.documents.get(id))
                .filter(|doc| !doc.is_expired())
                .map(|doc| doc.clone())
                .collect(),
        };

        // Deterministic page order
        documents.sort_by(|a, b| a.id.cmp(&b.id));

        let total = documents.len();
        let page = documents
            .into_iter()
            .skip(offset)
            .take(limit)
            .collect();

        QueryResult {
            documents: page,
            total,
        }
    }

    /// Iterate live documents (snapshot support).
    pub fn iter(&self) -> Vec<Document> {
        self.documents
            .iter()
            .filter(|e| !e.value().is_expired())
            .map(|e| e.value().clone())
            .collect()
    }

    /// Remove all documents and index entries.
    pub fn clear(&self) {
        self.documents.clear();
        let mut indexes = self.indexes.write();
        for index in indexes.values_mut() {
            index.values.clear();
        }
    }

    /// Ids matched by one predicate, via index when possible.
    fn ids_for_predicate(&self, predicate: &Predicate) -> HashSet<String> {
        if predicate.op == PredicateOp::Eq {
            let indexes = self.indexes.read();
            if let Some(index) = indexes.get(&predicate.field) {
                return index
                    .values
                    .get(&canonical(&predicate.value))
                    .cloned()
                    .unwrap_or_default();
            }
        }

        // Full scan
        self.documents
            .iter()
            .filter(|e| predicate.matches(e.value()))
            .map(|e| e.key().clone())
            .collect()
    }

    fn index_document(&self, doc: &Document) {
        let mut indexes = self.indexes.write();
        for (field, index) in indexes.iter_mut() {
            if let Some(value) = doc.field(field) {
                index
                    .values
                    .entry(canonical(value))
                    .or_default()
                    .insert(doc.id.clone());
            }
        }
    }

    fn unindex_document(&self, id: &str) {
        let mut indexes = self.indexes.write();
        for index in indexes.values_mut() {
            index.values.retain(|_, ids| {
                ids.remove(id);
                !ids.is_empty()
            });
        }
    }
}

/// Descend a dot-delimited path through nested objects.
fn lookup_path<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = data;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Canonical string encoding of a value for the equality index.
fn canonical(value: &Value) -> String {
    value.to_string()
}

/// Order two values: numeric comparison when both sides are numbers,
/// lexicographic on the string forms otherwise.
fn compare(value: Option<&Value>, query: &Value) -> Option<std::cmp::Ordering> {
    let value = value?;
    if let (Some(a), Some(b)) = (value.as_f64(), query.as_f64()) {
        return a.partial_cmp(&b);
    }
    let a = value.as_str().map(str::to_string).unwrap_or_else(|| value.to_string());
    let b = query.as_str().map(str::to_string).unwrap_or_else(|| query.to_string());
    Some(a.cmp(&b))
}

/// Extract a (value, query) string pair for substring operators.
fn string_pair(value: Option<&Value>, query: &Value) -> Option<(String, String)> {
    let value = value?;
    let v = value.as_str().map(str::to_string).unwrap_or_else(|| value.to_string());
    let q = query.as_str().map(str::to_string).unwrap_or_else(|| query.to_string());
    Some((v, q))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store_with_docs() -> DocumentStore {
        let store = DocumentStore::new();
        store
            .set(
                "tx:1",
                json!({"_type": "transaction", "user_id": "u1", "amount": 250.0,
                       "merchant": {"name": "Acme Coffee", "mcc": "5814"}}),
                None,
            )
            .unwrap();
        store
            .set(
                "tx:2",
                json!({"_type": "transaction", "user_id": "u2", "amount": 1500.0,
                       "merchant": {"name": "Acme Jewelers", "mcc": "5944"}}),
                None,
            )
            .unwrap();
        store
            .set(
                "user:u1",
                json!({"_type": "user_profile", "name": "Dana", "tier": "gold"}),
                None,
            )
            .unwrap();
        store
    }

    #[test]
    fn test_set_get_roundtrip() {
        let store = DocumentStore::new();
        store.set("d1", json!({"a": 1}), None).unwrap();
        let doc = store.get("d1").unwrap();
        assert_eq!(doc.field("a"), Some(&json!(1)));
    }

    #[test]
    fn test_non_object_rejected() {
        let store = DocumentStore::new();
        assert!(store.set("d1", json!("scalar"), None).is_err());
    }

    #[test]
    fn test_nested_path_lookup() {
        let store = store_with_docs();
        let doc = store.get("tx:1").unwrap();
        assert_eq!(doc.field("merchant.mcc"), Some(&json!("5814")));
        assert_eq!(doc.field("merchant.missing"), None);
        assert_eq!(doc.field("amount.nested"), None);
    }

    #[test]
    fn test_delete() {
        let store = store_with_docs();
        assert!(store.delete("tx:1"));
        assert!(!store.delete("tx:1"));
        assert!(store.get("tx:1").is_none());
    }

    #[test]
    fn test_ttl_expiry() {
        let store = DocumentStore::new();
        store.set("gone", json!({"a": 1}), Some(-1)).unwrap();
        assert!(store.get("gone").is_none());

        store.set("kept", json!({"a": 1}), Some(60_000)).unwrap();
        assert!(store.get("kept").is_some());
    }

    #[test]
    fn test_query_equality() {
        let store = store_with_docs();
        let result = store.query(
            &[Predicate::new("_type", PredicateOp::Eq, json!("transaction"))],
            10,
            0,
        );
        assert_eq!(result.total, 2);
    }

    #[test]
    fn test_query_intersection() {
        let store = store_with_docs();
        let result = store.query(
            &[
                Predicate::new("_type", PredicateOp::Eq, json!("transaction")),
                Predicate::new("user_id", PredicateOp::Eq, json!("u1")),
            ],
            10,
            0,
        );
        assert_eq!(result.total, 1);
        assert_eq!(result.documents[0].id, "tx:1");
    }

    #[test]
    fn test_query_numeric_comparison() {
        let store = store_with_docs();
        let result = store.query(
            &[Predicate::new("amount", PredicateOp::Gt, json!(1000))],
            10,
            0,
        );
        assert_eq!(result.total, 1);
        assert_eq!(result.documents[0].id, "tx:2");

        let result = store.query(
            &[Predicate::new("amount", PredicateOp::Le, json!(250.0))],
            10,
            0,
        );
        assert_eq!(result.total, 1);
    }

    #[test]
    fn test_query_string_operators() {
        let store = store_with_docs();

        let starts = store.query(
            &[Predicate::new(
                "merchant.name",
                PredicateOp::StartsWith,
                json!("Acme"),
            )],
            10,
            0,
        );
        assert_eq!(starts.total, 2);

        let contains = store.query(
            &[Predicate::new(
                "merchant.name",
                PredicateOp::Contains,
                json!("Coffee"),
            )],
            10,
            0,
        );
        assert_eq!(contains.total, 1);

        let ends = store.query(
            &[Predicate::new(
                "merchant.name",
                PredicateOp::EndsWith,
                json!("Jewelers"),
            )],
            10,
            0,
        );
        assert_eq!(ends.total, 1);
    }

    #[test]
    fn test_query_ne() {
        let store = store_with_docs();
        let result = store.query(
            &[
                Predicate::new("_type", PredicateOp::Eq, json!("transaction")),
                Predicate::new("user_id", PredicateOp::Ne, json!("u1")),
            ],
            10,
            0,
        );
        assert_eq!(result.total, 1);
        assert_eq!(result.documents[0].id, "tx:2");
    }

    #[test]
    fn test_pagination() {
        let store = store_with_docs();
        let all = store.query(&[], 10, 0);
        assert_eq!(all.total, 3);

        let page = store.query(&[], 1, 1);
        assert_eq!(page.total, 3);
        assert_eq!(page.documents.len(), 1);

        let past_end = store.query(&[], 10, 5);
        assert!(past_end.documents.is_empty());
    }

    #[test]
    fn test_equality_index_probe() {
        let store = store_with_docs();
        store.create_index("user_id").unwrap();
        assert!(store.create_index("user_id").is_err());

        let result = store.query(
            &[Predicate::new("user_id", PredicateOp::Eq, json!("u2"))],
            10,
            0,
        );
        assert_eq!(result.total, 1);
        assert_eq!(result.documents[0].id, "tx:2");
    }

    #[test]
    fn test_index_follows_updates() {
        let store = DocumentStore::new();
        store.create_index("status").unwrap();
        store.set("o1", json!({"status": "open"}), None).unwrap();

        let open = store.query(
            &[Predicate::new("status", PredicateOp::Eq, json!("open"))],
            10,
            0,
        );
        assert_eq!(open.total, 1);

        store.set("o1", json!({"status": "filled"}), None).unwrap();
        let open = store.query(
            &[Predicate::new("status", PredicateOp::Eq, json!("open"))],
            10,
            0,
        );
        assert_eq!(open.total, 0);

        store.delete("o1");
        let filled = store.query(
            &[Predicate::new("status", PredicateOp::Eq, json!("filled"))],
            10,
            0,
        );
        assert_eq!(filled.total, 0);
    }

    #[test]
    fn test_operator_parse() {
        assert_eq!(PredicateOp::parse("=").unwrap(), PredicateOp::Eq);
        assert_eq!(PredicateOp::parse(">=").unwrap(), PredicateOp::Ge);
        assert_eq!(
            PredicateOp::parse("starts_with").unwrap(),
            PredicateOp::StartsWith
        );
        assert!(PredicateOp::parse("~=").is_err());
    }
}
