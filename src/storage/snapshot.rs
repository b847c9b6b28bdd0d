//! Point-in-time snapshots.
//!
//! A snapshot is a best-effort copy of the keyspace and typed indices,
//! handed to an opaque writer. Pub/sub subscriptions, cluster topology,
//! and the script cache are deliberately excluded. Loss of the most
//! recent writes on crash is acceptable by contract.

use super::Db;
use crate::error::{Result, StorageError};
use crate::types::{Expiry, FiscusValue, HyperLogLog, Key, SortedSet, current_timestamp_ms};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::sync::Arc;
use tracing::info;

/// Snapshot format version.
const SNAPSHOT_VERSION: u32 = 1;

/// Serialized form of one keyspace entry.
#[derive(Debug, Serialize, Deserialize)]
struct EntryRecord {
    key: Vec<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_at: Option<i64>,
    payload: PayloadRecord,
}

/// Serialized payload variants.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum PayloadRecord {
    String {
        data: Vec<u8>,
    },
    ZSet {
        members: Vec<(Vec<u8>, f64)>,
    },
    Geo {
        points: Vec<(Vec<u8>, f64, f64)>,
    },
    Hll {
        bank: HyperLogLog,
    },
}

/// Serialized document record.
#[derive(Debug, Serialize, Deserialize)]
struct DocumentRecord {
    id: String,
    data: serde_json::Value,
    created: i64,
    modified: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_at: Option<i64>,
}

/// The snapshot file body.
#[derive(Debug, Serialize, Deserialize)]
struct SnapshotFile {
    version: u32,
    created_at: i64,
    entries: Vec<EntryRecord>,
    documents: Vec<DocumentRecord>,
}

/// Summary of a completed save.
#[derive(Debug, Clone)]
pub struct SnapshotSaveResult {
    /// Keyspace entries written
    pub keys_saved: usize,
    /// Documents written
    pub documents_saved: usize,
    /// Bytes written to the sink
    pub bytes_written: usize,
}

/// Summary of a completed load.
#[derive(Debug, Clone)]
pub struct SnapshotLoadResult {
    /// Keyspace entries restored
    pub keys_loaded: usize,
    /// Entries skipped because their expiry already passed
    pub keys_expired: usize,
    /// Documents restored
    pub documents_loaded: usize,
}

/// Writes snapshots to an opaque sink.
pub struct SnapshotWriter;

impl SnapshotWriter {
    /// Copy the keyspace under read access and write it to `sink`.
    ///
    /// Only the brief copy phase touches the keyspace; encoding and I/O
    /// run against the copy.
    pub fn save(db: &Arc<Db>, sink: &mut dyn Write) -> Result<SnapshotSaveResult> {
        let entries: Vec<EntryRecord> = db
            .entries()
            .into_iter()
            .map(|(key, stored)| EntryRecord {
                key: key.as_bytes().to_vec(),
                expires_at: match stored.expiry {
                    Expiry::Never => None,
                    Expiry::At(ts) => Some(ts),
                },
                payload: encode_payload(&stored.value),
            })
            .collect();

        let documents: Vec<DocumentRecord> = db
            .documents()
            .iter()
            .into_iter()
            .map(|doc| DocumentRecord {
                id: doc.id,
                data: doc.data,
                created: doc.created,
                modified: doc.modified,
                expires_at: doc.expires_at,
            })
            .collect();

        let file = SnapshotFile {
            version: SNAPSHOT_VERSION,
            created_at: current_timestamp_ms(),
            entries,
            documents,
        };

        let encoded = serde_json::to_vec(&file)
            .map_err(|e| StorageError::Snapshot(format!("encode failed: {e}")))?;
        sink.write_all(&encoded).map_err(StorageError::Io)?;
        sink.flush().map_err(StorageError::Io)?;

        let result = SnapshotSaveResult {
            keys_saved: file.entries.len(),
            documents_saved: file.documents.len(),
            bytes_written: encoded.len(),
        };
        info!(
            keys = result.keys_saved,
            documents = result.documents_saved,
            bytes = result.bytes_written,
            "snapshot saved"
        );
        Ok(result)
    }
}

/// Loads snapshots from an opaque source.
pub struct SnapshotLoader;

impl SnapshotLoader {
    /// Rehydrate the keyspace from `source`.
    ///
    /// Entries whose expiry already passed are counted and skipped.
    pub fn load(db: &Arc<Db>, source: &mut dyn Read) -> Result<SnapshotLoadResult> {
        let mut raw = Vec::new();
        source.read_to_end(&mut raw).map_err(StorageError::Io)?;

        let file: SnapshotFile = serde_json::from_slice(&raw)
            .map_err(|e| StorageError::Corrupted(format!("decode failed: {e}")))?;

        if file.version != SNAPSHOT_VERSION {
            return Err(StorageError::Corrupted(format!(
                "unsupported snapshot version {}",
                file.version
            ))
            .into());
        }

        let now = current_timestamp_ms();
        let mut keys_loaded = 0;
        let mut keys_expired = 0;

        for record in file.entries {
            if let Some(ts) = record.expires_at {
                if now >= ts {
                    keys_expired += 1;
                    continue;
                }
            }

            let expiry = match record.expires_at {
                None => Expiry::Never,
                Some(ts) => Expiry::At(ts),
            };
            let value = decode_payload(record.payload);
            db.set_with_expiry(Key::from(record.key.as_slice()), value, expiry);
            keys_loaded += 1;
        }

        let mut documents_loaded = 0;
        for record in file.documents {
            if record.expires_at.is_some_and(|ts| now >= ts) {
                continue;
            }
            let ttl = record.expires_at.map(|ts| ts - now);
            if db.documents().set(record.id, record.data, ttl).is_ok() {
                documents_loaded += 1;
            }
        }

        let result = SnapshotLoadResult {
            keys_loaded,
            keys_expired,
            documents_loaded,
        };
        info!(
            keys = result.keys_loaded,
            expired = result.keys_expired,
            documents = result.documents_loaded,
            "snapshot loaded"
        );
        Ok(result)
    }
}

fn encode_payload(value: &FiscusValue) -> PayloadRecord {
    match value {
        FiscusValue::String(s) => PayloadRecord::String { data: s.to_vec() },
        FiscusValue::ZSet(z) => PayloadRecord::ZSet {
            members: z
                .read()
                .iter()
                .map(|e| (e.member.to_vec(), e.score))
                .collect(),
        },
        FiscusValue::Geo(g) => PayloadRecord::Geo {
            points: g
                .read()
                .iter()
                .map(|p| (p.member.to_vec(), p.longitude, p.latitude))
                .collect(),
        },
        FiscusValue::Hll(h) => PayloadRecord::Hll {
            bank: h.read().clone(),
        },
    }
}

fn decode_payload(record: PayloadRecord) -> FiscusValue {
    match record {
        PayloadRecord::String { data } => FiscusValue::string(data),
        PayloadRecord::ZSet { members } => {
            let mut zset = SortedSet::new();
            for (member, score) in members {
                zset.add(member.into(), score);
            }
            FiscusValue::from_zset(zset)
        }
        PayloadRecord::Geo { points } => {
            let mut geo = crate::types::GeoIndex::new();
            for (member, lon, lat) in points {
                geo.add(member.into(), lon, lat);
            }
            FiscusValue::from_geo(geo)
        }
        PayloadRecord::Hll { bank } => FiscusValue::from_hll(bank),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::cluster::ClusterManager;
    use crate::server::pubsub::PubSubHub;
    use crate::storage::MemoryManager;
    use crate::types::ValueType;
    use bytes::Bytes;
    use serde_json::json;

    fn test_db() -> Arc<Db> {
        Arc::new(Db::new(
            Arc::new(PubSubHub::new()),
            Arc::new(ClusterManager::standalone()),
            Arc::new(MemoryManager::default()),
        ))
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let db = test_db();

        // String
        db.set(Key::from("name"), FiscusValue::string("fiscus"));

        // Sorted index
        let zset = db.get_or_create(&Key::from("book"), ValueType::ZSet).unwrap();
        {
            let z = zset.as_zset().unwrap();
            let mut guard = z.write();
            guard.add(Bytes::from("bid:1"), 150.20);
            guard.add(Bytes::from("ask:1"), -150.25);
        }

        // Geo index
        let geo = db.get_or_create(&Key::from("atms"), ValueType::Geo).unwrap();
        geo.as_geo()
            .unwrap()
            .write()
            .add(Bytes::from("atm:1"), -122.4194, 37.7749);

        // Register bank
        let hll = db.get_or_create(&Key::from("uniq"), ValueType::Hll).unwrap();
        {
            let h = hll.as_hll().unwrap();
            let mut guard = h.write();
            guard.add(b"tx1");
            guard.add(b"tx2");
        }

        // Document
        db.documents()
            .set("doc:1", json!({"_type": "transaction", "amount": 42}), None)
            .unwrap();

        let mut buf = Vec::new();
        let save = SnapshotWriter::save(&db, &mut buf).unwrap();
        assert_eq!(save.keys_saved, 4);
        assert_eq!(save.documents_saved, 1);

        let restored = test_db();
        let load = SnapshotLoader::load(&restored, &mut buf.as_slice()).unwrap();
        assert_eq!(load.keys_loaded, 4);
        assert_eq!(load.documents_loaded, 1);

        let s = restored.get_string(&Key::from("name")).unwrap().unwrap();
        assert_eq!(s, Bytes::from("fiscus"));

        let z = restored.get(&Key::from("book")).unwrap();
        let z = z.as_zset().unwrap().read();
        assert_eq!(z.score(b"bid:1"), Some(150.20));
        assert_eq!(z.best_ask().unwrap().member, Bytes::from("ask:1"));

        let g = restored.get(&Key::from("atms")).unwrap();
        assert!(g.as_geo().unwrap().read().position(b"atm:1").is_some());

        let h = restored.get(&Key::from("uniq")).unwrap();
        assert_eq!(h.as_hll().unwrap().read().count(), 2);

        let doc = restored.documents().get("doc:1").unwrap();
        assert_eq!(doc.field("amount"), Some(&json!(42)));
    }

    #[test]
    fn test_snapshot_skips_expired_on_load() {
        let db = test_db();
        db.set(Key::from("live"), FiscusValue::string("a"));

        let mut buf = Vec::new();
        SnapshotWriter::save(&db, &mut buf).unwrap();

        // Hand-expire the entry inside the encoded snapshot
        let mut file: SnapshotFile = serde_json::from_slice(&buf).unwrap();
        file.entries[0].expires_at = Some(0);
        let buf = serde_json::to_vec(&file).unwrap();

        let restored = test_db();
        let load = SnapshotLoader::load(&restored, &mut buf.as_slice()).unwrap();
        assert_eq!(load.keys_loaded, 0);
        assert_eq!(load.keys_expired, 1);
    }

    #[test]
    fn test_corrupt_snapshot_rejected() {
        let restored = test_db();
        let mut garbage: &[u8] = b"not json";
        assert!(SnapshotLoader::load(&restored, &mut garbage).is_err());
    }
}
