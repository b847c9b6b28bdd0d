//! Server introspection and maintenance commands.

use super::ParsedCommand;
use crate::Result;
use crate::error::StorageError;
use crate::protocol::Frame;
use crate::server::ClientState;
use crate::storage::{Db, SnapshotWriter};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// INFO [section]
///
/// Sections: Server, Keyspace, Memory. No section returns all three.
pub fn cmd_info(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let section = cmd
            .args
            .first()
            .and_then(|s| std::str::from_utf8(s).ok())
            .map(str::to_lowercase);
        let section = section.as_deref();
        let include_all = section.is_none() || section == Some("all");

        let stats = db.stats();
        let mut info = String::new();

        if include_all || section == Some("server") {
            info.push_str("# Server\r\n");
            info.push_str(&format!("fiscus_version:{}\r\n", crate::VERSION));
            info.push_str(&format!("redis_compat_version:{}\r\n", crate::REDIS_VERSION));
            info.push_str(&format!("os:{}\r\n", std::env::consts::OS));
            info.push_str(&format!("arch_bits:{}\r\n", usize::BITS));
            info.push_str(&format!(
                "cluster_enabled:{}\r\n",
                u8::from(db.cluster().is_enabled())
            ));
            info.push_str("\r\n");
        }

        if include_all || section == Some("keyspace") {
            info.push_str("# Keyspace\r\n");
            info.push_str(&format!(
                "db0:keys={},expires={}\r\n",
                stats.total_keys, stats.expires
            ));
            info.push_str(&format!("keyspace_hits:{}\r\n", stats.hits));
            info.push_str(&format!("keyspace_misses:{}\r\n", stats.misses));
            info.push_str(&format!("expired_keys:{}\r\n", stats.expired_keys));
            info.push_str(&format!("documents:{}\r\n", db.documents().len()));
            info.push_str("\r\n");
        }

        if include_all || section == Some("memory") {
            info.push_str("# Memory\r\n");
            info.push_str(&format!("used_memory:{}\r\n", stats.memory_bytes));
            info.push_str(&format!("maxmemory:{}\r\n", db.memory().maxmemory()));
            info.push_str(&format!(
                "maxmemory_policy:{}\r\n",
                db.memory().policy().as_str()
            ));
            info.push_str(&format!("evicted_keys:{}\r\n", stats.evicted_keys));
            info.push_str("\r\n");
        }

        Ok(Frame::bulk(info))
    })
}

/// DBSIZE
pub fn cmd_dbsize(
    _cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move { Ok(Frame::Integer(db.len() as i64)) })
}

/// SAVE
///
/// Writes a snapshot to the configured path. A temp-file rename keeps a
/// failed save from clobbering the previous snapshot.
pub fn cmd_save(
    _cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let Some(path) = db.snapshot_path() else {
            return Ok(Frame::error("ERR snapshot path not configured".to_string()));
        };

        let tmp = path.with_extension("tmp");
        let mut file = std::fs::File::create(&tmp).map_err(StorageError::Io)?;
        SnapshotWriter::save(&db, &mut file)?;
        std::fs::rename(&tmp, &path).map_err(StorageError::Io)?;

        Ok(Frame::ok())
    })
}
