//! Keyspace introspection and lifecycle commands.

use super::ParsedCommand;
use crate::Result;
use crate::error::CommandError;
use crate::protocol::Frame;
use crate::server::ClientState;
use crate::storage::Db;
use crate::types::{Expiry, Key};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// KEYS pattern
pub fn cmd_keys(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let keys = db.keys(&cmd.args[0]);
        let frames = keys.into_iter().map(|k| Frame::Bulk(k.to_bytes())).collect();
        Ok(Frame::Array(frames))
    })
}

/// TTL key
pub fn cmd_ttl(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from_bytes(cmd.args[0].clone());
        Ok(Frame::Integer(db.ttl(&key)))
    })
}

/// EXPIRE key seconds
pub fn cmd_expire(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from_bytes(cmd.args[0].clone());
        let seconds = cmd.get_i64(1)?;
        if seconds <= 0 {
            // An already-elapsed expiry deletes the key outright
            let existed = db.delete(&key);
            return Ok(Frame::Integer(i64::from(existed)));
        }

        let updated = db.expire(&key, Expiry::from_seconds(seconds));
        Ok(Frame::Integer(i64::from(updated)))
    })
}

/// FLUSHDB
pub fn cmd_flushdb(
    _cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        db.flush();
        Ok(Frame::ok())
    })
}

/// Shared helper: parse a non-negative integer argument.
pub(super) fn parse_usize(cmd: &ParsedCommand, index: usize) -> Result<usize> {
    let n = cmd.get_i64(index)?;
    usize::try_from(n).map_err(|_| CommandError::NotInteger.into())
}
