//! Cardinality register commands.

use super::ParsedCommand;
use crate::Result;
use crate::protocol::Frame;
use crate::server::ClientState;
use crate::storage::Db;
use crate::types::{HyperLogLog, Key, ValueType};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// PFADD key [element ...]
pub fn cmd_pfadd(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from_bytes(cmd.args[0].clone());
        let value = db.get_or_create(&key, ValueType::Hll)?;
        let hll = value.as_hll().expect("created as hll");

        let mut changed = false;
        let mut guard = hll.write();
        for element in &cmd.args[1..] {
            if guard.add(element) {
                changed = true;
            }
        }
        Ok(Frame::Integer(i64::from(changed)))
    })
}

/// PFCOUNT key [key ...]
///
/// Multiple keys count the cardinality of their union.
pub fn cmd_pfcount(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        if cmd.args.len() == 1 {
            let key = Key::from_bytes(cmd.args[0].clone());
            let Some(value) = db.get_typed(&key, ValueType::Hll)? else {
                return Ok(Frame::Integer(0));
            };
            let hll = value.as_hll().expect("checked type");
            let count = hll.read().count();
            return Ok(Frame::Integer(count as i64));
        }

        // Union across keys: merge copies into a scratch bank
        let mut union: Option<HyperLogLog> = None;
        for arg in &cmd.args {
            let key = Key::from_bytes(arg.clone());
            let Some(value) = db.get_typed(&key, ValueType::Hll)? else {
                continue;
            };
            let hll = value.as_hll().expect("checked type");
            let bank = hll.read().clone();
            match &mut union {
                None => union = Some(bank),
                Some(acc) => acc.merge(&bank)?,
            }
        }

        Ok(Frame::Integer(
            union.map(|bank| bank.count() as i64).unwrap_or(0),
        ))
    })
}

/// PFMERGE destkey sourcekey [sourcekey ...]
pub fn cmd_pfmerge(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        // Collect source banks first so a precision mismatch leaves the
        // destination untouched
        let mut sources = Vec::with_capacity(cmd.args.len() - 1);
        for arg in &cmd.args[1..] {
            let key = Key::from_bytes(arg.clone());
            if let Some(value) = db.get_typed(&key, ValueType::Hll)? {
                let hll = value.as_hll().expect("checked type");
                sources.push(hll.read().clone());
            }
        }

        let dest_key = Key::from_bytes(cmd.args[0].clone());
        let dest_value = db.get_or_create(&dest_key, ValueType::Hll)?;
        let dest = dest_value.as_hll().expect("created as hll");

        {
            let mut merged = dest.read().clone();
            for source in &sources {
                merged.merge(source)?;
            }
            *dest.write() = merged;
        }

        Ok(Frame::ok())
    })
}
