//! String-keyed keyspace commands.

use super::ParsedCommand;
use crate::Result;
use crate::error::CommandError;
use crate::protocol::Frame;
use crate::server::ClientState;
use crate::storage::Db;
use crate::types::{Expiry, FiscusValue, Key};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// SET key value [EX seconds | PX milliseconds]
pub fn cmd_set(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from_bytes(cmd.args[0].clone());
        let value = FiscusValue::String(cmd.args[1].clone());

        let mut expiry = Expiry::Never;
        let mut i = 2;
        while i < cmd.args.len() {
            match cmd.get_str(i)?.to_uppercase().as_str() {
                "EX" => {
                    let seconds = cmd.get_i64(i + 1)?;
                    if seconds <= 0 {
                        return Err(CommandError::InvalidExpireTime.into());
                    }
                    expiry = Expiry::from_seconds(seconds);
                    i += 2;
                }
                "PX" => {
                    let millis = cmd.get_i64(i + 1)?;
                    if millis <= 0 {
                        return Err(CommandError::InvalidExpireTime.into());
                    }
                    expiry = Expiry::from_millis(millis);
                    i += 2;
                }
                _ => return Err(CommandError::SyntaxError.into()),
            }
        }

        db.set_with_expiry(key, value, expiry);
        Ok(Frame::ok())
    })
}

/// GET key
pub fn cmd_get(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from_bytes(cmd.args[0].clone());
        match db.get_string(&key)? {
            Some(value) => Ok(Frame::Bulk(value)),
            None => Ok(Frame::Null),
        }
    })
}

/// SETEX key seconds value
pub fn cmd_setex(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from_bytes(cmd.args[0].clone());
        let seconds = cmd.get_i64(1)?;
        if seconds <= 0 {
            return Err(CommandError::InvalidExpireTime.into());
        }
        let value = FiscusValue::String(cmd.args[2].clone());

        db.set_with_expiry(key, value, Expiry::from_seconds(seconds));
        Ok(Frame::ok())
    })
}

/// DEL key [key ...]
pub fn cmd_del(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let mut deleted = 0i64;
        for arg in &cmd.args {
            if db.delete(&Key::from_bytes(arg.clone())) {
                deleted += 1;
            }
        }
        Ok(Frame::Integer(deleted))
    })
}

/// EXISTS key [key ...]
pub fn cmd_exists(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let mut count = 0i64;
        for arg in &cmd.args {
            if db.exists(&Key::from_bytes(arg.clone())) {
                count += 1;
            }
        }
        Ok(Frame::Integer(count))
    })
}

/// MSET key value [key value ...]
pub fn cmd_mset(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        if cmd.args.len() % 2 != 0 {
            return Err(CommandError::WrongArity {
                command: cmd.name.clone(),
            }
            .into());
        }

        for pair in cmd.args.chunks(2) {
            db.set(
                Key::from_bytes(pair[0].clone()),
                FiscusValue::String(pair[1].clone()),
            );
        }
        Ok(Frame::ok())
    })
}

/// MGET key [key ...]
pub fn cmd_mget(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let frames = cmd
            .args
            .iter()
            .map(|arg| {
                match db.get_string(&Key::from_bytes(arg.clone())) {
                    Ok(Some(value)) => Frame::Bulk(value),
                    // Missing and type-mismatched keys both read as null
                    _ => Frame::Null,
                }
            })
            .collect();
        Ok(Frame::Array(frames))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::cluster::ClusterManager;
    use crate::server::pubsub::PubSubHub;
    use crate::storage::MemoryManager;
    use bytes::Bytes;

    fn test_db() -> Arc<Db> {
        Arc::new(Db::new(
            Arc::new(PubSubHub::new()),
            Arc::new(ClusterManager::standalone()),
            Arc::new(MemoryManager::default()),
        ))
    }

    fn client() -> Arc<ClientState> {
        Arc::new(ClientState::new(1))
    }

    fn cmd(name: &str, args: &[&str]) -> ParsedCommand {
        ParsedCommand {
            name: name.to_string(),
            args: args
                .iter()
                .map(|s| Bytes::copy_from_slice(s.as_bytes()))
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_set_get() {
        let db = test_db();
        let reply = cmd_set(cmd("SET", &["foo", "bar"]), db.clone(), client())
            .await
            .unwrap();
        assert_eq!(reply, Frame::ok());

        let reply = cmd_get(cmd("GET", &["foo"]), db, client()).await.unwrap();
        assert_eq!(reply, Frame::bulk("bar"));
    }

    #[tokio::test]
    async fn test_get_missing_is_null() {
        let reply = cmd_get(cmd("GET", &["nope"]), test_db(), client())
            .await
            .unwrap();
        assert_eq!(reply, Frame::Null);
    }

    #[tokio::test]
    async fn test_set_with_ex() {
        let db = test_db();
        cmd_set(cmd("SET", &["k", "v", "EX", "100"]), db.clone(), client())
            .await
            .unwrap();
        let ttl = db.ttl(&Key::from("k"));
        assert!(ttl > 0 && ttl <= 100);
    }

    #[tokio::test]
    async fn test_set_with_px() {
        let db = test_db();
        cmd_set(cmd("SET", &["k", "v", "PX", "5000"]), db.clone(), client())
            .await
            .unwrap();
        let ttl = db.ttl(&Key::from("k"));
        assert!(ttl >= 0 && ttl <= 5);
    }

    #[tokio::test]
    async fn test_set_rejects_bad_expiry() {
        let db = test_db();
        assert!(
            cmd_set(cmd("SET", &["k", "v", "EX", "0"]), db.clone(), client())
                .await
                .is_err()
        );
        assert!(
            cmd_set(cmd("SET", &["k", "v", "EX", "abc"]), db.clone(), client())
                .await
                .is_err()
        );
        assert!(
            cmd_set(cmd("SET", &["k", "v", "BOGUS"]), db, client())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_setex() {
        let db = test_db();
        cmd_setex(cmd("SETEX", &["k", "60", "v"]), db.clone(), client())
            .await
            .unwrap();
        assert!(db.ttl(&Key::from("k")) > 0);
    }

    #[tokio::test]
    async fn test_del_multi() {
        let db = test_db();
        db.set(Key::from("a"), FiscusValue::string("1"));
        db.set(Key::from("b"), FiscusValue::string("2"));

        let reply = cmd_del(cmd("DEL", &["a", "b", "missing"]), db, client())
            .await
            .unwrap();
        assert_eq!(reply, Frame::Integer(2));
    }

    #[tokio::test]
    async fn test_exists_accumulates() {
        let db = test_db();
        db.set(Key::from("a"), FiscusValue::string("1"));

        let reply = cmd_exists(cmd("EXISTS", &["a", "a", "missing"]), db, client())
            .await
            .unwrap();
        assert_eq!(reply, Frame::Integer(2));
    }

    #[tokio::test]
    async fn test_mset_mget() {
        let db = test_db();
        cmd_mset(cmd("MSET", &["a", "1", "b", "2"]), db.clone(), client())
            .await
            .unwrap();

        let reply = cmd_mget(cmd("MGET", &["a", "missing", "b"]), db, client())
            .await
            .unwrap();
        assert_eq!(
            reply,
            Frame::Array(vec![Frame::bulk("1"), Frame::Null, Frame::bulk("2")])
        );
    }

    #[tokio::test]
    async fn test_mset_odd_args_rejected() {
        assert!(
            cmd_mset(cmd("MSET", &["a", "1", "b"]), test_db(), client())
                .await
                .is_err()
        );
    }
}
