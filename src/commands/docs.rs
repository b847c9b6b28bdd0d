//! Document store commands.
//!
//! `DOC.QUERY` takes predicate triples (`field op value`) followed by an
//! optional `LIMIT offset count`. Values parse as JSON when they can,
//! falling back to plain strings.

use super::ParsedCommand;
use crate::Result;
use crate::error::CommandError;
use crate::protocol::Frame;
use crate::server::ClientState;
use crate::storage::Db;
use crate::types::{Predicate, PredicateOp};
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// DOC.SET id json [ttl_seconds]
pub fn cmd_doc_set(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let id = cmd.get_str(0)?.to_string();
        let data: Value = serde_json::from_str(cmd.get_str(1)?)
            .map_err(|_| CommandError::SyntaxError)?;

        let ttl_millis = match cmd.args.get(2) {
            None => None,
            Some(_) => {
                let seconds = cmd.get_i64(2)?;
                if seconds <= 0 {
                    return Err(CommandError::InvalidExpireTime.into());
                }
                Some(seconds.saturating_mul(1000))
            }
        };

        db.documents().set(id, data, ttl_millis)?;
        Ok(Frame::ok())
    })
}

/// DOC.GET id
pub fn cmd_doc_get(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let id = cmd.get_str(0)?;
        Ok(match db.documents().get(id) {
            Some(doc) => Frame::bulk(doc.data.to_string()),
            None => Frame::Null,
        })
    })
}

/// DOC.DEL id
pub fn cmd_doc_del(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let id = cmd.get_str(0)?;
        Ok(Frame::Integer(i64::from(db.documents().delete(id))))
    })
}

/// DOC.INDEX field_path
pub fn cmd_doc_index(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let field = cmd.get_str(0)?;
        db.documents().create_index(field)?;
        Ok(Frame::ok())
    })
}

/// DOC.QUERY [field op value ...] [LIMIT offset count]
///
/// Reply: [total, id, body, id, body, ...] for the requested page.
pub fn cmd_doc_query(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let mut predicates = Vec::new();
        let mut limit = 100usize;
        let mut offset = 0usize;

        let mut i = 0;
        while i < cmd.args.len() {
            if cmd.args[i].eq_ignore_ascii_case(b"LIMIT") {
                offset = usize::try_from(cmd.get_i64(i + 1)?)
                    .map_err(|_| CommandError::NotInteger)?;
                limit = usize::try_from(cmd.get_i64(i + 2)?)
                    .map_err(|_| CommandError::NotInteger)?;
                i += 3;
                continue;
            }

            if i + 2 >= cmd.args.len() {
                return Err(CommandError::SyntaxError.into());
            }
            let field = cmd.get_str(i)?.to_string();
            let op = PredicateOp::parse(cmd.get_str(i + 1)?)?;
            let value = parse_value(cmd.get_str(i + 2)?);
            predicates.push(Predicate::new(field, op, value));
            i += 3;
        }

        let result = db.documents().query(&predicates, limit, offset);

        let mut frames = Vec::with_capacity(1 + result.documents.len() * 2);
        frames.push(Frame::Integer(result.total as i64));
        for doc in result.documents {
            frames.push(Frame::bulk(doc.id));
            frames.push(Frame::bulk(doc.data.to_string()));
        }
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
    async fn test_doc_set_get_del() {
        let db = test_db();

        let reply = cmd_doc_set(
            cmd("DOC.SET", &["tx:1", r#"{"amount": 250, "user_id": "u1"}"#]),
            db.clone(),
            client(),
        )
        .await
        .unwrap();
        assert_eq!(reply, Frame::ok());

        let reply = cmd_doc_get(cmd("DOC.GET", &["tx:1"]), db.clone(), client())
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_str(reply.as_str().unwrap()).unwrap();
        assert_eq!(body["amount"], 250);

        let reply = cmd_doc_del(cmd("DOC.DEL", &["tx:1"]), db.clone(), client())
            .await
            .unwrap();
        assert_eq!(reply, Frame::Integer(1));

        let reply = cmd_doc_get(cmd("DOC.GET", &["tx:1"]), db, client())
            .await
            .unwrap();
        assert_eq!(reply, Frame::Null);
    }

    #[tokio::test]
    async fn test_doc_set_rejects_invalid_json() {
        assert!(cmd_doc_set(
            cmd("DOC.SET", &["d", "not json"]),
            test_db(),
            client()
        )
        .await
        .is_err());
    }

    #[tokio::test]
    async fn test_doc_query_predicates() {
        let db = test_db();
        for (id, body) in [
            ("tx:1", r#"{"_type": "transaction", "amount": 250}"#),
            ("tx:2", r#"{"_type": "transaction", "amount": 1500}"#),
            ("u:1", r#"{"_type": "user_profile"}"#),
        ] {
            cmd_doc_set(cmd("DOC.SET", &[id, body]), db.clone(), client())
                .await
                .unwrap();
        }

        let reply = cmd_doc_query(
            cmd(
                "DOC.QUERY",
                &["_type", "=", "transaction", "amount", ">", "1000"],
            ),
            db.clone(),
            client(),
        )
        .await
        .unwrap();
        let arr = reply.as_array().unwrap();
        assert_eq!(arr[0], Frame::Integer(1));
        assert_eq!(arr[1], Frame::bulk("tx:2"));

        // No predicates returns everything, paginated
        let reply = cmd_doc_query(cmd("DOC.QUERY", &["LIMIT", "0", "2"]), db, client())
            .await
            .unwrap();
        let arr = reply.as_array().unwrap();
        assert_eq!(arr[0], Frame::Integer(3));
        assert_eq!(arr.len(), 1 + 2 * 2);
    }

    #[tokio::test]
    async fn test_doc_index_command() {
        let db = test_db();
        let reply = cmd_doc_index(cmd("DOC.INDEX", &["user_id"]), db.clone(), client())
            .await
            .unwrap();
        assert_eq!(reply, Frame::ok());

        assert!(cmd_doc_index(cmd("DOC.INDEX", &["user_id"]), db, client())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_doc_query_bad_operator() {
        assert!(cmd_doc_query(
            cmd("DOC.QUERY", &["f", "~", "v"]),
            test_db(),
            client()
        )
        .await
        .is_err());
    }
}
