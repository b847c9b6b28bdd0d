//! Connection command implementations.

use super::ParsedCommand;
use crate::Result;
use crate::protocol::Frame;
use crate::server::ClientState;
use crate::storage::Db;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// PING [message]
pub fn cmd_ping(
    cmd: ParsedCommand,
    _db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        Ok(match cmd.args.first() {
            Some(msg) => Frame::Bulk(msg.clone()),
            None => Frame::pong(),
        })
    })
}

/// ECHO message
pub fn cmd_echo(
    cmd: ParsedCommand,
    _db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move { Ok(Frame::Bulk(cmd.args[0].clone())) })
}

/// QUIT
pub fn cmd_quit(
    _cmd: ParsedCommand,
    _db: Arc<Db>,
    client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        client.close();
        Ok(Frame::ok())
    })
}
