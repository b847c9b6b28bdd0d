//! Publish-side pub/sub commands.
//!
//! SUBSCRIBE and friends are handled by the connection loop, which owns
//! the receivers; only PUBLISH and the introspection command live here.

use super::ParsedCommand;
use crate::Result;
use crate::error::CommandError;
use crate::protocol::Frame;
use crate::server::ClientState;
use crate::storage::Db;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// PUBLISH channel message
pub fn cmd_publish(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let channel = cmd.args[0].clone();
        let message = cmd.args[1].clone();
        let count = db.pubsub().publish(channel, message);
        Ok(Frame::Integer(count as i64))
    })
}

/// PUBSUB CHANNELS [pattern] | NUMSUB [channel ...] | NUMPAT
pub fn cmd_pubsub(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let subcommand = cmd.get_str(0)?.to_uppercase();
        let pubsub = db.pubsub();

        match subcommand.as_str() {
            "CHANNELS" => {
                let pattern = cmd.args.get(1).cloned();
                let channels = pubsub.channels(pattern.as_ref());
                Ok(Frame::Array(channels.into_iter().map(Frame::Bulk).collect()))
            }
            "NUMSUB" => {
                let mut result = Vec::new();
                for channel in cmd.args.iter().skip(1) {
                    result.push(Frame::Bulk(channel.clone()));
                    result.push(Frame::Integer(pubsub.numsub(channel) as i64));
                }
                Ok(Frame::Array(result))
            }
            "NUMPAT" => Ok(Frame::Integer(pubsub.numpat() as i64)),
            _ => Err(CommandError::SyntaxError.into()),
        }
    })
}
