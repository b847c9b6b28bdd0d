//! Cluster command implementations.

use super::ParsedCommand;
use crate::Result;
use crate::error::CommandError;
use crate::protocol::Frame;
use crate::server::ClientState;
use crate::server::cluster::{CLUSTER_SLOTS, key_slot};
use crate::storage::Db;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// CLUSTER subcommand [args...]
pub fn cmd_cluster(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let subcommand = cmd.get_str(0)?.to_uppercase();
        let cluster = db.cluster();

        match subcommand.as_str() {
            "INFO" => Ok(Frame::bulk(cluster.info())),

            "KEYSLOT" => {
                cmd.require_args(2)?;
                Ok(Frame::Integer(i64::from(key_slot(&cmd.args[1]))))
            }

            "NODES" => {
                let self_id = cluster.self_id().to_string();
                let lines: Vec<String> = cluster
                    .nodes()
                    .iter()
                    .map(|node| node.to_nodes_line(node.id == self_id))
                    .collect();
                Ok(Frame::bulk(lines.join("\n")))
            }

            "SLOTS" => {
                let mut frames = Vec::new();
                for node in cluster.nodes() {
                    for (start, end) in node.slot_ranges() {
                        frames.push(Frame::Array(vec![
                            Frame::Integer(i64::from(start)),
                            Frame::Integer(i64::from(end)),
                            Frame::Array(vec![
                                Frame::bulk(node.address.clone()),
                                Frame::Integer(i64::from(node.port)),
                                Frame::bulk(node.id.clone()),
                            ]),
                        ]));
                    }
                }
                Ok(Frame::Array(frames))
            }

            "MEET" => {
                // CLUSTER MEET id host port [REPLICAOF primary-id]
                cmd.require_args(4)?;
                let id = cmd.get_str(1)?.to_string();
                let host = cmd.get_str(2)?.to_string();
                let port = u16::try_from(cmd.get_i64(3)?)
                    .map_err(|_| CommandError::NotInteger)?;

                let added = match cmd.args.get(4) {
                    Some(flag) if flag.eq_ignore_ascii_case(b"REPLICAOF") => {
                        let primary = cmd.get_str(5)?;
                        cluster.add_replica(primary, id, host, port)
                    }
                    Some(_) => return Err(CommandError::SyntaxError.into()),
                    None => cluster.add_node(id, host, port, Vec::new()),
                };

                if added {
                    Ok(Frame::ok())
                } else {
                    Err(CommandError::ScriptError("node not added".into()).into())
                }
            }

            "FORGET" => {
                cmd.require_args(2)?;
                let id = cmd.get_str(1)?;
                if cluster.remove_node(id) {
                    Ok(Frame::ok())
                } else {
                    Err(CommandError::NoSuchKey.into())
                }
            }

            "REBALANCE" => {
                if cluster.rebalance() {
                    Ok(Frame::ok())
                } else {
                    Err(CommandError::ClusterDown.into())
                }
            }

            "FAILOVER" => {
                cmd.require_args(2)?;
                let primary = cmd.get_str(1)?;
                match cluster.failover(primary) {
                    Some(promoted) => Ok(Frame::bulk(promoted)),
                    None => Err(CommandError::ScriptError(
                        "no connected replica available for failover".into(),
                    )
                    .into()),
                }
            }

            "COUNTKEYSINSLOT" => {
                cmd.require_args(2)?;
                let slot = u16::try_from(cmd.get_i64(1)?)
                    .map_err(|_| CommandError::NotInteger)?;
                if slot >= CLUSTER_SLOTS {
                    return Err(CommandError::NotInteger.into());
                }
                let count = db
                    .keys(b"*")
                    .iter()
                    .filter(|key| key_slot(key.as_bytes()) == slot)
                    .count();
                Ok(Frame::Integer(count as i64))
            }

            _ => Err(CommandError::SyntaxError.into()),
        }
    })
}
