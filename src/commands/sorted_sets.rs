//! Sorted index commands and order-book views.

use super::ParsedCommand;
use crate::Result;
use crate::error::CommandError;
use crate::protocol::Frame;
use crate::server::ClientState;
use crate::storage::Db;
use crate::types::{Key, ScoreBound, SortedSetEntry, ValueType};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

fn format_score(score: f64) -> String {
    if score == score.trunc() && score.abs() < 1e17 {
        format!("{}", score as i64)
    } else {
        format!("{score}")
    }
}

fn entries_to_frames(entries: Vec<SortedSetEntry>, with_scores: bool) -> Frame {
    let mut frames = Vec::with_capacity(entries.len() * if with_scores { 2 } else { 1 });
    for entry in entries {
        frames.push(Frame::Bulk(entry.member));
        if with_scores {
            frames.push(Frame::bulk(format_score(entry.score)));
        }
    }
    Frame::Array(frames)
}

fn parse_bound(cmd: &ParsedCommand, index: usize) -> Result<ScoreBound> {
    ScoreBound::parse(cmd.get_str(index)?).ok_or_else(|| CommandError::NotFloat.into())
}

fn with_scores_flag(cmd: &ParsedCommand, index: usize) -> Result<bool> {
    match cmd.args.get(index) {
        None => Ok(false),
        Some(arg) if arg.eq_ignore_ascii_case(b"WITHSCORES") => Ok(true),
        Some(_) => Err(CommandError::SyntaxError.into()),
    }
}

/// ZADD key score member [score member ...]
pub fn cmd_zadd(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        if (cmd.args.len() - 1) % 2 != 0 {
            return Err(CommandError::WrongArity {
                command: cmd.name.clone(),
            }
            .into());
        }

        // Validate all scores before mutating
        let mut pairs = Vec::with_capacity((cmd.args.len() - 1) / 2);
        let mut i = 1;
        while i < cmd.args.len() {
            let score = cmd.get_f64(i)?;
            pairs.push((score, cmd.args[i + 1].clone()));
            i += 2;
        }

        let key = Key::from_bytes(cmd.args[0].clone());
        let value = db.get_or_create(&key, ValueType::ZSet)?;
        let zset = value.as_zset().expect("created as zset");

        let mut added = 0i64;
        let mut guard = zset.write();
        for (score, member) in pairs {
            if guard.add(member, score) {
                added += 1;
            }
        }
        Ok(Frame::Integer(added))
    })
}

/// ZREM key member [member ...]
pub fn cmd_zrem(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from_bytes(cmd.args[0].clone());
        let Some(value) = db.get_typed(&key, ValueType::ZSet)? else {
            return Ok(Frame::Integer(0));
        };
        let zset = value.as_zset().expect("checked type");

        let removed = zset
            .write()
            .remove_multi(cmd.args[1..].iter().map(|b| b.as_ref()));
        Ok(Frame::Integer(removed as i64))
    })
}

/// ZSCORE key member
pub fn cmd_zscore(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from_bytes(cmd.args[0].clone());
        let Some(value) = db.get_typed(&key, ValueType::ZSet)? else {
            return Ok(Frame::Null);
        };
        let zset = value.as_zset().expect("checked type");

        let result = Ok(match zset.read().score(&cmd.args[1]) {
            Some(score) => Frame::bulk(format_score(score)),
            None => Frame::Null,
        });
        result
    })
}

/// ZRANK key member
pub fn cmd_zrank(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from_bytes(cmd.args[0].clone());
        let Some(value) = db.get_typed(&key, ValueType::ZSet)? else {
            return Ok(Frame::Null);
        };
        let zset = value.as_zset().expect("checked type");

        let result = Ok(match zset.read().rank(&cmd.args[1]) {
            Some(rank) => Frame::Integer(rank as i64),
            None => Frame::Null,
        });
        result
    })
}

/// ZREVRANK key member
pub fn cmd_zrevrank(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from_bytes(cmd.args[0].clone());
        let Some(value) = db.get_typed(&key, ValueType::ZSet)? else {
            return Ok(Frame::Null);
        };
        let zset = value.as_zset().expect("checked type");

        let result = Ok(match zset.read().rev_rank(&cmd.args[1]) {
            Some(rank) => Frame::Integer(rank as i64),
            None => Frame::Null,
        });
        result
    })
}

/// ZRANGE key start stop [WITHSCORES]
pub fn cmd_zrange(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from_bytes(cmd.args[0].clone());
        let start = cmd.get_i64(1)?;
        let stop = cmd.get_i64(2)?;
        let with_scores = with_scores_flag(&cmd, 3)?;

        let Some(value) = db.get_typed(&key, ValueType::ZSet)? else {
            return Ok(Frame::empty_array());
        };
        let zset = value.as_zset().expect("checked type");

        let entries = zset.read().range(start, stop);
        Ok(entries_to_frames(entries, with_scores))
    })
}

/// ZREVRANGE key start stop [WITHSCORES]
pub fn cmd_zrevrange(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from_bytes(cmd.args[0].clone());
        let start = cmd.get_i64(1)?;
        let stop = cmd.get_i64(2)?;
        let with_scores = with_scores_flag(&cmd, 3)?;

        let Some(value) = db.get_typed(&key, ValueType::ZSet)? else {
            return Ok(Frame::empty_array());
        };
        let zset = value.as_zset().expect("checked type");

        let entries = zset.read().rev_range(start, stop);
        Ok(entries_to_frames(entries, with_scores))
    })
}

/// ZRANGEBYSCORE key min max
pub fn cmd_zrangebyscore(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from_bytes(cmd.args[0].clone());
        let min = parse_bound(&cmd, 1)?;
        let max = parse_bound(&cmd, 2)?;

        let Some(value) = db.get_typed(&key, ValueType::ZSet)? else {
            return Ok(Frame::empty_array());
        };
        let zset = value.as_zset().expect("checked type");

        let entries = zset.read().range_by_score(min, max);
        Ok(entries_to_frames(entries, false))
    })
}

/// ZCOUNT key min max
pub fn cmd_zcount(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from_bytes(cmd.args[0].clone());
        let min = parse_bound(&cmd, 1)?;
        let max = parse_bound(&cmd, 2)?;

        let Some(value) = db.get_typed(&key, ValueType::ZSet)? else {
            return Ok(Frame::Integer(0));
        };
        let zset = value.as_zset().expect("checked type");

        let result = Ok(Frame::Integer(zset.read().count_by_score(min, max) as i64));
        result
    })
}

/// ZCARD key
pub fn cmd_zcard(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from_bytes(cmd.args[0].clone());
        let Some(value) = db.get_typed(&key, ValueType::ZSet)? else {
            return Ok(Frame::Integer(0));
        };
        let zset = value.as_zset().expect("checked type");

        let result = Ok(Frame::Integer(zset.read().len() as i64));
        result
    })
}

/// ZINCRBY key increment member
pub fn cmd_zincrby(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from_bytes(cmd.args[0].clone());
        let delta = cmd.get_f64(1)?;
        let member = cmd.args[2].clone();

        let value = db.get_or_create(&key, ValueType::ZSet)?;
        let zset = value.as_zset().expect("created as zset");

        let new_score = zset.write().incr(member, delta);
        Ok(Frame::bulk(format_score(new_score)))
    })
}

/// ZREMRANGEBYRANK key start stop
pub fn cmd_zremrangebyrank(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from_bytes(cmd.args[0].clone());
        let start = cmd.get_i64(1)?;
        let stop = cmd.get_i64(2)?;

        let Some(value) = db.get_typed(&key, ValueType::ZSet)? else {
            return Ok(Frame::Integer(0));
        };
        let zset = value.as_zset().expect("checked type");

        let removed = zset.write().remove_range_by_rank(start, stop);
        Ok(Frame::Integer(removed as i64))
    })
}

/// ZREMRANGEBYSCORE key min max
pub fn cmd_zremrangebyscore(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from_bytes(cmd.args[0].clone());
        let min = parse_bound(&cmd, 1)?;
        let max = parse_bound(&cmd, 2)?;

        let Some(value) = db.get_typed(&key, ValueType::ZSet)? else {
            return Ok(Frame::Integer(0));
        };
        let zset = value.as_zset().expect("checked type");

        let removed = zset.write().remove_range_by_score(min, max);
        Ok(Frame::Integer(removed as i64))
    })
}

/// BOOK.TOP key depth
///
/// Reply: [bids, asks] where each side is a flat [member, price, ...] array.
/// Bids come best-first (descending score); asks best-first (ascending
/// true price, negation undone).
pub fn cmd_book_top(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from_bytes(cmd.args[0].clone());
        let depth = super::keys::parse_usize(&cmd, 1)?;

        let Some(value) = db.get_typed(&key, ValueType::ZSet)? else {
            return Ok(Frame::Array(vec![Frame::empty_array(), Frame::empty_array()]));
        };
        let zset = value.as_zset().expect("checked type");

        let (bids, asks) = zset.read().book(depth);
        let side_to_frame = |side: Vec<crate::types::BookLevel>| {
            let mut frames = Vec::with_capacity(side.len() * 2);
            for level in side {
                frames.push(Frame::Bulk(level.member));
                frames.push(Frame::bulk(format_score(level.price)));
            }
            Frame::Array(frames)
        };

        Ok(Frame::Array(vec![side_to_frame(bids), side_to_frame(asks)]))
    })
}

/// BOOK.SPREAD key
///
/// Reply: [best_bid_member, best_bid_price, best_ask_member,
/// best_ask_price, spread], or null when either side is empty.
pub fn cmd_book_spread(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from_bytes(cmd.args[0].clone());
        let Some(value) = db.get_typed(&key, ValueType::ZSet)? else {
            return Ok(Frame::Null);
        };
        let zset = value.as_zset().expect("checked type");

        let guard = zset.read();
        let (Some(bid), Some(ask), Some(spread)) =
            (guard.best_bid(), guard.best_ask(), guard.spread())
        else {
            return Ok(Frame::Null);
        };

        Ok(Frame::Array(vec![
            Frame::Bulk(bid.member),
            Frame::bulk(format_score(bid.score)),
            Frame::Bulk(ask.member),
            Frame::bulk(format_score(-ask.score)),
            Frame::bulk(format_score(spread)),
        ]))
    })
}
