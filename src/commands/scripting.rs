//! Lua scripting commands.
//!
//! Scripts run in a restricted Lua state (string/table/math stdlib only)
//! with an instruction budget, and see the keyspace through a narrow
//! callback table (`fiscus.*`) rather than any global handle. Script
//! execution is serialized: one script at a time touches the keyspace.

use super::ParsedCommand;
use crate::Result;
use crate::error::CommandError;
use crate::protocol::Frame;
use crate::server::ClientState;
use crate::storage::Db;
use crate::types::{Key, ValueType, current_timestamp_ms};
use bytes::Bytes;
use mlua::{HookTriggers, Lua, LuaOptions, MultiValue, StdLib, Value, VmState};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, RwLock};
use tracing::info;

/// Script cache: SHA1 digest -> source text.
static SCRIPT_CACHE: LazyLock<RwLock<HashMap<String, String>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

/// Serializes script execution against the keyspace.
static EVAL_LOCK: Mutex<()> = Mutex::new(());

/// Instruction budget per script invocation.
const INSTRUCTION_BUDGET: u64 = 1_000_000;

/// Hook granularity in instructions.
const HOOK_EVERY: u32 = 1_000;

/// SHA1 digest of a script, lowercase hex.
fn sha1_hash(script: &str) -> String {
    use sha1::{Digest, Sha1};

    let mut hasher = Sha1::new();
    hasher.update(script.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Convert a Lua return value to a reply frame.
///
/// string -> bulk; integral number -> integer; other number -> bulk;
/// boolean -> integer 0/1; nil -> null; sequence table -> array; map-like
/// table -> flat [k, v, ...] array; {err=...} -> error; {ok=...} -> simple.
fn lua_to_frame(value: Value) -> Frame {
    match value {
        Value::Nil => Frame::Null,
        Value::Boolean(b) => Frame::Integer(i64::from(b)),
        Value::Integer(i) => Frame::Integer(i),
        Value::Number(n) => {
            if n == n.trunc() && n.abs() < 9e18 {
                Frame::Integer(n as i64)
            } else {
                Frame::bulk(n.to_string())
            }
        }
        Value::String(s) => Frame::Bulk(Bytes::copy_from_slice(&s.as_bytes())),
        Value::Table(t) => {
            // Sequence part first
            let mut frames = Vec::new();
            let mut idx = 1i64;
            while let Ok(v) = t.get::<Value>(idx) {
                if matches!(v, Value::Nil) {
                    break;
                }
                frames.push(lua_to_frame(v));
                idx += 1;
            }
            if !frames.is_empty() {
                return Frame::Array(frames);
            }

            // {err = "..."} / {ok = "..."} conventions
            if let Ok(err) = t.get::<String>("err") {
                return Frame::Error(format!("ERR {err}"));
            }
            if let Ok(ok) = t.get::<String>("ok") {
                return Frame::Simple(ok);
            }

            // Map-like table flattens to key/value pairs
            let mut pairs = Vec::new();
            for entry in t.pairs::<Value, Value>() {
                let Ok((k, v)) = entry else { break };
                pairs.push(lua_to_frame(k));
                pairs.push(lua_to_frame(v));
            }
            Frame::Array(pairs)
        }
        _ => Frame::Null,
    }
}

/// Convert a Lua value to JSON for the json.encode helper.
fn lua_value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Nil => serde_json::Value::Null,
        Value::Boolean(b) => serde_json::Value::Bool(*b),
        Value::Integer(i) => serde_json::Value::from(*i),
        Value::Number(n) => serde_json::Number::from_f64(*n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::String(s) => serde_json::Value::String(s.to_string_lossy().to_string()),
        Value::Table(t) => {
            // A table with a sequence part encodes as an array
            let len = t.raw_len();
            if len > 0 {
                let mut arr = Vec::with_capacity(len);
                for i in 1..=len {
                    if let Ok(v) = t.get::<Value>(i as i64) {
                        arr.push(lua_value_to_json(&v));
                    }
                }
                serde_json::Value::Array(arr)
            } else {
                let mut map = serde_json::Map::new();
                for entry in t.clone().pairs::<String, Value>() {
                    if let Ok((k, v)) = entry {
                        map.insert(k, lua_value_to_json(&v));
                    }
                }
                serde_json::Value::Object(map)
            }
        }
        _ => serde_json::Value::Null,
    }
}

/// Convert a JSON value into a Lua value for the json.decode helper.
fn json_to_lua(lua: &Lua, value: &serde_json::Value) -> mlua::Result<Value> {
    Ok(match value {
        serde_json::Value::Null => Value::Nil,
        serde_json::Value::Bool(b) => Value::Boolean(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Integer(i)
            } else {
                Value::Number(n.as_f64().unwrap_or(0.0))
            }
        }
        serde_json::Value::String(s) => Value::String(lua.create_string(s)?),
        serde_json::Value::Array(arr) => {
            let table = lua.create_table()?;
            for (i, v) in arr.iter().enumerate() {
                table.set(i + 1, json_to_lua(lua, v)?)?;
            }
            Value::Table(table)
        }
        serde_json::Value::Object(map) => {
            let table = lua.create_table()?;
            for (k, v) in map {
                table.set(k.as_str(), json_to_lua(lua, v)?)?;
            }
            Value::Table(table)
        }
    })
}

/// Collect trailing numeric values from a Lua sequence table.
fn table_to_f64s(table: &mlua::Table) -> Vec<f64> {
    let mut values = Vec::new();
    let mut idx = 1i64;
    while let Ok(v) = table.get::<Value>(idx) {
        match v {
            Value::Nil => break,
            Value::Integer(i) => values.push(i as f64),
            Value::Number(n) => values.push(n),
            _ => {}
        }
        idx += 1;
    }
    values
}

/// Install KEYS/ARGV and the callback tables into a fresh Lua state.
fn install_env(lua: &Lua, db: &Arc<Db>, keys: &[Bytes], argv: &[Bytes]) -> mlua::Result<()> {
    let globals = lua.globals();

    let keys_table = lua.create_table()?;
    for (i, key) in keys.iter().enumerate() {
        keys_table.set(i + 1, String::from_utf8_lossy(key).into_owned())?;
    }
    globals.set("KEYS", keys_table)?;

    let argv_table = lua.create_table()?;
    for (i, arg) in argv.iter().enumerate() {
        argv_table.set(i + 1, String::from_utf8_lossy(arg).into_owned())?;
    }
    globals.set("ARGV", argv_table)?;

    // fiscus.* keyspace callbacks
    let fiscus = lua.create_table()?;

    let db_get = db.clone();
    fiscus.set(
        "get",
        lua.create_function(move |lua, key: String| {
            match db_get.get_string(&Key::from(key.as_str())) {
                Ok(Some(value)) => Ok(Value::String(lua.create_string(&value)?)),
                _ => Ok(Value::Nil),
            }
        })?,
    )?;

    let db_set = db.clone();
    fiscus.set(
        "set",
        lua.create_function(move |_, (key, value): (String, Value)| {
            let payload = match value {
                Value::String(s) => Bytes::copy_from_slice(&s.as_bytes()),
                Value::Integer(i) => Bytes::from(i.to_string()),
                Value::Number(n) => Bytes::from(n.to_string()),
                Value::Boolean(b) => Bytes::from(if b { "1" } else { "0" }),
                _ => return Err(mlua::Error::RuntimeError("unsupported value".into())),
            };
            db_set.set(Key::from(key.as_str()), crate::types::FiscusValue::String(payload));
            Ok("OK")
        })?,
    )?;

    let db_del = db.clone();
    fiscus.set(
        "del",
        lua.create_function(move |_, key: String| {
            Ok(i64::from(db_del.delete(&Key::from(key.as_str()))))
        })?,
    )?;

    let db_exists = db.clone();
    fiscus.set(
        "exists",
        lua.create_function(move |_, key: String| {
            Ok(i64::from(db_exists.exists(&Key::from(key.as_str()))))
        })?,
    )?;

    let db_zadd = db.clone();
    fiscus.set(
        "zadd",
        lua.create_function(move |_, (key, score, member): (String, f64, String)| {
            let value = db_zadd
                .get_or_create(&Key::from(key.as_str()), ValueType::ZSet)
                .map_err(|e| mlua::Error::RuntimeError(e.to_string()))?;
            let zset = value.as_zset().expect("created as zset");
            let added = zset.write().add(Bytes::from(member), score);
            Ok(i64::from(added))
        })?,
    )?;

    let db_zscore = db.clone();
    fiscus.set(
        "zscore",
        lua.create_function(move |_, (key, member): (String, String)| {
            let value = db_zscore
                .get_typed(&Key::from(key.as_str()), ValueType::ZSet)
                .map_err(|e| mlua::Error::RuntimeError(e.to_string()))?;
            Ok(value
                .and_then(|v| v.as_zset().and_then(|z| z.read().score(member.as_bytes()))))
        })?,
    )?;

    let db_zrange = db.clone();
    fiscus.set(
        "zrange",
        lua.create_function(move |lua, (key, start, stop): (String, i64, i64)| {
            let value = db_zrange
                .get_typed(&Key::from(key.as_str()), ValueType::ZSet)
                .map_err(|e| mlua::Error::RuntimeError(e.to_string()))?;
            let table = lua.create_table()?;
            if let Some(zset) = value.as_ref().and_then(|v| v.as_zset()) {
                for (i, entry) in zset.read().range(start, stop).into_iter().enumerate() {
                    table.set(i + 1, String::from_utf8_lossy(&entry.member).into_owned())?;
                }
            }
            Ok(table)
        })?,
    )?;

    let db_zrevrange = db.clone();
    fiscus.set(
        "zrevrange",
        lua.create_function(move |lua, (key, start, stop): (String, i64, i64)| {
            let value = db_zrevrange
                .get_typed(&Key::from(key.as_str()), ValueType::ZSet)
                .map_err(|e| mlua::Error::RuntimeError(e.to_string()))?;
            let table = lua.create_table()?;
            if let Some(zset) = value.as_ref().and_then(|v| v.as_zset()) {
                for (i, entry) in zset.read().rev_range(start, stop).into_iter().enumerate() {
                    table.set(i + 1, String::from_utf8_lossy(&entry.member).into_owned())?;
                }
            }
            Ok(table)
        })?,
    )?;

    let db_publish = db.clone();
    fiscus.set(
        "publish",
        lua.create_function(move |_, (channel, message): (String, String)| {
            Ok(db_publish
                .pubsub()
                .publish(Bytes::from(channel), Bytes::from(message)) as i64)
        })?,
    )?;

    globals.set("fiscus", fiscus)?;

    // math.round on top of the stock math library
    let math: mlua::Table = globals.get("math")?;
    math.set(
        "round",
        lua.create_function(|_, n: f64| Ok((n + 0.5).floor()))?,
    )?;

    // time.now
    let time = lua.create_table()?;
    time.set(
        "now",
        lua.create_function(|_, ()| Ok(current_timestamp_ms() / 1000))?,
    )?;
    globals.set("time", time)?;

    // json.encode / json.decode
    let json = lua.create_table()?;
    json.set(
        "encode",
        lua.create_function(|_, value: Value| Ok(lua_value_to_json(&value).to_string()))?,
    )?;
    json.set(
        "decode",
        lua.create_function(|lua, text: String| {
            let value: serde_json::Value = serde_json::from_str(&text)
                .map_err(|e| mlua::Error::RuntimeError(format!("invalid json: {e}")))?;
            json_to_lua(lua, &value)
        })?,
    )?;
    globals.set("json", json)?;

    // finance helpers
    let finance = lua.create_table()?;
    finance.set(
        "moving_average",
        lua.create_function(|_, (table, period): (mlua::Table, usize)| {
            let values = table_to_f64s(&table);
            if period == 0 || values.len() < period {
                return Ok(Value::Nil);
            }
            let sum: f64 = values[values.len() - period..].iter().sum();
            Ok(Value::Number(sum / period as f64))
        })?,
    )?;
    finance.set(
        "volatility",
        lua.create_function(|_, (table, period): (mlua::Table, usize)| {
            let values = table_to_f64s(&table);
            if period == 0 || values.len() < period {
                return Ok(Value::Nil);
            }
            let window = &values[values.len() - period..];
            let mean: f64 = window.iter().sum::<f64>() / period as f64;
            let variance: f64 =
                window.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / period as f64;
            Ok(Value::Number(variance.sqrt()))
        })?,
    )?;
    finance.set(
        "price_change",
        lua.create_function(|_, (old, new): (f64, f64)| {
            if old == 0.0 {
                return Ok(0.0);
            }
            Ok((new - old) / old * 100.0)
        })?,
    )?;
    globals.set("finance", finance)?;

    Ok(())
}

/// Execute a script source with the given keys and arguments.
fn execute_script(db: &Arc<Db>, script: &str, keys: &[Bytes], argv: &[Bytes]) -> Result<Frame> {
    // One script at a time against the keyspace
    let _eval_guard = EVAL_LOCK.lock();

    let lua = Lua::new_with(
        StdLib::STRING | StdLib::TABLE | StdLib::MATH,
        LuaOptions::default(),
    )
    .map_err(|e| CommandError::ScriptError(e.to_string()))?;

    install_env(&lua, db, keys, argv)
        .map_err(|e| CommandError::ScriptError(e.to_string()))?;

    // Instruction budget
    let spent = Arc::new(AtomicU64::new(0));
    let counter = spent.clone();
    lua.set_hook(
        HookTriggers::new().every_nth_instruction(HOOK_EVERY),
        move |_, _| {
            if counter.fetch_add(u64::from(HOOK_EVERY), Ordering::Relaxed) >= INSTRUCTION_BUDGET {
                Err(mlua::Error::RuntimeError(
                    "script exceeded instruction budget".into(),
                ))
            } else {
                Ok(VmState::Continue)
            }
        },
    );

    let result = lua
        .load(script)
        .eval::<MultiValue>()
        .map_err(|e| CommandError::ScriptError(e.to_string()))?;

    Ok(match result.into_iter().next() {
        Some(value) => lua_to_frame(value),
        None => Frame::Null,
    })
}

/// EVAL script numkeys [key ...] [arg ...]
pub fn cmd_eval(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let script = cmd.get_str(0)?.to_string();
        let (keys, argv) = split_keys_argv(&cmd)?;

        // EVAL also populates the cache, so a later EVALSHA hits
        let sha = sha1_hash(&script);
        SCRIPT_CACHE
            .write()
            .expect("script cache poisoned")
            .insert(sha, script.clone());

        execute_script(&db, &script, &keys, &argv)
    })
}

/// EVALSHA digest numkeys [key ...] [arg ...]
pub fn cmd_evalsha(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let sha = cmd.get_str(0)?.to_lowercase();
        let (keys, argv) = split_keys_argv(&cmd)?;

        let script = SCRIPT_CACHE
            .read()
            .expect("script cache poisoned")
            .get(&sha)
            .cloned();

        match script {
            Some(script) => execute_script(&db, &script, &keys, &argv),
            None => Err(CommandError::NoScript(sha).into()),
        }
    })
}

/// SCRIPT LOAD source | EXISTS digest [digest ...] | FLUSH
pub fn cmd_script(
    cmd: ParsedCommand,
    _db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let subcommand = cmd.get_str(0)?.to_uppercase();

        match subcommand.as_str() {
            "LOAD" => {
                cmd.require_args(2)?;
                let script = cmd.get_str(1)?;
                let sha = sha1_hash(script);
                SCRIPT_CACHE
                    .write()
                    .expect("script cache poisoned")
                    .insert(sha.clone(), script.to_string());
                Ok(Frame::bulk(sha))
            }
            "EXISTS" => {
                let cache = SCRIPT_CACHE.read().expect("script cache poisoned");
                let results: Vec<Frame> = cmd.args[1..]
                    .iter()
                    .map(|arg| {
                        let sha = std::str::from_utf8(arg).unwrap_or("").to_lowercase();
                        Frame::Integer(i64::from(cache.contains_key(&sha)))
                    })
                    .collect();
                Ok(Frame::Array(results))
            }
            "FLUSH" => {
                SCRIPT_CACHE
                    .write()
                    .expect("script cache poisoned")
                    .clear();
                Ok(Frame::ok())
            }
            _ => Err(CommandError::SyntaxError.into()),
        }
    })
}

fn split_keys_argv(cmd: &ParsedCommand) -> Result<(Vec<Bytes>, Vec<Bytes>)> {
    let numkeys = cmd.get_i64(1)?;
    let numkeys = usize::try_from(numkeys).map_err(|_| CommandError::NotInteger)?;

    if cmd.args.len() < 2 + numkeys {
        return Err(CommandError::WrongArity {
            command: cmd.name.clone(),
        }
        .into());
    }

    let keys = cmd.args[2..2 + numkeys].to_vec();
    let argv = cmd.args[2 + numkeys..].to_vec();
    Ok((keys, argv))
}

/// Volume-weighted average price over KEYS' price/volume counters.
const SCRIPT_VWAP: &str = r#"
local total_volume = 0
local total_value = 0

for i = 1, #KEYS do
    local price = tonumber(fiscus.get(KEYS[i] .. ":price")) or 0
    local volume = tonumber(fiscus.get(KEYS[i] .. ":volume")) or 0

    total_value = total_value + (price * volume)
    total_volume = total_volume + volume
end

if total_volume > 0 then
    return total_value / total_volume
else
    return 0
end
"#;

/// Velocity-based risk score over per-user counters.
const SCRIPT_FRAUD_DETECTION: &str = r#"
local user_id = ARGV[1]
local amount = tonumber(ARGV[2])

local txn_count = tonumber(fiscus.get(user_id .. ":txn_count:1h")) or 0
local total_amount = tonumber(fiscus.get(user_id .. ":total_amount:1h")) or 0
local fraud_score = tonumber(fiscus.get(user_id .. ":fraud_score")) or 0

local velocity_risk = 0
if txn_count > 10 then
    velocity_risk = (txn_count - 10) * 0.1
end

local amount_risk = 0
if amount > 1000 then
    amount_risk = (amount - 1000) * 0.001
end

local new_fraud_score = fraud_score + velocity_risk + amount_risk

fiscus.set(user_id .. ":txn_count:1h", txn_count + 1)
fiscus.set(user_id .. ":total_amount:1h", total_amount + amount)
fiscus.set(user_id .. ":fraud_score", new_fraud_score)

if new_fraud_score > 0.8 then
    return "HIGH_RISK"
elseif new_fraud_score > 0.5 then
    return "MEDIUM_RISK"
else
    return "LOW_RISK"
end
"#;

/// Crossed-order scan against a stored book.
const SCRIPT_ORDER_MATCHING: &str = r#"
local symbol = ARGV[1]
local side = ARGV[2]
local price = tonumber(ARGV[3])

local orderbook_key = "orderbook:" .. symbol
local matched = {}

if side == "BUY" then
    local asks = fiscus.zrange(orderbook_key, 0, -1)
    for i, ask in ipairs(asks) do
        local ask_price = tonumber(fiscus.zscore(orderbook_key, ask))
        if ask_price ~= nil and ask_price < 0 and -ask_price <= price then
            table.insert(matched, ask)
        end
    end
else
    local bids = fiscus.zrevrange(orderbook_key, 0, -1)
    for i, bid in ipairs(bids) do
        local bid_price = tonumber(fiscus.zscore(orderbook_key, bid))
        if bid_price ~= nil and bid_price >= price then
            table.insert(matched, bid)
        end
    end
end

return matched
"#;

/// Mark-to-market portfolio valuation from position quantities.
const SCRIPT_PORTFOLIO_VALUE: &str = r#"
local portfolio_id = ARGV[1]
local total_value = 0

local positions = fiscus.zrange(portfolio_id .. ":positions", 0, -1)

for i, position in ipairs(positions) do
    local quantity = tonumber(fiscus.zscore(portfolio_id .. ":positions", position)) or 0
    local current_price = tonumber(fiscus.get("price:" .. position)) or 0

    total_value = total_value + (quantity * current_price)
end

return total_value
"#;

/// Load the stock financial scripts into the cache at startup.
///
/// Returns (name, digest) pairs so callers can log or EVALSHA them.
pub fn preload_financial_scripts() -> Vec<(&'static str, String)> {
    let scripts = [
        ("calculate_vwap", SCRIPT_VWAP),
        ("fraud_detection", SCRIPT_FRAUD_DETECTION),
        ("order_matching", SCRIPT_ORDER_MATCHING),
        ("portfolio_value", SCRIPT_PORTFOLIO_VALUE),
    ];

    let mut cache = SCRIPT_CACHE.write().expect("script cache poisoned");
    scripts
        .iter()
        .map(|(name, source)| {
            let sha = sha1_hash(source);
            cache.insert(sha.clone(), source.to_string());
            info!(script = name, digest = %sha, "financial script preloaded");
            (*name, sha)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::cluster::ClusterManager;
    use crate::server::pubsub::PubSubHub;
    use crate::storage::MemoryManager;
    use crate::types::FiscusValue;

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
    async fn test_eval_return_conversions() {
        let db = test_db();

        let reply = cmd_eval(cmd("EVAL", &["return 'hello'", "0"]), db.clone(), client())
            .await
            .unwrap();
        assert_eq!(reply, Frame::bulk("hello"));

        let reply = cmd_eval(cmd("EVAL", &["return 42", "0"]), db.clone(), client())
            .await
            .unwrap();
        assert_eq!(reply, Frame::Integer(42));

        let reply = cmd_eval(cmd("EVAL", &["return 1.5", "0"]), db.clone(), client())
            .await
            .unwrap();
        assert_eq!(reply, Frame::bulk("1.5"));

        let reply = cmd_eval(cmd("EVAL", &["return true", "0"]), db.clone(), client())
            .await
            .unwrap();
        assert_eq!(reply, Frame::Integer(1));

        let reply = cmd_eval(cmd("EVAL", &["return false", "0"]), db.clone(), client())
            .await
            .unwrap();
        assert_eq!(reply, Frame::Integer(0));

        let reply = cmd_eval(cmd("EVAL", &["return nil", "0"]), db.clone(), client())
            .await
            .unwrap();
        assert_eq!(reply, Frame::Null);

        let reply = cmd_eval(cmd("EVAL", &["return {1, 2, 3}", "0"]), db, client())
            .await
            .unwrap();
        assert_eq!(
            reply,
            Frame::Array(vec![
                Frame::Integer(1),
                Frame::Integer(2),
                Frame::Integer(3)
            ])
        );
    }

    #[tokio::test]
    async fn test_keys_argv_visible() {
        let reply = cmd_eval(
            cmd("EVAL", &["return KEYS[1] .. ':' .. ARGV[1]", "1", "k1", "a1"]),
            test_db(),
            client(),
        )
        .await
        .unwrap();
        assert_eq!(reply, Frame::bulk("k1:a1"));
    }

    #[tokio::test]
    async fn test_callbacks_into_keyspace() {
        let db = test_db();
        db.set(Key::from("price:AAPL"), FiscusValue::string("150.25"));

        let reply = cmd_eval(
            cmd(
                "EVAL",
                &["return tonumber(fiscus.get('price:AAPL')) * 2", "0"],
            ),
            db.clone(),
            client(),
        )
        .await
        .unwrap();
        assert_eq!(reply, Frame::bulk("300.5"));

        cmd_eval(
            cmd("EVAL", &["fiscus.set('out', 'written') return 1", "0"]),
            db.clone(),
            client(),
        )
        .await
        .unwrap();
        assert_eq!(
            db.get_string(&Key::from("out")).unwrap().unwrap(),
            Bytes::from("written")
        );
    }

    #[tokio::test]
    async fn test_zset_callbacks() {
        let db = test_db();
        let script = r#"
            fiscus.zadd('lb', 10, 'alice')
            fiscus.zadd('lb', 20, 'bob')
            return fiscus.zrevrange('lb', 0, -1)
        "#;
        let reply = cmd_eval(cmd("EVAL", &[script, "0"]), db, client())
            .await
            .unwrap();
        assert_eq!(
            reply,
            Frame::Array(vec![Frame::bulk("bob"), Frame::bulk("alice")])
        );
    }

    #[tokio::test]
    async fn test_publish_callback() {
        let db = test_db();
        let _rx = db.pubsub().subscribe(Bytes::from("alerts"));

        let reply = cmd_eval(
            cmd("EVAL", &["return fiscus.publish('alerts', 'risk')", "0"]),
            db,
            client(),
        )
        .await
        .unwrap();
        assert_eq!(reply, Frame::Integer(1));
    }

    #[tokio::test]
    async fn test_script_error_surfaces() {
        let result = cmd_eval(cmd("EVAL", &["this is not lua", "0"]), test_db(), client()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_instruction_budget_enforced() {
        let result = cmd_eval(
            cmd("EVAL", &["while true do end", "0"]),
            test_db(),
            client(),
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_sandbox_has_no_os_or_io() {
        let reply = cmd_eval(
            cmd("EVAL", &["return os == nil and io == nil", "0"]),
            test_db(),
            client(),
        )
        .await
        .unwrap();
        assert_eq!(reply, Frame::Integer(1));
    }

    #[tokio::test]
    async fn test_evalsha_roundtrip() {
        let db = test_db();
        let reply = cmd_script(
            cmd("SCRIPT", &["LOAD", "return 7"]),
            db.clone(),
            client(),
        )
        .await
        .unwrap();
        let sha = reply.as_str().unwrap().to_string();

        let reply = cmd_evalsha(cmd("EVALSHA", &[&sha, "0"]), db.clone(), client())
            .await
            .unwrap();
        assert_eq!(reply, Frame::Integer(7));

        let reply = cmd_script(
            cmd("SCRIPT", &["EXISTS", &sha, "0000000000000000000000000000000000000000"]),
            db.clone(),
            client(),
        )
        .await
        .unwrap();
        assert_eq!(
            reply,
            Frame::Array(vec![Frame::Integer(1), Frame::Integer(0)])
        );

        let missing = cmd_evalsha(
            cmd("EVALSHA", &["ffffffffffffffffffffffffffffffffffffffff", "0"]),
            db,
            client(),
        )
        .await;
        assert!(missing.is_err());
    }

    #[tokio::test]
    async fn test_helper_tables() {
        let db = test_db();

        let reply = cmd_eval(
            cmd("EVAL", &["return math.round(2.6)", "0"]),
            db.clone(),
            client(),
        )
        .await
        .unwrap();
        assert_eq!(reply, Frame::Integer(3));

        let reply = cmd_eval(
            cmd(
                "EVAL",
                &["return finance.moving_average({1, 2, 3, 4}, 2)", "0"],
            ),
            db.clone(),
            client(),
        )
        .await
        .unwrap();
        assert_eq!(reply, Frame::bulk("3.5"));

        let reply = cmd_eval(
            cmd("EVAL", &["return finance.price_change(100, 110)", "0"]),
            db.clone(),
            client(),
        )
        .await
        .unwrap();
        assert_eq!(reply, Frame::Integer(10));

        let reply = cmd_eval(
            cmd(
                "EVAL",
                &["local t = json.decode('{\"a\": 5}') return t.a", "0"],
            ),
            db,
            client(),
        )
        .await
        .unwrap();
        assert_eq!(reply, Frame::Integer(5));
    }

    #[tokio::test]
    async fn test_preloaded_fraud_script() {
        let db = test_db();
        let scripts = preload_financial_scripts();
        let fraud_sha = scripts
            .iter()
            .find(|(name, _)| *name == "fraud_detection")
            .map(|(_, sha)| sha.clone())
            .unwrap();

        let reply = cmd_evalsha(
            cmd("EVALSHA", &[&fraud_sha, "0", "user:1", "50"]),
            db.clone(),
            client(),
        )
        .await
        .unwrap();
        assert_eq!(reply, Frame::bulk("LOW_RISK"));
        assert!(db.exists(&Key::from("user:1:txn_count:1h")));
    }

    #[tokio::test]
    async fn test_preloaded_vwap_script() {
        let db = test_db();
        let scripts = preload_financial_scripts();
        let vwap_sha = scripts
            .iter()
            .find(|(name, _)| *name == "calculate_vwap")
            .map(|(_, sha)| sha.clone())
            .unwrap();

        db.set(Key::from("AAPL:price"), FiscusValue::string("100"));
        db.set(Key::from("AAPL:volume"), FiscusValue::string("10"));
        db.set(Key::from("MSFT:price"), FiscusValue::string("200"));
        db.set(Key::from("MSFT:volume"), FiscusValue::string("30"));

        let reply = cmd_evalsha(
            cmd("EVALSHA", &[&vwap_sha, "2", "AAPL", "MSFT"]),
            db,
            client(),
        )
        .await
        .unwrap();
        // (100*10 + 200*30) / 40 = 175
        assert_eq!(reply, Frame::Integer(175));
    }
}
