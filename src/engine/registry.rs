use std::sync::Arc;

use crate::engine::command::Command;
use crate::engine::Engine;
use crate::error::ServerError;

/// A command handler: runs synchronously against the engine's state and
/// fills the command's reply buffer. Handlers never perform I/O.
pub type Handler = fn(&mut Engine, &Arc<Command>) -> Result<(), ServerError>;

/// Resolves a command name (case-insensitively) to its handler and its
/// should-replicate flag.
pub fn route(name: &str) -> Option<(Handler, bool)> {
    let lowered = name.to_ascii_lowercase();
    let entry: (Handler, bool) = match lowered.as_str() {
        "ping" => (Engine::cmd_ping, false),
        "echo" => (Engine::cmd_echo, false),
        "select" => (Engine::cmd_select, false),
        "quit" => (Engine::cmd_quit, false),
        "info" => (Engine::cmd_info, false),
        "set" => (Engine::cmd_set, true),
        "get" => (Engine::cmd_get, false),
        "incr" => (Engine::cmd_incr, true),
        "rpush" => (Engine::cmd_rpush, true),
        "lpush" => (Engine::cmd_lpush, true),
        "lpop" => (Engine::cmd_lpop, true),
        "rpop" => (Engine::cmd_rpop, true),
        "lrange" => (Engine::cmd_lrange, false),
        "llen" => (Engine::cmd_llen, false),
        "lindex" => (Engine::cmd_lindex, false),
        "blpop" => (Engine::cmd_blpop, false),
        "multi" => (Engine::cmd_multi, true),
        "exec" => (Engine::cmd_exec, true),
        "discard" => (Engine::cmd_discard, true),
        "replconf" => (Engine::cmd_replconf, false),
        "psync" => (Engine::cmd_psync, false),
        "wait" => (Engine::cmd_wait, false),
        "subscribe" => (Engine::cmd_subscribe, false),
        "unsubscribe" => (Engine::cmd_unsubscribe, false),
        "publish" => (Engine::cmd_publish, true),
        "zadd" => (Engine::cmd_zadd, true),
        "zrem" => (Engine::cmd_zrem, true),
        "zscore" => (Engine::cmd_zscore, false),
        "zcard" => (Engine::cmd_zcard, false),
        "zrange" => (Engine::cmd_zrange, false),
        "zrank" => (Engine::cmd_zrank, false),
        "geoadd" => (Engine::cmd_geoadd, true),
        "geopos" => (Engine::cmd_geopos, false),
        "geodist" => (Engine::cmd_geodist, false),
        "geosearch" => (Engine::cmd_geosearch, false),
        "sadd" => (Engine::cmd_sadd, true),
        "srem" => (Engine::cmd_srem, true),
        "smembers" => (Engine::cmd_smembers, false),
        "scard" => (Engine::cmd_scard, false),
        "sismember" => (Engine::cmd_sismember, false),
        _ => return None,
    };
    Some(entry)
}
