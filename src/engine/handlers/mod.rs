//! Command handlers, grouped by family. Every handler runs synchronously
//! on the core task: it validates arguments, mutates the selected
//! database, and fills the command's reply buffer. Socket work (fan-out,
//! pub/sub delivery, RDB pushes) stays in the core loop and the reactors.

pub mod geo;
pub mod lists;
pub mod pubsub_cmds;
pub mod repl_cmds;
pub mod server_cmds;
pub mod sets;
pub mod sorted_sets;
pub mod strings;
pub mod tx;

use std::sync::Arc;

use crate::engine::command::Command;
use crate::error::ServerError;
use crate::resp::Value;

pub(crate) fn not_enough_args() -> ServerError {
    ServerError::InvalidArguments("not enough arguments".to_string())
}

pub(crate) fn sub_mode_err(cmd: &Arc<Command>) -> ServerError {
    ServerError::SubscribeMode(cmd.frame.name.to_ascii_lowercase())
}

/// Rejects any command issued in subscribe mode other than the pub/sub
/// control set.
pub(crate) fn reject_sub_mode(cmd: &Arc<Command>) -> Result<(), ServerError> {
    if cmd.conn.is_subscribe() {
        return Err(sub_mode_err(cmd));
    }
    Ok(())
}

/// String arguments arrive as bulk strings, or as simple strings when the
/// command came in inline form.
pub(crate) fn parse_str(arg: &Value) -> Result<&str, ServerError> {
    arg.as_str().ok_or_else(|| {
        ServerError::InvalidArguments("expected a string argument".to_string())
    })
}

pub(crate) fn parse_int(arg: &Value) -> Result<i64, ServerError> {
    let s = parse_str(arg)?;
    s.parse::<i64>()
        .map_err(|_| ServerError::InvalidArguments(format!("invalid integer value: {s}")))
}

pub(crate) fn parse_float(arg: &Value) -> Result<f64, ServerError> {
    let s = parse_str(arg)?;
    s.parse::<f64>()
        .map_err(|_| ServerError::InvalidArguments(format!("invalid float value: {s}")))
}
