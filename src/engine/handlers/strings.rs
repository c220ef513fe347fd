use std::sync::Arc;

use crate::engine::command::Command;
use crate::engine::handlers::{not_enough_args, parse_int, parse_str, reject_sub_mode};
use crate::engine::Engine;
use crate::error::ServerError;
use crate::resp::Value;

/// Parses the optional `EX seconds` / `PX millis` tail of SET, returning a
/// TTL in milliseconds.
fn parse_expiry(args: &[Value]) -> Result<Option<u64>, ServerError> {
    if args.is_empty() {
        return Ok(None);
    }
    if args.len() < 2 {
        return Err(ServerError::InvalidArguments(
            "missing TTL duration".to_string(),
        ));
    }

    let modifier = parse_str(&args[0])?;
    let ttl = parse_int(&args[1])?;
    if ttl < 0 {
        return Err(ServerError::InvalidArguments(
            "TTL must not be negative".to_string(),
        ));
    }

    match modifier.to_lowercase().as_str() {
        "ex" => Ok(Some(ttl as u64 * 1000)),
        "px" => Ok(Some(ttl as u64)),
        other => Err(ServerError::InvalidArguments(format!(
            "unknown TTL modifier: {other}"
        ))),
    }
}

impl Engine {
    pub(crate) fn cmd_set(&mut self, cmd: &Arc<Command>) -> Result<(), ServerError> {
        reject_sub_mode(cmd)?;
        let args = &cmd.frame.args;
        if args.len() < 2 {
            return Err(not_enough_args());
        }
        self.check_replica_write(cmd)?;

        let key = parse_str(&args[0])?.to_string();
        let value = args[1].clone();
        let ttl = parse_expiry(&args[2..])?;

        if self.check_in_tx(cmd) {
            cmd.set_done();
            return Ok(());
        }

        self.db_mut(cmd.db()).hm.set(&key, value, ttl);
        if self.should_write_output(cmd) {
            cmd.write_value(&Value::ok());
        }
        cmd.set_done();
        Ok(())
    }

    pub(crate) fn cmd_get(&mut self, cmd: &Arc<Command>) -> Result<(), ServerError> {
        reject_sub_mode(cmd)?;
        let args = &cmd.frame.args;
        if args.is_empty() {
            return Err(not_enough_args());
        }
        if self.check_in_tx(cmd) {
            cmd.set_done();
            return Ok(());
        }

        let key = parse_str(&args[0])?.to_string();
        let reply = match self.db_mut(cmd.db()).hm.get(&key) {
            Some(value) => value.clone(),
            None => Value::NullBulk,
        };
        cmd.write_value(&reply);
        cmd.set_done();
        Ok(())
    }

    /// INCR parses the stored value as an integer, adds one, and stores it
    /// back as a bulk string; a missing key starts from zero.
    pub(crate) fn cmd_incr(&mut self, cmd: &Arc<Command>) -> Result<(), ServerError> {
        reject_sub_mode(cmd)?;
        let args = &cmd.frame.args;
        if args.len() != 1 {
            return Err(ServerError::InvalidArguments(
                "requires exactly 1 argument".to_string(),
            ));
        }
        self.check_replica_write(cmd)?;

        let key = parse_str(&args[0])?.to_string();
        if self.check_in_tx(cmd) {
            cmd.set_done();
            return Ok(());
        }

        let db = self.db_mut(cmd.db());
        let next = match db.hm.get(&key) {
            None => 1,
            Some(value) => match value.as_str() {
                Some(s) => s.parse::<i64>().map_err(|_| ServerError::TypeMismatch)? + 1,
                None => return Err(ServerError::TypeMismatch),
            },
        };
        db.hm.update(&key, Value::bulk(next.to_string()));

        if self.should_write_output(cmd) {
            cmd.write_value(&Value::Integer(next));
        }
        cmd.set_done();
        Ok(())
    }
}
