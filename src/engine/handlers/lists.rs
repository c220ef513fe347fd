use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::engine::command::Command;
use crate::engine::db::Database;
use crate::engine::handlers::{not_enough_args, parse_float, parse_int, parse_str, reject_sub_mode};
use crate::engine::Engine;
use crate::error::ServerError;
use crate::resp::Value;

#[derive(Clone, Copy)]
enum End {
    Left,
    Right,
}

impl Engine {
    pub(crate) fn cmd_rpush(&mut self, cmd: &Arc<Command>) -> Result<(), ServerError> {
        self.push(cmd, End::Right)
    }

    pub(crate) fn cmd_lpush(&mut self, cmd: &Arc<Command>) -> Result<(), ServerError> {
        self.push(cmd, End::Left)
    }

    fn push(&mut self, cmd: &Arc<Command>, end: End) -> Result<(), ServerError> {
        reject_sub_mode(cmd)?;
        let args = &cmd.frame.args;
        if args.len() < 2 {
            return Err(not_enough_args());
        }
        self.check_replica_write(cmd)?;

        let key = parse_str(&args[0])?.to_string();
        if self.check_in_tx(cmd) {
            cmd.set_done();
            return Ok(());
        }

        let write_output = self.should_write_output(cmd);
        let db = self.db_mut(cmd.db());
        let list = db.get_or_create_list(&key);
        for value in &args[1..] {
            match end {
                End::Left => list.push_left(value.clone()),
                End::Right => list.push_right(value.clone()),
            }
        }
        let len = list.len();
        if write_output {
            cmd.write_value(&Value::Integer(len as i64));
        }
        cmd.set_done();

        // A push may satisfy parked BLPOPs on this key, oldest first.
        if let Some(mut waiters) = db.blocked_pop.remove(&key) {
            waiters.retain(|waiter| !resolve_blocked_pop(db, &key, waiter));
            if !waiters.is_empty() {
                db.blocked_pop.insert(key, waiters);
            }
        }
        Ok(())
    }

    pub(crate) fn cmd_lpop(&mut self, cmd: &Arc<Command>) -> Result<(), ServerError> {
        self.pop(cmd, End::Left)
    }

    pub(crate) fn cmd_rpop(&mut self, cmd: &Arc<Command>) -> Result<(), ServerError> {
        self.pop(cmd, End::Right)
    }

    fn pop(&mut self, cmd: &Arc<Command>, end: End) -> Result<(), ServerError> {
        reject_sub_mode(cmd)?;
        let args = &cmd.frame.args;
        if args.is_empty() {
            return Err(not_enough_args());
        }
        self.check_replica_write(cmd)?;

        let key = parse_str(&args[0])?.to_string();
        let count = match args.get(1) {
            Some(arg) => {
                let n = parse_int(arg)?;
                if n < 0 {
                    return Err(ServerError::InvalidArguments(
                        "count must not be negative".to_string(),
                    ));
                }
                Some(n as usize)
            }
            None => None,
        };

        if self.check_in_tx(cmd) {
            cmd.set_done();
            return Ok(());
        }

        let write_output = self.should_write_output(cmd);
        let db = self.db_mut(cmd.db());
        let Some(list) = db.get_list_mut(&key) else {
            if write_output {
                cmd.write_value(&Value::NullBulk);
            }
            cmd.set_done();
            return Ok(());
        };

        let reply = match count {
            Some(count) => {
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    let popped = match end {
                        End::Left => list.pop_left(),
                        End::Right => list.pop_right(),
                    };
                    match popped {
                        Some(value) => items.push(value),
                        None => break,
                    }
                }
                Value::Array(items)
            }
            None => {
                let popped = match end {
                    End::Left => list.pop_left(),
                    End::Right => list.pop_right(),
                };
                match popped {
                    Some(value) => value,
                    None => Value::NullBulk,
                }
            }
        };
        db.remove_list_if_empty(&key);

        if write_output {
            cmd.write_value(&reply);
        }
        cmd.set_done();
        Ok(())
    }

    pub(crate) fn cmd_lrange(&mut self, cmd: &Arc<Command>) -> Result<(), ServerError> {
        reject_sub_mode(cmd)?;
        let args = &cmd.frame.args;
        if args.len() < 3 {
            return Err(not_enough_args());
        }
        if self.check_in_tx(cmd) {
            cmd.set_done();
            return Ok(());
        }

        let key = parse_str(&args[0])?.to_string();
        let start = parse_int(&args[1])?;
        let stop = parse_int(&args[2])?;

        let items = match self.db_mut(cmd.db()).get_list(&key) {
            Some(list) => list.range(start, stop),
            None => Vec::new(),
        };
        cmd.write_value(&Value::Array(items));
        cmd.set_done();
        Ok(())
    }

    pub(crate) fn cmd_llen(&mut self, cmd: &Arc<Command>) -> Result<(), ServerError> {
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
        let len = self
            .db_mut(cmd.db())
            .get_list(&key)
            .map_or(0, |list| list.len());
        cmd.write_value(&Value::Integer(len as i64));
        cmd.set_done();
        Ok(())
    }

    pub(crate) fn cmd_lindex(&mut self, cmd: &Arc<Command>) -> Result<(), ServerError> {
        reject_sub_mode(cmd)?;
        let args = &cmd.frame.args;
        if args.len() < 2 {
            return Err(not_enough_args());
        }
        if self.check_in_tx(cmd) {
            cmd.set_done();
            return Ok(());
        }

        let key = parse_str(&args[0])?.to_string();
        let index = parse_int(&args[1])?;

        let reply = self
            .db_mut(cmd.db())
            .get_list(&key)
            .and_then(|list| list.index(index).cloned())
            .unwrap_or(Value::NullBulk);
        cmd.write_value(&reply);
        cmd.set_done();
        Ok(())
    }

    /// BLPOP pops immediately when the list has an element; otherwise the
    /// command parks in the database's waiter list with an absolute
    /// deadline (zero timeout waits forever). The command stays un-done so
    /// the connection writer holds its slot, preserving response order.
    pub(crate) fn cmd_blpop(&mut self, cmd: &Arc<Command>) -> Result<(), ServerError> {
        reject_sub_mode(cmd)?;
        let args = &cmd.frame.args;
        if args.len() < 2 {
            return Err(not_enough_args());
        }
        if self.check_in_tx(cmd) {
            cmd.set_done();
            return Ok(());
        }

        let key = parse_str(&args[0])?.to_string();
        let timeout_secs = parse_float(&args[1])?;
        if timeout_secs < 0.0 {
            return Err(ServerError::InvalidArguments(
                "timeout must not be negative".to_string(),
            ));
        }
        if timeout_secs != 0.0 {
            cmd.set_deadline(Instant::now() + Duration::from_secs_f64(timeout_secs));
        }

        let db = self.db_mut(cmd.db());
        if !resolve_blocked_pop(db, &key, cmd) {
            db.blocked_pop.entry(key).or_default().push(cmd.clone());
        }
        Ok(())
    }
}

/// Attempts to complete one parked BLPOP. Returns true when the waiter is
/// finished with (either served or dead) and should leave the wait list.
fn resolve_blocked_pop(db: &mut Database, key: &str, cmd: &Arc<Command>) -> bool {
    if cmd.is_done() || cmd.has_timed_out() || cmd.conn.is_closed() {
        return true;
    }

    let Some(list) = db.get_list_mut(key) else {
        return false;
    };
    let Some(value) = list.pop_left() else {
        return false;
    };
    db.remove_list_if_empty(key);

    cmd.write_value(&Value::Array(vec![Value::bulk(key), value]));
    cmd.set_done();
    debug!(key, "resolved blocked pop");
    true
}
