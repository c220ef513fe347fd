use std::sync::Arc;

use crate::data::Insert;
use crate::engine::command::Command;
use crate::engine::handlers::{not_enough_args, parse_float, parse_int, parse_str, reject_sub_mode};
use crate::engine::Engine;
use crate::error::ServerError;
use crate::resp::{format_double, Value};

impl Engine {
    /// ZADD key (score member)+ — replies with the number of members that
    /// were newly added (rescores do not count).
    pub(crate) fn cmd_zadd(&mut self, cmd: &Arc<Command>) -> Result<(), ServerError> {
        reject_sub_mode(cmd)?;
        let args = &cmd.frame.args;
        if args.len() < 3 || args.len() % 2 == 0 {
            return Err(not_enough_args());
        }
        self.check_replica_write(cmd)?;

        let key = parse_str(&args[0])?.to_string();
        let mut pairs = Vec::with_capacity(args.len() / 2);
        for chunk in args[1..].chunks(2) {
            let score = parse_float(&chunk[0])?;
            let member = parse_str(&chunk[1])?.to_string();
            pairs.push((score, member));
        }

        if self.check_in_tx(cmd) {
            cmd.set_done();
            return Ok(());
        }

        let set = self.db_mut(cmd.db()).get_or_create_sset(&key);
        let mut added = 0;
        for (score, member) in pairs {
            if set.insert(&member, score) == Insert::Added {
                added += 1;
            }
        }

        if self.should_write_output(cmd) {
            cmd.write_value(&Value::Integer(added));
        }
        cmd.set_done();
        Ok(())
    }

    pub(crate) fn cmd_zrem(&mut self, cmd: &Arc<Command>) -> Result<(), ServerError> {
        reject_sub_mode(cmd)?;
        let args = &cmd.frame.args;
        if args.len() < 2 {
            return Err(not_enough_args());
        }
        self.check_replica_write(cmd)?;

        let key = parse_str(&args[0])?.to_string();
        let mut members = Vec::with_capacity(args.len() - 1);
        for arg in &args[1..] {
            members.push(parse_str(arg)?.to_string());
        }

        if self.check_in_tx(cmd) {
            cmd.set_done();
            return Ok(());
        }

        let write_output = self.should_write_output(cmd);
        let db = self.db_mut(cmd.db());
        let mut removed = 0;
        if let Some(set) = db.get_sset_mut(&key) {
            for member in &members {
                if set.remove(member) {
                    removed += 1;
                }
            }
            db.remove_sset_if_empty(&key);
        }

        if write_output {
            cmd.write_value(&Value::Integer(removed));
        }
        cmd.set_done();
        Ok(())
    }

    pub(crate) fn cmd_zscore(&mut self, cmd: &Arc<Command>) -> Result<(), ServerError> {
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
        let member = parse_str(&args[1])?.to_string();

        let reply = self
            .db_mut(cmd.db())
            .get_sset(&key)
            .and_then(|set| set.score(&member))
            .map_or(Value::NullBulk, |score| Value::Bulk(format_double(score)));
        cmd.write_value(&reply);
        cmd.set_done();
        Ok(())
    }

    pub(crate) fn cmd_zcard(&mut self, cmd: &Arc<Command>) -> Result<(), ServerError> {
        reject_sub_mode(cmd)?;
        let args = &cmd.frame.args;
        if args.len() != 1 {
            return Err(not_enough_args());
        }
        if self.check_in_tx(cmd) {
            cmd.set_done();
            return Ok(());
        }

        let key = parse_str(&args[0])?.to_string();
        let len = self
            .db_mut(cmd.db())
            .get_sset(&key)
            .map_or(0, |set| set.len());
        cmd.write_value(&Value::Integer(len as i64));
        cmd.set_done();
        Ok(())
    }

    /// ZRANGE key start stop — by rank, inclusive, with negative index
    /// normalization.
    pub(crate) fn cmd_zrange(&mut self, cmd: &Arc<Command>) -> Result<(), ServerError> {
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
        let mut start = parse_int(&args[1])?;
        let mut stop = parse_int(&args[2])?;

        let Some(set) = self.db_mut(cmd.db()).get_sset(&key) else {
            cmd.write_value(&Value::Array(Vec::new()));
            cmd.set_done();
            return Ok(());
        };

        let len = set.len() as i64;
        if start < 0 {
            start += len;
        }
        if stop < 0 {
            stop += len;
        }
        if start < 0 {
            start = 0;
        }
        if start > stop || start >= len {
            cmd.write_value(&Value::Array(Vec::new()));
            cmd.set_done();
            return Ok(());
        }
        if stop >= len {
            stop = len - 1;
        }

        let members: Vec<Value> = set
            .range(start as usize, stop as usize + 1)
            .into_iter()
            .map(|(member, _)| Value::Bulk(member))
            .collect();
        cmd.write_value(&Value::Array(members));
        cmd.set_done();
        Ok(())
    }

    pub(crate) fn cmd_zrank(&mut self, cmd: &Arc<Command>) -> Result<(), ServerError> {
        reject_sub_mode(cmd)?;
        let args = &cmd.frame.args;
        if args.len() != 2 {
            return Err(not_enough_args());
        }
        if self.check_in_tx(cmd) {
            cmd.set_done();
            return Ok(());
        }

        let key = parse_str(&args[0])?.to_string();
        let member = parse_str(&args[1])?.to_string();

        let reply = self
            .db_mut(cmd.db())
            .get_sset(&key)
            .and_then(|set| set.rank(&member))
            .map_or(Value::NullBulk, |rank| Value::Integer(rank as i64));
        cmd.write_value(&reply);
        cmd.set_done();
        Ok(())
    }
}
