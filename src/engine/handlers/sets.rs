use std::sync::Arc;

use crate::engine::command::Command;
use crate::engine::handlers::{not_enough_args, parse_str, reject_sub_mode};
use crate::engine::Engine;
use crate::error::ServerError;
use crate::resp::Value;

impl Engine {
    pub(crate) fn cmd_sadd(&mut self, cmd: &Arc<Command>) -> Result<(), ServerError> {
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

        let set = self.db_mut(cmd.db()).get_or_create_set(&key);
        let mut added = 0;
        for member in &members {
            if set.add(member) {
                added += 1;
            }
        }

        if self.should_write_output(cmd) {
            cmd.write_value(&Value::Integer(added));
        }
        cmd.set_done();
        Ok(())
    }

    pub(crate) fn cmd_srem(&mut self, cmd: &Arc<Command>) -> Result<(), ServerError> {
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
        if let Some(set) = db.get_set_mut(&key) {
            for member in &members {
                if set.remove(member) {
                    removed += 1;
                }
            }
            db.remove_set_if_empty(&key);
        }

        if write_output {
            cmd.write_value(&Value::Integer(removed));
        }
        cmd.set_done();
        Ok(())
    }

    pub(crate) fn cmd_smembers(&mut self, cmd: &Arc<Command>) -> Result<(), ServerError> {
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
        let members: Vec<Value> = self
            .db_mut(cmd.db())
            .get_set(&key)
            .map_or(Vec::new(), |set| {
                set.members().into_iter().map(Value::Bulk).collect()
            });
        cmd.write_value(&Value::Array(members));
        cmd.set_done();
        Ok(())
    }

    pub(crate) fn cmd_scard(&mut self, cmd: &Arc<Command>) -> Result<(), ServerError> {
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
            .get_set(&key)
            .map_or(0, |set| set.len());
        cmd.write_value(&Value::Integer(len as i64));
        cmd.set_done();
        Ok(())
    }

    pub(crate) fn cmd_sismember(&mut self, cmd: &Arc<Command>) -> Result<(), ServerError> {
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
        let present = self
            .db_mut(cmd.db())
            .get_set(&key)
            .is_some_and(|set| set.contains(&member));
        cmd.write_value(&Value::Integer(i64::from(present)));
        cmd.set_done();
        Ok(())
    }
}
