use std::sync::Arc;

use crate::engine::command::{Command, Deferred};
use crate::engine::handlers::{not_enough_args, parse_int, parse_str, reject_sub_mode};
use crate::engine::{Engine, NUM_DBS};
use crate::error::ServerError;
use crate::resp::Value;

impl Engine {
    /// PING replies `PONG`, or `["pong", ""]` for a subscribed connection.
    pub(crate) fn cmd_ping(&mut self, cmd: &Arc<Command>) -> Result<(), ServerError> {
        if self.check_in_tx(cmd) {
            cmd.set_done();
            return Ok(());
        }
        if self.should_write_output(cmd) {
            if cmd.conn.is_subscribe() {
                cmd.write_value(&Value::Array(vec![Value::bulk("pong"), Value::bulk("")]));
            } else {
                cmd.write_value(&Value::Simple("PONG".to_string()));
            }
        }
        cmd.set_done();
        Ok(())
    }

    /// ECHO writes each argument back verbatim.
    pub(crate) fn cmd_echo(&mut self, cmd: &Arc<Command>) -> Result<(), ServerError> {
        reject_sub_mode(cmd)?;
        if cmd.frame.args.is_empty() {
            return Err(not_enough_args());
        }
        if self.check_in_tx(cmd) {
            cmd.set_done();
            return Ok(());
        }
        for arg in &cmd.frame.args {
            cmd.write_value(arg);
        }
        cmd.set_done();
        Ok(())
    }

    /// SELECT switches the connection's database, 0..15.
    pub(crate) fn cmd_select(&mut self, cmd: &Arc<Command>) -> Result<(), ServerError> {
        reject_sub_mode(cmd)?;
        let args = &cmd.frame.args;
        if args.is_empty() {
            return Err(ServerError::InvalidArguments(
                "missing database number".to_string(),
            ));
        }
        let db = parse_int(&args[0])?;
        if !(0..NUM_DBS as i64).contains(&db) {
            return Err(ServerError::OutOfRangeDb);
        }
        if self.check_in_tx(cmd) {
            cmd.set_done();
            return Ok(());
        }
        cmd.conn.select_db(db as usize);
        if self.should_write_output(cmd) {
            cmd.write_value(&Value::ok());
        }
        cmd.set_done();
        Ok(())
    }

    /// INFO renders the stat sections; rejected inside a transaction.
    pub(crate) fn cmd_info(&mut self, cmd: &Arc<Command>) -> Result<(), ServerError> {
        reject_sub_mode(cmd)?;
        self.reject_in_tx(cmd, "INFO")?;

        let section = match cmd.frame.args.first() {
            Some(arg) => Some(parse_str(arg)?),
            None => None,
        };
        let value = self.info().to_value(section)?;
        cmd.write_value(&value);
        cmd.set_done();
        Ok(())
    }

    /// QUIT acknowledges and closes the connection after the reply is
    /// flushed. Not valid on a replication stream.
    pub(crate) fn cmd_quit(&mut self, cmd: &Arc<Command>) -> Result<(), ServerError> {
        self.reject_in_tx(cmd, "QUIT")?;
        if cmd.conn.is_replication() {
            return Err(ServerError::InvalidArguments(
                "QUIT not allowed in replication".to_string(),
            ));
        }

        if cmd.conn.is_subscribe() {
            if let Some(sub_id) = cmd.conn.sub_id() {
                self.pubsub.unsubscribe_all(&sub_id);
            }
            cmd.conn.quit_subscription();
        }

        cmd.write_value(&Value::ok());
        cmd.set_deferred(Deferred::Close);
        cmd.set_done();
        Ok(())
    }
}
