use std::sync::Arc;

use crate::engine::command::Command;
use crate::engine::handlers::reject_sub_mode;
use crate::engine::{registry, Engine};
use crate::error::ServerError;
use crate::resp::Value;

impl Engine {
    /// MULTI moves the connection from idle to queuing.
    pub(crate) fn cmd_multi(&mut self, cmd: &Arc<Command>) -> Result<(), ServerError> {
        reject_sub_mode(cmd)?;
        self.check_replica_write(cmd)?;

        if !cmd.conn.begin_transaction() {
            return Err(ServerError::Transaction(
                "MULTI calls cannot be nested".to_string(),
            ));
        }
        if self.should_write_output(cmd) {
            cmd.write_value(&Value::ok());
        }
        cmd.set_done();
        Ok(())
    }

    /// EXEC runs the queued commands back to back on the core task; no
    /// other connection's commands interleave. Each queued command's
    /// output (or error) becomes one element of the array reply.
    pub(crate) fn cmd_exec(&mut self, cmd: &Arc<Command>) -> Result<(), ServerError> {
        reject_sub_mode(cmd)?;
        self.check_replica_write(cmd)?;

        if !cmd.conn.in_transaction() {
            return Err(ServerError::Transaction("EXEC without MULTI".to_string()));
        }
        let queued = cmd.conn.end_transaction();

        let mut outputs = Vec::with_capacity(queued.len());
        for op in &queued {
            match registry::route(&op.frame.name) {
                None => {
                    let err = ServerError::Protocol(format!("invalid command '{}'", op.frame.name));
                    outputs.push(err.to_value().encode());
                }
                Some((handler, _)) => match handler(self, op) {
                    Ok(()) => {
                        if !op.is_done() {
                            // A blocking command cannot park inside a
                            // transaction; it answers null right away.
                            op.write_value(&Value::NullArray);
                            op.set_done();
                        }
                        outputs.push(op.output_bytes());
                    }
                    Err(err) => outputs.push(err.to_value().encode()),
                },
            }
        }

        if self.should_write_output(cmd) {
            cmd.write_raw(format!("*{}\r\n", outputs.len()).as_bytes());
            for output in outputs {
                cmd.write_raw(&output);
            }
        }
        cmd.set_done();
        Ok(())
    }

    /// DISCARD drops the queue and leaves queuing state.
    pub(crate) fn cmd_discard(&mut self, cmd: &Arc<Command>) -> Result<(), ServerError> {
        reject_sub_mode(cmd)?;
        self.check_replica_write(cmd)?;

        if !cmd.conn.in_transaction() {
            return Err(ServerError::Transaction(
                "DISCARD without MULTI".to_string(),
            ));
        }
        cmd.conn.end_transaction();

        if self.should_write_output(cmd) {
            cmd.write_value(&Value::ok());
        }
        cmd.set_done();
        Ok(())
    }
}
