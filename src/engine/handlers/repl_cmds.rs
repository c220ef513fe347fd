use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::engine::command::{Command, Deferred};
use crate::engine::handlers::{not_enough_args, parse_int, parse_str, reject_sub_mode};
use crate::engine::{Engine, WaitEntry};
use crate::error::ServerError;
use crate::repl::master::HandshakeStep;
use crate::resp::{CommandFrame, Value};

impl Engine {
    /// REPLCONF carries both handshake steps (listening-port, capa) on the
    /// master and the offset exchange (GETACK, ACK) on both sides.
    pub(crate) fn cmd_replconf(&mut self, cmd: &Arc<Command>) -> Result<(), ServerError> {
        reject_sub_mode(cmd)?;
        if self.check_in_tx(cmd) {
            cmd.set_done();
            return Ok(());
        }
        let args = &cmd.frame.args;
        if args.len() < 2 {
            return Err(not_enough_args());
        }
        let subcommand = parse_str(&args[0])?.to_lowercase();

        match subcommand.as_str() {
            "listening-port" => {
                let Some(master) = self.master().cloned() else {
                    return Err(ServerError::InvalidArguments(
                        "REPLCONF only valid on a master".to_string(),
                    ));
                };
                let port = parse_int(&args[1]).map_err(|_| {
                    ServerError::InvalidArguments("invalid port number".to_string())
                })?;
                if !(0..=65535).contains(&port) {
                    return Err(ServerError::InvalidArguments(
                        "invalid port number".to_string(),
                    ));
                }
                let Some(handle) = cmd.conn.handle().cloned() else {
                    return Err(ServerError::InvalidArguments(
                        "REPLCONF requires a client connection".to_string(),
                    ));
                };

                let addr = handle.addr.clone();
                master.add_slave(handle, port as u16);
                master.add_handshake_step(&addr, HandshakeStep::ListeningPort);
                cmd.write_value(&Value::ok());
            }
            "capa" => {
                let Some(master) = self.master().cloned() else {
                    return Err(ServerError::InvalidArguments(
                        "REPLCONF only valid on a master".to_string(),
                    ));
                };
                let Some(handle) = cmd.conn.handle() else {
                    return Err(ServerError::InvalidArguments(
                        "REPLCONF requires a client connection".to_string(),
                    ));
                };
                let addr = handle.addr.clone();
                if !master.has_handshake_step(&addr, HandshakeStep::ListeningPort) {
                    return Err(ServerError::InvalidArguments(
                        "REPLCONF capa must come after listening-port".to_string(),
                    ));
                }

                let capa = parse_str(&args[1])?;
                if !master.set_slave_capa(&addr, capa) {
                    return Err(ServerError::InvalidArguments(
                        "slave not registered yet".to_string(),
                    ));
                }
                master.add_handshake_step(&addr, HandshakeStep::Capa);
                cmd.write_value(&Value::ok());
            }
            "getack" => {
                // The argument is `*` or a numeric offset; either way the
                // reply reports this node's current offset. The exchange
                // itself never advances offsets.
                let offset = if let Some(replica) = self.replica() {
                    replica.repl_offset()
                } else if let Some(master) = self.master() {
                    master.repl_offset()
                } else {
                    0
                };
                let ack = CommandFrame::from_parts("REPLCONF", &["ACK", &offset.to_string()]);
                cmd.write_raw(&ack.encode());
                cmd.set_omit_offset(true);
            }
            "ack" => {
                let offset = parse_int(&args[1]).map_err(|_| {
                    ServerError::InvalidArguments("invalid ACK offset".to_string())
                })?;
                if let (Some(master), Some(handle)) = (self.master().cloned(), cmd.conn.handle()) {
                    master.record_ack(&handle.addr, offset.max(0) as u64);
                }
            }
            other => {
                return Err(ServerError::InvalidArguments(format!(
                    "unknown REPLCONF subcommand '{other}'"
                )));
            }
        }

        cmd.set_done();
        Ok(())
    }

    /// PSYNC finishes the handshake: the reply is `FULLRESYNC <id> 0` and,
    /// once flushed, the connection writer upgrades the stream and the
    /// core pushes the empty RDB snapshot.
    pub(crate) fn cmd_psync(&mut self, cmd: &Arc<Command>) -> Result<(), ServerError> {
        reject_sub_mode(cmd)?;
        self.reject_in_tx(cmd, "PSYNC")?;
        let Some(master) = self.master().cloned() else {
            return Err(ServerError::InvalidArguments(
                "PSYNC invalid for a replica".to_string(),
            ));
        };
        if cmd.frame.args.len() < 2 {
            return Err(not_enough_args());
        }

        let Some(handle) = cmd.conn.handle() else {
            return Err(ServerError::InvalidArguments(
                "PSYNC requires a client connection".to_string(),
            ));
        };
        let addr = handle.addr.clone();
        if !master.has_handshake_step(&addr, HandshakeStep::Capa) {
            return Err(ServerError::InvalidArguments(
                "PSYNC must come after REPLCONF capa".to_string(),
            ));
        }

        cmd.write_value(&Value::Simple(format!("FULLRESYNC {} 0", master.repl_id())));
        master.add_handshake_step(&addr, HandshakeStep::Psync);
        cmd.set_deferred(Deferred::UpgradeToReplication);
        cmd.set_done();
        Ok(())
    }

    /// WAIT parks until the required number of replicas has acknowledged
    /// the master's current offset, or until the deadline, and replies
    /// with the in-sync count either way.
    pub(crate) fn cmd_wait(&mut self, cmd: &Arc<Command>) -> Result<(), ServerError> {
        reject_sub_mode(cmd)?;
        self.reject_in_tx(cmd, "WAIT")?;
        let Some(master) = self.master().cloned() else {
            return Err(ServerError::InvalidArguments(
                "WAIT invalid for a replica".to_string(),
            ));
        };

        let args = &cmd.frame.args;
        if args.len() < 2 {
            return Err(not_enough_args());
        }
        let required = parse_int(&args[0])?;
        if required < 0 {
            return Err(ServerError::InvalidArguments(
                "replica count must not be negative".to_string(),
            ));
        }
        let timeout_ms = parse_int(&args[1])?;
        if timeout_ms < 0 {
            return Err(ServerError::InvalidArguments(
                "timeout must not be negative".to_string(),
            ));
        }

        cmd.set_deadline(Instant::now() + Duration::from_millis(timeout_ms as u64));
        let producer_master = master.clone();
        cmd.set_timeout_reply(Box::new(move || {
            Value::Integer(producer_master.in_sync_count() as i64)
        }));

        self.push_wait(WaitEntry {
            cmd: cmd.clone(),
            required: required as usize,
        });
        Ok(())
    }
}
