use std::sync::Arc;

use tracing::debug;

use crate::engine::command::Command;
use crate::engine::handlers::{not_enough_args, parse_str, reject_sub_mode};
use crate::engine::Engine;
use crate::error::ServerError;
use crate::resp::Value;
use crate::util::random_id;

impl Engine {
    /// SUBSCRIBE upgrades the connection into subscribe mode under a
    /// fresh 32-char subscription id and registers it on each channel.
    pub(crate) fn cmd_subscribe(&mut self, cmd: &Arc<Command>) -> Result<(), ServerError> {
        let args = &cmd.frame.args;
        if args.is_empty() {
            return Err(not_enough_args());
        }
        self.reject_in_tx(cmd, "SUBSCRIBE")?;

        let Some(handle) = cmd.conn.handle().cloned() else {
            return Err(ServerError::InvalidArguments(
                "SUBSCRIBE requires a client connection".to_string(),
            ));
        };

        let sub_id = match cmd.conn.sub_id() {
            Some(id) => id,
            None => {
                let id = random_id(32);
                cmd.conn.upgrade_to_subscription(id.clone());
                id
            }
        };

        for arg in args {
            let channel = parse_str(arg)?.to_string();
            self.pubsub.subscribe(&sub_id, &channel, handle.clone());
            let count = self.pubsub.count_subs(&sub_id);
            cmd.write_value(&Value::Array(vec![
                Value::bulk("subscribe"),
                Value::bulk(channel.clone()),
                Value::Integer(count as i64),
            ]));
            debug!(%channel, addr = %handle.addr, "new subscriber added");
        }
        cmd.set_done();
        Ok(())
    }

    /// UNSUBSCRIBE from the named channels, or from everything when
    /// called bare.
    pub(crate) fn cmd_unsubscribe(&mut self, cmd: &Arc<Command>) -> Result<(), ServerError> {
        self.reject_in_tx(cmd, "UNSUBSCRIBE")?;
        if !cmd.conn.is_subscribe() {
            return Err(ServerError::InvalidArguments(
                "UNSUBSCRIBE not allowed outside subscribe mode".to_string(),
            ));
        }
        let sub_id = cmd
            .conn
            .sub_id()
            .expect("subscribe mode implies a sub id");

        let mut channels = Vec::new();
        if cmd.frame.args.is_empty() {
            channels.extend(self.pubsub.unsubscribe_all(&sub_id));
        } else {
            for arg in &cmd.frame.args {
                let channel = parse_str(arg)?.to_string();
                self.pubsub.unsubscribe(&sub_id, &channel);
                channels.push(channel);
            }
        }

        let remaining = self.pubsub.count_subs(&sub_id);
        let mut items = vec![Value::bulk("unsubscribe")];
        items.extend(channels.into_iter().map(Value::Bulk));
        items.push(Value::Integer(remaining as i64));
        cmd.write_value(&Value::Array(items));
        cmd.set_done();
        Ok(())
    }

    /// PUBLISH enqueues the message; delivery happens on the next core
    /// round. The reply is the channel's current subscriber count.
    pub(crate) fn cmd_publish(&mut self, cmd: &Arc<Command>) -> Result<(), ServerError> {
        reject_sub_mode(cmd)?;
        let args = &cmd.frame.args;
        if args.len() < 2 {
            return Err(not_enough_args());
        }
        self.reject_in_tx(cmd, "PUBLISH")?;

        let channel = parse_str(&args[0])?.to_string();
        let message = args[1].clone();
        let receivers = self.pubsub.publish(&channel, message);

        if self.should_write_output(cmd) {
            cmd.write_value(&Value::Integer(receivers as i64));
        }
        cmd.set_done();
        Ok(())
    }
}
