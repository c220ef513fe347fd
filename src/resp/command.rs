use crate::error::ServerError;
use crate::resp::Value;

/// One parsed client command: its name, argument values, and the exact
/// number of bytes it occupied on the wire (used for replication offsets).
#[derive(Debug, Clone, PartialEq)]
pub struct CommandFrame {
    pub name: String,
    pub args: Vec<Value>,
    pub byte_size: usize,
}

impl CommandFrame {
    /// Builds a frame from a parsed top-level value. Commands arrive either
    /// as arrays of bulk strings or as inline arrays of simple strings; the
    /// first element names the command.
    pub fn from_value(value: Value, byte_size: usize) -> Result<Option<Self>, ServerError> {
        let Value::Array(items) = value else {
            return Err(ServerError::Protocol(
                "expected an array of bulk strings".to_string(),
            ));
        };
        let mut items = items.into_iter();
        // A bare CRLF inline line parses to an empty array; nothing to
        // execute.
        let Some(head) = items.next() else {
            return Ok(None);
        };
        let name = head
            .as_str()
            .ok_or_else(|| ServerError::Protocol("command name is not a string".to_string()))?
            .to_string();

        Ok(Some(CommandFrame {
            name,
            args: items.collect(),
            byte_size,
        }))
    }

    /// Builds a frame from plain string parts, used for frames this node
    /// originates itself (handshake commands, GETACK broadcasts, SELECT
    /// emission). `byte_size` is filled from the encoded form.
    pub fn from_parts(name: &str, args: &[&str]) -> Self {
        let mut frame = CommandFrame {
            name: name.to_string(),
            args: args.iter().map(|arg| Value::bulk(*arg)).collect(),
            byte_size: 0,
        };
        frame.byte_size = frame.encode().len();
        frame
    }

    /// Re-encodes the command as its canonical RESP array of bulk strings.
    /// Simple-string arguments (from inline commands) are written as bulk
    /// strings so every replica receives one uniform representation.
    pub fn encode(&self) -> Vec<u8> {
        let mut items = Vec::with_capacity(1 + self.args.len());
        items.push(Value::bulk(self.name.clone()));
        for arg in &self.args {
            match arg {
                Value::Simple(s) => items.push(Value::bulk(s.clone())),
                other => items.push(other.clone()),
            }
        }
        Value::Array(items).encode()
    }
}
