use thiserror::Error;

use crate::resp::Value;

/// Errors produced while parsing or executing commands.
///
/// Per-command errors never terminate a connection; they are serialized into
/// the command's reply buffer as RESP simple errors. Only `Disconnected`
/// surfaces as a connection close.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("invalid command '{0}'")]
    Protocol(String),
    #[error("{0}")]
    InvalidToken(String),
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("value is not an integer or out of range")]
    TypeMismatch,
    #[error("invalid database number, must be between 0 and 15")]
    OutOfRangeDb,
    #[error("READONLY You can't write against a read only replica")]
    ReplicaReadOnly,
    #[error("{0}")]
    Transaction(String),
    #[error("can't execute '{0}' while in subscribe mode")]
    SubscribeMode(String),
    #[error("unknown section '{0}'")]
    UnknownSection(String),
    #[error("connection closed")]
    Disconnected(#[from] std::io::Error),
}

impl ServerError {
    /// Renders this error as the RESP value written back to the client.
    ///
    /// The wire form carries the mandatory `ERR ` prefix except for errors
    /// that define their own leading code (`READONLY ...`).
    pub fn to_value(&self) -> Value {
        match self {
            ServerError::ReplicaReadOnly => Value::Error(self.to_string()),
            other => Value::Error(format!("ERR {}", other)),
        }
    }

    /// True when the underlying I/O error means the peer has gone away.
    pub fn is_disconnected(&self) -> bool {
        match self {
            ServerError::Disconnected(err) => is_disconnect_io_error(err),
            _ => false,
        }
    }
}

/// Classifies an I/O error as a peer disconnect (EOF, closed socket,
/// broken pipe, reset) rather than a transient failure.
pub fn is_disconnect_io_error(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::NotConnected
    )
}
