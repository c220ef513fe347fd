use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::ServerError;
use crate::resp::Value;

/// Upper bound on any single line or bulk payload, to bound memory usage on
/// malformed input.
const MAX_PAYLOAD: usize = 512 * 1024 * 1024;

/// Errors raised by the RESP parser.
///
/// `Protocol` covers framing problems (bad prefix, bad size, oversized
/// payload); `InvalidToken` covers values that fail to parse inside an
/// otherwise well-framed token (non-numeric integer, invalid UTF-8).
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum RespError {
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("invalid token: {0}")]
    InvalidToken(String),
}

impl From<RespError> for ServerError {
    fn from(err: RespError) -> Self {
        match err {
            RespError::Protocol(msg) => ServerError::Protocol(msg),
            RespError::InvalidToken(msg) => ServerError::InvalidToken(msg),
        }
    }
}

/// Tries to parse one complete top-level frame from `buf`.
///
/// On success the parsed bytes are consumed from `buf` and the exact number
/// of bytes consumed is returned next to the value; that count feeds
/// replication offset accounting. Returns `Ok(None)` when the buffer does
/// not yet hold a complete frame.
pub fn parse_frame(buf: &mut BytesMut) -> Result<Option<(Value, usize)>, RespError> {
    if buf.is_empty() {
        return Ok(None);
    }

    let (value, consumed) = {
        let mut cursor = Cursor {
            buf: &buf[..],
            pos: 0,
        };
        let value = match cursor.buf[0] {
            b'+' | b'-' | b':' | b'$' | b'*' | b'_' | b'#' | b',' | b'(' | b'!' | b'=' | b'%'
            | b'|' | b'~' | b'>' => cursor.parse_value()?,
            _ => cursor.parse_inline()?,
        };
        match value {
            Some(value) => (value, cursor.pos),
            None => return Ok(None),
        }
    };

    buf.advance(consumed);
    Ok(Some((value, consumed)))
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    /// Reads one CRLF-terminated line starting at the current position,
    /// without the terminator. Returns `None` when the line is incomplete.
    fn line(&mut self) -> Result<Option<&'a str>, RespError> {
        let buf = self.buf;
        let rest = &buf[self.pos..];
        for i in 0..rest.len().saturating_sub(1) {
            if rest[i] == b'\r' && rest[i + 1] == b'\n' {
                let line = std::str::from_utf8(&rest[..i])
                    .map_err(|_| RespError::InvalidToken("invalid UTF-8 sequence".to_string()))?;
                self.pos += i + 2;
                return Ok(Some(line));
            }
        }
        if rest.len() >= MAX_PAYLOAD {
            return Err(RespError::Protocol("payload exceeded 512MB".to_string()));
        }
        Ok(None)
    }

    fn parse_value(&mut self) -> Result<Option<Value>, RespError> {
        if self.pos >= self.buf.len() {
            return Ok(None);
        }
        let prefix = self.buf[self.pos];
        self.pos += 1;

        let Some(line) = self.line()? else {
            return Ok(None);
        };

        match prefix {
            b'+' => Ok(Some(Value::Simple(line.to_string()))),
            b'-' => Ok(Some(Value::Error(line.to_string()))),
            b':' => {
                let n = line
                    .parse::<i64>()
                    .map_err(|_| RespError::InvalidToken(format!("invalid integer value: {line}")))?;
                Ok(Some(Value::Integer(n)))
            }
            b'$' => self.parse_bulk(line, false),
            b'!' => self.parse_bulk(line, true),
            b'*' => match self.parse_len(line)? {
                None => Ok(Some(Value::NullArray)),
                Some(n) => Ok(self.parse_items(n)?.map(Value::Array)),
            },
            b'~' => match self.parse_len(line)? {
                None => Err(RespError::Protocol("invalid set length".to_string())),
                Some(n) => Ok(self.parse_items(n)?.map(Value::Set)),
            },
            b'>' => match self.parse_len(line)? {
                None => Err(RespError::Protocol("invalid push length".to_string())),
                Some(n) => Ok(self.parse_items(n)?.map(Value::Push)),
            },
            b'%' => match self.parse_len(line)? {
                None => Err(RespError::Protocol("invalid map length".to_string())),
                Some(n) => Ok(self.parse_pairs(n)?.map(Value::Map)),
            },
            b'|' => match self.parse_len(line)? {
                None => Err(RespError::Protocol("invalid attributes length".to_string())),
                Some(n) => Ok(self.parse_pairs(n)?.map(Value::Attributes)),
            },
            b'_' => {
                if !line.is_empty() {
                    return Err(RespError::InvalidToken("invalid null syntax".to_string()));
                }
                Ok(Some(Value::Null))
            }
            b'#' => match line {
                "t" => Ok(Some(Value::Bool(true))),
                "f" => Ok(Some(Value::Bool(false))),
                other => Err(RespError::InvalidToken(format!(
                    "invalid boolean value: {other}"
                ))),
            },
            b',' => {
                let d = line
                    .parse::<f64>()
                    .map_err(|_| RespError::InvalidToken(format!("invalid double value: {line}")))?;
                Ok(Some(Value::Double(d)))
            }
            b'(' => {
                let digits = line.strip_prefix('-').unwrap_or(line);
                if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(RespError::InvalidToken("invalid big integer".to_string()));
                }
                Ok(Some(Value::BigNumber(line.to_string())))
            }
            b'=' => {
                let Some(len) = self.parse_len(line)? else {
                    return Err(RespError::Protocol("invalid verbatim length".to_string()));
                };
                let Some(payload) = self.take_payload(len)? else {
                    return Ok(None);
                };
                let Some((encoding, text)) = payload.split_once(':') else {
                    return Err(RespError::Protocol(
                        "invalid verbatim encoding header".to_string(),
                    ));
                };
                Ok(Some(Value::Verbatim(encoding.to_string(), text.to_string())))
            }
            other => Err(RespError::Protocol(format!(
                "invalid type prefix: {}",
                other as char
            ))),
        }
    }

    fn parse_bulk(&mut self, line: &str, is_error: bool) -> Result<Option<Value>, RespError> {
        match self.parse_len(line)? {
            None => Ok(Some(Value::NullBulk)),
            Some(len) => {
                let Some(payload) = self.take_payload(len)? else {
                    return Ok(None);
                };
                if is_error {
                    Ok(Some(Value::BulkError(payload)))
                } else {
                    Ok(Some(Value::Bulk(payload)))
                }
            }
        }
    }

    /// Parses a declared element or byte count. `-1` maps to `None` (the
    /// null marker); anything below -1 or above the payload cap is a
    /// framing error.
    fn parse_len(&self, line: &str) -> Result<Option<usize>, RespError> {
        let n = line
            .parse::<i64>()
            .map_err(|_| RespError::InvalidToken(format!("invalid size value: {line}")))?;
        if n == -1 {
            return Ok(None);
        }
        if n < -1 || n as usize > MAX_PAYLOAD {
            return Err(RespError::Protocol(format!("invalid size value: {n}")));
        }
        Ok(Some(n as usize))
    }

    /// Takes exactly `len` payload bytes plus the trailing CRLF.
    fn take_payload(&mut self, len: usize) -> Result<Option<String>, RespError> {
        let rest = &self.buf[self.pos..];
        if rest.len() < len + 2 {
            return Ok(None);
        }
        if rest[len] != b'\r' || rest[len + 1] != b'\n' {
            return Err(RespError::Protocol(
                "missing CRLF after payload".to_string(),
            ));
        }
        let payload = std::str::from_utf8(&rest[..len])
            .map_err(|_| RespError::InvalidToken("invalid UTF-8 sequence".to_string()))?
            .to_string();
        self.pos += len + 2;
        Ok(Some(payload))
    }

    fn parse_items(&mut self, n: usize) -> Result<Option<Vec<Value>>, RespError> {
        let mut items = Vec::with_capacity(n.min(1024));
        for _ in 0..n {
            match self.parse_value()? {
                Some(value) => items.push(value),
                None => return Ok(None),
            }
        }
        Ok(Some(items))
    }

    fn parse_pairs(&mut self, n: usize) -> Result<Option<Vec<(Value, Value)>>, RespError> {
        let mut pairs = Vec::with_capacity(n.min(1024));
        for _ in 0..n {
            let Some(key) = self.parse_value()? else {
                return Ok(None);
            };
            let Some(value) = self.parse_value()? else {
                return Ok(None);
            };
            pairs.push((key, value));
        }
        Ok(Some(pairs))
    }

    /// An inline command: one CRLF-terminated line of space-separated
    /// tokens, surfaced as an array whose arguments are simple strings.
    fn parse_inline(&mut self) -> Result<Option<Value>, RespError> {
        let Some(line) = self.line()? else {
            return Ok(None);
        };
        let items = line
            .split_ascii_whitespace()
            .map(|token| Value::Simple(token.to_string()))
            .collect();
        Ok(Some(Value::Array(items)))
    }
}

/// Buffered frame reader over an async byte stream.
///
/// Call `read_frame` repeatedly; partial frames stay in the internal buffer
/// until the peer sends the rest. `read_rdb` is the distinct read path used
/// right after a FULLRESYNC reply: a `$<len>\r\n` header followed by exactly
/// `len` raw bytes with no trailing CRLF.
pub struct FrameReader<R> {
    reader: R,
    buf: BytesMut,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        FrameReader {
            reader,
            buf: BytesMut::with_capacity(4096),
        }
    }

    /// Reads one frame, returning it with its exact on-wire byte count.
    /// `Ok(None)` means the peer closed the stream cleanly.
    pub async fn read_frame(&mut self) -> Result<Option<(Value, usize)>, ServerError> {
        loop {
            if let Some(frame) = parse_frame(&mut self.buf)? {
                return Ok(Some(frame));
            }

            let n = self.reader.read_buf(&mut self.buf).await?;
            if n == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(ServerError::Disconnected(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed mid-frame",
                )));
            }
        }
    }

    /// Reads an RDB payload pushed by a master after PSYNC.
    pub async fn read_rdb(&mut self) -> Result<Vec<u8>, ServerError> {
        let len = loop {
            if let Some(len) = self.parse_rdb_header()? {
                break len;
            }
            let n = self.reader.read_buf(&mut self.buf).await?;
            if n == 0 {
                return Err(ServerError::Disconnected(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed before RDB header",
                )));
            }
        };

        while self.buf.len() < len {
            let n = self.reader.read_buf(&mut self.buf).await?;
            if n == 0 {
                return Err(ServerError::Disconnected(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed mid-RDB",
                )));
            }
        }

        Ok(self.buf.split_to(len).to_vec())
    }

    /// Recovers after a parse error by discarding buffered input through
    /// the next line terminator (or all of it), so the stream can resume
    /// at a frame boundary.
    pub fn resync(&mut self) {
        match self.buf.windows(2).position(|w| w == b"\r\n") {
            Some(end) => self.buf.advance(end + 2),
            None => self.buf.clear(),
        }
    }

    fn parse_rdb_header(&mut self) -> Result<Option<usize>, ServerError> {
        let Some(end) = self.buf.windows(2).position(|w| w == b"\r\n") else {
            return Ok(None);
        };
        if self.buf.is_empty() || self.buf[0] != b'$' {
            return Err(ServerError::Protocol("invalid RDB header".to_string()));
        }
        let line = std::str::from_utf8(&self.buf[1..end])
            .map_err(|_| ServerError::InvalidToken("invalid UTF-8 sequence".to_string()))?;
        let len = line
            .parse::<usize>()
            .map_err(|_| ServerError::InvalidToken(format!("invalid RDB length: {line}")))?;
        if len > MAX_PAYLOAD {
            return Err(ServerError::Protocol("payload exceeded 512MB".to_string()));
        }
        self.buf.advance(end + 2);
        Ok(Some(len))
    }
}
