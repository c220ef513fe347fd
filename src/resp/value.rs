/// A single RESP value, covering both the RESP2 and RESP3 shapes.
///
/// Maps, attributes, sets and pushes keep their elements in parse order so
/// that serializing a parsed value reproduces the original frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// `+OK\r\n`
    Simple(String),
    /// `-ERR message\r\n`
    Error(String),
    /// `:1000\r\n`
    Integer(i64),
    /// `$5\r\nhello\r\n`
    Bulk(String),
    /// `$-1\r\n`
    NullBulk,
    /// `*2\r\n...`
    Array(Vec<Value>),
    /// `*-1\r\n`
    NullArray,
    /// `_\r\n`
    Null,
    /// `#t\r\n` / `#f\r\n`
    Bool(bool),
    /// `,3.14\r\n`
    Double(f64),
    /// `(3492890328409238509324850943850943825024385\r\n`
    BigNumber(String),
    /// `!21\r\nSYNTAX invalid syntax\r\n`
    BulkError(String),
    /// `=15\r\ntxt:Some string\r\n`
    Verbatim(String, String),
    /// `%2\r\n<k><v><k><v>`
    Map(Vec<(Value, Value)>),
    /// `|1\r\n<k><v>`
    Attributes(Vec<(Value, Value)>),
    /// `~3\r\n...`
    Set(Vec<Value>),
    /// `>3\r\n...`
    Push(Vec<Value>),
}

impl Value {
    pub fn ok() -> Self {
        Value::Simple("OK".to_string())
    }

    pub fn bulk(s: impl Into<String>) -> Self {
        Value::Bulk(s.into())
    }

    /// Serializes this value to its RESP wire form.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.write_to(&mut buf);
        buf
    }

    /// Appends the RESP wire form of this value to `buf`.
    pub fn write_to(&self, buf: &mut Vec<u8>) {
        match self {
            Value::Simple(s) => write_line(buf, b'+', s),
            Value::Error(s) => write_line(buf, b'-', s),
            Value::Integer(n) => write_line(buf, b':', &n.to_string()),
            Value::Bulk(s) => {
                write_line(buf, b'$', &s.len().to_string());
                buf.extend_from_slice(s.as_bytes());
                buf.extend_from_slice(b"\r\n");
            }
            Value::NullBulk => buf.extend_from_slice(b"$-1\r\n"),
            Value::Array(items) => {
                write_line(buf, b'*', &items.len().to_string());
                for item in items {
                    item.write_to(buf);
                }
            }
            Value::NullArray => buf.extend_from_slice(b"*-1\r\n"),
            Value::Null => buf.extend_from_slice(b"_\r\n"),
            Value::Bool(b) => write_line(buf, b'#', if *b { "t" } else { "f" }),
            Value::Double(d) => write_line(buf, b',', &format_double(*d)),
            Value::BigNumber(digits) => write_line(buf, b'(', digits),
            Value::BulkError(s) => {
                write_line(buf, b'!', &s.len().to_string());
                buf.extend_from_slice(s.as_bytes());
                buf.extend_from_slice(b"\r\n");
            }
            Value::Verbatim(encoding, text) => {
                write_line(buf, b'=', &(encoding.len() + 1 + text.len()).to_string());
                buf.extend_from_slice(encoding.as_bytes());
                buf.push(b':');
                buf.extend_from_slice(text.as_bytes());
                buf.extend_from_slice(b"\r\n");
            }
            Value::Map(pairs) => {
                write_line(buf, b'%', &pairs.len().to_string());
                for (k, v) in pairs {
                    k.write_to(buf);
                    v.write_to(buf);
                }
            }
            Value::Attributes(pairs) => {
                write_line(buf, b'|', &pairs.len().to_string());
                for (k, v) in pairs {
                    k.write_to(buf);
                    v.write_to(buf);
                }
            }
            Value::Set(items) => {
                write_line(buf, b'~', &items.len().to_string());
                for item in items {
                    item.write_to(buf);
                }
            }
            Value::Push(items) => {
                write_line(buf, b'>', &items.len().to_string());
                for item in items {
                    item.write_to(buf);
                }
            }
        }
    }

    /// Interprets this value as a piece of text where commands expect a
    /// string argument. Accepts both bulk and simple strings.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Bulk(s) | Value::Simple(s) => Some(s),
            _ => None,
        }
    }
}

fn write_line(buf: &mut Vec<u8>, prefix: u8, payload: &str) {
    buf.push(prefix);
    buf.extend_from_slice(payload.as_bytes());
    buf.extend_from_slice(b"\r\n");
}

/// Doubles print without an exponent and without a trailing `.0` for
/// integral values, matching how the original formats scores.
pub fn format_double(d: f64) -> String {
    if d.fract() == 0.0 && d.abs() < 1e17 {
        format!("{}", d as i64)
    } else {
        format!("{}", d)
    }
}
