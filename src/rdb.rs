use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

/// The empty snapshot a master pushes to complete a PSYNC handshake.
/// Transmitted byte-exact as `$<len>\r\n<bytes>` with no trailing CRLF.
const EMPTY_RDB_BASE64: &str = "UkVESVMwMDEx+glyZWRpcy12ZXIFNy4yLjD6CnJlZGlzLWJpdHPAQPoFY3RpbWXCbQi8ZfoIdXNlZC1tZW3CsMQQAPoIYW9mLWJhc2XAAP/wbjv+wP9aog==";

/// Decoded empty-RDB payload.
pub fn empty_rdb() -> Vec<u8> {
    STANDARD
        .decode(EMPTY_RDB_BASE64)
        .expect("embedded RDB payload is valid base64")
}

/// The payload framed for the wire: `$<len>\r\n` followed by the raw bytes.
pub fn empty_rdb_frame() -> Vec<u8> {
    let payload = empty_rdb();
    let mut frame = format!("${}\r\n", payload.len()).into_bytes();
    frame.extend_from_slice(&payload);
    frame
}
