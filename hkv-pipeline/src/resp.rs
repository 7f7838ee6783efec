//! # RESP2 Encoding and Parsing
//!
//! Purpose: Encode client commands and parse server responses, keeping
//! allocations under control.
//!
//! ## Design Principles
//! 1. **State-Free Parsing**: Responses are parsed top-down with minimal state.
//! 2. **Buffer Reuse**: Caller provides buffers to avoid per-call allocations.
//! 3. **Binary-Safe**: Bulk strings are treated as raw bytes.
//! 4. **Fail Fast**: Invalid framing returns protocol errors immediately.
//! 5. **One Reply Per Call**: `read_response` consumes exactly one top-level
//!    value so pipelined replies stay aligned with their commands.

use std::io::{self, BufRead, Read};

use bytes::BufMut;

use crate::error::{ClientError, ClientResult};

/// RESP response value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// +OK or +PONG style responses.
    Simple(Vec<u8>),
    /// -ERR ... responses.
    Error(Vec<u8>),
    /// :123 responses.
    Integer(i64),
    /// $... bulk strings, with None for null.
    Bulk(Option<Vec<u8>>),
    /// *... arrays.
    Array(Vec<RespValue>),
}

impl RespValue {
    /// Converts an error reply into `ClientError::Server`, passing other values through.
    pub fn into_result(self) -> ClientResult<RespValue> {
        match self {
            RespValue::Error(message) => Err(ClientError::Server { message }),
            other => Ok(other),
        }
    }
}

/// Encodes a RESP2 array command into the provided buffer.
pub fn encode_command<A, B>(args: &[A], out: &mut B)
where
    A: AsRef<[u8]>,
    B: BufMut,
{
    out.put_u8(b'*');
    push_usize(out, args.len());
    out.put_slice(b"\r\n");
    for arg in args {
        let arg = arg.as_ref();
        out.put_u8(b'$');
        push_usize(out, arg.len());
        out.put_slice(b"\r\n");
        out.put_slice(arg);
        out.put_slice(b"\r\n");
    }
}

/// Largest bulk string accepted from a peer (matches Redis' default
/// `proto-max-bulk-len`).
pub const MAX_BULK_LEN: usize = 512 * 1024 * 1024;
/// Largest array length accepted from a peer.
pub const MAX_ARRAY_LEN: usize = 1 << 24;
/// Deepest array nesting accepted from a peer.
pub const MAX_DEPTH: usize = 32;
/// Longest header or simple-string line accepted from a peer.
pub const MAX_LINE_LEN: usize = 1024 * 1024;

// Never reserve more than this up front; the rest grows as bytes arrive.
const PREALLOC_LIMIT: usize = 64 * 1024;
const ARRAY_PREALLOC_LIMIT: usize = 64;

/// Reads one RESP value from the buffered reader.
///
/// Lengths announced by the peer are checked against `MAX_BULK_LEN` and
/// `MAX_ARRAY_LEN` before anything is allocated; oversized or otherwise
/// malformed headers yield `ClientError::Protocol`.
pub fn read_response<R: BufRead>(reader: &mut R, line_buf: &mut Vec<u8>) -> ClientResult<RespValue> {
    read_value(reader, line_buf, 0)
}

fn read_value<R: BufRead>(reader: &mut R, line_buf: &mut Vec<u8>, depth: usize) -> ClientResult<RespValue> {
    read_line(reader, line_buf)?;
    let (&marker, body) = line_buf.split_first().ok_or(ClientError::Protocol)?;

    match marker {
        b'+' => Ok(RespValue::Simple(body.to_vec())),
        b'-' => Ok(RespValue::Error(body.to_vec())),
        b':' => parse_int(body).map(RespValue::Integer),
        b'$' => match parse_len(body, MAX_BULK_LEN)? {
            None => Ok(RespValue::Bulk(None)),
            Some(len) => read_bulk(reader, len).map(|data| RespValue::Bulk(Some(data))),
        },
        b'*' => match parse_len(body, MAX_ARRAY_LEN)? {
            // Null arrays carry no payload; RESP2 clients surface them as empty.
            None => Ok(RespValue::Array(Vec::new())),
            Some(len) => read_array(reader, line_buf, len, depth),
        },
        _ => Err(ClientError::Protocol),
    }
}

fn read_bulk<R: BufRead>(reader: &mut R, len: usize) -> ClientResult<Vec<u8>> {
    let mut data = Vec::with_capacity(len.min(PREALLOC_LIMIT));
    reader.by_ref().take(len as u64).read_to_end(&mut data)?;
    if data.len() < len {
        return Err(unexpected_eof());
    }

    let mut crlf = [0u8; 2];
    reader.read_exact(&mut crlf)?;
    if &crlf != b"\r\n" {
        return Err(ClientError::Protocol);
    }
    Ok(data)
}

fn read_array<R: BufRead>(
    reader: &mut R,
    line_buf: &mut Vec<u8>,
    len: usize,
    depth: usize,
) -> ClientResult<RespValue> {
    if depth >= MAX_DEPTH {
        return Err(ClientError::Protocol);
    }
    let mut items = Vec::with_capacity(len.min(ARRAY_PREALLOC_LIMIT));
    for _ in 0..len {
        items.push(read_value(reader, line_buf, depth + 1)?);
    }
    Ok(RespValue::Array(items))
}

/// Reads one CRLF-terminated line into `buf`, without the terminator.
fn read_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> ClientResult<()> {
    buf.clear();
    let read = reader.by_ref().take(MAX_LINE_LEN as u64).read_until(b'\n', buf)?;
    if read == 0 {
        return Err(unexpected_eof());
    }
    if buf.last() != Some(&b'\n') {
        // Either the line limit was hit or the peer went away mid-line.
        return Err(if read >= MAX_LINE_LEN {
            ClientError::Protocol
        } else {
            unexpected_eof()
        });
    }
    if !buf.ends_with(b"\r\n") {
        return Err(ClientError::Protocol);
    }
    buf.truncate(buf.len() - 2);
    Ok(())
}

fn unexpected_eof() -> ClientError {
    io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed by peer").into()
}

/// Parses a signed decimal, rejecting overflow instead of saturating.
fn parse_int(text: &[u8]) -> ClientResult<i64> {
    let (negative, digits) = match text.split_first() {
        Some((b'-', rest)) => (true, rest),
        _ => (false, text),
    };
    if digits.is_empty() {
        return Err(ClientError::Protocol);
    }
    digits.iter().try_fold(0i64, |acc, &b| {
        if !b.is_ascii_digit() {
            return Err(ClientError::Protocol);
        }
        let digit = i64::from(b - b'0');
        let shifted = acc.checked_mul(10);
        let next = if negative {
            shifted.and_then(|v| v.checked_sub(digit))
        } else {
            shifted.and_then(|v| v.checked_add(digit))
        };
        next.ok_or(ClientError::Protocol)
    })
}

/// Parses a bulk/array length header. `-1` is null; other negatives and
/// values above `max` are framing errors.
fn parse_len(text: &[u8], max: usize) -> ClientResult<Option<usize>> {
    match parse_int(text)? {
        -1 => Ok(None),
        len if len < 0 => Err(ClientError::Protocol),
        len => match usize::try_from(len) {
            Ok(len) if len <= max => Ok(Some(len)),
            _ => Err(ClientError::Protocol),
        },
    }
}

fn push_usize<B: BufMut>(out: &mut B, mut value: usize) {
    // Write digits into a small stack buffer to avoid heap allocations.
    let mut buf = [0u8; 20];
    let mut len = 0;
    if value == 0 {
        buf[0] = b'0';
        len = 1;
    } else {
        while value > 0 {
            buf[len] = b'0' + (value % 10) as u8;
            value /= 10;
            len += 1;
        }
    }
    buf[..len].reverse();
    out.put_slice(&buf[..len]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    use bytes::BytesMut;

    fn parse(input: &[u8]) -> ClientResult<RespValue> {
        let mut reader = Cursor::new(input.to_vec());
        let mut line = Vec::new();
        read_response(&mut reader, &mut line)
    }

    #[test]
    fn encodes_command() {
        let mut buf = Vec::new();
        encode_command(&[&b"GET"[..], &b"key"[..]], &mut buf);
        assert_eq!(&buf, b"*2\r\n$3\r\nGET\r\n$3\r\nkey\r\n");
    }

    #[test]
    fn encodes_into_bytes_mut() {
        let mut buf = BytesMut::new();
        let value = vec![b'x'; 12];
        encode_command(&[b"SET".to_vec(), b"k".to_vec(), value], &mut buf);
        assert_eq!(&buf[..], b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$12\r\nxxxxxxxxxxxx\r\n");
    }

    #[test]
    fn parses_simple_string() {
        assert_eq!(parse(b"+OK\r\n").unwrap(), RespValue::Simple(b"OK".to_vec()));
    }

    #[test]
    fn parses_bulk_string() {
        assert_eq!(
            parse(b"$5\r\nhello\r\n").unwrap(),
            RespValue::Bulk(Some(b"hello".to_vec()))
        );
    }

    #[test]
    fn parses_null_bulk_string() {
        assert_eq!(parse(b"$-1\r\n").unwrap(), RespValue::Bulk(None));
    }

    #[test]
    fn parses_integer() {
        assert_eq!(parse(b":42\r\n").unwrap(), RespValue::Integer(42));
        assert_eq!(parse(b":-2\r\n").unwrap(), RespValue::Integer(-2));
    }

    #[test]
    fn parses_error() {
        assert_eq!(parse(b"-ERR bad\r\n").unwrap(), RespValue::Error(b"ERR bad".to_vec()));
    }

    #[test]
    fn parses_nested_array() {
        let resp = parse(b"*2\r\n:1\r\n*1\r\n$1\r\na\r\n").unwrap();
        assert_eq!(
            resp,
            RespValue::Array(vec![
                RespValue::Integer(1),
                RespValue::Array(vec![RespValue::Bulk(Some(b"a".to_vec()))]),
            ])
        );
    }

    #[test]
    fn reads_exactly_one_reply_per_call() {
        let mut reader = Cursor::new(b"+OK\r\n:7\r\n$-1\r\n".to_vec());
        let mut line = Vec::new();
        assert_eq!(read_response(&mut reader, &mut line).unwrap(), RespValue::Simple(b"OK".to_vec()));
        assert_eq!(read_response(&mut reader, &mut line).unwrap(), RespValue::Integer(7));
        assert_eq!(read_response(&mut reader, &mut line).unwrap(), RespValue::Bulk(None));
    }

    #[test]
    fn bad_framing_is_protocol_error() {
        assert!(matches!(parse(b"?what\r\n"), Err(ClientError::Protocol)));
        assert!(matches!(parse(b":12x\r\n"), Err(ClientError::Protocol)));
        assert!(matches!(parse(b"+OK\n"), Err(ClientError::Protocol)));
    }

    #[test]
    fn eof_is_transport_error() {
        let err = parse(b"").unwrap_err();
        assert!(err.is_transport());
        let err = parse(b"$5\r\nhe").unwrap_err();
        assert!(err.is_transport());
    }

    #[test]
    fn oversized_bulk_header_is_rejected_without_allocating() {
        assert!(matches!(parse(b"$9223372036854775807\r\n"), Err(ClientError::Protocol)));
        let too_big = format!("${}\r\n", MAX_BULK_LEN + 1);
        assert!(matches!(parse(too_big.as_bytes()), Err(ClientError::Protocol)));
    }

    #[test]
    fn oversized_array_header_is_rejected() {
        assert!(matches!(parse(b"*9223372036854775807\r\n"), Err(ClientError::Protocol)));
        let too_long = format!("*{}\r\n", MAX_ARRAY_LEN + 1);
        assert!(matches!(parse(too_long.as_bytes()), Err(ClientError::Protocol)));
    }

    #[test]
    fn large_announced_array_with_short_body_hits_eof() {
        // Within limits, so the reader waits for elements that never come.
        let err = parse(b"*1000000\r\n:1\r\n").unwrap_err();
        assert!(err.is_transport());
    }

    #[test]
    fn only_minus_one_means_null() {
        assert_eq!(parse(b"*-1\r\n").unwrap(), RespValue::Array(Vec::new()));
        assert!(matches!(parse(b"$-5\r\n"), Err(ClientError::Protocol)));
        assert!(matches!(parse(b"*-5\r\n"), Err(ClientError::Protocol)));
        assert!(matches!(parse(b"$\r\n"), Err(ClientError::Protocol)));
    }

    #[test]
    fn integer_overflow_is_protocol_error() {
        assert!(matches!(parse(b":9223372036854775808\r\n"), Err(ClientError::Protocol)));
        assert_eq!(
            parse(b":-9223372036854775808\r\n").unwrap(),
            RespValue::Integer(i64::MIN)
        );
        assert!(matches!(parse(b":-\r\n"), Err(ClientError::Protocol)));
    }

    #[test]
    fn nesting_beyond_limit_is_rejected() {
        let mut deep = b"*1\r\n".repeat(MAX_DEPTH + 1);
        deep.extend_from_slice(b":1\r\n");
        assert!(matches!(parse(&deep), Err(ClientError::Protocol)));

        let mut ok = b"*1\r\n".repeat(MAX_DEPTH);
        ok.extend_from_slice(b":1\r\n");
        assert!(parse(&ok).is_ok());
    }

    #[test]
    fn overlong_line_is_protocol_error() {
        let mut line = vec![b'+'];
        line.resize(MAX_LINE_LEN + 8, b'a');
        assert!(matches!(parse(&line), Err(ClientError::Protocol)));
    }

    #[test]
    fn eof_mid_line_is_transport_error() {
        assert!(parse(b"+OK").unwrap_err().is_transport());
    }

    #[test]
    fn parser_keeps_alignment_after_rejected_header() {
        let mut reader = Cursor::new(b"$9223372036854775807\r\n+OK\r\n".to_vec());
        let mut line = Vec::new();
        assert!(matches!(read_response(&mut reader, &mut line), Err(ClientError::Protocol)));
        assert_eq!(read_response(&mut reader, &mut line).unwrap(), RespValue::Simple(b"OK".to_vec()));
    }

    #[test]
    fn error_reply_converts_to_server_error() {
        let err = RespValue::Error(b"ERR nope".to_vec()).into_result().unwrap_err();
        assert!(matches!(err, ClientError::Server { ref message } if message == b"ERR nope"));
        assert_eq!(RespValue::Integer(1).into_result().unwrap(), RespValue::Integer(1));
    }
}
