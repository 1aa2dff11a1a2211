//! # RESP2 Encoding and Parsing
//!
//! Purpose: Encode commands and replies, and decode replies from a byte
//! cursor without ever blocking on IO.
//!
//! ## Design Principles
//! 1. **Refill and Retry**: Decoding a short buffer returns
//!    `DecodeError::Incomplete`; the caller reads more bytes and retries from
//!    the same offset.
//! 2. **Buffer Reuse**: Encoders append into caller-provided buffers.
//! 3. **Binary-Safe**: Bulk strings are treated as raw bytes.
//! 4. **Fail Fast**: Invalid framing returns protocol errors immediately.
//!
//! ## Frame Layout
//!
//! ```text
//! request:  *<argc>\r\n $<len>\r\n<arg>\r\n  ... (one bulk string per argument)
//! replies:  +<text>\r\n  -<text>\r\n  :<i64>\r\n  $<len>\r\n<bytes>\r\n  *<n>\r\n<reply>...
//! nulls:    $-1\r\n      *-1\r\n
//! ```

use std::io::Cursor;

use crate::error::{DecodeError, ProtocolError};
use crate::types::{Command, Reply};

/// Largest bulk payload accepted by the decoder (matches Redis' 512 MiB).
pub const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// Largest declared array length accepted by the decoder.
pub const MAX_ARRAY_LEN: usize = 1024 * 1024;

/// Deepest array nesting accepted by the decoder.
pub const MAX_DEPTH: usize = 512;

/// Encodes a command as a RESP array of bulk strings into `out`.
pub fn encode_command(cmd: &Command, out: &mut Vec<u8>) {
    out.reserve(cmd.encoded_len());
    out.push(b'*');
    push_usize(out, cmd.len());
    out.extend_from_slice(b"\r\n");
    for arg in cmd.as_slice() {
        out.push(b'$');
        push_usize(out, arg.len());
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(arg);
        out.extend_from_slice(b"\r\n");
    }
}

impl Reply {
    /// Serializes this reply in RESP2 wire format.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            Reply::Simple(text) => {
                out.push(b'+');
                out.extend_from_slice(text);
                out.extend_from_slice(b"\r\n");
            }
            Reply::Error(message) => {
                out.push(b'-');
                out.extend_from_slice(message);
                out.extend_from_slice(b"\r\n");
            }
            Reply::Integer(value) => {
                out.push(b':');
                push_i64(out, *value);
                out.extend_from_slice(b"\r\n");
            }
            Reply::Bulk(Some(data)) => {
                out.push(b'$');
                push_usize(out, data.len());
                out.extend_from_slice(b"\r\n");
                out.extend_from_slice(data);
                out.extend_from_slice(b"\r\n");
            }
            Reply::Bulk(None) => out.extend_from_slice(b"$-1\r\n"),
            Reply::Array(Some(items)) => {
                out.push(b'*');
                push_usize(out, items.len());
                out.extend_from_slice(b"\r\n");
                for item in items {
                    item.encode_into(out);
                }
            }
            Reply::Array(None) => out.extend_from_slice(b"*-1\r\n"),
        }
    }
}

/// Decodes exactly one reply starting at the cursor position.
///
/// On success the cursor sits just past the decoded frame, so its position is
/// the number of bytes consumed. On `Incomplete` the cursor position is
/// meaningless and the caller must retry from the original offset.
pub fn decode(src: &mut Cursor<&[u8]>) -> Result<Reply, DecodeError> {
    decode_nested(src, 0)
}

fn decode_nested(src: &mut Cursor<&[u8]>, depth: usize) -> Result<Reply, DecodeError> {
    match get_u8(src)? {
        b'+' => Ok(Reply::Simple(get_line(src)?.to_vec())),
        b'-' => Ok(Reply::Error(get_line(src)?.to_vec())),
        b':' => Ok(Reply::Integer(parse_i64(get_line(src)?)?)),
        b'$' => {
            let len = parse_i64(get_line(src)?)?;
            let Some(len) = checked_len("bulk", len, MAX_BULK_LEN)? else {
                return Ok(Reply::Bulk(None));
            };
            let data = take(src, len)?.to_vec();
            expect_crlf(src)?;
            Ok(Reply::Bulk(Some(data)))
        }
        b'*' => {
            if depth >= MAX_DEPTH {
                return Err(ProtocolError::TooDeep { limit: MAX_DEPTH }.into());
            }
            let len = parse_i64(get_line(src)?)?;
            let Some(len) = checked_len("array", len, MAX_ARRAY_LEN)? else {
                return Ok(Reply::Array(None));
            };
            let mut items = Vec::with_capacity(len.min(64));
            for _ in 0..len {
                items.push(decode_nested(src, depth + 1)?);
            }
            Ok(Reply::Array(Some(items)))
        }
        other => Err(ProtocolError::UnknownType(other).into()),
    }
}

/// Decodes one inbound request (an array of bulk strings) into a `Command`.
pub fn decode_command(src: &mut Cursor<&[u8]>) -> Result<Command, DecodeError> {
    let items = match decode(src)? {
        Reply::Array(Some(items)) => items,
        _ => return Err(ProtocolError::InvalidRequest("expected array").into()),
    };

    let mut args = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Reply::Bulk(Some(data)) => args.push(data),
            _ => return Err(ProtocolError::InvalidRequest("expected bulk string").into()),
        }
    }
    Ok(Command::from_args(args)?)
}

fn checked_len(what: &'static str, len: i64, limit: usize) -> Result<Option<usize>, ProtocolError> {
    match len {
        -1 => Ok(None),
        len if len < -1 => Err(ProtocolError::InvalidLength { what, len }),
        len if len as u64 > limit as u64 => Err(ProtocolError::TooLarge { what, len, limit }),
        len => Ok(Some(len as usize)),
    }
}

fn get_u8(src: &mut Cursor<&[u8]>) -> Result<u8, DecodeError> {
    let pos = src.position() as usize;
    let byte = *src.get_ref().get(pos).ok_or(DecodeError::Incomplete)?;
    src.set_position((pos + 1) as u64);
    Ok(byte)
}

/// Returns the bytes up to the next CRLF and moves past it.
fn get_line<'a>(src: &mut Cursor<&'a [u8]>) -> Result<&'a [u8], DecodeError> {
    let buf: &'a [u8] = *src.get_ref();
    let start = src.position() as usize;
    let rest = buf.get(start..).ok_or(DecodeError::Incomplete)?;
    let idx = rest
        .windows(2)
        .position(|pair| pair == b"\r\n")
        .ok_or(DecodeError::Incomplete)?;
    src.set_position((start + idx + 2) as u64);
    Ok(&rest[..idx])
}

fn take<'a>(src: &mut Cursor<&'a [u8]>, len: usize) -> Result<&'a [u8], DecodeError> {
    let buf: &'a [u8] = *src.get_ref();
    let start = src.position() as usize;
    let end = start.checked_add(len).ok_or(DecodeError::Incomplete)?;
    let data = buf.get(start..end).ok_or(DecodeError::Incomplete)?;
    src.set_position(end as u64);
    Ok(data)
}

fn expect_crlf(src: &mut Cursor<&[u8]>) -> Result<(), DecodeError> {
    if take(src, 2)? != b"\r\n" {
        return Err(ProtocolError::MissingCrlf.into());
    }
    Ok(())
}

/// Parses signed decimal text, rejecting empty input, stray bytes and overflow.
pub fn parse_i64(data: &[u8]) -> Result<i64, ProtocolError> {
    let invalid = || ProtocolError::InvalidInteger(String::from_utf8_lossy(data).into_owned());

    let (negative, digits) = match data {
        [b'-', rest @ ..] => (true, rest),
        _ => (false, data),
    };
    if digits.is_empty() {
        return Err(invalid());
    }

    // Accumulate toward the sign so i64::MIN parses without overflow.
    let mut value: i64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return Err(invalid());
        }
        let digit = (b - b'0') as i64;
        value = value.checked_mul(10).ok_or_else(invalid)?;
        value = if negative {
            value.checked_sub(digit)
        } else {
            value.checked_add(digit)
        }
        .ok_or_else(invalid)?;
    }
    Ok(value)
}

fn push_usize(out: &mut Vec<u8>, mut value: usize) {
    // Digits land in a stack buffer to skip a heap allocation.
    let mut buf = [0u8; 20];
    let mut idx = buf.len();
    loop {
        idx -= 1;
        buf[idx] = b'0' + (value % 10) as u8;
        value /= 10;
        if value == 0 {
            break;
        }
    }
    out.extend_from_slice(&buf[idx..]);
}

fn push_i64(out: &mut Vec<u8>, value: i64) {
    if value < 0 {
        out.push(b'-');
    }
    let mut magnitude = value.unsigned_abs();
    let mut buf = [0u8; 20];
    let mut idx = buf.len();
    loop {
        idx -= 1;
        buf[idx] = b'0' + (magnitude % 10) as u8;
        magnitude /= 10;
        if magnitude == 0 {
            break;
        }
    }
    out.extend_from_slice(&buf[idx..]);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(bytes: &[u8]) -> (Result<Reply, DecodeError>, usize) {
        let mut cursor = Cursor::new(bytes);
        let result = decode(&mut cursor);
        (result, cursor.position() as usize)
    }

    #[test]
    fn encodes_command() {
        let mut buf = Vec::new();
        encode_command(&Command::new("GET").arg("key"), &mut buf);
        assert_eq!(&buf, b"*2\r\n$3\r\nGET\r\n$3\r\nkey\r\n");
    }

    #[test]
    fn encoded_length_follows_framing_rules() {
        let long = vec![b'x'; 600];
        let cmd = Command::new("SET").arg(b"").arg(b"a").arg(&long);
        let mut buf = Vec::new();
        encode_command(&cmd, &mut buf);

        // "*4\r\n" is 3 bytes of header plus the argc digit.
        let per_arg: usize = cmd
            .as_slice()
            .iter()
            .map(|arg| format!("${}\r\n", arg.len()).len() + arg.len() + 2)
            .sum();
        assert_eq!(buf.len(), 3 + 1 + per_arg);
        assert_eq!(buf.len(), cmd.encoded_len());
        assert!(buf.starts_with(b"*4\r\n$3\r\nSET\r\n$0\r\n\r\n$1\r\na\r\n$600\r\n"));
    }

    #[test]
    fn parses_simple_string() {
        let (reply, used) = decode_all(b"+OK\r\n");
        assert_eq!(reply.unwrap(), Reply::Simple(b"OK".to_vec()));
        assert_eq!(used, 5);
    }

    #[test]
    fn parses_error_by_marker() {
        let (reply, _) = decode_all(b"-ERR bad\r\n");
        assert_eq!(reply.unwrap(), Reply::Error(b"ERR bad".to_vec()));

        // A simple string that merely looks like an error stays a status.
        let (reply, _) = decode_all(b"+ERR not really\r\n");
        assert_eq!(reply.unwrap(), Reply::Simple(b"ERR not really".to_vec()));
    }

    #[test]
    fn parses_integers() {
        assert_eq!(decode_all(b":42\r\n").0.unwrap(), Reply::Integer(42));
        assert_eq!(decode_all(b":-7\r\n").0.unwrap(), Reply::Integer(-7));
        assert_eq!(
            decode_all(b":-9223372036854775808\r\n").0.unwrap(),
            Reply::Integer(i64::MIN)
        );
    }

    #[test]
    fn rejects_malformed_integers() {
        for input in [&b":12a\r\n"[..], b":\r\n", b":-\r\n", b":9223372036854775808\r\n"] {
            let (reply, _) = decode_all(input);
            assert!(
                matches!(reply, Err(DecodeError::Protocol(ProtocolError::InvalidInteger(_)))),
                "input {:?}",
                String::from_utf8_lossy(input)
            );
        }
    }

    #[test]
    fn parses_bulk_strings() {
        assert_eq!(
            decode_all(b"$5\r\nhello\r\n").0.unwrap(),
            Reply::Bulk(Some(b"hello".to_vec()))
        );
        assert_eq!(decode_all(b"$0\r\n\r\n").0.unwrap(), Reply::Bulk(Some(Vec::new())));
        assert_eq!(decode_all(b"$-1\r\n").0.unwrap(), Reply::Bulk(None));
    }

    #[test]
    fn bulk_payload_may_contain_crlf() {
        let (reply, used) = decode_all(b"$4\r\na\r\nb\r\n");
        assert_eq!(reply.unwrap(), Reply::Bulk(Some(b"a\r\nb".to_vec())));
        assert_eq!(used, 10);
    }

    #[test]
    fn rejects_bad_bulk_framing() {
        assert_eq!(
            decode_all(b"$3\r\nabcX\r\n").0,
            Err(DecodeError::Protocol(ProtocolError::MissingCrlf))
        );
        assert_eq!(
            decode_all(b"$-2\r\n").0,
            Err(DecodeError::Protocol(ProtocolError::InvalidLength { what: "bulk", len: -2 }))
        );
    }

    #[test]
    fn parses_nested_arrays() {
        let (reply, used) = decode_all(b"*2\r\n*1\r\n:1\r\n$3\r\nfoo\r\n");
        assert_eq!(
            reply.unwrap(),
            Reply::array(vec![
                Reply::array(vec![Reply::Integer(1)]),
                Reply::bulk("foo"),
            ])
        );
        assert_eq!(used, 21);
        assert_eq!(decode_all(b"*-1\r\n").0.unwrap(), Reply::Array(None));
        assert_eq!(decode_all(b"*0\r\n").0.unwrap(), Reply::array(Vec::new()));
    }

    #[test]
    fn short_input_is_incomplete() {
        for input in [
            &b""[..],
            b"+OK",
            b"+OK\r",
            b"$5\r\nhel",
            b"$5\r\nhello",
            b"$5\r\nhello\r",
            b"*2\r\n:1\r\n",
            b"*2\r\n:1\r\n$3\r\nfo",
        ] {
            assert_eq!(decode_all(input).0, Err(DecodeError::Incomplete), "{input:?}");
        }
    }

    #[test]
    fn consumes_exactly_one_reply() {
        let bytes = b":1\r\n:2\r\n";
        let mut cursor = Cursor::new(&bytes[..]);
        assert_eq!(decode(&mut cursor).unwrap(), Reply::Integer(1));
        assert_eq!(cursor.position(), 4);
        assert_eq!(decode(&mut cursor).unwrap(), Reply::Integer(2));
        assert_eq!(cursor.position(), 8);
    }

    #[test]
    fn rejects_unknown_type_byte() {
        assert_eq!(
            decode_all(b"?what\r\n").0,
            Err(DecodeError::Protocol(ProtocolError::UnknownType(b'?')))
        );
    }

    #[test]
    fn rejects_oversized_array_before_allocating() {
        let (reply, _) = decode_all(b"*99999999\r\n");
        assert!(matches!(
            reply,
            Err(DecodeError::Protocol(ProtocolError::TooLarge { what: "array", .. }))
        ));
    }

    #[test]
    fn rejects_nesting_past_depth_limit() {
        let mut input = b"*1\r\n".repeat(20_000);
        input.extend_from_slice(b":1\r\n");
        assert_eq!(
            decode_all(&input).0,
            Err(DecodeError::Protocol(ProtocolError::TooDeep { limit: MAX_DEPTH }))
        );

        let mut input = b"*1\r\n".repeat(MAX_DEPTH);
        input.extend_from_slice(b":1\r\n");
        let (reply, used) = decode_all(&input);
        assert!(reply.is_ok());
        assert_eq!(used, input.len());
    }

    #[test]
    fn reply_encoding_decodes_back() {
        let reply = Reply::array(vec![
            Reply::status("QUEUED"),
            Reply::error("ERR nope"),
            Reply::Integer(-12),
            Reply::null(),
            Reply::Array(None),
        ]);
        let mut buf = Vec::new();
        reply.encode_into(&mut buf);
        assert_eq!(decode_all(&buf).0.unwrap(), reply);
    }

    #[test]
    fn decodes_inbound_command() {
        let mut buf = Vec::new();
        encode_command(&Command::new("LPUSH").arg("list").arg("a"), &mut buf);
        let mut cursor = Cursor::new(&buf[..]);
        let cmd = decode_command(&mut cursor).unwrap();
        assert!(cmd.is("lpush"));
        assert_eq!(cmd.len(), 3);

        let mut cursor = Cursor::new(&b":1\r\n"[..]);
        assert_eq!(
            decode_command(&mut cursor),
            Err(DecodeError::Protocol(ProtocolError::InvalidRequest("expected array")))
        );
    }
}
