//! # Protocol Errors
//!
//! Errors raised while framing or interpreting RESP2 data. These never carry
//! IO failures; the transport layer owns those.

use thiserror::Error;

use crate::types::ReplyKind;

/// A malformed frame or a reply whose shape does not fit the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// The leading type marker is not one of `+ - : $ *`.
    #[error("unknown reply type byte {0:#04x}")]
    UnknownType(u8),
    /// A payload was not followed by `\r\n`.
    #[error("missing CRLF terminator")]
    MissingCrlf,
    /// Integer text could not be parsed as a signed 64-bit value.
    #[error("invalid integer {0:?}")]
    InvalidInteger(String),
    /// A bulk or array length below -1.
    #[error("invalid {what} length {len}")]
    InvalidLength { what: &'static str, len: i64 },
    /// A declared length above the decoder's allocation limit.
    #[error("{what} length {len} exceeds limit {limit}")]
    TooLarge {
        what: &'static str,
        len: i64,
        limit: usize,
    },
    /// Arrays nested deeper than the decoder allows.
    #[error("array nesting exceeds depth limit {limit}")]
    TooDeep { limit: usize },
    /// The reply decoded fine but is not the kind the caller asked for.
    #[error("unexpected reply: expected {expected}, got {actual}")]
    UnexpectedReply {
        expected: &'static str,
        actual: ReplyKind,
    },
    /// An aggregate reply carried the wrong number of elements.
    #[error("expected {expected} replies, got {actual}")]
    ReplyCountMismatch { expected: usize, actual: usize },
    /// A pub/sub push whose leading element is not a known event name.
    #[error("unexpected push event {0:?}")]
    UnexpectedPush(String),
    /// Text payload was not valid UTF-8.
    #[error("invalid utf-8 in {0}")]
    InvalidUtf8(&'static str),
    /// An inbound request was not a non-empty array of bulk strings.
    #[error("invalid request: {0}")]
    InvalidRequest(&'static str),
}

impl ProtocolError {
    /// Shorthand for a reply-kind mismatch.
    pub fn unexpected(expected: &'static str, actual: ReplyKind) -> Self {
        ProtocolError::UnexpectedReply { expected, actual }
    }
}

/// Outcome of a failed decode attempt.
///
/// `Incomplete` is not fatal: the caller refills its buffer and retries from
/// the same starting offset.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("incomplete frame")]
    Incomplete,
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
