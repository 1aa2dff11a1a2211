//! # Wire Types
//!
//! Purpose: Model RESP2 requests and replies as plain owned values.
//!
//! ## Design Principles
//! 1. **Binary-Safe**: Arguments and bulk payloads are raw bytes.
//! 2. **Build Once**: A `Command` is assembled by value and exposes no
//!    mutators afterwards.
//! 3. **Nullable Aggregates**: Null bulk strings and null arrays stay distinct
//!    from empty ones.

use std::fmt;

use crate::error::ProtocolError;

/// Anything that can be written as a single command argument.
pub trait ToArg {
    /// Appends the raw argument bytes to `out`.
    fn write_arg(&self, out: &mut Vec<u8>);
}

impl ToArg for [u8] {
    fn write_arg(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self);
    }
}

impl<const N: usize> ToArg for [u8; N] {
    fn write_arg(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self);
    }
}

impl ToArg for Vec<u8> {
    fn write_arg(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self);
    }
}

impl ToArg for str {
    fn write_arg(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.as_bytes());
    }
}

impl ToArg for String {
    fn write_arg(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.as_bytes());
    }
}

macro_rules! int_arg {
    ($($ty:ty),*) => {
        $(
            impl ToArg for $ty {
                fn write_arg(&self, out: &mut Vec<u8>) {
                    out.extend_from_slice(self.to_string().as_bytes());
                }
            }
        )*
    };
}

int_arg!(i32, i64, u32, u64, usize);

impl<T: ToArg + ?Sized> ToArg for &T {
    fn write_arg(&self, out: &mut Vec<u8>) {
        (**self).write_arg(out);
    }
}

/// A request: the command name followed by its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    args: Vec<Vec<u8>>,
}

impl Command {
    /// Starts a command with its name as the first argument.
    pub fn new(name: impl ToArg) -> Self {
        let mut first = Vec::new();
        name.write_arg(&mut first);
        Command { args: vec![first] }
    }

    /// Appends one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl ToArg) -> Self {
        let mut buf = Vec::new();
        arg.write_arg(&mut buf);
        self.args.push(buf);
        self
    }

    /// Appends every argument from an iterator.
    #[must_use]
    pub fn args<I>(mut self, args: I) -> Self
    where
        I: IntoIterator,
        I::Item: ToArg,
    {
        for arg in args {
            let mut buf = Vec::new();
            arg.write_arg(&mut buf);
            self.args.push(buf);
        }
        self
    }

    /// Builds a command from already-split arguments.
    ///
    /// # Errors
    /// Returns `ProtocolError::InvalidRequest` when `args` is empty.
    pub fn from_args(args: Vec<Vec<u8>>) -> Result<Self, ProtocolError> {
        if args.is_empty() {
            return Err(ProtocolError::InvalidRequest("empty command"));
        }
        Ok(Command { args })
    }

    /// The command name as sent on the wire.
    pub fn name(&self) -> &[u8] {
        &self.args[0]
    }

    /// Case-insensitive comparison against the command name.
    pub fn is(&self, name: &str) -> bool {
        self.name().eq_ignore_ascii_case(name.as_bytes())
    }

    /// All arguments, name included.
    pub fn as_slice(&self) -> &[Vec<u8>] {
        &self.args
    }

    /// Number of arguments, name included.
    pub fn len(&self) -> usize {
        self.args.len()
    }

    /// Always false; a command carries at least its name.
    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// Exact size of the encoded RESP array in bytes.
    pub fn encoded_len(&self) -> usize {
        let header = 1 + decimal_len(self.args.len()) + 2;
        self.args.iter().fold(header, |acc, arg| {
            acc + 1 + decimal_len(arg.len()) + 2 + arg.len() + 2
        })
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, arg) in self.args.iter().enumerate() {
            if idx > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}", String::from_utf8_lossy(arg))?;
        }
        Ok(())
    }
}

fn decimal_len(mut value: usize) -> usize {
    let mut len = 1;
    while value >= 10 {
        value /= 10;
        len += 1;
    }
    len
}

/// A decoded server reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `+OK` style status replies.
    Simple(Vec<u8>),
    /// `-ERR ...` replies, detected by the type marker alone.
    Error(Vec<u8>),
    /// `:123` replies.
    Integer(i64),
    /// `$...` bulk strings, `None` for `$-1`.
    Bulk(Option<Vec<u8>>),
    /// `*...` arrays, `None` for `*-1`.
    Array(Option<Vec<Reply>>),
}

impl Reply {
    pub fn ok() -> Self {
        Reply::Simple(b"OK".to_vec())
    }

    pub fn status(text: &str) -> Self {
        Reply::Simple(text.as_bytes().to_vec())
    }

    pub fn error(message: &str) -> Self {
        Reply::Error(message.as_bytes().to_vec())
    }

    pub fn bulk(data: impl Into<Vec<u8>>) -> Self {
        Reply::Bulk(Some(data.into()))
    }

    pub fn null() -> Self {
        Reply::Bulk(None)
    }

    pub fn array(items: Vec<Reply>) -> Self {
        Reply::Array(Some(items))
    }

    /// The variant tag, used in mismatch errors.
    pub fn kind(&self) -> ReplyKind {
        match self {
            Reply::Simple(_) => ReplyKind::SimpleString,
            Reply::Error(_) => ReplyKind::Error,
            Reply::Integer(_) => ReplyKind::Integer,
            Reply::Bulk(Some(_)) => ReplyKind::BulkString,
            Reply::Bulk(None) => ReplyKind::NullBulkString,
            Reply::Array(Some(_)) => ReplyKind::Array,
            Reply::Array(None) => ReplyKind::NullArray,
        }
    }

    /// True for a `+OK` status.
    pub fn is_ok(&self) -> bool {
        matches!(self, Reply::Simple(text) if text == b"OK")
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Reply::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Reply::Bulk(Some(data)) | Reply::Simple(data) => Some(data),
            _ => None,
        }
    }
}

/// Reply variant names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplyKind {
    SimpleString,
    Error,
    Integer,
    BulkString,
    NullBulkString,
    Array,
    NullArray,
}

impl fmt::Display for ReplyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReplyKind::SimpleString => "simple string",
            ReplyKind::Error => "error",
            ReplyKind::Integer => "integer",
            ReplyKind::BulkString => "bulk string",
            ReplyKind::NullBulkString => "null bulk string",
            ReplyKind::Array => "array",
            ReplyKind::NullArray => "null array",
        };
        f.write_str(name)
    }
}
