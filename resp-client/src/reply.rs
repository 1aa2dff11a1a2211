//! # Reply Conversion
//!
//! `FromReply` maps a decoded `Reply` onto the Rust type a command method
//! promises. Error replies never reach these impls; the client turns them into
//! `ClientError::Server` first.

use resp_common::{ProtocolError, Reply};

/// Conversion from a decoded reply.
pub trait FromReply: Sized {
    fn from_reply(reply: Reply) -> Result<Self, ProtocolError>;
}

impl FromReply for Reply {
    fn from_reply(reply: Reply) -> Result<Self, ProtocolError> {
        Ok(reply)
    }
}

/// Any status reply.
impl FromReply for () {
    fn from_reply(reply: Reply) -> Result<Self, ProtocolError> {
        match reply {
            Reply::Simple(_) => Ok(()),
            other => Err(ProtocolError::unexpected("status", other.kind())),
        }
    }
}

/// Status replies are `true`; a null bulk (e.g. a refused conditional SET) is
/// `false`.
impl FromReply for bool {
    fn from_reply(reply: Reply) -> Result<Self, ProtocolError> {
        match reply {
            Reply::Simple(_) => Ok(true),
            Reply::Bulk(None) => Ok(false),
            other => Err(ProtocolError::unexpected("status", other.kind())),
        }
    }
}

impl FromReply for i64 {
    fn from_reply(reply: Reply) -> Result<Self, ProtocolError> {
        match reply {
            Reply::Integer(value) => Ok(value),
            other => Err(ProtocolError::unexpected("integer", other.kind())),
        }
    }
}

impl FromReply for Vec<u8> {
    fn from_reply(reply: Reply) -> Result<Self, ProtocolError> {
        match reply {
            Reply::Bulk(Some(data)) | Reply::Simple(data) => Ok(data),
            other => Err(ProtocolError::unexpected("bulk string", other.kind())),
        }
    }
}

impl FromReply for String {
    fn from_reply(reply: Reply) -> Result<Self, ProtocolError> {
        let data = Vec::<u8>::from_reply(reply)?;
        String::from_utf8(data).map_err(|_| ProtocolError::InvalidUtf8("bulk string"))
    }
}

/// Null bulk strings and null arrays become `None`.
impl<T: FromReply> FromReply for Option<T> {
    fn from_reply(reply: Reply) -> Result<Self, ProtocolError> {
        match reply {
            Reply::Bulk(None) | Reply::Array(None) => Ok(None),
            other => T::from_reply(other).map(Some),
        }
    }
}

macro_rules! vec_from_reply {
    ($($ty:ty),*) => {
        $(
            /// Array replies, element by element; a null array is empty.
            impl FromReply for Vec<$ty> {
                fn from_reply(reply: Reply) -> Result<Self, ProtocolError> {
                    match reply {
                        Reply::Array(Some(items)) => items.into_iter().map(<$ty>::from_reply).collect(),
                        Reply::Array(None) => Ok(Vec::new()),
                        other => Err(ProtocolError::unexpected("array", other.kind())),
                    }
                }
            }
        )*
    };
}

vec_from_reply!(Vec<u8>, String, i64, Reply, Option<Vec<u8>>);
