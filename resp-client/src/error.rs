//! # Client Errors
//!
//! One error type for every client surface, classified by `ErrorKind` so
//! callers can branch on the failure family without matching variants.

use std::fmt;
use std::io;

use resp_common::ProtocolError;
use thiserror::Error;

/// Result type for the sync client.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by the sync client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Malformed frame or a reply of the wrong shape.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    /// Network or IO failure while connecting, reading or writing.
    #[error("connection error: {0}")]
    Connection(#[from] io::Error),
    /// The connection failed earlier and has not been reconnected.
    #[error("connection is closed after a previous failure")]
    ConnectionClosed,
    /// Server returned an error reply.
    #[error("server error: {}", String::from_utf8_lossy(.message))]
    Server { message: Vec<u8> },
    /// The server refused to execute a queued transaction.
    #[error("transaction aborted: {0}")]
    Transaction(String),
    /// The API was used out of order.
    #[error("usage error: {0}")]
    Usage(&'static str),
    /// Address could not be parsed or resolved.
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    /// A record could not be converted to or from its stored bytes.
    #[error("serialization error: {0}")]
    Serialization(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Serialization(Box::new(err))
    }
}

/// Failure families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Protocol,
    Connection,
    Server,
    Transaction,
    Usage,
    Config,
    Serialization,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Protocol => "protocol",
            ErrorKind::Connection => "connection",
            ErrorKind::Server => "server",
            ErrorKind::Transaction => "transaction",
            ErrorKind::Usage => "usage",
            ErrorKind::Config => "config",
            ErrorKind::Serialization => "serialization",
        };
        f.write_str(name)
    }
}

impl ClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::Protocol(_) => ErrorKind::Protocol,
            ClientError::Connection(_) | ClientError::ConnectionClosed => ErrorKind::Connection,
            ClientError::Server { .. } => ErrorKind::Server,
            ClientError::Transaction(_) => ErrorKind::Transaction,
            ClientError::Usage(_) => ErrorKind::Usage,
            ClientError::InvalidAddress(_) => ErrorKind::Config,
            ClientError::Serialization(_) => ErrorKind::Serialization,
        }
    }

    /// Builds the error for a server `-ERR` reply.
    pub(crate) fn server(message: Vec<u8>) -> Self {
        ClientError::Server { message }
    }
}
