//! # RESP Sync Client
//!
//! Purpose: Provide a lightweight, blocking Redis-compatible client built
//! directly on the RESP2 wire format: connections, typed commands,
//! MULTI/EXEC transactions, pub/sub and a typed object mapper.
//!
//! ## Design Principles
//! 1. **Single Owner**: A `Connection` belongs to one caller; concurrency means
//!    more connections, not shared ones.
//! 2. **No Hidden Policy**: Nothing reconnects or retries behind the caller's
//!    back.
//! 3. **Minimal Allocation**: Reuse buffers for RESP framing and parsing.
//! 4. **Typed Edges**: Replies are converted through `FromReply`, so a shape
//!    mismatch is a protocol error naming both kinds.

mod client;
mod config;
mod connection;
mod error;
mod pubsub;
mod reply;
mod transaction;
mod typed;

pub use client::{Client, ListRef};
pub use config::ClientConfig;
pub use connection::{Connection, ShutdownHandle};
pub use error::{ClientError, ClientResult, ErrorKind};
pub use pubsub::{MessageHandler, Subscription, SubscriptionCanceller, SubscriptionTask};
pub use reply::FromReply;
pub use transaction::Transaction;
pub use typed::{Entity, JsonCodec, TypedClient, ValueCodec};

pub use resp_common::{Command, ProtocolError, Reply, ReplyKind, ToArg};
