//! # Synchronous Client API
//!
//! Purpose: Expose a compact, blocking API for issuing Redis-compatible
//! commands over one owned `Connection`.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `Client` hides framing and reply conversion.
//! 2. **Borrow-Friendly API**: Keys and values are `AsRef<[u8]>`.
//! 3. **Fail Fast**: Server errors and shape mismatches surface immediately.
//! 4. **Raw Escape Hatch**: `query` runs any `Command` with a typed result.

use resp_common::{parse_i64, Command, Reply};

use crate::config::ClientConfig;
use crate::connection::Connection;
use crate::error::{ClientError, ClientResult};
use crate::reply::FromReply;
use crate::transaction::Transaction;
use crate::typed::{Entity, TypedClient};

/// Blocking client over a single connection.
#[derive(Debug)]
pub struct Client {
    conn: Connection,
}

impl Client {
    /// Connects to `addr` with default settings.
    pub fn connect(addr: impl Into<String>) -> ClientResult<Self> {
        Self::with_config(ClientConfig::new(addr))
    }

    /// Connects with a custom configuration.
    pub fn with_config(config: ClientConfig) -> ClientResult<Self> {
        Ok(Client {
            conn: Connection::open(config)?,
        })
    }

    /// Wraps an existing connection, e.g. one handed back by a subscription.
    pub fn from_connection(conn: Connection) -> Self {
        Client { conn }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    pub fn into_connection(self) -> Connection {
        self.conn
    }

    pub fn close(&mut self) -> ClientResult<()> {
        self.conn.close()
    }

    /// Runs any command and converts its reply.
    ///
    /// Error replies become `ClientError::Server`; a reply of the wrong shape
    /// becomes `ClientError::Protocol`.
    pub fn query<T: FromReply>(&mut self, cmd: &Command) -> ClientResult<T> {
        let reply = self.conn.exec(cmd)?;
        convert(reply)
    }

    /// Starts a MULTI/EXEC session bound to this client's connection.
    pub fn transaction(&mut self) -> Transaction<'_> {
        Transaction::new(&mut self.conn)
    }

    /// A list-shaped view of `key`.
    pub fn list(&mut self, key: impl AsRef<[u8]>) -> ListRef<'_> {
        ListRef {
            client: self,
            key: key.as_ref().to_vec(),
        }
    }

    /// Record storage for `T` using the default JSON codec.
    pub fn typed<T: Entity>(&mut self) -> TypedClient<'_, T> {
        TypedClient::new(self)
    }

    /// Pings the server. Returns the raw response payload.
    pub fn ping(&mut self) -> ClientResult<Vec<u8>> {
        self.query(&Command::new("PING"))
    }

    /// Fetches a value by key.
    ///
    /// Returns `Ok(None)` when the key is missing.
    pub fn get(&mut self, key: impl AsRef<[u8]>) -> ClientResult<Option<Vec<u8>>> {
        self.query(&Command::new("GET").arg(key.as_ref()))
    }

    /// Fetches a value and decodes it as UTF-8.
    pub fn get_string(&mut self, key: impl AsRef<[u8]>) -> ClientResult<Option<String>> {
        self.query(&Command::new("GET").arg(key.as_ref()))
    }

    /// Fetches a counter and parses its decimal text.
    pub fn get_i64(&mut self, key: impl AsRef<[u8]>) -> ClientResult<Option<i64>> {
        match self.get(key)? {
            Some(data) => Ok(Some(parse_i64(&data)?)),
            None => Ok(None),
        }
    }

    /// Sets a value. Returns true when the server acknowledged the write.
    pub fn set(&mut self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> ClientResult<bool> {
        self.query(&Command::new("SET").arg(key.as_ref()).arg(value.as_ref()))
    }

    /// Deletes keys. Returns how many existed.
    pub fn del<K: AsRef<[u8]>>(&mut self, keys: &[K]) -> ClientResult<i64> {
        require_args(keys, "DEL needs at least one key")?;
        self.query(&Command::new("DEL").args(keys.iter().map(|item| item.as_ref())))
    }

    /// Increments a counter by one. A missing key counts from zero.
    pub fn incr(&mut self, key: impl AsRef<[u8]>) -> ClientResult<i64> {
        self.query(&Command::new("INCR").arg(key.as_ref()))
    }

    /// Increments a counter by `delta`.
    pub fn incr_by(&mut self, key: impl AsRef<[u8]>, delta: i64) -> ClientResult<i64> {
        self.query(&Command::new("INCRBY").arg(key.as_ref()).arg(delta))
    }

    /// Prepends values. Returns the new list length.
    pub fn lpush<V: AsRef<[u8]>>(&mut self, key: impl AsRef<[u8]>, values: &[V]) -> ClientResult<i64> {
        require_args(values, "LPUSH needs at least one value")?;
        self.query(
            &Command::new("LPUSH")
                .arg(key.as_ref())
                .args(values.iter().map(|item| item.as_ref())),
        )
    }

    /// Appends values. Returns the new list length.
    pub fn rpush<V: AsRef<[u8]>>(&mut self, key: impl AsRef<[u8]>, values: &[V]) -> ClientResult<i64> {
        require_args(values, "RPUSH needs at least one value")?;
        self.query(
            &Command::new("RPUSH")
                .arg(key.as_ref())
                .args(values.iter().map(|item| item.as_ref())),
        )
    }

    /// Inclusive range; negative indexes count from the tail.
    pub fn lrange(&mut self, key: impl AsRef<[u8]>, start: i64, stop: i64) -> ClientResult<Vec<Vec<u8>>> {
        self.query(&Command::new("LRANGE").arg(key.as_ref()).arg(start).arg(stop))
    }

    /// Keeps only the inclusive range. `ltrim(key, -1, 0)` empties the list.
    pub fn ltrim(&mut self, key: impl AsRef<[u8]>, start: i64, stop: i64) -> ClientResult<bool> {
        self.query(&Command::new("LTRIM").arg(key.as_ref()).arg(start).arg(stop))
    }

    pub fn llen(&mut self, key: impl AsRef<[u8]>) -> ClientResult<i64> {
        self.query(&Command::new("LLEN").arg(key.as_ref()))
    }

    /// Adds set members. Returns how many were new.
    pub fn sadd<M: AsRef<[u8]>>(&mut self, key: impl AsRef<[u8]>, members: &[M]) -> ClientResult<i64> {
        require_args(members, "SADD needs at least one member")?;
        self.query(
            &Command::new("SADD")
                .arg(key.as_ref())
                .args(members.iter().map(|item| item.as_ref())),
        )
    }

    /// Removes set members. Returns how many were present.
    pub fn srem<M: AsRef<[u8]>>(&mut self, key: impl AsRef<[u8]>, members: &[M]) -> ClientResult<i64> {
        require_args(members, "SREM needs at least one member")?;
        self.query(
            &Command::new("SREM")
                .arg(key.as_ref())
                .args(members.iter().map(|item| item.as_ref())),
        )
    }

    pub fn smembers(&mut self, key: impl AsRef<[u8]>) -> ClientResult<Vec<Vec<u8>>> {
        self.query(&Command::new("SMEMBERS").arg(key.as_ref()))
    }

    /// Publishes a message. Returns how many subscribers received it.
    ///
    /// Never waits on subscribers; delivery is the server's job.
    pub fn publish(&mut self, channel: impl AsRef<[u8]>, payload: impl AsRef<[u8]>) -> ClientResult<i64> {
        self.query(&Command::new("PUBLISH").arg(channel.as_ref()).arg(payload.as_ref()))
    }
}

/// Maps a raw reply onto `T`, surfacing error replies as server errors.
pub(crate) fn convert<T: FromReply>(reply: Reply) -> ClientResult<T> {
    match reply {
        Reply::Error(message) => Err(ClientError::server(message)),
        other => Ok(T::from_reply(other)?),
    }
}

fn require_args<T>(args: &[T], message: &'static str) -> ClientResult<()> {
    if args.is_empty() {
        return Err(ClientError::Usage(message));
    }
    Ok(())
}

/// A Redis list addressed by key.
#[derive(Debug)]
pub struct ListRef<'a> {
    client: &'a mut Client,
    key: Vec<u8>,
}

impl ListRef<'_> {
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// Removes every element (LTRIM with an empty range).
    pub fn clear(&mut self) -> ClientResult<()> {
        self.client.ltrim(&self.key, -1, 0)?;
        Ok(())
    }

    /// Appends one element. Returns the new length.
    pub fn push(&mut self, value: impl AsRef<[u8]>) -> ClientResult<i64> {
        self.client.rpush(&self.key, &[value.as_ref()])
    }

    pub fn len(&mut self) -> ClientResult<i64> {
        self.client.llen(&self.key)
    }

    pub fn is_empty(&mut self) -> ClientResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Every element, head to tail.
    pub fn all(&mut self) -> ClientResult<Vec<Vec<u8>>> {
        self.client.lrange(&self.key, 0, -1)
    }

    /// Every element decoded as UTF-8.
    pub fn strings(&mut self) -> ClientResult<Vec<String>> {
        self.client
            .query(&Command::new("LRANGE").arg(&self.key).arg(0i64).arg(-1i64))
    }
}
