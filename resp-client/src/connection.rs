//! # Connection
//!
//! Purpose: Own one TCP stream to a server and frame commands and replies over
//! it with the RESP codec.
//!
//! ## Design Principles
//! 1. **Single Owner**: Every IO method takes `&mut self`; sharing a
//!    connection needs external locking.
//! 2. **FIFO Pipelining**: Any number of `send`s may precede the matching
//!    `receive`s; replies come back in request order.
//! 3. **Fail Closed**: An IO or framing failure shuts the stream and parks the
//!    connection in a failed state until the caller reconnects.
//! 4. **Buffer Reuse**: The read and write buffers live on the connection.
//!
//! ## State Machine
//!
//! ```text
//!            connect()              IO / protocol failure
//!   Idle  ─────────────►  Open  ─────────────────────────►  Failed
//!    ▲                     │                                   │
//!    └──── close() ────────┘◄──────────── connect() ───────────┘
//! ```
//!
//! A `connect()` that cannot reach the server also lands in `Failed`.
//! Operations on `Idle` fail with `ClientError::Usage`; operations on `Failed`
//! fail with `ClientError::ConnectionClosed`.

use std::fmt;
use std::io::{self, Cursor, Read, Write};
use std::net::{Shutdown, TcpStream};

use bytes::{Buf, BytesMut};
use resp_common::{decode, encode_command, Command, DecodeError, Reply};
use tracing::{debug, trace, warn};

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};

/// Bytes requested from the socket per read.
const READ_CHUNK: usize = 8 * 1024;

enum State {
    Idle,
    Open(TcpStream),
    Failed,
}

/// Single TCP connection with reusable buffers.
pub struct Connection {
    config: ClientConfig,
    state: State,
    read_buf: BytesMut,
    write_buf: Vec<u8>,
}

impl Connection {
    /// Creates an unconnected connection; call `connect` before use.
    pub fn new(config: ClientConfig) -> Self {
        Connection {
            config,
            state: State::Idle,
            read_buf: BytesMut::with_capacity(READ_CHUNK),
            write_buf: Vec::with_capacity(256),
        }
    }

    /// Creates and connects in one step.
    pub fn open(config: ClientConfig) -> ClientResult<Self> {
        let mut conn = Connection::new(config);
        conn.connect()?;
        Ok(conn)
    }

    /// Establishes a fresh stream, replacing any previous one.
    ///
    /// Buffered bytes from an earlier stream are discarded. A failed attempt
    /// leaves the connection in the failed state.
    pub fn connect(&mut self) -> ClientResult<()> {
        self.shutdown_stream();
        self.state = State::Failed;
        self.read_buf.clear();

        let stream = open_tcp(&self.config)?;
        debug!(addr = %self.config.addr, "connection established");
        self.state = State::Open(stream);
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, State::Open(_))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Writes one command frame.
    pub fn send(&mut self, cmd: &Command) -> ClientResult<()> {
        trace!(command = %cmd, "send");
        self.write_buf.clear();
        encode_command(cmd, &mut self.write_buf);
        self.flush_write_buf()
    }

    /// Writes several command frames with a single write.
    pub fn send_all(&mut self, cmds: &[Command]) -> ClientResult<()> {
        self.write_buf.clear();
        for cmd in cmds {
            trace!(command = %cmd, "send");
            encode_command(cmd, &mut self.write_buf);
        }
        self.flush_write_buf()
    }

    /// Reads the next reply, blocking until a whole frame has arrived.
    ///
    /// Error replies from the server are returned as `Reply::Error`; only
    /// transport and framing problems are `Err`.
    pub fn receive(&mut self) -> ClientResult<Reply> {
        open_stream(&mut self.state)?;
        loop {
            // Each refill re-decodes from the start of the pending frame, so
            // very large aggregates cost time quadratic in their size.
            if !self.read_buf.is_empty() {
                let mut cursor = Cursor::new(&self.read_buf[..]);
                match decode(&mut cursor) {
                    Ok(reply) => {
                        let consumed = cursor.position() as usize;
                        self.read_buf.advance(consumed);
                        return Ok(reply);
                    }
                    Err(DecodeError::Incomplete) => {}
                    Err(DecodeError::Protocol(err)) => {
                        self.fail(&err);
                        return Err(err.into());
                    }
                }
            }
            self.fill_read_buf()?;
        }
    }

    /// Request/response round trip.
    pub fn exec(&mut self, cmd: &Command) -> ClientResult<Reply> {
        self.send(cmd)?;
        self.receive()
    }

    /// Shuts the stream down and returns to the idle state.
    ///
    /// Closing an idle or failed connection is a no-op.
    pub fn close(&mut self) -> ClientResult<()> {
        let result = match std::mem::replace(&mut self.state, State::Idle) {
            State::Open(stream) => {
                debug!("connection closed");
                match stream.shutdown(Shutdown::Both) {
                    Err(err) if err.kind() != io::ErrorKind::NotConnected => Err(err.into()),
                    _ => Ok(()),
                }
            }
            State::Idle | State::Failed => Ok(()),
        };
        self.read_buf.clear();
        result
    }

    /// A handle that can shut this connection's socket from another thread.
    ///
    /// A `receive` blocked on the owning thread then fails with a connection
    /// error instead of waiting forever.
    pub fn shutdown_handle(&self) -> ClientResult<ShutdownHandle> {
        Ok(ShutdownHandle {
            stream: self.try_clone_stream()?,
        })
    }

    pub(crate) fn try_clone_stream(&self) -> ClientResult<TcpStream> {
        match &self.state {
            State::Open(stream) => Ok(stream.try_clone()?),
            State::Idle => Err(ClientError::Usage("connection is not open")),
            State::Failed => Err(ClientError::ConnectionClosed),
        }
    }

    fn flush_write_buf(&mut self) -> ClientResult<()> {
        let stream = open_stream(&mut self.state)?;
        let result = stream
            .write_all(&self.write_buf)
            .and_then(|()| stream.flush());
        if let Err(err) = result {
            self.fail(&err);
            return Err(err.into());
        }
        Ok(())
    }

    fn fill_read_buf(&mut self) -> ClientResult<()> {
        let stream = open_stream(&mut self.state)?;
        let start = self.read_buf.len();
        self.read_buf.resize(start + READ_CHUNK, 0);
        let result = stream.read(&mut self.read_buf[start..]);

        match result {
            Ok(0) => {
                self.read_buf.truncate(start);
                let err = io::Error::new(io::ErrorKind::UnexpectedEof, "server closed the connection");
                self.fail(&err);
                Err(err.into())
            }
            Ok(read) => {
                self.read_buf.truncate(start + read);
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {
                self.read_buf.truncate(start);
                Ok(())
            }
            Err(err) => {
                self.read_buf.truncate(start);
                self.fail(&err);
                Err(err.into())
            }
        }
    }

    fn fail(&mut self, reason: &dyn fmt::Display) {
        warn!(%reason, "connection failed");
        self.shutdown_stream();
        self.state = State::Failed;
        self.read_buf.clear();
    }

    fn shutdown_stream(&mut self) {
        if let State::Open(stream) = &self.state {
            // The peer may already be gone; the stream is dropped either way.
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if self.is_open() {
            trace!("dropping open connection");
            self.shutdown_stream();
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state {
            State::Idle => "idle",
            State::Open(_) => "open",
            State::Failed => "failed",
        };
        f.debug_struct("Connection")
            .field("addr", &self.config.addr)
            .field("state", &state)
            .field("buffered", &self.read_buf.len())
            .finish()
    }
}

fn open_tcp(config: &ClientConfig) -> ClientResult<TcpStream> {
    let addr = config.socket_addr()?;
    let stream = match config.connect_timeout {
        Some(timeout) => TcpStream::connect_timeout(&addr, timeout)?,
        None => TcpStream::connect(addr)?,
    };
    stream.set_read_timeout(config.read_timeout)?;
    stream.set_write_timeout(config.write_timeout)?;
    // Disable Nagle to keep request latency low for small payloads.
    stream.set_nodelay(true)?;
    Ok(stream)
}

fn open_stream(state: &mut State) -> ClientResult<&mut TcpStream> {
    match state {
        State::Open(stream) => Ok(stream),
        State::Idle => Err(ClientError::Usage("connection is not open")),
        State::Failed => Err(ClientError::ConnectionClosed),
    }
}

/// Closes a connection's socket from outside its owning thread.
#[derive(Debug)]
pub struct ShutdownHandle {
    stream: TcpStream,
}

impl ShutdownHandle {
    pub fn close(&self) -> ClientResult<()> {
        match self.stream.shutdown(Shutdown::Both) {
            Err(err) if err.kind() != io::ErrorKind::NotConnected => Err(err.into()),
            _ => Ok(()),
        }
    }
}
