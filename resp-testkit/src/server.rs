//! # TCP Test Server
//!
//! Accept RESP2 connections on an ephemeral port, decode commands and answer
//! them from the shared in-memory `Db`. Each connection tracks its own
//! MULTI queue and subscriptions.

use std::collections::BTreeSet;
use std::io::Cursor;
use std::net::SocketAddr;
use std::thread::JoinHandle;

use anyhow::Context;
use bytes::{Buf, BytesMut};
use resp_common::{decode_command, Command, DecodeError, Reply};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

use crate::db::{check_arity, Db};

/// A running test server. Dropping it stops the server and closes every
/// client connection.
#[derive(Debug)]
pub struct TestServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl TestServer {
    /// Binds `127.0.0.1:0` and starts serving on a background thread.
    pub fn start() -> anyhow::Result<Self> {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").context("bind test listener")?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("build test server runtime")?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let thread = std::thread::Builder::new()
            .name("resp-test-server".to_string())
            .spawn(move || {
                // Spawned connection tasks are dropped with the runtime, which
                // closes their sockets.
                runtime.block_on(async move {
                    if let Err(err) = serve(listener, shutdown_rx).await {
                        error!(error = %err, "test server stopped");
                    }
                });
            })
            .context("spawn test server thread")?;

        info!(%addr, "test server listening");
        Ok(TestServer {
            addr,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// The address as `host:port`, ready for `ClientConfig::new`.
    pub fn addr_string(&self) -> String {
        self.addr.to_string()
    }

    /// Stops the server and waits for it to release every socket.
    pub fn stop(mut self) {
        self.shutdown_and_join();
    }

    fn shutdown_and_join(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("test server thread panicked");
            }
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown_and_join();
    }
}

async fn serve(listener: std::net::TcpListener, mut shutdown: oneshot::Receiver<()>) -> anyhow::Result<()> {
    let listener = TcpListener::from_std(listener)?;
    let db = Db::new();
    let mut next_id = 0u64;

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                next_id += 1;
                let id = next_id;
                let db = db.clone();
                tokio::spawn(async move {
                    debug!(%peer, id, "client connected");
                    if let Err(err) = handle_connection(stream, db, id).await {
                        debug!(%peer, id, error = %err, "client connection ended with error");
                    }
                });
            }
            _ = &mut shutdown => {
                debug!("test server shutting down");
                return Ok(());
            }
        }
    }
}

/// Serves one client: command replies and pub/sub pushes share the socket in
/// the order they were produced.
async fn handle_connection(stream: TcpStream, db: Db, id: u64) -> anyhow::Result<()> {
    stream.set_nodelay(true)?;
    let (mut reader, mut writer) = stream.into_split();
    let (push_tx, mut push_rx) = mpsc::unbounded_channel();
    let mut session = Session::new(id, db, push_tx);
    let mut buffer = BytesMut::with_capacity(8 * 1024);
    let mut out = Vec::with_capacity(1024);

    loop {
        tokio::select! {
            read = reader.read_buf(&mut buffer) => {
                if read? == 0 {
                    return Ok(());
                }
                out.clear();
                loop {
                    let mut cursor = Cursor::new(&buffer[..]);
                    match decode_command(&mut cursor) {
                        Ok(cmd) => {
                            let used = cursor.position() as usize;
                            buffer.advance(used);
                            session.execute(cmd, &mut out);
                        }
                        Err(DecodeError::Incomplete) => break,
                        Err(DecodeError::Protocol(err)) => {
                            Reply::error(&format!("ERR Protocol error: {err}")).encode_into(&mut out);
                            writer.write_all(&out).await?;
                            return Ok(());
                        }
                    }
                }
                writer.write_all(&out).await?;
            }
            Some(push) = push_rx.recv() => {
                out.clear();
                push.encode_into(&mut out);
                writer.write_all(&out).await?;
            }
        }
    }
}

/// Per-connection protocol state.
struct Session {
    id: u64,
    db: Db,
    pushes: mpsc::UnboundedSender<Reply>,
    queued: Option<Vec<Command>>,
    dirty: bool,
    channels: BTreeSet<String>,
}

impl Session {
    fn new(id: u64, db: Db, pushes: mpsc::UnboundedSender<Reply>) -> Self {
        Session {
            id,
            db,
            pushes,
            queued: None,
            dirty: false,
            channels: BTreeSet::new(),
        }
    }

    fn execute(&mut self, cmd: Command, out: &mut Vec<u8>) {
        if cmd.is("SUBSCRIBE") || cmd.is("UNSUBSCRIBE") {
            if self.queued.is_some() {
                self.dirty = true;
                Reply::error("ERR Command not allowed inside a transaction").encode_into(out);
            } else if cmd.is("SUBSCRIBE") {
                self.subscribe(&cmd, out);
            } else {
                self.unsubscribe(&cmd, out);
            }
            return;
        }
        if !self.channels.is_empty() && !cmd.is("PING") {
            let name = String::from_utf8_lossy(cmd.name()).to_ascii_lowercase();
            Reply::error(&format!(
                "ERR Can't execute '{name}': only (P|S)SUBSCRIBE / (P|S)UNSUBSCRIBE / PING / QUIT / RESET are allowed in this context"
            ))
            .encode_into(out);
            return;
        }
        self.execute_data(cmd).encode_into(out);
    }

    fn execute_data(&mut self, cmd: Command) -> Reply {
        if cmd.is("MULTI") {
            if self.queued.is_some() {
                return Reply::error("ERR MULTI calls can not be nested");
            }
            self.queued = Some(Vec::new());
            self.dirty = false;
            return Reply::ok();
        }
        if cmd.is("EXEC") {
            let Some(queued) = self.queued.take() else {
                return Reply::error("ERR EXEC without MULTI");
            };
            if std::mem::take(&mut self.dirty) {
                return Reply::error("EXECABORT Transaction discarded because of previous errors.");
            }
            return self.db.execute_batch(&queued);
        }
        if cmd.is("DISCARD") {
            if self.queued.take().is_none() {
                return Reply::error("ERR DISCARD without MULTI");
            }
            self.dirty = false;
            return Reply::ok();
        }

        match self.queued.as_mut() {
            Some(queued) => match check_arity(&cmd) {
                Ok(()) => {
                    queued.push(cmd);
                    Reply::status("QUEUED")
                }
                Err(reply) => {
                    self.dirty = true;
                    reply
                }
            },
            None => self.db.execute(&cmd),
        }
    }

    fn subscribe(&mut self, cmd: &Command, out: &mut Vec<u8>) {
        let channels = &cmd.as_slice()[1..];
        if channels.is_empty() {
            Reply::error("ERR wrong number of arguments for 'subscribe' command").encode_into(out);
            return;
        }
        for channel in channels {
            let channel = String::from_utf8_lossy(channel).into_owned();
            if self.channels.insert(channel.clone()) {
                self.db.subscribe(&channel, self.id, self.pushes.clone());
            }
            confirmation("subscribe", Reply::bulk(channel), self.channels.len()).encode_into(out);
        }
    }

    fn unsubscribe(&mut self, cmd: &Command, out: &mut Vec<u8>) {
        let named: Vec<String> = cmd.as_slice()[1..]
            .iter()
            .map(|channel| String::from_utf8_lossy(channel).into_owned())
            .collect();
        let targets = if named.is_empty() {
            self.channels.iter().cloned().collect()
        } else {
            named
        };
        if targets.is_empty() {
            confirmation("unsubscribe", Reply::null(), 0).encode_into(out);
            return;
        }
        for channel in targets {
            if self.channels.remove(&channel) {
                self.db.unsubscribe(&channel, self.id);
            }
            confirmation("unsubscribe", Reply::bulk(channel), self.channels.len()).encode_into(out);
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        for channel in &self.channels {
            self.db.unsubscribe(channel, self.id);
        }
    }
}

fn confirmation(kind: &str, channel: Reply, count: usize) -> Reply {
    Reply::array(vec![Reply::bulk(kind), channel, Reply::Integer(count as i64)])
}
