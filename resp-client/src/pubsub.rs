//! # Subscription Channel
//!
//! Purpose: Turn a dedicated `Connection` into a blocking receive loop that
//! hands published messages to a `MessageHandler`.
//!
//! ## Design Principles
//! 1. **Exclusive Connection**: `Subscription` owns its connection and only
//!    gives it back once no channel remains subscribed.
//! 2. **Server Order**: Messages reach the handler in the order the server
//!    pushed them; nothing is buffered, reordered or replayed.
//! 3. **Cooperative Stop**: A `SubscriptionCanceller` writes UNSUBSCRIBE from
//!    another thread, or shuts the socket down to force the loop out.
//!    Frames written from either side are serialized, never interleaved.
//! 4. **Owned Threads**: `SubscriptionTask` joins its thread on drop; loops
//!    are never detached.

use std::collections::BTreeSet;
use std::io::{self, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use resp_common::{encode_command, Command, ProtocolError, Reply};
use tracing::{debug, trace, warn};

use crate::connection::Connection;
use crate::error::{ClientError, ClientResult, ErrorKind};

/// Receives events from a subscription loop.
pub trait MessageHandler {
    /// A message published to `channel`.
    fn on_message(&mut self, channel: &str, payload: &[u8]);

    /// The server confirmed a subscription; `count` is the number of
    /// channels now subscribed.
    fn on_subscribe(&mut self, channel: &str, count: i64) {
        let _ = (channel, count);
    }

    /// The server confirmed an unsubscription.
    fn on_unsubscribe(&mut self, channel: &str, count: i64) {
        let _ = (channel, count);
    }
}

impl<F> MessageHandler for F
where
    F: FnMut(&str, &[u8]),
{
    fn on_message(&mut self, channel: &str, payload: &[u8]) {
        self(channel, payload)
    }
}

enum Event {
    Subscribe { channel: String, count: i64 },
    Unsubscribe { channel: String, count: i64 },
    Message { channel: String, payload: Vec<u8> },
}

/// A connection in subscriber mode.
#[derive(Debug)]
pub struct Subscription {
    conn: Connection,
    channels: BTreeSet<String>,
    stream: Arc<TcpStream>,
    cancelled: Arc<AtomicBool>,
    write_lock: Arc<Mutex<()>>,
}

impl Subscription {
    /// Takes over an open connection.
    pub fn new(conn: Connection) -> ClientResult<Self> {
        let stream = Arc::new(conn.try_clone_stream()?);
        Ok(Subscription {
            conn,
            channels: BTreeSet::new(),
            stream,
            cancelled: Arc::new(AtomicBool::new(false)),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    /// A handle that can stop the loop from another thread.
    pub fn canceller(&self) -> SubscriptionCanceller {
        SubscriptionCanceller {
            stream: Arc::clone(&self.stream),
            cancelled: Arc::clone(&self.cancelled),
            write_lock: Arc::clone(&self.write_lock),
        }
    }

    /// Channels confirmed by the server and not yet unsubscribed.
    pub fn channels(&self) -> impl Iterator<Item = &str> {
        self.channels.iter().map(String::as_str)
    }

    /// Subscribes and blocks, delivering messages until the last channel is
    /// unsubscribed or the connection fails.
    ///
    /// Returns `Ok(())` after a full unsubscribe or after
    /// `SubscriptionCanceller::close`. Any other failure ends the loop with an
    /// error; the connection is then closed and no channel stays recorded.
    ///
    /// An UNSUBSCRIBE sent through a canceller before the server has seen
    /// this SUBSCRIBE does not apply to it.
    pub fn subscribe_to_channels<H>(&mut self, names: &[&str], handler: &mut H) -> ClientResult<()>
    where
        H: MessageHandler + ?Sized,
    {
        check_channels(names)?;
        let result = self.send_subscribe(names).and_then(|()| self.run(names.len(), handler));
        self.settle(result)
    }

    fn send_subscribe(&mut self, names: &[&str]) -> ClientResult<()> {
        let _guard = lock_writes(&self.write_lock);
        self.conn.send(&Command::new("SUBSCRIBE").args(names.iter().copied()))
    }

    /// Final bookkeeping for one loop. A close only excuses the loop it ended.
    fn settle(&mut self, result: ClientResult<()>) -> ClientResult<()> {
        let cancelled = self.cancelled.swap(false, Ordering::SeqCst);
        match result {
            Ok(()) => Ok(()),
            Err(err) if cancelled && err.kind() == ErrorKind::Connection => {
                debug!("subscription cancelled");
                self.channels.clear();
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "subscription loop failed");
                self.channels.clear();
                // Best effort: the loop already failed.
                let _ = self.conn.close();
                Err(err)
            }
        }
    }

    /// Hands the connection back once nothing is subscribed.
    pub fn into_connection(self) -> Result<Connection, Subscription> {
        if self.channels.is_empty() {
            Ok(self.conn)
        } else {
            Err(self)
        }
    }

    fn run<H>(&mut self, mut awaiting: usize, handler: &mut H) -> ClientResult<()>
    where
        H: MessageHandler + ?Sized,
    {
        loop {
            let reply = self.conn.receive()?;
            match classify(reply)? {
                Event::Message { channel, payload } => {
                    trace!(%channel, bytes = payload.len(), "message");
                    handler.on_message(&channel, &payload);
                }
                Event::Subscribe { channel, count } => {
                    debug!(%channel, count, "subscribed");
                    awaiting = awaiting.saturating_sub(1);
                    self.channels.insert(channel.clone());
                    handler.on_subscribe(&channel, count);
                }
                Event::Unsubscribe { channel, count } => {
                    debug!(%channel, count, "unsubscribed");
                    self.channels.remove(&channel);
                    handler.on_unsubscribe(&channel, count);
                    // A stray unsubscribe may arrive before our own SUBSCRIBE
                    // is confirmed; only stop once every confirmation is in.
                    if count == 0 && awaiting == 0 {
                        self.channels.clear();
                        return Ok(());
                    }
                }
            }
        }
    }
}

fn check_channels(names: &[&str]) -> ClientResult<()> {
    if names.is_empty() {
        return Err(ClientError::Usage("SUBSCRIBE needs at least one channel"));
    }
    Ok(())
}

fn lock_writes(lock: &Mutex<()>) -> MutexGuard<'_, ()> {
    lock.lock().unwrap_or_else(PoisonError::into_inner)
}

fn classify(reply: Reply) -> ClientResult<Event> {
    let items = match reply {
        Reply::Array(Some(items)) if items.len() == 3 => items,
        Reply::Error(message) => return Err(ClientError::server(message)),
        other => return Err(ProtocolError::unexpected("3-element push", other.kind()).into()),
    };
    let mut items = items.into_iter();
    let (Some(kind), Some(channel), Some(last)) = (items.next(), items.next(), items.next()) else {
        return Err(ProtocolError::ReplyCountMismatch { expected: 3, actual: 0 }.into());
    };

    let kind = push_text(kind)?;
    let channel = push_text(channel)?;
    match kind.as_str() {
        "message" => match last {
            Reply::Bulk(Some(payload)) => Ok(Event::Message { channel, payload }),
            other => Err(ProtocolError::unexpected("bulk string", other.kind()).into()),
        },
        "subscribe" | "unsubscribe" => {
            let count = last
                .as_integer()
                .ok_or_else(|| ProtocolError::unexpected("integer", last.kind()))?;
            if kind == "subscribe" {
                Ok(Event::Subscribe { channel, count })
            } else {
                Ok(Event::Unsubscribe { channel, count })
            }
        }
        _ => Err(ProtocolError::UnexpectedPush(kind).into()),
    }
}

/// Event names and channel names; a null bulk (UNSUBSCRIBE with nothing
/// subscribed) reads as empty.
fn push_text(reply: Reply) -> Result<String, ProtocolError> {
    match reply {
        Reply::Bulk(Some(data)) | Reply::Simple(data) => {
            String::from_utf8(data).map_err(|_| ProtocolError::InvalidUtf8("channel name"))
        }
        Reply::Bulk(None) => Ok(String::new()),
        other => Err(ProtocolError::unexpected("bulk string", other.kind())),
    }
}

/// Stops a subscription loop from outside its thread.
///
/// The canceller shares the subscription's socket. Do not keep using it once
/// the connection has been taken back with `into_connection`.
#[derive(Debug, Clone)]
pub struct SubscriptionCanceller {
    stream: Arc<TcpStream>,
    cancelled: Arc<AtomicBool>,
    write_lock: Arc<Mutex<()>>,
}

impl SubscriptionCanceller {
    /// Unsubscribes from `channels`. The loop keeps running while any other
    /// channel remains.
    pub fn unsubscribe(&self, channels: &[&str]) -> ClientResult<()> {
        if channels.is_empty() {
            return Err(ClientError::Usage("UNSUBSCRIBE needs at least one channel"));
        }
        self.write(&Command::new("UNSUBSCRIBE").args(channels.iter().copied()))
    }

    /// Unsubscribes from every channel; the loop returns once the server
    /// confirms the last one.
    pub fn unsubscribe_all(&self) -> ClientResult<()> {
        self.write(&Command::new("UNSUBSCRIBE"))
    }

    /// Shuts the socket down. The loop returns `Ok(())` and the connection is
    /// left failed.
    pub fn close(&self) -> ClientResult<()> {
        self.cancelled.store(true, Ordering::SeqCst);
        match self.stream.shutdown(Shutdown::Both) {
            Err(err) if err.kind() != io::ErrorKind::NotConnected => Err(err.into()),
            _ => Ok(()),
        }
    }

    fn write(&self, cmd: &Command) -> ClientResult<()> {
        trace!(command = %cmd, "send from canceller");
        let mut frame = Vec::with_capacity(cmd.encoded_len());
        encode_command(cmd, &mut frame);
        let _guard = lock_writes(&self.write_lock);
        (&*self.stream).write_all(&frame)?;
        Ok(())
    }
}

/// A subscription loop running on its own thread.
#[derive(Debug)]
pub struct SubscriptionTask {
    handle: Option<JoinHandle<ClientResult<()>>>,
    canceller: SubscriptionCanceller,
}

impl SubscriptionTask {
    /// Subscribes `conn` to `channels` on a new thread.
    ///
    /// SUBSCRIBE is written before this returns, so `stop` always follows it.
    pub fn spawn<H>(conn: Connection, channels: &[&str], mut handler: H) -> ClientResult<Self>
    where
        H: MessageHandler + Send + 'static,
    {
        check_channels(channels)?;
        let mut subscription = Subscription::new(conn)?;
        subscription.send_subscribe(channels)?;
        let canceller = subscription.canceller();
        let awaiting = channels.len();

        let handle = thread::Builder::new()
            .name("resp-subscription".to_string())
            .spawn(move || {
                let result = subscription.run(awaiting, &mut handler);
                subscription.settle(result)
            })?;

        Ok(SubscriptionTask {
            handle: Some(handle),
            canceller,
        })
    }

    pub fn canceller(&self) -> &SubscriptionCanceller {
        &self.canceller
    }

    /// Asks the server to drop every channel.
    pub fn stop(&self) -> ClientResult<()> {
        self.canceller.unsubscribe_all()
    }

    /// Forces the loop out by shutting the socket down.
    pub fn cancel(&self) -> ClientResult<()> {
        self.canceller.close()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Waits for the loop to end and returns its result.
    ///
    /// Does not stop the loop; call `stop` or `cancel` first.
    pub fn join(mut self) -> ClientResult<()> {
        match self.handle.take() {
            Some(handle) => match handle.join() {
                Ok(result) => result,
                Err(panic) => std::panic::resume_unwind(panic),
            },
            None => Ok(()),
        }
    }
}

impl Drop for SubscriptionTask {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        if let Err(err) = self.canceller.close() {
            warn!(error = %err, "failed to cancel subscription");
        }
        match handle.join() {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(error = %err, "subscription ended with an error"),
            Err(_) => warn!("subscription thread panicked"),
        }
    }
}
