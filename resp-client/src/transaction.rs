//! # Transaction Session
//!
//! Purpose: Queue commands locally and commit them as one MULTI/EXEC batch.
//!
//! ## Design Principles
//! 1. **Local Queue**: `queue` never touches the network; nothing is sent
//!    until `commit`.
//! 2. **One Shot**: A session commits or discards exactly once; any later
//!    call is a usage error with no effect on the server.
//! 3. **Exclusive Borrow**: The session holds `&mut Connection`, so no other
//!    command can interleave with MULTI/EXEC.
//! 4. **Stay in Sync**: Every reply of the batch is read before interpreting
//!    any of them, so the connection is reusable after an abort.

use resp_common::{Command, ProtocolError, Reply};
use tracing::debug;

use crate::connection::Connection;
use crate::error::{ClientError, ClientResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxState {
    Open,
    Committed,
    Discarded,
}

/// Commands waiting for a MULTI/EXEC commit.
#[derive(Debug)]
pub struct Transaction<'a> {
    conn: &'a mut Connection,
    pending: Vec<Command>,
    state: TxState,
}

impl<'a> Transaction<'a> {
    pub fn new(conn: &'a mut Connection) -> Self {
        Transaction {
            conn,
            pending: Vec::new(),
            state: TxState::Open,
        }
    }

    /// Appends a command to the local queue.
    pub fn queue(&mut self, cmd: Command) -> ClientResult<&mut Self> {
        self.ensure_open()?;
        self.pending.push(cmd);
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// True once `commit` or `discard` has been called.
    pub fn is_finished(&self) -> bool {
        self.state != TxState::Open
    }

    /// Sends MULTI, the queued commands and EXEC, and returns one reply per
    /// queued command in queuing order.
    ///
    /// A command that fails at execution time shows up as a `Reply::Error`
    /// element. If the server refuses the whole batch (a command was rejected
    /// while queuing, or EXEC returned null) the result is
    /// `ClientError::Transaction` and nothing was applied.
    pub fn commit(&mut self) -> ClientResult<Vec<Reply>> {
        self.ensure_open()?;
        self.state = TxState::Committed;

        let queued = std::mem::take(&mut self.pending);
        let expected = queued.len();
        let mut batch = Vec::with_capacity(expected + 2);
        batch.push(Command::new("MULTI"));
        batch.extend(queued);
        batch.push(Command::new("EXEC"));

        debug!(commands = expected, "committing transaction");
        self.conn.send_all(&batch)?;

        let mut replies = Vec::with_capacity(batch.len());
        for _ in 0..batch.len() {
            replies.push(self.conn.receive()?);
        }

        let exec = replies.pop().unwrap_or(Reply::Array(None));
        let mut acks = replies.into_iter();
        if let Some(Reply::Error(message)) = acks.next() {
            return Err(ClientError::Transaction(format!(
                "MULTI rejected: {}",
                String::from_utf8_lossy(&message)
            )));
        }
        let rejected = acks.find_map(|ack| match ack {
            Reply::Error(message) => Some(String::from_utf8_lossy(&message).into_owned()),
            _ => None,
        });

        match exec {
            Reply::Array(Some(results)) if results.len() == expected => Ok(results),
            Reply::Array(Some(results)) => Err(ProtocolError::ReplyCountMismatch {
                expected,
                actual: results.len(),
            }
            .into()),
            Reply::Array(None) => Err(ClientError::Transaction(
                "server discarded the transaction".to_string(),
            )),
            Reply::Error(message) => {
                let message = String::from_utf8_lossy(&message).into_owned();
                debug!(%message, "transaction aborted");
                Err(ClientError::Transaction(match rejected {
                    Some(cause) => format!("{message} (first rejected command: {cause})"),
                    None => message,
                }))
            }
            other => Err(ProtocolError::unexpected("array", other.kind()).into()),
        }
    }

    /// Drops the queue without contacting the server.
    pub fn discard(&mut self) -> ClientResult<()> {
        self.ensure_open()?;
        self.state = TxState::Discarded;
        self.pending.clear();
        Ok(())
    }

    fn ensure_open(&self) -> ClientResult<()> {
        match self.state {
            TxState::Open => Ok(()),
            TxState::Committed => Err(ClientError::Usage("transaction already committed")),
            TxState::Discarded => Err(ClientError::Usage("transaction already discarded")),
        }
    }
}
