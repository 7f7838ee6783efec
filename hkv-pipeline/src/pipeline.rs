//! # Command Pipelining
//!
//! Purpose: Queue commands without I/O, then send them as one contiguous write
//! over a single leased connection and read one reply per command back in
//! submission order.
//!
//! ## Design Principles
//! 1. **Two-Phase Handoff**: `exec` swaps the live queue for an empty one and
//!    works only on the detached batch.
//! 2. **First Error Wins**: The batch reports the first error it saw; every
//!    command keeps its own result for inspection.
//! 3. **Explicit Disposition**: Every leased connection is either released or
//!    discarded, never left to a default.
//! 4. **Single Writer**: No internal locking; mutating calls take `&mut self`.
//!
//! ## Failure Handling
//! - Acquire fails: every command gets the error, nothing to dispose.
//! - Write fails: every command gets the error, connection discarded.
//! - A reply is a server error: recorded on that command, reading continues,
//!   connection stays poolable.
//! - A reply is malformed: recorded on that command, reading continues,
//!   connection discarded afterwards.
//! - A read hits an IO error (including timeout): that command and every
//!   unread command get the error, reading stops, connection discarded.

use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tracing::{debug, trace};

use crate::broker::{Broker, Wire};
use crate::cmd::{set_cmds_err, Cmd};
use crate::error::{ClientError, ClientResult};
use crate::pool::ConnectionPool;
use crate::resp::RespValue;

/// Commands executed by one `exec` call and the first error it hit.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    cmds: Vec<Arc<Cmd>>,
    error: Option<ClientError>,
}

impl BatchOutcome {
    /// Executed commands in submission order.
    pub fn commands(&self) -> &[Arc<Cmd>] {
        &self.cmds
    }

    /// First error encountered, if any.
    pub fn error(&self) -> Option<&ClientError> {
        self.error.as_ref()
    }

    /// True when no command failed.
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    pub fn len(&self) -> usize {
        self.cmds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cmds.is_empty()
    }

    pub fn into_parts(self) -> (Vec<Arc<Cmd>>, Option<ClientError>) {
        (self.cmds, self.error)
    }

    /// Returns the commands, or the first error if any command failed.
    pub fn into_result(self) -> ClientResult<Vec<Arc<Cmd>>> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.cmds),
        }
    }
}

/// Batches commands and executes them over one connection.
///
/// Not thread-safe: one caller builds and executes a batch at a time.
pub struct Pipeline<B: Broker = ConnectionPool> {
    broker: B,
    queue: Vec<Arc<Cmd>>,
    write_buf: BytesMut,
    closed: bool,
}

impl<B: Broker> Pipeline<B> {
    /// Creates an open pipeline over the given broker.
    pub fn new(broker: B) -> Self {
        Pipeline {
            broker,
            queue: Vec::new(),
            write_buf: BytesMut::with_capacity(1024),
            closed: false,
        }
    }

    /// Appends a command to the current batch. No I/O happens here.
    ///
    /// A command's result slot is write-once. Submitting a command that has
    /// already been executed sends it again, but its slot keeps the first
    /// result and the new reply is dropped with a warning. If that dropped
    /// reply is an error it can still become the batch error, so build a fresh
    /// `Cmd` for each execution when per-command detail matters.
    pub fn submit(&mut self, cmd: Arc<Cmd>) -> ClientResult<()> {
        self.ensure_open()?;
        self.queue.push(cmd);
        Ok(())
    }

    /// Builds a command from raw arguments, submits it and returns its handle.
    pub fn cmd(&mut self, args: &[&[u8]]) -> ClientResult<Arc<Cmd>> {
        let cmd = Arc::new(Cmd::new(args));
        self.submit(cmd.clone())?;
        Ok(cmd)
    }

    pub fn get(&mut self, key: &[u8]) -> ClientResult<Arc<Cmd>> {
        self.cmd(&[b"GET", key])
    }

    pub fn set(&mut self, key: &[u8], value: &[u8]) -> ClientResult<Arc<Cmd>> {
        self.cmd(&[b"SET", key, value])
    }

    pub fn set_with_ttl(&mut self, key: &[u8], value: &[u8], ttl: Duration) -> ClientResult<Arc<Cmd>> {
        let seconds = ttl.as_secs().to_string();
        self.cmd(&[b"SET", key, value, b"EX", seconds.as_bytes()])
    }

    pub fn delete(&mut self, key: &[u8]) -> ClientResult<Arc<Cmd>> {
        self.cmd(&[b"DEL", key])
    }

    pub fn expire(&mut self, key: &[u8], ttl: Duration) -> ClientResult<Arc<Cmd>> {
        let seconds = ttl.as_secs().to_string();
        self.cmd(&[b"EXPIRE", key, seconds.as_bytes()])
    }

    pub fn ttl(&mut self, key: &[u8]) -> ClientResult<Arc<Cmd>> {
        self.cmd(&[b"TTL", key])
    }

    pub fn incr(&mut self, key: &[u8]) -> ClientResult<Arc<Cmd>> {
        self.cmd(&[b"INCR", key])
    }

    pub fn ping(&mut self, payload: Option<&[u8]>) -> ClientResult<Arc<Cmd>> {
        match payload {
            Some(data) => self.cmd(&[b"PING", data]),
            None => self.cmd(&[b"PING"]),
        }
    }

    /// Number of commands waiting for the next `exec`.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Drops every queued command without executing it.
    ///
    /// Discarded commands keep an empty result slot.
    pub fn discard(&mut self) -> ClientResult<()> {
        self.ensure_open()?;
        self.queue = Vec::new();
        Ok(())
    }

    /// Executes the queued batch.
    ///
    /// Only a closed pipeline yields `Err`. Execution failures are reported in
    /// the returned `BatchOutcome`, which always carries every detached command.
    pub fn exec(&mut self) -> ClientResult<BatchOutcome> {
        self.ensure_open()?;

        let cmds = std::mem::take(&mut self.queue);
        if cmds.is_empty() {
            return Ok(BatchOutcome::default());
        }

        debug!(batch = cmds.len(), "executing pipeline");
        let error = self.exec_cmds(&cmds);
        match &error {
            Some(err) => debug!(batch = cmds.len(), %err, "pipeline finished with error"),
            None => debug!(batch = cmds.len(), "pipeline finished"),
        }
        Ok(BatchOutcome { cmds, error })
    }

    /// Marks the pipeline closed. Pending commands are not executed.
    pub fn close(&mut self) {
        self.closed = true;
    }

    fn ensure_open(&self) -> ClientResult<()> {
        if self.closed {
            return Err(ClientError::Closed);
        }
        Ok(())
    }

    fn exec_cmds(&mut self, cmds: &[Arc<Cmd>]) -> Option<ClientError> {
        let mut conn = match self.broker.acquire() {
            Ok(conn) => conn,
            Err(err) => {
                set_cmds_err(cmds, &err);
                return Some(err);
            }
        };

        self.write_buf.clear();
        for cmd in cmds {
            cmd.write_to(&mut self.write_buf);
        }
        if let Err(err) = conn.write_batch(&self.write_buf) {
            set_cmds_err(cmds, &err);
            self.broker.discard(conn, &err);
            return Some(err);
        }

        let mut first_err: Option<ClientError> = None;
        let mut broken: Option<ClientError> = None;
        for (idx, cmd) in cmds.iter().enumerate() {
            let err = match conn.read_reply().and_then(RespValue::into_result) {
                Ok(reply) => {
                    trace!(%cmd, ?reply, "reply");
                    cmd.set_reply(reply);
                    continue;
                }
                Err(err) => err,
            };

            trace!(%cmd, %err, "reply error");
            cmd.set_err(err.clone());
            if err.breaks_connection() && broken.is_none() {
                broken = Some(err.clone());
            }
            if err.is_transport() {
                // Nothing more can be read from this stream.
                set_cmds_err(&cmds[idx + 1..], &err);
                first_err.get_or_insert(err);
                break;
            }
            first_err.get_or_insert(err);
        }

        match broken {
            Some(reason) => self.broker.discard(conn, &reason),
            None => self.broker.release(conn),
        }
        first_err
    }
}
