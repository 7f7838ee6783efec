//! # Connection Pool
//!
//! Purpose: Reuse TCP connections for the client and its pipelines to reduce
//! handshake latency and allocation churn.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Keep a bounded set of reusable connections.
//! 2. **Minimal Locking**: Hold the mutex only while moving idle connections.
//! 3. **Fail Fast**: Exceeding the pool limit returns an error immediately.
//! 4. **Explicit Disposition**: Callers release or discard every lease; a lease
//!    dropped without either is treated as unhealthy.

use std::collections::VecDeque;
use std::io::{BufReader, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, warn};

use crate::broker::{Broker, Wire};
use crate::error::{ClientError, ClientResult};
use crate::resp::{encode_command, read_response, RespValue};

/// Pool configuration for the sync client.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Server address, e.g. "127.0.0.1:6379".
    pub addr: String,
    /// Maximum number of idle connections to keep.
    pub max_idle: usize,
    /// Maximum total connections (idle + in-use).
    pub max_total: usize,
    /// Optional TCP read timeout.
    pub read_timeout: Option<Duration>,
    /// Optional TCP write timeout.
    pub write_timeout: Option<Duration>,
    /// Optional TCP connect timeout.
    pub connect_timeout: Option<Duration>,
}

/// Point-in-time pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Connections parked in the idle set.
    pub idle: usize,
    /// Connections counted against `max_total`, idle or leased.
    pub total: usize,
}

struct PoolState {
    idle: VecDeque<Connection>,
    total: usize,
}

struct PoolInner {
    config: PoolConfig,
    state: Mutex<PoolState>,
}

/// Connection pool handle.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Creates a new connection pool with the provided configuration.
    ///
    /// The address is parsed up front so a bad address fails here rather than
    /// on the first command.
    pub fn new(config: PoolConfig) -> ClientResult<Self> {
        config
            .addr
            .parse::<SocketAddr>()
            .map_err(|_| ClientError::InvalidAddress)?;
        let state = PoolState {
            idle: VecDeque::with_capacity(config.max_idle),
            total: 0,
        };
        Ok(ConnectionPool {
            inner: Arc::new(PoolInner {
                config,
                state: Mutex::new(state),
            }),
        })
    }

    /// Acquires a connection from the pool.
    pub fn acquire(&self) -> ClientResult<PooledConnection> {
        if let Some(conn) = self.pop_idle() {
            return Ok(PooledConnection::new(self.inner.clone(), conn));
        }

        if !self.try_reserve() {
            return Err(ClientError::PoolExhausted);
        }

        match Connection::connect(&self.inner.config) {
            Ok(conn) => {
                debug!(addr = %self.inner.config.addr, "dialed new connection");
                Ok(PooledConnection::new(self.inner.clone(), conn))
            }
            Err(err) => {
                self.release_slot();
                Err(err)
            }
        }
    }

    /// Returns current idle and total counts.
    pub fn stats(&self) -> PoolStats {
        let state = self.inner.state.lock().expect("pool mutex poisoned");
        PoolStats {
            idle: state.idle.len(),
            total: state.total,
        }
    }

    fn pop_idle(&self) -> Option<Connection> {
        let mut state = self.inner.state.lock().expect("pool mutex poisoned");
        state.idle.pop_front()
    }

    fn try_reserve(&self) -> bool {
        let mut state = self.inner.state.lock().expect("pool mutex poisoned");
        if state.total >= self.inner.config.max_total {
            return false;
        }
        state.total += 1;
        true
    }

    fn release_slot(&self) {
        release_slot(&self.inner);
    }
}

impl Broker for ConnectionPool {
    type Conn = PooledConnection;

    fn acquire(&self) -> ClientResult<PooledConnection> {
        ConnectionPool::acquire(self)
    }

    fn release(&self, conn: PooledConnection) {
        conn.release();
    }

    fn discard(&self, conn: PooledConnection, reason: &ClientError) {
        conn.discard(reason);
    }
}

fn release_slot(inner: &PoolInner) {
    let mut state = inner.state.lock().expect("pool mutex poisoned");
    state.total = state.total.saturating_sub(1);
}

fn return_connection(inner: &PoolInner, conn: Connection) {
    let mut state = inner.state.lock().expect("pool mutex poisoned");
    if state.idle.len() < inner.config.max_idle {
        state.idle.push_back(conn);
    } else {
        state.total = state.total.saturating_sub(1);
    }
}

/// Holds one unit of `total` for a leased connection.
///
/// Armed while the lease is live. Dropping an armed guard frees the slot, so a
/// lease that is never released or discarded still returns its capacity.
struct SlotGuard {
    pool: Arc<PoolInner>,
    armed: bool,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if self.armed {
            debug!(addr = %self.pool.config.addr, "connection dropped without disposition");
            release_slot(&self.pool);
        }
    }
}

/// Leased connection. Must be released or discarded; dropping it discards.
pub struct PooledConnection {
    conn: Connection,
    slot: SlotGuard,
}

impl PooledConnection {
    fn new(pool: Arc<PoolInner>, conn: Connection) -> Self {
        PooledConnection {
            conn,
            slot: SlotGuard { pool, armed: true },
        }
    }

    /// Executes a single RESP command and returns the parsed response.
    pub fn exec(&mut self, args: &[&[u8]]) -> ClientResult<RespValue> {
        self.conn.exec(args)
    }

    /// Hands the connection back to the idle set.
    pub fn release(self) {
        let PooledConnection { conn, mut slot } = self;
        slot.armed = false;
        return_connection(&slot.pool, conn);
    }

    /// Closes the connection and frees its pool slot.
    pub fn discard(self, reason: &ClientError) {
        let PooledConnection { conn, mut slot } = self;
        slot.armed = false;
        warn!(addr = %slot.pool.config.addr, %reason, "discarding connection");
        drop(conn);
        release_slot(&slot.pool);
    }
}

impl Wire for PooledConnection {
    fn write_batch(&mut self, payload: &[u8]) -> ClientResult<()> {
        self.conn.write_all(payload)
    }

    fn read_reply(&mut self) -> ClientResult<RespValue> {
        self.conn.read_reply()
    }
}

/// Single TCP connection with reusable buffers.
///
/// The buffers are stored on the connection to avoid per-call allocations.
pub struct Connection {
    // Buffered reader reduces syscalls while still allowing direct writes.
    reader: BufReader<TcpStream>,
    line_buf: Vec<u8>,
    write_buf: Vec<u8>,
}

impl Connection {
    fn connect(config: &PoolConfig) -> ClientResult<Self> {
        let stream = connect_stream(config)?;
        if let Some(timeout) = config.read_timeout {
            stream.set_read_timeout(Some(timeout))?;
        }
        if let Some(timeout) = config.write_timeout {
            stream.set_write_timeout(Some(timeout))?;
        }
        // Disable Nagle to keep request latency low for small payloads.
        stream.set_nodelay(true)?;

        Ok(Connection {
            reader: BufReader::new(stream),
            line_buf: Vec::with_capacity(128),
            write_buf: Vec::with_capacity(256),
        })
    }

    fn exec(&mut self, args: &[&[u8]]) -> ClientResult<RespValue> {
        self.write_buf.clear();
        encode_command(args, &mut self.write_buf);

        let stream = self.reader.get_mut();
        stream.write_all(&self.write_buf)?;
        stream.flush()?;

        self.read_reply()
    }

    fn write_all(&mut self, payload: &[u8]) -> ClientResult<()> {
        let stream = self.reader.get_mut();
        stream.write_all(payload)?;
        stream.flush()?;
        Ok(())
    }

    fn read_reply(&mut self) -> ClientResult<RespValue> {
        read_response(&mut self.reader, &mut self.line_buf)
    }
}

fn connect_stream(config: &PoolConfig) -> ClientResult<TcpStream> {
    let addr: SocketAddr = config.addr.parse().map_err(|_| ClientError::InvalidAddress)?;
    let stream = match config.connect_timeout {
        Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
        None => TcpStream::connect(addr),
    };
    stream.map_err(|err| ClientError::Connect(Arc::new(err)))
}
