//! # Client Errors
//!
//! Purpose: One error type shared by the pool, the codec, single commands and
//! pipelined batches.
//!
//! ## Design Principles
//! 1. **Cloneable Errors**: A batch failure is stamped on every queued command,
//!    so IO errors are held behind `Arc`.
//! 2. **Classify, Don't Inspect**: `ErrorKind` tells the pipeline whether a
//!    connection may be reused without matching on individual variants.

use std::io;
use std::sync::Arc;

use thiserror::Error;

/// Result type for the client and pipeline.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by the client, the pool and pipelines.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// The pipeline was closed before the call.
    #[error("pipeline is closed")]
    Closed,
    /// Pool is at capacity and no idle connections are available.
    #[error("connection pool exhausted")]
    PoolExhausted,
    /// Address could not be parsed into a socket address.
    #[error("invalid address")]
    InvalidAddress,
    /// Dialing a new connection failed.
    #[error("connect error: {0}")]
    Connect(Arc<io::Error>),
    /// Network or IO failure while reading/writing.
    #[error("io error: {0}")]
    Io(Arc<io::Error>),
    /// RESP2 framing or parse error.
    #[error("protocol error")]
    Protocol,
    /// Server returned an error reply.
    #[error("server error: {}", String::from_utf8_lossy(.message))]
    Server { message: Vec<u8> },
    /// Response type did not match the expected command response.
    #[error("unexpected response")]
    UnexpectedResponse,
    /// Configuration was rejected before any connection was made.
    #[error("invalid config: {0}")]
    Config(String),
}

/// Coarse classification used to decide connection disposition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Mutating call on a closed pipeline.
    Closed,
    /// The broker could not supply a connection.
    Acquisition,
    /// Byte-stream failure on a leased connection.
    Transport,
    /// Malformed reply framing; stream position is unknown.
    Protocol,
    /// Well-formed reply that carries an error for one command.
    Reply,
    /// Invalid configuration.
    Config,
}

impl ClientError {
    /// Returns the kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::Closed => ErrorKind::Closed,
            ClientError::PoolExhausted | ClientError::InvalidAddress | ClientError::Connect(_) => {
                ErrorKind::Acquisition
            }
            ClientError::Io(_) => ErrorKind::Transport,
            ClientError::Protocol => ErrorKind::Protocol,
            ClientError::Server { .. } | ClientError::UnexpectedResponse => ErrorKind::Reply,
            ClientError::Config(_) => ErrorKind::Config,
        }
    }

    /// True for byte-stream failures after which nothing more can be read.
    pub fn is_transport(&self) -> bool {
        self.kind() == ErrorKind::Transport
    }

    /// True when a connection that observed this error must not be pooled.
    pub fn breaks_connection(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transport | ErrorKind::Protocol)
    }
}

impl From<io::Error> for ClientError {
    fn from(err: io::Error) -> Self {
        ClientError::Io(Arc::new(err))
    }
}
