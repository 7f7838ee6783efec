//! # Broker Seam
//!
//! The pipeline leases exactly one connection per execution and must say
//! explicitly whether it goes back to the pool or gets dropped. These traits
//! are that contract; `ConnectionPool` is the TCP implementation.

use crate::error::{ClientError, ClientResult};
use crate::resp::RespValue;

/// Lends and reclaims connections.
pub trait Broker {
    /// Connection type handed out by `acquire`.
    type Conn: Wire;

    /// Leases a connection, dialing a new one if needed.
    fn acquire(&self) -> ClientResult<Self::Conn>;

    /// Returns a healthy connection for reuse.
    fn release(&self, conn: Self::Conn);

    /// Drops a connection whose stream state can no longer be trusted.
    fn discard(&self, conn: Self::Conn, reason: &ClientError);
}

/// Byte-stream operations the pipeline needs from a leased connection.
pub trait Wire {
    /// Writes the whole payload as one contiguous write and flushes it.
    fn write_batch(&mut self, payload: &[u8]) -> ClientResult<()>;

    /// Reads and decodes exactly one reply.
    fn read_reply(&mut self) -> ClientResult<RespValue>;
}
