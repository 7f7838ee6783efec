//! # HybridKV Pipelining Client
//!
//! Purpose: Provide a lightweight, synchronous Redis-compatible client with
//! connection pooling and command pipelining: many commands, one write, one
//! round trip.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Reuse TCP connections to avoid repeated connects.
//! 2. **Batch Then Flush**: Pipelines queue commands without I/O and send the
//!    whole batch in a single write.
//! 3. **Minimal Allocation**: Reuse buffers for RESP framing and parsing.
//! 4. **Protocol Clarity**: Encode/parse RESP2 explicitly for correctness.
//! 5. **Never Reuse a Desynced Stream**: Connections that saw IO or framing
//!    errors are discarded, not pooled.
//!
//! ## Example
//!
//! ```no_run
//! use hkv_pipeline::KVClient;
//!
//! let client = KVClient::connect("127.0.0.1:6379")?;
//! let outcome = client.pipelined(|pipe| {
//!     pipe.set(b"alpha", b"1")?;
//!     pipe.incr(b"alpha")?;
//!     Ok(())
//! })?;
//! for cmd in outcome.commands() {
//!     println!("{cmd} -> {:?}", cmd.result());
//! }
//! # Ok::<(), hkv_pipeline::ClientError>(())
//! ```

mod broker;
mod client;
mod cmd;
mod error;
mod pipeline;
mod pool;
mod resp;

pub use broker::{Broker, Wire};
pub use client::{ClientConfig, ClientTtl, KVClient};
pub use cmd::Cmd;
pub use error::{ClientError, ClientResult, ErrorKind};
pub use pipeline::{BatchOutcome, Pipeline};
pub use pool::{ConnectionPool, PoolConfig, PoolStats, PooledConnection};
pub use resp::{encode_command, read_response, RespValue};
