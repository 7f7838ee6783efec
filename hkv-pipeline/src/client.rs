//! # Synchronous Client API
//!
//! Purpose: Expose a compact, blocking API for issuing Redis-compatible
//! commands to the HybridKV server over RESP2, and hand out pipelines that
//! share the client's pool.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `KVClient` hides pooling and protocol details.
//! 2. **Borrow-Friendly API**: Accept `&[u8]` to avoid unnecessary copies.
//! 3. **Fail Fast**: Protocol violations surface immediately as errors.
//! 4. **Composition**: A `Pipeline` holds a clone of the pool handle, not the
//!    client, so it keeps its own queue and lifecycle.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ClientError, ClientResult};
use crate::pipeline::{BatchOutcome, Pipeline};
use crate::pool::{ConnectionPool, PoolConfig, PoolStats};
use crate::resp::RespValue;

/// TTL state returned by the server, mirroring Redis semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientTtl {
    /// Key is missing or already expired.
    Missing,
    /// Key exists without expiration.
    NoExpiry,
    /// Key expires after the provided duration.
    ExpiresIn(Duration),
}

impl ClientTtl {
    /// Maps a TTL integer reply onto the TTL state.
    pub fn from_reply(reply: &RespValue) -> ClientResult<Self> {
        match reply {
            RespValue::Integer(-2) => Ok(ClientTtl::Missing),
            RespValue::Integer(-1) => Ok(ClientTtl::NoExpiry),
            RespValue::Integer(value) if *value >= 0 => {
                Ok(ClientTtl::ExpiresIn(Duration::from_secs(*value as u64)))
            }
            RespValue::Error(message) => Err(ClientError::Server {
                message: message.clone(),
            }),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }
}

/// Configuration for the synchronous client and its pool.
///
/// Timeouts are written as milliseconds in serialized form
/// (`read_timeout_ms`, `write_timeout_ms`, `connect_timeout_ms`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server address, e.g. "127.0.0.1:6379".
    pub addr: String,
    /// Maximum idle connections kept in the pool.
    pub max_idle: usize,
    /// Maximum total connections (idle + in-use).
    pub max_total: usize,
    /// Optional TCP read timeout. Bounds each pipelined reply read.
    #[serde(rename = "read_timeout_ms", with = "duration_ms")]
    pub read_timeout: Option<Duration>,
    /// Optional TCP write timeout. Bounds the batch write.
    #[serde(rename = "write_timeout_ms", with = "duration_ms")]
    pub write_timeout: Option<Duration>,
    /// Optional TCP connect timeout.
    #[serde(rename = "connect_timeout_ms", with = "duration_ms")]
    pub connect_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            addr: "127.0.0.1:6379".to_string(),
            max_idle: 8,
            max_total: 16,
            read_timeout: None,
            write_timeout: None,
            connect_timeout: None,
        }
    }
}

impl ClientConfig {
    /// Parses a JSON document; missing fields take their defaults.
    pub fn from_json(raw: &str) -> ClientResult<Self> {
        let config: ClientConfig =
            serde_json::from_str(raw).map_err(|err| ClientError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings the pool cannot honour.
    pub fn validate(&self) -> ClientResult<()> {
        if self.addr.trim().is_empty() {
            return Err(ClientError::Config("addr must not be empty".into()));
        }
        if self.max_total == 0 {
            return Err(ClientError::Config("max_total must be at least 1".into()));
        }
        if self.max_idle > self.max_total {
            return Err(ClientError::Config(format!(
                "max_idle ({}) exceeds max_total ({})",
                self.max_idle, self.max_total
            )));
        }
        Ok(())
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        value
            .map(|timeout| timeout.as_millis() as u64)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}

/// Synchronous client with connection pooling.
///
/// This is a facade over the pool and RESP encoder/decoder. Each call acquires
/// a connection, executes one command, and releases or discards it.
pub struct KVClient {
    pool: ConnectionPool,
}

impl KVClient {
    /// Creates a client with default configuration.
    pub fn connect(addr: impl Into<String>) -> ClientResult<Self> {
        let config = ClientConfig {
            addr: addr.into(),
            ..ClientConfig::default()
        };
        Self::with_config(config)
    }

    /// Creates a client with a custom configuration.
    pub fn with_config(config: ClientConfig) -> ClientResult<Self> {
        config.validate()?;
        let pool = ConnectionPool::new(PoolConfig {
            addr: config.addr,
            max_idle: config.max_idle,
            max_total: config.max_total,
            read_timeout: config.read_timeout,
            write_timeout: config.write_timeout,
            connect_timeout: config.connect_timeout,
        })?;
        Ok(KVClient { pool })
    }

    /// Opens a pipeline sharing this client's pool.
    pub fn pipeline(&self) -> Pipeline {
        Pipeline::new(self.pool.clone())
    }

    /// Builds a batch with `build`, executes it and closes the pipeline.
    ///
    /// If `build` fails, nothing is executed and its error is returned.
    pub fn pipelined<F>(&self, build: F) -> ClientResult<BatchOutcome>
    where
        F: FnOnce(&mut Pipeline) -> ClientResult<()>,
    {
        let mut pipe = self.pipeline();
        if let Err(err) = build(&mut pipe) {
            pipe.close();
            return Err(err);
        }
        let outcome = pipe.exec();
        pipe.close();
        outcome
    }

    /// Current pool occupancy.
    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Fetches a value by key.
    ///
    /// Returns `Ok(None)` when the key is missing.
    pub fn get(&self, key: &[u8]) -> ClientResult<Option<Vec<u8>>> {
        match self.exec(&[b"GET", key])? {
            RespValue::Bulk(data) => Ok(data),
            RespValue::Error(message) => Err(ClientError::Server { message }),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Sets a value for a key without expiration.
    pub fn set(&self, key: &[u8], value: &[u8]) -> ClientResult<()> {
        match self.exec(&[b"SET", key, value])? {
            RespValue::Simple(_) => Ok(()),
            RespValue::Error(message) => Err(ClientError::Server { message }),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Sets a value and attaches an expiration in seconds.
    pub fn set_with_ttl(&self, key: &[u8], value: &[u8], ttl: Duration) -> ClientResult<()> {
        let seconds = ttl.as_secs().to_string();
        match self.exec(&[b"SET", key, value, b"EX", seconds.as_bytes()])? {
            RespValue::Simple(_) => Ok(()),
            RespValue::Error(message) => Err(ClientError::Server { message }),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Deletes a key. Returns true when a key was removed.
    pub fn delete(&self, key: &[u8]) -> ClientResult<bool> {
        match self.exec(&[b"DEL", key])? {
            RespValue::Integer(count) => Ok(count > 0),
            RespValue::Error(message) => Err(ClientError::Server { message }),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Sets a time-to-live on a key. Returns true when the TTL was set.
    pub fn expire(&self, key: &[u8], ttl: Duration) -> ClientResult<bool> {
        let seconds = ttl.as_secs().to_string();
        match self.exec(&[b"EXPIRE", key, seconds.as_bytes()])? {
            RespValue::Integer(value) => Ok(value == 1),
            RespValue::Error(message) => Err(ClientError::Server { message }),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Returns TTL status for a key.
    pub fn ttl(&self, key: &[u8]) -> ClientResult<ClientTtl> {
        ClientTtl::from_reply(&self.exec(&[b"TTL", key])?)
    }

    /// Pings the server. Returns the raw response payload.
    pub fn ping(&self, payload: Option<&[u8]>) -> ClientResult<Vec<u8>> {
        let response = match payload {
            Some(data) => self.exec(&[b"PING", data])?,
            None => self.exec(&[b"PING"])?,
        };
        match response {
            RespValue::Simple(text) => Ok(text),
            RespValue::Bulk(Some(data)) => Ok(data),
            RespValue::Error(message) => Err(ClientError::Server { message }),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    fn exec(&self, args: &[&[u8]]) -> ClientResult<RespValue> {
        let mut conn = self.pool.acquire()?;
        match conn.exec(args) {
            Ok(reply) => {
                conn.release();
                Ok(reply)
            }
            Err(err) => {
                // IO or framing failure: the stream can't be trusted any more.
                conn.discard(&err);
                Err(err)
            }
        }
    }
}
