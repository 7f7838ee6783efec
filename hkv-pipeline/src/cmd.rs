//! # Queued Commands
//!
//! Purpose: Represent one RESP command that is built by the caller, filled in
//! by a pipeline execution, and inspected by the caller afterwards.
//!
//! ## Design Principles
//! 1. **Shared Handle**: Callers keep an `Arc<Cmd>`; the pipeline only clones
//!    the handle, never the arguments.
//! 2. **Write-Once Result**: The slot is a `OnceLock`, so a reply assigned by
//!    one execution can never be replaced.
//! 3. **Opaque Payload**: The pipeline only asks a command to serialize itself.

use std::fmt;
use std::sync::{Arc, OnceLock};

use bytes::{BufMut, Bytes};
use tracing::warn;

use crate::error::{ClientError, ClientResult};
use crate::resp::{encode_command, RespValue};

/// One command plus its write-once result slot.
pub struct Cmd {
    args: Vec<Bytes>,
    result: OnceLock<ClientResult<RespValue>>,
}

impl Cmd {
    /// Creates a command from raw arguments; the first is the command name.
    pub fn new(args: &[&[u8]]) -> Self {
        Self::from_args(args.iter().map(|arg| Bytes::copy_from_slice(arg)).collect())
    }

    /// Creates a command from already owned arguments.
    pub fn from_args(args: Vec<Bytes>) -> Self {
        Cmd {
            args,
            result: OnceLock::new(),
        }
    }

    /// Command arguments, including the name.
    pub fn args(&self) -> &[Bytes] {
        &self.args
    }

    /// Command name, or an empty slice for an argument-less command.
    pub fn name(&self) -> &[u8] {
        self.args.first().map(|name| &name[..]).unwrap_or_default()
    }

    /// Appends the RESP2 encoding of this command to `out`.
    pub fn write_to<B: BufMut>(&self, out: &mut B) {
        encode_command(&self.args, out);
    }

    /// Result of the command, or `None` if it has not been executed yet.
    pub fn result(&self) -> Option<&ClientResult<RespValue>> {
        self.result.get()
    }

    /// True once a reply or error has been assigned.
    pub fn is_done(&self) -> bool {
        self.result.get().is_some()
    }

    /// Reply value, if the command succeeded.
    pub fn value(&self) -> Option<&RespValue> {
        self.result.get().and_then(|result| result.as_ref().ok())
    }

    /// Error recorded for the command, if any.
    pub fn err(&self) -> Option<&ClientError> {
        self.result.get().and_then(|result| result.as_ref().err())
    }

    /// Assigns a decoded reply. Error replies are stored as `ClientError::Server`.
    pub(crate) fn set_reply(&self, reply: RespValue) {
        self.set_result(reply.into_result());
    }

    pub(crate) fn set_err(&self, err: ClientError) {
        self.set_result(Err(err));
    }

    fn set_result(&self, result: ClientResult<RespValue>) {
        if self.result.set(result).is_err() {
            warn!(cmd = %self, "command already has a result; keeping the first one");
        }
    }
}

impl fmt::Display for Cmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, arg) in self.args.iter().enumerate() {
            if idx > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}", String::from_utf8_lossy(arg))?;
        }
        Ok(())
    }
}

impl fmt::Debug for Cmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cmd")
            .field("cmd", &self.to_string())
            .field("result", &self.result.get())
            .finish()
    }
}

/// Stamps the same error on every command in a batch.
pub(crate) fn set_cmds_err<'a, I>(cmds: I, err: &ClientError)
where
    I: IntoIterator<Item = &'a Arc<Cmd>>,
{
    for cmd in cmds {
        cmd.set_err(err.clone());
    }
}
