use std::io;

use nix::errno::Errno;
use nix::unistd::Pid;


pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The build command had no executable.
    #[error("Build command is empty")]
    EmptyCommand,

    /// The build command could not be spawned under trace.
    #[error("Could not launch build command = `{command}`")]
    Launch {
        command: String,
        source: io::Error,
    },

    /// A ptrace or wait request failed mid-trace.
    #[error("Trace step {op:?} failed for tracee = {pid}")]
    Trace {
        pid: Pid,
        op: TraceOp,
        source: Errno,
    },

    /// The tracee vanished between stops.
    #[error("Tracee = {pid} died mid-operation")]
    TraceeDied { pid: Pid },

    /// A path argument had no terminator within the read budget.
    #[error("Path at {addr:#x} in tracee = {pid} exceeds {limit} bytes")]
    PathOverrun {
        pid: Pid,
        addr: u64,
        limit: usize,
    },
}

/// Trace request that failed, for error context.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TraceOp {
    Wait,
    SetOptions,
    ReadRegisters,
    ReadMemory,
    Restart,
}

impl Error {
    /// True if the target command could not be started at all.
    pub fn is_launch(&self) -> bool {
        matches!(self, Error::EmptyCommand | Error::Launch { .. })
    }

    /// True if the error was caused by the tracee unexpectedly dying.
    pub fn tracee_died(&self) -> bool {
        matches!(self, Error::TraceeDied { .. })
    }
}

pub(crate) trait ResultExt<T> {
    /// Wrap an errno with the failed operation and pid, mapping `ESRCH` to
    /// [`Error::TraceeDied`].
    fn trace_err(self, pid: Pid, op: TraceOp) -> Result<T>;
}

impl<T> ResultExt<T> for std::result::Result<T, Errno> {
    fn trace_err(self, pid: Pid, op: TraceOp) -> Result<T> {
        self.map_err(|source| {
            if source == Errno::ESRCH {
                Error::TraceeDied { pid }
            } else {
                Error::Trace { pid, op, source }
            }
        })
    }
}
