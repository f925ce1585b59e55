use std::io;

use nix::errno::Errno;

use crate::ptracer::{Pid, Restart};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Could not launch tracee = {program}")]
    Launch {
        program: String,
        source: io::Error,
    },

    #[error("Could not wait on tracee = {pid}")]
    Wait { pid: Pid, source: nix::Error },

    #[error("Could not restart tracee = {pid} with mode = {mode:?}")]
    Restart { pid: Pid, mode: Restart, source: nix::Error },

    #[error("Could not access registers of tracee = {pid}")]
    RegisterAccess { pid: Pid, source: nix::Error },

    #[error("Could not access memory of tracee = {pid} at 0x{addr:x}")]
    MemoryAccess {
        pid: Pid,
        addr: u64,
        source: io::Error,
    },

    #[error("Invalid argument `{input}`: {reason}")]
    Parse { input: String, reason: String },

    #[error("Unknown command `{name}`")]
    UnknownCommand { name: String },

    #[error("Tracee died while ptrace request was in-flight (pid = {pid})")]
    TraceeDied { pid: Pid, source: nix::Error },

    #[error("Tracee = {pid} has already exited")]
    TraceeExited { pid: Pid },

    #[error("Tracee = {pid} is not stopped")]
    NotStopped { pid: Pid },

    #[error("Tracee = {pid} is not running, nothing to wait for")]
    NotRunning { pid: Pid },

    #[error("Tracee = {pid} controlled from a thread that does not own it")]
    WrongThread { pid: Pid },

    #[error("Tracer thread is gone")]
    Disconnected,

    #[error("Input/output error")]
    IO(#[from] io::Error),

    #[error("OS error")]
    OS(#[from] nix::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns `true` if the error does not end the session that raised it.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::UnknownCommand { .. })
    }

    /// Returns `true` if the tracee is known to be gone.
    pub fn tracee_died(&self) -> bool {
        matches!(self, Error::TraceeDied { .. } | Error::TraceeExited { .. })
    }
}

pub(crate) trait ResultExt<T> {
    /// Map `ESRCH` to [`Error::TraceeDied`], and any other errno with `wrap`.
    fn died_if_esrch_or(self, pid: Pid, wrap: impl FnOnce(nix::Error) -> Error) -> Result<T>;
}

impl<T> ResultExt<T> for nix::Result<T> {
    fn died_if_esrch_or(self, pid: Pid, wrap: impl FnOnce(nix::Error) -> Error) -> Result<T> {
        self.map_err(|source| {
            if source == Errno::ESRCH {
                Error::TraceeDied { pid, source }
            } else {
                wrap(source)
            }
        })
    }
}

macro_rules! internal_error {
    ($msg: expr) => {
        return Err($crate::error::Error::Internal($msg.into()))
    };
}
