#[cfg(not(all(target_os = "linux", target_arch = "x86_64")))]
compile_error!("ptdbg only supports x86_64 Linux");

#[macro_use]
pub mod error;

pub mod breakpoint;
pub mod command;
pub mod controller;
pub mod ptracer;
pub mod session;
pub mod shell;
pub mod syscall;
pub mod x86;

#[cfg(test)]
pub(crate) mod testing;

pub use breakpoint::{Breakpoint, BreakpointTable, HitState, StepOver};
pub use command::Command;
pub use controller::TracerThread;
pub use error::{Error, Result};
pub use ptracer::{Pid, ProcessState, Ptracer, RegisterSnapshot, Registers, Restart, Signal, Stop, Tracer};
pub use session::{Execute, Outcome, Session, SessionConfig};
pub use syscall::{Event, SyscallTrace};
