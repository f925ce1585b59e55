//! Types for launching a tracee and driving it one ptrace-stop at a time.

use std::fs;
use std::io;
use std::marker::PhantomData;
use std::os::unix::fs::FileExt;
use std::os::unix::process::CommandExt;
use std::process::Command;
use std::thread::{self, ThreadId};

use nix::sys::{
    ptrace,
    wait::{self, WaitStatus},
};
use tracing::{debug, error, info, trace};

use crate::error::{Error, Result, ResultExt};

pub use nix::sys::ptrace::Options;
pub use nix::unistd::Pid;

/// POSIX signal.
pub use nix::sys::signal::Signal;

/// Register state of a tracee.
pub type Registers = libc::user_regs_struct;

/// Options set on every launched tracee once it reaches its post-exec stop.
///
/// `PTRACE_O_TRACESYSGOOD` lets us tell syscall-stops apart from a `SIGTRAP`
/// raised by a trap instruction.
pub const TRACE_OPTIONS: Options = Options::PTRACE_O_TRACESYSGOOD;

/// A view of a register file that exposes what the tracer needs.
pub trait RegisterSnapshot: Copy {
    /// Address of the next instruction to execute.
    fn pc(&self) -> u64;

    fn set_pc(&mut self, pc: u64);

    /// Number of the syscall the tracee is in, valid at syscall-stops.
    fn syscall_id(&self) -> u64;
}

/// What one `waitpid(2)` observed about the tracee.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Stop {
    // syscall-enter-stop or syscall-exit-stop, indistinguishable to the tracer.
    SyscallBoundary,

    // signal-delivery-stop for `SIGTRAP`: a trap instruction, a completed
    // single-step, or the post-exec stop.
    Trap,

    // signal-delivery-stop for anything else.
    Signal { signal: Signal },

    Exited { exit_code: i32 },
    Signaled {
        signal: Signal,
        core_dumped: bool,
    },
}

impl Stop {
    fn from_wait_status(status: WaitStatus) -> Result<Self> {
        let stop = match status {
            WaitStatus::Exited(_pid, exit_code) => Stop::Exited { exit_code },
            WaitStatus::Signaled(_pid, signal, core_dumped) => Stop::Signaled { signal, core_dumped },
            WaitStatus::Stopped(_pid, Signal::SIGTRAP) => Stop::Trap,
            WaitStatus::Stopped(_pid, signal) => Stop::Signal { signal },
            WaitStatus::PtraceSyscall(_pid) => Stop::SyscallBoundary,
            WaitStatus::PtraceEvent(..) => {
                // We never request any `PTRACE_O_TRACE*` event options.
                internal_error!("unexpected ptrace-event-stop")
            },
            // Assume `!WNOHANG`, `!WCONTINUED`.
            WaitStatus::Continued(_) | WaitStatus::StillAlive => {
                internal_error!("unreachable `wait()` status")
            },
        };

        Ok(stop)
    }

    /// Returns `true` if the tracee is gone after this stop.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stop::Exited { .. } | Stop::Signaled { .. })
    }
}

/// Restart requests, which resume stopped tracees.
///
/// The restart mode determines the possible subsequent stops of the restarted tracee.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Restart {
    Step,
    Continue,
    Syscall,
}

/// Execution state of a traced process, as last observed by its tracer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProcessState {
    Running,

    // Stopped right after `execve()`, before the first instruction.
    Attached,

    StoppedAtSyscall,
    StoppedAtBreakpoint,
    StoppedSingleStep,
    StoppedBySignal(Signal),
    Exited(i32),
    Killed(Signal),
}

impl ProcessState {
    /// State entered when `stop` is observed after restarting with `restart`.
    ///
    /// `restart` is `None` for the very first stop of a launched tracee.
    pub fn after(restart: Option<Restart>, stop: Stop) -> Self {
        match stop {
            Stop::Exited { exit_code } => ProcessState::Exited(exit_code),
            Stop::Signaled { signal, .. } => ProcessState::Killed(signal),
            Stop::Signal { signal } => ProcessState::StoppedBySignal(signal),
            Stop::SyscallBoundary => ProcessState::StoppedAtSyscall,
            Stop::Trap => match restart {
                None => ProcessState::Attached,
                Some(Restart::Step) => ProcessState::StoppedSingleStep,
                Some(Restart::Continue) | Some(Restart::Syscall) => ProcessState::StoppedAtBreakpoint,
            },
        }
    }

    pub fn is_stopped(&self) -> bool {
        !matches!(self, ProcessState::Running | ProcessState::Exited(_) | ProcessState::Killed(_))
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessState::Exited(_) | ProcessState::Killed(_))
    }
}

/// Synchronous control over a single stopped tracee.
///
/// Every method except [`Tracer::wait_for_stop()`] requires the tracee to be in a
/// ptrace-stop, and fails otherwise.
pub trait Tracer {
    type Registers: RegisterSnapshot;

    fn pid(&self) -> Pid;

    fn state(&self) -> ProcessState;

    /// Block until the running tracee stops or terminates.
    fn wait_for_stop(&mut self) -> Result<Stop>;

    /// Resume the stopped tracee, suppressing any pending signal.
    fn restart(&mut self, restart: Restart) -> Result<()>;

    fn registers(&self) -> Result<Self::Registers>;

    fn set_registers(&mut self, regs: Self::Registers) -> Result<()>;

    fn peek_byte(&self, addr: u64) -> Result<u8>;

    fn poke_bytes(&mut self, addr: u64, data: &[u8]) -> Result<()>;

    /// Run to the next syscall-enter-stop or syscall-exit-stop.
    fn syscall(&mut self) -> Result<()> {
        self.restart(Restart::Syscall)
    }

    /// Execute exactly one instruction.
    fn step(&mut self) -> Result<()> {
        self.restart(Restart::Step)
    }

    fn cont(&mut self) -> Result<()> {
        self.restart(Restart::Continue)
    }
}

/// Tracer for a single-threaded Linux process.
///
/// `ptrace(2)` ties a tracee to the thread that attached to it, so a `Ptracer` is
/// not `Send`, and every request checks that it comes from the thread which
/// [spawned](Ptracer::spawn()) the tracee. Use [`TracerThread`](crate::TracerThread)
/// to drive a tracee from elsewhere.
#[derive(Debug)]
pub struct Ptracer {
    pid: Pid,
    state: ProcessState,
    last_restart: Option<Restart>,
    owner: ThreadId,

    #[doc(hidden)]
    _not_send: PhantomData<*const ()>,
}

impl Ptracer {
    /// Spawn `cmd` for tracing, and wait for it to stop after `execve()`.
    ///
    /// The command is configured to request `PTRACE_TRACEME` after `fork()` and
    /// pre-`exec()`, so the tracee stops before its first instruction executes.
    pub fn spawn(mut cmd: Command) -> Result<Self> {
        let program = cmd.get_program().to_string_lossy().into_owned();

        // On fork, request `PTRACE_TRACEME`.
        unsafe {
            cmd.pre_exec(|| ptrace::traceme().map_err(|err| io::Error::from_raw_os_error(err as i32)))
        };

        let child = cmd
            .spawn()
            .map_err(|source| Error::Launch { program: program.clone(), source })?;
        let pid = Pid::from_raw(child.id() as i32);

        info!(pid = pid.as_raw(), %program, "spawned tracee");

        let mut tracer = Self {
            pid,
            state: ProcessState::Running,
            last_restart: None,
            owner: thread::current().id(),
            _not_send: PhantomData,
        };

        // The self-attached tracee reports its successful `execve()` as a `SIGTRAP`.
        match tracer.wait_for_stop()? {
            Stop::Trap => {},
            stop => {
                let reason = format!("tracee did not stop after exec: {:?}", stop);
                let source = io::Error::new(io::ErrorKind::Other, reason);
                return Err(Error::Launch { program, source });
            },
        }

        ptrace::setoptions(pid, TRACE_OPTIONS).died_if_esrch_or(pid, Error::OS)?;

        Ok(tracer)
    }

    fn check_owner(&self) -> Result<()> {
        if thread::current().id() != self.owner {
            error!(pid = self.pid.as_raw(), owner = ?self.owner, "tracee accessed from non-owner thread");
            return Err(Error::WrongThread { pid: self.pid });
        }

        Ok(())
    }

    fn check_stopped(&self) -> Result<()> {
        self.check_owner()?;

        let pid = self.pid;

        match self.state {
            ProcessState::Running => Err(Error::NotStopped { pid }),
            state if state.is_terminal() => Err(Error::TraceeExited { pid }),
            _ => Ok(()),
        }
    }

    fn proc_mem_path(&self) -> String {
        format!("/proc/{}/mem", self.pid.as_raw())
    }

    fn memory(&self, write: bool) -> io::Result<fs::File> {
        fs::OpenOptions::new()
            .read(true)
            .write(write)
            .open(self.proc_mem_path())
    }
}

impl Tracer for Ptracer {
    type Registers = Registers;

    fn pid(&self) -> Pid {
        self.pid
    }

    fn state(&self) -> ProcessState {
        self.state
    }

    fn wait_for_stop(&mut self) -> Result<Stop> {
        self.check_owner()?;

        let pid = self.pid;

        match self.state {
            ProcessState::Running => {},
            state if state.is_terminal() => return Err(Error::TraceeExited { pid }),
            _ => return Err(Error::NotRunning { pid }),
        }

        let status = wait::waitpid(pid, None).map_err(|source| Error::Wait { pid, source })?;
        trace!(?status, "wait status");

        let stop = Stop::from_wait_status(status)?;
        self.state = ProcessState::after(self.last_restart, stop);

        if stop.is_terminal() {
            info!(pid = pid.as_raw(), ?stop, "tracee terminated");
        }

        Ok(stop)
    }

    fn restart(&mut self, mode: Restart) -> Result<()> {
        self.check_stopped()?;

        let pid = self.pid;

        debug!(pid = pid.as_raw(), ?mode, "restarting tracee");

        let res = match mode {
            Restart::Step => ptrace::step(pid, None),
            Restart::Continue => ptrace::cont(pid, None),
            Restart::Syscall => ptrace::syscall(pid, None),
        };

        res.died_if_esrch_or(pid, |source| Error::Restart { pid, mode, source })?;

        self.state = ProcessState::Running;
        self.last_restart = Some(mode);

        Ok(())
    }

    fn registers(&self) -> Result<Registers> {
        self.check_stopped()?;

        let pid = self.pid;
        ptrace::getregs(pid).died_if_esrch_or(pid, |source| Error::RegisterAccess { pid, source })
    }

    fn set_registers(&mut self, regs: Registers) -> Result<()> {
        self.check_stopped()?;

        let pid = self.pid;
        ptrace::setregs(pid, regs).died_if_esrch_or(pid, |source| Error::RegisterAccess { pid, source })
    }

    fn peek_byte(&self, addr: u64) -> Result<u8> {
        self.check_stopped()?;

        let mut data = [0u8; 1];
        self.memory(false)
            .and_then(|mem| mem.read_exact_at(&mut data, addr))
            .map_err(|source| Error::MemoryAccess { pid: self.pid, addr, source })?;

        Ok(data[0])
    }

    fn poke_bytes(&mut self, addr: u64, data: &[u8]) -> Result<()> {
        self.check_stopped()?;

        trace!(pid = self.pid.as_raw(), addr, len = data.len(), "writing tracee memory");

        self.memory(true)
            .and_then(|mem| mem.write_all_at(data, addr))
            .map_err(|source| Error::MemoryAccess { pid: self.pid, addr, source })
    }
}
