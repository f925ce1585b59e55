//! Report each syscall a tracee completes.
//!
//! `ptrace(2)` stops a tracee restarted with `PTRACE_SYSCALL` both on entry to and
//! exit from every syscall, and the two stops look the same. We tell them apart
//! by counting: the first stop is an entry, the second its exit, and so on.
//!
//! The count assumes nothing else stops the tracee in between. A signal-delivery-stop
//! is counted like a syscall-stop, which swaps entries and exits from then on.

use std::fmt;
use std::iter::FusedIterator;

use tracing::{debug, trace};

use crate::error::Result;
use crate::ptracer::{Pid, RegisterSnapshot, Signal, Stop, Tracer};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Event {
    /// The tracee returned from syscall number `id`.
    Syscall { pid: Pid, id: u64 },

    Exit { pid: Pid, exit_code: i32 },
    Killed { pid: Pid, signal: Signal },
}

impl Event {
    pub fn pid(&self) -> Pid {
        match self {
            Event::Syscall { pid, .. } | Event::Exit { pid, .. } | Event::Killed { pid, .. } => *pid,
        }
    }

    /// Returns `true` for the last event of a trace.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Event::Syscall { .. })
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Syscall { pid, id } => write!(f, "[pid {}] syscall {}", pid, id),
            Event::Exit { pid, exit_code } => write!(f, "[pid {}] exited with status {}", pid, exit_code),
            Event::Killed { pid, signal } => write!(f, "[pid {}] killed by {:?}", pid, signal),
        }
    }
}

/// Syscall events of a stopped tracee, in completion order.
///
/// The iterator ends after the exit event or after the first error.
pub struct SyscallTrace<T: Tracer> {
    tracer: T,
    traps: u64,
    done: bool,
}

impl<T: Tracer> SyscallTrace<T> {
    pub fn new(tracer: T) -> Self {
        Self { tracer, traps: 0, done: false }
    }

    pub fn tracer(&self) -> &T {
        &self.tracer
    }

    /// Syscall-stops seen so far.
    pub fn traps(&self) -> u64 {
        self.traps
    }

    fn next_event(&mut self) -> Result<Event> {
        let pid = self.tracer.pid();

        loop {
            self.tracer.syscall()?;

            match self.tracer.wait_for_stop()? {
                Stop::Exited { exit_code } => return Ok(Event::Exit { pid, exit_code }),
                Stop::Signaled { signal, .. } => return Ok(Event::Killed { pid, signal }),
                Stop::SyscallBoundary => {},
                stop => debug!(?stop, traps = self.traps, "counting non-syscall stop as syscall-stop"),
            }

            self.traps += 1;

            if self.traps % 2 == 0 {
                let id = self.tracer.registers()?.syscall_id();
                trace!(pid = pid.as_raw(), id, "syscall-exit-stop");

                return Ok(Event::Syscall { pid, id });
            }
        }
    }
}

impl<T: Tracer> Iterator for SyscallTrace<T> {
    type Item = Result<Event>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let event = self.next_event();

        match &event {
            Ok(event) => self.done = event.is_terminal(),
            Err(_) => self.done = true,
        }

        Some(event)
    }
}

impl<T: Tracer> FusedIterator for SyscallTrace<T> {}

/// Trace `tracer` to completion, passing each event to `on_event`.
///
/// Returns the terminal event.
pub fn trace<T, F>(tracer: T, mut on_event: F) -> Result<Event>
where
    T: Tracer,
    F: FnMut(&Event) -> Result<()>,
{
    for event in SyscallTrace::new(tracer) {
        let event = event?;
        on_event(&event)?;

        if event.is_terminal() {
            return Ok(event);
        }
    }

    internal_error!("syscall trace ended without exit")
}
