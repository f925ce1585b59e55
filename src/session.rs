//! Interactive debugging session over a single stopped tracee.

use std::collections::HashMap;
use std::io::Write;

use tracing::{debug, info};

use crate::breakpoint::{BreakpointTable, HitState, StepOver};
use crate::command::{parse_hex_addr, Command};
use crate::error::{Error, Result};
use crate::ptracer::{ProcessState, RegisterSnapshot, Stop, Tracer};

/// Something that runs one shell command at a time.
pub trait Execute {
    /// Run `cmd`.
    ///
    /// An unknown command name is reported as [`Error::UnknownCommand`], which leaves
    /// the session usable. Any other error means the tracee is in an unknown state.
    fn execute(&mut self, cmd: &Command) -> Result<Outcome>;

    /// Names of the commands [`Execute::execute()`] accepts, sorted.
    fn commands(&self) -> Vec<String>;
}

/// What is left of the session after a command.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Outcome {
    Running,

    // The tracee exited or was killed.
    Finished(ProcessState),
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SessionConfig {
    /// Write original bytes back over every breakpoint when the session ends.
    ///
    /// Off by default: patched bytes stay in the tracee.
    pub restore_breakpoints_on_exit: bool,
}

type Handler<T, W> = fn(&mut Session<T, W>, &[String]) -> Result<()>;

/// Breakpoint debugger for one tracee, writing its replies to `W`.
pub struct Session<T: Tracer, W: Write> {
    tracer: T,
    breakpoints: BreakpointTable,
    handlers: HashMap<&'static str, Handler<T, W>>,
    config: SessionConfig,
    out: W,
}

impl<T: Tracer, W: Write> Session<T, W> {
    pub fn new(tracer: T, out: W) -> Self {
        Self::with_config(tracer, out, SessionConfig::default())
    }

    pub fn with_config(tracer: T, out: W, config: SessionConfig) -> Self {
        let mut handlers: HashMap<&'static str, Handler<T, W>> = HashMap::new();
        handlers.insert("continue", Self::cmd_continue);
        handlers.insert("step", Self::cmd_step);
        handlers.insert("breakpoint", Self::cmd_breakpoint);
        handlers.insert("show", Self::cmd_show);

        Self {
            tracer,
            breakpoints: BreakpointTable::new(),
            handlers,
            config,
            out,
        }
    }

    pub fn tracer(&self) -> &T {
        &self.tracer
    }

    pub fn breakpoints(&self) -> &BreakpointTable {
        &self.breakpoints
    }

    pub fn writer(&self) -> &W {
        &self.out
    }

    /// End the session, applying [`SessionConfig::restore_breakpoints_on_exit`].
    pub fn finish(&mut self) -> Result<()> {
        if self.config.restore_breakpoints_on_exit && self.tracer.state().is_stopped() {
            let restored = self.breakpoints.restore_all(&mut self.tracer)?;
            info!(restored, "restored breakpoints");
        }

        Ok(())
    }

    fn cmd_continue(&mut self, _args: &[String]) -> Result<()> {
        match StepOver::detect(&self.breakpoints, &self.tracer)? {
            Some(hit) => {
                debug!(addr = hit.breakpoint().addr(), "stepping over breakpoint");

                if let HitState::TraceeExited(stop) = hit.run(&mut self.tracer)? {
                    return self.report_stop(stop);
                }
            },
            None => self.tracer.cont()?,
        }

        let stop = self.tracer.wait_for_stop()?;
        self.report_stop(stop)
    }

    fn cmd_step(&mut self, _args: &[String]) -> Result<()> {
        self.tracer.step()?;

        match self.tracer.wait_for_stop()? {
            Stop::Trap => Ok(()),
            stop => self.report_stop(stop),
        }
    }

    fn cmd_breakpoint(&mut self, args: &[String]) -> Result<()> {
        let addr = match args {
            [addr] => parse_hex_addr(addr)?,
            _ => {
                writeln!(self.out, "usage: breakpoint <hexaddr>")?;
                return Ok(());
            },
        };

        if self.breakpoints.contains(addr) {
            writeln!(self.out, "Breakpoint already set at 0x{:x}", addr)?;
            return Ok(());
        }

        writeln!(self.out, "Setting breakpoint at 0x{:x}", addr)?;
        self.breakpoints.set(&mut self.tracer, addr)?;

        Ok(())
    }

    fn cmd_show(&mut self, args: &[String]) -> Result<()> {
        match args {
            [what] if what == "pc" => {
                let pc = self.tracer.registers()?.pc();
                writeln!(self.out, "PC at 0x{:x}", pc)?;
            },
            [what] if what == "breakpoints" => {
                if self.breakpoints.is_empty() {
                    writeln!(self.out, "No breakpoints set")?;
                } else {
                    writeln!(self.out, "Breakpoints set:")?;
                    for bp in self.breakpoints.iter() {
                        writeln!(self.out, "  - 0x{:x}", bp.addr())?;
                    }
                }
            },
            _ => writeln!(self.out, "Usage: show pc|breakpoints")?,
        }

        Ok(())
    }

    fn report_stop(&mut self, stop: Stop) -> Result<()> {
        let pid = self.tracer.pid();

        match stop {
            Stop::Exited { exit_code } => {
                writeln!(self.out, "Process {} exited with status {}", pid, exit_code)?;
            },
            Stop::Signaled { signal, .. } => {
                writeln!(self.out, "Process {} killed by {:?}", pid, signal)?;
            },
            Stop::Signal { signal } => {
                writeln!(self.out, "Stopped by signal {:?}", signal)?;
            },
            Stop::Trap => {
                let pc = self.tracer.registers()?.pc();

                match self.breakpoints.hit_at(pc) {
                    Some(bp) => writeln!(self.out, "Hit breakpoint at 0x{:x}", bp.addr())?,
                    None => writeln!(self.out, "Stopped at 0x{:x}", pc)?,
                }
            },
            Stop::SyscallBoundary => {
                writeln!(self.out, "Stopped at syscall boundary")?;
            },
        }

        Ok(())
    }
}

impl<T: Tracer, W: Write> Execute for Session<T, W> {
    fn execute(&mut self, cmd: &Command) -> Result<Outcome> {
        let handler = match self.handlers.get(cmd.name.as_str()) {
            Some(handler) => *handler,
            None => return Err(Error::UnknownCommand { name: cmd.name.clone() }),
        };

        handler(self, &cmd.args)?;

        let state = self.tracer.state();

        if state.is_terminal() {
            Ok(Outcome::Finished(state))
        } else {
            Ok(Outcome::Running)
        }
    }

    fn commands(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().map(|name| name.to_string()).collect();
        names.sort();
        names
    }
}
