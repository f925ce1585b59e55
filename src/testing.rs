//! Scripted stand-in for a live tracee.

use std::collections::{BTreeMap, VecDeque};

use crate::error::{Error, Result};
use crate::ptracer::{Pid, ProcessState, RegisterSnapshot, Restart, Stop, Tracer};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct FakeRegs {
    pub pc: u64,
    pub syscall: u64,
}

impl RegisterSnapshot for FakeRegs {
    fn pc(&self) -> u64 {
        self.pc
    }

    fn set_pc(&mut self, pc: u64) {
        self.pc = pc;
    }

    fn syscall_id(&self) -> u64 {
        self.syscall
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Call {
    Wait,
    Restart(Restart),
    SetRegs(FakeRegs),
    Poke(u64, Vec<u8>),
}

/// Tracer over a byte map and a queue of scripted stops.
///
/// Each scripted stop may also replace the register file, standing in for
/// whatever the tracee did while it ran.
#[derive(Debug)]
pub struct FakeTracer {
    pub pid: Pid,
    pub state: ProcessState,
    pub regs: FakeRegs,
    pub memory: BTreeMap<u64, u8>,
    pub stops: VecDeque<(Stop, Option<FakeRegs>)>,
    pub calls: Vec<Call>,

    /// `(pc, byte at pc)` at each single-step, i.e. what the step executed.
    pub executed: Vec<(u64, u8)>,

    last_restart: Option<Restart>,
}

impl FakeTracer {
    pub fn new() -> Self {
        Self {
            pid: Pid::from_raw(4242),
            state: ProcessState::Attached,
            regs: FakeRegs::default(),
            memory: BTreeMap::new(),
            stops: VecDeque::new(),
            calls: vec![],
            executed: vec![],
            last_restart: None,
        }
    }

    pub fn with_memory(mut self, addr: u64, bytes: &[u8]) -> Self {
        for (i, b) in bytes.iter().enumerate() {
            self.memory.insert(addr + i as u64, *b);
        }
        self
    }

    pub fn with_pc(mut self, pc: u64) -> Self {
        self.regs.pc = pc;
        self
    }

    pub fn script(&mut self, stop: Stop, regs: impl Into<Option<FakeRegs>>) {
        self.stops.push_back((stop, regs.into()));
    }

    pub fn byte(&self, addr: u64) -> u8 {
        self.memory[&addr]
    }

    pub fn restarts(&self) -> Vec<Restart> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                Call::Restart(r) => Some(*r),
                _ => None,
            })
            .collect()
    }

    fn check_stopped(&self) -> Result<()> {
        match self.state {
            ProcessState::Running => Err(Error::NotStopped { pid: self.pid }),
            s if s.is_terminal() => Err(Error::TraceeExited { pid: self.pid }),
            _ => Ok(()),
        }
    }
}

impl Tracer for FakeTracer {
    type Registers = FakeRegs;

    fn pid(&self) -> Pid {
        self.pid
    }

    fn state(&self) -> ProcessState {
        self.state
    }

    fn wait_for_stop(&mut self) -> Result<Stop> {
        self.calls.push(Call::Wait);

        if self.state != ProcessState::Running {
            return Err(Error::NotRunning { pid: self.pid });
        }

        let (stop, regs) = self
            .stops
            .pop_front()
            .ok_or_else(|| Error::Internal("no scripted stop left".into()))?;

        if let Some(regs) = regs {
            self.regs = regs;
        }

        self.state = ProcessState::after(self.last_restart, stop);

        Ok(stop)
    }

    fn restart(&mut self, restart: Restart) -> Result<()> {
        self.check_stopped()?;
        self.calls.push(Call::Restart(restart));

        if restart == Restart::Step {
            let pc = self.regs.pc;
            let byte = self.memory.get(&pc).copied().unwrap_or(0);
            self.executed.push((pc, byte));
        }

        self.state = ProcessState::Running;
        self.last_restart = Some(restart);

        Ok(())
    }

    fn registers(&self) -> Result<FakeRegs> {
        self.check_stopped()?;
        Ok(self.regs)
    }

    fn set_registers(&mut self, regs: FakeRegs) -> Result<()> {
        self.check_stopped()?;
        self.calls.push(Call::SetRegs(regs));
        self.regs = regs;
        Ok(())
    }

    fn peek_byte(&self, addr: u64) -> Result<u8> {
        self.check_stopped()?;

        self.memory.get(&addr).copied().ok_or_else(|| {
            let source = std::io::Error::from_raw_os_error(libc::EIO);
            Error::MemoryAccess { pid: self.pid, addr, source }
        })
    }

    fn poke_bytes(&mut self, addr: u64, data: &[u8]) -> Result<()> {
        self.check_stopped()?;
        self.calls.push(Call::Poke(addr, data.to_vec()));

        for (i, b) in data.iter().enumerate() {
            let a = addr + i as u64;

            if !self.memory.contains_key(&a) {
                let source = std::io::Error::from_raw_os_error(libc::EIO);
                return Err(Error::MemoryAccess { pid: self.pid, addr: a, source });
            }

            self.memory.insert(a, *b);
        }

        Ok(())
    }
}
