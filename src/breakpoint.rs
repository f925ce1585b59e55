//! Software breakpoints, and stepping a tracee over one it has hit.
//!
//! A breakpoint is an `int3` patched over the first byte of an instruction. The
//! table owns the byte it replaced. When the tracee traps, its PC is one past the
//! breakpoint address, and the instruction it was about to run is not the one in
//! memory. [`StepOver`] puts the instruction back, runs it once, and re-arms the
//! trap before the tracee is continued.

use std::collections::BTreeMap;

use tracing::debug;

use crate::error::Result;
use crate::ptracer::{RegisterSnapshot, Stop, Tracer};
use crate::x86::{INT3, INT3_LEN};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Breakpoint {
    addr: u64,
    original: u8,
}

impl Breakpoint {
    pub fn addr(&self) -> u64 {
        self.addr
    }

    /// The instruction byte that the trap replaced.
    pub fn original(&self) -> u8 {
        self.original
    }
}

/// Active breakpoints of one tracee, keyed by address.
///
/// An address has an entry exactly when an `int3` is patched there, except while a
/// [`StepOver`] is in progress.
#[derive(Clone, Debug, Default)]
pub struct BreakpointTable {
    entries: BTreeMap<u64, Breakpoint>,
}

impl BreakpointTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Patch a trap at `addr`.
    ///
    /// Returns `false`, leaving memory untouched, if a breakpoint is already set there.
    pub fn set<T: Tracer>(&mut self, tracer: &mut T, addr: u64) -> Result<bool> {
        if self.entries.contains_key(&addr) {
            debug!(addr, "breakpoint already set");
            return Ok(false);
        }

        let original = tracer.peek_byte(addr)?;
        tracer.poke_bytes(addr, &[INT3])?;

        debug!(addr, original, "set breakpoint");
        self.entries.insert(addr, Breakpoint { addr, original });

        Ok(true)
    }

    /// Restore the original byte at `addr` and forget the breakpoint.
    pub fn remove<T: Tracer>(&mut self, tracer: &mut T, addr: u64) -> Result<Option<Breakpoint>> {
        let bp = match self.entries.get(&addr) {
            Some(bp) => *bp,
            None => return Ok(None),
        };

        tracer.poke_bytes(addr, &[bp.original])?;
        self.entries.remove(&addr);

        debug!(addr, "removed breakpoint");

        Ok(Some(bp))
    }

    /// Remove every breakpoint, returning how many were restored.
    pub fn restore_all<T: Tracer>(&mut self, tracer: &mut T) -> Result<usize> {
        let addrs: Vec<u64> = self.entries.keys().copied().collect();

        for addr in &addrs {
            self.remove(tracer, *addr)?;
        }

        Ok(addrs.len())
    }

    pub fn get(&self, addr: u64) -> Option<&Breakpoint> {
        self.entries.get(&addr)
    }

    pub fn contains(&self, addr: u64) -> bool {
        self.entries.contains_key(&addr)
    }

    /// The breakpoint whose trap would leave the tracee at `pc`, if any.
    pub fn hit_at(&self, pc: u64) -> Option<Breakpoint> {
        pc.checked_sub(INT3_LEN).and_then(|addr| self.get(addr)).copied()
    }

    /// Breakpoints in ascending address order.
    pub fn iter(&self) -> impl Iterator<Item = &Breakpoint> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Progress of stepping over a hit breakpoint.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HitState {
    // Trapped; memory holds `int3`, PC is one past the breakpoint.
    AtTrap,

    // Original byte written back, PC rewound to the breakpoint.
    Restoring,

    // The original instruction has been single-stepped.
    SteppingOver,

    // `int3` written back.
    RePatching,

    // Continued.
    Resumed,

    // The single-step ended the tracee. Nothing is left to re-patch.
    TraceeExited(Stop),
}

impl HitState {
    pub fn is_done(&self) -> bool {
        matches!(self, HitState::Resumed | HitState::TraceeExited(_))
    }
}

/// Step a stopped tracee over the breakpoint it trapped on, then continue it.
///
/// Each call to [`StepOver::advance()`] performs one transition:
///
/// `AtTrap → Restoring → SteppingOver → RePatching → Resumed`
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StepOver {
    breakpoint: Breakpoint,
    state: HitState,
}

impl StepOver {
    pub fn new(breakpoint: Breakpoint) -> Self {
        Self { breakpoint, state: HitState::AtTrap }
    }

    /// Check whether the stopped tracee sits just past a known breakpoint.
    ///
    /// Any stop whose PC matches is treated as a hit; other causes of a stop at that
    /// PC are not told apart.
    pub fn detect<T: Tracer>(table: &BreakpointTable, tracer: &T) -> Result<Option<Self>> {
        let pc = tracer.registers()?.pc();
        Ok(table.hit_at(pc).map(Self::new))
    }

    pub fn breakpoint(&self) -> Breakpoint {
        self.breakpoint
    }

    pub fn state(&self) -> HitState {
        self.state
    }

    pub fn advance<T: Tracer>(&mut self, tracer: &mut T) -> Result<HitState> {
        let Breakpoint { addr, original } = self.breakpoint;

        let next = match self.state {
            HitState::AtTrap => {
                tracer.poke_bytes(addr, &[original])?;

                let mut regs = tracer.registers()?;
                regs.set_pc(addr);
                tracer.set_registers(regs)?;

                HitState::Restoring
            },
            HitState::Restoring => {
                tracer.step()?;

                match tracer.wait_for_stop()? {
                    stop if stop.is_terminal() => HitState::TraceeExited(stop),
                    Stop::Trap => HitState::SteppingOver,
                    stop => {
                        // Likely an asynchronous signal arriving first. We re-arm anyway.
                        debug!(addr, ?stop, "unexpected stop while stepping over breakpoint");
                        HitState::SteppingOver
                    },
                }
            },
            HitState::SteppingOver => {
                tracer.poke_bytes(addr, &[INT3])?;
                HitState::RePatching
            },
            HitState::RePatching => {
                tracer.cont()?;
                HitState::Resumed
            },
            done @ (HitState::Resumed | HitState::TraceeExited(_)) => done,
        };

        debug!(addr, from = ?self.state, to = ?next, "step-over transition");
        self.state = next;

        Ok(next)
    }

    /// Advance until the tracee is resumed or gone.
    pub fn run<T: Tracer>(mut self, tracer: &mut T) -> Result<HitState> {
        loop {
            let state = self.advance(tracer)?;

            if state.is_done() {
                return Ok(state);
            }
        }
    }
}
