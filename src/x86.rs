use crate::ptracer::{RegisterSnapshot, Registers};

/// `int3`, the one-byte software breakpoint instruction.
pub const INT3: u8 = 0xcc;

/// Bytes the PC advances past a breakpoint address when `int3` traps.
pub const INT3_LEN: u64 = 1;

impl RegisterSnapshot for Registers {
    fn pc(&self) -> u64 {
        self.rip
    }

    fn set_pc(&mut self, pc: u64) {
        self.rip = pc;
    }

    /// `rax` holds the return value after the syscall, so the kernel keeps the
    /// syscall number in `orig_rax`.
    fn syscall_id(&self) -> u64 {
        self.orig_rax
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pc_and_syscall_registers() {
        // SAFETY: `user_regs_struct` is plain integers, for which all-zeroes is valid.
        let mut regs: Registers = unsafe { std::mem::zeroed() };
        regs.orig_rax = 231;
        regs.rax = u64::MAX - 37;

        regs.set_pc(0x401001);

        assert_eq!(regs.rip, 0x401001);
        assert_eq!(regs.pc(), 0x401001);
        assert_eq!(regs.syscall_id(), 231);
    }
}
