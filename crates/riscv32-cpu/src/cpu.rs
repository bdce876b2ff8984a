//! Architectural CPU state: GPRs, PC, CSRs, privilege mode, and the trap unit.

use emu_core::{Observable, Value};

use crate::csr::{self, CsrFile, index};
use crate::gpr::GprFile;

/// Timer interrupt cause value, as queried via `query_interrupt`.
pub const IRQ_TIMER: u32 = 0x8000_0007;

/// Privilege mode. Values match the RISC-V privilege-level encoding used
/// in `mstatus.MPP`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// User mode.
    U = 0,
    /// Supervisor mode.
    S = 1,
    /// Machine mode.
    M = 3,
}

impl Mode {
    /// Decode the 2-bit `MPP` field into a [`Mode`].
    ///
    /// Any value other than U/S/M bit-patterns collapses to `U`; the trap
    /// unit itself never writes an out-of-range value, so this only
    /// matters if `mstatus` is poked directly (e.g. via `load`).
    #[must_use]
    pub fn from_bits(bits: u32) -> Self {
        match bits & 0x3 {
            1 => Mode::S,
            3 => Mode::M,
            _ => Mode::U,
        }
    }

    #[must_use]
    pub fn bits(self) -> u32 {
        self as u32
    }
}

const MSTATUS_MIE: u32 = 1 << 3;
const MSTATUS_MPIE: u32 = 1 << 7;
const MSTATUS_MPP_SHIFT: u32 = 11;
const MSTATUS_MPP_MASK: u32 = 0x3 << MSTATUS_MPP_SHIFT;

/// Full architectural state of the single hart this machine models.
#[derive(Debug, Clone)]
pub struct CpuState {
    pub gpr: GprFile,
    pub pc: u32,
    pub csr: CsrFile,
    pub mode: Mode,
    /// Pending-interrupt flag, set by an external timer source and
    /// cleared by [`CpuState::query_interrupt`].
    pub intr: bool,
}

impl CpuState {
    /// A fresh hart reset into machine mode with all state zeroed, except
    /// `pc` which starts at `reset_vector`.
    #[must_use]
    pub fn new(reset_vector: u32) -> Self {
        Self {
            gpr: GprFile::new(),
            pc: reset_vector,
            csr: CsrFile::new(),
            mode: Mode::M,
            intr: false,
        }
    }

    /// Resolve an ABI register name, the literal `pc`, or a CSR name to
    /// its current value.
    ///
    /// Mirrors the reference's `isa_reg_str2val`: GPR names are checked
    /// first, then `pc`, then CSR names; an unrecognised name resolves to
    /// `None` rather than panicking (callers report this as a user error).
    #[must_use]
    pub fn name_to_value(&self, name: &str) -> Option<u32> {
        if let Some(idx) = GprFile::index_of(name) {
            return Some(self.gpr.read(idx));
        }
        if name == "pc" {
            return Some(self.pc);
        }
        CsrFile::index_of_name(name).map(|idx| self.csr.get(idx))
    }

    /// Render `pc`, every GPR (by ABI name), every CSR, and the privilege
    /// mode in the reference debugger's `info r` layout.
    #[must_use]
    pub fn display_registers(&self) -> String {
        use std::fmt::Write as _;

        let mut out = String::new();
        let _ = writeln!(out, "{:<8}{:#010x}", "pc", self.pc);
        for (idx, name) in crate::gpr::GPR_NAMES.iter().enumerate() {
            let _ = writeln!(out, "{:<8}{:#010x}", name, self.gpr.read(idx));
        }
        for (idx, name) in csr::CSR_NAMES.iter().enumerate() {
            let _ = writeln!(out, "{:<8}{:#010x}", name, self.csr.get(idx));
        }
        let _ = writeln!(out, "privilege: {}", self.mode.bits());
        out
    }

    /// Enter a trap: save `epc`/`cause`, stack the current mode and
    /// interrupt-enable bit into `mstatus`, switch to machine mode, and
    /// return the vector to jump to (`mtvec`).
    pub fn raise_trap(&mut self, cause: u32, epc: u32) -> u32 {
        self.csr.set(index::MEPC, epc);
        self.csr.set(index::MCAUSE, cause);

        let mut mstatus = self.csr.get(index::MSTATUS);
        mstatus &= !MSTATUS_MPP_MASK;
        mstatus |= (self.mode.bits() & 0x3) << MSTATUS_MPP_SHIFT;
        self.mode = Mode::M;

        let mie = (mstatus & MSTATUS_MIE) != 0;
        mstatus &= !MSTATUS_MPIE;
        if mie {
            mstatus |= MSTATUS_MPIE;
        }
        mstatus &= !MSTATUS_MIE;
        self.csr.set(index::MSTATUS, mstatus);

        self.csr.get(index::MTVEC)
    }

    /// Query and clear the pending timer interrupt, if `mstatus.MIE` is
    /// set. Replaces the reference's `INTR_EMPTY` sentinel with an
    /// `Option`.
    pub fn query_interrupt(&mut self) -> Option<u32> {
        let mie = (self.csr.get(index::MSTATUS) & MSTATUS_MIE) != 0;
        if self.intr && mie {
            self.intr = false;
            Some(IRQ_TIMER)
        } else {
            None
        }
    }

    /// Return from a trap (`mret`): restore the mode from `mstatus.MPP`,
    /// reset `MPP` to `U`, restore `MIE` from `MPIE`, set `MPIE`, and
    /// return the resume address (`mepc`).
    pub fn trap_return(&mut self) -> u32 {
        let mut mstatus = self.csr.get(index::MSTATUS);
        self.mode = Mode::from_bits(mstatus >> MSTATUS_MPP_SHIFT);
        mstatus &= !MSTATUS_MPP_MASK;
        mstatus |= (Mode::U.bits() & 0x3) << MSTATUS_MPP_SHIFT;

        let mpie = (mstatus & MSTATUS_MPIE) != 0;
        mstatus &= !MSTATUS_MIE;
        if mpie {
            mstatus |= MSTATUS_MIE;
        }
        mstatus |= MSTATUS_MPIE;
        self.csr.set(index::MSTATUS, mstatus);

        self.csr.get(index::MEPC)
    }
}

impl Observable for CpuState {
    fn query(&self, path: &str) -> Option<Value> {
        if path == "pc" {
            return Some(Value::U32(self.pc));
        }
        if let Some(name) = path.strip_prefix("gpr.") {
            return GprFile::index_of(name).map(|idx| Value::U32(self.gpr.read(idx)));
        }
        if let Some(name) = path.strip_prefix("csr.") {
            return CsrFile::index_of_name(name).map(|idx| Value::U32(self.csr.get(idx)));
        }
        None
    }

    fn query_paths(&self) -> &'static [&'static str] {
        &["pc"]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gpr0_reads_zero_by_convention_when_never_written() {
        let cpu = CpuState::new(0x8000_0000);
        assert_eq!(cpu.gpr.read(0), 0);
    }

    #[test]
    fn raise_trap_then_mret_round_trips_mode_and_mie() {
        let mut cpu = CpuState::new(0x8000_0000);
        cpu.mode = Mode::U;
        cpu.csr.set(index::MSTATUS, MSTATUS_MIE);
        cpu.csr.set(index::MTVEC, 0x8000_1000);

        let target = cpu.raise_trap(0x2, 0x8000_0010);
        assert_eq!(target, 0x8000_1000);
        assert_eq!(cpu.csr.get(index::MEPC), 0x8000_0010);
        assert_eq!(cpu.csr.get(index::MCAUSE), 0x2);
        assert_eq!(cpu.mode, Mode::M);
        assert_eq!(cpu.csr.get(index::MSTATUS) & MSTATUS_MIE, 0);
        assert_ne!(cpu.csr.get(index::MSTATUS) & MSTATUS_MPIE, 0);
        assert_eq!(
            (cpu.csr.get(index::MSTATUS) & MSTATUS_MPP_MASK) >> MSTATUS_MPP_SHIFT,
            Mode::U.bits()
        );

        let resume = cpu.trap_return();
        assert_eq!(resume, 0x8000_0010);
        assert_eq!(cpu.mode, Mode::U);
        assert_ne!(cpu.csr.get(index::MSTATUS) & MSTATUS_MIE, 0);
    }

    #[test]
    fn query_interrupt_requires_both_intr_and_mie() {
        let mut cpu = CpuState::new(0);
        cpu.intr = true;
        assert_eq!(cpu.query_interrupt(), None);

        cpu.csr.set(index::MSTATUS, MSTATUS_MIE);
        assert_eq!(cpu.query_interrupt(), Some(IRQ_TIMER));
        assert!(!cpu.intr);
        assert_eq!(cpu.query_interrupt(), None);
    }

    #[test]
    fn name_to_value_resolves_gpr_pc_and_csr() {
        let mut cpu = CpuState::new(0x100);
        cpu.gpr.write(10, 0x1234);
        assert_eq!(cpu.name_to_value("a0"), Some(0x1234));
        assert_eq!(cpu.name_to_value("pc"), Some(0x100));
        assert_eq!(cpu.name_to_value("satp"), Some(0));
        assert_eq!(cpu.name_to_value("nope"), None);
    }
}
