//! Differential testing against a reference RV32 implementation.
//!
//! This crate only specifies the comparison protocol — GPR/PC checking
//! and the CSR "attach" resync trick. How a [`ReferenceModel`] is
//! actually obtained (loading a shared object, spawning a subprocess) is
//! the binary crate's concern.

use emu_core::Bus;
use riscv32_cpu::{CpuState, CSR_ADDR, NR_CSR};
use thiserror::Error;

/// The first point of divergence found by [`checkregs`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DifftestError {
    #[error("difftest failed, gpr[{index}] dut: {dut:#010x}, ref: {reference:#010x}")]
    GprMismatch { index: usize, dut: u32, reference: u32 },
    #[error("difftest failed, pc dut: {dut:#010x}, ref: {reference:#010x}")]
    PcMismatch { dut: u32, reference: u32 },
}

/// Which side of the comparison a copy is moving state towards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ToReference,
    ToDut,
}

/// Everything the harness needs from a reference implementation: raw
/// memory and register access, and the ability to single-step.
pub trait ReferenceModel {
    /// Copy `buf.len()` bytes at guest physical address `paddr` between
    /// the dut and the reference, in the direction given by `dir`.
    fn memcpy(&mut self, paddr: u32, buf: &mut [u8], dir: Direction);

    /// Copy the full architectural register file between `cpu` and the
    /// reference, in the direction given by `dir`.
    fn regcpy(&mut self, cpu: &mut CpuState, dir: Direction);

    /// Single-step the reference `n_instr` instructions.
    fn exec(&mut self, n_instr: u64);
}

/// Compare every GPR, then `pc`, stopping at the first mismatch — the
/// same order and granularity as the reference's own `checkregs`.
///
/// # Errors
/// Returns the first mismatching register or `pc`.
pub fn checkregs(dut: &CpuState, reference: &CpuState) -> Result<(), DifftestError> {
    for i in 0..32 {
        let (d, r) = (dut.gpr.read(i), reference.gpr.read(i));
        if d != r {
            return Err(DifftestError::GprMismatch { index: i, dut: d, reference: r });
        }
    }
    if dut.pc != reference.pc {
        return Err(DifftestError::PcMismatch { dut: dut.pc, reference: reference.pc });
    }
    Ok(())
}

const ATTACH_SCRATCH_GPR: usize = 1;

/// Re-synchronize `reference`'s CSRs to `dut`'s exact contents.
///
/// CSRs aren't directly pokeable from the harness side, so this plants a
/// `csrrs rd, csr, x0` for each CSR at the dut's current `pc`, single-
/// steps the reference once per instruction to let it execute the write,
/// then restores whatever guest code and register it clobbered to do so.
pub fn attach(bus: &mut dyn Bus, dut: &mut CpuState, reference: &mut dyn ReferenceModel) {
    let saved_pc = dut.pc;
    let saved_reg = dut.gpr.read(ATTACH_SCRATCH_GPR);
    let code_addr = dut.pc;

    let mut saved_code = [0u32; NR_CSR];
    for (i, slot) in saved_code.iter_mut().enumerate() {
        *slot = bus.read(code_addr + 4 * i as u32, 4);
    }

    for i in 0..NR_CSR {
        let code_pc = code_addr + 4 * i as u32;
        dut.gpr.write(ATTACH_SCRATCH_GPR, dut.csr.get(i));
        let encoded = (CSR_ADDR[i] << 20) | ((ATTACH_SCRATCH_GPR as u32) << 15) | 0x0000_1073;
        dut.pc = code_pc;
        bus.write(code_pc, 4, encoded);

        let mut word = encoded.to_le_bytes();
        reference.memcpy(code_pc, &mut word, Direction::ToReference);
        reference.regcpy(dut, Direction::ToReference);
        reference.exec(1);
    }

    dut.pc = saved_pc;
    dut.gpr.write(ATTACH_SCRATCH_GPR, saved_reg);
    for (i, &word) in saved_code.iter().enumerate() {
        bus.write(code_addr + 4 * i as u32, 4, word);
    }

    reference.regcpy(dut, Direction::ToReference);
    let mut restored = vec![0u8; 4 * NR_CSR];
    for (i, chunk) in restored.chunks_mut(4).enumerate() {
        chunk.copy_from_slice(&saved_code[i].to_le_bytes());
    }
    reference.memcpy(code_addr, &mut restored, Direction::ToReference);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct MockBus(HashMap<u32, u32>);
    impl Bus for MockBus {
        fn read(&mut self, paddr: u32, _len: u8) -> u32 {
            *self.0.get(&paddr).unwrap_or(&0)
        }
        fn write(&mut self, paddr: u32, _len: u8, value: u32) {
            self.0.insert(paddr, value);
        }
    }

    #[derive(Default)]
    struct MockReference {
        exec_count: u64,
        last_csr_write: Option<u32>,
    }
    impl ReferenceModel for MockReference {
        fn memcpy(&mut self, _paddr: u32, _buf: &mut [u8], _dir: Direction) {}
        fn regcpy(&mut self, cpu: &mut CpuState, _dir: Direction) {
            self.last_csr_write = Some(cpu.gpr.read(ATTACH_SCRATCH_GPR));
        }
        fn exec(&mut self, n_instr: u64) {
            self.exec_count += n_instr;
        }
    }

    #[test]
    fn checkregs_reports_first_gpr_mismatch() {
        let mut dut = CpuState::new(0);
        let reference = CpuState::new(0);
        dut.gpr.write(5, 42);
        assert_eq!(
            checkregs(&dut, &reference),
            Err(DifftestError::GprMismatch { index: 5, dut: 42, reference: 0 })
        );
    }

    #[test]
    fn checkregs_reports_pc_mismatch_only_after_gprs_match() {
        let mut dut = CpuState::new(0);
        dut.pc = 4;
        let reference = CpuState::new(0);
        assert_eq!(
            checkregs(&dut, &reference),
            Err(DifftestError::PcMismatch { dut: 4, reference: 0 })
        );
    }

    #[test]
    fn checkregs_passes_on_identical_state() {
        let dut = CpuState::new(0x8000_0000);
        let reference = CpuState::new(0x8000_0000);
        assert_eq!(checkregs(&dut, &reference), Ok(()));
    }

    #[test]
    fn attach_restores_pc_register_and_code_after_running() {
        let mut bus = MockBus(HashMap::new());
        let mut dut = CpuState::new(0x8000_0000);
        dut.gpr.write(ATTACH_SCRATCH_GPR, 0xdead_beef);
        dut.csr.set(0, 0x1234);
        let mut reference = MockReference::default();

        attach(&mut bus, &mut dut, &mut reference);

        assert_eq!(dut.pc, 0x8000_0000);
        assert_eq!(dut.gpr.read(ATTACH_SCRATCH_GPR), 0xdead_beef);
        assert_eq!(reference.exec_count, NR_CSR as u64);
        assert_eq!(bus.0.get(&0x8000_0000), Some(&0));
    }
}
