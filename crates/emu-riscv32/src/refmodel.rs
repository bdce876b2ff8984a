//! Loads a reference RV32 implementation from a shared object for
//! differential testing (spec.md §4.8, §6 `-d/--diff`).
//!
//! The plugin ABI is the three `ref_difftest_*` entry points the
//! reference's own difftest harness calls into (`dut.c`). Only GPRs and
//! `pc` cross the FFI boundary directly; CSRs reach the reference only
//! through the attach sequence's synthesized instructions, never a
//! direct struct copy.

use std::os::raw::{c_int, c_void};

use difftest::{Direction, ReferenceModel};
use libloading::{Library, Symbol};
use riscv32_cpu::CpuState;

#[repr(C)]
struct FfiCpuState {
    gpr: [u32; 32],
    pc: u32,
}

type MemcpyFn = unsafe extern "C" fn(u32, *mut c_void, usize, c_int);
type RegcpyFn = unsafe extern "C" fn(*mut FfiCpuState, c_int);
type ExecFn = unsafe extern "C" fn(u64);

const DIFFTEST_TO_DUT: c_int = 0;
const DIFFTEST_TO_REF: c_int = 1;

fn wire(dir: Direction) -> c_int {
    match dir {
        Direction::ToDut => DIFFTEST_TO_DUT,
        Direction::ToReference => DIFFTEST_TO_REF,
    }
}

/// A reference model backed by a dynamically loaded `.so`/`.dylib`.
pub struct SharedObjectReference {
    lib: Library,
}

impl SharedObjectReference {
    /// Open `path` as the reference shared object.
    ///
    /// # Errors
    /// Returns the underlying `libloading` error if `path` cannot be
    /// opened as a shared object.
    pub fn load(path: &std::path::Path) -> Result<Self, libloading::Error> {
        let lib = unsafe { Library::new(path)? };
        Ok(Self { lib })
    }
}

impl ReferenceModel for SharedObjectReference {
    fn memcpy(&mut self, paddr: u32, buf: &mut [u8], dir: Direction) {
        unsafe {
            let f: Symbol<MemcpyFn> = self
                .lib
                .get(b"ref_difftest_memcpy\0")
                .expect("reference .so missing ref_difftest_memcpy");
            f(paddr, buf.as_mut_ptr().cast(), buf.len(), wire(dir));
        }
    }

    fn regcpy(&mut self, cpu: &mut CpuState, dir: Direction) {
        let mut ffi = FfiCpuState {
            gpr: std::array::from_fn(|i| cpu.gpr.read(i)),
            pc: cpu.pc,
        };
        unsafe {
            let f: Symbol<RegcpyFn> = self
                .lib
                .get(b"ref_difftest_regcpy\0")
                .expect("reference .so missing ref_difftest_regcpy");
            f(&mut ffi, wire(dir));
        }
        if dir == Direction::ToDut {
            for i in 0..32 {
                cpu.gpr.write(i, ffi.gpr[i]);
            }
            cpu.pc = ffi.pc;
        }
    }

    fn exec(&mut self, n_instr: u64) {
        unsafe {
            let f: Symbol<ExecFn> = self
                .lib
                .get(b"ref_difftest_exec\0")
                .expect("reference .so missing ref_difftest_exec");
            f(n_instr);
        }
    }
}
