//! The machine: CPU, bus, devices, and every debugger subsystem wired
//! together. A single value passed by reference to every component, per
//! spec.md §9 — there is no hidden global process state.

use emu_core::Bus;
use riscv32_cpu::{csr_index, CpuState};
use riscv32_mmu::{vaddr_read, MemoryBus};
use sdb::{EvalContext, FunctionRegistry, FunctionTracer, InstHistory, TraceKind, WatchpointPool};

use crate::device::Disk;
use crate::isa::{Isa, StepOutcome};

/// Why [`Machine::run`] stopped, mirroring spec.md §5's batch-mode
/// cancellation conditions.
pub enum RunResult {
    /// `ecall`/`ebreak` reached with no trap handler wired up.
    Halted,
    /// A watchpoint's value changed on this step; carries the `(id, expr,
    /// old, new)` tuple for every watchpoint that changed.
    WatchpointTriggered(Vec<(u64, String, u32, u32)>),
    /// The reference model diverged from the dut.
    DifftestMismatch(difftest::DifftestError),
    /// `n` instructions retired with no stop condition.
    StepLimitReached,
}

/// Borrows only the two fields an expression needs to resolve register
/// names and dereference memory. Construct this directly from a
/// `Machine`'s fields (`CpuBusCtx { cpu: &m.cpu, bus: &mut m.bus }`)
/// rather than through a `&mut self` method, so the borrow checker sees
/// it as disjoint from `watchpoints`/`ftrace`/etc. and both can be used
/// in the same scope.
pub(crate) struct CpuBusCtx<'a> {
    pub(crate) cpu: &'a CpuState,
    pub(crate) bus: &'a mut MemoryBus,
}

impl EvalContext for CpuBusCtx<'_> {
    fn resolve_name(&self, name: &str) -> Option<u32> {
        self.cpu.name_to_value(name)
    }

    fn read_word(&mut self, addr: u32) -> u32 {
        let satp = self.cpu.csr.get(csr_index::SATP);
        vaddr_read(self.bus, satp, addr, 4)
    }
}

pub struct Machine {
    pub cpu: CpuState,
    pub bus: MemoryBus,
    pub isa: Box<dyn Isa>,
    pub watchpoints: WatchpointPool,
    pub ftrace: FunctionTracer,
    pub functions: FunctionRegistry,
    pub itrace: InstHistory,
    pub disk: Option<Disk>,
    pub reference: Option<Box<dyn difftest::ReferenceModel>>,
    /// Whether `step_one` compares against `reference`. Detaching keeps
    /// the loaded reference around without tearing it down, matching
    /// `detach`/`attach` in the monitor command table.
    pub difftest_enabled: bool,
}

impl Machine {
    #[must_use]
    pub fn new(reset_vector: u32, bus: MemoryBus, isa: Box<dyn Isa>) -> Self {
        Self {
            cpu: CpuState::new(reset_vector),
            bus,
            isa,
            watchpoints: WatchpointPool::new(),
            ftrace: FunctionTracer::new(),
            functions: FunctionRegistry::new(),
            itrace: InstHistory::new(),
            disk: None,
            reference: None,
            difftest_enabled: true,
        }
    }

    fn function_label(&self, addr: u32) -> String {
        match self.functions.search(addr) {
            Some(f) if !f.name.is_empty() => format!("{} ({addr:#010x})", f.name),
            _ => format!("??? ({addr:#010x})"),
        }
    }

    /// Render one `ftrace`/`fstack` line in the reference's indentation
    /// style, with symbol names resolved against the loaded ELF(s).
    #[must_use]
    pub fn format_ftrace_item(&self, kind: TraceKind, pc: u32, target: u32, level: usize) -> String {
        let indent = "  ".repeat(level);
        let verb = match kind {
            TraceKind::Call => "call",
            TraceKind::Ret => "ret ",
        };
        format!("0x{pc:08x}: {indent}{verb} {}", self.function_label(target))
    }

    /// Run at most `max_steps` instructions, or until a stop condition
    /// fires (spec.md §5 batch-mode cancellation).
    pub fn run(&mut self, max_steps: u64) -> RunResult {
        for _ in 0..max_steps {
            if let Some(stop) = self.step_one() {
                return stop;
            }
        }
        RunResult::StepLimitReached
    }

    /// Execute exactly one instruction and run the per-step pipeline in
    /// spec.md §5's order: execute, difftest compare, watchpoint check,
    /// itrace append, ftrace append, then a pending-interrupt query at
    /// the instruction boundary.
    fn step_one(&mut self) -> Option<RunResult> {
        let pc_before = self.cpu.pc;
        let outcome = self.isa.step(&mut self.cpu, &mut self.bus);

        if let Some(disk) = self.disk.as_mut() {
            disk.service(&mut self.bus);
        }

        if matches!(outcome, StepOutcome::Halt) {
            return Some(RunResult::Halted);
        }

        if self.difftest_enabled {
            if let Some(reference) = self.reference.as_mut() {
                reference.exec(1);
                let mut ref_state = CpuState::new(0);
                reference.regcpy(&mut ref_state, difftest::Direction::ToDut);
                if let Err(e) = difftest::checkregs(&self.cpu, &ref_state) {
                    return Some(RunResult::DifftestMismatch(e));
                }
            }
        }

        let changed = {
            let mut ctx = CpuBusCtx { cpu: &self.cpu, bus: &mut self.bus };
            self.watchpoints.check(&mut ctx)
        };

        let line = self.isa.disassemble(&self.cpu, &mut self.bus, pc_before);
        self.itrace.add(&line);

        match outcome {
            StepOutcome::Call { pc, target } => {
                let current_ix = self.functions.index_of(pc);
                let target_ix = self.functions.index_of(target);
                if let Err(e) = self.ftrace.trace(pc, target, TraceKind::Call, current_ix, target_ix) {
                    log::warn!("ftrace call at {pc:#010x} dropped: {e}");
                }
            }
            StepOutcome::Ret { pc, target } => {
                let current_ix = self.functions.index_of(pc);
                let target_ix = self.functions.index_of(target);
                if let Err(e) = self.ftrace.trace(pc, target, TraceKind::Ret, current_ix, target_ix) {
                    log::warn!("ftrace ret at {pc:#010x} dropped: {e}");
                }
            }
            StepOutcome::Retired | StepOutcome::Trap { .. } | StepOutcome::Halt => {}
        }

        if !changed.is_empty() {
            return Some(RunResult::WatchpointTriggered(changed));
        }

        if let Some(cause) = self.cpu.query_interrupt() {
            let target = self.cpu.raise_trap(cause, self.cpu.pc);
            self.cpu.pc = target;
        }

        None
    }

    /// Synchronize the reference model's CSRs to the dut's, via the
    /// attach sequence (spec.md §4.8), and resume per-step comparison.
    pub fn attach_difftest(&mut self) {
        if let Some(reference) = self.reference.as_mut() {
            difftest::attach(&mut self.bus, &mut self.cpu, reference.as_mut());
        }
        self.difftest_enabled = true;
    }

    /// Stop comparing against the reference without discarding it.
    pub fn detach_difftest(&mut self) {
        self.difftest_enabled = false;
    }

    /// Write `{CPU state, RAM, shadow call stack}` to `path` (spec.md §4.7).
    ///
    /// # Errors
    /// Propagates any I/O failure.
    pub fn save_snapshot(&self, path: &std::path::Path) -> std::io::Result<()> {
        sdb::save_snapshot(path, &self.cpu, self.bus.ram(), &self.ftrace.save_stack())
    }

    /// Load `{CPU state, RAM, shadow call stack}` from `path`, then
    /// resynchronize the reference model if one is attached (spec.md
    /// §4.7's "invoke the difftest harness's load hook").
    ///
    /// # Errors
    /// Propagates any I/O failure, including a truncated file.
    pub fn load_snapshot(&mut self, path: &std::path::Path) -> std::io::Result<()> {
        let (cpu, ram, shadow_stack) = sdb::load_snapshot(path, self.bus.ram_size() as usize)?;
        self.cpu = cpu;
        self.bus.ram_mut().copy_from_slice(&ram);
        self.ftrace.load_stack(shadow_stack);
        if let Some(reference) = self.reference.as_mut() {
            reference.regcpy(&mut self.cpu, difftest::Direction::ToReference);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::Rv32Im;

    fn encode_i(imm: i32, rs1: usize, funct3: u32, rd: usize, opcode: u32) -> u32 {
        (((imm as u32) & 0xfff) << 20) | ((rs1 as u32) << 15) | (funct3 << 12) | ((rd as u32) << 7) | opcode
    }

    #[test]
    fn run_halts_on_ecall() {
        let mut bus = MemoryBus::new(0x8000_0000, 0x1000);
        bus.write(0x8000_0000, 4, 0x73); // ecall
        let mut m = Machine::new(0x8000_0000, bus, Box::new(Rv32Im::new()));
        assert!(matches!(m.run(10), RunResult::Halted));
    }

    #[test]
    fn eval_ctx_resolves_pc_and_gpr() {
        let bus = MemoryBus::new(0x8000_0000, 0x1000);
        let mut m = Machine::new(0x8000_0000, bus, Box::new(Rv32Im::new()));
        m.cpu.gpr.write(10, 7);
        let ctx = CpuBusCtx { cpu: &m.cpu, bus: &mut m.bus };
        assert_eq!(ctx.resolve_name("a0"), Some(7));
        assert_eq!(ctx.resolve_name("pc"), Some(0x8000_0000));
    }

    #[test]
    fn watchpoint_triggers_stop_when_value_changes() {
        let mut bus = MemoryBus::new(0x8000_0000, 0x1000);
        let word = encode_i(1, 10, 0, 10, 0x13); // addi a0, a0, 1
        bus.write(0x8000_0000, 4, word);
        bus.write(0x8000_0004, 4, 0x73); // ecall, so a second step halts cleanly
        let mut m = Machine::new(0x8000_0000, bus, Box::new(Rv32Im::new()));
        {
            let mut ctx = CpuBusCtx { cpu: &m.cpu, bus: &mut m.bus };
            m.watchpoints.add("$a0", &mut ctx).unwrap();
        }
        match m.run(10) {
            RunResult::WatchpointTriggered(changed) => {
                assert_eq!(changed, vec![(1, "$a0".to_string(), 0, 1)]);
            }
            _ => panic!("expected a watchpoint to trigger"),
        }
    }
}
