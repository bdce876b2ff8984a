//! The monitor command table (spec.md §4.9): `help, c, q, si [N], info
//! r|w, p <expr>, x N <expr>, w <expr>, d N, itrace, ftrace, fstack,
//! detach, attach, save PATH, load PATH, test_expr PATH`.
//!
//! Dispatch mirrors the reference's `cmd_table` lookup by first
//! whitespace-delimited token; a handler returning `< 0` ends the loop.
//! The line editor itself (history, readline) is out of scope (spec.md
//! §1) — this just reads lines from stdin.

use std::io::{self, BufRead, Write};

use riscv32_mmu::vaddr_read;
use sdb::{expr, TraceKind};

use crate::machine::{CpuBusCtx, Machine, RunResult};
use crate::refmodel::SharedObjectReference;

struct Command {
    name: &'static str,
    description: &'static str,
    handler: fn(&mut Machine, &str) -> i32,
}

const COMMANDS: &[Command] = &[
    Command { name: "help", description: "Display information about all supported commands", handler: cmd_help },
    Command { name: "c", description: "Continue the execution of the program", handler: cmd_c },
    Command { name: "q", description: "Exit the emulator", handler: cmd_q },
    Command { name: "si", description: "Single step N times", handler: cmd_si },
    Command { name: "info", description: "Show info", handler: cmd_info },
    Command { name: "p", description: "Evaluate expression", handler: cmd_p },
    Command { name: "x", description: "Show memory", handler: cmd_x },
    Command { name: "w", description: "Set watch point", handler: cmd_w },
    Command { name: "d", description: "Delete watch point", handler: cmd_d },
    Command { name: "itrace", description: "Print instruction trace", handler: cmd_itrace },
    Command { name: "ftrace", description: "Print function trace", handler: cmd_ftrace },
    Command { name: "fstack", description: "Print function stack", handler: cmd_fstack },
    Command { name: "detach", description: "Disable difftest", handler: cmd_detach },
    Command { name: "attach", description: "Enable difftest", handler: cmd_attach },
    Command { name: "save", description: "Save snapshot", handler: cmd_save },
    Command { name: "load", description: "Load from snapshot", handler: cmd_load },
    Command { name: "test_expr", description: "Test expression evaluation", handler: cmd_test_expr },
];

fn report_run_result(result: &RunResult) {
    match result {
        RunResult::Halted => println!("program ended"),
        RunResult::WatchpointTriggered(changed) => {
            for (id, source, old, new) in changed {
                println!("watchpoint {id}: {source} {old:#x} -> {new:#x}");
            }
        }
        RunResult::DifftestMismatch(e) => println!("{e}"),
        RunResult::StepLimitReached => {}
    }
}

fn cmd_help(_m: &mut Machine, args: &str) -> i32 {
    let arg = args.split_whitespace().next();
    match arg {
        None => {
            for cmd in COMMANDS {
                println!("{} - {}", cmd.name, cmd.description);
            }
        }
        Some(name) => match COMMANDS.iter().find(|c| c.name == name) {
            Some(cmd) => println!("{} - {}", cmd.name, cmd.description),
            None => println!("Unknown command '{name}'"),
        },
    }
    0
}

fn cmd_c(m: &mut Machine, _args: &str) -> i32 {
    report_run_result(&m.run(u64::MAX));
    0
}

fn cmd_q(_m: &mut Machine, _args: &str) -> i32 {
    -1
}

fn cmd_si(m: &mut Machine, args: &str) -> i32 {
    let step = match args.split_whitespace().next() {
        None => 1,
        Some(s) => match s.parse::<u64>() {
            Ok(n) if n != 0 => n,
            _ => {
                println!("si parse error");
                return 0;
            }
        },
    };
    println!("exec {step} steps");
    report_run_result(&m.run(step));
    0
}

fn cmd_info(m: &mut Machine, args: &str) -> i32 {
    match args.split_whitespace().next() {
        Some("r") => print!("{}", m.cpu.display_registers()),
        Some("w") => {
            for wp in m.watchpoints.display() {
                println!("{}: {} = {:#x}", wp.id, wp.source_expr, wp.last_value);
            }
        }
        Some(other) => println!("unsupported subcmd {other}"),
        None => println!("cmd info parse error"),
    }
    0
}

fn cmd_p(m: &mut Machine, args: &str) -> i32 {
    let mut ctx = CpuBusCtx { cpu: &m.cpu, bus: &mut m.bus };
    match expr(args.trim(), &mut ctx) {
        Ok(result) => println!("result: {result:#x}(hex) {}(dec) {result}(unsigned dec)", result as i32),
        Err(e) => println!("eval failed: {e}"),
    }
    0
}

fn cmd_x(m: &mut Machine, args: &str) -> i32 {
    let mut parts = args.trim().splitn(2, char::is_whitespace);
    let Some(n_str) = parts.next().filter(|s| !s.is_empty()) else {
        println!("format: x N <expr>");
        return 0;
    };
    let Ok(n) = n_str.parse::<u32>() else {
        println!("parse N error");
        return 0;
    };
    let Some(expr_str) = parts.next() else {
        println!("command x miss start address");
        return 0;
    };

    let address = {
        let mut ctx = CpuBusCtx { cpu: &m.cpu, bus: &mut m.bus };
        match expr(expr_str.trim(), &mut ctx) {
            Ok(v) => v,
            Err(_) => {
                println!("address expression error");
                return 0;
            }
        }
    };

    println!("cmd x {n} {address:#010x}");
    let satp = m.cpu.csr.get(riscv32_cpu::csr_index::SATP);
    let mut remaining = n;
    let mut addr = address;
    while remaining > 0 {
        print!("{addr:#010x}:");
        for _ in 0..8 {
            if remaining == 0 {
                break;
            }
            let byte = vaddr_read(&mut m.bus, satp, addr, 1);
            print!("  {byte:#04x}");
            addr = addr.wrapping_add(1);
            remaining -= 1;
        }
        println!();
    }
    0
}

fn cmd_w(m: &mut Machine, args: &str) -> i32 {
    let mut ctx = CpuBusCtx { cpu: &m.cpu, bus: &mut m.bus };
    match m.watchpoints.add(args.trim(), &mut ctx) {
        Ok(id) => println!("watchpoint {id}: {}", args.trim()),
        Err(e) => println!("{e}"),
    }
    0
}

fn cmd_d(m: &mut Machine, args: &str) -> i32 {
    let Some(n_str) = args.split_whitespace().next() else {
        println!("format: d N");
        return 0;
    };
    let Ok(n) = n_str.parse::<u64>() else {
        println!("invalid watchpoint ID");
        return 0;
    };
    if let Err(e) = m.watchpoints.delete(n) {
        println!("{e}");
    }
    0
}

fn cmd_itrace(m: &mut Machine, _args: &str) -> i32 {
    for line in m.itrace.lines() {
        println!("{line}");
    }
    0
}

fn cmd_ftrace(m: &mut Machine, _args: &str) -> i32 {
    for item in m.ftrace.trace_log() {
        println!("{}", m.format_ftrace_item(item.kind, item.pc, item.target, item.level));
    }
    0
}

fn cmd_fstack(m: &mut Machine, _args: &str) -> i32 {
    for frame in m.ftrace.call_stack() {
        println!("{}", m.format_ftrace_item(TraceKind::Call, frame.pc, frame.target, frame.level));
    }
    0
}

fn cmd_detach(m: &mut Machine, _args: &str) -> i32 {
    m.detach_difftest();
    0
}

fn cmd_attach(m: &mut Machine, _args: &str) -> i32 {
    m.attach_difftest();
    0
}

fn cmd_save(m: &mut Machine, args: &str) -> i32 {
    let Some(path) = args.split_whitespace().next() else {
        println!("need file path");
        return 0;
    };
    if let Err(e) = m.save_snapshot(std::path::Path::new(path)) {
        println!("cannot save to {path}: {e}");
    }
    0
}

fn cmd_load(m: &mut Machine, args: &str) -> i32 {
    let Some(path) = args.split_whitespace().next() else {
        println!("need file path");
        return 0;
    };
    if let Err(e) = m.load_snapshot(std::path::Path::new(path)) {
        println!("cannot load {path}: {e}");
    }
    0
}

fn cmd_test_expr(m: &mut Machine, args: &str) -> i32 {
    let Some(path) = args.split_whitespace().next() else {
        println!("test file not found");
        return 1;
    };
    let Ok(contents) = std::fs::read_to_string(path) else {
        println!("test file not found");
        return 1;
    };

    let (mut total, mut passed, mut failed) = (0, 0, 0);
    for line in contents.lines() {
        let Some((ref_str, source)) = line.split_once(' ') else { continue };
        let Ok(reference) = ref_str.parse::<u32>() else { continue };
        total += 1;
        let mut ctx = CpuBusCtx { cpu: &m.cpu, bus: &mut m.bus };
        match expr(source, &mut ctx) {
            Ok(result) if result == reference => {
                println!("test passed. result={result} ref_result={reference}");
                passed += 1;
            }
            Ok(result) => {
                println!("test failed. result={result} ref_result={reference}");
                failed += 1;
            }
            Err(_) => println!("eval failed"),
        }
    }
    println!("total = {total}, passed = {passed}, failed = {failed}");
    0
}

/// Load a difftest reference `.so` and attach it.
pub fn load_reference(m: &mut Machine, path: &std::path::Path) -> Result<(), libloading::Error> {
    let reference = SharedObjectReference::load(path)?;
    m.reference = Some(Box::new(reference));
    m.attach_difftest();
    Ok(())
}

fn dispatch(m: &mut Machine, line: &str) -> i32 {
    let line = line.trim();
    if line.is_empty() {
        return 0;
    }
    let (cmd, args) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    match COMMANDS.iter().find(|c| c.name == cmd) {
        Some(command) => (command.handler)(m, args),
        None => {
            println!("Unknown command '{cmd}'");
            0
        }
    }
}

/// Batch mode: run `c` once and return the process exit code.
pub fn run_batch(m: &mut Machine) -> i32 {
    match m.run(u64::MAX) {
        RunResult::Halted | RunResult::StepLimitReached => 0,
        RunResult::WatchpointTriggered(changed) => {
            for (id, source, old, new) in changed {
                println!("watchpoint {id}: {source} {old:#x} -> {new:#x}");
            }
            0
        }
        RunResult::DifftestMismatch(e) => {
            eprintln!("{e}");
            1
        }
    }
}

/// Interactive mode: read commands from stdin until `q` or EOF.
pub fn run_interactive(m: &mut Machine) -> i32 {
    let stdin = io::stdin();
    loop {
        print!("(emu) ");
        let _ = io::stdout().flush();
        let mut line = String::new();
        if stdin.lock().read_line(&mut line).unwrap_or(0) == 0 {
            return 0;
        }
        let code = dispatch(m, &line);
        if code < 0 {
            return 0;
        }
    }
}
