//! Snapshot save/load: `CPU_state`, guest RAM, and the function tracer's
//! shadow call stack, as a flat little-endian blob — no serde, matching
//! the reference's raw `fwrite`/`fread` of the machine struct.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};

use riscv32_cpu::{CpuState, CsrFile, GprFile, Mode};

use crate::ftrace::{TraceItem, TraceKind};

fn write_u32<W: Write>(w: &mut W, v: u32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn read_u32<R: Read>(r: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn write_i32<W: Write>(w: &mut W, v: i32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn read_i32<R: Read>(r: &mut R) -> io::Result<i32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

/// `Some(ix)` round-trips as `ix`, `None` as `-1`, matching the
/// reference's `int current_function_index`/`target_function_index`
/// fields (`-1` when `search_function` found nothing).
fn write_fn_ix<W: Write>(w: &mut W, ix: Option<usize>) -> io::Result<()> {
    write_i32(w, ix.map_or(-1, |i| i32::try_from(i).unwrap_or(-1)))
}

fn read_fn_ix<R: Read>(r: &mut R) -> io::Result<Option<usize>> {
    let raw = read_i32(r)?;
    Ok(usize::try_from(raw).ok())
}

fn write_trace_item<W: Write>(w: &mut W, item: &TraceItem) -> io::Result<()> {
    write_u32(w, u32::from(item.kind == TraceKind::Ret))?;
    write_u32(w, item.pc)?;
    write_u32(w, item.target)?;
    write_fn_ix(w, item.current_fn_ix)?;
    write_fn_ix(w, item.target_fn_ix)?;
    write_u32(w, u32::try_from(item.level).unwrap_or(u32::MAX))
}

fn read_trace_item<R: Read>(r: &mut R) -> io::Result<TraceItem> {
    let kind = if read_u32(r)? == 0 { TraceKind::Call } else { TraceKind::Ret };
    let pc = read_u32(r)?;
    let target = read_u32(r)?;
    let current_fn_ix = read_fn_ix(r)?;
    let target_fn_ix = read_fn_ix(r)?;
    let level = read_u32(r)? as usize;
    Ok(TraceItem { kind, pc, target, current_fn_ix, target_fn_ix, level })
}

/// Write `cpu`, `ram`, and `shadow_stack` to `path` as a single binary
/// image.
///
/// # Errors
/// Propagates any I/O failure opening or writing `path`.
pub fn save(path: &std::path::Path, cpu: &CpuState, ram: &[u8], shadow_stack: &[TraceItem]) -> io::Result<()> {
    let mut w = BufWriter::new(File::create(path)?);

    write_u32(&mut w, cpu.pc)?;
    for idx in 0..32 {
        write_u32(&mut w, cpu.gpr.read(idx))?;
    }
    for idx in 0..riscv32_cpu::NR_CSR {
        write_u32(&mut w, cpu.csr.get(idx))?;
    }
    w.write_all(&[cpu.mode.bits() as u8, u8::from(cpu.intr)])?;

    w.write_all(ram)?;

    write_u32(&mut w, u32::try_from(shadow_stack.len()).unwrap_or(u32::MAX))?;
    for frame in shadow_stack {
        write_trace_item(&mut w, frame)?;
    }

    w.flush()
}

/// Read a snapshot written by [`save`] back into its three parts. `ram`
/// is resized to exactly `ram_size` bytes; the file must contain at
/// least that much RAM data.
///
/// # Errors
/// Propagates I/O failure, including a truncated file.
pub fn load(path: &std::path::Path, ram_size: usize) -> io::Result<(CpuState, Vec<u8>, Vec<TraceItem>)> {
    let mut r = BufReader::new(File::open(path)?);

    let pc = read_u32(&mut r)?;
    let mut gpr = GprFile::new();
    for idx in 0..32 {
        gpr.write(idx, read_u32(&mut r)?);
    }
    let mut csr = CsrFile::new();
    for idx in 0..riscv32_cpu::NR_CSR {
        csr.set(idx, read_u32(&mut r)?);
    }
    let mut mode_intr = [0u8; 2];
    r.read_exact(&mut mode_intr)?;
    let mode = Mode::from_bits(u32::from(mode_intr[0]));
    let intr = mode_intr[1] != 0;

    let mut ram = vec![0u8; ram_size];
    r.read_exact(&mut ram)?;

    let n_frames = read_u32(&mut r)? as usize;
    let mut shadow_stack = Vec::with_capacity(n_frames);
    for _ in 0..n_frames {
        shadow_stack.push(read_trace_item(&mut r)?);
    }

    let cpu = CpuState { gpr, pc, csr, mode, intr };
    Ok((cpu, ram, shadow_stack))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn save_then_load_round_trips_everything() {
        let mut cpu = CpuState::new(0x8000_0000);
        cpu.gpr.write(10, 0x1234_5678);
        cpu.csr.set(riscv32_cpu::csr_index::SATP, 0x8000_0001);
        cpu.mode = Mode::S;
        cpu.intr = true;
        let ram = vec![0xab; 4096];
        let shadow_stack = vec![
            TraceItem { kind: TraceKind::Call, pc: 0x100, target: 0x1000, current_fn_ix: Some(2), target_fn_ix: None, level: 0 },
            TraceItem { kind: TraceKind::Call, pc: 0x200, target: 0x2000, current_fn_ix: None, target_fn_ix: Some(5), level: 1 },
            TraceItem { kind: TraceKind::Call, pc: 0x300, target: 0x3000, current_fn_ix: Some(7), target_fn_ix: Some(9), level: 2 },
        ];

        let file = NamedTempFile::new().unwrap();
        save(file.path(), &cpu, &ram, &shadow_stack).unwrap();
        let (cpu2, ram2, stack2) = load(file.path(), ram.len()).unwrap();

        assert_eq!(cpu2.pc, cpu.pc);
        assert_eq!(cpu2.gpr.read(10), 0x1234_5678);
        assert_eq!(cpu2.csr.get(riscv32_cpu::csr_index::SATP), 0x8000_0001);
        assert_eq!(cpu2.mode, Mode::S);
        assert!(cpu2.intr);
        assert_eq!(ram2, ram);
        assert_eq!(stack2, shadow_stack);
    }

    #[test]
    fn truncated_file_is_an_io_error() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), [0u8; 3]).unwrap();
        assert!(load(file.path(), 4096).is_err());
    }
}
