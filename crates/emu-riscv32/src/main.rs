use std::fs;

use clap::Parser;
use emu_riscv32::cli::Cli;
use emu_riscv32::device::{AudioDevice, Disk};
use emu_riscv32::isa::Rv32Im;
use emu_riscv32::machine::Machine;
use emu_riscv32::repl;
use riscv32_mmu::MemoryBus;

const RESET_VECTOR: u32 = 0x8000_0000;
const RAM_SIZE: u32 = 128 * 1024 * 1024;
const AUDIO_BASE: u32 = 0xa000_0000;
const AUDIO_SBUF_SIZE: u32 = 0x1000;
const DISK_BASE: u32 = 0xa000_1000;

fn main() {
    let cli = Cli::parse();

    if let Some(log_path) = &cli.log {
        let target = Box::new(fs::File::create(log_path).expect("open log file"));
        env_logger::Builder::from_default_env()
            .target(env_logger::Target::Pipe(target))
            .init();
    } else {
        env_logger::init();
    }

    let mut bus = MemoryBus::new(RESET_VECTOR, RAM_SIZE);

    let audio = AudioDevice::new(AUDIO_SBUF_SIZE);
    bus.add_device("audio", AUDIO_BASE, AudioDevice::region_len(), Box::new(audio))
        .expect("register audio device");

    let disk = std::env::var("diskimg").ok().map(|path| {
        let disk = Disk::open(std::path::Path::new(&path)).expect("open disk image");
        bus.add_device("disk", DISK_BASE, Disk::region_len(), disk.mmio_handler())
            .expect("register disk device");
        disk
    });

    let mut machine = Machine::new(RESET_VECTOR, bus, Box::new(Rv32Im::new()));
    machine.disk = disk;

    let image_path = cli.img.as_ref().or(cli.image.as_ref());
    if let Some(path) = image_path {
        let image = fs::read(path).expect("read guest image");
        let ram = machine.bus.ram_mut();
        ram[..image.len()].copy_from_slice(&image);
    }

    for elf_path in &cli.elf {
        let bytes = fs::read(elf_path).expect("read ELF file");
        machine.functions.load_elf(&bytes).expect("parse ELF symbols");
    }

    if let Some(diff_path) = &cli.diff {
        repl::load_reference(&mut machine, diff_path).expect("load reference .so");
    } else {
        machine.difftest_enabled = false;
    }

    let code = if cli.batch {
        repl::run_batch(&mut machine)
    } else {
        repl::run_interactive(&mut machine)
    };

    std::process::exit(code);
}
