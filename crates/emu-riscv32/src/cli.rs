//! Command-line interface (spec.md §6).
//!
//! The reference hand-rolls its argv loop (`monitor.c::parse_args`), but
//! that loop is `getopt_long` over a fixed table; `clap` generates the
//! same short/long aliasing and `-h` text from this struct.

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "emu", about = "RV32I/M instruction-set emulator with an interactive monitor/debugger")]
pub struct Cli {
    /// Run to completion non-interactively.
    #[arg(short, long)]
    pub batch: bool,

    /// Log sink path.
    #[arg(short, long, value_name = "FILE")]
    pub log: Option<PathBuf>,

    /// Path to a reference emulator shared library.
    #[arg(short, long = "diff", value_name = "REF_SO")]
    pub diff: Option<PathBuf>,

    /// Reference port.
    #[arg(short, long, default_value_t = 1234)]
    pub port: u16,

    /// Raw image, loaded at the reset vector.
    #[arg(long, value_name = "FILE")]
    pub img: Option<PathBuf>,

    /// Comma-separated ELF files for symbols.
    #[arg(long, value_delimiter = ',')]
    pub elf: Vec<PathBuf>,

    /// Guest image, loaded at the reset vector (same as `--img` when
    /// given positionally).
    pub image: Option<PathBuf>,
}
