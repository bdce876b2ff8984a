//! Audio and disk device register layouts (spec.md §6).
//!
//! Only the MMIO register contract is real; the host-facing side
//! (opening an SDL audio device, raw block I/O against a file) is
//! explicitly out of scope for audio and stubbed with a log line. Disk
//! I/O is plain file I/O, not excluded by that same non-goal, so it is
//! implemented against a real file.

use std::cell::RefCell;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::rc::Rc;

use riscv32_mmu::{DeviceHandler, MemoryBus};

const REG_LEN: u32 = 4;

/// `{freq, channels, samples, sbuf_size (RO), init (WO trigger), count}`.
pub struct AudioDevice {
    regs: [u32; 6],
}

mod audio_reg {
    pub const FREQ: usize = 0;
    pub const CHANNELS: usize = 1;
    pub const SAMPLES: usize = 2;
    pub const SBUF_SIZE: usize = 3;
    pub const INIT: usize = 4;
    pub const COUNT: usize = 5;
    pub const NR_REG: usize = 6;
}

impl AudioDevice {
    #[must_use]
    pub fn new(sbuf_size: u32) -> Self {
        let mut regs = [0u32; audio_reg::NR_REG];
        regs[audio_reg::SBUF_SIZE] = sbuf_size;
        Self { regs }
    }

    /// Region length in bytes, for `add_device`.
    #[must_use]
    pub fn region_len() -> u32 {
        audio_reg::NR_REG as u32 * REG_LEN
    }
}

impl DeviceHandler for AudioDevice {
    fn read(&mut self, offset: u32, _len: u8) -> u32 {
        let idx = (offset / REG_LEN) as usize;
        self.regs.get(idx).copied().unwrap_or(0)
    }

    fn write(&mut self, offset: u32, _len: u8, value: u32) {
        let idx = (offset / REG_LEN) as usize;
        if idx >= audio_reg::NR_REG || idx == audio_reg::SBUF_SIZE {
            return;
        }
        self.regs[idx] = value;
        if idx == audio_reg::INIT && value != 0 {
            log::info!(
                "audio device init: freq={} channels={} samples={}",
                self.regs[audio_reg::FREQ],
                self.regs[audio_reg::CHANNELS],
                self.regs[audio_reg::SAMPLES],
            );
        }
    }
}

/// `{present (RO), blksz (RO), blkcnt (RO), io_buf, io_blkno, io_blkcnt,
/// io_cmd}`.
mod disk_reg {
    pub const PRESENT: usize = 0;
    pub const BLKSZ: usize = 1;
    pub const BLKCNT: usize = 2;
    pub const IO_BUF: usize = 3;
    pub const IO_BLKNO: usize = 4;
    pub const IO_BLKCNT: usize = 5;
    pub const IO_CMD: usize = 6;
    pub const NR_REG: usize = 7;
}

pub const BLKSZ: u32 = 512;

#[derive(Default)]
struct DiskRegs {
    values: [u32; disk_reg::NR_REG],
}

/// The MMIO-facing half of the disk device: only touches register
/// state. Actual block I/O happens in [`Disk::service`], since a
/// [`DeviceHandler`] only sees its own register offsets, not guest RAM.
struct DiskMmio(Rc<RefCell<DiskRegs>>);

impl DeviceHandler for DiskMmio {
    fn read(&mut self, offset: u32, _len: u8) -> u32 {
        let idx = (offset / REG_LEN) as usize;
        self.0.borrow().values.get(idx).copied().unwrap_or(0)
    }

    fn write(&mut self, offset: u32, _len: u8, value: u32) {
        let idx = (offset / REG_LEN) as usize;
        if idx >= disk_reg::NR_REG || idx < disk_reg::IO_BUF {
            return; // present/blksz/blkcnt are read-only
        }
        self.0.borrow_mut().values[idx] = value;
    }
}

/// Raw block device image backing the disk MMIO registers. Reads
/// blocks at `io_cmd=1`, writes at `io_cmd=2`; the command register
/// self-clears once the transfer completes.
pub struct Disk {
    file: File,
    regs: Rc<RefCell<DiskRegs>>,
}

impl Disk {
    /// Open `path` as the backing image; block count is derived from its
    /// length, rounded up to a whole number of [`BLKSZ`]-byte blocks.
    ///
    /// # Errors
    /// Propagates any I/O failure opening or stat-ing `path`.
    pub fn open(path: &std::path::Path) -> std::io::Result<Self> {
        let file = File::options().read(true).write(true).open(path)?;
        let len = file.metadata()?.len();
        let blkcnt = len.div_ceil(u64::from(BLKSZ));
        let mut regs = DiskRegs::default();
        regs.values[disk_reg::PRESENT] = 1;
        regs.values[disk_reg::BLKSZ] = BLKSZ;
        regs.values[disk_reg::BLKCNT] = u32::try_from(blkcnt).unwrap_or(u32::MAX);
        Ok(Self { file, regs: Rc::new(RefCell::new(regs)) })
    }

    /// Region length in bytes, for `add_device`.
    #[must_use]
    pub fn region_len() -> u32 {
        disk_reg::NR_REG as u32 * REG_LEN
    }

    /// The `DeviceHandler` to hand to `MemoryBus::add_device`.
    #[must_use]
    pub fn mmio_handler(&self) -> Box<dyn DeviceHandler> {
        Box::new(DiskMmio(Rc::clone(&self.regs)))
    }

    /// Service a pending `io_cmd`, if any, against `bus`'s guest RAM.
    /// Call this once per retired instruction (or at least after every
    /// write to the disk's register region).
    ///
    /// # Panics
    /// Propagates I/O failure as a panic: a disk read/write error on a
    /// backing image that was successfully opened is a host environment
    /// fault, not a guest-recoverable error.
    pub fn service(&mut self, bus: &mut MemoryBus) {
        let cmd = self.regs.borrow().values[disk_reg::IO_CMD];
        if cmd == 0 {
            return;
        }
        let (io_buf, blkno, blkcnt) = {
            let r = self.regs.borrow();
            (
                r.values[disk_reg::IO_BUF],
                u64::from(r.values[disk_reg::IO_BLKNO]),
                u64::from(r.values[disk_reg::IO_BLKCNT]),
            )
        };
        let nbytes = (blkcnt * u64::from(BLKSZ)) as usize;
        let offset = blkno * u64::from(BLKSZ);
        self.file.seek(SeekFrom::Start(offset)).expect("seek disk image");

        let ram_base = bus.ram_base();
        let ram = bus.ram_mut();
        let start = (io_buf - ram_base) as usize;

        match cmd {
            1 => {
                self.file
                    .read_exact(&mut ram[start..start + nbytes])
                    .expect("read disk image");
            }
            2 => {
                self.file
                    .write_all(&ram[start..start + nbytes])
                    .expect("write disk image");
            }
            other => log::warn!("unknown disk io_cmd {other}, ignoring"),
        }

        self.regs.borrow_mut().values[disk_reg::IO_CMD] = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_init_only_triggers_on_nonzero_write() {
        let mut dev = AudioDevice::new(4096);
        dev.write(audio_reg::FREQ as u32 * REG_LEN, 4, 44100);
        dev.write(audio_reg::INIT as u32 * REG_LEN, 4, 0);
        assert_eq!(dev.read(audio_reg::FREQ as u32 * REG_LEN, 4), 44100);
    }

    #[test]
    fn audio_sbuf_size_is_read_only() {
        let mut dev = AudioDevice::new(4096);
        dev.write(audio_reg::SBUF_SIZE as u32 * REG_LEN, 4, 9999);
        assert_eq!(dev.read(audio_reg::SBUF_SIZE as u32 * REG_LEN, 4), 4096);
    }

    #[test]
    fn disk_rejects_writes_before_io_buf() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), vec![0u8; 1024]).unwrap();
        let disk = Disk::open(tmp.path()).unwrap();
        let mut handler = disk.mmio_handler();
        handler.write(disk_reg::PRESENT as u32 * REG_LEN, 4, 99);
        assert_eq!(handler.read(disk_reg::PRESENT as u32 * REG_LEN, 4), 1);
    }

    #[test]
    fn disk_read_command_copies_block_into_ram_and_self_clears() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let mut image = vec![0u8; BLKSZ as usize * 2];
        image[..4].copy_from_slice(&0xdead_beefu32.to_le_bytes());
        std::fs::write(tmp.path(), &image).unwrap();

        let mut disk = Disk::open(tmp.path()).unwrap();
        let mut bus = MemoryBus::new(0x8000_0000, 0x2000);
        {
            let mut r = disk.regs.borrow_mut();
            r.values[disk_reg::IO_BUF] = 0x8000_0000;
            r.values[disk_reg::IO_BLKNO] = 0;
            r.values[disk_reg::IO_BLKCNT] = 1;
            r.values[disk_reg::IO_CMD] = 1;
        }
        disk.service(&mut bus);
        assert_eq!(bus.ram()[..4], 0xdead_beefu32.to_le_bytes());
        assert_eq!(disk.regs.borrow().values[disk_reg::IO_CMD], 0);
    }
}
