//! Sv32 two-level address translation.

use emu_core::{AccessKind, Bus};

use crate::memory::MemoryBus;

const PAGE_SHIFT: u32 = 12;
const PAGE_MASK: u32 = (1 << PAGE_SHIFT) - 1;

/// Permission mask required in the PTE's low 4 bits (`V|R|W|X`) for a
/// given access kind.
fn required_pte_bits(kind: AccessKind) -> u32 {
    match kind {
        AccessKind::Fetch => 0x9, // X | V
        AccessKind::Read => 0x3,  // R | V
        AccessKind::Write => 0x7, // W | R | V
    }
}

/// Translate `vaddr` to a physical address given the current `satp`
/// value, or return it unchanged when paging is disabled (`satp[31] ==
/// 0`).
///
/// Panics on any guest fault the reference implementation treats as
/// fatal: a page-crossing access, a non-pointer page-directory entry, or
/// a permission-violating page-table entry. This mirrors the source's own
/// `assert`/`panic` discipline rather than promoting these to a guest
/// trap (see the workspace design notes).
pub fn vaddr_to_paddr(bus: &mut MemoryBus, satp: u32, vaddr: u32, len: u8, kind: AccessKind) -> u32 {
    if satp >> 31 == 0 {
        return vaddr;
    }

    assert!(
        (vaddr >> PAGE_SHIFT) == (vaddr + u32::from(len) - 1) >> PAGE_SHIFT,
        "memory access cross page at vaddr {vaddr:#010x} len {len}"
    );

    let page_dir = (satp & 0x7fff_ffff) << PAGE_SHIFT;
    let pde_addr = page_dir + 4 * (vaddr >> 22);
    let pde = bus.read(pde_addr, 4);
    assert!(
        pde & 0xf == 0x1,
        "invalid page directory entry {pde:#010x} at {pde_addr:#010x} (vaddr {vaddr:#010x})"
    );

    let page_table = (pde >> 10) << PAGE_SHIFT;
    let pte_addr = page_table + 4 * ((vaddr >> 12) & 0x3ff);
    let pte = bus.read(pte_addr, 4);
    let required = required_pte_bits(kind);
    assert!(
        pte & required == required,
        "permission violation: pte {pte:#010x} at {pte_addr:#010x} does not satisfy {required:#x} ({kind:?})"
    );

    let page_addr = (pte >> 10) << PAGE_SHIFT;
    page_addr | (vaddr & PAGE_MASK)
}

/// Fetch an instruction word (or fraction thereof) through the MMU.
pub fn vaddr_ifetch(bus: &mut MemoryBus, satp: u32, addr: u32, len: u8) -> u32 {
    let paddr = vaddr_to_paddr(bus, satp, addr, len, AccessKind::Fetch);
    bus.read(paddr, len)
}

/// Read data through the MMU.
pub fn vaddr_read(bus: &mut MemoryBus, satp: u32, addr: u32, len: u8) -> u32 {
    let paddr = vaddr_to_paddr(bus, satp, addr, len, AccessKind::Read);
    bus.read(paddr, len)
}

/// Write data through the MMU.
pub fn vaddr_write(bus: &mut MemoryBus, satp: u32, addr: u32, len: u8, data: u32) {
    let paddr = vaddr_to_paddr(bus, satp, addr, len, AccessKind::Write);
    bus.write(paddr, len, data);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_mapping(bus: &mut MemoryBus, vaddr: u32, frame: u32, pte_flags: u32) -> u32 {
        let page_dir: u32 = 0x8000_0000;
        let page_table: u32 = 0x8000_1000;
        let satp = (1 << 31) | (page_dir >> 12);

        let pde = (page_table >> 12 << 10) | 0x1;
        bus.write(page_dir + 4 * (vaddr >> 22), 4, pde);

        let pte = (frame << 10) | pte_flags;
        bus.write(page_table + 4 * ((vaddr >> 12) & 0x3ff), 4, pte);

        satp
    }

    #[test]
    fn direct_mode_is_identity() {
        let mut bus = MemoryBus::new(0x8000_0000, 0x2000);
        assert_eq!(
            vaddr_to_paddr(&mut bus, 0, 0x8000_0010, 4, AccessKind::Read),
            0x8000_0010
        );
    }

    #[test]
    fn translated_read_resolves_frame() {
        let mut bus = MemoryBus::new(0x8000_0000, 0x3000);
        let vaddr = 0x0040_0000;
        let frame = 0x8000_2;
        let satp = build_mapping(&mut bus, vaddr, frame, 0xf);

        bus.write((frame << 12) | (vaddr & 0xfff), 4, 0x1234_5678);
        assert_eq!(vaddr_read(&mut bus, satp, vaddr, 4), 0x1234_5678);
    }

    #[test]
    #[should_panic(expected = "permission violation")]
    fn write_without_w_bit_is_rejected() {
        let mut bus = MemoryBus::new(0x8000_0000, 0x3000);
        let vaddr = 0x0040_0000;
        let satp = build_mapping(&mut bus, vaddr, 0x8000_2, 0xb); // V|R|X, no W
        vaddr_write(&mut bus, satp, vaddr, 4, 0);
    }

    #[test]
    #[should_panic(expected = "cross page")]
    fn page_crossing_access_is_rejected() {
        let mut bus = MemoryBus::new(0x8000_0000, 0x1000);
        vaddr_to_paddr(&mut bus, 1 << 31, 0xffc, 8, AccessKind::Read);
    }
}
