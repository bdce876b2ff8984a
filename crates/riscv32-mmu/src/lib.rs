//! Guest memory fabric: flat RAM, the device bus, and Sv32 translation.

mod error;
mod memory;
mod mmu;

pub use error::MmuError;
pub use memory::{DeviceHandler, MemoryBus};
pub use mmu::{vaddr_ifetch, vaddr_read, vaddr_to_paddr, vaddr_write};
