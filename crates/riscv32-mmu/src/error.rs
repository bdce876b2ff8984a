//! Errors raised while wiring up the physical bus.

use thiserror::Error;

/// Host-side configuration errors — these indicate a bug in the code
/// registering devices, not a guest fault, so they are returned rather
/// than panicking.
#[derive(Debug, Error)]
pub enum MmuError {
    /// Two device regions overlap in the physical address space.
    #[error("device region \"{new}\" [{new_base:#010x}, {new_end:#010x}) overlaps \"{existing}\"")]
    OverlappingRegion {
        new: String,
        new_base: u32,
        new_end: u32,
        existing: String,
    },
}
