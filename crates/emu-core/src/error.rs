//! Shared error taxonomy.

use thiserror::Error;

/// Errors shared across the emulator crates.
///
/// Guest-side faults that the reference implementation treats as fatal
/// (unmapped access, permission violation, page-crossing access) are not
/// represented here — they panic at the point of detection, matching the
/// reference's own `Assert`-and-abort discipline.
#[derive(Debug, Error)]
pub enum EmuError {
    /// An address fell outside every registered region and outside RAM.
    #[error("unmapped physical address {0:#010x}")]
    Unmapped(u32),

    /// A device handler rejected an access (e.g. write below a read-only
    /// register's offset).
    #[error("invalid device access at offset {offset:#x} (len {len}, write={is_write}): {reason}")]
    DeviceAccess {
        /// Offset within the device's region.
        offset: u32,
        /// Access length in bytes.
        len: u8,
        /// Whether the access was a write.
        is_write: bool,
        /// Human-readable reason.
        reason: &'static str,
    },

    /// I/O error while loading an image, ELF, or snapshot.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
