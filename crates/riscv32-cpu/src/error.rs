//! Errors raised by the CPU state and trap unit.

use thiserror::Error;

/// Errors produced while manipulating architectural state.
///
/// These are all host/guest invariant violations that the reference
/// implementation treats as fatal (unknown CSR address, out-of-range
/// register index); this crate returns them as `Result` so the caller
/// decides how to terminate, but none of them are expected to be
/// recoverable in normal operation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CpuError {
    /// No CSR is mapped at this architectural address.
    #[error("unsupported csr address {0:#x}")]
    UnknownCsrAddress(u32),
}
