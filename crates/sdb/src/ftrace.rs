//! Function tracer: ELF symbol table ingest, call/return shadow stack,
//! and the ring buffer backing `ftrace`/`fstack`.

use std::collections::VecDeque;
use std::fmt;

use object::{Object, ObjectSymbol, SymbolKind};
use thiserror::Error;

const SHADOW_STACK_CAP: usize = 100;
const TRACE_LOG_CAP: usize = 100;
const NAME_TRUNCATE: usize = 127;

#[derive(Debug, Error)]
pub enum FtraceError {
    #[error("malformed ELF image: {0}")]
    Elf(#[from] object::Error),
    #[error("shadow call stack overflow (deeper than {SHADOW_STACK_CAP} frames)")]
    ShadowStackOverflow,
    #[error("shadow call stack underflow: return with no matching call")]
    ShadowStackUnderflow,
}

/// One entry from an ELF symbol table. `is_function` distinguishes
/// `STT_FUNC` symbols, which match any address in `[start, end)`, from
/// data symbols, which only match their exact `start`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionInfo {
    pub is_function: bool,
    pub name: String,
    pub start: u32,
    pub end: u32,
}

/// The set of symbols known from one or more loaded ELF images.
#[derive(Debug, Default)]
pub struct FunctionRegistry {
    functions: Vec<FunctionInfo>,
}

impl FunctionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `data` as an ELF image and register every named, defined
    /// symbol. Can be called more than once to merge symbols from
    /// several images (e.g. a kernel and its modules).
    ///
    /// # Errors
    /// Returns [`FtraceError::Elf`] if `data` is not a parseable ELF
    /// object.
    pub fn load_elf(&mut self, data: &[u8]) -> Result<(), FtraceError> {
        let file = object::File::parse(data)?;
        for sym in file.symbols() {
            if !sym.is_definition() {
                continue;
            }
            let Ok(name) = sym.name() else { continue };
            if name.is_empty() {
                continue;
            }
            let mut truncated = name.to_string();
            truncated.truncate(NAME_TRUNCATE);
            self.functions.push(FunctionInfo {
                is_function: sym.kind() == SymbolKind::Text,
                name: truncated,
                start: u32::try_from(sym.address()).unwrap_or(u32::MAX),
                end: u32::try_from(sym.address() + sym.size()).unwrap_or(u32::MAX),
            });
        }
        Ok(())
    }

    /// Find the symbol covering `addr`: a function symbol matches any
    /// address in its range, a data symbol only an exact match.
    #[must_use]
    pub fn search(&self, addr: u32) -> Option<&FunctionInfo> {
        self.functions.get(self.index_of(addr)?)
    }

    /// Like [`Self::search`], but returns the symbol's index rather than
    /// a reference to it. `ftrace`/`fstack` frames pin this index at the
    /// time of the call, the same way `search_function`'s return value
    /// is stored directly into `function_trace_item` in the reference.
    #[must_use]
    pub fn index_of(&self, addr: u32) -> Option<usize> {
        self.functions.iter().position(|f| {
            if f.is_function {
                addr >= f.start && addr < f.end
            } else {
                addr == f.start
            }
        })
    }

    /// Resolve an index from [`Self::index_of`] back to its name, for
    /// display.
    #[must_use]
    pub fn name_at(&self, index: Option<usize>) -> Option<&str> {
        index.and_then(|i| self.functions.get(i)).map(|f| f.name.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceKind {
    Call,
    Ret,
}

/// One logged call or return. Mirrors the reference's
/// `function_trace_item`: besides the raw `pc`/`target`, it pins the
/// symbol-table index of both ends of the call at the moment it was
/// recorded (`None` if neither ELF covers that address), plus the
/// shadow-stack depth at the time (used to indent `ftrace`/`fstack`
/// output). This is also the unit the shadow call stack itself is made
/// of, so a `save`/`load` round trip or `fstack` print has the real
/// per-frame `pc` to show, not just the bare target address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceItem {
    pub kind: TraceKind,
    pub pc: u32,
    pub target: u32,
    pub current_fn_ix: Option<usize>,
    pub target_fn_ix: Option<usize>,
    pub level: usize,
}

impl fmt::Display for TraceItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let indent = "  ".repeat(self.level);
        let verb = match self.kind {
            TraceKind::Call => "call",
            TraceKind::Ret => "ret ",
        };
        write!(f, "0x{:08x}: {indent}{verb} 0x{:08x}", self.pc, self.target)
    }
}

/// Tracks the guest's call stack as it actually executes, independent
/// of what the ELF symbol table says should nest inside what.
pub struct FunctionTracer {
    shadow_stack: Vec<TraceItem>,
    trace_log: VecDeque<TraceItem>,
}

impl FunctionTracer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            shadow_stack: Vec::with_capacity(SHADOW_STACK_CAP),
            trace_log: VecDeque::with_capacity(TRACE_LOG_CAP),
        }
    }

    /// Record a call or return at `pc` targeting `target`. `current_fn_ix`/
    /// `target_fn_ix` are the symbol-table indices of `pc`/`target`
    /// ([`FunctionRegistry::index_of`]), resolved by the caller since the
    /// tracer itself doesn't hold a registry reference.
    ///
    /// # Errors
    /// A `Call` past [`SHADOW_STACK_CAP`] frames, or a `Ret` with no
    /// matching `Call`, is a host invariant violation and returns an
    /// error rather than silently desyncing the trace.
    pub fn trace(
        &mut self,
        pc: u32,
        target: u32,
        kind: TraceKind,
        current_fn_ix: Option<usize>,
        target_fn_ix: Option<usize>,
    ) -> Result<(), FtraceError> {
        let level = match kind {
            TraceKind::Call => {
                if self.shadow_stack.len() >= SHADOW_STACK_CAP {
                    return Err(FtraceError::ShadowStackOverflow);
                }
                self.shadow_stack.len()
            }
            TraceKind::Ret => {
                if self.shadow_stack.pop().is_none() {
                    return Err(FtraceError::ShadowStackUnderflow);
                }
                self.shadow_stack.len()
            }
        };
        let item = TraceItem { kind, pc, target, current_fn_ix, target_fn_ix, level };
        if kind == TraceKind::Call {
            self.shadow_stack.push(item.clone());
        }
        if self.trace_log.len() == TRACE_LOG_CAP {
            self.trace_log.pop_front();
        }
        self.trace_log.push_back(item);
        Ok(())
    }

    /// The last [`TRACE_LOG_CAP`] calls/returns, oldest first.
    #[must_use]
    pub fn trace_log(&self) -> impl Iterator<Item = &TraceItem> {
        self.trace_log.iter()
    }

    /// The live call stack, innermost (most recent) frame first.
    #[must_use]
    pub fn call_stack(&self) -> impl Iterator<Item = &TraceItem> {
        self.shadow_stack.iter().rev()
    }

    /// Raw shadow-stack contents, for snapshotting.
    #[must_use]
    pub fn save_stack(&self) -> Vec<TraceItem> {
        self.shadow_stack.clone()
    }

    /// Restore the shadow stack from a snapshot. Does not touch the
    /// trace log, which is diagnostic only.
    pub fn load_stack(&mut self, frames: Vec<TraceItem>) {
        self.shadow_stack = frames;
    }
}

impl Default for FunctionTracer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_matches_function_range_but_data_only_exact() {
        let reg = FunctionRegistry {
            functions: vec![
                FunctionInfo { is_function: true, name: "main".into(), start: 0x1000, end: 0x1010 },
                FunctionInfo { is_function: false, name: "g_counter".into(), start: 0x2000, end: 0x2004 },
            ],
        };
        assert_eq!(reg.search(0x1004).unwrap().name, "main");
        assert!(reg.search(0x1010).is_none());
        assert_eq!(reg.search(0x2000).unwrap().name, "g_counter");
        assert!(reg.search(0x2002).is_none());
    }

    #[test]
    fn call_then_ret_round_trips_depth() {
        let mut t = FunctionTracer::new();
        t.trace(0x100, 0x200, TraceKind::Call, None, None).unwrap();
        assert_eq!(t.call_stack().map(|f| f.target).collect::<Vec<_>>(), vec![0x200]);
        t.trace(0x204, 0x104, TraceKind::Ret, None, None).unwrap();
        assert_eq!(t.call_stack().count(), 0);
    }

    #[test]
    fn ret_without_call_is_an_error() {
        let mut t = FunctionTracer::new();
        assert!(matches!(
            t.trace(0x100, 0x104, TraceKind::Ret, None, None),
            Err(FtraceError::ShadowStackUnderflow)
        ));
    }

    #[test]
    fn call_stack_overflow_is_an_error() {
        let mut t = FunctionTracer::new();
        for i in 0..SHADOW_STACK_CAP {
            t.trace(i as u32, i as u32 + 1, TraceKind::Call, None, None).unwrap();
        }
        assert!(matches!(
            t.trace(0, 1, TraceKind::Call, None, None),
            Err(FtraceError::ShadowStackOverflow)
        ));
    }

    #[test]
    fn trace_log_caps_at_capacity_and_drops_oldest() {
        let mut t = FunctionTracer::new();
        for i in 0..TRACE_LOG_CAP + 5 {
            let _ = t.trace(i as u32, i as u32, TraceKind::Call, None, None);
        }
        assert_eq!(t.trace_log().count(), TRACE_LOG_CAP);
    }

    #[test]
    fn save_and_load_stack_round_trip() {
        let mut t = FunctionTracer::new();
        t.trace(0, 0xaaaa, TraceKind::Call, None, None).unwrap();
        t.trace(4, 0xbbbb, TraceKind::Call, None, None).unwrap();
        let saved = t.save_stack();
        let mut t2 = FunctionTracer::new();
        t2.load_stack(saved);
        assert_eq!(t2.call_stack().map(|f| f.target).collect::<Vec<_>>(), vec![0xbbbb, 0xaaaa]);
    }
}
