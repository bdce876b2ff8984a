//! Debugger control surface shared by the monitor: expression evaluation,
//! watchpoints, the function tracer, instruction history, and snapshots.
//!
//! None of this module talks to a terminal; it is the model half of the
//! monitor REPL, with the binary crate supplying the view (`info`, `p`,
//! `w`, `ftrace`, ... command handlers) and the `EvalContext` adapter over
//! the live machine.

mod error;
mod expr;
mod ftrace;
mod itrace;
mod snapshot;
mod watchpoint;

pub use error::SdbError;
pub use expr::{expr, EvalContext};
pub use ftrace::{FtraceError, FunctionInfo, FunctionRegistry, FunctionTracer, TraceItem, TraceKind};
pub use itrace::InstHistory;
pub use snapshot::{load as load_snapshot, save as save_snapshot};
pub use watchpoint::{WatchpointPool, WatchpointView};
