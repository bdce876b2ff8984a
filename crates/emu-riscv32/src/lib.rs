pub mod cli;
pub mod device;
pub mod isa;
pub mod machine;
pub mod refmodel;
pub mod repl;

pub use machine::{Machine, RunResult};
