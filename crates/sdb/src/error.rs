//! Errors surfaced by the debugger control surface.
//!
//! All of these are user errors in the sense of the workspace's error
//! taxonomy: printed to the REPL, execution continues. Nothing in this
//! crate panics on bad user input — only host/invariant violations
//! (shadow-stack overflow, ELF parse failure) do, and those live closer
//! to where they're detected (`ftrace`, `elf`).

use thiserror::Error;

/// Errors from the expression evaluator and the watchpoint/snapshot
/// commands built on top of it.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SdbError {
    #[error("unmatched )")]
    UnmatchedCloseParen,
    #[error("unclosed (")]
    UnclosedOpenParen,
    #[error("invalid expression")]
    InvalidExpression,
    #[error("invalid expression, no operand")]
    NoOperand,
    #[error("unknown register or csr: {0}")]
    UnknownRegister(String),
    #[error("invalid unary operator: {0}")]
    InvalidUnaryOperator(String),
    #[error("division by zero")]
    DivisionByZero,
    #[error("unmatched character at position {0}")]
    TokenizeFailed(usize),
    #[error("watchpoint pool full")]
    WatchpointPoolFull,
    #[error("watchpoint {0} does not exist")]
    UnknownWatchpoint(i64),
}
