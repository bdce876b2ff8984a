//! Tokenizer and recursive precedence-climbing evaluator.

mod eval;
mod token;

pub use eval::EvalContext;
use token::{disambiguate, tokenize};

use crate::error::SdbError;

/// Tokenize, disambiguate unary operators, and evaluate `input` against
/// `ctx`. Mirrors the reference's `expr()` entry point: every syntactic
/// failure is a plain `Err`, nothing panics.
pub fn expr(input: &str, ctx: &mut dyn EvalContext) -> Result<u32, SdbError> {
    let mut tokens = tokenize(input).map_err(SdbError::TokenizeFailed)?;
    disambiguate(&mut tokens);
    if tokens.is_empty() {
        return Err(SdbError::NoOperand);
    }
    let last = tokens.len() - 1;
    eval::eval(&tokens, 0, last, ctx)
}
