//! Recursive precedence-climbing evaluator.

use super::token::{is_operand, Token, TokenType};
use crate::error::SdbError;

/// Everything the evaluator needs from the machine: register/CSR name
/// resolution for `$reg` operands, and a 4-byte memory read for `*addr`.
///
/// Implemented by a thin adapter over [`riscv32_cpu::CpuState`] and
/// [`riscv32_mmu::MemoryBus`] in the binary crate; kept as a trait here so
/// the tokenizer/evaluator can be tested without wiring up a full machine.
pub trait EvalContext {
    /// Resolve a register or CSR name (without a leading `$`) to its
    /// current value.
    fn resolve_name(&self, name: &str) -> Option<u32>;

    /// Read a 4-byte word at a guest virtual address.
    fn read_word(&mut self, addr: u32) -> u32;
}

fn is_binary_operator(kind: TokenType) -> bool {
    matches!(
        kind,
        TokenType::Plus
            | TokenType::Minus
            | TokenType::Star
            | TokenType::Slash
            | TokenType::Eq
            | TokenType::NotEq
            | TokenType::And
    )
}

fn precedence(kind: TokenType) -> u8 {
    match kind {
        TokenType::Star | TokenType::Slash => 1,
        TokenType::Plus | TokenType::Minus => 2,
        TokenType::Eq | TokenType::NotEq => 3,
        TokenType::And => 4,
        _ => 0,
    }
}

/// Count operands at paren-depth 0 over `tokens[left..=right]`, where each
/// balanced `(...)` subrange counts as a single operand. Reports
/// unmatched parentheses as a user error.
fn count_operands(tokens: &[Token], left: usize, right: usize) -> Result<usize, SdbError> {
    let mut n = 0;
    let mut level = 0i32;
    for tok in &tokens[left..=right] {
        match tok.kind {
            _ if is_operand(tok.kind) && level == 0 => n += 1,
            TokenType::LParen => level += 1,
            TokenType::RParen => {
                if level == 0 {
                    return Err(SdbError::UnmatchedCloseParen);
                }
                level -= 1;
                if level == 0 {
                    n += 1;
                }
            }
            _ => {}
        }
    }
    if level > 0 {
        return Err(SdbError::UnclosedOpenParen);
    }
    Ok(n)
}

/// Scan `tokens[left..=right]` for the main binary operator: the
/// highest-precedence-number (lowest-precedence) operator at paren-depth
/// 0, breaking ties by taking the rightmost candidate. This yields
/// left-associative evaluation among operators of equal precedence.
fn find_main_operator(tokens: &[Token], left: usize, right: usize) -> Option<usize> {
    let mut level = 0i32;
    let mut best: Option<(usize, u8)> = None;
    for (i, tok) in tokens.iter().enumerate().take(right + 1).skip(left) {
        match tok.kind {
            TokenType::LParen => level += 1,
            TokenType::RParen => level -= 1,
            kind if level == 0 && is_binary_operator(kind) => {
                let p = precedence(kind);
                let should_replace = match best {
                    None => true,
                    Some((_, prev_p)) => p >= prev_p,
                };
                if should_replace {
                    best = Some((i, p));
                }
            }
            _ => {}
        }
    }
    best.map(|(i, _)| i)
}

/// Evaluate `tokens[left..=right]` against `ctx`.
pub fn eval(tokens: &[Token], left: usize, right: usize, ctx: &mut dyn EvalContext) -> Result<u32, SdbError> {
    if left > right {
        return Err(SdbError::InvalidExpression);
    }
    let n_operand = count_operands(tokens, left, right)?;
    if n_operand == 0 {
        return Err(SdbError::NoOperand);
    }
    if n_operand == 1 {
        return eval_single_operand(tokens, left, right, ctx);
    }
    let op_ind = find_main_operator(tokens, left, right).ok_or(SdbError::InvalidExpression)?;
    let val1 = eval(tokens, left, op_ind - 1, ctx)?;
    let val2 = eval(tokens, op_ind + 1, right, ctx)?;
    Ok(match tokens[op_ind].kind {
        TokenType::Plus => val1.wrapping_add(val2),
        TokenType::Minus => val1.wrapping_sub(val2),
        TokenType::Star => val1.wrapping_mul(val2),
        TokenType::Slash => {
            if val2 == 0 {
                return Err(SdbError::DivisionByZero);
            }
            val1 / val2
        }
        TokenType::Eq => u32::from(val1 == val2),
        TokenType::NotEq => u32::from(val1 != val2),
        // Both sides are always evaluated above; `&&` does not short-circuit.
        TokenType::And => u32::from(val1 != 0 && val2 != 0),
        _ => unreachable!("find_main_operator only returns binary operators"),
    })
}

fn eval_single_operand(
    tokens: &[Token],
    left: usize,
    right: usize,
    ctx: &mut dyn EvalContext,
) -> Result<u32, SdbError> {
    if tokens[left].kind == TokenType::LParen && tokens[right].kind == TokenType::RParen {
        return eval(tokens, left + 1, right - 1, ctx);
    }
    if is_operand(tokens[left].kind) {
        debug_assert_eq!(left, right, "single operand must span exactly one token");
        return match tokens[left].kind {
            TokenType::Reg => {
                let name = &tokens[left].lexeme[1..]; // strip leading '$'
                ctx.resolve_name(name).ok_or_else(|| SdbError::UnknownRegister(name.to_string()))
            }
            TokenType::Dec => tokens[left]
                .lexeme
                .parse()
                .map_err(|_| SdbError::InvalidExpression),
            TokenType::Hex => u32::from_str_radix(&tokens[left].lexeme[2..], 16)
                .map_err(|_| SdbError::InvalidExpression),
            _ => unreachable!("is_operand only matches Reg/Dec/Hex"),
        };
    }
    match tokens[left].kind {
        TokenType::Pos => eval(tokens, left + 1, right, ctx),
        TokenType::Neg => eval(tokens, left + 1, right, ctx).map(|v| v.wrapping_neg()),
        TokenType::Deref => {
            let addr = eval(tokens, left + 1, right, ctx)?;
            Ok(ctx.read_word(addr))
        }
        _ => Err(SdbError::InvalidUnaryOperator(tokens[left].lexeme.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::super::token::{disambiguate, tokenize};
    use super::*;
    use std::collections::HashMap;

    struct MockMachine {
        regs: HashMap<&'static str, u32>,
        mem: HashMap<u32, u32>,
    }

    impl EvalContext for MockMachine {
        fn resolve_name(&self, name: &str) -> Option<u32> {
            self.regs.get(name).copied()
        }

        fn read_word(&mut self, addr: u32) -> u32 {
            *self.mem.get(&addr).unwrap_or(&0)
        }
    }

    fn eval_str(input: &str, machine: &mut MockMachine) -> Result<u32, SdbError> {
        let mut toks = tokenize(input).map_err(|_| SdbError::InvalidExpression)?;
        disambiguate(&mut toks);
        if toks.is_empty() {
            return Err(SdbError::NoOperand);
        }
        eval(&toks, 0, toks.len() - 1, machine)
    }

    fn empty_machine() -> MockMachine {
        MockMachine {
            regs: HashMap::new(),
            mem: HashMap::new(),
        }
    }

    #[test]
    fn scenario_1_precedence() {
        assert_eq!(eval_str("1 + 2 * 3", &mut empty_machine()).unwrap(), 7);
    }

    #[test]
    fn scenario_2_parens() {
        assert_eq!(eval_str("(1 + 2) * 3", &mut empty_machine()).unwrap(), 9);
    }

    #[test]
    fn scenario_3_hex() {
        assert_eq!(eval_str("0x10 - 0x1", &mut empty_machine()).unwrap(), 15);
    }

    #[test]
    fn scenario_4_eq_and_no_short_circuit() {
        assert_eq!(eval_str("1 == 1 && 2 != 3", &mut empty_machine()).unwrap(), 1);
    }

    #[test]
    fn scenario_5_deref_and_register() {
        let mut m = empty_machine();
        m.regs.insert("a0", 0x1234);
        m.mem.insert(0, 0xaabb_ccdd);
        assert_eq!(eval_str("*(0 + 0)", &mut m).unwrap(), 0xaabb_ccdd);
        assert_eq!(eval_str("$a0 + 1", &mut m).unwrap(), 0x1235);
    }

    #[test]
    fn scenario_6_unary() {
        assert_eq!(eval_str("-3 + 4", &mut empty_machine()).unwrap(), 1);
        assert_eq!(eval_str("- -3", &mut empty_machine()).unwrap(), 3);
    }

    #[test]
    fn scenario_7_unclosed_paren() {
        assert_eq!(
            eval_str("(1 + 2", &mut empty_machine()),
            Err(SdbError::UnclosedOpenParen)
        );
    }

    #[test]
    fn and_evaluates_both_sides_even_when_left_is_false() {
        // If `&&` short-circuited, the deref on the right would never run
        // and this would return 0 without touching `mem`.
        let mut m = empty_machine();
        m.mem.insert(4, 7);
        assert_eq!(eval_str("0 && *4", &mut m).unwrap(), 0);
    }

    #[test]
    fn division_by_zero_is_a_user_error_not_a_panic() {
        assert_eq!(
            eval_str("1 / 0", &mut empty_machine()),
            Err(SdbError::DivisionByZero)
        );
    }
}
