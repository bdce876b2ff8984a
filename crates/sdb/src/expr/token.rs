//! Tokenizer: rules are tried in declaration order, first match at the
//! current position wins — this is not "longest match wins", and the
//! order is load-bearing (hex literals must be tried before decimal ones).

/// Token kinds. `Pos`/`Neg`/`Deref` never come out of [`tokenize`] directly
/// — they are produced by [`disambiguate`] rewriting `Plus`/`Minus`/`Star`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenType {
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
    Hex,
    Dec,
    Reg,
    Eq,
    NotEq,
    And,
    Pos,
    Neg,
    Deref,
}

/// A single token: its kind and the exact source substring it matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenType,
    pub lexeme: String,
}

/// True for token kinds that can precede a *binary* operator — i.e. the
/// token completes an operand. Used by the unary/binary disambiguation
/// pass: `+ - *` following one of these is binary, otherwise unary.
fn ends_an_operand(kind: TokenType) -> bool {
    matches!(kind, TokenType::RParen | TokenType::Dec | TokenType::Hex | TokenType::Reg)
}

/// True for token kinds that are themselves operands (as opposed to
/// parentheses or operators).
pub fn is_operand(kind: TokenType) -> bool {
    matches!(kind, TokenType::Dec | TokenType::Hex | TokenType::Reg)
}

fn match_ws(s: &str) -> Option<usize> {
    let n = s.bytes().take_while(|&b| b == b' ').count();
    (n > 0).then_some(n)
}

fn match_hex(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    if bytes.len() < 3 || bytes[0] != b'0' || (bytes[1] != b'x' && bytes[1] != b'X') {
        return None;
    }
    let digits = s[2..].bytes().take_while(u8::is_ascii_hexdigit).count();
    (digits > 0).then_some(2 + digits)
}

fn match_dec(s: &str) -> Option<usize> {
    let n = s.bytes().take_while(u8::is_ascii_digit).count();
    (n > 0).then_some(n)
}

fn match_reg(s: &str) -> Option<usize> {
    let rest = s.strip_prefix('$')?;
    let n = rest
        .bytes()
        .take_while(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
        .count();
    (n > 0).then_some(1 + n)
}

/// Try each rule in the reference tokenizer's exact declaration order;
/// the first one whose pattern matches at the start of `s` wins, even if
/// a later rule would have matched a longer prefix.
fn match_one(s: &str) -> Option<(usize, Option<TokenType>)> {
    if let Some(n) = match_ws(s) {
        return Some((n, None));
    }
    for (lit, kind) in [
        ("+", TokenType::Plus),
        ("-", TokenType::Minus),
        ("*", TokenType::Star),
        ("/", TokenType::Slash),
        ("(", TokenType::LParen),
        (")", TokenType::RParen),
    ] {
        if s.starts_with(lit) {
            return Some((lit.len(), Some(kind)));
        }
    }
    if let Some(n) = match_hex(s) {
        return Some((n, Some(TokenType::Hex)));
    }
    if let Some(n) = match_dec(s) {
        return Some((n, Some(TokenType::Dec)));
    }
    if let Some(n) = match_reg(s) {
        return Some((n, Some(TokenType::Reg)));
    }
    for (lit, kind) in [
        ("==", TokenType::Eq),
        ("!=", TokenType::NotEq),
        ("&&", TokenType::And),
    ] {
        if s.starts_with(lit) {
            return Some((lit.len(), Some(kind)));
        }
    }
    None
}

/// Tokenize `input`, or return the byte offset of the first unmatched
/// character as `Err`.
pub fn tokenize(input: &str) -> Result<Vec<Token>, usize> {
    let mut tokens = Vec::new();
    let mut pos = 0;
    while pos < input.len() {
        let rest = &input[pos..];
        match match_one(rest) {
            Some((len, Some(kind))) => {
                tokens.push(Token {
                    kind,
                    lexeme: rest[..len].to_string(),
                });
                pos += len;
            }
            Some((len, None)) => pos += len,
            None => return Err(pos),
        }
    }
    Ok(tokens)
}

/// Rewrite `+ - *` into `Pos Neg Deref` wherever they occur in unary
/// position: at the start of the stream, or immediately after a token
/// that cannot end an operand.
pub fn disambiguate(tokens: &mut [Token]) {
    for i in 0..tokens.len() {
        let unary_position = i == 0 || !ends_an_operand(tokens[i - 1].kind);
        if !unary_position {
            continue;
        }
        tokens[i].kind = match tokens[i].kind {
            TokenType::Star => TokenType::Deref,
            TokenType::Plus => TokenType::Pos,
            TokenType::Minus => TokenType::Neg,
            other => other,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenType> {
        let mut toks = tokenize(input).unwrap();
        disambiguate(&mut toks);
        toks.into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn hex_is_tried_before_decimal() {
        let toks = tokenize("0x10").unwrap();
        assert_eq!(toks.len(), 1);
        assert_eq!(toks[0].kind, TokenType::Hex);
        assert_eq!(toks[0].lexeme, "0x10");
    }

    #[test]
    fn leading_minus_is_unary() {
        assert_eq!(kinds("-3 + 4"), [TokenType::Neg, TokenType::Dec, TokenType::Plus, TokenType::Dec]);
    }

    #[test]
    fn minus_after_number_is_binary() {
        assert_eq!(kinds("0x10 - 0x1"), [TokenType::Hex, TokenType::Minus, TokenType::Hex]);
    }

    #[test]
    fn star_after_paren_is_binary_deref_otherwise() {
        assert_eq!(
            kinds("*(0 + 0)"),
            [
                TokenType::Deref,
                TokenType::LParen,
                TokenType::Dec,
                TokenType::Plus,
                TokenType::Dec,
                TokenType::RParen
            ]
        );
    }

    #[test]
    fn unmatched_character_reports_position() {
        assert_eq!(tokenize("1 @ 2"), Err(2));
    }

    #[test]
    fn register_token_keeps_leading_dollar() {
        let toks = tokenize("$a0 + 1").unwrap();
        assert_eq!(toks[0].lexeme, "$a0");
    }
}
