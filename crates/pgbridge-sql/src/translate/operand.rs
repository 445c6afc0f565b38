use crate::lexer::{matching_close, matching_open, next_significant, prev_significant, Token, TokenKind};

/// Keywords that can sit right before a parenthesised operand without
/// being a function name.
const NON_CALLEES: &[&str] = &[
    "AND", "ANY", "ALL", "AS", "BETWEEN", "BY", "CASE", "DISTINCT", "ELSE", "EXISTS", "FROM",
    "HAVING", "IN", "IS", "JOIN", "LIKE", "LIMIT", "NOT", "OFFSET", "ON", "OR", "RETURNING",
    "SELECT", "SET", "SOME", "THEN", "UNION", "USING", "VALUES", "WHEN", "WHERE", "WITH",
];

fn is_name(token: &Token) -> bool {
    matches!(token.kind, TokenKind::Word | TokenKind::QuotedIdent)
}

fn is_callee(token: &Token) -> bool {
    match token.kind {
        TokenKind::QuotedIdent => true,
        TokenKind::Word => !NON_CALLEES.iter().any(|kw| token.text.eq_ignore_ascii_case(kw)),
        _ => false,
    }
}

/// Token range `[start, end)` of the operand ending right before the
/// operator at `op`: a literal, parameter, (qualified) name, parenthesised
/// group or function call.
pub(super) fn before(tokens: &[Token], op: usize) -> Option<(usize, usize)> {
    let last = prev_significant(tokens, op)?;
    let token = &tokens[last];
    let mut start = match token.kind {
        TokenKind::Punct if token.is_punct(')') || token.is_punct(']') => {
            let open = matching_open(tokens, last)?;
            match open.checked_sub(1) {
                Some(prev) if is_callee(&tokens[prev]) => prev,
                _ => open,
            }
        }
        TokenKind::String
        | TokenKind::Number
        | TokenKind::Param
        | TokenKind::Placeholder
        | TokenKind::Word
        | TokenKind::QuotedIdent => last,
        _ => return None,
    };
    while start >= 2 && tokens[start - 1].is_punct('.') && is_name(&tokens[start - 2]) {
        start -= 2;
    }
    Some((start, last + 1))
}

/// Prefixes `replacement` with a space when it would otherwise run into
/// the word right before `start`, as in `SELECT(1)::int`.
pub(super) fn detached(tokens: &[Token], start: usize, mut replacement: Vec<Token>) -> Vec<Token> {
    let glued = start
        .checked_sub(1)
        .and_then(|prev| tokens.get(prev))
        .is_some_and(|prev| is_name(prev) || prev.kind == TokenKind::Number);
    if glued {
        replacement.insert(0, Token::new(TokenKind::Whitespace, " "));
    }
    replacement
}

/// Token range `[start, end)` of the operand following the operator at `op`.
pub(super) fn after(tokens: &[Token], op: usize) -> Option<(usize, usize)> {
    let first = next_significant(tokens, op)?;
    let token = &tokens[first];
    let end = match token.kind {
        TokenKind::Punct if token.is_punct('(') => matching_close(tokens, first)? + 1,
        TokenKind::Word | TokenKind::QuotedIdent => {
            let mut end = first + 1;
            while end + 1 < tokens.len() && tokens[end].is_punct('.') && is_name(&tokens[end + 1]) {
                end += 2;
            }
            if end < tokens.len() && tokens[end].is_punct('(') {
                end = matching_close(tokens, end)? + 1;
            }
            end
        }
        TokenKind::Operator if token.text == "-" => {
            let number = first + 1;
            if tokens.get(number)?.kind != TokenKind::Number {
                return None;
            }
            number + 1
        }
        TokenKind::String | TokenKind::Number | TokenKind::Param | TokenKind::Placeholder => first + 1,
        _ => return None,
    };
    Some((first, end))
}
