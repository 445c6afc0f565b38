use crate::lexer::{Token, TokenKind};

/// Rewrites `$n` to `?` and returns the client parameter number behind each
/// marker, so `$2 ... $1` binds as `[2, 1]`.
pub(super) fn number(mut tokens: Vec<Token>) -> (Vec<Token>, Vec<usize>) {
    let mut order = Vec::new();
    for token in tokens.iter_mut().filter(|t| t.kind == TokenKind::Param) {
        let Ok(n) = token.text[1..].parse::<usize>() else {
            continue;
        };
        order.push(n);
        *token = Token::new(TokenKind::Placeholder, "?");
    }
    (tokens, order)
}
