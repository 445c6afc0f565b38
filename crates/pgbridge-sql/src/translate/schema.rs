use crate::lexer::{next_significant, prev_significant, quote_literal, Token, TokenKind};
use pgbridge_core::SchemaMapping;

/// Columns whose values are schema names in metadata views.
pub const SCHEMA_COLUMNS: &[&str] = &[
    "table_schema",
    "schema_name",
    "nspname",
    "constraint_schema",
    "unique_constraint_schema",
    "referenced_table_schema",
];

fn is_schema_column(token: &Token) -> bool {
    token
        .ident_value()
        .is_some_and(|v| SCHEMA_COLUMNS.iter().any(|c| c.eq_ignore_ascii_case(&v)))
}

fn is_comparison(token: &Token) -> bool {
    token.kind == TokenKind::Operator && matches!(token.text.as_str(), "=" | "<>" | "!=")
}

/// Maps client schema references to the backend schema: qualified names
/// (`public.t`) and literal schema names compared against schema columns.
pub(super) fn rewrite(mut tokens: Vec<Token>, mapping: &SchemaMapping) -> Vec<Token> {
    for i in 0..tokens.len() {
        let replacement = match tokens[i].kind {
            TokenKind::Word | TokenKind::QuotedIdent => qualifier(&tokens, i, mapping),
            TokenKind::String => literal(&tokens, i, mapping),
            _ => None,
        };
        if let Some(token) = replacement {
            tokens[i] = token;
        }
    }
    tokens
}

fn qualifier(tokens: &[Token], i: usize, mapping: &SchemaMapping) -> Option<Token> {
    let token = &tokens[i];
    if !tokens.get(i + 1)?.is_punct('.') {
        return None;
    }
    if i > 0 && tokens[i - 1].is_punct('.') {
        return None;
    }
    let backend = mapping.to_backend(&token.ident_value()?)?;
    Some(match token.kind {
        TokenKind::QuotedIdent => Token::new(TokenKind::QuotedIdent, format!("\"{backend}\"")),
        _ => Token::new(TokenKind::Word, backend),
    })
}

fn literal(tokens: &[Token], i: usize, mapping: &SchemaMapping) -> Option<Token> {
    let backend = mapping.to_backend(&tokens[i].string_value()?)?;
    let compared = compared_column(tokens, i) || in_list_column(tokens, i);
    compared.then(|| Token::new(TokenKind::String, quote_literal(backend)))
}

/// `col = 'x'` or `'x' = col` with `col` a schema column.
fn compared_column(tokens: &[Token], i: usize) -> bool {
    let left = prev_significant(tokens, i)
        .filter(|&op| is_comparison(&tokens[op]))
        .and_then(|op| prev_significant(tokens, op))
        .is_some_and(|col| is_schema_column(&tokens[col]));
    if left {
        return true;
    }
    let Some(op) = next_significant(tokens, i).filter(|&op| is_comparison(&tokens[op])) else {
        return false;
    };
    let Some(mut col) = next_significant(tokens, op) else {
        return false;
    };
    while col + 2 < tokens.len() && tokens[col + 1].is_punct('.') {
        col += 2;
    }
    is_schema_column(&tokens[col])
}

/// `col IN ('a', 'x')` / `col NOT IN (...)` with `col` a schema column.
fn in_list_column(tokens: &[Token], i: usize) -> bool {
    let mut j = i;
    let open = loop {
        let Some(prev) = prev_significant(tokens, j) else {
            return false;
        };
        let token = &tokens[prev];
        if token.is_punct('(') {
            break prev;
        }
        if !(token.is_punct(',') || token.kind == TokenKind::String) {
            return false;
        }
        j = prev;
    };
    let Some(kw) = prev_significant(tokens, open).filter(|&k| tokens[k].is_word("IN")) else {
        return false;
    };
    let mut col = prev_significant(tokens, kw);
    if let Some(not) = col.filter(|&n| tokens[n].is_word("NOT")) {
        col = prev_significant(tokens, not);
    }
    col.is_some_and(|c| is_schema_column(&tokens[c]))
}
