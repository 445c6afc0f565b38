use crate::lexer::{render, tokenize, Token};

/// Splits a simple-query string on `;` outside literals, quoted identifiers
/// and comments. Statements consisting only of whitespace or comments are
/// dropped.
pub fn split_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current: Vec<Token> = Vec::new();
    for token in tokenize(sql) {
        if token.is_punct(';') {
            push_statement(&mut statements, &mut current);
        } else {
            current.push(token);
        }
    }
    push_statement(&mut statements, &mut current);
    statements
}

fn push_statement(statements: &mut Vec<String>, current: &mut Vec<Token>) {
    if current.iter().any(|t| !t.is_trivia()) {
        statements.push(render(current).trim().to_string());
    }
    current.clear();
}

/// Highest `$n` referenced in `sql`.
pub fn max_param_index(sql: &str) -> usize {
    tokenize(sql)
        .iter()
        .filter(|t| t.kind == crate::lexer::TokenKind::Param)
        .filter_map(|t| t.text[1..].parse::<usize>().ok())
        .max()
        .unwrap_or(0)
}
