use super::{operand, splice};
use crate::lexer::{matching_close, next_significant, render, tokenize, Token, TokenKind};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use pgbridge_core::Value;
use tracing::debug;

/// Longest vector literal the backend compiles inside ORDER BY. Longer
/// vectors stay bound parameters.
pub const MAX_VECTOR_LITERAL_LEN: usize = 3000;
const MAX_VECTOR_DIMENSIONS: usize = 65_536;
const VECTOR_FUNCTIONS: &[&str] = &["VECTOR_COSINE", "VECTOR_DOT_PRODUCT", "VECTOR_L2"];

/// pgvector distance operators become backend vector functions:
/// `<->` is L2 distance, `<=>` cosine distance, `<#>` negative inner product.
pub(super) fn rewrite(mut tokens: Vec<Token>) -> Vec<Token> {
    let mut i = 0;
    while i < tokens.len() {
        let (open, close) = match tokens[i].text.as_str() {
            "<->" if tokens[i].kind == TokenKind::Operator => ("VECTOR_L2(", ")"),
            "<=>" if tokens[i].kind == TokenKind::Operator => ("(1 - VECTOR_COSINE(", "))"),
            "<#>" if tokens[i].kind == TokenKind::Operator => ("(0 - VECTOR_DOT_PRODUCT(", "))"),
            _ => {
                i += 1;
                continue;
            }
        };
        let (Some((ls, le)), Some((rs, re))) = (operand::before(&tokens, i), operand::after(&tokens, i))
        else {
            i += 1;
            continue;
        };
        let mut replacement = tokenize(open);
        replacement.extend(as_vector(&tokens[ls..le]));
        replacement.extend(tokenize(", "));
        replacement.extend(as_vector(&tokens[rs..re]));
        replacement.extend(tokenize(close));
        let replacement = operand::detached(&tokens, ls, replacement);
        i = splice(&mut tokens, ls, re, replacement);
    }
    tokens
}

/// Literal and parameter operands carry no type on the backend side and
/// must be converted explicitly.
fn as_vector(operand: &[Token]) -> Vec<Token> {
    match operand {
        [single] if matches!(single.kind, TokenKind::String | TokenKind::Placeholder) => {
            let mut wrapped = tokenize("TO_VECTOR(");
            wrapped.push(single.clone());
            wrapped.extend(tokenize(", FLOAT)"));
            wrapped
        }
        other => other.to_vec(),
    }
}

/// Statement text and parameters after ORDER BY vectors were inlined.
#[derive(Debug, Clone, PartialEq)]
pub struct InlinedStatement {
    pub sql: String,
    pub params: Vec<Value>,
}

/// The backend only uses its vector index when the probe vector in
/// `ORDER BY VECTOR_*(col, TO_VECTOR(?, FLOAT))` is a literal. Bound vector
/// parameters in that position are spliced into the text and dropped from
/// `params`; `base64:` literals are expanded the same way. Vectors whose
/// literal would exceed [`MAX_VECTOR_LITERAL_LEN`] stay parameters, in
/// text form.
pub fn inline_order_by_vectors(sql: &str, mut params: Vec<Value>) -> InlinedStatement {
    let upper = sql.to_ascii_uppercase();
    if !upper.contains("ORDER") || !upper.contains("TO_VECTOR") {
        return InlinedStatement {
            sql: sql.to_string(),
            params,
        };
    }
    let mut tokens = tokenize(sql);
    let Some(order_by) = find_order_by(&tokens) else {
        return InlinedStatement {
            sql: sql.to_string(),
            params,
        };
    };

    let mut consumed = Vec::new();
    let mut i = order_by;
    while i < tokens.len() {
        let Some((open, mut close)) = vector_call_args(&tokens, i) else {
            i += 1;
            continue;
        };
        let mut j = open + 1;
        while j < close {
            let Some(probe) = to_vector_operand(&tokens, j) else {
                j += 1;
                continue;
            };
            let replacement = match &tokens[probe.operand].kind {
                TokenKind::Placeholder => {
                    let index = placeholder_index(&tokens, probe.operand);
                    let Some(literal) = params.get(index).and_then(vector_literal) else {
                        j += 1;
                        continue;
                    };
                    if literal.len() > MAX_VECTOR_LITERAL_LEN {
                        debug!(len = literal.len(), "vector too long to inline, kept as parameter");
                        if let Some(param) = params.get_mut(index) {
                            if matches!(param, Value::Text(_)) {
                                *param = Value::Text(literal);
                            }
                        }
                        j = probe.end;
                        continue;
                    }
                    consumed.push(index);
                    literal
                }
                _ => {
                    let text = tokens[probe.operand].text.trim_matches('\'');
                    let Some(literal) = text.strip_prefix("base64:").and_then(decode_base64_vector)
                    else {
                        j = probe.end;
                        continue;
                    };
                    if literal.len() > MAX_VECTOR_LITERAL_LEN {
                        j = probe.end;
                        continue;
                    }
                    literal
                }
            };
            let call = tokenize(&format!("TO_VECTOR('{replacement}', {})", probe.element_type));
            let removed = probe.end - j;
            let next = splice(&mut tokens, j, probe.end, call);
            close = close + (next - j) - removed;
            j = next;
        }
        i = close + 1;
    }

    if !consumed.is_empty() {
        debug!(inlined = consumed.len(), "vector parameters inlined into ORDER BY");
        let mut index = 0;
        params.retain(|_| {
            let keep = !consumed.contains(&index);
            index += 1;
            keep
        });
    }
    InlinedStatement {
        sql: render(&tokens),
        params,
    }
}

fn find_order_by(tokens: &[Token]) -> Option<usize> {
    (0..tokens.len()).find(|&i| {
        tokens[i].is_word("ORDER")
            && next_significant(tokens, i).is_some_and(|next| tokens[next].is_word("BY"))
    })
}

/// Open and close parenthesis of a `VECTOR_*(...)` call starting at `idx`.
fn vector_call_args(tokens: &[Token], idx: usize) -> Option<(usize, usize)> {
    let token = &tokens[idx];
    if token.kind != TokenKind::Word || !VECTOR_FUNCTIONS.iter().any(|f| token.text.eq_ignore_ascii_case(f)) {
        return None;
    }
    let open = next_significant(tokens, idx)?;
    if !tokens[open].is_punct('(') {
        return None;
    }
    Some((open, matching_close(tokens, open)?))
}

struct ToVectorCall {
    operand: usize,
    element_type: String,
    /// One past the closing parenthesis.
    end: usize,
}

/// Matches `TO_VECTOR(operand [, TYPE])` at `idx` where the operand is a
/// placeholder or a string literal.
fn to_vector_operand(tokens: &[Token], idx: usize) -> Option<ToVectorCall> {
    if !tokens[idx].is_word("TO_VECTOR") {
        return None;
    }
    let open = next_significant(tokens, idx)?;
    if !tokens[open].is_punct('(') {
        return None;
    }
    let operand = next_significant(tokens, open)?;
    if !matches!(tokens[operand].kind, TokenKind::Placeholder | TokenKind::String) {
        return None;
    }
    let mut next = next_significant(tokens, operand)?;
    let mut element_type = "FLOAT".to_string();
    if tokens[next].is_punct(',') {
        let ty = next_significant(tokens, next)?;
        if tokens[ty].kind != TokenKind::Word {
            return None;
        }
        element_type = tokens[ty].text.to_ascii_uppercase();
        next = next_significant(tokens, ty)?;
    }
    tokens[next].is_punct(')').then_some(ToVectorCall {
        operand,
        element_type,
        end: next + 1,
    })
}

fn placeholder_index(tokens: &[Token], idx: usize) -> usize {
    tokens[..idx]
        .iter()
        .filter(|t| t.kind == TokenKind::Placeholder)
        .count()
}

/// Text the backend accepts inside `TO_VECTOR('...')`, or `None` when the
/// value is not a vector.
fn vector_literal(value: &Value) -> Option<String> {
    let literal = match value {
        Value::Vector(items) => join_floats(items.iter().copied()),
        Value::Array(items) => {
            let floats = items
                .iter()
                .map(|item| item.as_f64().map(|f| f as f32))
                .collect::<Option<Vec<_>>>()?;
            join_floats(floats)
        }
        Value::Text(text) => {
            let text = text.trim();
            match text.strip_prefix("base64:") {
                Some(encoded) => decode_base64_vector(encoded)?,
                None if text.starts_with('[') && text.ends_with(']') => text.to_string(),
                None if text.contains(',') => text.to_string(),
                None => return None,
            }
        }
        _ => return None,
    };
    is_numeric_list(&literal).then_some(literal)
}

/// `base64:` payloads are little-endian float32 arrays.
fn decode_base64_vector(encoded: &str) -> Option<String> {
    let bytes = STANDARD.decode(encoded).ok()?;
    if bytes.is_empty() || bytes.len() % 4 != 0 || bytes.len() / 4 > MAX_VECTOR_DIMENSIONS {
        return None;
    }
    let floats = bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]));
    Some(join_floats(floats))
}

fn join_floats(floats: impl IntoIterator<Item = f32>) -> String {
    floats
        .into_iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Only digits, signs, exponents, separators and brackets may be spliced
/// into statement text.
fn is_numeric_list(literal: &str) -> bool {
    !literal.is_empty()
        && literal.chars().all(|c| {
            c.is_ascii_digit() || matches!(c, '.' | ',' | '-' | '+' | 'e' | 'E' | '[' | ']' | ' ')
        })
}
