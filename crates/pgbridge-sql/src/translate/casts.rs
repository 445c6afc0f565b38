use super::{operand, splice};
use crate::lexer::{matching_close, next_significant, tokenize, Token, TokenKind};

enum CastTarget {
    Type(String),
    Vector,
}

/// `expr::type` becomes `CAST(expr AS T)`, and `expr::vector` becomes
/// `TO_VECTOR(expr, FLOAT)`. Types without a backend equivalent keep the
/// `::` form. Chains nest because each rewrite yields a call-shaped operand.
pub(super) fn rewrite(mut tokens: Vec<Token>) -> Vec<Token> {
    let mut i = 0;
    while i < tokens.len() {
        if !tokens[i].is_operator("::") {
            i += 1;
            continue;
        }
        let (Some((start, end)), Some((target, type_end))) =
            (operand::before(&tokens, i), parse_target(&tokens, i))
        else {
            i += 1;
            continue;
        };
        let operand: Vec<Token> = tokens[start..end].to_vec();
        let mut replacement = Vec::new();
        match target {
            CastTarget::Type(ty) => {
                replacement.extend(tokenize("CAST("));
                replacement.extend(operand);
                replacement.extend(tokenize(&format!(" AS {ty})")));
            }
            CastTarget::Vector => {
                replacement.extend(tokenize("TO_VECTOR("));
                replacement.extend(operand);
                replacement.extend(tokenize(", FLOAT)"));
            }
        }
        let replacement = operand::detached(&tokens, start, replacement);
        i = splice(&mut tokens, start, type_end, replacement);
    }
    tokens
}

fn word_at(tokens: &[Token], idx: Option<usize>) -> Option<(usize, String)> {
    let idx = idx?;
    let token = tokens.get(idx)?;
    (token.kind == TokenKind::Word).then(|| (idx, token.text.to_ascii_lowercase()))
}

/// Reads the type name after `::` and maps it; returns the index just past
/// the consumed type tokens.
fn parse_target(tokens: &[Token], colon: usize) -> Option<(CastTarget, usize)> {
    let (first, word) = word_at(tokens, next_significant(tokens, colon))?;
    let mut base = word;
    let mut end = first + 1;

    let follow = |end: usize, expected: &str| -> Option<usize> {
        let (idx, w) = word_at(tokens, next_significant(tokens, end - 1))?;
        (w == expected).then_some(idx + 1)
    };
    match base.as_str() {
        "double" => {
            if let Some(next) = follow(end, "precision") {
                base = "double precision".into();
                end = next;
            }
        }
        "character" => {
            if let Some(next) = follow(end, "varying") {
                base = "character varying".into();
                end = next;
            }
        }
        _ => {}
    }

    let mut modifiers = Vec::new();
    if let Some(open) = next_significant(tokens, end - 1).filter(|&i| tokens[i].is_punct('(')) {
        let close = matching_close(tokens, open)?;
        for token in &tokens[open + 1..close] {
            match token.kind {
                TokenKind::Number => modifiers.push(token.text.clone()),
                TokenKind::Word => modifiers.push(token.text.to_ascii_uppercase()),
                _ => {}
            }
        }
        end = close + 1;
    }

    if matches!(base.as_str(), "timestamp" | "time") {
        if let Some(with) = follow(end, "with").or_else(|| follow(end, "without")) {
            let zone = follow(with, "time").and_then(|t| follow(t, "zone"))?;
            end = zone;
        }
    }

    if next_significant(tokens, end - 1).is_some_and(|i| tokens[i].is_punct('[')) {
        return None;
    }

    let sized = |name: &str| match modifiers.as_slice() {
        [] => name.to_string(),
        mods => format!("{name}({})", mods.join(",")),
    };
    let target = match base.as_str() {
        "int" | "int4" | "integer" => CastTarget::Type("INTEGER".into()),
        "int8" | "bigint" => CastTarget::Type("BIGINT".into()),
        "int2" | "smallint" => CastTarget::Type("SMALLINT".into()),
        "text" | "json" | "jsonb" => CastTarget::Type("VARCHAR".into()),
        "varchar" | "character varying" => CastTarget::Type(sized("VARCHAR")),
        "char" | "character" | "bpchar" => CastTarget::Type(sized("CHAR")),
        "float" | "float8" | "double precision" | "float4" | "real" => {
            CastTarget::Type("DOUBLE".into())
        }
        "numeric" | "decimal" => CastTarget::Type(sized("NUMERIC")),
        "bool" | "boolean" => CastTarget::Type("BIT".into()),
        "date" => CastTarget::Type("DATE".into()),
        "time" | "timetz" => CastTarget::Type("TIME".into()),
        "timestamp" | "timestamptz" => CastTarget::Type("TIMESTAMP".into()),
        "bytea" => CastTarget::Type("VARBINARY".into()),
        "uuid" => CastTarget::Type("VARCHAR(36)".into()),
        "vector" => CastTarget::Vector,
        _ => return None,
    };
    Some((target, end))
}
