use crate::lexer::{leading_words, tokenize, Token};

/// Rewrites PostgreSQL transaction verbs into the backend's spelling. Only
/// the leading keywords are touched; savepoint names get the client's
/// original spelling back.
pub(super) fn rewrite(tokens: Vec<Token>) -> Vec<Token> {
    let words = leading_words(&tokens, 5);
    let word = |n: usize| words.get(n).map(|(_, w)| w.as_str());
    let after = |n: usize| words.get(n).map(|(i, _)| i + 1);
    let is_noise = |n: usize| matches!(word(n), Some("WORK") | Some("TRANSACTION"));

    let Some((first_idx, _)) = words.first() else {
        return tokens;
    };
    let (head, name_at, rest_from) = match word(0) {
        Some("BEGIN") => {
            let skip = if is_noise(1) { 1 } else { 0 };
            ("START TRANSACTION", None, after(skip))
        }
        Some("END") => {
            let skip = if is_noise(1) { 1 } else { 0 };
            ("COMMIT", None, after(skip))
        }
        Some("COMMIT") if is_noise(1) => ("COMMIT", None, after(1)),
        Some("ABORT") | Some("ROLLBACK") => {
            let base = if is_noise(1) { 1 } else { 0 };
            if word(base + 1) == Some("TO") {
                let name = if word(base + 2) == Some("SAVEPOINT") { base + 3 } else { base + 2 };
                ("ROLLBACK TO SAVEPOINT ", Some(name), after(name))
            } else if base == 1 || word(0) == Some("ABORT") {
                ("ROLLBACK", None, after(base))
            } else {
                return tokens;
            }
        }
        Some("RELEASE") => {
            let name = if word(1) == Some("SAVEPOINT") { 2 } else { 1 };
            ("RELEASE SAVEPOINT ", Some(name), after(name))
        }
        Some("SAVEPOINT") => ("SAVEPOINT ", Some(1), after(1)),
        _ => return tokens,
    };
    let Some(rest_from) = rest_from else {
        return tokens;
    };

    let mut out: Vec<Token> = tokens[..*first_idx].to_vec();
    out.extend(tokenize(head));
    if let Some(n) = name_at {
        let Some((idx, _)) = words.get(n) else {
            return tokens;
        };
        let original = &tokens[*idx];
        out.push(Token::new(original.kind, original.original_text()));
    }
    out.extend(tokens[rest_from..].iter().cloned());
    out
}
