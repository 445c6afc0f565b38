//! Lossless SQL lexer. Concatenating the text of every token reproduces the
//! input exactly, so rewrite passes can splice tokens without disturbing
//! anything they do not understand.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Whitespace,
    Comment,
    /// Single-quoted (including `E''`) or dollar-quoted literal.
    String,
    QuotedIdent,
    Word,
    Number,
    /// `$n` positional parameter.
    Param,
    /// `?` positional marker.
    Placeholder,
    Operator,
    Punct,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    /// Spelling before identifier case folding, when folding changed it.
    pub original: Option<String>,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
            original: None,
        }
    }

    pub fn is_trivia(&self) -> bool {
        matches!(self.kind, TokenKind::Whitespace | TokenKind::Comment)
    }

    pub fn is_word(&self, word: &str) -> bool {
        self.kind == TokenKind::Word && self.text.eq_ignore_ascii_case(word)
    }

    pub fn is_punct(&self, punct: char) -> bool {
        self.kind == TokenKind::Punct && self.text.len() == 1 && self.text.starts_with(punct)
    }

    pub fn is_operator(&self, op: &str) -> bool {
        self.kind == TokenKind::Operator && self.text == op
    }

    pub fn original_text(&self) -> &str {
        self.original.as_deref().unwrap_or(&self.text)
    }

    /// Identifier value with quotes removed; `None` for non-identifiers.
    pub fn ident_value(&self) -> Option<String> {
        match self.kind {
            TokenKind::Word => Some(self.text.clone()),
            TokenKind::QuotedIdent => Some(unquote(&self.text, '"')),
            _ => None,
        }
    }

    /// Content of a single-quoted literal; `None` for anything else.
    pub fn string_value(&self) -> Option<String> {
        if self.kind != TokenKind::String || !self.text.ends_with('\'') {
            return None;
        }
        let body = self
            .text
            .strip_prefix(|c: char| c == 'E' || c == 'e')
            .unwrap_or(&self.text);
        Some(unquote(body, '\''))
    }
}

fn unquote(text: &str, quote: char) -> String {
    let inner = text
        .strip_prefix(quote)
        .and_then(|s| s.strip_suffix(quote))
        .unwrap_or(text);
    let doubled: String = [quote, quote].iter().collect();
    inner.replace(&doubled, &quote.to_string())
}

/// Quotes `value` as a single-quoted SQL literal.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

const THREE_CHAR_OPS: &[&str] = &["<->", "<=>", "<#>", "->>", "#>>"];
const TWO_CHAR_OPS: &[&str] = &[
    "::", "<=", ">=", "<>", "!=", "||", "->", "#>", "~~", "!~", "@>", "<@", "&&", "<<", ">>",
];
const OPERATOR_CHARS: &str = "+-*/<>=~!@#%^&|`:";

pub fn tokenize(sql: &str) -> Vec<Token> {
    let chars: Vec<char> = sql.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        let (kind, end) = if c.is_whitespace() {
            (TokenKind::Whitespace, scan_while(&chars, i, char::is_whitespace))
        } else if c == '-' && next == Some('-') {
            (TokenKind::Comment, scan_while(&chars, i, |c| c != '\n'))
        } else if c == '/' && next == Some('*') {
            (TokenKind::Comment, scan_block_comment(&chars, i))
        } else if (c == 'E' || c == 'e') && next == Some('\'') {
            (TokenKind::String, scan_quoted(&chars, i + 1, '\'', true))
        } else if c == '\'' {
            (TokenKind::String, scan_quoted(&chars, i, '\'', false))
        } else if c == '"' {
            (TokenKind::QuotedIdent, scan_quoted(&chars, i, '"', false))
        } else if c == '$' && next.is_some_and(|n| n.is_ascii_digit()) {
            (TokenKind::Param, scan_while(&chars, i + 1, |c| c.is_ascii_digit()))
        } else if c == '$' {
            match scan_dollar_quoted(&chars, i) {
                Some(end) => (TokenKind::String, end),
                None => (TokenKind::Operator, i + 1),
            }
        } else if c == '?' {
            (TokenKind::Placeholder, i + 1)
        } else if c.is_ascii_digit() || (c == '.' && next.is_some_and(|n| n.is_ascii_digit())) {
            (TokenKind::Number, scan_number(&chars, i))
        } else if c.is_alphabetic() || c == '_' {
            (
                TokenKind::Word,
                scan_while(&chars, i, |c| c.is_alphanumeric() || c == '_' || c == '$'),
            )
        } else if "(),;.[]".contains(c) {
            (TokenKind::Punct, i + 1)
        } else if OPERATOR_CHARS.contains(c) {
            (TokenKind::Operator, scan_operator(&chars, i))
        } else {
            (TokenKind::Punct, i + 1)
        };
        tokens.push(Token::new(kind, chars[i..end].iter().collect::<String>()));
        i = end;
    }
    tokens
}

pub fn render(tokens: &[Token]) -> String {
    tokens.iter().map(|t| t.text.as_str()).collect()
}

fn scan_while(chars: &[char], start: usize, pred: impl Fn(char) -> bool) -> usize {
    let mut end = start;
    while end < chars.len() && pred(chars[end]) {
        end += 1;
    }
    end
}

fn scan_block_comment(chars: &[char], start: usize) -> usize {
    let mut depth = 0usize;
    let mut i = start;
    while i < chars.len() {
        if chars[i] == '/' && chars.get(i + 1) == Some(&'*') {
            depth += 1;
            i += 2;
        } else if chars[i] == '*' && chars.get(i + 1) == Some(&'/') {
            depth -= 1;
            i += 2;
            if depth == 0 {
                return i;
            }
        } else {
            i += 1;
        }
    }
    chars.len()
}

/// Scans a quoted run starting at the opening quote. Doubled quotes stay
/// inside; with `backslash` set, `\x` escapes are skipped as a pair.
fn scan_quoted(chars: &[char], start: usize, quote: char, backslash: bool) -> usize {
    let mut i = start + 1;
    while i < chars.len() {
        let c = chars[i];
        if backslash && c == '\\' {
            i += 2;
            continue;
        }
        if c == quote {
            if chars.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    chars.len()
}

fn scan_dollar_quoted(chars: &[char], start: usize) -> Option<usize> {
    let mut i = start + 1;
    while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
        i += 1;
    }
    if chars.get(i) != Some(&'$') {
        return None;
    }
    if i > start + 1 && chars[start + 1].is_ascii_digit() {
        return None;
    }
    let tag: Vec<char> = chars[start..=i].to_vec();
    let mut j = i + 1;
    while j + tag.len() <= chars.len() {
        if chars[j..j + tag.len()] == tag[..] {
            return Some(j + tag.len());
        }
        j += 1;
    }
    None
}

fn scan_number(chars: &[char], start: usize) -> usize {
    let mut i = scan_while(chars, start, |c| c.is_ascii_digit());
    if chars.get(i) == Some(&'.') && chars.get(i + 1) != Some(&'.') {
        i = scan_while(chars, i + 1, |c| c.is_ascii_digit());
    }
    if matches!(chars.get(i), Some('e') | Some('E')) {
        let mut j = i + 1;
        if matches!(chars.get(j), Some('+') | Some('-')) {
            j += 1;
        }
        if chars.get(j).is_some_and(|c| c.is_ascii_digit()) {
            i = scan_while(chars, j, |c| c.is_ascii_digit());
        }
    }
    i
}

fn scan_operator(chars: &[char], start: usize) -> usize {
    let rest = |len: usize| -> Option<String> {
        chars.get(start..start + len).map(|s| s.iter().collect())
    };
    if let Some(three) = rest(3) {
        if THREE_CHAR_OPS.contains(&three.as_str()) {
            return start + 3;
        }
    }
    if let Some(two) = rest(2) {
        if TWO_CHAR_OPS.contains(&two.as_str()) {
            return start + 2;
        }
    }
    start + 1
}

/// Index of the nearest non-trivia token before `idx`.
pub fn prev_significant(tokens: &[Token], idx: usize) -> Option<usize> {
    (0..idx.min(tokens.len())).rev().find(|&i| !tokens[i].is_trivia())
}

/// Index of the nearest non-trivia token after `idx`.
pub fn next_significant(tokens: &[Token], idx: usize) -> Option<usize> {
    (idx + 1..tokens.len()).find(|&i| !tokens[i].is_trivia())
}

/// Index of the bracket closing the one at `open`.
pub fn matching_close(tokens: &[Token], open: usize) -> Option<usize> {
    let (open_c, close_c) = match tokens.get(open)?.text.as_str() {
        "(" => ('(', ')'),
        "[" => ('[', ']'),
        _ => return None,
    };
    let mut depth = 0usize;
    for (i, token) in tokens.iter().enumerate().skip(open) {
        if token.is_punct(open_c) {
            depth += 1;
        } else if token.is_punct(close_c) {
            depth -= 1;
            if depth == 0 {
                return Some(i);
            }
        }
    }
    None
}

/// Index of the bracket opening the one at `close`.
pub fn matching_open(tokens: &[Token], close: usize) -> Option<usize> {
    let (open_c, close_c) = match tokens.get(close)?.text.as_str() {
        ")" => ('(', ')'),
        "]" => ('[', ']'),
        _ => return None,
    };
    let mut depth = 0usize;
    for i in (0..=close).rev() {
        if tokens[i].is_punct(close_c) {
            depth += 1;
        } else if tokens[i].is_punct(open_c) {
            depth -= 1;
            if depth == 0 {
                return Some(i);
            }
        }
    }
    None
}

/// First significant words of a statement, upper-cased, with their token
/// indices.
pub fn leading_words(tokens: &[Token], limit: usize) -> Vec<(usize, String)> {
    tokens
        .iter()
        .enumerate()
        .filter(|(_, t)| !t.is_trivia())
        .take(limit)
        .map(|(i, t)| (i, t.original_text().to_ascii_uppercase()))
        .collect()
}
