//! Statement classification performed on the client's text before any
//! translation, and command-tag construction.

use crate::lexer::{tokenize, Token, TokenKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionCommand {
    Begin,
    Commit,
    Rollback,
    Savepoint(String),
    Release(String),
    RollbackTo(String),
}

impl TransactionCommand {
    pub fn tag(&self) -> &'static str {
        match self {
            TransactionCommand::Begin => "BEGIN",
            TransactionCommand::Commit => "COMMIT",
            TransactionCommand::Rollback | TransactionCommand::RollbackTo(_) => "ROLLBACK",
            TransactionCommand::Savepoint(_) => "SAVEPOINT",
            TransactionCommand::Release(_) => "RELEASE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatementKind {
    Empty,
    Transaction(TransactionCommand),
    /// `None` means `DEALLOCATE ALL`.
    Deallocate(Option<String>),
    Set { name: String, value: String },
    Show(String),
    /// Returns rows.
    Query,
    Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmlVerb {
    Insert,
    Update,
    Delete,
}

impl DmlVerb {
    pub fn tag(self, rows: u64) -> String {
        match self {
            DmlVerb::Insert => format!("INSERT 0 {rows}"),
            DmlVerb::Update => format!("UPDATE {rows}"),
            DmlVerb::Delete => format!("DELETE {rows}"),
        }
    }
}

fn significant(sql: &str) -> Vec<Token> {
    tokenize(sql).into_iter().filter(|t| !t.is_trivia()).collect()
}

fn upper(tokens: &[Token], idx: usize) -> Option<String> {
    tokens
        .get(idx)
        .filter(|t| t.kind == TokenKind::Word)
        .map(|t| t.text.to_ascii_uppercase())
}

fn name_at(tokens: &[Token], idx: usize) -> Option<String> {
    let token = tokens.get(idx)?;
    token.ident_value().or_else(|| token.string_value())
}

pub fn classify(sql: &str) -> StatementKind {
    let tokens = significant(sql);
    let Some(first) = tokens.first() else {
        return StatementKind::Empty;
    };
    if first.is_punct('(') {
        return StatementKind::Query;
    }
    let word = |i: usize| upper(&tokens, i);
    let noise = |i: usize| matches!(word(i).as_deref(), Some("WORK") | Some("TRANSACTION"));
    match word(0).as_deref() {
        Some("BEGIN") => StatementKind::Transaction(TransactionCommand::Begin),
        Some("START") if word(1).as_deref() == Some("TRANSACTION") => {
            StatementKind::Transaction(TransactionCommand::Begin)
        }
        Some("COMMIT") | Some("END") => StatementKind::Transaction(TransactionCommand::Commit),
        Some("ROLLBACK") | Some("ABORT") => {
            let base = if noise(1) { 2 } else { 1 };
            if word(base).as_deref() == Some("TO") {
                let at = if word(base + 1).as_deref() == Some("SAVEPOINT") {
                    base + 2
                } else {
                    base + 1
                };
                match name_at(&tokens, at) {
                    Some(name) => {
                        StatementKind::Transaction(TransactionCommand::RollbackTo(name))
                    }
                    None => StatementKind::Command,
                }
            } else {
                StatementKind::Transaction(TransactionCommand::Rollback)
            }
        }
        Some("SAVEPOINT") => match name_at(&tokens, 1) {
            Some(name) => StatementKind::Transaction(TransactionCommand::Savepoint(name)),
            None => StatementKind::Command,
        },
        Some("RELEASE") => {
            let at = if word(1).as_deref() == Some("SAVEPOINT") { 2 } else { 1 };
            match name_at(&tokens, at) {
                Some(name) => StatementKind::Transaction(TransactionCommand::Release(name)),
                None => StatementKind::Command,
            }
        }
        Some("DEALLOCATE") => {
            let at = if word(1).as_deref() == Some("PREPARE") { 2 } else { 1 };
            if word(at).as_deref() == Some("ALL") {
                StatementKind::Deallocate(None)
            } else {
                StatementKind::Deallocate(name_at(&tokens, at))
            }
        }
        Some("SET") => classify_set(&tokens),
        Some("SHOW") => {
            let name = tokens[1..]
                .iter()
                .map(|t| t.text.as_str())
                .collect::<Vec<_>>()
                .join(" ");
            StatementKind::Show(name.to_ascii_lowercase())
        }
        Some("SELECT") | Some("WITH") | Some("VALUES") | Some("TABLE") | Some("EXPLAIN") => {
            StatementKind::Query
        }
        _ => StatementKind::Command,
    }
}

fn classify_set(tokens: &[Token]) -> StatementKind {
    let mut at = 1;
    if matches!(upper(tokens, at).as_deref(), Some("SESSION") | Some("LOCAL")) {
        at += 1;
    }
    if matches!(
        upper(tokens, at).as_deref(),
        Some("TRANSACTION") | Some("CHARACTERISTICS")
    ) {
        return StatementKind::Command;
    }
    let Some(name) = tokens.get(at).and_then(Token::ident_value) else {
        return StatementKind::Command;
    };
    let mut value_at = at + 1;
    if upper(tokens, value_at).as_deref() == Some("TO") || tokens.get(value_at).is_some_and(|t| t.is_operator("=")) {
        value_at += 1;
    }
    let value = tokens[value_at.min(tokens.len())..]
        .iter()
        .map(|t| t.string_value().unwrap_or_else(|| t.text.clone()))
        .collect::<Vec<_>>()
        .join(" ");
    StatementKind::Set {
        name: name.to_ascii_lowercase(),
        value,
    }
}

pub fn dml_verb(sql: &str) -> Option<DmlVerb> {
    match upper(&significant(sql), 0).as_deref() {
        Some("INSERT") => Some(DmlVerb::Insert),
        Some("UPDATE") => Some(DmlVerb::Update),
        Some("DELETE") => Some(DmlVerb::Delete),
        _ => None,
    }
}

const CREATE_MODIFIERS: &[&str] = &[
    "OR", "REPLACE", "UNIQUE", "TEMP", "TEMPORARY", "GLOBAL", "LOCAL", "UNLOGGED",
];

/// CommandComplete tag for a statement that affected `rows` rows.
pub fn command_tag(sql: &str, rows: u64) -> String {
    if let Some(verb) = dml_verb(sql) {
        return verb.tag(rows);
    }
    let tokens = significant(sql);
    let Some(first) = upper(&tokens, 0) else {
        return String::new();
    };
    match first.as_str() {
        "SELECT" | "VALUES" | "TABLE" | "WITH" => format!("SELECT {rows}"),
        "CREATE" | "DROP" | "ALTER" => {
            let object = (1..tokens.len())
                .filter_map(|i| upper(&tokens, i))
                .find(|w| !CREATE_MODIFIERS.contains(&w.as_str()));
            match object {
                Some(object) => format!("{first} {object}"),
                None => first,
            }
        }
        "TRUNCATE" => "TRUNCATE TABLE".to_string(),
        _ => first,
    }
}
