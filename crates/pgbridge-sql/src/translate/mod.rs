//! PostgreSQL-to-backend dialect translation: a lexed token stream run
//! through an ordered list of independent rewrite passes.

mod casts;
mod identifiers;
mod operand;
mod params;
mod schema;
mod terminators;
mod transactions;
mod vectors;

pub use identifiers::IdentifierCase;
pub use schema::SCHEMA_COLUMNS;
pub use vectors::{inline_order_by_vectors, InlinedStatement, MAX_VECTOR_LITERAL_LEN};

use crate::lexer::{self, Token};
use pgbridge_core::SchemaMapping;
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct TranslatorConfig {
    pub identifier_case: IdentifierCase,
}

/// Backend SQL plus the order in which client parameters must be bound to
/// its `?` markers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Translation {
    pub sql: String,
    /// 1-based client parameter number for each `?` marker, in text order.
    pub param_order: Vec<usize>,
    /// Highest `$n` referenced by the client text.
    pub param_count: usize,
}

impl Translation {
    /// Reorders client parameter values into backend marker order.
    pub fn bind<T: Clone>(&self, values: &[T]) -> Option<Vec<T>> {
        self.param_order
            .iter()
            .map(|n| values.get(n.checked_sub(1)?).cloned())
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Translator {
    config: TranslatorConfig,
}

impl Translator {
    pub fn new(config: TranslatorConfig) -> Self {
        Self { config }
    }

    pub fn translate(&self, sql: &str, mapping: &SchemaMapping) -> Translation {
        let tokens = lexer::tokenize(sql);
        let tokens = terminators::strip(tokens);
        let tokens = identifiers::fold(tokens, self.config.identifier_case);
        let tokens = casts::rewrite(tokens);
        let (tokens, param_order) = params::number(tokens);
        let tokens = vectors::rewrite(tokens);
        let tokens = transactions::rewrite(tokens);
        let tokens = schema::rewrite(tokens, mapping);
        let translated = lexer::render(&tokens);
        let param_count = param_order.iter().copied().max().unwrap_or(0);
        debug!(original = sql, translated = %translated, params = param_count, "translated");
        Translation {
            sql: translated,
            param_order,
            param_count,
        }
    }
}

/// Replaces `tokens[start..end]` with `replacement`, returning the index
/// just past the inserted tokens.
fn splice(tokens: &mut Vec<Token>, start: usize, end: usize, replacement: Vec<Token>) -> usize {
    let len = replacement.len();
    tokens.splice(start..end, replacement);
    start + len
}
