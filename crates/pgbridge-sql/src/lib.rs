pub mod catalog;
pub mod command;
pub mod engine;
pub mod lexer;
pub mod output;
pub mod split;
pub mod translate;

pub use catalog::{is_catalog_query, CatalogContext, CatalogEmulator, CatalogSnapshot};
pub use command::{classify, command_tag, StatementKind, TransactionCommand};
pub use engine::{EvalError, Evaluator, RelationSource};
pub use split::split_statements;
pub use translate::{
    inline_order_by_vectors, IdentifierCase, InlinedStatement, Translation, Translator,
    TranslatorConfig,
};

#[cfg(test)]
mod tests;
