//! In-process engine speaking the backend dialect: uppercase identifiers,
//! `?` parameters, `START TRANSACTION`, `ROLLBACK TO SAVEPOINT`, vector
//! functions and INFORMATION_SCHEMA metadata. Statements that touch no rows
//! fail with SQLCODE 100 the way the real backend does.

pub mod catalog;
pub mod connector;
pub mod constraints;
pub mod error;
pub mod executor;
pub mod information_schema;
pub mod source;
pub mod transaction;

pub use catalog::{Database, DEFAULT_SCHEMA};
pub use connector::{EmbeddedConnection, EmbeddedConnector};
pub use error::EngineError;
pub use executor::{Executor, Session};

#[cfg(test)]
mod tests;
