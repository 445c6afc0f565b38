pub mod error;
pub mod oid;
pub mod pgtype;
pub mod schema;
pub mod types;

pub use error::{GatewayError, Severity};
pub use oid::{ObjectKind, OidRegistry};
pub use pgtype::{PgType, TypeSpec};
pub use schema::{MappingSource, SchemaMapping, SchemaMappingHandle};
pub use types::{Column, ResultSet, Row, Value};

#[cfg(test)]
mod tests;
