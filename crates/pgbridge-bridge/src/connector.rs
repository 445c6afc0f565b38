use async_trait::async_trait;
use pgbridge_core::{Column, ResultSet, Value};
use std::sync::Arc;
use thiserror::Error;

/// SQLCODE the backend raises when a statement touched no rows.
pub const SQLCODE_NO_DATA: i32 = 100;

/// A failure reported by the backend driver, carrying the backend's own
/// SQLCODE alongside a PostgreSQL SQLSTATE.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct BackendFailure {
    pub sqlcode: i32,
    pub sqlstate: String,
    pub message: String,
    /// The connection can no longer be used.
    pub disconnected: bool,
}

impl BackendFailure {
    pub fn new(sqlcode: i32, sqlstate: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            sqlcode,
            sqlstate: sqlstate.into(),
            message: message.into(),
            disconnected: false,
        }
    }

    pub fn no_data() -> Self {
        Self::new(SQLCODE_NO_DATA, "02000", "no rows affected")
    }

    pub fn disconnected(message: impl Into<String>) -> Self {
        Self {
            disconnected: true,
            ..Self::new(-1, "08006", message)
        }
    }

    pub fn is_no_data(&self) -> bool {
        self.sqlcode == SQLCODE_NO_DATA
    }
}

/// What a backend call produced, before any PostgreSQL tagging.
#[derive(Debug, Clone, PartialEq)]
pub enum RawOutcome {
    Rows(ResultSet),
    Affected(u64),
}

/// Aborts the statement running on a connection. Usable from any task.
pub trait Interrupt: Send + Sync {
    fn interrupt(&self);
}

#[async_trait]
pub trait BackendConnection: Send {
    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<RawOutcome, BackendFailure>;

    /// Result columns of `sql` without producing rows.
    async fn describe(&mut self, sql: &str) -> Result<Vec<Column>, BackendFailure>;

    async fn ping(&mut self) -> Result<(), BackendFailure> {
        self.execute("SELECT 1", &[]).await.map(|_| ())
    }

    fn interrupt_handle(&self) -> Arc<dyn Interrupt>;
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn BackendConnection>, BackendFailure>;
}
