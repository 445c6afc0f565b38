use crate::connector::{BackendFailure, RawOutcome};
use pgbridge_core::{Column, GatewayError, Row};
use pgbridge_sql::command::{command_tag, dml_verb};
use std::time::Duration;
use thiserror::Error;

/// Tagged result of one backend statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Rows { columns: Vec<Column>, rows: Vec<Row> },
    Command { tag: String },
}

impl Outcome {
    /// Tags a raw backend result. `sql` is the statement that produced it.
    pub fn from_raw(sql: &str, raw: RawOutcome) -> Self {
        match raw {
            RawOutcome::Rows(set) => Outcome::Rows {
                columns: set.columns,
                rows: set.rows,
            },
            RawOutcome::Affected(count) => Outcome::Command {
                tag: command_tag(sql, count),
            },
        }
    }

    /// SQLCODE 100 on a data-modifying statement is a zero-row success.
    pub fn from_failure(sql: &str, failure: BackendFailure) -> Result<Self, BridgeError> {
        if failure.is_no_data() {
            if let Some(verb) = dml_verb(sql) {
                return Ok(Outcome::Command { tag: verb.tag(0) });
            }
        }
        Err(BridgeError::Backend(failure))
    }

    pub fn row_count(&self) -> usize {
        match self {
            Outcome::Rows { rows, .. } => rows.len(),
            Outcome::Command { .. } => 0,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum BridgeError {
    #[error("{0}")]
    Backend(BackendFailure),
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("connection pool exhausted after {0:?}")]
    PoolExhausted(Duration),
    #[error("statement timeout")]
    Timeout,
    #[error("statement cancelled")]
    Cancelled,
}

impl From<BridgeError> for GatewayError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::Backend(failure) => {
                let code = if failure.sqlstate.is_empty() {
                    "42000".to_string()
                } else {
                    failure.sqlstate
                };
                GatewayError::backend(code, failure.message)
            }
            BridgeError::Unavailable(message) => GatewayError::BackendUnavailable(message),
            BridgeError::PoolExhausted(waited) => GatewayError::PoolExhausted(waited),
            BridgeError::Timeout => GatewayError::Timeout,
            BridgeError::Cancelled => GatewayError::Cancelled,
        }
    }
}
