use crate::server::Gateway;
use pgbridge_core::{Column, Row, Value};
use pgbridge_sql::split::max_param_index;
use pgbridge_sql::{
    classify, is_catalog_query, StatementKind, TransactionCommand, Translation,
};

/// How a statement is answered, decided once when it is prepared.
#[derive(Debug, Clone)]
pub enum Plan {
    Empty,
    Transaction {
        command: TransactionCommand,
        translation: Translation,
    },
    /// `None` deallocates everything.
    Deallocate(Option<String>),
    Set {
        name: String,
        value: String,
    },
    Show(String),
    /// Answered by the catalog emulator from the client's own text.
    Catalog { param_count: usize },
    Backend {
        translation: Translation,
        returns_rows: bool,
    },
}

impl Plan {
    pub fn build(gateway: &Gateway, sql: &str) -> Self {
        let mapping = gateway.mapping.get();
        let translate = || gateway.translator.translate(sql, &mapping);
        match classify(sql) {
            StatementKind::Empty => Plan::Empty,
            StatementKind::Transaction(command) => Plan::Transaction {
                command,
                translation: translate(),
            },
            StatementKind::Deallocate(name) => Plan::Deallocate(name),
            StatementKind::Set { name, value } => Plan::Set { name, value },
            StatementKind::Show(name) => Plan::Show(name),
            StatementKind::Query if is_catalog_query(sql) => Plan::Catalog {
                param_count: max_param_index(sql),
            },
            kind => Plan::Backend {
                translation: translate(),
                returns_rows: kind == StatementKind::Query,
            },
        }
    }

    pub fn param_count(&self) -> usize {
        match self {
            Plan::Catalog { param_count } => *param_count,
            Plan::Backend { translation, .. } => translation.param_count,
            _ => 0,
        }
    }

    /// What a failed transaction block still accepts.
    pub fn allowed_in_failed_block(&self) -> bool {
        match self {
            Plan::Empty => true,
            Plan::Transaction { command, .. } => matches!(
                command,
                TransactionCommand::Rollback
                    | TransactionCommand::RollbackTo(_)
                    | TransactionCommand::Commit
            ),
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PreparedStatement {
    pub sql: String,
    pub plan: Plan,
    /// Declared parameter types, padded with 0 (unspecified) up to the
    /// number of parameters the text references.
    pub param_types: Vec<u32>,
    /// Result columns once described.
    pub columns: Option<Vec<Column>>,
}

impl PreparedStatement {
    pub fn new(gateway: &Gateway, sql: &str, declared: Vec<u32>) -> Self {
        let plan = Plan::build(gateway, sql);
        let mut param_types = declared;
        if param_types.len() < plan.param_count() {
            param_types.resize(plan.param_count(), 0);
        }
        Self {
            sql: sql.to_string(),
            plan,
            param_types,
            columns: None,
        }
    }
}

/// Result of running one statement, before it is written to the client.
#[derive(Debug, Clone, PartialEq)]
pub enum Execution {
    Empty,
    Rows { columns: Vec<Column>, rows: Vec<Row> },
    Command { tag: String },
}

/// Execution state of a portal across Execute messages.
#[derive(Debug, Clone)]
pub enum Cursor {
    Empty,
    Rows {
        columns: Vec<Column>,
        rows: Vec<Row>,
        position: usize,
    },
    Done { tag: String },
}

impl From<Execution> for Cursor {
    fn from(execution: Execution) -> Self {
        match execution {
            Execution::Empty => Cursor::Empty,
            Execution::Rows { columns, rows } => Cursor::Rows {
                columns,
                rows,
                position: 0,
            },
            Execution::Command { tag } => Cursor::Done { tag },
        }
    }
}

#[derive(Debug, Clone)]
pub struct Portal {
    pub statement: String,
    pub sql: String,
    pub plan: Plan,
    pub params: Vec<Value>,
    /// Raw Bind result format codes, resolved against the column count.
    pub result_formats: Vec<i16>,
    /// Columns sent in RowDescription; DataRows are encoded with these.
    pub columns: Option<Vec<Column>>,
    pub cursor: Option<Cursor>,
}
