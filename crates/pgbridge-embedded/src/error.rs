use pgbridge_bridge::BackendFailure;
use pgbridge_sql::EvalError;
use thiserror::Error;

/// Failures raised by the embedded engine. Each carries the SQLCODE the
/// backend dialect reports and the SQLSTATE handed to PostgreSQL clients.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// SQLCODE 100: the statement touched no rows.
    #[error("no rows affected")]
    NoData,
    #[error("syntax error: {0}")]
    Syntax(String),
    #[error("table {0} not found")]
    UnknownTable(String),
    #[error("table {0} already exists")]
    DuplicateTable(String),
    #[error("field {0} not found")]
    UnknownColumn(String),
    #[error("constraint {0} already exists")]
    DuplicateConstraint(String),
    #[error("field {column} in table {table} is required")]
    NotNull { table: String, column: String },
    #[error("value for field {column} exceeds maximum length {max}")]
    TooLong { column: String, max: usize },
    #[error("vector for field {column} has {found} elements, expected {expected}")]
    Dimension {
        column: String,
        expected: usize,
        found: usize,
    },
    #[error("duplicate key value violates unique constraint {0}")]
    Unique(String),
    #[error("foreign key constraint {0} failed")]
    ForeignKey(String),
    #[error("no unique constraint matches the referenced columns of table {0}")]
    NoUniqueKey(String),
    #[error("cannot drop {0}: other tables reference it")]
    Dependent(String),
    #[error("savepoint {0} does not exist")]
    UnknownSavepoint(String),
    #[error("statement expects {expected} parameters, {supplied} supplied")]
    ParameterCount { expected: usize, supplied: usize },
    #[error("statement interrupted")]
    Interrupted,
    #[error("{0}")]
    Eval(#[from] EvalError),
    #[error("not supported: {0}")]
    NotSupported(String),
}

impl EngineError {
    pub fn sqlcode(&self) -> i32 {
        match self {
            EngineError::NoData => 100,
            EngineError::Syntax(_) | EngineError::ParameterCount { .. } => -1,
            EngineError::NotSupported(_) => -1,
            EngineError::UnknownTable(_) => -30,
            EngineError::DuplicateTable(_) => -201,
            EngineError::UnknownColumn(_) => -29,
            EngineError::DuplicateConstraint(_) => -317,
            EngineError::NotNull { .. } => -108,
            EngineError::TooLong { .. } | EngineError::Dimension { .. } => -104,
            EngineError::Unique(_) => -119,
            EngineError::ForeignKey(_) => -121,
            EngineError::NoUniqueKey(_) => -322,
            EngineError::Dependent(_) => -320,
            EngineError::UnknownSavepoint(_) => -375,
            EngineError::Interrupted => -114,
            EngineError::Eval(EvalError::UnknownRelation(_)) => -30,
            EngineError::Eval(EvalError::UnknownColumn(_)) => -29,
            EngineError::Eval(EvalError::UnknownFunction(_)) => -359,
            EngineError::Eval(_) => -400,
        }
    }

    pub fn sqlstate(&self) -> &'static str {
        match self {
            EngineError::NoData => "02000",
            EngineError::Syntax(_) => "42601",
            EngineError::UnknownTable(_) => "42P01",
            EngineError::DuplicateTable(_) => "42P07",
            EngineError::UnknownColumn(_) => "42703",
            EngineError::DuplicateConstraint(_) => "42710",
            EngineError::NotNull { .. } => "23502",
            EngineError::TooLong { .. } => "22001",
            EngineError::Dimension { .. } => "22000",
            EngineError::Unique(_) => "23505",
            EngineError::ForeignKey(_) => "23503",
            EngineError::NoUniqueKey(_) => "42830",
            EngineError::Dependent(_) => "2BP01",
            EngineError::UnknownSavepoint(_) => "3B001",
            EngineError::ParameterCount { .. } => "07001",
            EngineError::Interrupted => "57014",
            EngineError::Eval(err) => err.sqlstate(),
            EngineError::NotSupported(_) => "0A000",
        }
    }
}

impl From<EngineError> for BackendFailure {
    fn from(err: EngineError) -> Self {
        BackendFailure::new(err.sqlcode(), err.sqlstate(), err.to_string())
    }
}
