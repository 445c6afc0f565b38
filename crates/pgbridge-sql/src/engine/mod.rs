//! Relational evaluator over parsed SQL. Relations come from a
//! [`RelationSource`]; the catalog emulator and the embedded backend each
//! provide one.

mod aggregate;
mod expr;
mod functions;
mod query;
mod scope;

pub use aggregate::AggregateFunc;
pub use expr::cast_value;
pub use functions::{cosine_similarity, dot_product, l2_distance, like_match};
pub use scope::{RowContext, Scope, ScopeColumn};

use pgbridge_core::{ResultSet, Value};
use sqlparser::ast::{Expr, Query};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("relation \"{0}\" does not exist")]
    UnknownRelation(String),
    #[error("column \"{0}\" does not exist")]
    UnknownColumn(String),
    #[error("column reference \"{0}\" is ambiguous")]
    AmbiguousColumn(String),
    #[error("function {0} does not exist")]
    UnknownFunction(String),
    #[error("unsupported construct: {0}")]
    Unsupported(String),
    #[error("{0}")]
    InvalidValue(String),
    #[error("division by zero")]
    DivisionByZero,
    #[error("no value supplied for parameter ${0}")]
    MissingParameter(usize),
}

impl EvalError {
    pub fn sqlstate(&self) -> &'static str {
        match self {
            EvalError::UnknownRelation(_) => "42P01",
            EvalError::UnknownColumn(_) => "42703",
            EvalError::AmbiguousColumn(_) => "42702",
            EvalError::UnknownFunction(_) => "42883",
            EvalError::Unsupported(_) => "0A000",
            EvalError::InvalidValue(_) => "22023",
            EvalError::DivisionByZero => "22012",
            EvalError::MissingParameter(_) => "08P01",
        }
    }
}

/// Supplies relations and environment-specific functions to the evaluator.
pub trait RelationSource {
    /// Full contents of the relation named by `parts` (`schema.table` or
    /// `table`). Unknown names fail with [`EvalError::UnknownRelation`].
    fn relation(&self, parts: &[String]) -> Result<ResultSet, EvalError>;

    /// Functions beyond the built-in scalar set. `None` means unknown.
    fn call(&self, _name: &str, _args: &[Value]) -> Option<Result<Value, EvalError>> {
        None
    }

    /// OID for a `'name'::regclass` cast.
    fn regclass(&self, _name: &str) -> Option<i64> {
        None
    }
}

pub struct Evaluator<'a> {
    source: &'a dyn RelationSource,
    params: &'a [Value],
}

impl<'a> Evaluator<'a> {
    pub fn new(source: &'a dyn RelationSource, params: &'a [Value]) -> Self {
        Self { source, params }
    }

    pub fn query(&self, query: &Query) -> Result<ResultSet, EvalError> {
        self.query_in(query, None)
    }

    /// Evaluates `expr` against one row of `scope`.
    pub fn eval_row(&self, expr: &Expr, scope: &Scope, row: &[Value]) -> Result<Value, EvalError> {
        self.eval(expr, &RowContext::new(scope, row))
    }

    /// WHERE-style test: true only when `expr` is true (not NULL).
    pub fn matches(&self, expr: &Expr, scope: &Scope, row: &[Value]) -> Result<bool, EvalError> {
        Ok(self.eval_row(expr, scope, row)?.as_bool() == Some(true))
    }

    /// Evaluates an expression that references no columns.
    pub fn eval_const(&self, expr: &Expr) -> Result<Value, EvalError> {
        self.eval_row(expr, &Scope::default(), &[])
    }
}
