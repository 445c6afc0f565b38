use super::EvalError;
use pgbridge_core::{Column, Row, Value};

#[derive(Debug, Clone, PartialEq)]
pub struct ScopeColumn {
    /// Table name or alias the column is reachable through.
    pub qualifier: Option<String>,
    pub name: String,
    pub type_name: String,
    /// Right-hand copy of a `USING` join column: reachable only qualified.
    pub hidden: bool,
}

/// Column layout of the rows flowing through a query stage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Scope {
    pub columns: Vec<ScopeColumn>,
}

impl Scope {
    pub fn for_relation(qualifier: Option<&str>, columns: &[Column]) -> Self {
        Self {
            columns: columns
                .iter()
                .map(|c| ScopeColumn {
                    qualifier: qualifier.map(str::to_string),
                    name: c.name.clone(),
                    type_name: c.type_name.clone(),
                    hidden: false,
                })
                .collect(),
        }
    }

    pub fn join(&self, other: &Scope) -> Scope {
        let mut columns = self.columns.clone();
        columns.extend(other.columns.iter().cloned());
        Scope { columns }
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Same columns reachable through a new qualifier.
    pub fn requalify(mut self, qualifier: &str) -> Self {
        for column in &mut self.columns {
            column.qualifier = Some(qualifier.to_string());
        }
        self
    }

    pub fn null_row(&self) -> Row {
        vec![Value::Null; self.columns.len()]
    }

    /// Resolves `name` or `qualifier.name` (case-insensitive). `Ok(None)`
    /// when nothing matches so callers can fall back to an outer scope.
    pub fn resolve(&self, parts: &[String]) -> Result<Option<usize>, EvalError> {
        let Some(name) = parts.last() else {
            return Ok(None);
        };
        let qualifier = parts.len().checked_sub(2).map(|i| &parts[i]);
        let mut found = None;
        for (idx, column) in self.columns.iter().enumerate() {
            if !column.name.eq_ignore_ascii_case(name) {
                continue;
            }
            if qualifier.is_none() && column.hidden {
                continue;
            }
            if let Some(q) = qualifier {
                let matches = column
                    .qualifier
                    .as_deref()
                    .is_some_and(|cq| cq.eq_ignore_ascii_case(q));
                if !matches {
                    continue;
                }
            }
            if found.is_some() {
                return Err(EvalError::AmbiguousColumn(parts.join(".")));
            }
            found = Some(idx);
        }
        Ok(found)
    }
}

/// One row being evaluated, with the rows of its group when aggregating
/// and the enclosing row for correlated subqueries.
#[derive(Clone, Copy)]
pub struct RowContext<'r> {
    pub scope: &'r Scope,
    pub row: &'r [Value],
    pub group: Option<&'r [Row]>,
    pub outer: Option<&'r RowContext<'r>>,
}

impl<'r> RowContext<'r> {
    pub fn new(scope: &'r Scope, row: &'r [Value]) -> Self {
        Self {
            scope,
            row,
            group: None,
            outer: None,
        }
    }

    pub fn lookup(&self, parts: &[String]) -> Result<Value, EvalError> {
        if let Some(idx) = self.scope.resolve(parts)? {
            return Ok(self.row.get(idx).cloned().unwrap_or(Value::Null));
        }
        match self.outer {
            Some(outer) => outer.lookup(parts),
            None => Err(EvalError::UnknownColumn(parts.join("."))),
        }
    }
}
