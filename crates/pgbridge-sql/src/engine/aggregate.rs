use super::EvalError;
use pgbridge_core::Value;
use sqlparser::ast::{
    Expr, Function, FunctionArg, FunctionArgExpr, FunctionArguments, SelectItem,
};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunc {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateFunc {
    pub fn from_name(name: &str) -> Option<Self> {
        let func = match name.to_ascii_uppercase().as_str() {
            "COUNT" => AggregateFunc::Count,
            "SUM" => AggregateFunc::Sum,
            "AVG" => AggregateFunc::Avg,
            "MIN" => AggregateFunc::Min,
            "MAX" => AggregateFunc::Max,
            _ => return None,
        };
        Some(func)
    }

    pub fn of(func: &Function) -> Option<Self> {
        if func.over.is_some() {
            return None;
        }
        let name = func.name.0.last()?;
        Self::from_name(&name.value)
    }

    /// Folds the per-row argument values of one group. NULLs are skipped,
    /// except that `COUNT(*)` passes one non-null marker per row.
    pub fn compute(self, values: Vec<Value>, distinct: bool) -> Result<Value, EvalError> {
        let mut values: Vec<Value> = values.into_iter().filter(|v| !v.is_null()).collect();
        if distinct {
            let mut unique: Vec<Value> = Vec::with_capacity(values.len());
            for value in values {
                if !unique.iter().any(|u| u.compare(&value) == Ordering::Equal) {
                    unique.push(value);
                }
            }
            values = unique;
        }
        match self {
            AggregateFunc::Count => Ok(Value::Int(values.len() as i64)),
            AggregateFunc::Min => Ok(values
                .into_iter()
                .min_by(|a, b| a.compare(b))
                .unwrap_or(Value::Null)),
            AggregateFunc::Max => Ok(values
                .into_iter()
                .max_by(|a, b| a.compare(b))
                .unwrap_or(Value::Null)),
            AggregateFunc::Sum => {
                if values.is_empty() {
                    return Ok(Value::Null);
                }
                if values.iter().all(|v| matches!(v, Value::Int(_))) {
                    let mut total: i64 = 0;
                    for value in &values {
                        let n = value.as_i64().unwrap_or_default();
                        total = total
                            .checked_add(n)
                            .ok_or_else(|| EvalError::InvalidValue("bigint out of range".into()))?;
                    }
                    return Ok(Value::Int(total));
                }
                Ok(Value::Float(numeric_values(&values)?.iter().sum()))
            }
            AggregateFunc::Avg => {
                if values.is_empty() {
                    return Ok(Value::Null);
                }
                let nums = numeric_values(&values)?;
                Ok(Value::Float(nums.iter().sum::<f64>() / nums.len() as f64))
            }
        }
    }
}

fn numeric_values(values: &[Value]) -> Result<Vec<f64>, EvalError> {
    values
        .iter()
        .map(|v| {
            v.as_f64()
                .ok_or_else(|| EvalError::InvalidValue(format!("invalid numeric input \"{v}\"")))
        })
        .collect()
}

/// True when `func` is `COUNT(*)`.
pub(crate) fn is_count_star(func: &Function) -> bool {
    match &func.args {
        FunctionArguments::List(list) => matches!(
            list.args.as_slice(),
            [FunctionArg::Unnamed(FunctionArgExpr::Wildcard)]
        ),
        _ => false,
    }
}

/// Whether `expr` contains an aggregate call outside any subquery.
pub fn contains_aggregate(expr: &Expr) -> bool {
    match expr {
        Expr::Function(func) => {
            if AggregateFunc::of(func).is_some() {
                return true;
            }
            match &func.args {
                FunctionArguments::List(list) => list.args.iter().any(|arg| match arg {
                    FunctionArg::Unnamed(FunctionArgExpr::Expr(e))
                    | FunctionArg::Named {
                        arg: FunctionArgExpr::Expr(e),
                        ..
                    } => contains_aggregate(e),
                    _ => false,
                }),
                _ => false,
            }
        }
        Expr::BinaryOp { left, right, .. } => contains_aggregate(left) || contains_aggregate(right),
        Expr::UnaryOp { expr, .. }
        | Expr::Nested(expr)
        | Expr::Cast { expr, .. }
        | Expr::IsNull(expr)
        | Expr::IsNotNull(expr)
        | Expr::IsTrue(expr)
        | Expr::IsFalse(expr) => contains_aggregate(expr),
        Expr::IsDistinctFrom(a, b) | Expr::IsNotDistinctFrom(a, b) => {
            contains_aggregate(a) || contains_aggregate(b)
        }
        Expr::Between {
            expr, low, high, ..
        } => contains_aggregate(expr) || contains_aggregate(low) || contains_aggregate(high),
        Expr::InList { expr, list, .. } => {
            contains_aggregate(expr) || list.iter().any(contains_aggregate)
        }
        Expr::Like { expr, pattern, .. } | Expr::ILike { expr, pattern, .. } => {
            contains_aggregate(expr) || contains_aggregate(pattern)
        }
        Expr::Case {
            operand,
            conditions,
            results,
            else_result,
        } => {
            operand.as_deref().is_some_and(contains_aggregate)
                || conditions.iter().any(contains_aggregate)
                || results.iter().any(contains_aggregate)
                || else_result.as_deref().is_some_and(contains_aggregate)
        }
        Expr::Tuple(items) => items.iter().any(contains_aggregate),
        _ => false,
    }
}

pub(crate) fn projection_has_aggregate(items: &[SelectItem]) -> bool {
    items.iter().any(|item| match item {
        SelectItem::UnnamedExpr(e) | SelectItem::ExprWithAlias { expr: e, .. } => {
            contains_aggregate(e)
        }
        _ => false,
    })
}
