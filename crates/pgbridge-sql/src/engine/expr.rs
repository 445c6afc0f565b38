use super::aggregate::{is_count_star, AggregateFunc};
use super::functions::{call_builtin, like_match, vector_arg};
use super::{EvalError, Evaluator, RowContext};
use chrono::{NaiveDate, NaiveTime};
use pgbridge_core::Value;
use sqlparser::ast::{
    BinaryOperator, DataType, DuplicateTreatment, Expr, Function, FunctionArg, FunctionArgExpr,
    FunctionArguments, Query, UnaryOperator, Value as SqlValue,
};
use std::cmp::Ordering;

/// Identifiers that read as function calls when no column matches.
const NILADIC_FUNCTIONS: &[&str] = &[
    "current_schema",
    "current_user",
    "session_user",
    "user",
    "current_catalog",
    "current_database",
    "current_date",
    "current_timestamp",
    "localtimestamp",
];

impl<'a> Evaluator<'a> {
    pub(crate) fn eval(&self, expr: &Expr, ctx: &RowContext<'_>) -> Result<Value, EvalError> {
        match expr {
            Expr::Identifier(ident) => {
                let parts = [ident.value.clone()];
                match ctx.lookup(&parts) {
                    Err(EvalError::UnknownColumn(name))
                        if ident.quote_style.is_none()
                            && NILADIC_FUNCTIONS.contains(&ident.value.to_ascii_lowercase().as_str()) =>
                    {
                        self.call_function(&ident.value, &[])
                            .map_err(|_| EvalError::UnknownColumn(name))
                    }
                    other => other,
                }
            }
            Expr::CompoundIdentifier(idents) => {
                let parts: Vec<String> = idents.iter().map(|i| i.value.clone()).collect();
                ctx.lookup(&parts)
            }
            Expr::Value(value) => self.literal(value),
            Expr::Nested(inner) => self.eval(inner, ctx),
            Expr::TypedString { data_type, value } => {
                self.cast(Value::Text(value.clone()), data_type)
            }
            Expr::Cast {
                expr, data_type, ..
            } => {
                let value = self.eval(expr, ctx)?;
                self.cast(value, data_type)
            }
            Expr::UnaryOp { op, expr } => {
                let value = self.eval(expr, ctx)?;
                unary(op, value)
            }
            Expr::BinaryOp { left, op, right } => match op {
                BinaryOperator::And => {
                    let l = truth(&self.eval(left, ctx)?)?;
                    if l == Some(false) {
                        return Ok(Value::Bool(false));
                    }
                    let r = truth(&self.eval(right, ctx)?)?;
                    Ok(match (l, r) {
                        (_, Some(false)) => Value::Bool(false),
                        (Some(true), Some(true)) => Value::Bool(true),
                        _ => Value::Null,
                    })
                }
                BinaryOperator::Or => {
                    let l = truth(&self.eval(left, ctx)?)?;
                    if l == Some(true) {
                        return Ok(Value::Bool(true));
                    }
                    let r = truth(&self.eval(right, ctx)?)?;
                    Ok(match (l, r) {
                        (_, Some(true)) => Value::Bool(true),
                        (Some(false), Some(false)) => Value::Bool(false),
                        _ => Value::Null,
                    })
                }
                _ => {
                    let l = self.eval(left, ctx)?;
                    let r = self.eval(right, ctx)?;
                    binary(op, l, r)
                }
            },
            Expr::IsNull(inner) => Ok(Value::Bool(self.eval(inner, ctx)?.is_null())),
            Expr::IsNotNull(inner) => Ok(Value::Bool(!self.eval(inner, ctx)?.is_null())),
            Expr::IsTrue(inner) => Ok(Value::Bool(truth(&self.eval(inner, ctx)?)? == Some(true))),
            Expr::IsFalse(inner) => {
                Ok(Value::Bool(truth(&self.eval(inner, ctx)?)? == Some(false)))
            }
            Expr::IsNotTrue(inner) => {
                Ok(Value::Bool(truth(&self.eval(inner, ctx)?)? != Some(true)))
            }
            Expr::IsNotFalse(inner) => {
                Ok(Value::Bool(truth(&self.eval(inner, ctx)?)? != Some(false)))
            }
            Expr::IsDistinctFrom(a, b) => {
                let (a, b) = (self.eval(a, ctx)?, self.eval(b, ctx)?);
                Ok(Value::Bool(!not_distinct(&a, &b)))
            }
            Expr::IsNotDistinctFrom(a, b) => {
                let (a, b) = (self.eval(a, ctx)?, self.eval(b, ctx)?);
                Ok(Value::Bool(not_distinct(&a, &b)))
            }
            Expr::InList {
                expr,
                list,
                negated,
            } => {
                let needle = self.eval(expr, ctx)?;
                let mut candidates = Vec::with_capacity(list.len());
                for item in list {
                    candidates.push(self.eval(item, ctx)?);
                }
                Ok(negate(membership(&needle, &candidates), *negated))
            }
            Expr::InSubquery {
                expr,
                subquery,
                negated,
            } => {
                let needle = self.eval(expr, ctx)?;
                let candidates = self.subquery_column(subquery, ctx)?;
                Ok(negate(membership(&needle, &candidates), *negated))
            }
            Expr::Between {
                expr,
                negated,
                low,
                high,
            } => {
                let value = self.eval(expr, ctx)?;
                let low = compare(&BinaryOperator::GtEq, &value, &self.eval(low, ctx)?);
                let high = compare(&BinaryOperator::LtEq, &value, &self.eval(high, ctx)?);
                let both = binary(&BinaryOperator::And, low, high)?;
                Ok(negate(both, *negated))
            }
            Expr::Like {
                negated,
                expr,
                pattern,
                ..
            } => self.like(expr, pattern, *negated, false, ctx),
            Expr::ILike {
                negated,
                expr,
                pattern,
                ..
            } => self.like(expr, pattern, *negated, true, ctx),
            Expr::AnyOp {
                left,
                compare_op,
                right,
            } => self.quantified(left, compare_op, right, true, ctx),
            Expr::AllOp {
                left,
                compare_op,
                right,
            } => self.quantified(left, compare_op, right, false, ctx),
            Expr::Function(func) => self.function(func, ctx),
            Expr::Case {
                operand,
                conditions,
                results,
                else_result,
            } => {
                let operand = match operand {
                    Some(op) => Some(self.eval(op, ctx)?),
                    None => None,
                };
                for (condition, result) in conditions.iter().zip(results) {
                    let cond = self.eval(condition, ctx)?;
                    let hit = match &operand {
                        Some(op) => op.sql_eq(&cond) == Some(true),
                        None => truth(&cond)? == Some(true),
                    };
                    if hit {
                        return self.eval(result, ctx);
                    }
                }
                match else_result {
                    Some(e) => self.eval(e, ctx),
                    None => Ok(Value::Null),
                }
            }
            Expr::Exists { subquery, negated } => {
                let result = self.query_in(subquery, Some(ctx))?;
                Ok(Value::Bool(result.rows.is_empty() == *negated))
            }
            Expr::Subquery(subquery) => {
                let result = self.query_in(subquery, Some(ctx))?;
                if result.rows.len() > 1 {
                    return Err(EvalError::InvalidValue(
                        "more than one row returned by a subquery used as an expression".into(),
                    ));
                }
                Ok(result
                    .rows
                    .into_iter()
                    .next()
                    .and_then(|row| row.into_iter().next())
                    .unwrap_or(Value::Null))
            }
            Expr::Array(array) => {
                let mut items = Vec::with_capacity(array.elem.len());
                for item in &array.elem {
                    items.push(self.eval(item, ctx)?);
                }
                Ok(Value::Array(items))
            }
            Expr::Tuple(items) if items.len() == 1 => self.eval(&items[0], ctx),
            other => Err(EvalError::Unsupported(format!("expression {other}"))),
        }
    }

    fn literal(&self, value: &SqlValue) -> Result<Value, EvalError> {
        match value {
            SqlValue::Number(text, _) => match text.parse::<i64>() {
                Ok(n) => Ok(Value::Int(n)),
                Err(_) => text
                    .parse::<f64>()
                    .map(Value::Float)
                    .map_err(|_| EvalError::InvalidValue(format!("invalid number {text}"))),
            },
            SqlValue::SingleQuotedString(s)
            | SqlValue::EscapedStringLiteral(s)
            | SqlValue::NationalStringLiteral(s)
            | SqlValue::DoubleQuotedString(s) => Ok(Value::Text(s.clone())),
            SqlValue::DollarQuotedString(s) => Ok(Value::Text(s.value.clone())),
            SqlValue::Boolean(b) => Ok(Value::Bool(*b)),
            SqlValue::Null => Ok(Value::Null),
            SqlValue::Placeholder(marker) => {
                let index = marker
                    .strip_prefix('$')
                    .and_then(|n| n.parse::<usize>().ok())
                    .ok_or_else(|| {
                        EvalError::Unsupported(format!("parameter marker {marker}"))
                    })?;
                index
                    .checked_sub(1)
                    .and_then(|i| self.params.get(i))
                    .cloned()
                    .ok_or(EvalError::MissingParameter(index))
            }
            other => Err(EvalError::Unsupported(format!("literal {other}"))),
        }
    }

    fn cast(&self, value: Value, data_type: &DataType) -> Result<Value, EvalError> {
        if is_regclass(data_type) {
            return match value {
                Value::Null => Ok(Value::Null),
                Value::Int(oid) => Ok(Value::Int(oid)),
                other => {
                    let name = other.to_string();
                    self.source
                        .regclass(&name)
                        .map(Value::Int)
                        .ok_or(EvalError::UnknownRelation(name))
                }
            };
        }
        cast_value(value, &data_type.to_string())
    }

    fn like(
        &self,
        expr: &Expr,
        pattern: &Expr,
        negated: bool,
        case_insensitive: bool,
        ctx: &RowContext<'_>,
    ) -> Result<Value, EvalError> {
        let value = self.eval(expr, ctx)?;
        let pattern = self.eval(pattern, ctx)?;
        match (value.to_text(), pattern.to_text()) {
            (Some(v), Some(p)) => Ok(Value::Bool(like_match(&v, &p, case_insensitive) != negated)),
            _ => Ok(Value::Null),
        }
    }

    fn quantified(
        &self,
        left: &Expr,
        op: &BinaryOperator,
        right: &Expr,
        any: bool,
        ctx: &RowContext<'_>,
    ) -> Result<Value, EvalError> {
        let needle = self.eval(left, ctx)?;
        let candidates = match right {
            Expr::Subquery(q) => self.subquery_column(q, ctx)?,
            other => match self.eval(other, ctx)? {
                Value::Null => return Ok(Value::Null),
                Value::Array(items) => items,
                Value::Vector(items) => items.into_iter().map(|f| Value::Float(f64::from(f))).collect(),
                Value::Text(text) => parse_array_text(&text),
                single => vec![single],
            },
        };
        let mut saw_null = false;
        for candidate in &candidates {
            match compare(op, &needle, candidate) {
                Value::Bool(b) if b == any => return Ok(Value::Bool(any)),
                Value::Null => saw_null = true,
                _ => {}
            }
        }
        Ok(if saw_null {
            Value::Null
        } else {
            Value::Bool(!any)
        })
    }

    fn subquery_column(&self, query: &Query, ctx: &RowContext<'_>) -> Result<Vec<Value>, EvalError> {
        let result = self.query_in(query, Some(ctx))?;
        if result.columns.len() != 1 {
            return Err(EvalError::InvalidValue(
                "subquery has too many columns".into(),
            ));
        }
        Ok(result
            .rows
            .into_iter()
            .filter_map(|row| row.into_iter().next())
            .collect())
    }

    fn function(&self, func: &Function, ctx: &RowContext<'_>) -> Result<Value, EvalError> {
        let name = function_name(func);
        if let Some(agg) = AggregateFunc::of(func) {
            return self.aggregate(agg, func, ctx);
        }
        let args = match &func.args {
            FunctionArguments::None => Vec::new(),
            FunctionArguments::Subquery(_) => {
                return Err(EvalError::Unsupported(format!("function {name} over a subquery")))
            }
            FunctionArguments::List(list) => {
                let mut values = Vec::with_capacity(list.args.len());
                // TO_VECTOR(x, FLOAT): the second argument names the element type.
                let arity = if name == "to_vector" { 1 } else { list.args.len() };
                for arg in list.args.iter().take(arity) {
                    match arg {
                        FunctionArg::Unnamed(FunctionArgExpr::Expr(e))
                        | FunctionArg::Named {
                            arg: FunctionArgExpr::Expr(e),
                            ..
                        } => values.push(self.eval(e, ctx)?),
                        other => {
                            return Err(EvalError::Unsupported(format!(
                                "argument {other} to {name}"
                            )))
                        }
                    }
                }
                values
            }
        };
        self.call_function(&name, &args)
    }

    pub(crate) fn call_function(&self, name: &str, args: &[Value]) -> Result<Value, EvalError> {
        let name = name.to_ascii_lowercase();
        if let Some(result) = call_builtin(&name, args) {
            return result;
        }
        if let Some(result) = self.source.call(&name, args) {
            return result;
        }
        Err(EvalError::UnknownFunction(format!("{name}()")))
    }

    fn aggregate(
        &self,
        agg: AggregateFunc,
        func: &Function,
        ctx: &RowContext<'_>,
    ) -> Result<Value, EvalError> {
        let group = ctx.group.ok_or_else(|| {
            EvalError::InvalidValue("aggregate functions are not allowed here".into())
        })?;
        let (arg, distinct) = match &func.args {
            FunctionArguments::List(list) => {
                let distinct = list.duplicate_treatment == Some(DuplicateTreatment::Distinct);
                let arg = match list.args.as_slice() {
                    [FunctionArg::Unnamed(FunctionArgExpr::Expr(e))] => Some(e),
                    _ if is_count_star(func) => None,
                    _ => {
                        return Err(EvalError::Unsupported(format!(
                            "aggregate call {func}"
                        )))
                    }
                };
                (arg, distinct)
            }
            _ => return Err(EvalError::Unsupported(format!("aggregate call {func}"))),
        };
        let mut values = Vec::with_capacity(group.len());
        for row in group {
            let row_ctx = RowContext {
                scope: ctx.scope,
                row,
                group: None,
                outer: ctx.outer,
            };
            if let Some(filter) = &func.filter {
                if truth(&self.eval(filter, &row_ctx)?)? != Some(true) {
                    continue;
                }
            }
            match arg {
                Some(e) => values.push(self.eval(e, &row_ctx)?),
                None => values.push(Value::Bool(true)),
            }
        }
        agg.compute(values, distinct)
    }
}

/// Lower-cased final name part; a `pg_catalog.` qualifier is ignored.
pub(crate) fn function_name(func: &Function) -> String {
    func.name
        .0
        .last()
        .map(|i| i.value.to_ascii_lowercase())
        .unwrap_or_default()
}

fn is_regclass(data_type: &DataType) -> bool {
    match data_type {
        DataType::Regclass => true,
        DataType::Custom(name, _) => name
            .0
            .last()
            .is_some_and(|i| i.value.eq_ignore_ascii_case("regclass")),
        _ => false,
    }
}

/// Converts `value` to the type named by `type_name` (any dialect spelling,
/// modifiers allowed).
pub fn cast_value(value: Value, type_name: &str) -> Result<Value, EvalError> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    let upper = type_name.trim().to_ascii_uppercase();
    if upper.ends_with("[]") {
        return Ok(match value {
            Value::Text(text) => Value::Array(parse_array_text(&text)),
            other => other,
        });
    }
    let base = upper
        .split(|c: char| c == '(' || c.is_whitespace())
        .next()
        .unwrap_or_default();
    let invalid = |v: &Value| EvalError::InvalidValue(format!("invalid input for type {type_name}: \"{v}\""));
    match base {
        "INT" | "INTEGER" | "INT2" | "INT4" | "INT8" | "SMALLINT" | "BIGINT" | "TINYINT" | "OID"
        | "SERIAL" | "BIGSERIAL" => match &value {
            Value::Float(f) => Ok(Value::Int(f.round() as i64)),
            v => v.as_i64().map(Value::Int).ok_or_else(|| invalid(v)),
        },
        "REAL" | "FLOAT" | "FLOAT4" | "FLOAT8" | "DOUBLE" | "NUMERIC" | "DECIMAL" => {
            value.as_f64().map(Value::Float).ok_or_else(|| invalid(&value))
        }
        "BOOL" | "BOOLEAN" | "BIT" => value.as_bool().map(Value::Bool).ok_or_else(|| invalid(&value)),
        "TEXT" | "VARCHAR" | "CHAR" | "CHARACTER" | "NAME" | "BPCHAR" | "STRING" | "NVARCHAR"
        | "LONGVARCHAR" => {
            Ok(Value::Text(value.to_string()))
        }
        "DATE" => match value {
            Value::Date(d) => Ok(Value::Date(d)),
            Value::Timestamp(ts) => Ok(Value::Date(ts.date())),
            other => NaiveDate::parse_from_str(other.to_string().trim(), "%Y-%m-%d")
                .map(Value::Date)
                .map_err(|_| invalid(&other)),
        },
        "TIME" => match value {
            Value::Time(t) => Ok(Value::Time(t)),
            other => NaiveTime::parse_from_str(other.to_string().trim(), "%H:%M:%S%.f")
                .map(Value::Time)
                .map_err(|_| invalid(&other)),
        },
        "TIMESTAMP" | "TIMESTAMPTZ" | "DATETIME" => match value {
            Value::Timestamp(ts) => Ok(Value::Timestamp(ts)),
            Value::Date(d) => Ok(Value::Timestamp(d.and_time(NaiveTime::MIN))),
            other => parse_timestamp(&other.to_string())
                .map(Value::Timestamp)
                .ok_or_else(|| invalid(&other)),
        },
        "VECTOR" => vector_arg(&value).map(Value::Vector),
        _ => Ok(value),
    }
}

fn parse_timestamp(text: &str) -> Option<chrono::NaiveDateTime> {
    let text = text.trim();
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| chrono::NaiveDateTime::parse_from_str(text, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .map(|d| d.and_time(NaiveTime::MIN))
        })
}

/// Splits PostgreSQL array text such as `{a,"b c",NULL}`.
fn parse_array_text(text: &str) -> Vec<Value> {
    let inner = text
        .trim()
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
        .unwrap_or(text);
    if inner.trim().is_empty() {
        return Vec::new();
    }
    inner
        .split(',')
        .map(|item| {
            let item = item.trim();
            if item.eq_ignore_ascii_case("NULL") {
                Value::Null
            } else {
                Value::Text(item.trim_matches('"').to_string())
            }
        })
        .collect()
}

fn truth(value: &Value) -> Result<Option<bool>, EvalError> {
    match value {
        Value::Null => Ok(None),
        v => v
            .as_bool()
            .map(Some)
            .ok_or_else(|| EvalError::InvalidValue(format!("argument of boolean test must be boolean, not \"{v}\""))),
    }
}

fn negate(value: Value, negated: bool) -> Value {
    match value {
        Value::Bool(b) if negated => Value::Bool(!b),
        other => other,
    }
}

fn not_distinct(a: &Value, b: &Value) -> bool {
    match (a.is_null(), b.is_null()) {
        (true, true) => true,
        (false, false) => a.compare(b) == Ordering::Equal,
        _ => false,
    }
}

fn membership(needle: &Value, candidates: &[Value]) -> Value {
    if needle.is_null() {
        return Value::Null;
    }
    let mut saw_null = false;
    for candidate in candidates {
        match needle.sql_eq(candidate) {
            Some(true) => return Value::Bool(true),
            None => saw_null = true,
            Some(false) => {}
        }
    }
    if saw_null {
        Value::Null
    } else {
        Value::Bool(false)
    }
}

fn compare(op: &BinaryOperator, a: &Value, b: &Value) -> Value {
    if a.is_null() || b.is_null() {
        return Value::Null;
    }
    let ord = a.compare(b);
    let result = match op {
        BinaryOperator::Eq => ord == Ordering::Equal,
        BinaryOperator::NotEq => ord != Ordering::Equal,
        BinaryOperator::Lt => ord == Ordering::Less,
        BinaryOperator::LtEq => ord != Ordering::Greater,
        BinaryOperator::Gt => ord == Ordering::Greater,
        BinaryOperator::GtEq => ord != Ordering::Less,
        _ => return Value::Null,
    };
    Value::Bool(result)
}

fn unary(op: &UnaryOperator, value: Value) -> Result<Value, EvalError> {
    match (op, value) {
        (_, Value::Null) => Ok(Value::Null),
        (UnaryOperator::Not, v) => Ok(match truth(&v)? {
            Some(b) => Value::Bool(!b),
            None => Value::Null,
        }),
        (UnaryOperator::Plus, v) => Ok(v),
        (UnaryOperator::Minus, Value::Int(n)) => n
            .checked_neg()
            .map(Value::Int)
            .ok_or_else(|| EvalError::InvalidValue("bigint out of range".into())),
        (UnaryOperator::Minus, v) => v
            .as_f64()
            .map(|f| Value::Float(-f))
            .ok_or_else(|| EvalError::InvalidValue(format!("invalid numeric input \"{v}\""))),
        (op, _) => Err(EvalError::Unsupported(format!("operator {op}"))),
    }
}

pub(crate) fn binary(op: &BinaryOperator, l: Value, r: Value) -> Result<Value, EvalError> {
    match op {
        BinaryOperator::Eq
        | BinaryOperator::NotEq
        | BinaryOperator::Lt
        | BinaryOperator::LtEq
        | BinaryOperator::Gt
        | BinaryOperator::GtEq => Ok(compare(op, &l, &r)),
        BinaryOperator::And | BinaryOperator::Or => {
            let (a, b) = (truth(&l)?, truth(&r)?);
            let and = matches!(op, BinaryOperator::And);
            Ok(match (a, b) {
                (Some(x), Some(y)) => Value::Bool(if and { x && y } else { x || y }),
                (Some(false), None) | (None, Some(false)) if and => Value::Bool(false),
                (Some(true), None) | (None, Some(true)) if !and => Value::Bool(true),
                _ => Value::Null,
            })
        }
        BinaryOperator::StringConcat => match (l.to_text(), r.to_text()) {
            (Some(a), Some(b)) => Ok(Value::Text(a + &b)),
            _ => Ok(Value::Null),
        },
        BinaryOperator::Plus
        | BinaryOperator::Minus
        | BinaryOperator::Multiply
        | BinaryOperator::Divide
        | BinaryOperator::Modulo => arithmetic(op, l, r),
        other => Err(EvalError::Unsupported(format!("operator {other}"))),
    }
}

fn arithmetic(op: &BinaryOperator, l: Value, r: Value) -> Result<Value, EvalError> {
    if l.is_null() || r.is_null() {
        return Ok(Value::Null);
    }
    let overflow = || EvalError::InvalidValue("bigint out of range".into());
    if let (Value::Int(a), Value::Int(b)) = (&l, &r) {
        let (a, b) = (*a, *b);
        let result = match op {
            BinaryOperator::Plus => a.checked_add(b).ok_or_else(overflow)?,
            BinaryOperator::Minus => a.checked_sub(b).ok_or_else(overflow)?,
            BinaryOperator::Multiply => a.checked_mul(b).ok_or_else(overflow)?,
            BinaryOperator::Divide => {
                if b == 0 {
                    return Err(EvalError::DivisionByZero);
                }
                a.checked_div(b).ok_or_else(overflow)?
            }
            _ => {
                if b == 0 {
                    return Err(EvalError::DivisionByZero);
                }
                a.checked_rem(b).ok_or_else(overflow)?
            }
        };
        return Ok(Value::Int(result));
    }
    let numeric = |v: &Value| {
        v.as_f64()
            .ok_or_else(|| EvalError::InvalidValue(format!("invalid numeric input \"{v}\"")))
    };
    let (a, b) = (numeric(&l)?, numeric(&r)?);
    let result = match op {
        BinaryOperator::Plus => a + b,
        BinaryOperator::Minus => a - b,
        BinaryOperator::Multiply => a * b,
        BinaryOperator::Divide => {
            if b == 0.0 {
                return Err(EvalError::DivisionByZero);
            }
            a / b
        }
        _ => {
            if b == 0.0 {
                return Err(EvalError::DivisionByZero);
            }
            a % b
        }
    };
    Ok(Value::Float(result))
}
