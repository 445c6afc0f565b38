use super::aggregate::{contains_aggregate, projection_has_aggregate};
use super::expr::function_name;
use super::scope::{RowContext, Scope};
use super::{EvalError, Evaluator};
use pgbridge_core::{Column, ResultSet, Row, Value};
use sqlparser::ast::{
    BinaryOperator, DataType, Distinct, Expr, GroupByExpr, JoinConstraint, JoinOperator,
    OrderByExpr, Query, Select, SelectItem, SetExpr, SetOperator, SetQuantifier, TableAlias,
    TableFactor, TableWithJoins, UnaryOperator, Value as SqlValue, Values,
};
use std::cmp::Ordering;

/// Rows plus the scope describing their columns.
struct Relation {
    scope: Scope,
    rows: Vec<Row>,
}

impl Relation {
    /// One empty row: the input of a SELECT without FROM.
    fn unit() -> Self {
        Self {
            scope: Scope::default(),
            rows: vec![Vec::new()],
        }
    }

    fn from_result(result: ResultSet, qualifier: &str) -> Self {
        Self {
            scope: Scope::for_relation(Some(qualifier), &result.columns),
            rows: result.rows,
        }
    }

    fn cross(self, other: Relation) -> Relation {
        let mut rows = Vec::with_capacity(self.rows.len() * other.rows.len());
        for left in &self.rows {
            for right in &other.rows {
                rows.push(concat(left, right));
            }
        }
        Relation {
            scope: self.scope.join(&other.scope),
            rows,
        }
    }
}

fn concat(left: &[Value], right: &[Value]) -> Row {
    let mut row = Vec::with_capacity(left.len() + right.len());
    row.extend_from_slice(left);
    row.extend_from_slice(right);
    row
}

enum OutputSource<'q> {
    Column(usize),
    Expr(&'q Expr),
}

struct OutputItem<'q> {
    name: String,
    source: OutputSource<'q>,
    type_hint: Option<String>,
}

/// Projected row with its ORDER BY keys.
type Produced = (Row, Vec<Value>);

impl<'a> Evaluator<'a> {
    pub(crate) fn query_in(
        &self,
        query: &Query,
        outer: Option<&RowContext<'_>>,
    ) -> Result<ResultSet, EvalError> {
        if query.with.is_some() {
            return Err(EvalError::Unsupported("WITH".into()));
        }
        let mut result = match query.body.as_ref() {
            SetExpr::Select(select) => self.select(select, &query.order_by, outer)?,
            body => {
                let mut result = self.set_expr(body, outer)?;
                self.order_output(&mut result, &query.order_by)?;
                result
            }
        };
        if let Some(offset) = &query.offset {
            let skip = self.row_count(&offset.value)?.unwrap_or(0);
            result.rows.drain(..skip.min(result.rows.len()));
        }
        if let Some(limit) = &query.limit {
            if let Some(n) = self.row_count(limit)? {
                result.rows.truncate(n);
            }
        }
        Ok(result)
    }

    fn row_count(&self, expr: &Expr) -> Result<Option<usize>, EvalError> {
        match self.eval_const(expr)? {
            Value::Null => Ok(None),
            v => v
                .as_i64()
                .filter(|n| *n >= 0)
                .map(|n| Some(n as usize))
                .ok_or_else(|| EvalError::InvalidValue(format!("invalid row count \"{v}\""))),
        }
    }

    fn set_expr(
        &self,
        body: &SetExpr,
        outer: Option<&RowContext<'_>>,
    ) -> Result<ResultSet, EvalError> {
        match body {
            SetExpr::Select(select) => self.select(select, &[], outer),
            SetExpr::Query(query) => self.query_in(query, outer),
            SetExpr::Values(values) => self.values(values, outer),
            SetExpr::SetOperation {
                op,
                set_quantifier,
                left,
                right,
            } => {
                let left = self.set_expr(left, outer)?;
                let right = self.set_expr(right, outer)?;
                set_operation(*op, *set_quantifier, left, right)
            }
            other => Err(EvalError::Unsupported(format!("query body {other}"))),
        }
    }

    fn values(
        &self,
        values: &Values,
        outer: Option<&RowContext<'_>>,
    ) -> Result<ResultSet, EvalError> {
        let scope = Scope::default();
        let ctx = RowContext {
            scope: &scope,
            row: &[],
            group: None,
            outer,
        };
        let mut rows = Vec::with_capacity(values.rows.len());
        for exprs in &values.rows {
            let mut row = Vec::with_capacity(exprs.len());
            for expr in exprs {
                row.push(self.eval(expr, &ctx)?);
            }
            rows.push(row);
        }
        let width = rows.first().map(Vec::len).unwrap_or(0);
        let columns = (0..width)
            .map(|idx| Column::new(format!("column{}", idx + 1), infer_type(&rows, idx)))
            .collect();
        Ok(ResultSet::new(columns, rows))
    }

    fn select(
        &self,
        select: &Select,
        order_by: &[OrderByExpr],
        outer: Option<&RowContext<'_>>,
    ) -> Result<ResultSet, EvalError> {
        if matches!(select.distinct, Some(Distinct::On(_))) {
            return Err(EvalError::Unsupported("DISTINCT ON".into()));
        }
        if select.into.is_some() {
            return Err(EvalError::Unsupported("SELECT INTO".into()));
        }
        let source = if select.from.is_empty() {
            Relation::unit()
        } else {
            self.from_clause(&select.from, outer)?
        };
        let scope = source.scope;
        let mut rows = Vec::with_capacity(source.rows.len());
        for row in source.rows {
            if let Some(predicate) = &select.selection {
                let ctx = RowContext {
                    scope: &scope,
                    row: &row,
                    group: None,
                    outer,
                };
                if !is_true(&self.eval(predicate, &ctx)?) {
                    continue;
                }
            }
            rows.push(row);
        }

        let items = output_items(&select.projection, &scope)?;
        let group_exprs: &[Expr] = match &select.group_by {
            GroupByExpr::Expressions(exprs) => exprs,
            GroupByExpr::All => return Err(EvalError::Unsupported("GROUP BY ALL".into())),
        };
        let grouped = !group_exprs.is_empty()
            || select.having.is_some()
            || projection_has_aggregate(&select.projection)
            || order_by.iter().any(|o| contains_aggregate(&o.expr));

        let mut produced: Vec<Produced> = Vec::new();
        if grouped {
            for group in self.group_rows(rows, group_exprs, &items, &scope, outer)? {
                let representative = group.first().cloned().unwrap_or_else(|| scope.null_row());
                let ctx = RowContext {
                    scope: &scope,
                    row: &representative,
                    group: Some(group.as_slice()),
                    outer,
                };
                if let Some(having) = &select.having {
                    if !is_true(&self.eval(having, &ctx)?) {
                        continue;
                    }
                }
                let row = self.project(&items, &ctx)?;
                let keys = self.sort_keys(order_by, &items, &row, &ctx)?;
                produced.push((row, keys));
            }
        } else {
            for source_row in &rows {
                let ctx = RowContext {
                    scope: &scope,
                    row: source_row,
                    group: None,
                    outer,
                };
                let row = self.project(&items, &ctx)?;
                let keys = self.sort_keys(order_by, &items, &row, &ctx)?;
                produced.push((row, keys));
            }
        }

        if matches!(select.distinct, Some(Distinct::Distinct)) {
            let mut unique: Vec<Produced> = Vec::with_capacity(produced.len());
            for entry in produced {
                if !unique.iter().any(|(row, _)| rows_equal(row, &entry.0)) {
                    unique.push(entry);
                }
            }
            produced = unique;
        }
        if !order_by.is_empty() {
            produced.sort_by(|a, b| compare_keys(&a.1, &b.1, order_by));
        }

        let rows: Vec<Row> = produced.into_iter().map(|(row, _)| row).collect();
        let columns = items
            .iter()
            .enumerate()
            .map(|(idx, item)| {
                let type_name = item
                    .type_hint
                    .clone()
                    .unwrap_or_else(|| infer_type(&rows, idx));
                Column::new(item.name.clone(), type_name)
            })
            .collect();
        Ok(ResultSet::new(columns, rows))
    }

    fn project(&self, items: &[OutputItem<'_>], ctx: &RowContext<'_>) -> Result<Row, EvalError> {
        let mut row = Vec::with_capacity(items.len());
        for item in items {
            row.push(self.item_value(item, ctx)?);
        }
        Ok(row)
    }

    fn item_value(&self, item: &OutputItem<'_>, ctx: &RowContext<'_>) -> Result<Value, EvalError> {
        match item.source {
            OutputSource::Column(idx) => Ok(ctx.row.get(idx).cloned().unwrap_or(Value::Null)),
            OutputSource::Expr(expr) => self.eval(expr, ctx),
        }
    }

    /// Splits rows by the GROUP BY key. Without GROUP BY the whole input is
    /// one group, even when empty.
    fn group_rows(
        &self,
        rows: Vec<Row>,
        group_exprs: &[Expr],
        items: &[OutputItem<'_>],
        scope: &Scope,
        outer: Option<&RowContext<'_>>,
    ) -> Result<Vec<Vec<Row>>, EvalError> {
        if group_exprs.is_empty() {
            return Ok(vec![rows]);
        }
        let mut groups: Vec<(Row, Vec<Row>)> = Vec::new();
        for row in rows {
            let ctx = RowContext {
                scope,
                row: &row,
                group: None,
                outer,
            };
            let mut key = Vec::with_capacity(group_exprs.len());
            for expr in group_exprs {
                let value = match group_output_index(expr, items, scope) {
                    Some(idx) => self.item_value(&items[idx], &ctx)?,
                    None => self.eval(expr, &ctx)?,
                };
                key.push(value);
            }
            match groups.iter_mut().find(|(k, _)| rows_equal(k, &key)) {
                Some((_, members)) => members.push(row),
                None => groups.push((key, vec![row])),
            }
        }
        Ok(groups.into_iter().map(|(_, members)| members).collect())
    }

    fn sort_keys(
        &self,
        order_by: &[OrderByExpr],
        items: &[OutputItem<'_>],
        projected: &[Value],
        ctx: &RowContext<'_>,
    ) -> Result<Vec<Value>, EvalError> {
        let mut keys = Vec::with_capacity(order_by.len());
        for spec in order_by {
            match order_output_index(&spec.expr, items)? {
                Some(idx) => keys.push(projected[idx].clone()),
                None => keys.push(self.eval(&spec.expr, ctx)?),
            }
        }
        Ok(keys)
    }

    /// ORDER BY over a set operation: only output columns are visible.
    fn order_output(
        &self,
        result: &mut ResultSet,
        order_by: &[OrderByExpr],
    ) -> Result<(), EvalError> {
        if order_by.is_empty() {
            return Ok(());
        }
        let scope = Scope::for_relation(None, &result.columns);
        let mut keyed = Vec::with_capacity(result.rows.len());
        for row in result.rows.drain(..) {
            let mut keys = Vec::with_capacity(order_by.len());
            for spec in order_by {
                let key = match position(&spec.expr) {
                    Some(idx) if idx < row.len() => row[idx].clone(),
                    Some(_) => {
                        return Err(EvalError::InvalidValue(format!(
                            "ORDER BY position {} is not in select list",
                            spec.expr
                        )))
                    }
                    None => self.eval_row(&spec.expr, &scope, &row)?,
                };
                keys.push(key);
            }
            keyed.push((row, keys));
        }
        keyed.sort_by(|a, b| compare_keys(&a.1, &b.1, order_by));
        result.rows = keyed.into_iter().map(|(row, _)| row).collect();
        Ok(())
    }

    fn from_clause(
        &self,
        from: &[TableWithJoins],
        outer: Option<&RowContext<'_>>,
    ) -> Result<Relation, EvalError> {
        let mut relation: Option<Relation> = None;
        for table in from {
            let next = self.table_with_joins(table, outer)?;
            relation = Some(match relation {
                Some(current) => current.cross(next),
                None => next,
            });
        }
        Ok(relation.unwrap_or_else(Relation::unit))
    }

    fn table_with_joins(
        &self,
        table: &TableWithJoins,
        outer: Option<&RowContext<'_>>,
    ) -> Result<Relation, EvalError> {
        let mut left = self.table_factor(&table.relation, outer)?;
        for join in &table.joins {
            let right = self.table_factor(&join.relation, outer)?;
            left = match &join.join_operator {
                JoinOperator::CrossJoin => left.cross(right),
                JoinOperator::Inner(c) => self.join(left, right, c, JoinSide::Inner, outer)?,
                JoinOperator::LeftOuter(c) => self.join(left, right, c, JoinSide::Left, outer)?,
                JoinOperator::RightOuter(c) => self.join(left, right, c, JoinSide::Right, outer)?,
                JoinOperator::FullOuter(c) => self.join(left, right, c, JoinSide::Full, outer)?,
                other => return Err(EvalError::Unsupported(format!("join {other:?}"))),
            };
        }
        Ok(left)
    }

    fn table_factor(
        &self,
        factor: &TableFactor,
        outer: Option<&RowContext<'_>>,
    ) -> Result<Relation, EvalError> {
        match factor {
            TableFactor::Table {
                name, alias, args, ..
            } => {
                if args.is_some() {
                    return Err(EvalError::Unsupported(format!("table function {name}")));
                }
                let parts: Vec<String> = name.0.iter().map(|i| i.value.clone()).collect();
                let result = self.source.relation(&parts)?;
                let default_name = parts.last().cloned().unwrap_or_default();
                aliased(result, alias.as_ref(), &default_name)
            }
            TableFactor::Derived {
                lateral,
                subquery,
                alias,
            } => {
                if *lateral {
                    return Err(EvalError::Unsupported("LATERAL".into()));
                }
                let result = self.query_in(subquery, outer)?;
                aliased(result, alias.as_ref(), "subquery")
            }
            TableFactor::NestedJoin {
                table_with_joins,
                alias,
            } => {
                let relation = self.table_with_joins(table_with_joins, outer)?;
                Ok(match alias {
                    Some(alias) => Relation {
                        scope: relation.scope.requalify(&alias.name.value),
                        rows: relation.rows,
                    },
                    None => relation,
                })
            }
            other => Err(EvalError::Unsupported(format!("FROM item {other}"))),
        }
    }

    fn join(
        &self,
        left: Relation,
        right: Relation,
        constraint: &JoinConstraint,
        side: JoinSide,
        outer: Option<&RowContext<'_>>,
    ) -> Result<Relation, EvalError> {
        let using: Vec<String> = match constraint {
            JoinConstraint::Using(idents) => idents.iter().map(|i| i.value.clone()).collect(),
            JoinConstraint::Natural => left
                .scope
                .columns
                .iter()
                .filter(|l| !l.hidden)
                .filter(|l| {
                    right
                        .scope
                        .columns
                        .iter()
                        .any(|r| !r.hidden && r.name.eq_ignore_ascii_case(&l.name))
                })
                .map(|l| l.name.clone())
                .collect(),
            _ => Vec::new(),
        };
        let mut pairs = Vec::with_capacity(using.len());
        for name in &using {
            let parts = [name.clone()];
            let l = left
                .scope
                .resolve(&parts)?
                .ok_or_else(|| EvalError::UnknownColumn(name.clone()))?;
            let r = right
                .scope
                .resolve(&parts)?
                .ok_or_else(|| EvalError::UnknownColumn(name.clone()))?;
            pairs.push((l, r));
        }

        let mut scope = left.scope.join(&right.scope);
        let offset = left.scope.len();
        for (_, r) in &pairs {
            scope.columns[offset + r].hidden = true;
        }

        let left_null = left.scope.null_row();
        let right_null = right.scope.null_row();
        let mut right_matched = vec![false; right.rows.len()];
        let mut rows = Vec::new();
        for l in &left.rows {
            let mut matched = false;
            for (ri, r) in right.rows.iter().enumerate() {
                let hit = match constraint {
                    JoinConstraint::On(expr) => {
                        let combined = concat(l, r);
                        let ctx = RowContext {
                            scope: &scope,
                            row: &combined,
                            group: None,
                            outer,
                        };
                        is_true(&self.eval(expr, &ctx)?)
                    }
                    _ => pairs
                        .iter()
                        .all(|(li, rj)| l[*li].sql_eq(&r[*rj]) == Some(true)),
                };
                if hit {
                    matched = true;
                    right_matched[ri] = true;
                    rows.push(concat(l, r));
                }
            }
            if !matched && matches!(side, JoinSide::Left | JoinSide::Full) {
                rows.push(concat(l, &right_null));
            }
        }
        if matches!(side, JoinSide::Right | JoinSide::Full) {
            for (ri, r) in right.rows.iter().enumerate() {
                if right_matched[ri] {
                    continue;
                }
                let mut row = concat(&left_null, r);
                // Unqualified USING columns read the left copy.
                for (li, rj) in &pairs {
                    row[*li] = r[*rj].clone();
                }
                rows.push(row);
            }
        }
        Ok(Relation { scope, rows })
    }
}

#[derive(Debug, Clone, Copy)]
enum JoinSide {
    Inner,
    Left,
    Right,
    Full,
}

fn aliased(
    result: ResultSet,
    alias: Option<&TableAlias>,
    default_name: &str,
) -> Result<Relation, EvalError> {
    let Some(alias) = alias else {
        return Ok(Relation::from_result(result, default_name));
    };
    let mut result = result;
    if !alias.columns.is_empty() {
        if alias.columns.len() > result.columns.len() {
            return Err(EvalError::InvalidValue(format!(
                "table \"{}\" has {} columns available but {} columns specified",
                alias.name.value,
                result.columns.len(),
                alias.columns.len()
            )));
        }
        for (column, name) in result.columns.iter_mut().zip(&alias.columns) {
            column.name = name.value.clone();
        }
    }
    Ok(Relation::from_result(result, &alias.name.value))
}

fn output_items<'q>(
    projection: &'q [SelectItem],
    scope: &Scope,
) -> Result<Vec<OutputItem<'q>>, EvalError> {
    let mut items = Vec::new();
    for item in projection {
        match item {
            SelectItem::Wildcard(_) => {
                for (idx, column) in scope.columns.iter().enumerate() {
                    if column.hidden {
                        continue;
                    }
                    items.push(OutputItem {
                        name: column.name.clone(),
                        source: OutputSource::Column(idx),
                        type_hint: Some(column.type_name.clone()),
                    });
                }
            }
            SelectItem::QualifiedWildcard(name, _) => {
                let qualifier = name.0.last().map(|i| i.value.as_str()).unwrap_or_default();
                let before = items.len();
                for (idx, column) in scope.columns.iter().enumerate() {
                    let matches = column
                        .qualifier
                        .as_deref()
                        .is_some_and(|q| q.eq_ignore_ascii_case(qualifier));
                    if matches {
                        items.push(OutputItem {
                            name: column.name.clone(),
                            source: OutputSource::Column(idx),
                            type_hint: Some(column.type_name.clone()),
                        });
                    }
                }
                if items.len() == before {
                    return Err(EvalError::UnknownRelation(name.to_string()));
                }
            }
            SelectItem::UnnamedExpr(expr) => items.push(OutputItem {
                name: output_name(expr, scope),
                source: OutputSource::Expr(expr),
                type_hint: static_type(expr, scope),
            }),
            SelectItem::ExprWithAlias { expr, alias } => items.push(OutputItem {
                name: alias.value.clone(),
                source: OutputSource::Expr(expr),
                type_hint: static_type(expr, scope),
            }),
        }
    }
    Ok(items)
}

fn column_parts(expr: &Expr) -> Option<Vec<String>> {
    match expr {
        Expr::Identifier(ident) => Some(vec![ident.value.clone()]),
        Expr::CompoundIdentifier(idents) => Some(idents.iter().map(|i| i.value.clone()).collect()),
        _ => None,
    }
}

/// Column name a client sees for an unaliased select-list expression.
fn output_name(expr: &Expr, scope: &Scope) -> String {
    figure_name(expr, scope).0
}

/// Name plus how strongly it binds: column and function names (2) win over
/// type names (1), which win over `?column?` (0).
fn figure_name(expr: &Expr, scope: &Scope) -> (String, u8) {
    if let Some(parts) = column_parts(expr) {
        let name = match scope.resolve(&parts) {
            Ok(Some(idx)) => scope.columns[idx].name.clone(),
            _ => parts.last().cloned().unwrap_or_default(),
        };
        return (name, 2);
    }
    match expr {
        Expr::Function(func) => (function_name(func), 2),
        Expr::Nested(inner) => figure_name(inner, scope),
        Expr::Cast {
            expr, data_type, ..
        } => match figure_name(expr, scope) {
            (name, 2) => (name, 2),
            _ => (type_word(data_type), 1),
        },
        Expr::TypedString { data_type, .. } => (type_word(data_type), 1),
        Expr::Case { .. } => ("case".into(), 1),
        Expr::Exists { .. } => ("exists".into(), 2),
        Expr::Array(_) => ("array".into(), 2),
        _ => ("?column?".into(), 0),
    }
}

fn type_word(data_type: &DataType) -> String {
    data_type
        .to_string()
        .split(|c: char| c == '(' || c.is_whitespace())
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase()
}

/// Backend-style type name derivable without evaluating `expr`.
fn static_type(expr: &Expr, scope: &Scope) -> Option<String> {
    if let Some(parts) = column_parts(expr) {
        return match scope.resolve(&parts) {
            Ok(Some(idx)) => Some(scope.columns[idx].type_name.clone()),
            _ => None,
        };
    }
    match expr {
        Expr::Nested(inner) => static_type(inner, scope),
        Expr::Cast { data_type, .. } | Expr::TypedString { data_type, .. } => {
            Some(data_type.to_string().to_ascii_uppercase())
        }
        Expr::Function(func) => match function_name(func).as_str() {
            "count" => Some("BIGINT".into()),
            "vector_cosine" | "vector_l2" | "vector_dot_product" => Some("DOUBLE".into()),
            "to_vector" => Some("VECTOR".into()),
            _ => None,
        },
        Expr::Value(SqlValue::Number(text, _)) => Some(
            if text.contains(|c: char| matches!(c, '.' | 'e' | 'E')) {
                "NUMERIC"
            } else if text.parse::<i32>().is_ok() {
                "INTEGER"
            } else {
                "BIGINT"
            }
            .into(),
        ),
        Expr::Value(SqlValue::SingleQuotedString(_)) => Some("VARCHAR".into()),
        Expr::Value(SqlValue::Boolean(_)) => Some("BIT".into()),
        Expr::BinaryOp { left, op, right } => match op {
            BinaryOperator::Plus
            | BinaryOperator::Minus
            | BinaryOperator::Multiply
            | BinaryOperator::Divide => {
                let sides = [static_type(left, scope), static_type(right, scope)];
                sides
                    .iter()
                    .flatten()
                    .any(|t| t == "DOUBLE")
                    .then(|| "DOUBLE".into())
            }
            BinaryOperator::Eq
            | BinaryOperator::NotEq
            | BinaryOperator::Lt
            | BinaryOperator::LtEq
            | BinaryOperator::Gt
            | BinaryOperator::GtEq
            | BinaryOperator::And
            | BinaryOperator::Or => Some("BIT".into()),
            BinaryOperator::StringConcat => Some("VARCHAR".into()),
            _ => None,
        },
        Expr::UnaryOp {
            op: UnaryOperator::Not,
            ..
        }
        | Expr::IsNull(_)
        | Expr::IsNotNull(_)
        | Expr::IsTrue(_)
        | Expr::IsFalse(_)
        | Expr::IsDistinctFrom(..)
        | Expr::IsNotDistinctFrom(..)
        | Expr::InList { .. }
        | Expr::InSubquery { .. }
        | Expr::Between { .. }
        | Expr::Like { .. }
        | Expr::ILike { .. }
        | Expr::AnyOp { .. }
        | Expr::AllOp { .. }
        | Expr::Exists { .. } => Some("BIT".into()),
        _ => None,
    }
}

/// Type name from the first non-null value in column `idx`.
fn infer_type(rows: &[Row], idx: usize) -> String {
    let sample = rows
        .iter()
        .filter_map(|row| row.get(idx))
        .find(|v| !v.is_null());
    match sample {
        Some(Value::Int(_)) => "BIGINT".into(),
        Some(Value::Float(_)) => "DOUBLE".into(),
        Some(Value::Bool(_)) => "BIT".into(),
        Some(Value::Bytes(_)) => "VARBINARY".into(),
        Some(Value::Date(_)) => "DATE".into(),
        Some(Value::Time(_)) => "TIME".into(),
        Some(Value::Timestamp(_)) => "TIMESTAMP".into(),
        Some(Value::Vector(_)) => "VECTOR".into(),
        Some(Value::Array(items)) => match items.iter().find(|v| !v.is_null()) {
            Some(Value::Int(_)) => "BIGINT[]".into(),
            Some(Value::Float(_)) => "DOUBLE[]".into(),
            Some(Value::Bool(_)) => "BIT[]".into(),
            _ => "VARCHAR[]".into(),
        },
        _ => "VARCHAR".into(),
    }
}

fn position(expr: &Expr) -> Option<usize> {
    match expr {
        Expr::Value(SqlValue::Number(text, _)) => {
            text.parse::<usize>().ok().and_then(|n| n.checked_sub(1))
        }
        _ => None,
    }
}

/// ORDER BY prefers output columns: positions and bare output names.
fn order_output_index(expr: &Expr, items: &[OutputItem<'_>]) -> Result<Option<usize>, EvalError> {
    if let Some(idx) = position(expr) {
        return if idx < items.len() {
            Ok(Some(idx))
        } else {
            Err(EvalError::InvalidValue(format!(
                "ORDER BY position {expr} is not in select list"
            )))
        };
    }
    if let Expr::Identifier(ident) = expr {
        return Ok(items
            .iter()
            .position(|item| item.name.eq_ignore_ascii_case(&ident.value)));
    }
    Ok(None)
}

/// GROUP BY prefers input columns; output names are a fallback.
fn group_output_index(expr: &Expr, items: &[OutputItem<'_>], scope: &Scope) -> Option<usize> {
    if let Some(idx) = position(expr) {
        return (idx < items.len()).then_some(idx);
    }
    match expr {
        Expr::Identifier(ident) if matches!(scope.resolve(&[ident.value.clone()]), Ok(None)) => {
            items
                .iter()
                .position(|item| item.name.eq_ignore_ascii_case(&ident.value))
        }
        _ => None,
    }
}

fn is_true(value: &Value) -> bool {
    value.as_bool() == Some(true)
}

fn rows_equal(a: &[Value], b: &[Value]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.compare(y) == Ordering::Equal)
}

fn compare_keys(a: &[Value], b: &[Value], order_by: &[OrderByExpr]) -> Ordering {
    for ((x, y), spec) in a.iter().zip(b).zip(order_by) {
        let asc = spec.asc.unwrap_or(true);
        let nulls_first = spec.nulls_first.unwrap_or(!asc);
        let ord = match (x.is_null(), y.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => {
                if nulls_first {
                    Ordering::Less
                } else {
                    Ordering::Greater
                }
            }
            (false, true) => {
                if nulls_first {
                    Ordering::Greater
                } else {
                    Ordering::Less
                }
            }
            (false, false) => {
                let ord = x.compare(y);
                if asc {
                    ord
                } else {
                    ord.reverse()
                }
            }
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn set_operation(
    op: SetOperator,
    quantifier: SetQuantifier,
    left: ResultSet,
    right: ResultSet,
) -> Result<ResultSet, EvalError> {
    if left.columns.len() != right.columns.len() {
        return Err(EvalError::InvalidValue(format!(
            "each {op} query must have the same number of columns"
        )));
    }
    let all = matches!(quantifier, SetQuantifier::All | SetQuantifier::AllByName);
    let columns = left.columns;
    let mut rows = match op {
        SetOperator::Union => {
            let mut rows = left.rows;
            rows.extend(right.rows);
            rows
        }
        SetOperator::Intersect | SetOperator::Except => {
            let keep_present = matches!(op, SetOperator::Intersect);
            let mut remaining = right.rows;
            let mut rows = Vec::new();
            for row in left.rows {
                let found = remaining.iter().position(|r| rows_equal(r, &row));
                if let (Some(idx), true) = (found, all) {
                    remaining.swap_remove(idx);
                }
                if found.is_some() == keep_present {
                    rows.push(row);
                }
            }
            rows
        }
    };
    if !all {
        let mut unique: Vec<Row> = Vec::with_capacity(rows.len());
        for row in rows {
            if !unique.iter().any(|u| rows_equal(u, &row)) {
                unique.push(row);
            }
        }
        rows = unique;
    }
    Ok(ResultSet::new(columns, rows))
}
