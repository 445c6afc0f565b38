use crate::catalog::{
    backend_type, qualified_name, table_key, ColumnDef, Constraint, Database, Reference, Table,
    TableKey,
};
use crate::constraints::{check_row, check_unreferenced, coerce_row};
use crate::error::EngineError;
use crate::information_schema;
use crate::source::Reader;
use crate::transaction::{Transaction, Undo, UndoLog};
use pgbridge_bridge::RawOutcome;
use pgbridge_core::{Column, Row, Value};
use pgbridge_sql::catalog::ConstraintKind;
use pgbridge_sql::engine::Scope;
use pgbridge_sql::lexer::{leading_words, render, tokenize, TokenKind};
use pgbridge_sql::Evaluator;
use sqlparser::ast::{
    Assignment, ColumnOption, Expr, FromTable, Ident, Insert, ObjectName, ObjectType, Query,
    SetExpr, Statement, TableConstraint, TableFactor, TableWithJoins, ViewColumnDef,
};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// Per-connection state: the open transaction, if any.
#[derive(Debug, Default)]
pub struct Session {
    tx: Option<Transaction>,
}

impl Session {
    pub fn in_transaction(&self) -> bool {
        self.tx.is_some()
    }

    /// Rolls back whatever the connection left open.
    pub fn abandon(&mut self, db: &mut Database) {
        if let Some(mut tx) = self.tx.take() {
            debug!(changes = tx.log.len(), "rolling back abandoned transaction");
            tx.log.revert_all(db);
        }
    }
}

/// Parses one backend-dialect statement. `?` markers become numbered
/// placeholders for the evaluator; the count is returned alongside.
fn prepare(sql: &str) -> Result<(Statement, usize), EngineError> {
    let mut tokens = tokenize(sql);
    if tokens.iter().all(|t| t.is_trivia()) {
        return Err(EngineError::Syntax("empty statement".into()));
    }
    if tokens.iter().any(|t| t.is_punct(';')) {
        return Err(EngineError::Syntax("unexpected ';'".into()));
    }
    if let Some(param) = tokens.iter().find(|t| t.kind == TokenKind::Param) {
        return Err(EngineError::Syntax(format!(
            "unexpected parameter marker {}",
            param.text
        )));
    }
    let words: Vec<String> = leading_words(&tokens, 4)
        .into_iter()
        .map(|(_, w)| w)
        .collect();
    match words.first().map(String::as_str) {
        Some(verb @ ("BEGIN" | "END" | "ABORT")) => {
            return Err(EngineError::Syntax(format!("unknown statement {verb}")));
        }
        Some("ROLLBACK") => {
            if let Some(pos) = words.iter().position(|w| w == "TO") {
                if words.get(pos + 1).map(String::as_str) != Some("SAVEPOINT") {
                    return Err(EngineError::Syntax("expected SAVEPOINT after TO".into()));
                }
            }
        }
        Some("RELEASE") if words.get(1).map(String::as_str) != Some("SAVEPOINT") => {
            return Err(EngineError::Syntax("expected SAVEPOINT after RELEASE".into()));
        }
        _ => {}
    }

    let mut markers = 0;
    for token in tokens.iter_mut().filter(|t| t.kind == TokenKind::Placeholder) {
        markers += 1;
        token.text = format!("${markers}");
    }
    let text = render(&tokens);
    let mut statements = Parser::parse_sql(&GenericDialect {}, &text)
        .map_err(|err| EngineError::Syntax(err.to_string()))?;
    match statements.len() {
        1 => Ok((statements.remove(0), markers)),
        _ => Err(EngineError::Syntax("expected a single statement".into())),
    }
}

/// Result columns of `sql` from a probe that reads no rows. Statements that
/// return no rows describe as no columns.
pub fn describe(db: &Database, sql: &str) -> Result<Vec<Column>, EngineError> {
    let (statement, markers) = prepare(sql)?;
    let Statement::Query(query) = statement else {
        return Ok(Vec::new());
    };
    let params = vec![Value::Null; markers];
    let reader = Reader::probe(db);
    Ok(Evaluator::new(&reader, &params).query(&query)?.columns)
}

fn idents(list: &[Ident]) -> Vec<String> {
    list.iter().map(|i| i.value.clone()).collect()
}

fn display_name(key: &TableKey, table: Option<&Table>) -> String {
    match table {
        Some(t) => format!("{}.{}", t.schema, t.name),
        None => format!("{}.{}", key.0, key.1),
    }
}

/// A constraint as declared, before names and references are resolved.
struct Declared {
    name: Option<String>,
    kind: ConstraintKind,
    columns: Vec<String>,
    references: Option<(ObjectName, Vec<String>)>,
}

/// Runs statements for one connection against the shared database.
pub struct Executor<'a> {
    db: &'a mut Database,
    session: &'a mut Session,
    interrupt: &'a AtomicBool,
}

impl<'a> Executor<'a> {
    pub fn new(db: &'a mut Database, session: &'a mut Session, interrupt: &'a AtomicBool) -> Self {
        Self {
            db,
            session,
            interrupt,
        }
    }

    /// Executes one statement. A failing statement leaves no trace; inside
    /// a transaction its changes join the transaction's undo log.
    pub fn execute(&mut self, sql: &str, params: &[Value]) -> Result<RawOutcome, EngineError> {
        let (statement, markers) = prepare(sql)?;
        if params.len() < markers {
            return Err(EngineError::ParameterCount {
                expected: markers,
                supplied: params.len(),
            });
        }
        self.check_interrupt()?;
        if let Some(outcome) = self.transaction_control(&statement)? {
            return Ok(outcome);
        }
        let mut log = UndoLog::default();
        let result = self
            .run(&statement, params, &mut log)
            .and_then(|outcome| self.check_interrupt().map(|_| outcome));
        match result {
            Ok(outcome) => {
                if let Some(tx) = self.session.tx.as_mut() {
                    tx.log.append(log);
                }
                Ok(outcome)
            }
            Err(err) => {
                log.revert_all(self.db);
                Err(err)
            }
        }
    }

    fn check_interrupt(&self) -> Result<(), EngineError> {
        if self.interrupt.load(Ordering::SeqCst) {
            Err(EngineError::Interrupted)
        } else {
            Ok(())
        }
    }

    fn transaction_control(&mut self, statement: &Statement) -> Result<Option<RawOutcome>, EngineError> {
        match statement {
            Statement::StartTransaction { .. } => {
                self.session.tx.get_or_insert_with(Transaction::default);
            }
            Statement::Commit { .. } => {
                if let Some(tx) = self.session.tx.take() {
                    debug!(changes = tx.log.len(), "transaction committed");
                }
            }
            Statement::Rollback {
                savepoint: None, ..
            } => self.session.abandon(self.db),
            Statement::Rollback {
                savepoint: Some(name),
                ..
            } => {
                let tx = self
                    .session
                    .tx
                    .as_mut()
                    .ok_or_else(|| EngineError::UnknownSavepoint(name.value.clone()))?;
                tx.rollback_to(self.db, &name.value)?;
            }
            Statement::Savepoint { name } => {
                self.session
                    .tx
                    .get_or_insert_with(Transaction::default)
                    .savepoint(&name.value);
            }
            Statement::ReleaseSavepoint { name } => {
                self.session
                    .tx
                    .as_mut()
                    .ok_or_else(|| EngineError::UnknownSavepoint(name.value.clone()))?
                    .release(&name.value)?;
            }
            _ => return Ok(None),
        }
        Ok(Some(RawOutcome::Affected(0)))
    }

    fn run(
        &mut self,
        statement: &Statement,
        params: &[Value],
        log: &mut UndoLog,
    ) -> Result<RawOutcome, EngineError> {
        match statement {
            Statement::Query(query) => {
                let reader = Reader::new(self.db);
                let set = Evaluator::new(&reader, params).query(query)?;
                Ok(RawOutcome::Rows(set))
            }
            Statement::Insert(insert) => self.insert(insert, params, log),
            Statement::Update {
                table,
                assignments,
                from,
                selection,
                returning,
            } => {
                if from.is_some() || returning.is_some() {
                    return Err(EngineError::NotSupported("UPDATE ... FROM / RETURNING".into()));
                }
                self.update(table, assignments, selection.as_ref(), params, log)
            }
            Statement::Delete(delete) => {
                if !delete.tables.is_empty()
                    || delete.using.is_some()
                    || delete.returning.is_some()
                    || delete.limit.is_some()
                {
                    return Err(EngineError::NotSupported("multi-table DELETE".into()));
                }
                let from = match &delete.from {
                    FromTable::WithFromKeyword(from) | FromTable::WithoutKeyword(from) => from,
                };
                match from.as_slice() {
                    [table] => self.delete(table, delete.selection.as_ref(), params, log),
                    _ => Err(EngineError::NotSupported("multi-table DELETE".into())),
                }
            }
            Statement::CreateTable {
                name,
                columns,
                constraints,
                if_not_exists,
                query,
                like,
                clone,
                ..
            } => {
                if query.is_some() || like.is_some() || clone.is_some() {
                    return Err(EngineError::NotSupported(
                        "CREATE TABLE AS / LIKE / CLONE".into(),
                    ));
                }
                self.create_table(name, columns, constraints, *if_not_exists, log)
            }
            Statement::CreateView {
                or_replace,
                materialized,
                name,
                columns,
                query,
                ..
            } => {
                if *materialized {
                    return Err(EngineError::NotSupported("materialized views".into()));
                }
                self.create_view(name, columns, query, *or_replace, log)
            }
            Statement::CreateIndex { table_name, .. } => {
                self.base_table(table_name)?;
                Ok(RawOutcome::Affected(0))
            }
            Statement::Drop {
                object_type,
                if_exists,
                names,
                ..
            } => self.drop(object_type, names, *if_exists, log),
            other => Err(EngineError::NotSupported(format!("statement {other}"))),
        }
    }

    fn table(&self, key: &TableKey) -> Result<&Table, EngineError> {
        self.db
            .table(key)
            .ok_or_else(|| EngineError::UnknownTable(display_name(key, None)))
    }

    fn table_mut(&mut self, key: &TableKey) -> Result<&mut Table, EngineError> {
        self.db
            .table_mut(key)
            .ok_or_else(|| EngineError::UnknownTable(display_name(key, None)))
    }

    /// Resolves a DML target; views are not writable.
    fn base_table(&self, name: &ObjectName) -> Result<TableKey, EngineError> {
        let (schema, table) = qualified_name(name);
        let key = table_key(&schema, &table);
        match self.db.table(&key) {
            Some(t) if !t.is_view() => Ok(key),
            Some(t) => Err(EngineError::NotSupported(format!(
                "modifying view {}",
                display_name(&key, Some(t))
            ))),
            None => Err(EngineError::UnknownTable(format!("{schema}.{table}"))),
        }
    }

    fn insert(
        &mut self,
        insert: &Insert,
        params: &[Value],
        log: &mut UndoLog,
    ) -> Result<RawOutcome, EngineError> {
        if insert.returning.is_some() {
            return Err(EngineError::NotSupported("INSERT ... RETURNING".into()));
        }
        let source = insert
            .source
            .as_ref()
            .ok_or_else(|| EngineError::NotSupported("INSERT without a source".into()))?;
        let key = self.base_table(&insert.table_name)?;
        let rows = {
            let table = self.table(&key)?;
            let targets: Vec<usize> = if insert.columns.is_empty() {
                (0..table.columns.len()).collect()
            } else {
                insert
                    .columns
                    .iter()
                    .map(|c| {
                        table
                            .column_index(&c.value)
                            .ok_or_else(|| EngineError::UnknownColumn(c.value.clone()))
                    })
                    .collect::<Result<_, _>>()?
            };
            let reader = Reader::new(self.db);
            let evaluator = Evaluator::new(&reader, params);
            let supplied: Vec<Row> = match source.body.as_ref() {
                SetExpr::Values(values) => values
                    .rows
                    .iter()
                    .map(|exprs| {
                        exprs
                            .iter()
                            .map(|e| evaluator.eval_const(e))
                            .collect::<Result<Row, _>>()
                    })
                    .collect::<Result<_, _>>()?,
                _ => evaluator.query(source)?.rows,
            };
            let mut rows = Vec::with_capacity(supplied.len());
            for values in supplied {
                if values.len() != targets.len() {
                    return Err(EngineError::Syntax(format!(
                        "INSERT supplies {} values for {} columns",
                        values.len(),
                        targets.len()
                    )));
                }
                let mut row = vec![Value::Null; table.columns.len()];
                let mut given = vec![false; table.columns.len()];
                for (idx, value) in targets.iter().zip(values) {
                    row[*idx] = value;
                    given[*idx] = true;
                }
                for (idx, column) in table.columns.iter().enumerate() {
                    if let (false, Some(default)) = (given[idx], &column.default) {
                        row[idx] = evaluator.eval_const(default)?;
                    }
                }
                rows.push(coerce_row(table, row)?);
            }
            rows
        };
        if rows.is_empty() {
            return Err(EngineError::NoData);
        }
        let inserted = rows.len() as u64;
        for row in rows {
            self.check_interrupt()?;
            check_row(self.db, self.table(&key)?, &row, None)?;
            let row_id = self.table_mut(&key)?.insert_row(row);
            log.push(Undo::Insert {
                table: key.clone(),
                row_id,
            });
        }
        Ok(RawOutcome::Affected(inserted))
    }

    /// Target key and the scope its rows are evaluated in.
    fn dml_target(&self, target: &TableWithJoins) -> Result<(TableKey, Scope), EngineError> {
        if !target.joins.is_empty() {
            return Err(EngineError::NotSupported("joins in UPDATE/DELETE".into()));
        }
        let TableFactor::Table { name, alias, .. } = &target.relation else {
            return Err(EngineError::NotSupported("derived UPDATE/DELETE target".into()));
        };
        let key = self.base_table(name)?;
        let table = self.table(&key)?;
        let qualifier = alias
            .as_ref()
            .map_or(table.name.as_str(), |a| a.name.value.as_str());
        Ok((key, Scope::for_relation(Some(qualifier), &table.result_columns())))
    }

    fn update(
        &mut self,
        target: &TableWithJoins,
        assignments: &[Assignment],
        selection: Option<&Expr>,
        params: &[Value],
        log: &mut UndoLog,
    ) -> Result<RawOutcome, EngineError> {
        let (key, scope) = self.dml_target(target)?;
        let changes = {
            let table = self.table(&key)?;
            let assigned: Vec<(usize, &Expr)> = assignments
                .iter()
                .map(|a| {
                    let column = a.id.last().map(|i| i.value.as_str()).unwrap_or_default();
                    table
                        .column_index(column)
                        .map(|idx| (idx, &a.value))
                        .ok_or_else(|| EngineError::UnknownColumn(column.to_string()))
                })
                .collect::<Result<_, _>>()?;
            let reader = Reader::new(self.db);
            let evaluator = Evaluator::new(&reader, params);
            let mut changes = Vec::new();
            for (row_id, row) in &table.rows {
                self.check_interrupt()?;
                if let Some(filter) = selection {
                    if !evaluator.matches(filter, &scope, row)? {
                        continue;
                    }
                }
                let mut updated = row.clone();
                for (idx, expr) in &assigned {
                    updated[*idx] = evaluator.eval_row(expr, &scope, row)?;
                }
                changes.push((*row_id, coerce_row(table, updated)?));
            }
            changes
        };
        if changes.is_empty() {
            return Err(EngineError::NoData);
        }
        let updated = changes.len() as u64;
        for (row_id, row) in changes {
            let old = {
                let table = self.table(&key)?;
                let Some(old) = table.rows.get(&row_id) else {
                    continue;
                };
                check_row(self.db, table, &row, Some(row_id))?;
                check_unreferenced(self.db, table, row_id, old, Some(&row))?;
                old.clone()
            };
            self.table_mut(&key)?.rows.insert(row_id, row);
            log.push(Undo::Update {
                table: key.clone(),
                row_id,
                row: old,
            });
        }
        Ok(RawOutcome::Affected(updated))
    }

    fn delete(
        &mut self,
        target: &TableWithJoins,
        selection: Option<&Expr>,
        params: &[Value],
        log: &mut UndoLog,
    ) -> Result<RawOutcome, EngineError> {
        let (key, scope) = self.dml_target(target)?;
        let doomed: Vec<u64> = {
            let table = self.table(&key)?;
            let reader = Reader::new(self.db);
            let evaluator = Evaluator::new(&reader, params);
            let mut doomed = Vec::new();
            for (row_id, row) in &table.rows {
                self.check_interrupt()?;
                let hit = match selection {
                    Some(filter) => evaluator.matches(filter, &scope, row)?,
                    None => true,
                };
                if hit {
                    doomed.push(*row_id);
                }
            }
            doomed
        };
        if doomed.is_empty() {
            return Err(EngineError::NoData);
        }
        // Remove first, then check: rows referencing each other inside the
        // deleted set do not block the delete.
        let mut removed = Vec::with_capacity(doomed.len());
        for row_id in doomed {
            if let Some(row) = self.table_mut(&key)?.rows.remove(&row_id) {
                log.push(Undo::Delete {
                    table: key.clone(),
                    row_id,
                    row: row.clone(),
                });
                removed.push((row_id, row));
            }
        }
        let table = self.table(&key)?;
        for (row_id, row) in &removed {
            check_unreferenced(self.db, table, *row_id, row, None)?;
        }
        Ok(RawOutcome::Affected(removed.len() as u64))
    }

    fn create_table(
        &mut self,
        name: &ObjectName,
        columns: &[sqlparser::ast::ColumnDef],
        constraints: &[TableConstraint],
        if_not_exists: bool,
        log: &mut UndoLog,
    ) -> Result<RawOutcome, EngineError> {
        let (schema, table_name) = qualified_name(name);
        if schema.eq_ignore_ascii_case(information_schema::SCHEMA) {
            return Err(EngineError::NotSupported(format!(
                "creating tables in {schema}"
            )));
        }
        let key = table_key(&schema, &table_name);
        if let Some(existing) = self.db.table(&key) {
            if if_not_exists {
                return Ok(RawOutcome::Affected(0));
            }
            return Err(EngineError::DuplicateTable(display_name(&key, Some(existing))));
        }

        let mut defs: Vec<ColumnDef> = Vec::with_capacity(columns.len());
        let mut declared = Vec::new();
        for column in columns {
            let name = column.name.value.clone();
            if defs.iter().any(|d| d.name.eq_ignore_ascii_case(&name)) {
                return Err(EngineError::Syntax(format!("column {name} specified more than once")));
            }
            let mut def = ColumnDef {
                name,
                type_name: backend_type(&column.data_type),
                nullable: true,
                default: None,
            };
            for option in &column.options {
                let constraint_name = option.name.as_ref().map(|n| n.value.clone());
                match &option.option {
                    ColumnOption::NotNull => def.nullable = false,
                    ColumnOption::Default(expr) => def.default = Some(expr.clone()),
                    ColumnOption::Unique { is_primary, .. } => declared.push(Declared {
                        name: constraint_name,
                        kind: if *is_primary {
                            ConstraintKind::PrimaryKey
                        } else {
                            ConstraintKind::Unique
                        },
                        columns: vec![def.name.clone()],
                        references: None,
                    }),
                    ColumnOption::ForeignKey {
                        foreign_table,
                        referred_columns,
                        ..
                    } => declared.push(Declared {
                        name: constraint_name,
                        kind: ConstraintKind::ForeignKey,
                        columns: vec![def.name.clone()],
                        references: Some((foreign_table.clone(), idents(referred_columns))),
                    }),
                    ColumnOption::Check(_) => {
                        return Err(EngineError::NotSupported("CHECK constraints".into()))
                    }
                    _ => {}
                }
            }
            defs.push(def);
        }
        for constraint in constraints {
            declared.push(match constraint {
                TableConstraint::PrimaryKey { name, columns, .. } => Declared {
                    name: name.as_ref().map(|n| n.value.clone()),
                    kind: ConstraintKind::PrimaryKey,
                    columns: idents(columns),
                    references: None,
                },
                TableConstraint::Unique { name, columns, .. } => Declared {
                    name: name.as_ref().map(|n| n.value.clone()),
                    kind: ConstraintKind::Unique,
                    columns: idents(columns),
                    references: None,
                },
                TableConstraint::ForeignKey {
                    name,
                    columns,
                    foreign_table,
                    referred_columns,
                    ..
                } => Declared {
                    name: name.as_ref().map(|n| n.value.clone()),
                    kind: ConstraintKind::ForeignKey,
                    columns: idents(columns),
                    references: Some((foreign_table.clone(), idents(referred_columns))),
                },
                other => {
                    return Err(EngineError::NotSupported(format!("constraint {other}")));
                }
            });
        }
        let primary_keys = declared
            .iter()
            .filter(|d| d.kind == ConstraintKind::PrimaryKey)
            .count();
        if primary_keys > 1 {
            return Err(EngineError::Syntax(format!(
                "multiple primary keys for table {table_name}"
            )));
        }

        let mut table = Table::new(schema, table_name, defs);
        // Keys first so foreign keys referencing this table can find them.
        declared.sort_by_key(|d| d.kind == ConstraintKind::ForeignKey);
        for declared in declared {
            let columns = declared
                .columns
                .iter()
                .map(|c| {
                    table
                        .column_index(c)
                        .map(|idx| table.columns[idx].name.clone())
                        .ok_or_else(|| EngineError::UnknownColumn(c.clone()))
                })
                .collect::<Result<Vec<_>, _>>()?;
            let name = declared
                .name
                .unwrap_or_else(|| generated_name(&table.name, declared.kind, &columns));
            let taken = self.db.constraint_exists(&table.schema, &name)
                || table
                    .constraints
                    .iter()
                    .any(|c| c.name.eq_ignore_ascii_case(&name));
            if taken {
                return Err(EngineError::DuplicateConstraint(name));
            }
            if declared.kind == ConstraintKind::PrimaryKey {
                for column in &mut table.columns {
                    if columns.iter().any(|c| c == &column.name) {
                        column.nullable = false;
                    }
                }
            }
            let references = match declared.references {
                Some((target, referred)) => {
                    Some(self.resolve_reference(&table, &target, referred, columns.len())?)
                }
                None => None,
            };
            table.constraints.push(Constraint {
                name,
                kind: declared.kind,
                columns,
                references,
            });
        }

        debug!(table = %display_name(&key, Some(&table)), "table created");
        self.db.insert_table(table);
        log.push(Undo::Create { table: key });
        Ok(RawOutcome::Affected(0))
    }

    /// Resolves a foreign key target to canonical column names and the
    /// primary/unique constraint they match. `table` is the table being
    /// created, which may reference itself.
    fn resolve_reference(
        &self,
        table: &Table,
        target: &ObjectName,
        referred: Vec<String>,
        arity: usize,
    ) -> Result<Reference, EngineError> {
        let (schema, name) = qualified_name(target);
        let key = table_key(&schema, &name);
        let target_table = if key == table.key() {
            table
        } else {
            self.db
                .table(&key)
                .filter(|t| !t.is_view())
                .ok_or_else(|| EngineError::UnknownTable(format!("{schema}.{name}")))?
        };
        let no_key = || EngineError::NoUniqueKey(target_table.name.clone());
        let columns = if referred.is_empty() {
            target_table
                .primary_key()
                .map(|pk| pk.columns.clone())
                .ok_or_else(no_key)?
        } else {
            referred
                .iter()
                .map(|c| {
                    target_table
                        .column_index(c)
                        .map(|idx| target_table.columns[idx].name.clone())
                        .ok_or_else(|| EngineError::UnknownColumn(c.clone()))
                })
                .collect::<Result<Vec<_>, _>>()?
        };
        if columns.len() != arity {
            return Err(EngineError::Syntax(
                "foreign key and referenced column counts differ".into(),
            ));
        }
        let unique = target_table
            .constraints
            .iter()
            .find(|c| {
                c.is_key()
                    && c.columns.len() == columns.len()
                    && c.columns
                        .iter()
                        .all(|k| columns.iter().any(|r| r.eq_ignore_ascii_case(k)))
            })
            .ok_or_else(no_key)?;
        Ok(Reference {
            table: key,
            columns,
            unique_constraint: unique.name.clone(),
        })
    }

    fn create_view(
        &mut self,
        name: &ObjectName,
        columns: &[ViewColumnDef],
        query: &Query,
        or_replace: bool,
        log: &mut UndoLog,
    ) -> Result<RawOutcome, EngineError> {
        let (schema, view_name) = qualified_name(name);
        let key = table_key(&schema, &view_name);
        if let Some(existing) = self.db.table(&key) {
            if !(or_replace && existing.is_view()) {
                return Err(EngineError::DuplicateTable(display_name(&key, Some(existing))));
            }
        }
        let probe = Reader::probe(self.db);
        let shape = Evaluator::new(&probe, &[]).query(query)?;
        if !columns.is_empty() && columns.len() != shape.columns.len() {
            return Err(EngineError::Syntax(
                "view column list does not match its query".into(),
            ));
        }
        let defs = shape
            .columns
            .iter()
            .enumerate()
            .map(|(idx, c)| ColumnDef {
                name: columns
                    .get(idx)
                    .map_or_else(|| c.name.clone(), |v| v.name.value.clone()),
                type_name: c.type_name.clone(),
                nullable: true,
                default: None,
            })
            .collect();
        let mut view = Table::new(schema, view_name, defs);
        view.view = Some(Box::new(query.clone()));
        if let Some(old) = self.db.remove_table(&key) {
            log.push(Undo::Drop {
                table: Box::new(old),
            });
        }
        self.db.insert_table(view);
        log.push(Undo::Create { table: key });
        Ok(RawOutcome::Affected(0))
    }

    fn drop(
        &mut self,
        object_type: &ObjectType,
        names: &[ObjectName],
        if_exists: bool,
        log: &mut UndoLog,
    ) -> Result<RawOutcome, EngineError> {
        let views = match object_type {
            ObjectType::Table => false,
            ObjectType::View => true,
            // Indexes are not materialised.
            ObjectType::Index => return Ok(RawOutcome::Affected(0)),
            other => return Err(EngineError::NotSupported(format!("DROP {other}"))),
        };
        for name in names {
            let (schema, table_name) = qualified_name(name);
            let key = table_key(&schema, &table_name);
            let exists = self.db.table(&key).is_some_and(|t| t.is_view() == views);
            if !exists {
                if if_exists {
                    continue;
                }
                return Err(EngineError::UnknownTable(format!("{schema}.{table_name}")));
            }
            let referenced = self
                .db
                .referencing(&key)
                .iter()
                .any(|(t, _)| t.key() != key);
            if referenced {
                return Err(EngineError::Dependent(format!("{schema}.{table_name}")));
            }
            if let Some(table) = self.db.remove_table(&key) {
                log.push(Undo::Drop {
                    table: Box::new(table),
                });
            }
        }
        Ok(RawOutcome::Affected(0))
    }
}

fn generated_name(table: &str, kind: ConstraintKind, columns: &[String]) -> String {
    match kind {
        ConstraintKind::PrimaryKey => format!("{table}_PKEY"),
        ConstraintKind::Unique => format!("{table}_{}_KEY", columns.join("_")),
        ConstraintKind::ForeignKey => format!("{table}_{}_FKEY", columns.join("_")),
    }
}
