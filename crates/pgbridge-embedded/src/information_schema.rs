//! INFORMATION_SCHEMA views computed from the live table definitions.

use crate::catalog::{Database, Table};
use pgbridge_core::{Column, ResultSet, Row, Value};

pub const SCHEMA: &str = "INFORMATION_SCHEMA";

fn text(value: &str) -> Value {
    Value::Text(value.to_string())
}

fn opt_int(value: Option<i64>) -> Value {
    value.map_or(Value::Null, Value::Int)
}

fn columns(names: &[(&str, &str)]) -> Vec<Column> {
    names
        .iter()
        .map(|(name, type_name)| Column::new(*name, *type_name))
        .collect()
}

/// Contents of `INFORMATION_SCHEMA.<name>`; `None` for views not provided.
pub fn view(db: &Database, name: &str) -> Option<ResultSet> {
    let set = match name.to_ascii_uppercase().as_str() {
        "SCHEMATA" => schemata(db),
        "TABLES" => tables(db),
        "COLUMNS" => table_columns(db),
        "TABLE_CONSTRAINTS" => table_constraints(db),
        "KEY_COLUMN_USAGE" => key_column_usage(db),
        "REFERENTIAL_CONSTRAINTS" => referential_constraints(db),
        _ => return None,
    };
    Some(set)
}

fn schemata(db: &Database) -> ResultSet {
    let rows = db.schemas().iter().map(|s| vec![text(s)]).collect();
    ResultSet::new(columns(&[("SCHEMA_NAME", "VARCHAR(128)")]), rows)
}

fn tables(db: &Database) -> ResultSet {
    let rows = db
        .tables()
        .map(|t| {
            let kind = if t.is_view() { "VIEW" } else { "BASE TABLE" };
            vec![text(&t.schema), text(&t.name), text(kind)]
        })
        .collect();
    ResultSet::new(
        columns(&[
            ("TABLE_SCHEMA", "VARCHAR(128)"),
            ("TABLE_NAME", "VARCHAR(128)"),
            ("TABLE_TYPE", "VARCHAR(20)"),
        ]),
        rows,
    )
}

fn table_columns(db: &Database) -> ResultSet {
    let mut rows = Vec::new();
    for table in db.tables() {
        for (idx, column) in table.columns.iter().enumerate() {
            rows.push(vec![
                text(&table.schema),
                text(&table.name),
                text(&column.name),
                Value::Int(idx as i64 + 1),
                column
                    .default
                    .as_ref()
                    .map_or(Value::Null, |d| Value::Text(d.to_string())),
                text(if column.nullable { "YES" } else { "NO" }),
                Value::Text(column.data_type()),
                opt_int(column.char_length()),
                opt_int(column.precision()),
                opt_int(column.scale()),
            ]);
        }
    }
    ResultSet::new(
        columns(&[
            ("TABLE_SCHEMA", "VARCHAR(128)"),
            ("TABLE_NAME", "VARCHAR(128)"),
            ("COLUMN_NAME", "VARCHAR(128)"),
            ("ORDINAL_POSITION", "INTEGER"),
            ("COLUMN_DEFAULT", "VARCHAR(4096)"),
            ("IS_NULLABLE", "VARCHAR(3)"),
            ("DATA_TYPE", "VARCHAR(128)"),
            ("CHARACTER_MAXIMUM_LENGTH", "INTEGER"),
            ("NUMERIC_PRECISION", "INTEGER"),
            ("NUMERIC_SCALE", "INTEGER"),
        ]),
        rows,
    )
}

fn table_constraints(db: &Database) -> ResultSet {
    let rows = db
        .tables()
        .flat_map(|t| {
            t.constraints.iter().map(|c| {
                vec![
                    text(&t.schema),
                    text(&c.name),
                    text(&t.schema),
                    text(&t.name),
                    text(c.constraint_type()),
                ]
            })
        })
        .collect();
    ResultSet::new(
        columns(&[
            ("CONSTRAINT_SCHEMA", "VARCHAR(128)"),
            ("CONSTRAINT_NAME", "VARCHAR(128)"),
            ("TABLE_SCHEMA", "VARCHAR(128)"),
            ("TABLE_NAME", "VARCHAR(128)"),
            ("CONSTRAINT_TYPE", "VARCHAR(11)"),
        ]),
        rows,
    )
}

fn key_column_usage(db: &Database) -> ResultSet {
    let mut rows: Vec<Row> = Vec::new();
    for table in db.tables() {
        for constraint in &table.constraints {
            let target: Option<&Table> = constraint
                .references
                .as_ref()
                .and_then(|r| db.table(&r.table));
            for (idx, column) in constraint.columns.iter().enumerate() {
                let referenced = constraint
                    .references
                    .as_ref()
                    .and_then(|r| r.columns.get(idx));
                rows.push(vec![
                    text(&table.schema),
                    text(&constraint.name),
                    text(&table.schema),
                    text(&table.name),
                    text(column),
                    Value::Int(idx as i64 + 1),
                    target.map_or(Value::Null, |t| text(&t.schema)),
                    target.map_or(Value::Null, |t| text(&t.name)),
                    referenced.map_or(Value::Null, |c| text(c)),
                ]);
            }
        }
    }
    ResultSet::new(
        columns(&[
            ("CONSTRAINT_SCHEMA", "VARCHAR(128)"),
            ("CONSTRAINT_NAME", "VARCHAR(128)"),
            ("TABLE_SCHEMA", "VARCHAR(128)"),
            ("TABLE_NAME", "VARCHAR(128)"),
            ("COLUMN_NAME", "VARCHAR(128)"),
            ("ORDINAL_POSITION", "INTEGER"),
            ("REFERENCED_TABLE_SCHEMA", "VARCHAR(128)"),
            ("REFERENCED_TABLE_NAME", "VARCHAR(128)"),
            ("REFERENCED_COLUMN_NAME", "VARCHAR(128)"),
        ]),
        rows,
    )
}

fn referential_constraints(db: &Database) -> ResultSet {
    let mut rows = Vec::new();
    for table in db.tables() {
        for constraint in &table.constraints {
            let Some(reference) = &constraint.references else {
                continue;
            };
            let target_schema = db
                .table(&reference.table)
                .map_or_else(|| reference.table.0.clone(), |t| t.schema.clone());
            rows.push(vec![
                text(&table.schema),
                text(&constraint.name),
                Value::Text(target_schema),
                text(&reference.unique_constraint),
                text("NO ACTION"),
                text("NO ACTION"),
            ]);
        }
    }
    ResultSet::new(
        columns(&[
            ("CONSTRAINT_SCHEMA", "VARCHAR(128)"),
            ("CONSTRAINT_NAME", "VARCHAR(128)"),
            ("UNIQUE_CONSTRAINT_SCHEMA", "VARCHAR(128)"),
            ("UNIQUE_CONSTRAINT_NAME", "VARCHAR(128)"),
            ("UPDATE_RULE", "VARCHAR(11)"),
            ("DELETE_RULE", "VARCHAR(11)"),
        ]),
        rows,
    )
}
