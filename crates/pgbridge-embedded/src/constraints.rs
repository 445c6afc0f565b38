use crate::catalog::{ColumnDef, Database, Table};
use crate::error::EngineError;
use pgbridge_core::{Row, Value};
use pgbridge_sql::engine::cast_value;

fn key_values(row: &Row, idx: &[usize]) -> Option<Vec<Value>> {
    let values: Vec<Value> = idx
        .iter()
        .map(|i| row.get(*i).cloned().unwrap_or(Value::Null))
        .collect();
    if values.iter().any(Value::is_null) {
        None
    } else {
        Some(values)
    }
}

fn same_key(row: &Row, idx: &[usize], values: &[Value]) -> bool {
    idx.iter()
        .zip(values)
        .all(|(i, v)| row.get(*i).and_then(|r| r.sql_eq(v)) == Some(true))
}

fn missing(table: &Table, names: &[String]) -> EngineError {
    let name = names
        .iter()
        .find(|n| table.column_index(n).is_none())
        .cloned()
        .unwrap_or_default();
    EngineError::UnknownColumn(name)
}

/// Converts a value to the column's declared type, enforcing length and
/// vector dimension.
pub fn coerce(column: &ColumnDef, value: Value) -> Result<Value, EngineError> {
    let value = cast_value(value, &column.type_name)?;
    match &value {
        Value::Text(text) => {
            if let Some(max) = column.char_length() {
                let max = max as usize;
                if text.chars().count() > max {
                    return Err(EngineError::TooLong {
                        column: column.name.clone(),
                        max,
                    });
                }
            }
        }
        Value::Vector(items) => {
            if let Some(expected) = column.dimension() {
                if items.len() != expected {
                    return Err(EngineError::Dimension {
                        column: column.name.clone(),
                        expected,
                        found: items.len(),
                    });
                }
            }
        }
        _ => {}
    }
    Ok(value)
}

pub fn coerce_row(table: &Table, row: Row) -> Result<Row, EngineError> {
    table
        .columns
        .iter()
        .zip(row)
        .map(|(column, value)| coerce(column, value))
        .collect()
}

/// NOT NULL, primary/unique key and outgoing foreign key checks for `row`
/// as it would be stored in `table`. `row_id` names the row being replaced
/// by an update.
pub fn check_row(
    db: &Database,
    table: &Table,
    row: &Row,
    row_id: Option<u64>,
) -> Result<(), EngineError> {
    for (column, value) in table.columns.iter().zip(row) {
        if !column.nullable && value.is_null() {
            return Err(EngineError::NotNull {
                table: table.name.clone(),
                column: column.name.clone(),
            });
        }
    }
    for constraint in &table.constraints {
        let idx = table
            .column_indexes(&constraint.columns)
            .ok_or_else(|| missing(table, &constraint.columns))?;
        let Some(values) = key_values(row, &idx) else {
            continue;
        };
        if constraint.is_key() {
            let clash = table
                .rows
                .iter()
                .any(|(id, other)| Some(*id) != row_id && same_key(other, &idx, &values));
            if clash {
                return Err(EngineError::Unique(constraint.name.clone()));
            }
            continue;
        }
        let Some(reference) = &constraint.references else {
            continue;
        };
        let target = db
            .table(&reference.table)
            .ok_or_else(|| EngineError::ForeignKey(constraint.name.clone()))?;
        let target_idx = target
            .column_indexes(&reference.columns)
            .ok_or_else(|| missing(target, &reference.columns))?;
        let self_reference = reference.table == table.key() && same_key(row, &target_idx, &values);
        if !self_reference && !target.rows.values().any(|r| same_key(r, &target_idx, &values)) {
            return Err(EngineError::ForeignKey(constraint.name.clone()));
        }
    }
    Ok(())
}

/// Fails when rows elsewhere still reference the key of `old`. For updates
/// `new` is the replacement; unchanged keys are fine.
pub fn check_unreferenced(
    db: &Database,
    table: &Table,
    row_id: u64,
    old: &Row,
    new: Option<&Row>,
) -> Result<(), EngineError> {
    let key = table.key();
    for (referrer, constraint) in db.referencing(&key) {
        let Some(reference) = &constraint.references else {
            continue;
        };
        let idx = table
            .column_indexes(&reference.columns)
            .ok_or_else(|| missing(table, &reference.columns))?;
        let Some(values) = key_values(old, &idx) else {
            continue;
        };
        if new.is_some_and(|new| same_key(new, &idx, &values)) {
            continue;
        }
        let fk_idx = referrer
            .column_indexes(&constraint.columns)
            .ok_or_else(|| missing(referrer, &constraint.columns))?;
        let same_table = referrer.key() == key;
        let referenced = referrer
            .rows
            .iter()
            .any(|(id, row)| !(same_table && *id == row_id) && same_key(row, &fk_idx, &values));
        if referenced {
            return Err(EngineError::ForeignKey(constraint.name.clone()));
        }
    }
    Ok(())
}
