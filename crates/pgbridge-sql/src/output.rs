//! Result-side translation: backend schema names back to the client's and
//! upper-case backend column names folded for PostgreSQL clients.

use crate::translate::SCHEMA_COLUMNS;
use pgbridge_core::{Column, Row, SchemaMapping, Value};

fn is_schema_column(name: &str) -> bool {
    SCHEMA_COLUMNS.iter().any(|c| c.eq_ignore_ascii_case(name))
}

/// Folds column names that are entirely upper case (`ID`, `USER_NAME`) to
/// lower case. Mixed-case names were quoted deliberately and are kept.
pub fn fold_column_names(columns: &mut [Column]) {
    for column in columns {
        let has_upper = column.name.chars().any(|c| c.is_uppercase());
        let has_lower = column.name.chars().any(|c| c.is_lowercase());
        if has_upper && !has_lower {
            column.name = column.name.to_lowercase();
        }
    }
}

/// Rewrites backend schema names found in schema columns to the client
/// schema. NULLs and other schemas pass through.
pub fn translate_rows(columns: &[Column], rows: &mut [Row], mapping: &SchemaMapping) {
    let targets: Vec<usize> = columns
        .iter()
        .enumerate()
        .filter(|(_, c)| is_schema_column(&c.name))
        .map(|(i, _)| i)
        .collect();
    if targets.is_empty() {
        return;
    }
    for row in rows {
        for &idx in &targets {
            let Some(Value::Text(schema)) = row.get(idx) else {
                continue;
            };
            if let Some(client) = mapping.to_client(schema) {
                row[idx] = Value::Text(client.to_string());
            }
        }
    }
}
