//! Builds a [`CatalogSnapshot`] from the backend's INFORMATION_SCHEMA views.

use crate::bridge::Bridge;
use crate::outcome::{BridgeError, Outcome};
use pgbridge_core::{Column, Row, Value};
use pgbridge_sql::catalog::{
    CatalogSnapshot, ColumnInfo, ConstraintInfo, ConstraintKind, ForeignKeyRef, TableInfo,
    TableKind,
};
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const TABLES_SQL: &str =
    "SELECT TABLE_SCHEMA, TABLE_NAME, TABLE_TYPE FROM INFORMATION_SCHEMA.TABLES";
const COLUMNS_SQL: &str = "SELECT TABLE_SCHEMA, TABLE_NAME, COLUMN_NAME, ORDINAL_POSITION, \
     DATA_TYPE, CHARACTER_MAXIMUM_LENGTH, NUMERIC_PRECISION, NUMERIC_SCALE, IS_NULLABLE, \
     COLUMN_DEFAULT FROM INFORMATION_SCHEMA.COLUMNS";
const CONSTRAINTS_SQL: &str = "SELECT TABLE_SCHEMA, TABLE_NAME, CONSTRAINT_NAME, CONSTRAINT_TYPE \
     FROM INFORMATION_SCHEMA.TABLE_CONSTRAINTS";
const KEY_COLUMNS_SQL: &str = "SELECT CONSTRAINT_SCHEMA, CONSTRAINT_NAME, TABLE_SCHEMA, TABLE_NAME, \
     COLUMN_NAME, ORDINAL_POSITION FROM INFORMATION_SCHEMA.KEY_COLUMN_USAGE";
const REFERENTIAL_SQL: &str = "SELECT CONSTRAINT_SCHEMA, CONSTRAINT_NAME, \
     UNIQUE_CONSTRAINT_SCHEMA, UNIQUE_CONSTRAINT_NAME FROM INFORMATION_SCHEMA.REFERENTIAL_CONSTRAINTS";

/// Rows of a metadata query with by-name column access.
struct Listing {
    columns: Vec<Column>,
    rows: Vec<Row>,
}

impl Listing {
    fn index(&self, name: &str) -> Result<usize, BridgeError> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| {
                BridgeError::Unavailable(format!("metadata column {name} missing from backend"))
            })
    }

    fn indexes<const N: usize>(&self, names: [&str; N]) -> Result<[usize; N], BridgeError> {
        let mut out = [0; N];
        for (slot, name) in out.iter_mut().zip(names) {
            *slot = self.index(name)?;
        }
        Ok(out)
    }

    fn text(row: &Row, idx: usize) -> Option<String> {
        row.get(idx).and_then(Value::to_text)
    }

    fn int(row: &Row, idx: usize) -> Option<i64> {
        row.get(idx).and_then(Value::as_i64)
    }
}

async fn list(bridge: &Bridge, sql: &str, cancel: &CancellationToken) -> Result<Listing, BridgeError> {
    match bridge.execute(sql, &[], cancel).await? {
        Outcome::Rows { columns, rows } => Ok(Listing { columns, rows }),
        Outcome::Command { .. } => Ok(Listing {
            columns: Vec::new(),
            rows: Vec::new(),
        }),
    }
}

/// Backend system schemas are `%`-prefixed; INFORMATION_SCHEMA describes
/// itself. Neither belongs in the client's catalog.
fn is_system_schema(schema: &str) -> bool {
    schema.starts_with('%') || schema.eq_ignore_ascii_case("INFORMATION_SCHEMA")
}

type TableKey = (String, String);

fn key(schema: &str, name: &str) -> TableKey {
    (schema.to_ascii_uppercase(), name.to_ascii_uppercase())
}

pub async fn load_snapshot(
    bridge: &Bridge,
    cancel: &CancellationToken,
) -> Result<CatalogSnapshot, BridgeError> {
    let mut tables: BTreeMap<TableKey, TableInfo> = BTreeMap::new();
    let mut schemas: Vec<String> = Vec::new();

    let listing = list(bridge, TABLES_SQL, cancel).await?;
    let [schema_idx, name_idx, type_idx] =
        listing.indexes(["TABLE_SCHEMA", "TABLE_NAME", "TABLE_TYPE"])?;
    for row in &listing.rows {
        let (Some(schema), Some(name)) =
            (Listing::text(row, schema_idx), Listing::text(row, name_idx))
        else {
            continue;
        };
        if is_system_schema(&schema) {
            continue;
        }
        let kind = TableKind::from_table_type(&Listing::text(row, type_idx).unwrap_or_default());
        if !schemas.iter().any(|s| s.eq_ignore_ascii_case(&schema)) {
            schemas.push(schema.clone());
        }
        tables.insert(key(&schema, &name), TableInfo::new(schema, name, kind));
    }

    let listing = list(bridge, COLUMNS_SQL, cancel).await?;
    let [schema_idx, table_idx, column_idx, ordinal_idx, type_idx, length_idx, precision_idx, scale_idx, nullable_idx, default_idx] =
        listing.indexes([
            "TABLE_SCHEMA",
            "TABLE_NAME",
            "COLUMN_NAME",
            "ORDINAL_POSITION",
            "DATA_TYPE",
            "CHARACTER_MAXIMUM_LENGTH",
            "NUMERIC_PRECISION",
            "NUMERIC_SCALE",
            "IS_NULLABLE",
            "COLUMN_DEFAULT",
        ])?;
    for row in &listing.rows {
        let (Some(schema), Some(table), Some(name)) = (
            Listing::text(row, schema_idx),
            Listing::text(row, table_idx),
            Listing::text(row, column_idx),
        ) else {
            continue;
        };
        let Some(info) = tables.get_mut(&key(&schema, &table)) else {
            continue;
        };
        let ordinal = Listing::int(row, ordinal_idx).unwrap_or(info.columns.len() as i64 + 1);
        let mut column = ColumnInfo::new(
            name,
            ordinal as i16,
            Listing::text(row, type_idx).unwrap_or_else(|| "VARCHAR".into()),
        );
        column.char_length = Listing::int(row, length_idx).map(|v| v as i32);
        column.precision = Listing::int(row, precision_idx).map(|v| v as i32);
        column.scale = Listing::int(row, scale_idx).map(|v| v as i32);
        column.nullable = !Listing::text(row, nullable_idx)
            .is_some_and(|v| v.eq_ignore_ascii_case("NO"));
        column.default = Listing::text(row, default_idx);
        info.columns.push(column);
    }
    for info in tables.values_mut() {
        info.columns.sort_by_key(|c| c.ordinal);
    }

    let constraints = load_constraints(bridge, cancel, &tables).await?;
    for ((schema, table), constraint) in constraints {
        if let Some(info) = tables.get_mut(&(schema, table)) {
            info.constraints.push(constraint);
        }
    }

    let snapshot = CatalogSnapshot {
        schemas,
        tables: tables.into_values().collect(),
    };
    debug!(
        schemas = snapshot.schemas.len(),
        tables = snapshot.tables.len(),
        "catalog snapshot loaded"
    );
    Ok(snapshot)
}

type ConstraintKey = (String, String);

async fn load_constraints(
    bridge: &Bridge,
    cancel: &CancellationToken,
    tables: &BTreeMap<TableKey, TableInfo>,
) -> Result<Vec<(TableKey, ConstraintInfo)>, BridgeError> {
    // (schema, constraint) -> ordered (ordinal, table, column)
    let listing = list(bridge, KEY_COLUMNS_SQL, cancel).await?;
    let [cschema_idx, cname_idx, tschema_idx, tname_idx, column_idx, ordinal_idx] = listing
        .indexes([
            "CONSTRAINT_SCHEMA",
            "CONSTRAINT_NAME",
            "TABLE_SCHEMA",
            "TABLE_NAME",
            "COLUMN_NAME",
            "ORDINAL_POSITION",
        ])?;
    let mut key_columns: BTreeMap<ConstraintKey, Vec<(i64, TableKey, String)>> = BTreeMap::new();
    for row in &listing.rows {
        let (Some(cschema), Some(cname), Some(tschema), Some(tname), Some(column)) = (
            Listing::text(row, cschema_idx),
            Listing::text(row, cname_idx),
            Listing::text(row, tschema_idx),
            Listing::text(row, tname_idx),
            Listing::text(row, column_idx),
        ) else {
            continue;
        };
        let ordinal = Listing::int(row, ordinal_idx).unwrap_or(0);
        key_columns
            .entry(key(&cschema, &cname))
            .or_default()
            .push((ordinal, (tschema, tname), column));
    }
    for columns in key_columns.values_mut() {
        columns.sort_by_key(|(ordinal, _, _)| *ordinal);
    }

    let listing = list(bridge, REFERENTIAL_SQL, cancel).await?;
    let [schema_idx, name_idx, uschema_idx, uname_idx] = listing.indexes([
        "CONSTRAINT_SCHEMA",
        "CONSTRAINT_NAME",
        "UNIQUE_CONSTRAINT_SCHEMA",
        "UNIQUE_CONSTRAINT_NAME",
    ])?;
    let mut references: BTreeMap<ConstraintKey, ConstraintKey> = BTreeMap::new();
    for row in &listing.rows {
        if let (Some(schema), Some(name), Some(uschema), Some(uname)) = (
            Listing::text(row, schema_idx),
            Listing::text(row, name_idx),
            Listing::text(row, uschema_idx),
            Listing::text(row, uname_idx),
        ) {
            references.insert(key(&schema, &name), key(&uschema, &uname));
        }
    }

    let listing = list(bridge, CONSTRAINTS_SQL, cancel).await?;
    let [schema_idx, table_idx, name_idx, type_idx] = listing.indexes([
        "TABLE_SCHEMA",
        "TABLE_NAME",
        "CONSTRAINT_NAME",
        "CONSTRAINT_TYPE",
    ])?;
    let mut out = Vec::new();
    for row in &listing.rows {
        let (Some(schema), Some(table), Some(name), Some(kind)) = (
            Listing::text(row, schema_idx),
            Listing::text(row, table_idx),
            Listing::text(row, name_idx),
            Listing::text(row, type_idx).as_deref().and_then(ConstraintKind::from_constraint_type),
        ) else {
            continue;
        };
        let table_key = key(&schema, &table);
        let Some(info) = tables.get(&table_key) else {
            continue;
        };
        let columns: Vec<String> = key_columns
            .get(&key(&schema, &name))
            .map(|cols| cols.iter().map(|(_, _, c)| c.clone()).collect())
            .unwrap_or_default();
        let references = match kind {
            ConstraintKind::ForeignKey => references
                .get(&key(&schema, &name))
                .and_then(|target| key_columns.get(target))
                .and_then(|cols| {
                    let (_, (tschema, tname), _) = cols.first()?;
                    let target = tables.get(&key(tschema, tname));
                    Some(ForeignKeyRef {
                        schema: target.map_or_else(|| tschema.clone(), |t| t.schema.clone()),
                        table: target.map_or_else(|| tname.clone(), |t| t.name.clone()),
                        columns: cols.iter().map(|(_, _, c)| c.clone()).collect(),
                    })
                }),
            _ => None,
        };
        out.push((
            key(&info.schema, &info.name),
            ConstraintInfo {
                name,
                kind,
                columns,
                references,
            },
        ));
    }
    Ok(out)
}
