//! Synthesized `pg_catalog` relations built from a [`CatalogSnapshot`].
//!
//! Names are reported lowercased. The mapped backend schema appears as the
//! client schema in namespace 2200; every OID is keyed by the backend schema
//! spelling recorded in the snapshot, so it stays stable across sessions.

use super::snapshot::{CatalogSnapshot, ConstraintInfo, ConstraintKind, TableInfo};
use pgbridge_core::oid::{
    BOOTSTRAP_OWNER_OID, INFORMATION_SCHEMA_NAMESPACE_OID, PG_CATALOG_NAMESPACE_OID,
    PUBLIC_NAMESPACE_OID,
};
use pgbridge_core::pgtype::{type_modifier, type_modifier_for, BUILTIN_TYPES};
use pgbridge_core::{Column, OidRegistry, PgType, ResultSet, Row, SchemaMapping, Value};

/// Relations the emulator can answer, with the OID `'name'::regclass` gives.
pub const CATALOG_RELATIONS: &[(&str, i64)] = &[
    ("pg_namespace", 2615),
    ("pg_class", 1259),
    ("pg_attribute", 1249),
    ("pg_constraint", 2606),
    ("pg_type", 1247),
    ("pg_index", 2610),
    ("pg_attrdef", 2604),
];

const HEAP_AM_OID: i64 = 2;
const BTREE_AM_OID: i64 = 403;

pub(crate) struct CatalogData<'a> {
    pub snapshot: &'a CatalogSnapshot,
    pub mapping: &'a SchemaMapping,
    pub registry: &'a OidRegistry,
}

fn col(name: &str, type_name: &str) -> Column {
    Column::new(name, type_name)
}

fn oid(value: u32) -> Value {
    Value::Int(i64::from(value))
}

fn text(value: &str) -> Value {
    Value::Text(value.to_string())
}

fn name(value: &str) -> Value {
    Value::Text(value.to_lowercase())
}

impl<'a> CatalogData<'a> {
    /// Builds the named relation; `None` when it is not emulated.
    pub fn relation(&self, relname: &str) -> Option<ResultSet> {
        let set = match relname.to_ascii_lowercase().as_str() {
            "pg_namespace" => self.pg_namespace(),
            "pg_class" => self.pg_class(),
            "pg_attribute" => self.pg_attribute(),
            "pg_constraint" => self.pg_constraint(),
            "pg_type" => pg_type(),
            "pg_index" => self.pg_index(),
            "pg_attrdef" => self.pg_attrdef(),
            _ => return None,
        };
        Some(set)
    }

    /// Namespace OID and client-visible name for a backend schema.
    pub fn namespace(&self, schema: &str) -> (u32, String) {
        if let Some(client) = self.mapping.to_client(schema) {
            return (PUBLIC_NAMESPACE_OID, client.to_lowercase());
        }
        (self.registry.namespace_oid(schema), schema.to_lowercase())
    }

    pub fn table_oid(&self, table: &TableInfo) -> u32 {
        self.registry.table_oid(&table.schema, &table.name)
    }

    pub fn constraint_oid(&self, table: &TableInfo, constraint: &ConstraintInfo) -> u32 {
        self.registry
            .constraint_oid(&table.schema, &table.name, &constraint.name)
    }

    pub fn index_oid(&self, table: &TableInfo, constraint: &ConstraintInfo) -> u32 {
        self.registry
            .index_oid(&table.schema, &table.name, &constraint.name)
    }

    fn indexed(table: &TableInfo) -> impl Iterator<Item = &ConstraintInfo> {
        table
            .constraints
            .iter()
            .filter(|c| matches!(c.kind, ConstraintKind::PrimaryKey | ConstraintKind::Unique))
    }

    fn pg_namespace(&self) -> ResultSet {
        let columns = vec![
            col("oid", "OID"),
            col("nspname", "NAME"),
            col("nspowner", "OID"),
            col("nspacl", "VARCHAR"),
        ];
        let mut rows: Vec<Row> = vec![
            vec![oid(PG_CATALOG_NAMESPACE_OID), text("pg_catalog"), oid(BOOTSTRAP_OWNER_OID), Value::Null],
            vec![
                oid(PUBLIC_NAMESPACE_OID),
                name(&self.mapping.client_schema),
                oid(BOOTSTRAP_OWNER_OID),
                Value::Null,
            ],
            vec![
                oid(INFORMATION_SCHEMA_NAMESPACE_OID),
                text("information_schema"),
                oid(BOOTSTRAP_OWNER_OID),
                Value::Null,
            ],
        ];
        for schema in &self.snapshot.schemas {
            let (ns_oid, ns_name) = self.namespace(schema);
            if SchemaMapping::is_reserved(schema)
                || rows.iter().any(|r| r[0] == oid(ns_oid) || r[1] == text(&ns_name))
            {
                continue;
            }
            rows.push(vec![oid(ns_oid), text(&ns_name), oid(BOOTSTRAP_OWNER_OID), Value::Null]);
        }
        ResultSet::new(columns, rows)
    }

    fn pg_class(&self) -> ResultSet {
        let columns = vec![
            col("oid", "OID"),
            col("relname", "NAME"),
            col("relnamespace", "OID"),
            col("relkind", "PG_CHAR"),
            col("relowner", "OID"),
            col("relam", "OID"),
            col("relhasindex", "BIT"),
            col("relnatts", "SMALLINT"),
            col("relispartition", "BIT"),
            col("reltuples", "REAL"),
        ];
        let mut rows = Vec::new();
        for table in &self.snapshot.tables {
            let (ns_oid, _) = self.namespace(&table.schema);
            let has_index = Self::indexed(table).next().is_some();
            let am = match table.kind.relkind() {
                "r" => HEAP_AM_OID,
                _ => 0,
            };
            rows.push(vec![
                oid(self.table_oid(table)),
                name(&table.name),
                oid(ns_oid),
                text(table.kind.relkind()),
                oid(BOOTSTRAP_OWNER_OID),
                Value::Int(am),
                Value::Bool(has_index),
                Value::Int(table.columns.len() as i64),
                Value::Bool(false),
                Value::Float(-1.0),
            ]);
            for constraint in Self::indexed(table) {
                rows.push(vec![
                    oid(self.index_oid(table, constraint)),
                    name(&constraint.name),
                    oid(ns_oid),
                    text("i"),
                    oid(BOOTSTRAP_OWNER_OID),
                    Value::Int(BTREE_AM_OID),
                    Value::Bool(false),
                    Value::Int(constraint.columns.len() as i64),
                    Value::Bool(false),
                    Value::Float(0.0),
                ]);
            }
        }
        ResultSet::new(columns, rows)
    }

    fn pg_attribute(&self) -> ResultSet {
        let columns = vec![
            col("attrelid", "OID"),
            col("attname", "NAME"),
            col("atttypid", "OID"),
            col("attnum", "SMALLINT"),
            col("attlen", "SMALLINT"),
            col("atttypmod", "INTEGER"),
            col("attnotnull", "BIT"),
            col("atthasdef", "BIT"),
            col("attisdropped", "BIT"),
            col("attidentity", "PG_CHAR"),
            col("attgenerated", "PG_CHAR"),
        ];
        let mut rows = Vec::new();
        for table in &self.snapshot.tables {
            let rel_oid = self.table_oid(table);
            for column in &table.columns {
                let pg = PgType::from_backend(&column.data_type);
                let mut typmod =
                    type_modifier_for(&pg, column.char_length, column.precision, column.scale);
                if typmod == -1 {
                    typmod = type_modifier(&column.data_type);
                }
                rows.push(vec![
                    oid(rel_oid),
                    name(&column.name),
                    oid(pg.oid),
                    Value::Int(i64::from(column.ordinal)),
                    Value::Int(i64::from(pg.len)),
                    Value::Int(i64::from(typmod)),
                    Value::Bool(!column.nullable),
                    Value::Bool(column.default.is_some()),
                    Value::Bool(false),
                    text(""),
                    text(""),
                ]);
            }
        }
        ResultSet::new(columns, rows)
    }

    fn pg_constraint(&self) -> ResultSet {
        let columns = vec![
            col("oid", "OID"),
            col("conname", "NAME"),
            col("connamespace", "OID"),
            col("contype", "PG_CHAR"),
            col("conrelid", "OID"),
            col("confrelid", "OID"),
            col("conkey", "SMALLINT[]"),
            col("confkey", "SMALLINT[]"),
            col("conindid", "OID"),
            col("condeferrable", "BIT"),
            col("condeferred", "BIT"),
            col("convalidated", "BIT"),
        ];
        let mut rows = Vec::new();
        for table in &self.snapshot.tables {
            let (ns_oid, _) = self.namespace(&table.schema);
            for constraint in &table.constraints {
                let conkey = Value::Array(attnums(table, &constraint.columns));
                let (confrelid, confkey, conindid) = match constraint.kind {
                    ConstraintKind::ForeignKey => self.foreign_target(constraint),
                    _ => (0, Value::Null, self.index_oid(table, constraint)),
                };
                rows.push(vec![
                    oid(self.constraint_oid(table, constraint)),
                    name(&constraint.name),
                    oid(ns_oid),
                    text(constraint.kind.contype()),
                    oid(self.table_oid(table)),
                    oid(confrelid),
                    conkey,
                    confkey,
                    oid(conindid),
                    Value::Bool(false),
                    Value::Bool(false),
                    Value::Bool(true),
                ]);
            }
        }
        ResultSet::new(columns, rows)
    }

    /// `(confrelid, confkey, conindid)` for a foreign key.
    fn foreign_target(&self, constraint: &ConstraintInfo) -> (u32, Value, u32) {
        let Some(target) = &constraint.references else {
            return (0, Value::Null, 0);
        };
        match self.snapshot.table(&target.schema, &target.table) {
            Some(referenced) => {
                let keys = Value::Array(attnums(referenced, &target.columns));
                let index = Self::indexed(referenced)
                    .find(|c| same_columns(&c.columns, &target.columns))
                    .map(|c| self.index_oid(referenced, c))
                    .unwrap_or(0);
                (self.table_oid(referenced), keys, index)
            }
            None => (
                self.registry.table_oid(&target.schema, &target.table),
                Value::Null,
                0,
            ),
        }
    }

    fn pg_index(&self) -> ResultSet {
        let columns = vec![
            col("indexrelid", "OID"),
            col("indrelid", "OID"),
            col("indnatts", "SMALLINT"),
            col("indisunique", "BIT"),
            col("indisprimary", "BIT"),
            col("indkey", "SMALLINT[]"),
        ];
        let mut rows = Vec::new();
        for table in &self.snapshot.tables {
            for constraint in Self::indexed(table) {
                rows.push(vec![
                    oid(self.index_oid(table, constraint)),
                    oid(self.table_oid(table)),
                    Value::Int(constraint.columns.len() as i64),
                    Value::Bool(true),
                    Value::Bool(constraint.kind == ConstraintKind::PrimaryKey),
                    Value::Array(attnums(table, &constraint.columns)),
                ]);
            }
        }
        ResultSet::new(columns, rows)
    }

    fn pg_attrdef(&self) -> ResultSet {
        let columns = vec![
            col("oid", "OID"),
            col("adrelid", "OID"),
            col("adnum", "SMALLINT"),
            col("adbin", "VARCHAR"),
        ];
        let mut rows = Vec::new();
        for table in &self.snapshot.tables {
            for column in &table.columns {
                let Some(default) = &column.default else {
                    continue;
                };
                rows.push(vec![
                    oid(self.registry.column_oid(&table.schema, &table.name, &column.name)),
                    oid(self.table_oid(table)),
                    Value::Int(i64::from(column.ordinal)),
                    text(default),
                ]);
            }
        }
        ResultSet::new(columns, rows)
    }
}

fn pg_type() -> ResultSet {
    let columns = vec![
        col("oid", "OID"),
        col("typname", "NAME"),
        col("typnamespace", "OID"),
        col("typlen", "SMALLINT"),
        col("typtype", "PG_CHAR"),
        col("typbasetype", "OID"),
        col("typtypmod", "INTEGER"),
        col("typnotnull", "BIT"),
        col("typelem", "OID"),
    ];
    let rows = BUILTIN_TYPES
        .iter()
        .map(|t| {
            vec![
                oid(t.oid),
                text(t.name),
                oid(PG_CATALOG_NAMESPACE_OID),
                Value::Int(i64::from(t.len)),
                text("b"),
                Value::Int(0),
                Value::Int(-1),
                Value::Bool(false),
                oid(t.elem),
            ]
        })
        .collect();
    ResultSet::new(columns, rows)
}

/// 1-based attribute numbers of `columns` in `table`, in the given order.
fn attnums(table: &TableInfo, columns: &[String]) -> Vec<Value> {
    columns
        .iter()
        .map(|c| match table.attnum(c) {
            Some(n) => Value::Int(i64::from(n)),
            None => Value::Null,
        })
        .collect()
}

fn same_columns(a: &[String], b: &[String]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.eq_ignore_ascii_case(y))
}
