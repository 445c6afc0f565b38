use pgbridge_core::{Column, Row, TypeSpec};
use pgbridge_sql::catalog::ConstraintKind;
use sqlparser::ast::{DataType, Expr, ObjectName, Query};
use std::collections::BTreeMap;

/// Schema unqualified names resolve to.
pub const DEFAULT_SCHEMA: &str = "SQLUser";

/// Case-insensitive (schema, name) key.
pub type TableKey = (String, String);

pub fn table_key(schema: &str, name: &str) -> TableKey {
    (schema.to_ascii_uppercase(), name.to_ascii_uppercase())
}

/// Splits `[schema.]name` and applies the default schema. The default
/// schema keeps its canonical spelling whatever case it was written in.
pub fn qualified_name(name: &ObjectName) -> (String, String) {
    let parts: Vec<&str> = name.0.iter().map(|i| i.value.as_str()).collect();
    let (schema, table) = match parts.as_slice() {
        [.., schema, table] => (*schema, *table),
        [table] => (DEFAULT_SCHEMA, *table),
        [] => (DEFAULT_SCHEMA, ""),
    };
    let schema = if schema.eq_ignore_ascii_case(DEFAULT_SCHEMA) {
        DEFAULT_SCHEMA
    } else {
        schema
    };
    (schema.to_string(), table.to_string())
}

/// Backend spelling of a declared column type.
pub fn backend_type(data_type: &DataType) -> String {
    let spec = TypeSpec::parse(&data_type.to_string());
    let mods = &spec.modifiers;
    let with_mods = |base: &str| {
        if mods.is_empty() {
            base.to_string()
        } else {
            format!("{base}({})", mods.join(","))
        }
    };
    match spec.base.as_str() {
        "INT" | "INTEGER" | "INT4" | "MEDIUMINT" => "INTEGER".into(),
        "BIGINT" | "INT8" => "BIGINT".into(),
        "SMALLINT" | "INT2" => "SMALLINT".into(),
        "DOUBLE" | "DOUBLE PRECISION" | "FLOAT" | "FLOAT8" | "REAL" | "FLOAT4" => "DOUBLE".into(),
        "NUMERIC" | "DECIMAL" => with_mods("NUMERIC"),
        "BOOLEAN" | "BOOL" | "BIT" => "BIT".into(),
        "TEXT" | "LONGVARCHAR" | "CLOB" => "LONGVARCHAR".into(),
        "VARCHAR" | "NVARCHAR" | "STRING" => with_mods("VARCHAR"),
        "CHAR" | "CHARACTER" | "BPCHAR" => with_mods("CHAR"),
        "TIMESTAMP" | "DATETIME" | "TIMESTAMPTZ" => "TIMESTAMP".into(),
        "VARBINARY" | "BYTEA" | "BINARY" => with_mods("VARBINARY"),
        "VECTOR" => format!("VECTOR({})", mods.join(", ")),
        other => with_mods(other),
    }
}

#[derive(Debug, Clone)]
pub struct ColumnDef {
    pub name: String,
    /// Full backend type, e.g. `VARCHAR(50)` or `VECTOR(FLOAT, 3)`.
    pub type_name: String,
    pub nullable: bool,
    pub default: Option<Expr>,
}

impl ColumnDef {
    fn spec(&self) -> TypeSpec {
        TypeSpec::parse(&self.type_name)
    }

    /// `DATA_TYPE` as INFORMATION_SCHEMA reports it.
    pub fn data_type(&self) -> String {
        self.spec().base.to_ascii_lowercase()
    }

    pub fn char_length(&self) -> Option<i64> {
        let spec = self.spec();
        match spec.base.as_str() {
            "VARCHAR" | "CHAR" => spec.numeric_modifiers().first().map(|n| i64::from(*n)),
            _ => None,
        }
    }

    pub fn precision(&self) -> Option<i64> {
        self.numeric_modifier(0)
    }

    pub fn scale(&self) -> Option<i64> {
        self.numeric_modifier(1)
            .or_else(|| self.precision().map(|_| 0))
    }

    fn numeric_modifier(&self, idx: usize) -> Option<i64> {
        let spec = self.spec();
        match spec.base.as_str() {
            "NUMERIC" => spec.numeric_modifiers().get(idx).map(|n| i64::from(*n)),
            _ => None,
        }
    }

    /// Declared element count of a `VECTOR(FLOAT, n)` column.
    pub fn dimension(&self) -> Option<usize> {
        let spec = self.spec();
        if spec.base != "VECTOR" {
            return None;
        }
        spec.numeric_modifiers().last().map(|n| *n as usize)
    }

    pub fn to_column(&self) -> Column {
        Column {
            name: self.name.clone(),
            type_name: self.type_name.clone(),
            nullable: self.nullable,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub table: TableKey,
    pub columns: Vec<String>,
    /// Primary or unique constraint on the referenced table the key matches.
    pub unique_constraint: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constraint {
    pub name: String,
    pub kind: ConstraintKind,
    pub columns: Vec<String>,
    pub references: Option<Reference>,
}

impl Constraint {
    /// `CONSTRAINT_TYPE` as INFORMATION_SCHEMA reports it.
    pub fn constraint_type(&self) -> &'static str {
        match self.kind {
            ConstraintKind::PrimaryKey => "PRIMARY KEY",
            ConstraintKind::Unique => "UNIQUE",
            ConstraintKind::ForeignKey => "FOREIGN KEY",
        }
    }

    pub fn is_key(&self) -> bool {
        matches!(
            self.kind,
            ConstraintKind::PrimaryKey | ConstraintKind::Unique
        )
    }
}

/// A base table or a view. Views carry their defining query and no rows.
#[derive(Debug, Clone)]
pub struct Table {
    pub schema: String,
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub constraints: Vec<Constraint>,
    pub rows: BTreeMap<u64, Row>,
    pub next_row_id: u64,
    pub view: Option<Box<Query>>,
}

impl Table {
    pub fn new(schema: impl Into<String>, name: impl Into<String>, columns: Vec<ColumnDef>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
            columns,
            constraints: Vec::new(),
            rows: BTreeMap::new(),
            next_row_id: 1,
            view: None,
        }
    }

    pub fn key(&self) -> TableKey {
        table_key(&self.schema, &self.name)
    }

    pub fn is_view(&self) -> bool {
        self.view.is_some()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn column_indexes(&self, names: &[String]) -> Option<Vec<usize>> {
        names.iter().map(|n| self.column_index(n)).collect()
    }

    pub fn primary_key(&self) -> Option<&Constraint> {
        self.constraints
            .iter()
            .find(|c| c.kind == ConstraintKind::PrimaryKey)
    }

    pub fn result_columns(&self) -> Vec<Column> {
        self.columns.iter().map(ColumnDef::to_column).collect()
    }

    pub fn insert_row(&mut self, row: Row) -> u64 {
        let row_id = self.next_row_id;
        self.next_row_id += 1;
        self.rows.insert(row_id, row);
        row_id
    }
}

/// Every table and view, keyed case-insensitively.
#[derive(Debug, Default)]
pub struct Database {
    tables: BTreeMap<TableKey, Table>,
}

impl Database {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(&self, key: &TableKey) -> Option<&Table> {
        self.tables.get(key)
    }

    pub fn table_mut(&mut self, key: &TableKey) -> Option<&mut Table> {
        self.tables.get_mut(key)
    }

    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.values()
    }

    pub fn insert_table(&mut self, table: Table) {
        self.tables.insert(table.key(), table);
    }

    pub fn remove_table(&mut self, key: &TableKey) -> Option<Table> {
        self.tables.remove(key)
    }

    /// Schemas holding at least one table, plus the default schema.
    pub fn schemas(&self) -> Vec<String> {
        let mut schemas = vec![DEFAULT_SCHEMA.to_string()];
        for table in self.tables.values() {
            if !schemas.iter().any(|s| s.eq_ignore_ascii_case(&table.schema)) {
                schemas.push(table.schema.clone());
            }
        }
        schemas
    }

    /// Whether any constraint in `schema` is already called `name`.
    pub fn constraint_exists(&self, schema: &str, name: &str) -> bool {
        self.tables
            .values()
            .filter(|t| t.schema.eq_ignore_ascii_case(schema))
            .flat_map(|t| t.constraints.iter())
            .any(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Foreign keys of other tables pointing at `key`.
    pub fn referencing(&self, key: &TableKey) -> Vec<(&Table, &Constraint)> {
        self.tables
            .values()
            .flat_map(|t| t.constraints.iter().map(move |c| (t, c)))
            .filter(|(_, c)| c.references.as_ref().is_some_and(|r| &r.table == key))
            .collect()
    }
}
