//! Answers `pg_catalog` queries locally from backend metadata so ORMs and
//! admin tools can introspect the backend. Catalog statements never reach
//! the backend.

mod relations;
mod snapshot;

pub use relations::CATALOG_RELATIONS;
pub use snapshot::{
    CatalogSnapshot, ColumnInfo, ConstraintInfo, ConstraintKind, ForeignKeyRef, TableInfo,
    TableKind,
};

use crate::engine::{EvalError, Evaluator, RelationSource};
use pgbridge_core::oid::BOOTSTRAP_OWNER_OID;
use pgbridge_core::pgtype::format_type;
use pgbridge_core::{GatewayError, OidRegistry, ResultSet, SchemaMapping, Value};
use relations::CatalogData;
use sqlparser::ast::{visit_expressions, visit_relations, DataType, Expr, Statement};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use std::ops::ControlFlow;
use std::sync::Arc;
use tracing::debug;

/// Catalog functions whose presence routes a statement to the emulator.
const CATALOG_FUNCTIONS: &[&str] = &[
    "format_type",
    "pg_table_is_visible",
    "pg_get_constraintdef",
    "pg_get_expr",
    "pg_get_userbyid",
    "current_schema",
    "current_schemas",
    "obj_description",
    "col_description",
    "version",
];

/// Per-statement inputs: metadata, mapping and the session identity.
#[derive(Debug, Clone, Copy)]
pub struct CatalogContext<'a> {
    pub snapshot: &'a CatalogSnapshot,
    pub mapping: &'a SchemaMapping,
    pub user: &'a str,
    pub database: &'a str,
}

/// True when `sql` reads `pg_catalog` relations or calls catalog functions.
/// Statements the PostgreSQL grammar cannot parse are left to the backend.
pub fn is_catalog_query(sql: &str) -> bool {
    let Ok(statements) = Parser::parse_sql(&PostgreSqlDialect {}, sql) else {
        return false;
    };
    statements.iter().any(|statement| {
        if !matches!(statement, Statement::Query(_)) {
            return false;
        }
        let relations = visit_relations(statement, |name| {
            let parts: Vec<String> = name.0.iter().map(|i| i.value.to_ascii_lowercase()).collect();
            let catalog = parts.len() > 1 && parts[0] == "pg_catalog";
            let pg_name = parts.last().is_some_and(|p| p.starts_with("pg_"));
            if catalog || pg_name {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });
        if relations.is_break() {
            return true;
        }
        visit_expressions(statement, |expr| {
            if is_catalog_expr(expr) {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })
        .is_break()
    })
}

fn is_catalog_expr(expr: &Expr) -> bool {
    match expr {
        Expr::Cast { data_type, .. } => is_regclass(data_type),
        Expr::Function(func) => {
            let parts: Vec<String> = func
                .name
                .0
                .iter()
                .map(|i| i.value.to_ascii_lowercase())
                .collect();
            let qualified = parts.len() > 1 && parts[0] == "pg_catalog";
            qualified
                || parts
                    .last()
                    .is_some_and(|p| CATALOG_FUNCTIONS.contains(&p.as_str()))
        }
        Expr::Identifier(ident) => {
            ident.quote_style.is_none() && ident.value.eq_ignore_ascii_case("current_schema")
        }
        _ => false,
    }
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

struct CatalogSource<'a> {
    data: CatalogData<'a>,
    ctx: &'a CatalogContext<'a>,
    server_version: &'a str,
}

impl RelationSource for CatalogSource<'_> {
    fn relation(&self, parts: &[String]) -> Result<ResultSet, EvalError> {
        let qualified = parts.join(".");
        let (schema, relname) = match parts {
            [relname] => (None, relname),
            [schema, relname] => (Some(schema), relname),
            _ => return Err(EvalError::UnknownRelation(qualified)),
        };
        if schema.is_some_and(|s| !s.eq_ignore_ascii_case("pg_catalog")) {
            return Err(EvalError::UnknownRelation(qualified));
        }
        self.data
            .relation(relname)
            .ok_or(EvalError::UnknownRelation(qualified))
    }

    fn call(&self, name: &str, args: &[Value]) -> Option<Result<Value, EvalError>> {
        let arg = |idx: usize| args.get(idx).cloned().unwrap_or(Value::Null);
        let value = match name {
            "format_type" => {
                let Some(type_oid) = arg(0).as_i64() else {
                    return Some(Ok(Value::Null));
                };
                let typmod = arg(1).as_i64().unwrap_or(-1);
                format_type(type_oid as u32, typmod as i32)
                    .map(Value::Text)
                    .unwrap_or(Value::Null)
            }
            "pg_table_is_visible" => match arg(0).as_i64() {
                Some(oid) => Value::Bool(self.is_visible(oid)),
                None => Value::Null,
            },
            "pg_get_constraintdef" => match arg(0).as_i64() {
                Some(oid) => self
                    .constraint_definition(oid)
                    .map(Value::Text)
                    .unwrap_or(Value::Null),
                None => Value::Null,
            },
            "pg_get_expr" => match arg(0) {
                Value::Null => Value::Null,
                v => Value::Text(v.to_string()),
            },
            "current_schema" => Value::Text(self.ctx.mapping.client_schema.to_lowercase()),
            "current_schemas" => {
                let mut schemas = Vec::new();
                if arg(0).as_bool() == Some(true) {
                    schemas.push(Value::Text("pg_catalog".into()));
                }
                schemas.push(Value::Text(self.ctx.mapping.client_schema.to_lowercase()));
                Value::Array(schemas)
            }
            "pg_get_userbyid" => match arg(0).as_i64() {
                Some(oid) if oid == i64::from(BOOTSTRAP_OWNER_OID) => {
                    Value::Text(self.ctx.user.to_string())
                }
                Some(_) => Value::Text("unknown".into()),
                None => Value::Null,
            },
            "current_user" | "session_user" | "user" => Value::Text(self.ctx.user.to_string()),
            "current_database" | "current_catalog" => Value::Text(self.ctx.database.to_string()),
            "version" => Value::Text(format!(
                "PostgreSQL {} (pgbridge {})",
                self.server_version,
                env!("CARGO_PKG_VERSION")
            )),
            "obj_description" | "col_description" | "shobj_description" => Value::Null,
            "has_table_privilege" | "has_schema_privilege" | "has_database_privilege" => {
                Value::Bool(true)
            }
            "pg_encoding_to_char" => Value::Text("UTF8".into()),
            _ => return None,
        };
        Some(Ok(value))
    }

    fn regclass(&self, name: &str) -> Option<i64> {
        let parts: Vec<String> = name
            .split('.')
            .map(|p| p.trim().trim_matches('"').to_string())
            .collect();
        let (schema, table) = match parts.as_slice() {
            [table] => (None, table.as_str()),
            [schema, table] => (Some(schema.as_str()), table.as_str()),
            _ => return None,
        };
        if schema.map_or(true, |s| s.eq_ignore_ascii_case("pg_catalog")) {
            if let Some((_, oid)) = CATALOG_RELATIONS
                .iter()
                .find(|(rel, _)| rel.eq_ignore_ascii_case(table))
            {
                return Some(*oid);
            }
        }
        let backend_schema = match schema {
            Some(s) => self.ctx.mapping.to_backend(s).unwrap_or(s).to_string(),
            None => self.ctx.mapping.backend_schema.clone(),
        };
        self.ctx
            .snapshot
            .table(&backend_schema, table)
            .map(|t| i64::from(self.data.table_oid(t)))
    }
}

impl CatalogSource<'_> {
    /// Visible means reachable through the search path: the client schema
    /// or `pg_catalog`.
    fn is_visible(&self, oid: i64) -> bool {
        self.ctx.snapshot.tables.iter().any(|table| {
            if self.ctx.mapping.to_client(&table.schema).is_none() {
                return false;
            }
            i64::from(self.data.table_oid(table)) == oid
                || table
                    .constraints
                    .iter()
                    .any(|c| i64::from(self.data.index_oid(table, c)) == oid)
        }) || CATALOG_RELATIONS.iter().any(|(_, rel)| *rel == oid)
    }

    fn constraint_definition(&self, oid: i64) -> Option<String> {
        for table in &self.ctx.snapshot.tables {
            for constraint in &table.constraints {
                if i64::from(self.data.constraint_oid(table, constraint)) != oid {
                    continue;
                }
                let columns = lower_list(&constraint.columns);
                let def = match constraint.kind {
                    ConstraintKind::PrimaryKey => format!("PRIMARY KEY ({columns})"),
                    ConstraintKind::Unique => format!("UNIQUE ({columns})"),
                    ConstraintKind::ForeignKey => {
                        let target = constraint.references.as_ref()?;
                        let (_, schema) = self.data.namespace(&target.schema);
                        let table_name = if self.ctx.mapping.to_client(&target.schema).is_some() {
                            target.table.to_lowercase()
                        } else {
                            format!("{schema}.{}", target.table.to_lowercase())
                        };
                        format!(
                            "FOREIGN KEY ({columns}) REFERENCES {table_name}({})",
                            lower_list(&target.columns)
                        )
                    }
                };
                return Some(def);
            }
        }
        None
    }
}

fn lower_list(columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| c.to_lowercase())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Evaluates catalog statements against synthesized relations. OIDs come
/// from a registry shared by every session.
#[derive(Debug, Clone)]
pub struct CatalogEmulator {
    registry: Arc<OidRegistry>,
    server_version: String,
}

impl CatalogEmulator {
    pub fn new(registry: Arc<OidRegistry>, server_version: impl Into<String>) -> Self {
        Self {
            registry,
            server_version: server_version.into(),
        }
    }

    pub fn registry(&self) -> &Arc<OidRegistry> {
        &self.registry
    }

    pub fn execute(
        &self,
        sql: &str,
        ctx: &CatalogContext<'_>,
        params: &[Value],
    ) -> Result<ResultSet, GatewayError> {
        let statements = Parser::parse_sql(&PostgreSqlDialect {}, sql)
            .map_err(|e| GatewayError::backend("42601", e.to_string()))?;
        let query = match statements.as_slice() {
            [Statement::Query(query)] => query,
            _ => {
                return Err(GatewayError::UnsupportedCatalog(
                    "only single SELECT statements are emulated".into(),
                ))
            }
        };
        let source = CatalogSource {
            data: CatalogData {
                snapshot: ctx.snapshot,
                mapping: ctx.mapping,
                registry: &self.registry,
            },
            ctx,
            server_version: &self.server_version,
        };
        let result = Evaluator::new(&source, params)
            .query(query)
            .map_err(catalog_error)?;
        debug!(
            rows = result.rows.len(),
            columns = result.columns.len(),
            "catalog query answered"
        );
        Ok(result)
    }

    /// Result shape of a catalog statement, evaluated with NULL parameters.
    pub fn describe(
        &self,
        sql: &str,
        ctx: &CatalogContext<'_>,
        param_count: usize,
    ) -> Result<ResultSet, GatewayError> {
        let params = vec![Value::Null; param_count];
        let mut result = self.execute(sql, ctx, &params)?;
        result.rows.clear();
        Ok(result)
    }
}

fn catalog_error(err: EvalError) -> GatewayError {
    match err {
        EvalError::UnknownRelation(_) | EvalError::Unsupported(_) | EvalError::UnknownFunction(_) => {
            GatewayError::UnsupportedCatalog(err.to_string())
        }
        other => GatewayError::backend(other.sqlstate(), other.to_string()),
    }
}
