use crate::catalog::{table_key, Database, DEFAULT_SCHEMA};
use crate::information_schema;
use pgbridge_core::ResultSet;
use pgbridge_sql::{EvalError, Evaluator, RelationSource};

/// Read access to the database for the evaluator.
pub struct Reader<'a> {
    db: &'a Database,
    /// Every relation comes back empty: describe probes result columns
    /// without reading rows.
    probe: bool,
}

impl<'a> Reader<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db, probe: false }
    }

    pub fn probe(db: &'a Database) -> Self {
        Self { db, probe: true }
    }
}

impl RelationSource for Reader<'_> {
    fn relation(&self, parts: &[String]) -> Result<ResultSet, EvalError> {
        let unknown = || EvalError::UnknownRelation(parts.join("."));
        let (schema, name) = match parts {
            [.., schema, name] => (schema.as_str(), name.as_str()),
            [name] => (DEFAULT_SCHEMA, name.as_str()),
            [] => return Err(unknown()),
        };
        if schema.eq_ignore_ascii_case(information_schema::SCHEMA) {
            let mut set = information_schema::view(self.db, name).ok_or_else(unknown)?;
            if self.probe {
                set.rows.clear();
            }
            return Ok(set);
        }
        let table = self.db.table(&table_key(schema, name)).ok_or_else(unknown)?;
        let Some(query) = &table.view else {
            let rows = if self.probe {
                Vec::new()
            } else {
                table.rows.values().cloned().collect()
            };
            return Ok(ResultSet::new(table.result_columns(), rows));
        };
        let mut set = Evaluator::new(self, &[]).query(query)?;
        for (column, def) in set.columns.iter_mut().zip(&table.columns) {
            column.name = def.name.clone();
        }
        Ok(set)
    }
}
