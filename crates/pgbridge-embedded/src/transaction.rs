//! Undo logging. Every change a statement makes is recorded so the statement,
//! the enclosing transaction, or the tail after a savepoint can be reverted.

use crate::catalog::{Database, Table, TableKey};
use crate::error::EngineError;
use pgbridge_core::Row;

#[derive(Debug, Clone)]
pub enum Undo {
    Insert { table: TableKey, row_id: u64 },
    Delete { table: TableKey, row_id: u64, row: Row },
    Update { table: TableKey, row_id: u64, row: Row },
    Create { table: TableKey },
    Drop { table: Box<Table> },
}

impl Undo {
    fn revert(self, db: &mut Database) {
        match self {
            Undo::Insert { table, row_id } => {
                if let Some(table) = db.table_mut(&table) {
                    table.rows.remove(&row_id);
                }
            }
            Undo::Delete { table, row_id, row } | Undo::Update { table, row_id, row } => {
                if let Some(table) = db.table_mut(&table) {
                    table.rows.insert(row_id, row);
                }
            }
            Undo::Create { table } => {
                db.remove_table(&table);
            }
            Undo::Drop { table } => db.insert_table(*table),
        }
    }
}

#[derive(Debug, Default)]
pub struct UndoLog {
    entries: Vec<Undo>,
}

impl UndoLog {
    pub fn push(&mut self, entry: Undo) {
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn append(&mut self, other: UndoLog) {
        self.entries.extend(other.entries);
    }

    /// Reverts entries newer than `mark`, newest first.
    pub fn revert_to(&mut self, db: &mut Database, mark: usize) {
        while self.entries.len() > mark {
            if let Some(entry) = self.entries.pop() {
                entry.revert(db);
            }
        }
    }

    pub fn revert_all(&mut self, db: &mut Database) {
        self.revert_to(db, 0);
    }
}

/// An open transaction: its undo log and named savepoints as log marks.
#[derive(Debug, Default)]
pub struct Transaction {
    pub log: UndoLog,
    savepoints: Vec<(String, usize)>,
}

impl Transaction {
    pub fn savepoint(&mut self, name: &str) {
        self.savepoints.push((name.to_string(), self.log.len()));
    }

    fn find(&self, name: &str) -> Result<usize, EngineError> {
        self.savepoints
            .iter()
            .rposition(|(n, _)| n.eq_ignore_ascii_case(name))
            .ok_or_else(|| EngineError::UnknownSavepoint(name.to_string()))
    }

    /// Undoes everything after the savepoint. The savepoint itself stays so
    /// it can be rolled back to again.
    pub fn rollback_to(&mut self, db: &mut Database, name: &str) -> Result<(), EngineError> {
        let idx = self.find(name)?;
        let mark = self.savepoints[idx].1;
        self.savepoints.truncate(idx + 1);
        self.log.revert_to(db, mark);
        Ok(())
    }

    /// Forgets the savepoint and every later one; their changes stay.
    pub fn release(&mut self, name: &str) -> Result<(), EngineError> {
        let idx = self.find(name)?;
        self.savepoints.truncate(idx);
        Ok(())
    }
}
