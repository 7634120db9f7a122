//! In-memory reference runner.
//!
//! Evaluates the statement tree directly (the rendered text is only logged),
//! over tables derived from a descriptor registry. All connections of one
//! `MemoryDatabase` share its tables; writes apply immediately and a
//! connection's `rollback` restores the state captured at its first write.

mod eval;
mod function;

#[cfg(test)]
pub(crate) use eval::like_match;

use crate::{
    db::{
        sql::Statement,
        store::{PreparedStatement, Row, StoreError, StoreRunner},
    },
    model::{DescriptorRegistry, KeyGeneration},
    value::Value,
};
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard},
};

///
/// MemoryTable
///

#[derive(Clone, Debug)]
pub(crate) struct MemoryTable {
    pub(crate) name: String,
    pub(crate) columns: Vec<String>,
    pub(crate) rows: Vec<Row>,
    key: Vec<usize>,
    identity: Option<usize>,
    not_null: Vec<usize>,
    next_identity: i64,
}

impl MemoryTable {
    fn new(name: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            columns,
            rows: Vec::new(),
            key: Vec::new(),
            identity: None,
            not_null: Vec::new(),
            next_identity: 0,
        }
    }

    pub(crate) fn position(&self, column: &str) -> Result<usize, StoreError> {
        self.columns
            .iter()
            .position(|c| c == column)
            .ok_or_else(|| StoreError::UnknownColumn {
                table: self.name.clone(),
                column: column.to_string(),
            })
    }

    fn key_of(&self, row: &Row) -> Vec<Value> {
        self.key.iter().map(|&i| row[i].clone()).collect()
    }

    // Not-null and primary-key uniqueness; `replacing` is the row being
    // overwritten by an update.
    fn check_row(&self, row: &Row, replacing: Option<usize>) -> Result<(), StoreError> {
        for &i in &self.not_null {
            if row[i].is_null() {
                return Err(StoreError::NullViolation {
                    table: self.name.clone(),
                    column: self.columns[i].clone(),
                });
            }
        }

        if self.key.is_empty() {
            return Ok(());
        }
        let key = self.key_of(row);
        let clash = self
            .rows
            .iter()
            .enumerate()
            .any(|(i, existing)| Some(i) != replacing && self.key_of(existing) == key);
        if clash {
            let rendered: Vec<String> = key.iter().map(ToString::to_string).collect();
            return Err(StoreError::DuplicateKey {
                table: self.name.clone(),
                key: format!("[{}]", rendered.join(", ")),
            });
        }

        Ok(())
    }
}

///
/// DatabaseState
///

#[derive(Clone, Debug, Default)]
pub(crate) struct DatabaseState {
    pub(crate) tables: BTreeMap<String, MemoryTable>,
    sequences: BTreeMap<String, i64>,
}

impl DatabaseState {
    pub(crate) fn table(&self, name: &str) -> Result<&MemoryTable, StoreError> {
        self.tables.get(name).ok_or_else(|| StoreError::UnknownTable {
            table: name.to_string(),
        })
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut MemoryTable, StoreError> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| StoreError::UnknownTable {
                table: name.to_string(),
            })
    }
}

///
/// MemoryDatabase
///
/// Shared handle; clones refer to the same tables.
///

#[derive(Clone, Debug, Default)]
pub struct MemoryDatabase {
    state: Arc<Mutex<DatabaseState>>,
}

impl MemoryDatabase {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create one table per entity and per owned join table, plus every
    /// sequence named by a key generator.
    #[must_use]
    pub fn from_registry(registry: &DescriptorRegistry) -> Self {
        let mut state = DatabaseState::default();

        for entity in registry.entities() {
            let columns: Vec<String> = entity
                .select_columns()
                .iter()
                .map(|c| c.column.clone())
                .collect();
            let mut table = MemoryTable::new(&entity.table, columns);

            for &attr in &entity.primary_key.attributes {
                if let Some(pos) = entity.column_position(attr) {
                    table.key.push(pos);
                }
            }
            if entity.primary_key.generation.is_identity() {
                table.identity = table.key.first().copied();
            }
            for (i, attribute) in entity.attributes.iter().enumerate() {
                if attribute.nullable {
                    continue;
                }
                if let Some(pos) = entity.column_position(i)
                    && Some(pos) != table.identity
                {
                    table.not_null.push(pos);
                }
            }
            if let KeyGeneration::Sequence(name) = &entity.primary_key.generation {
                state.sequences.entry(name.clone()).or_insert(0);
            }
            state.tables.entry(entity.table.clone()).or_insert(table);

            for (_, relation) in entity.owned_join_tables() {
                let Some(jt) = relation.join_table() else {
                    continue;
                };
                let columns = jt
                    .join_columns
                    .iter()
                    .chain(&jt.inverse_join_columns)
                    .map(|c| c.name.clone())
                    .collect();
                state
                    .tables
                    .entry(jt.table.clone())
                    .or_insert_with(|| MemoryTable::new(&jt.table, columns));
            }
        }

        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Create (or replace) a plain table with an optional primary key.
    pub fn create_table(&self, table: &str, columns: &[&str], key: &[&str]) -> Result<(), StoreError> {
        let mut memory = MemoryTable::new(table, columns.iter().map(ToString::to_string).collect());
        for column in key {
            let pos = memory.position(column)?;
            memory.key.push(pos);
        }
        self.lock()?.tables.insert(table.to_string(), memory);

        Ok(())
    }

    pub fn create_sequence(&self, name: &str, start: i64) -> Result<(), StoreError> {
        self.lock()?
            .sequences
            .insert(name.to_string(), start.saturating_sub(1));

        Ok(())
    }

    /// Insert one row directly, bypassing statements. Unlisted columns are
    /// NULL; identity columns are assigned as for an insert.
    pub fn insert_row(&self, table: &str, values: &[(&str, Value)]) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        let table = state.table_mut(table)?;
        let mut row = vec![Value::Null; table.columns.len()];
        for (column, value) in values {
            let pos = table.position(column)?;
            row[pos] = value.clone();
        }
        eval::assign_identity(table, &mut row);
        table.check_row(&row, None)?;
        table.rows.push(row);

        Ok(())
    }

    /// Copy of a table's rows, in insertion order.
    pub fn rows(&self, table: &str) -> Result<Vec<Row>, StoreError> {
        Ok(self.lock()?.table(table)?.rows.clone())
    }

    pub fn row_count(&self, table: &str) -> Result<usize, StoreError> {
        Ok(self.lock()?.table(table)?.rows.len())
    }

    #[must_use]
    pub fn connect(&self) -> MemoryConnection {
        MemoryConnection {
            db: self.clone(),
            undo: None,
            log: Vec::new(),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, DatabaseState>, StoreError> {
        self.state.lock().map_err(|_| StoreError::LockPoisoned)
    }
}

///
/// MemoryConnection
///

#[derive(Debug)]
pub struct MemoryConnection {
    db: MemoryDatabase,
    undo: Option<DatabaseState>,
    log: Vec<String>,
}

impl MemoryConnection {
    /// Rendered text of every statement run so far.
    #[must_use]
    pub fn executed(&self) -> &[String] {
        &self.log
    }

    pub fn clear_log(&mut self) {
        self.log.clear();
    }

    #[must_use]
    pub const fn database(&self) -> &MemoryDatabase {
        &self.db
    }

    fn write<T>(
        &mut self,
        statement: &PreparedStatement<'_>,
        apply: impl FnOnce(&mut DatabaseState) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        self.log.push(statement.sql.to_string());
        let db = self.db.clone();
        let mut state = db.lock()?;
        if self.undo.is_none() {
            self.undo = Some(state.clone());
        }

        apply(&mut *state)
    }
}

impl StoreRunner for MemoryConnection {
    fn select(&mut self, statement: &PreparedStatement<'_>) -> Result<Vec<Row>, StoreError> {
        self.log.push(statement.sql.to_string());
        let state = self.db.lock()?;
        let Statement::Select(select) = statement.statement else {
            return Err(StoreError::statement("select expects a SELECT statement"));
        };

        eval::Evaluator::new(&*state, statement.slot_values).select(select, None)
    }

    fn execute(&mut self, statement: &PreparedStatement<'_>) -> Result<u64, StoreError> {
        let params = statement.slot_values;
        match statement.statement {
            Statement::Insert(insert) => self.write(statement, |state| {
                eval::insert(state, insert, params).map(|_| 1)
            }),
            Statement::Update(update) => {
                self.write(statement, |state| eval::update(state, update, params))
            }
            Statement::Delete(delete) => {
                self.write(statement, |state| eval::delete(state, delete, params))
            }
            Statement::Select(_) => Err(StoreError::statement(
                "execute expects an INSERT, UPDATE or DELETE statement",
            )),
        }
    }

    fn insert_returning_key(
        &mut self,
        statement: &PreparedStatement<'_>,
    ) -> Result<Value, StoreError> {
        let Statement::Insert(insert) = statement.statement else {
            return Err(StoreError::statement(
                "insert_returning_key expects an INSERT statement",
            ));
        };
        let params = statement.slot_values;

        self.write(statement, |state| eval::insert(state, insert, params))
    }

    fn next_sequence_value(&mut self, sequence: &str) -> Result<i64, StoreError> {
        let mut state = self.db.lock()?;
        let current = state
            .sequences
            .get_mut(sequence)
            .ok_or_else(|| StoreError::UnknownSequence {
                name: sequence.to_string(),
            })?;
        *current = current.saturating_add(1);

        Ok(*current)
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        self.undo = None;

        Ok(())
    }

    fn rollback(&mut self) -> Result<(), StoreError> {
        if let Some(undo) = self.undo.take() {
            *self.db.lock()? = undo;
        }

        Ok(())
    }
}
