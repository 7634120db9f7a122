//! Store collaborator boundary and the in-memory reference runner.

mod memory;

#[cfg(test)]
mod tests;

pub use memory::{MemoryConnection, MemoryDatabase};

use crate::{db::sql::Statement, value::{Value, ValueError}};
use thiserror::Error as ThisError;

/// One result row, aligned with the statement's fetch descriptors.
pub type Row = Vec<Value>;

///
/// PreparedStatement
///
/// Everything a runner needs to execute one statement. Text-driven runners
/// use `sql` with `bind_values` (placeholder order); AST-driven runners use
/// `statement` with `slot_values` (one per parameter slot).
///

#[derive(Clone, Copy, Debug)]
pub struct PreparedStatement<'a> {
    pub statement: &'a Statement,
    pub sql: &'a str,
    pub slot_values: &'a [Value],
    pub bind_values: &'a [Value],
}

///
/// StoreRunner
///
/// Executes statements against a relational store. One runner serves one
/// unit of work; implementations need not be thread-safe.
///

pub trait StoreRunner {
    /// Run a read and return every row.
    fn select(&mut self, statement: &PreparedStatement<'_>) -> Result<Vec<Row>, StoreError>;

    /// Run a write and return the affected-row count.
    fn execute(&mut self, statement: &PreparedStatement<'_>) -> Result<u64, StoreError>;

    /// Run an insert into a table with an identity column and return the
    /// store-assigned key.
    fn insert_returning_key(
        &mut self,
        statement: &PreparedStatement<'_>,
    ) -> Result<Value, StoreError>;

    fn next_sequence_value(&mut self, sequence: &str) -> Result<i64, StoreError>;

    fn commit(&mut self) -> Result<(), StoreError>;

    fn rollback(&mut self) -> Result<(), StoreError>;
}

///
/// StoreError
///

#[derive(Debug, ThisError)]
pub enum StoreError {
    #[error("duplicate key {key} in table '{table}'")]
    DuplicateKey { table: String, key: String },

    #[error("store lock poisoned")]
    LockPoisoned,

    #[error("column '{column}' of table '{table}' does not accept NULL")]
    NullViolation { table: String, column: String },

    #[error("statement rejected: {message}")]
    Statement { message: String },

    #[error("unknown column '{column}' in table '{table}'")]
    UnknownColumn { table: String, column: String },

    #[error("unknown sequence '{name}'")]
    UnknownSequence { name: String },

    #[error("unknown table '{table}'")]
    UnknownTable { table: String },

    #[error(transparent)]
    Value(#[from] ValueError),
}

impl StoreError {
    pub(crate) fn statement(message: impl Into<String>) -> Self {
        Self::Statement {
            message: message.into(),
        }
    }
}
