//! Statement AST, parameter slots, fetch descriptors and the reference
//! renderers.

mod ast;
mod fetch;
mod fingerprint;
mod render;

#[cfg(test)]
mod tests;

pub use ast::*;
pub use fetch::{FetchDescriptor, FetchKind};
pub use fingerprint::StatementFingerprint;
pub use render::{AnsiDialect, Dialect, DialectKind, PostgresDialect, RenderedSql, SqlRenderer};

use crate::{error::SemanticError, value::Value};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt};

///
/// LockMode
///
/// Row lock requested for a read. Maps to an optional `FOR UPDATE`-class
/// clause; `None` emits nothing.
///

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LockMode {
    #[default]
    None,
    Read,
    Write,
}

///
/// ParamSlot
///
/// One bound-parameter position of a statement, in encounter order.
/// Values are resolved against caller bindings at execution, never at
/// compile time.
///

#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum ParamSlot {
    Named(String),
    Positional(u32),
}

impl fmt::Display for ParamSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named(name) => write!(f, ":{name}"),
            Self::Positional(n) => write!(f, "?{n}"),
        }
    }
}

///
/// Bindings
/// Caller-supplied parameter values.
///

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Bindings {
    named: BTreeMap<String, Value>,
    positional: BTreeMap<u32, Value>,
}

impl Bindings {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Positional bindings `?0, ?1, ...` in order.
    #[must_use]
    pub fn positional(values: impl IntoIterator<Item = Value>) -> Self {
        let mut bindings = Self::default();
        for (i, value) in (0u32..).zip(values) {
            bindings.positional.insert(i, value);
        }
        bindings
    }

    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.named.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_position(mut self, position: u32, value: impl Into<Value>) -> Self {
        self.positional.insert(position, value.into());
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.named.insert(name.into(), value.into());
    }

    /// Resolve every slot, in slot order.
    pub fn resolve(&self, slots: &[ParamSlot]) -> Result<Vec<Value>, SemanticError> {
        slots
            .iter()
            .map(|slot| {
                let value = match slot {
                    ParamSlot::Named(name) => self.named.get(name),
                    ParamSlot::Positional(n) => self.positional.get(n),
                };
                value.cloned().ok_or_else(|| SemanticError::MissingBinding {
                    parameter: slot.to_string(),
                })
            })
            .collect()
    }
}

///
/// AliasAllocator
///
/// Deterministic `t0, t1, ...` table aliases. One allocator is shared by a
/// statement and all of its sub-selects so aliases never collide.
///

#[derive(Clone, Debug, Default)]
pub struct AliasAllocator {
    next: usize,
}

impl AliasAllocator {
    #[must_use]
    pub const fn new() -> Self {
        Self { next: 0 }
    }

    pub fn next_alias(&mut self) -> String {
        let alias = format!("t{}", self.next);
        self.next += 1;
        alias
    }

    /// Allocate an aliased table reference.
    pub fn table(&mut self, table: impl Into<String>) -> FromTable {
        FromTable::new(table, self.next_alias())
    }
}
