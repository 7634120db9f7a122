use crate::{
    db::sql::{AliasAllocator, Condition, Expr, FetchDescriptor, FromItem, FromTable, ParamSlot},
    error::{InternalError, SemanticError},
    model::{EntityId, RelationId},
};
use std::collections::BTreeMap;

///
/// AliasBinding
///
/// What a query-language identification variable stands for.
///

#[derive(Clone, Debug)]
pub(super) struct AliasBinding {
    pub entity: EntityId,
    pub table: FromTable,
    /// Index of the FROM item the table belongs to, within its own level.
    pub from_item: usize,
}

///
/// SelectAccumulator
///
/// Everything one select level collects before it is assembled into a
/// `Select`.
///

#[derive(Debug, Default)]
pub(super) struct SelectAccumulator {
    pub from: Vec<FromItem>,
    /// Join conditions of correlated implicit joins, moved into WHERE.
    pub correlation: Vec<Condition>,
    pub columns: Vec<Expr>,
    pub fetches: Vec<FetchDescriptor>,
    pub result_variables: BTreeMap<String, Expr>,
    /// Implicit joins keyed by (source table alias, relation).
    pub implicit: BTreeMap<(String, RelationId), (FromTable, usize)>,
}

impl SelectAccumulator {
    pub fn push_column(&mut self, expr: Expr, fetch: FetchDescriptor) -> usize {
        self.columns.push(expr);
        self.fetches.push(fetch);
        self.columns.len() - 1
    }
}

///
/// ScopeLevel
///

#[derive(Debug, Default)]
pub(super) struct ScopeLevel {
    pub aliases: BTreeMap<String, AliasBinding>,
    pub acc: SelectAccumulator,
}

///
/// CompileScope
///
/// The alias table stack plus statement-wide state: one alias allocator and
/// one parameter list shared by the statement and all its sub-selects.
///

#[derive(Debug, Default)]
pub(super) struct CompileScope {
    levels: Vec<ScopeLevel>,
    pub aliases: AliasAllocator,
    params: Vec<ParamSlot>,
    /// Bulk statements: relationship navigation from the target is illegal.
    pub bulk: bool,
    /// Identification variable assumed for paths with an unknown root
    /// (bulk statements declared without an alias).
    pub default_root: Option<String>,
}

impl CompileScope {
    pub fn push_level(&mut self) {
        self.levels.push(ScopeLevel::default());
    }

    pub fn pop_level(&mut self) -> Result<ScopeLevel, InternalError> {
        self.levels
            .pop()
            .ok_or_else(|| InternalError::statement_invariant("compile scope underflow"))
    }

    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    pub fn current(&mut self) -> Result<&mut ScopeLevel, InternalError> {
        self.levels
            .last_mut()
            .ok_or_else(|| InternalError::statement_invariant("no open compile scope"))
    }

    pub fn level_mut(&mut self, level: usize) -> Result<&mut ScopeLevel, InternalError> {
        self.levels
            .get_mut(level)
            .ok_or_else(|| InternalError::statement_invariant("compile scope level out of range"))
    }

    /// Declare an identification variable at the innermost level. Names are
    /// unique across every visible level, compared case-insensitively.
    pub fn declare(&mut self, name: &str, binding: AliasBinding) -> Result<(), InternalError> {
        if self.lookup(name).is_some() {
            return Err(SemanticError::DuplicateAlias {
                alias: name.to_string(),
            }
            .into());
        }
        self.current()?
            .aliases
            .insert(name.to_ascii_lowercase(), binding);

        Ok(())
    }

    /// Resolve an identification variable, innermost level first. Returns
    /// the level index with the binding.
    pub fn lookup(&self, name: &str) -> Option<(usize, AliasBinding)> {
        let key = name.to_ascii_lowercase();
        self.levels
            .iter()
            .enumerate()
            .rev()
            .find_map(|(i, level)| level.aliases.get(&key).map(|b| (i, b.clone())))
    }

    /// Register a parameter slot; repeated occurrences share one slot.
    pub fn param(&mut self, slot: ParamSlot) -> Expr {
        let index = self
            .params
            .iter()
            .position(|existing| *existing == slot)
            .unwrap_or_else(|| {
                self.params.push(slot);
                self.params.len() - 1
            });

        Expr::Param(index)
    }

    pub fn take_params(&mut self) -> Vec<ParamSlot> {
        std::mem::take(&mut self.params)
    }
}
