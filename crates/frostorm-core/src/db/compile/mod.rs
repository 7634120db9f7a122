//! Query-language compiler: turns a JPQL parse tree into a statement tree,
//! the fetch descriptors describing each selected value, and the ordered
//! parameter slots.
//!
//! Compilation is a single pass in document order. FROM declarations
//! populate the alias table before any path that navigates through them is
//! visited; sub-queries push a scope level that can see every enclosing one.

mod condition;
mod dml;
mod expr;
mod path;
mod scope;
mod select;

#[cfg(test)]
mod tests;

use crate::{
    db::{
        jpql::{self, ast::QueryStatement},
        sql::{
            Dialect, FetchDescriptor, LockMode, ParamSlot, RenderedSql, SqlRenderer, Statement,
            StatementFingerprint,
        },
    },
    error::InternalError,
    model::{DescriptorRegistry, EntityId, RelationId},
};
use scope::CompileScope;
use std::{ops::Range, sync::Arc};

///
/// QueryKind
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum QueryKind {
    Select,
    Update,
    Delete,
}

///
/// ResultItem
///
/// How one select item maps onto the projected columns.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ResultItem {
    /// A whole entity; `columns` covers its full `select_columns` list.
    Entity {
        entity: EntityId,
        columns: Range<usize>,
        label: String,
    },
    Scalar {
        column: usize,
        label: String,
    },
}

impl ResultItem {
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::Entity { label, .. } | Self::Scalar { label, .. } => label,
        }
    }
}

///
/// FetchParent
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FetchParent {
    /// Index into `CompiledQuery::items`.
    Item(usize),
    /// Index into `CompiledQuery::fetch_joins`.
    Fetch(usize),
}

///
/// FetchJoin
///
/// An association loaded in the same statement as its owner. The target
/// entity's full column list occupies `columns`.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FetchJoin {
    pub parent: FetchParent,
    pub relation: RelationId,
    pub entity: EntityId,
    pub columns: Range<usize>,
}

///
/// CompiledQuery
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CompiledQuery {
    pub kind: QueryKind,
    pub statement: Statement,
    pub fetches: Vec<FetchDescriptor>,
    pub params: Vec<ParamSlot>,
    pub items: Vec<ResultItem>,
    pub fetch_joins: Vec<FetchJoin>,
}

impl CompiledQuery {
    /// True when result rows carry fetched associations next to their owners.
    #[must_use]
    pub fn is_fetch_join(&self) -> bool {
        !self.fetch_joins.is_empty()
    }

    /// True when every result item is a scalar (no materialization needed).
    #[must_use]
    pub fn is_scalar(&self) -> bool {
        self.items
            .iter()
            .all(|item| matches!(item, ResultItem::Scalar { .. }))
    }

    /// Apply a row lock, result window, or both to a select.
    pub fn set_window(&mut self, lock: LockMode, limit: Option<u64>, offset: Option<u64>) {
        if let Statement::Select(select) = &mut self.statement {
            select.lock = lock;
            select.limit = limit;
            select.offset = offset;
        }
    }

    #[must_use]
    pub fn render(&self, dialect: &dyn Dialect) -> RenderedSql {
        SqlRenderer::render(dialect, &self.statement)
    }

    #[must_use]
    pub fn fingerprint(&self) -> StatementFingerprint {
        StatementFingerprint::of(&self.statement)
    }
}

///
/// Compiler
///

#[derive(Clone, Debug)]
pub struct Compiler {
    registry: Arc<DescriptorRegistry>,
}

impl Compiler {
    #[must_use]
    pub const fn new(registry: Arc<DescriptorRegistry>) -> Self {
        Self { registry }
    }

    #[must_use]
    pub fn registry(&self) -> &DescriptorRegistry {
        &self.registry
    }

    /// Parse and compile JPQL text.
    pub fn compile_text(&self, text: &str) -> Result<CompiledQuery, InternalError> {
        let statement = jpql::parse(text)?;
        self.compile(&statement)
    }

    /// Compile a parse tree. Fails with a `Semantic`-class error on the first
    /// unresolved alias, attribute or relationship.
    pub fn compile(&self, statement: &QueryStatement) -> Result<CompiledQuery, InternalError> {
        let compilation = Compilation {
            registry: &self.registry,
            scope: CompileScope::default(),
        };

        let compiled = match statement {
            QueryStatement::Select(select) => compilation.compile_select(select)?,
            QueryStatement::Update(update) => compilation.compile_update(update)?,
            QueryStatement::Delete(delete) => compilation.compile_delete(delete)?,
        };
        compiled.statement.validate_references()?;

        Ok(compiled)
    }
}

///
/// Compilation
///
/// State for one `compile` call. The visitor methods live in the sibling
/// modules as separate `impl` blocks.
///

struct Compilation<'r> {
    registry: &'r DescriptorRegistry,
    scope: CompileScope,
}
