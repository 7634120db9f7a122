//! Statement factory: structural statements for key access, relationship
//! navigation and DML, plus the memoizing decorator that shares them across
//! units of work.

mod cache;
mod factory;
mod join;


pub use cache::{CacheStats, CachedStatementFactory};
pub use factory::StatementFactory;
pub use join::{entity_projection, relationship_join};

pub(crate) use join::key_position;

use crate::{
    db::sql::{
        AliasAllocator, FetchDescriptor, FromJoin, FromTable, JoinKind, LockMode, ParamSlot,
        Statement,
    },
    error::InternalError,
    model::{ColumnRole, DescriptorRegistry, EntityId, RelationId},
};
use std::sync::Arc;

///
/// StatementKey
///
/// Structural request shape. Two equal keys always produce statements that
/// render to the same text, so the key is all a cache needs.
///

#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum StatementKey {
    PrimaryKey {
        entity: EntityId,
        lock: LockMode,
    },
    /// Rows of `entity` whose inline foreign key for `relation` matches the
    /// bound target key.
    ForeignKey {
        entity: EntityId,
        relation: usize,
        lock: LockMode,
    },
    /// Targets of an owning join-table relation, filtered by owner key.
    JoinTableFromOwner {
        relation: RelationId,
        lock: LockMode,
    },
    /// Owners of an owning join-table relation, filtered by target key.
    JoinTableFromTarget {
        relation: RelationId,
        lock: LockMode,
    },
    Insert {
        entity: EntityId,
    },
    /// `columns` are the dirty columns in select-column order; the version
    /// column is added by the factory.
    Update {
        entity: EntityId,
        columns: Vec<ColumnRole>,
    },
    Delete {
        entity: EntityId,
    },
    InsertJoinRow {
        relation: RelationId,
    },
    DeleteJoinRows {
        relation: RelationId,
    },
    /// Foreign-key columns of one owning to-one relation, set after the
    /// referenced row received its generated key.
    UpdateJoinColumns {
        entity: EntityId,
        relation: usize,
    },
}

///
/// BindSource
///
/// Where the value of one parameter slot of a factory statement comes from.
/// Key positions index the relevant primary key in key-column order.
///

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum BindSource {
    /// Attribute or join-column slot of the instance being written.
    Column(ColumnRole),
    /// Key value of the addressed row (or of the navigation anchor).
    Key(usize),
    /// Version value last read from (or written to) the store.
    PriorVersion,
    /// Version value the update advances the row to.
    NextVersion,
    /// Owner-side key value of an association row.
    Owner(usize),
    /// Target-side key value of an association row.
    Target(usize),
}

///
/// FactoryStatement
///
/// A finished factory statement. Immutable once built; shared through `Arc`
/// by the cache for the lifetime of the descriptor set.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FactoryStatement {
    pub key: StatementKey,
    pub statement: Statement,
    /// One per selected value; empty for writes.
    pub fetches: Vec<FetchDescriptor>,
    /// Positional slots `?0, ?1, ...`, one per `Expr::Param`.
    pub params: Vec<ParamSlot>,
    /// Value source for each slot, aligned with `params`.
    pub binds: Vec<BindSource>,
}

impl FactoryStatement {
    /// Entity the statement materializes, taken from its first fetch.
    #[must_use]
    pub fn materialized_entity(&self) -> Option<EntityId> {
        self.fetches.first().and_then(FetchDescriptor::entity)
    }
}

///
/// StatementSource
///
/// Anything that hands out factory statements. Loader and writer are generic
/// over it so caching stays a deployment decision.
///

pub trait StatementSource {
    fn registry(&self) -> &DescriptorRegistry;

    fn statement(&self, key: &StatementKey) -> Result<Arc<FactoryStatement>, InternalError>;

    fn select_by_primary_key(
        &self,
        entity: EntityId,
        lock: LockMode,
    ) -> Result<Arc<FactoryStatement>, InternalError> {
        self.statement(&StatementKey::PrimaryKey { entity, lock })
    }

    fn select_by_foreign_key(
        &self,
        entity: EntityId,
        relation: usize,
        lock: LockMode,
    ) -> Result<Arc<FactoryStatement>, InternalError> {
        self.statement(&StatementKey::ForeignKey {
            entity,
            relation,
            lock,
        })
    }

    fn select_join_table_from_owner(
        &self,
        relation: RelationId,
        lock: LockMode,
    ) -> Result<Arc<FactoryStatement>, InternalError> {
        self.statement(&StatementKey::JoinTableFromOwner { relation, lock })
    }

    fn select_join_table_from_target(
        &self,
        relation: RelationId,
        lock: LockMode,
    ) -> Result<Arc<FactoryStatement>, InternalError> {
        self.statement(&StatementKey::JoinTableFromTarget { relation, lock })
    }

    fn insert(&self, entity: EntityId) -> Result<Arc<FactoryStatement>, InternalError> {
        self.statement(&StatementKey::Insert { entity })
    }

    fn update(
        &self,
        entity: EntityId,
        columns: Vec<ColumnRole>,
    ) -> Result<Arc<FactoryStatement>, InternalError> {
        self.statement(&StatementKey::Update { entity, columns })
    }

    fn delete(&self, entity: EntityId) -> Result<Arc<FactoryStatement>, InternalError> {
        self.statement(&StatementKey::Delete { entity })
    }

    fn insert_join_row(&self, relation: RelationId) -> Result<Arc<FactoryStatement>, InternalError> {
        self.statement(&StatementKey::InsertJoinRow { relation })
    }

    fn delete_join_rows(
        &self,
        relation: RelationId,
    ) -> Result<Arc<FactoryStatement>, InternalError> {
        self.statement(&StatementKey::DeleteJoinRows { relation })
    }

    fn update_join_columns(
        &self,
        entity: EntityId,
        relation: usize,
    ) -> Result<Arc<FactoryStatement>, InternalError> {
        self.statement(&StatementKey::UpdateJoinColumns { entity, relation })
    }

    /// Joins expressing one navigation hop; never cached because aliases
    /// depend on the caller's allocator.
    fn relationship_join(
        &self,
        from: &FromTable,
        relation: RelationId,
        kind: JoinKind,
        aliases: &mut AliasAllocator,
    ) -> Result<(Vec<FromJoin>, FromTable), InternalError> {
        relationship_join(self.registry(), from, relation, kind, aliases)
    }
}

impl<S: StatementSource + ?Sized> StatementSource for Arc<S> {
    fn registry(&self) -> &DescriptorRegistry {
        (**self).registry()
    }

    fn statement(&self, key: &StatementKey) -> Result<Arc<FactoryStatement>, InternalError> {
        (**self).statement(key)
    }
}

impl<S: StatementSource + ?Sized> StatementSource for &S {
    fn registry(&self) -> &DescriptorRegistry {
        (**self).registry()
    }

    fn statement(&self, key: &StatementKey) -> Result<Arc<FactoryStatement>, InternalError> {
        (**self).statement(key)
    }
}
