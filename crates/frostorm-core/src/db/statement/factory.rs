use crate::{
    db::{
        sql::{
            AliasAllocator, Assignment, Condition, Delete, Expr, FetchDescriptor, FromItem,
            FromJoin, FromTable, Insert, JoinKind, LockMode, ParamSlot, Select, Statement, Update,
        },
        statement::{
            BindSource, FactoryStatement, StatementKey, StatementSource,
            join::{column_pairs, entity_projection, key_position},
        },
    },
    error::InternalError,
    model::{
        ColumnRole, DescriptorRegistry, EntityDescriptor, EntityId, JoinTable, RelationDescriptor,
        RelationId,
    },
};
use std::sync::Arc;

///
/// StatementFactory
///
/// Builds a fresh statement for every request. Output depends only on the
/// request key and the registry, never on call history.
///

#[derive(Clone, Debug)]
pub struct StatementFactory {
    registry: Arc<DescriptorRegistry>,
}

impl StatementFactory {
    #[must_use]
    pub const fn new(registry: Arc<DescriptorRegistry>) -> Self {
        Self { registry }
    }

    #[must_use]
    pub const fn shared_registry(&self) -> &Arc<DescriptorRegistry> {
        &self.registry
    }

    /// Build the statement for `key` and check its column references.
    pub fn build(&self, key: &StatementKey) -> Result<FactoryStatement, InternalError> {
        let mut builder = Builder::default();
        let (statement, fetches) = match key {
            StatementKey::PrimaryKey { entity, lock } => {
                self.primary_key_select(&mut builder, *entity, *lock)
            }
            StatementKey::ForeignKey {
                entity,
                relation,
                lock,
            } => self.foreign_key_select(&mut builder, *entity, *relation, *lock)?,
            StatementKey::JoinTableFromOwner { relation, lock } => {
                self.join_table_select(&mut builder, *relation, *lock, Direction::FromOwner)?
            }
            StatementKey::JoinTableFromTarget { relation, lock } => {
                self.join_table_select(&mut builder, *relation, *lock, Direction::FromTarget)?
            }
            StatementKey::Insert { entity } => {
                (self.insert_statement(&mut builder, *entity), Vec::new())
            }
            StatementKey::Update { entity, columns } => (
                self.update_statement(&mut builder, *entity, columns)?,
                Vec::new(),
            ),
            StatementKey::Delete { entity } => {
                (self.delete_statement(&mut builder, *entity), Vec::new())
            }
            StatementKey::InsertJoinRow { relation } => {
                (self.insert_join_row_statement(&mut builder, *relation)?, Vec::new())
            }
            StatementKey::DeleteJoinRows { relation } => {
                (self.delete_join_rows_statement(&mut builder, *relation)?, Vec::new())
            }
            StatementKey::UpdateJoinColumns { entity, relation } => (
                self.update_join_columns_statement(&mut builder, *entity, *relation)?,
                Vec::new(),
            ),
        };

        statement.validate_references()?;

        Ok(FactoryStatement {
            key: key.clone(),
            statement,
            fetches,
            params: builder.params,
            binds: builder.binds,
        })
    }

    // SELECT <entity columns> FROM <table> t0 WHERE t0.k1 = ? AND ...
    fn primary_key_select(
        &self,
        builder: &mut Builder,
        entity: EntityId,
        lock: LockMode,
    ) -> (Statement, Vec<FetchDescriptor>) {
        let entity = self.registry.entity(entity);
        let mut aliases = AliasAllocator::new();
        let table = aliases.table(&entity.table);
        let (columns, fetches) = entity_projection(entity, &table, "");
        let filter = key_filter(builder, entity, &table);

        let select = Select {
            columns,
            from: vec![FromItem::new(table)],
            filter,
            lock,
            ..Select::default()
        };

        (Statement::Select(select), fetches)
    }

    fn foreign_key_select(
        &self,
        builder: &mut Builder,
        entity: EntityId,
        relation: usize,
        lock: LockMode,
    ) -> Result<(Statement, Vec<FetchDescriptor>), InternalError> {
        let entity = self.registry.entity(entity);
        let descriptor = relation_at(entity, relation)?;
        let join_columns = descriptor.join_columns().ok_or_else(|| {
            InternalError::statement_invariant(format!(
                "{}.{} has no inline foreign key",
                entity.name, descriptor.name
            ))
        })?;
        let target = self.registry.entity(descriptor.target);

        let mut aliases = AliasAllocator::new();
        let table = aliases.table(&entity.table);
        let (columns, fetches) = entity_projection(entity, &table, "");
        let mut conditions = Vec::with_capacity(join_columns.len());
        for jc in join_columns {
            let position = key_position(target, &jc.referenced)?;
            conditions.push(Condition::eq(
                Expr::Column(table.column(&jc.name)),
                builder.param(BindSource::Key(position)),
            ));
        }

        let select = Select {
            columns,
            from: vec![FromItem::new(table)],
            filter: Condition::conjoin(conditions),
            lock,
            ..Select::default()
        };

        Ok((Statement::Select(select), fetches))
    }

    // The association table's column roles invert between directions:
    // from the owner we read targets filtered by the owner's key, from the
    // target we read owners filtered by the target's key.
    fn join_table_select(
        &self,
        builder: &mut Builder,
        relation: RelationId,
        lock: LockMode,
        direction: Direction,
    ) -> Result<(Statement, Vec<FetchDescriptor>), InternalError> {
        let (owner, descriptor, jt) = self.owned_join_table(relation)?;
        let target = self.registry.entity(descriptor.target);
        let (read, anchor, read_columns, anchor_columns) = match direction {
            Direction::FromOwner => (target, owner, &jt.inverse_join_columns, &jt.join_columns),
            Direction::FromTarget => (owner, target, &jt.join_columns, &jt.inverse_join_columns),
        };

        let mut aliases = AliasAllocator::new();
        let table = aliases.table(&read.table);
        let link = aliases.table(&jt.table);
        let (columns, fetches) = entity_projection(read, &table, "");
        let on = column_pairs(
            read_columns
                .iter()
                .map(|jc| (link.column(&jc.name), table.column(&jc.referenced))),
        )?;

        let mut conditions = Vec::with_capacity(anchor_columns.len());
        for jc in anchor_columns {
            let position = key_position(anchor, &jc.referenced)?;
            conditions.push(Condition::eq(
                Expr::Column(link.column(&jc.name)),
                builder.param(BindSource::Key(position)),
            ));
        }

        let mut item = FromItem::new(table);
        item.joins.push(FromJoin {
            kind: JoinKind::Inner,
            table: link,
            on,
        });
        let select = Select {
            columns,
            from: vec![item],
            filter: Condition::conjoin(conditions),
            lock,
            ..Select::default()
        };

        Ok((Statement::Select(select), fetches))
    }

    // Identity keys are left to the store and returned as the generated key.
    fn insert_statement(&self, builder: &mut Builder, entity: EntityId) -> Statement {
        let entity = self.registry.entity(entity);
        let identity = entity
            .primary_key
            .generation
            .is_identity()
            .then(|| entity.primary_key.attributes.first().copied())
            .flatten();

        let mut columns = Vec::new();
        let mut values = Vec::new();
        for column in entity.select_columns() {
            if identity.is_some_and(|attr| column.role == ColumnRole::Attribute(attr)) {
                continue;
            }
            columns.push(column.column.clone());
            values.push(builder.param(BindSource::Column(column.role)));
        }

        Statement::Insert(Insert {
            table: entity.table.clone(),
            columns,
            values,
            generated_key: identity.map(|attr| entity.attributes[attr].column.clone()),
        })
    }

    fn update_statement(
        &self,
        builder: &mut Builder,
        entity: EntityId,
        dirty: &[ColumnRole],
    ) -> Result<Statement, InternalError> {
        let entity = self.registry.entity(entity);
        let version = entity.version.map(|v| v.attribute);
        let table = FromTable::new(&entity.table, "t0");

        let mut assignments = Vec::with_capacity(dirty.len() + 1);
        for role in dirty {
            if let ColumnRole::Attribute(attr) = role {
                if entity.primary_key.contains(*attr) {
                    return Err(InternalError::statement_invariant(format!(
                        "{}: primary-key attribute '{}' cannot be updated",
                        entity.name, entity.attributes[*attr].name
                    )));
                }
                if Some(*attr) == version {
                    return Err(InternalError::statement_invariant(format!(
                        "{}: version attribute is advanced by the factory, not listed",
                        entity.name
                    )));
                }
            }
            let column = column_for(entity, *role)?;
            assignments.push(Assignment {
                column,
                value: builder.param(BindSource::Column(*role)),
            });
        }
        if let Some(column) = entity.version_column() {
            assignments.push(Assignment {
                column: column.to_string(),
                value: builder.param(BindSource::NextVersion),
            });
        }
        if assignments.is_empty() {
            return Err(InternalError::statement_invariant(format!(
                "{}: update with no columns",
                entity.name
            )));
        }

        let filter = versioned_key_filter(builder, entity, &table);

        Ok(Statement::Update(Update {
            table,
            assignments,
            filter,
        }))
    }

    fn delete_statement(&self, builder: &mut Builder, entity: EntityId) -> Statement {
        let entity = self.registry.entity(entity);
        let table = FromTable::new(&entity.table, "t0");
        let filter = versioned_key_filter(builder, entity, &table);

        Statement::Delete(Delete { table, filter })
    }

    fn insert_join_row_statement(
        &self,
        builder: &mut Builder,
        relation: RelationId,
    ) -> Result<Statement, InternalError> {
        let (owner, descriptor, jt) = self.owned_join_table(relation)?;
        let target = self.registry.entity(descriptor.target);

        let mut columns = Vec::new();
        let mut values = Vec::new();
        for jc in &jt.join_columns {
            columns.push(jc.name.clone());
            values.push(builder.param(BindSource::Owner(key_position(owner, &jc.referenced)?)));
        }
        for jc in &jt.inverse_join_columns {
            columns.push(jc.name.clone());
            values.push(builder.param(BindSource::Target(key_position(target, &jc.referenced)?)));
        }

        Ok(Statement::Insert(Insert {
            table: jt.table.clone(),
            columns,
            values,
            generated_key: None,
        }))
    }

    fn delete_join_rows_statement(
        &self,
        builder: &mut Builder,
        relation: RelationId,
    ) -> Result<Statement, InternalError> {
        let (owner, _, jt) = self.owned_join_table(relation)?;
        let table = FromTable::new(&jt.table, "t0");

        let mut conditions = Vec::with_capacity(jt.join_columns.len());
        for jc in &jt.join_columns {
            let position = key_position(owner, &jc.referenced)?;
            conditions.push(Condition::eq(
                Expr::Column(table.column(&jc.name)),
                builder.param(BindSource::Owner(position)),
            ));
        }

        Ok(Statement::Delete(Delete {
            table,
            filter: Condition::conjoin(conditions),
        }))
    }

    fn update_join_columns_statement(
        &self,
        builder: &mut Builder,
        entity: EntityId,
        relation: usize,
    ) -> Result<Statement, InternalError> {
        let entity = self.registry.entity(entity);
        let descriptor = relation_at(entity, relation)?;
        let join_columns = descriptor.join_columns().ok_or_else(|| {
            InternalError::statement_invariant(format!(
                "{}.{} has no inline foreign key",
                entity.name, descriptor.name
            ))
        })?;
        let table = FromTable::new(&entity.table, "t0");

        let assignments = join_columns
            .iter()
            .enumerate()
            .map(|(position, jc)| Assignment {
                column: jc.name.clone(),
                value: builder.param(BindSource::Column(ColumnRole::JoinColumn {
                    relation,
                    position,
                })),
            })
            .collect();
        let filter = key_filter(builder, entity, &table);

        Ok(Statement::Update(Update {
            table,
            assignments,
            filter,
        }))
    }

    fn owned_join_table(
        &self,
        relation: RelationId,
    ) -> Result<(&EntityDescriptor, &RelationDescriptor, &JoinTable), InternalError> {
        let owner = self.registry.entity(relation.entity);
        let descriptor = relation_at(owner, relation.index)?;
        let jt = descriptor.join_table().ok_or_else(|| {
            InternalError::statement_invariant(format!(
                "{}.{} is not an owning join-table relation",
                owner.name, descriptor.name
            ))
        })?;

        Ok((owner, descriptor, jt))
    }
}

impl StatementSource for StatementFactory {
    fn registry(&self) -> &DescriptorRegistry {
        &self.registry
    }

    fn statement(&self, key: &StatementKey) -> Result<Arc<FactoryStatement>, InternalError> {
        self.build(key).map(Arc::new)
    }
}

#[derive(Clone, Copy, Debug)]
enum Direction {
    FromOwner,
    FromTarget,
}

///
/// Builder
/// Parameter slots accumulated while building one statement.
///

#[derive(Debug, Default)]
struct Builder {
    params: Vec<ParamSlot>,
    binds: Vec<BindSource>,
}

impl Builder {
    fn param(&mut self, source: BindSource) -> Expr {
        let index = self.binds.len();
        let position = u32::try_from(index).unwrap_or(u32::MAX);
        self.params.push(ParamSlot::Positional(position));
        self.binds.push(source);

        Expr::Param(index)
    }
}

fn relation_at(entity: &EntityDescriptor, index: usize) -> Result<&RelationDescriptor, InternalError> {
    entity.relations.get(index).ok_or_else(|| {
        InternalError::statement_invariant(format!(
            "{} has no relation #{index}",
            entity.name
        ))
    })
}

fn column_for(entity: &EntityDescriptor, role: ColumnRole) -> Result<String, InternalError> {
    entity
        .select_columns()
        .iter()
        .find(|c| c.role == role)
        .map(|c| c.column.clone())
        .ok_or_else(|| {
            InternalError::statement_invariant(format!(
                "{}: {role:?} is not a persisted column",
                entity.name
            ))
        })
}

fn key_filter(builder: &mut Builder, entity: &EntityDescriptor, table: &FromTable) -> Option<Condition> {
    let conditions = entity
        .key_columns()
        .iter()
        .enumerate()
        .map(|(position, column)| {
            Condition::eq(
                Expr::Column(table.column(*column)),
                builder.param(BindSource::Key(position)),
            )
        })
        .collect();

    Condition::conjoin(conditions)
}

// Primary key, plus the previously known version under optimistic locking.
fn versioned_key_filter(
    builder: &mut Builder,
    entity: &EntityDescriptor,
    table: &FromTable,
) -> Option<Condition> {
    let mut conditions = match key_filter(builder, entity, table) {
        Some(Condition::And(parts)) => parts,
        Some(single) => vec![single],
        None => Vec::new(),
    };
    if let Some(column) = entity.version_column() {
        conditions.push(Condition::eq(
            Expr::Column(table.column(column)),
            builder.param(BindSource::PriorVersion),
        ));
    }

    Condition::conjoin(conditions)
}
