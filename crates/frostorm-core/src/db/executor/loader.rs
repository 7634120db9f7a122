use crate::{
    db::{
        compile::{CompiledQuery, FetchParent, ResultItem},
        context::{EntityStatus, InstanceId, PersistenceContext, RelationSlot},
        executor::{
            Execution, ExecutionOptions,
            bind::{self, BindInputs},
        },
        sql::{LockMode, Statement},
        statement::{FactoryStatement, StatementSource, key_position},
        store::StoreRunner,
    },
    error::InternalError,
    model::{
        ColumnRole, DescriptorRegistry, EntityDescriptor, EntityId, PrimaryKey,
        RelationDescriptor, RelationMapping,
    },
    obs::sink::{self, MetricsEvent},
    value::Value,
};
use std::{
    collections::{BTreeMap, BTreeSet},
    ops::Range,
};

///
/// ResultValue
///
/// One result item of a query row: a managed instance, or a scalar. An
/// entity item with no row behind it (outer join) is a null scalar.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ResultValue {
    Entity(InstanceId),
    Scalar(Value),
}

impl ResultValue {
    #[must_use]
    pub const fn instance(&self) -> Option<InstanceId> {
        match self {
            Self::Entity(id) => Some(*id),
            Self::Scalar(_) => None,
        }
    }

    #[must_use]
    pub const fn value(&self) -> Option<&Value> {
        match self {
            Self::Scalar(value) => Some(value),
            Self::Entity(_) => None,
        }
    }
}

///
/// QueryRow
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct QueryRow {
    pub values: Vec<ResultValue>,
}

impl QueryRow {
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&ResultValue> {
        self.values.get(index)
    }

    #[must_use]
    pub fn instance(&self, index: usize) -> Option<InstanceId> {
        self.get(index).and_then(ResultValue::instance)
    }

    #[must_use]
    pub fn value(&self, index: usize) -> Option<&Value> {
        self.get(index).and_then(ResultValue::value)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

///
/// EntityLoader
///
/// Turns rows into managed instances. Every materialization goes through
/// the identity map first, so a row for an already-managed key yields the
/// existing instance untouched and eager cycles stop at the second visit.
///

pub struct EntityLoader<'a, S, R> {
    statements: &'a S,
    context: &'a mut PersistenceContext,
    exec: Execution<'a, R>,
}

impl<'a, S: StatementSource, R: StoreRunner> EntityLoader<'a, S, R> {
    pub fn new(
        statements: &'a S,
        context: &'a mut PersistenceContext,
        runner: &'a mut R,
        options: &'a ExecutionOptions,
    ) -> Self {
        Self::from_execution(statements, context, Execution::new(runner, options))
    }

    pub(crate) const fn from_execution(
        statements: &'a S,
        context: &'a mut PersistenceContext,
        exec: Execution<'a, R>,
    ) -> Self {
        Self {
            statements,
            context,
            exec,
        }
    }

    fn registry(&self) -> &'a DescriptorRegistry {
        let statements: &'a S = self.statements;
        statements.registry()
    }

    // ------------------------------------------------------------------
    // Key access
    // ------------------------------------------------------------------

    /// The managed instance for `key`, reading it if the context does not
    /// hold it yet. A missing row is `None`, never an error.
    pub fn find_by_id(
        &mut self,
        entity: EntityId,
        key: &PrimaryKey,
        lock: LockMode,
    ) -> Result<Option<InstanceId>, InternalError> {
        let descriptor = self.registry().entity(entity);
        if !key.is_complete() {
            return Ok(None);
        }

        if let Some(id) = self.context.find(entity, key) {
            if self.context.status(id)? == EntityStatus::RemovedNotFlushed {
                return Ok(None);
            }
            sink::record(MetricsEvent::IdentityMapHit {
                entity: &descriptor.table,
            });
            return Ok(Some(id));
        }

        let statement = self.statements.select_by_primary_key(entity, lock)?;
        let slot_values = bind::resolve(self.context, &statement, &BindInputs::key(key.values()))?;
        let rows = self.exec.select(&statement.statement, &slot_values)?;

        match rows.as_slice() {
            [] => {
                self.exec
                    .debug_log(format!("{} {key} not found", descriptor.name));
                Ok(None)
            }
            [row] => self.materialize(entity, row).map(Some),
            _ => Err(InternalError::loader_invariant(format!(
                "primary-key read of {} {key} returned {} rows",
                descriptor.name,
                rows.len()
            ))),
        }
    }

    /// Materialize one entity segment of a row, reusing the managed
    /// instance for its key when there is one.
    pub(crate) fn materialize(
        &mut self,
        entity: EntityId,
        row: &[Value],
    ) -> Result<InstanceId, InternalError> {
        let descriptor = self.registry().entity(entity);
        let key = row_key(descriptor, row)?;
        if !key.is_complete() {
            return Err(InternalError::loader_invariant(format!(
                "{} row has an incomplete key {key}",
                descriptor.name
            )));
        }

        if let Some(id) = self.context.find(entity, &key) {
            sink::record(MetricsEvent::IdentityMapHit {
                entity: &descriptor.table,
            });
            return Ok(id);
        }

        let id = self.context.create_unloaded(entity);
        self.apply_row(id, descriptor, row)?;
        self.context
            .transition(id, EntityStatus::FlushedLoadedFromDb)?;
        self.context.add_managed(id, key)?;
        sink::record(MetricsEvent::RowsMaterialized {
            entity: &descriptor.table,
            rows: 1,
        });

        self.resolve_eager(id)?;

        Ok(id)
    }

    // Write every fetched column into the instance and reset its load state.
    fn apply_row(
        &mut self,
        id: InstanceId,
        descriptor: &EntityDescriptor,
        row: &[Value],
    ) -> Result<(), InternalError> {
        let columns = descriptor.select_columns();
        if row.len() < columns.len() {
            return Err(InternalError::loader_invariant(format!(
                "{} row has {} values for {} columns",
                descriptor.name,
                row.len(),
                columns.len()
            )));
        }

        let mut values = vec![Value::Null; descriptor.attributes.len()];
        let mut foreign_keys: BTreeMap<usize, Vec<Value>> = BTreeMap::new();
        for (column, value) in columns.iter().zip(row) {
            match column.role {
                ColumnRole::Attribute(attribute) => {
                    values[attribute] = value.clone();
                }
                ColumnRole::JoinColumn { relation, .. } => {
                    foreign_keys.entry(relation).or_default().push(value.clone());
                }
            }
        }

        let relations: Vec<RelationSlot> = descriptor
            .relations
            .iter()
            .enumerate()
            .map(|(index, relation)| {
                let unset = relation.has_inline_foreign_key()
                    && foreign_keys
                        .get(&index)
                        .is_none_or(|fk| fk.iter().any(Value::is_null));
                if unset {
                    RelationSlot::One(None)
                } else {
                    RelationSlot::Unloaded
                }
            })
            .collect();

        let instance = self.context.instance_mut(id)?;
        instance.values.clone_from(&values);
        instance.relations = relations;

        let state = self.context.load_state_mut(id);
        state.version = descriptor
            .version
            .and_then(|v| values.get(v.attribute).cloned());
        state.snapshot = Some(values);
        state.foreign_keys = foreign_keys;
        state.join_rows.clear();
        state.loaded.clear();

        Ok(())
    }

    fn resolve_eager(&mut self, id: InstanceId) -> Result<(), InternalError> {
        let entity = self.context.instance(id)?.entity();
        let descriptor = self.registry().entity(entity);

        for (index, relation) in descriptor.relations.iter().enumerate() {
            if !relation.is_eager() {
                continue;
            }
            let loaded = self
                .context
                .instance(id)?
                .relation(index)
                .is_some_and(RelationSlot::is_loaded);
            if !loaded {
                self.load_relation(id, index)?;
            }
        }

        self.fix_up(id, descriptor)
    }

    // Point the inverse side of eager bidirectional one-to-one relations back
    // at `id` when it is unset, saving the second round trip.
    fn fix_up(&mut self, id: InstanceId, descriptor: &EntityDescriptor) -> Result<(), InternalError> {
        let registry = self.registry();

        for (index, relation) in descriptor.relations.iter().enumerate() {
            if !(relation.is_eager() && relation.is_to_one() && relation.is_owner()) {
                continue;
            }
            let Some(inverse) = relation.inverse else {
                continue;
            };
            if !registry.entity(relation.target).relations[inverse].is_to_one() {
                continue;
            }
            let Some(RelationSlot::One(Some(target))) =
                self.context.instance(id)?.relation(index).cloned()
            else {
                continue;
            };

            let unset = matches!(
                self.context.instance(target)?.relation(inverse),
                Some(RelationSlot::Unloaded | RelationSlot::One(None))
            );
            if unset {
                self.context
                    .set_relation(target, inverse, RelationSlot::One(Some(id)))?;
                self.context.load_state_mut(target).loaded.insert(inverse);
            }
        }

        Ok(())
    }

    // ------------------------------------------------------------------
    // Relationship loading
    // ------------------------------------------------------------------

    /// Entry point for first access to a lazy relation. Loaded slots are
    /// returned as they are.
    pub fn load_attribute(
        &mut self,
        id: InstanceId,
        relation: usize,
    ) -> Result<RelationSlot, InternalError> {
        match self.context.instance(id)?.relation(relation) {
            Some(slot) if slot.is_loaded() => return Ok(slot.clone()),
            Some(_) => {}
            None => {
                return Err(InternalError::loader_invariant(format!(
                    "{id} has no relation #{relation}"
                )));
            }
        }
        if !self.context.is_managed(id) {
            return Err(InternalError::not_managed(format!(
                "{id} is not managed; its lazy relation cannot be loaded"
            )));
        }

        let descriptor = self.context.descriptor(id)?;
        let table = descriptor.table.clone();
        self.exec.debug_log(format!(
            "lazy load {}.{}",
            descriptor.name, descriptor.relations[relation].name
        ));
        sink::record(MetricsEvent::LazyLoad { entity: &table });

        self.load_relation(id, relation)
    }

    fn load_relation(
        &mut self,
        id: InstanceId,
        index: usize,
    ) -> Result<RelationSlot, InternalError> {
        let registry = self.registry();
        let entity = self.context.instance(id)?.entity();
        let descriptor = registry.entity(entity);
        let relation = descriptor.relations.get(index).ok_or_else(|| {
            InternalError::loader_invariant(format!("{} has no relation #{index}", descriptor.name))
        })?;
        let relation_id = descriptor.relation_id(index);
        let key = self.context.key_of(id)?;

        let slot = match &relation.mapping {
            RelationMapping::JoinColumns(join_columns) => {
                let stashed = self
                    .context
                    .load_state(id)
                    .and_then(|state| state.foreign_key(index))
                    .map(<[Value]>::to_vec);
                let target = registry.entity(relation.target);

                match stashed {
                    Some(values) if values.iter().all(|v| !v.is_null()) => {
                        let mut target_key = vec![Value::Null; target.primary_key.attributes.len()];
                        for (jc, value) in join_columns.iter().zip(values) {
                            let position = key_position(target, &jc.referenced)?;
                            if let Some(slot) = target_key.get_mut(position) {
                                *slot = value;
                            }
                        }
                        let found = self.find_by_id(
                            relation.target,
                            &PrimaryKey::new(target_key),
                            LockMode::None,
                        )?;
                        RelationSlot::One(found)
                    }
                    _ => RelationSlot::One(None),
                }
            }

            RelationMapping::JoinTable(_) => {
                let statement = self
                    .statements
                    .select_join_table_from_owner(relation_id, LockMode::None)?;
                let members = self.select_instances(&statement, &key)?;
                let stored = self.keys_of(&members)?;
                self.context
                    .load_state_mut(id)
                    .join_rows
                    .insert(index, stored);

                collect_slot(relation, members)
            }

            RelationMapping::MappedBy(_) => {
                let owning = registry.inverse_of(relation_id).ok_or_else(|| {
                    InternalError::loader_invariant(format!(
                        "{}.{} has no owning side",
                        descriptor.name, relation.name
                    ))
                })?;
                let statement = match &registry.relation(owning).mapping {
                    RelationMapping::JoinColumns(_) => self.statements.select_by_foreign_key(
                        owning.entity,
                        owning.index,
                        LockMode::None,
                    )?,
                    RelationMapping::JoinTable(_) => self
                        .statements
                        .select_join_table_from_target(owning, LockMode::None)?,
                    RelationMapping::MappedBy(_) => {
                        return Err(InternalError::loader_invariant(format!(
                            "{}.{} is mapped by another inverse relation",
                            descriptor.name, relation.name
                        )));
                    }
                };
                let members = self.select_instances(&statement, &key)?;

                collect_slot(relation, members)
            }
        };

        self.context.set_relation(id, index, slot.clone())?;
        self.context.load_state_mut(id).loaded.insert(index);

        Ok(slot)
    }

    // Run a navigation statement anchored at `key` and materialize each row.
    fn select_instances(
        &mut self,
        statement: &FactoryStatement,
        key: &PrimaryKey,
    ) -> Result<Vec<InstanceId>, InternalError> {
        if !key.is_complete() {
            return Ok(Vec::new());
        }
        let entity = statement.materialized_entity().ok_or_else(|| {
            InternalError::loader_invariant("navigation statement selects no entity")
        })?;
        let slot_values = bind::resolve(self.context, statement, &BindInputs::key(key.values()))?;
        let rows = self.exec.select(&statement.statement, &slot_values)?;

        let mut members = Vec::with_capacity(rows.len());
        for row in &rows {
            let id = self.materialize(entity, row)?;
            if !members.contains(&id) {
                members.push(id);
            }
        }

        Ok(members)
    }

    fn keys_of(&self, ids: &[InstanceId]) -> Result<BTreeSet<PrimaryKey>, InternalError> {
        ids.iter().map(|id| self.context.key_of(*id)).collect()
    }

    // ------------------------------------------------------------------
    // Refresh
    // ------------------------------------------------------------------

    /// Re-read a managed instance in place, discarding unflushed changes and
    /// lazily loaded relations.
    pub fn refresh(&mut self, id: InstanceId) -> Result<(), InternalError> {
        if !self.context.is_managed(id) || !self.context.status(id)?.is_flushed() {
            return Err(InternalError::not_managed(format!(
                "{id} is not a managed, flushed instance and cannot be refreshed"
            )));
        }
        let entity = self.context.instance(id)?.entity();
        let descriptor = self.registry().entity(entity);
        let key = self.context.key_of(id)?;

        let statement = self
            .statements
            .select_by_primary_key(entity, LockMode::None)?;
        let slot_values = bind::resolve(self.context, &statement, &BindInputs::key(key.values()))?;
        let rows = self.exec.select(&statement.statement, &slot_values)?;
        let Some(row) = rows.first() else {
            return Err(InternalError::not_found(&descriptor.name, key.to_string()));
        };

        self.apply_row(id, descriptor, row)?;
        self.context
            .transition(id, EntityStatus::FlushedLoadedFromDb)?;
        sink::record(MetricsEvent::RowsMaterialized {
            entity: &descriptor.table,
            rows: 1,
        });

        self.resolve_eager(id)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Run a compiled select and materialize its result items. Fetch-join
    /// segments fill the matching relation slots of their owners; members
    /// repeated across rows are kept once.
    pub fn execute_query(
        &mut self,
        query: &CompiledQuery,
        slot_values: &[Value],
    ) -> Result<Vec<QueryRow>, InternalError> {
        let Statement::Select(select) = &query.statement else {
            return Err(InternalError::loader_invariant(
                "execute_query expects a select statement",
            ));
        };
        let rows = self.exec.select(&query.statement, slot_values)?;

        let mut results = Vec::with_capacity(rows.len());
        let mut collected: BTreeMap<(InstanceId, usize), Vec<InstanceId>> = BTreeMap::new();

        for row in &rows {
            let mut values = Vec::with_capacity(query.items.len());
            for item in &query.items {
                let value = match item {
                    ResultItem::Entity {
                        entity, columns, ..
                    } => self.entity_value(*entity, row, columns)?,
                    ResultItem::Scalar { column, .. } => {
                        ResultValue::Scalar(row.get(*column).cloned().ok_or_else(|| {
                            InternalError::loader_invariant(format!(
                                "row has no column {column}"
                            ))
                        })?)
                    }
                };
                values.push(value);
            }

            let mut fetched: Vec<Option<InstanceId>> = Vec::with_capacity(query.fetch_joins.len());
            for join in &query.fetch_joins {
                let parent = match join.parent {
                    FetchParent::Item(i) => values.get(i).and_then(ResultValue::instance),
                    FetchParent::Fetch(j) => fetched.get(j).copied().flatten(),
                };
                let member = self
                    .entity_value(join.entity, row, &join.columns)?
                    .instance();
                fetched.push(member);

                let Some(parent) = parent else {
                    continue;
                };
                let members = collected.entry((parent, join.relation.index)).or_default();
                if let Some(member) = member
                    && !members.contains(&member)
                {
                    members.push(member);
                }
            }

            results.push(QueryRow { values });
        }

        for ((parent, index), members) in collected {
            self.attach_fetched(parent, index, members)?;
        }

        if query.is_fetch_join() && select.distinct {
            let mut unique: Vec<QueryRow> = Vec::with_capacity(results.len());
            for row in results {
                if !unique.contains(&row) {
                    unique.push(row);
                }
            }
            results = unique;
        }

        Ok(results)
    }

    fn entity_value(
        &mut self,
        entity: EntityId,
        row: &[Value],
        columns: &Range<usize>,
    ) -> Result<ResultValue, InternalError> {
        let segment = row.get(columns.clone()).ok_or_else(|| {
            InternalError::loader_invariant(format!(
                "row of {} values has no columns {columns:?}",
                row.len()
            ))
        })?;
        let key = row_key(self.registry().entity(entity), segment)?;
        if key.values().iter().all(Value::is_null) {
            return Ok(ResultValue::Scalar(Value::Null));
        }

        self.materialize(entity, segment).map(ResultValue::Entity)
    }

    // Slots the owner already holds (eagerly loaded, or touched by the
    // caller) are left alone.
    fn attach_fetched(
        &mut self,
        parent: InstanceId,
        index: usize,
        members: Vec<InstanceId>,
    ) -> Result<(), InternalError> {
        let already = self
            .context
            .instance(parent)?
            .relation(index)
            .is_some_and(RelationSlot::is_loaded);
        if already {
            return Ok(());
        }
        let entity = self.context.instance(parent)?.entity();
        let relation = self.registry().entity(entity).relations.get(index).ok_or_else(|| {
            InternalError::loader_invariant(format!("{parent} has no relation #{index}"))
        })?;

        if relation.join_table().is_some() {
            let stored = self.keys_of(&members)?;
            self.context
                .load_state_mut(parent)
                .join_rows
                .insert(index, stored);
        }
        let slot = collect_slot(relation, members);
        self.context.set_relation(parent, index, slot)?;
        self.context.load_state_mut(parent).loaded.insert(index);

        Ok(())
    }
}

fn collect_slot(relation: &RelationDescriptor, members: Vec<InstanceId>) -> RelationSlot {
    if relation.is_to_many() {
        RelationSlot::Many(members)
    } else {
        RelationSlot::One(members.first().copied())
    }
}

// Key values of one entity segment, in key-column order.
fn row_key(descriptor: &EntityDescriptor, row: &[Value]) -> Result<PrimaryKey, InternalError> {
    descriptor
        .primary_key
        .attributes
        .iter()
        .map(|&attribute| {
            descriptor
                .column_position(attribute)
                .and_then(|position| row.get(position))
                .cloned()
                .ok_or_else(|| {
                    InternalError::loader_invariant(format!(
                        "{} row is missing key attribute #{attribute}",
                        descriptor.name
                    ))
                })
        })
        .collect::<Result<Vec<_>, _>>()
        .map(PrimaryKey::new)
}
