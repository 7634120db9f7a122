use crate::{
    db::{
        compile::CompiledQuery,
        context::{EntityStatus, InstanceId, PersistenceContext, RelationSlot},
        executor::{
            EntityLoader, Execution, ExecutionOptions,
            bind::{self, BindInputs},
        },
        statement::{FactoryStatement, StatementSource},
        store::StoreRunner,
    },
    error::InternalError,
    model::{ColumnRole, DescriptorRegistry, EntityDescriptor, KeyGeneration, PrimaryKey, VersionPolicy},
    obs::sink::{self, MetricsEvent},
    value::Value,
};
use std::collections::BTreeSet;
use time::{OffsetDateTime, PrimitiveDateTime};

///
/// FlushSummary
///
/// Statement counts of one flush.
///

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct FlushSummary {
    pub inserts: usize,
    pub updates: usize,
    pub deletes: usize,
    /// Association rows written to join tables.
    pub join_rows: usize,
    /// Foreign keys set after their target received a generated key.
    pub postponed: usize,
}

impl FlushSummary {
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.inserts == 0
            && self.updates == 0
            && self.deletes == 0
            && self.join_rows == 0
            && self.postponed == 0
    }
}

///
/// EntityWriter
///
/// Lifecycle transitions (persist, remove) and the flush that turns them,
/// plus attribute changes, into DML.
///

pub struct EntityWriter<'a, S, R> {
    statements: &'a S,
    context: &'a mut PersistenceContext,
    exec: Execution<'a, R>,
}

impl<'a, S: StatementSource, R: StoreRunner> EntityWriter<'a, S, R> {
    pub fn new(
        statements: &'a S,
        context: &'a mut PersistenceContext,
        runner: &'a mut R,
        options: &'a ExecutionOptions,
    ) -> Self {
        Self {
            statements,
            context,
            exec: Execution::new(runner, options),
        }
    }

    fn registry(&self) -> &'a DescriptorRegistry {
        let statements: &'a S = self.statements;
        statements.registry()
    }

    fn loader(&mut self) -> EntityLoader<'_, S, R> {
        EntityLoader::from_execution(self.statements, &mut *self.context, self.exec.reborrow())
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Make `id` managed, cascading along loaded persist-cascade relations.
    pub fn persist(&mut self, id: InstanceId) -> Result<(), InternalError> {
        self.persist_one(id)?;
        self.cascade_persist(id, &mut BTreeSet::new())
    }

    fn persist_one(&mut self, id: InstanceId) -> Result<(), InternalError> {
        match self.context.status(id)? {
            EntityStatus::New => {
                let descriptor = self.context.descriptor(id)?;
                let name = descriptor.name.clone();
                let assigned = descriptor.primary_key.generation == KeyGeneration::Assigned;
                let entity = descriptor.id;
                let key = self.context.key_of(id)?;

                if key.is_complete() {
                    if let Some(existing) = self.context.find(entity, &key)
                        && existing != id
                    {
                        return Err(InternalError::writer_conflict(format!(
                            "{name} {key} is already managed as {existing}"
                        )));
                    }
                    self.context.transition(id, EntityStatus::PersistNotFlushed)?;
                    self.context.add_managed(id, key)?;
                } else {
                    if assigned {
                        return Err(InternalError::writer_invariant(format!(
                            "{name} uses assigned keys; set {key} before persisting"
                        )));
                    }
                    self.context.transition(id, EntityStatus::PersistNotFlushed)?;
                    self.context.add_pending(id);
                }
                self.exec.debug_log(format!("persist {name} {id}"));

                Ok(())
            }
            EntityStatus::PersistNotFlushed
            | EntityStatus::Flushed
            | EntityStatus::FlushedLoadedFromDb => Ok(()),
            EntityStatus::RemovedNotFlushed => self.context.cancel_removal(id),
            status @ (EntityStatus::Removed | EntityStatus::Detached) => Err(
                InternalError::not_managed(format!("{id} is {status} and cannot be persisted")),
            ),
        }
    }

    fn cascade_persist(
        &mut self,
        id: InstanceId,
        visited: &mut BTreeSet<InstanceId>,
    ) -> Result<(), InternalError> {
        if !visited.insert(id) {
            return Ok(());
        }
        let instance = self.context.instance(id)?;
        let descriptor = self.registry().entity(instance.entity());

        let mut targets = Vec::new();
        for (index, relation) in descriptor.relations.iter().enumerate() {
            if relation.cascade.persist
                && let Some(slot) = instance.relation(index)
            {
                targets.extend(slot.targets());
            }
        }

        for target in targets {
            if matches!(
                self.context.status(target)?,
                EntityStatus::New | EntityStatus::RemovedNotFlushed
            ) {
                self.persist_one(target)?;
            }
            if self.context.status(target)?.is_managed() {
                self.cascade_persist(target, visited)?;
            }
        }

        Ok(())
    }

    /// Schedule `id` for deletion, cascading along remove-cascade relations
    /// (loading them first when they are still lazy).
    pub fn remove(&mut self, id: InstanceId) -> Result<(), InternalError> {
        self.remove_cascading(id, &mut BTreeSet::new())
    }

    fn remove_cascading(
        &mut self,
        id: InstanceId,
        visited: &mut BTreeSet<InstanceId>,
    ) -> Result<(), InternalError> {
        if !visited.insert(id) {
            return Ok(());
        }
        if !self.context.is_managed(id) {
            return Err(InternalError::not_managed(format!(
                "{id} is not managed and cannot be removed"
            )));
        }
        let descriptor = self.registry().entity(self.context.instance(id)?.entity());

        for (index, relation) in descriptor.relations.iter().enumerate() {
            if !relation.cascade.remove {
                continue;
            }
            let slot = self.loader().load_attribute(id, index)?;
            for target in slot.targets() {
                if self.context.is_managed(target) {
                    self.remove_cascading(target, visited)?;
                }
            }
        }

        self.exec
            .debug_log(format!("remove {} {id}", descriptor.name));
        self.context.mark_for_removal(id)
    }

    // ------------------------------------------------------------------
    // Flush
    // ------------------------------------------------------------------

    /// Write every pending change in access order, then postponed foreign
    /// keys, join-table contents and finally removals in removal order.
    pub fn flush(&mut self) -> Result<FlushSummary, InternalError> {
        let mut summary = FlushSummary::default();

        let mut visited = BTreeSet::new();
        for id in self.context.access_order() {
            self.cascade_persist(id, &mut visited)?;
        }

        for id in self.context.access_order() {
            match self.context.status(id)? {
                EntityStatus::PersistNotFlushed => {
                    self.insert(id)?;
                    summary.inserts += 1;
                }
                EntityStatus::Flushed | EntityStatus::FlushedLoadedFromDb => {
                    if self.update(id)? {
                        summary.updates += 1;
                    }
                }
                _ => {}
            }
        }

        summary.postponed = self.flush_postponed()?;

        for id in self.context.access_order() {
            if self.context.status(id)?.is_flushed() {
                summary.join_rows += self.flush_join_tables(id)?;
            }
        }

        for id in self.context.removal_order().to_vec() {
            self.delete(id)?;
            summary.deletes += 1;
        }

        sink::record(MetricsEvent::Flush {
            inserts: count(summary.inserts),
            updates: count(summary.updates),
            deletes: count(summary.deletes),
        });
        self.exec.debug_log(format!(
            "flush: {} inserts, {} updates, {} deletes, {} join rows, {} postponed",
            summary.inserts, summary.updates, summary.deletes, summary.join_rows, summary.postponed
        ));

        Ok(summary)
    }

    /// Insert or update a single instance, depending on whether it has
    /// reached the store yet.
    pub fn write(&mut self, id: InstanceId) -> Result<bool, InternalError> {
        match self.context.status(id)? {
            EntityStatus::PersistNotFlushed => self.insert(id).map(|()| true),
            EntityStatus::Flushed | EntityStatus::FlushedLoadedFromDb => self.update(id),
            status => Err(InternalError::not_managed(format!(
                "{id} is {status} and cannot be written"
            ))),
        }
    }

    fn insert(&mut self, id: InstanceId) -> Result<(), InternalError> {
        let descriptor = self.registry().entity(self.context.instance(id)?.entity());
        let key_attribute = descriptor.primary_key.attributes.first().copied();

        if !self.context.key_of(id)?.is_complete() {
            let generated = match &descriptor.primary_key.generation {
                KeyGeneration::Sequence(sequence) => {
                    Some(Value::Int(self.exec.next_sequence_value(sequence)?))
                }
                KeyGeneration::Ulid => Some(Value::Ulid(ulid::Ulid::new())),
                KeyGeneration::Identity => None,
                KeyGeneration::Assigned => {
                    return Err(InternalError::writer_invariant(format!(
                        "{} {id} reached the store without an assigned key",
                        descriptor.name
                    )));
                }
            };
            if let (Some(value), Some(attribute)) = (generated, key_attribute) {
                self.context.set_value(id, attribute, value)?;
            }
        }

        if let Some(version) = descriptor.version {
            let unset = self
                .context
                .instance(id)?
                .value(version.attribute)
                .is_none_or(Value::is_null);
            if unset {
                self.context
                    .set_value(id, version.attribute, initial_version(version.policy))?;
            }
        }

        for (index, _) in descriptor.inline_foreign_keys() {
            if bind::foreign_key(self.context, id, index)?.is_none() {
                self.context.postpone_foreign_key(id, index);
            }
        }

        let statement = self.statements.insert(descriptor.id)?;
        let inputs = BindInputs {
            instance: Some(id),
            ..BindInputs::default()
        };
        let slot_values = bind::resolve(self.context, &statement, &inputs)?;

        if descriptor.primary_key.generation.is_identity() {
            let generated = self
                .exec
                .insert_returning_key(&statement.statement, &slot_values)?;
            if let Some(attribute) = key_attribute {
                self.context.set_value(id, attribute, generated)?;
            }
        } else {
            self.exec.execute(&statement.statement, &slot_values)?;
        }

        let key = self.context.key_of(id)?;
        if let Some(existing) = self.context.find(descriptor.id, &key)
            && existing != id
        {
            return Err(InternalError::writer_conflict(format!(
                "{} {key} is already managed as {existing}",
                descriptor.name
            )));
        }
        self.context.transition(id, EntityStatus::Flushed)?;
        self.context.add_managed(id, key)?;
        self.record_written(id, descriptor)
    }

    // Snapshot what the store now holds for `id`.
    fn record_written(
        &mut self,
        id: InstanceId,
        descriptor: &EntityDescriptor,
    ) -> Result<(), InternalError> {
        let mut foreign_keys = Vec::new();
        for (index, relation) in descriptor.inline_foreign_keys() {
            let values = bind::foreign_key(self.context, id, index)?.unwrap_or_else(|| {
                vec![Value::Null; relation.join_columns().map_or(0, <[_]>::len)]
            });
            foreign_keys.push((index, values));
        }
        let instance = self.context.instance(id)?;
        let values = instance.values().to_vec();
        let loaded: Vec<usize> = (0..descriptor.relations.len())
            .filter(|&index| instance.relation(index).is_some_and(RelationSlot::is_loaded))
            .collect();

        let state = self.context.load_state_mut(id);
        state.version = descriptor
            .version
            .and_then(|v| values.get(v.attribute).cloned());
        state.snapshot = Some(values);
        state.foreign_keys.extend(foreign_keys);
        state.loaded.extend(loaded);

        Ok(())
    }

    // Returns false when nothing changed since the last snapshot.
    fn update(&mut self, id: InstanceId) -> Result<bool, InternalError> {
        let descriptor = self.registry().entity(self.context.instance(id)?.entity());
        let registered = self.context.registered_key(id).cloned().ok_or_else(|| {
            InternalError::writer_invariant(format!("{id} has no registered key"))
        })?;
        let current = self.context.key_of(id)?;
        if current != registered {
            return Err(InternalError::writer_conflict(format!(
                "{} key changed from {registered} to {current}; keys are immutable",
                descriptor.name
            )));
        }

        let state = self.context.load_state(id).cloned().unwrap_or_default();
        let snapshot = state.snapshot().ok_or_else(|| {
            InternalError::writer_invariant(format!("{id} has no snapshot to compare against"))
        })?;

        let mut changed_keys = Vec::new();
        for (index, _) in descriptor.inline_foreign_keys() {
            let unloaded = matches!(
                self.context.instance(id)?.relation(index),
                Some(RelationSlot::Unloaded)
            );
            if unloaded {
                continue;
            }
            match bind::foreign_key(self.context, id, index)? {
                None => self.context.postpone_foreign_key(id, index),
                Some(values) if state.foreign_key(index) != Some(values.as_slice()) => {
                    changed_keys.push((index, values));
                }
                Some(_) => {}
            }
        }

        let version = descriptor.version;
        let values = self.context.instance(id)?.values().to_vec();
        let dirty: Vec<ColumnRole> = descriptor
            .select_columns()
            .iter()
            .map(|column| column.role)
            .filter(|role| match *role {
                ColumnRole::Attribute(attribute) => {
                    !descriptor.primary_key.contains(attribute)
                        && version.is_none_or(|v| v.attribute != attribute)
                        && values.get(attribute) != snapshot.get(attribute)
                }
                ColumnRole::JoinColumn { relation, .. } => {
                    changed_keys.iter().any(|(index, _)| *index == relation)
                }
            })
            .collect();
        if dirty.is_empty() {
            return Ok(false);
        }

        let prior = state.version().cloned();
        let next = version.map(|v| next_version(v.policy, prior.as_ref()));

        let statement = self.statements.update(descriptor.id, dirty)?;
        let inputs = BindInputs {
            instance: Some(id),
            key: Some(registered.values()),
            prior_version: prior.as_ref(),
            next_version: next.as_ref(),
            ..BindInputs::default()
        };
        let slot_values = bind::resolve(self.context, &statement, &inputs)?;
        let affected = self.exec.execute(&statement.statement, &slot_values)?;
        if affected == 0 {
            return Err(self.lock_failure(descriptor, &registered));
        }

        if let (Some(v), Some(next)) = (version, next.clone()) {
            self.context.set_value(id, v.attribute, next)?;
        }
        let values = self.context.instance(id)?.values().to_vec();
        let state = self.context.load_state_mut(id);
        state.snapshot = Some(values);
        state.version = next;
        state.foreign_keys.extend(changed_keys);
        self.context.transition(id, EntityStatus::Flushed)?;

        Ok(true)
    }

    fn flush_postponed(&mut self) -> Result<usize, InternalError> {
        let postponed = self.context.take_postponed();
        let mut written = 0;

        for entry in postponed {
            if !self.context.status(entry.owner)?.is_flushed() {
                continue;
            }
            let descriptor = self.context.descriptor(entry.owner)?;
            let entity = descriptor.id;
            let name = descriptor.name.clone();

            let Some(values) = bind::foreign_key(self.context, entry.owner, entry.relation)? else {
                return Err(InternalError::writer_invariant(format!(
                    "{name} {}: referenced instance still has no key after flush",
                    entry.owner
                )));
            };
            let key = self.context.key_of(entry.owner)?;
            let statement = self.statements.update_join_columns(entity, entry.relation)?;
            let inputs = BindInputs {
                instance: Some(entry.owner),
                key: Some(key.values()),
                ..BindInputs::default()
            };
            let slot_values = bind::resolve(self.context, &statement, &inputs)?;
            self.exec.execute(&statement.statement, &slot_values)?;

            self.context
                .load_state_mut(entry.owner)
                .foreign_keys
                .insert(entry.relation, values);
            written += 1;
        }

        Ok(written)
    }

    // Owning join-table collections are written as a whole: when the member
    // set differs from what was read or last written, the owner's rows are
    // deleted and re-inserted.
    fn flush_join_tables(&mut self, id: InstanceId) -> Result<usize, InternalError> {
        let descriptor = self.registry().entity(self.context.instance(id)?.entity());
        let mut written = 0;

        for (index, relation) in descriptor.owned_join_tables() {
            let slot = match self.context.instance(id)?.relation(index) {
                Some(slot) if slot.is_loaded() => slot.clone(),
                _ => continue,
            };

            let mut members = BTreeSet::new();
            for target in slot.targets() {
                let status = self.context.status(target)?;
                if !status.is_managed() || status == EntityStatus::PersistNotFlushed {
                    return Err(InternalError::not_managed(format!(
                        "{}.{} holds {target}, which is {status}",
                        descriptor.name, relation.name
                    )));
                }
                members.insert(self.context.key_of(target)?);
            }

            let stored = self
                .context
                .load_state(id)
                .and_then(|state| state.join_rows.get(&index))
                .cloned()
                .unwrap_or_default();
            if stored == members {
                continue;
            }

            let relation_id = descriptor.relation_id(index);
            let owner = self.context.key_of(id)?;
            if !stored.is_empty() {
                let delete = self.statements.delete_join_rows(relation_id)?;
                self.execute_join(&delete, &owner, None)?;
            }
            let insert = self.statements.insert_join_row(relation_id)?;
            for target in &members {
                self.execute_join(&insert, &owner, Some(target))?;
                written += 1;
            }

            self.context
                .load_state_mut(id)
                .join_rows
                .insert(index, members);
        }

        Ok(written)
    }

    fn execute_join(
        &mut self,
        statement: &FactoryStatement,
        owner: &PrimaryKey,
        target: Option<&PrimaryKey>,
    ) -> Result<u64, InternalError> {
        let inputs = BindInputs {
            owner: Some(owner.values()),
            target: target.map(PrimaryKey::values),
            ..BindInputs::default()
        };
        let slot_values = bind::resolve(self.context, statement, &inputs)?;

        self.exec.execute(&statement.statement, &slot_values)
    }

    fn delete(&mut self, id: InstanceId) -> Result<(), InternalError> {
        let descriptor = self.registry().entity(self.context.instance(id)?.entity());
        let key = self.context.registered_key(id).cloned().ok_or_else(|| {
            InternalError::writer_invariant(format!("{id} has no registered key"))
        })?;

        for (index, _) in descriptor.owned_join_tables() {
            let statement = self.statements.delete_join_rows(descriptor.relation_id(index))?;
            self.execute_join(&statement, &key, None)?;
        }

        let prior = self
            .context
            .load_state(id)
            .and_then(|state| state.version().cloned());
        let statement = self.statements.delete(descriptor.id)?;
        let inputs = BindInputs {
            key: Some(key.values()),
            prior_version: prior.as_ref(),
            ..BindInputs::default()
        };
        let slot_values = bind::resolve(self.context, &statement, &inputs)?;
        let affected = self.exec.execute(&statement.statement, &slot_values)?;
        if affected == 0 {
            return Err(self.lock_failure(descriptor, &key));
        }

        self.context.complete_removal(id)
    }

    fn lock_failure(&self, descriptor: &EntityDescriptor, key: &PrimaryKey) -> InternalError {
        sink::record(MetricsEvent::OptimisticLockFailure {
            entity: &descriptor.table,
        });
        self.exec.debug_log(format!(
            "optimistic lock failure on {} {key}",
            descriptor.name
        ));

        InternalError::optimistic_lock(&descriptor.name, key.to_string())
    }

    // ------------------------------------------------------------------
    // Bulk
    // ------------------------------------------------------------------

    /// Run a compiled bulk update or delete. Managed instances are not
    /// synchronized with the rows it touches.
    pub fn execute_bulk(
        &mut self,
        query: &CompiledQuery,
        slot_values: &[Value],
    ) -> Result<u64, InternalError> {
        if query.statement.as_select().is_some() {
            return Err(InternalError::writer_invariant(
                "bulk execution expects an update or delete",
            ));
        }

        self.exec.execute(&query.statement, slot_values)
    }
}

fn count(n: usize) -> u64 {
    u64::try_from(n).unwrap_or(u64::MAX)
}

fn now() -> Value {
    let now = OffsetDateTime::now_utc();

    Value::Timestamp(PrimitiveDateTime::new(now.date(), now.time()))
}

fn initial_version(policy: VersionPolicy) -> Value {
    match policy {
        VersionPolicy::Increment => Value::Int(1),
        VersionPolicy::Timestamp => now(),
    }
}

fn next_version(policy: VersionPolicy, prior: Option<&Value>) -> Value {
    match policy {
        VersionPolicy::Increment => {
            Value::Int(prior.and_then(Value::as_int).unwrap_or(0).saturating_add(1))
        }
        VersionPolicy::Timestamp => now(),
    }
}
