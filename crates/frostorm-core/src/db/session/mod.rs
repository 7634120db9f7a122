//! One unit of work: the persistence context, a store connection and the
//! statement source, behind a name-based API.


pub use crate::config::FlushMode;

use crate::{
    config::SessionConfig,
    db::{
        compile::{CompiledQuery, Compiler, QueryKind},
        context::{EntityStatus, InstanceId, PersistenceContext, RelationSlot},
        criteria::CriteriaQuery,
        executor::{
            EntityLoader, EntityWriter, ExecutionOptions, FlushSummary, QueryRow,
            StatementTraceSink,
        },
        sql::{Bindings, LockMode},
        statement::{CachedStatementFactory, StatementFactory, StatementSource},
        store::StoreRunner,
    },
    error::{InternalError, SemanticError},
    model::{DescriptorRegistry, EntityDescriptor, EntityId, PrimaryKey, RelationDescriptor},
    obs::sink::{MetricsSink, with_metrics_sink},
    value::Value,
};
use std::{rc::Rc, sync::Arc};

/// Statement source shared by sessions; usually a cache.
pub type SharedStatements = Arc<dyn StatementSource + Send + Sync>;

///
/// EntityManager
///
/// Session-scoped handle with policy (debug, flush mode, metrics) and
/// execution routing. Not thread-safe; one per unit of work.
///

pub struct EntityManager<R: StoreRunner> {
    registry: Arc<DescriptorRegistry>,
    statements: SharedStatements,
    compiler: Compiler,
    context: PersistenceContext,
    runner: R,
    options: ExecutionOptions,
    config: SessionConfig,
    metrics: Option<Rc<dyn MetricsSink>>,
}

impl<R: StoreRunner> EntityManager<R> {
    #[must_use]
    pub fn new(registry: Arc<DescriptorRegistry>, runner: R) -> Self {
        Self::with_config(registry, runner, SessionConfig::default())
    }

    #[must_use]
    pub fn with_config(registry: Arc<DescriptorRegistry>, runner: R, config: SessionConfig) -> Self {
        let statements: SharedStatements = if config.statement_cache {
            Arc::new(CachedStatementFactory::from_registry(registry.clone()))
        } else {
            Arc::new(StatementFactory::new(registry.clone()))
        };

        Self::with_statements(registry, statements, runner, config)
    }

    /// Session over a statement source shared with other sessions.
    #[must_use]
    pub fn with_statements(
        registry: Arc<DescriptorRegistry>,
        statements: SharedStatements,
        runner: R,
        config: SessionConfig,
    ) -> Self {
        let options = ExecutionOptions::new(config.dialect).with_debug(config.debug);

        Self {
            compiler: Compiler::new(registry.clone()),
            context: PersistenceContext::new(registry.clone()),
            registry,
            statements,
            runner,
            options,
            config,
            metrics: None,
        }
    }

    #[must_use]
    pub fn metrics_sink(mut self, sink: Rc<dyn MetricsSink>) -> Self {
        self.metrics = Some(sink);
        self
    }

    #[must_use]
    pub fn trace_sink(mut self, sink: &'static dyn StatementTraceSink) -> Self {
        self.options = self.options.with_trace(sink);
        self
    }

    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    #[must_use]
    pub const fn context(&self) -> &PersistenceContext {
        &self.context
    }

    #[must_use]
    pub const fn runner(&self) -> &R {
        &self.runner
    }

    pub const fn runner_mut(&mut self) -> &mut R {
        &mut self.runner
    }

    #[must_use]
    pub fn statements(&self) -> &SharedStatements {
        &self.statements
    }

    fn debug_log(&self, s: impl Into<String>) {
        if self.config.debug {
            println!("[debug] {}", s.into());
        }
    }

    // Route every store-touching call through the session's metrics sink.
    fn with_metrics<T>(&mut self, f: impl FnOnce(&mut Self) -> T) -> T {
        match self.metrics.clone() {
            Some(sink) => with_metrics_sink(sink, || f(self)),
            None => f(self),
        }
    }

    fn loader(&mut self) -> EntityLoader<'_, SharedStatements, R> {
        EntityLoader::new(
            &self.statements,
            &mut self.context,
            &mut self.runner,
            &self.options,
        )
    }

    fn writer(&mut self) -> EntityWriter<'_, SharedStatements, R> {
        EntityWriter::new(
            &self.statements,
            &mut self.context,
            &mut self.runner,
            &self.options,
        )
    }

    // ---------------------------------------------------------------------
    // Name resolution
    // ---------------------------------------------------------------------

    fn entity(&self, name: &str) -> Result<&EntityDescriptor, InternalError> {
        self.registry.entity_by_name(name).ok_or_else(|| {
            InternalError::from(SemanticError::UnknownEntity {
                name: name.to_string(),
            })
        })
    }

    fn attribute(&self, id: InstanceId, name: &str) -> Result<usize, InternalError> {
        let entity = self.context.descriptor(id)?;
        entity.attribute_index(name).ok_or_else(|| {
            InternalError::from(SemanticError::UnknownAttribute {
                entity: entity.name.clone(),
                path: name.to_string(),
            })
        })
    }

    fn relation(
        &self,
        id: InstanceId,
        name: &str,
        to_many: bool,
    ) -> Result<(usize, &RelationDescriptor), InternalError> {
        let entity = self.context.descriptor(id)?;
        let index = entity.relation_index(name).ok_or_else(|| {
            InternalError::from(SemanticError::NotARelationship {
                entity: entity.name.clone(),
                attribute: name.to_string(),
            })
        })?;
        let relation = &entity.relations[index];
        if relation.is_to_many() != to_many {
            let shape = if to_many { "a collection" } else { "a single reference" };
            return Err(InternalError::session_unsupported(format!(
                "{}.{name} is not {shape}",
                entity.name
            )));
        }

        Ok((index, relation))
    }

    // Slot contents, loading a lazy relation on first access.
    fn loaded_slot(&mut self, id: InstanceId, index: usize) -> Result<RelationSlot, InternalError> {
        let slot = self
            .context
            .instance(id)?
            .relation(index)
            .cloned()
            .unwrap_or_default();
        if slot.is_loaded() {
            return Ok(slot);
        }

        self.with_metrics(|s| s.loader().load_attribute(id, index))
    }

    // ---------------------------------------------------------------------
    // Instances and attributes
    // ---------------------------------------------------------------------

    /// A fresh, unmanaged instance of `entity`.
    pub fn new_instance(&mut self, entity: &str) -> Result<InstanceId, InternalError> {
        let entity = self.entity(entity)?.id;

        Ok(self.context.create(entity))
    }

    pub fn get(&self, id: InstanceId, attribute: &str) -> Result<Value, InternalError> {
        let index = self.attribute(id, attribute)?;

        Ok(self
            .context
            .instance(id)?
            .value(index)
            .cloned()
            .unwrap_or(Value::Null))
    }

    /// Set a basic attribute, coercing the value to the declared kind.
    pub fn set(
        &mut self,
        id: InstanceId,
        attribute: &str,
        value: impl Into<Value>,
    ) -> Result<(), InternalError> {
        let index = self.attribute(id, attribute)?;
        let kind = self.context.descriptor(id)?.attributes[index].kind;
        let value = kind.coerce(value.into()).map_err(|err| {
            InternalError::from(SemanticError::InvalidExpression {
                message: err.to_string(),
            })
        })?;

        self.context.set_value(id, index, value)
    }

    pub fn get_ref(
        &mut self,
        id: InstanceId,
        relation: &str,
    ) -> Result<Option<InstanceId>, InternalError> {
        let (index, _) = self.relation(id, relation, false)?;

        Ok(self.loaded_slot(id, index)?.targets().first().copied())
    }

    pub fn set_ref(
        &mut self,
        id: InstanceId,
        relation: &str,
        target: Option<InstanceId>,
    ) -> Result<(), InternalError> {
        let (index, descriptor) = self.relation(id, relation, false)?;
        let expected = descriptor.target;
        if let Some(target) = target {
            self.check_target(expected, target)?;
        }

        self.context
            .set_relation(id, index, RelationSlot::One(target))
    }

    pub fn get_many(
        &mut self,
        id: InstanceId,
        relation: &str,
    ) -> Result<Vec<InstanceId>, InternalError> {
        let (index, _) = self.relation(id, relation, true)?;

        Ok(self.loaded_slot(id, index)?.targets())
    }

    /// Append `target` to a collection; already-present members are kept once.
    pub fn add_to(
        &mut self,
        id: InstanceId,
        relation: &str,
        target: InstanceId,
    ) -> Result<(), InternalError> {
        let (index, descriptor) = self.relation(id, relation, true)?;
        self.check_target(descriptor.target, target)?;

        let mut members = self.loaded_slot(id, index)?.targets();
        if !members.contains(&target) {
            members.push(target);
        }

        self.context
            .set_relation(id, index, RelationSlot::Many(members))
    }

    pub fn remove_from(
        &mut self,
        id: InstanceId,
        relation: &str,
        target: InstanceId,
    ) -> Result<(), InternalError> {
        let (index, _) = self.relation(id, relation, true)?;

        let mut members = self.loaded_slot(id, index)?.targets();
        members.retain(|m| *m != target);

        self.context
            .set_relation(id, index, RelationSlot::Many(members))
    }

    fn check_target(&self, expected: EntityId, target: InstanceId) -> Result<(), InternalError> {
        let actual = self.context.instance(target)?.entity();
        if actual != expected {
            return Err(InternalError::session_unsupported(format!(
                "{target} is a {}, not a {}",
                self.registry.entity(actual).name,
                self.registry.entity(expected).name
            )));
        }

        Ok(())
    }

    // ---------------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------------

    pub fn persist(&mut self, id: InstanceId) -> Result<(), InternalError> {
        self.with_metrics(|s| s.writer().persist(id))
    }

    pub fn remove(&mut self, id: InstanceId) -> Result<(), InternalError> {
        self.with_metrics(|s| s.writer().remove(id))
    }

    pub fn find(
        &mut self,
        entity: &str,
        key: impl Into<PrimaryKey>,
    ) -> Result<Option<InstanceId>, InternalError> {
        let lock = self.config.default_lock;
        self.find_with_lock(entity, key, lock)
    }

    pub fn find_with_lock(
        &mut self,
        entity: &str,
        key: impl Into<PrimaryKey>,
        lock: LockMode,
    ) -> Result<Option<InstanceId>, InternalError> {
        let entity = self.entity(entity)?.id;
        let key = key.into();

        self.with_metrics(|s| s.loader().find_by_id(entity, &key, lock))
    }

    /// Like `find`, but a missing row is a `NotFound` error.
    pub fn find_required(
        &mut self,
        entity: &str,
        key: impl Into<PrimaryKey>,
    ) -> Result<InstanceId, InternalError> {
        let key = key.into();
        self.find(entity, key.clone())?
            .ok_or_else(|| InternalError::not_found(entity, key.to_string()))
    }

    pub fn refresh(&mut self, id: InstanceId) -> Result<(), InternalError> {
        self.with_metrics(|s| s.loader().refresh(id))
    }

    pub fn detach(&mut self, id: InstanceId) -> Result<(), InternalError> {
        self.debug_log(format!("detach {id}"));
        self.context.detach(id)
    }

    /// Detach every managed instance; pending changes are discarded.
    pub fn clear(&mut self) {
        self.debug_log(format!("clear {} instances", self.context.len()));
        self.context.detach_all();
    }

    #[must_use]
    pub fn contains(&self, id: InstanceId) -> bool {
        self.context.is_managed(id)
    }

    pub fn status(&self, id: InstanceId) -> Result<EntityStatus, InternalError> {
        self.context.status(id)
    }

    pub fn flush(&mut self) -> Result<FlushSummary, InternalError> {
        self.with_metrics(|s| s.writer().flush())
    }

    /// Flush, then commit the store transaction.
    pub fn commit(&mut self) -> Result<FlushSummary, InternalError> {
        let summary = self.flush()?;
        self.runner.commit()?;
        self.debug_log("commit");

        Ok(summary)
    }

    /// Roll the store back and detach everything the context held.
    pub fn rollback(&mut self) -> Result<(), InternalError> {
        self.runner.rollback()?;
        self.context.detach_all();
        self.debug_log("rollback");

        Ok(())
    }

    // ---------------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------------

    pub fn create_query(&self, text: &str) -> Result<CompiledQuery, InternalError> {
        self.compiler.compile_text(text)
    }

    /// Compile and run a JPQL select.
    pub fn query(&mut self, text: &str, bindings: &Bindings) -> Result<Vec<QueryRow>, InternalError> {
        let query = self.create_query(text)?;
        self.execute_query(&query, bindings)
    }

    pub fn criteria(
        &mut self,
        criteria: &CriteriaQuery,
        bindings: &Bindings,
    ) -> Result<Vec<QueryRow>, InternalError> {
        let query = self.compiler.compile(&criteria.to_statement())?;
        self.execute_query(&query, bindings)
    }

    pub fn execute_query(
        &mut self,
        query: &CompiledQuery,
        bindings: &Bindings,
    ) -> Result<Vec<QueryRow>, InternalError> {
        if query.kind != QueryKind::Select {
            return Err(InternalError::session_unsupported(
                "bulk statements run through execute_update",
            ));
        }
        let slot_values = bindings.resolve(&query.params)?;
        self.auto_flush()?;

        self.with_metrics(|s| s.loader().execute_query(query, &slot_values))
    }

    /// Compile and run a bulk JPQL `UPDATE` or `DELETE`; returns the
    /// affected-row count. Managed instances are not refreshed.
    pub fn execute_update(&mut self, text: &str, bindings: &Bindings) -> Result<u64, InternalError> {
        let query = self.create_query(text)?;
        if query.kind == QueryKind::Select {
            return Err(InternalError::session_unsupported(
                "select statements run through query",
            ));
        }
        let slot_values = bindings.resolve(&query.params)?;
        self.auto_flush()?;

        self.with_metrics(|s| s.writer().execute_bulk(&query, &slot_values))
    }

    fn auto_flush(&mut self) -> Result<(), InternalError> {
        if self.config.flush_mode == FlushMode::Auto {
            self.flush()?;
        }

        Ok(())
    }
}
