//! Persistence context: the identity map, the instance arena and the
//! per-instance load state for one unit of work.
//!
//! A context is not thread-safe and belongs to exactly one session.

mod instance;
mod status;

#[cfg(test)]
mod tests;

pub use instance::{Instance, InstanceId, LoadState, RelationSlot};
pub use status::EntityStatus;

use crate::{
    error::InternalError,
    model::{DescriptorRegistry, EntityDescriptor, EntityId, PrimaryKey},
    value::Value,
};
use std::{collections::BTreeMap, sync::Arc};

///
/// PostponedForeignKey
///
/// An owning to-one relation whose target had no key when the owner was
/// inserted. The writer sets the foreign key once the target is inserted.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PostponedForeignKey {
    pub owner: InstanceId,
    pub relation: usize,
}

///
/// PersistenceContext
///
/// Invariant: the identity map never holds two instances for the same
/// (entity, key) pair. Instances stay in the arena after eviction so stale
/// handles fail status checks instead of aliasing new objects.
///

#[derive(Debug)]
pub struct PersistenceContext {
    registry: Arc<DescriptorRegistry>,
    instances: Vec<Instance>,
    states: BTreeMap<InstanceId, LoadState>,
    identity: BTreeMap<(EntityId, PrimaryKey), InstanceId>,
    registered: BTreeMap<InstanceId, PrimaryKey>,
    access: BTreeMap<u64, InstanceId>,
    access_seq: BTreeMap<InstanceId, u64>,
    next_access: u64,
    removals: Vec<InstanceId>,
    postponed: Vec<PostponedForeignKey>,
}

impl PersistenceContext {
    #[must_use]
    pub const fn new(registry: Arc<DescriptorRegistry>) -> Self {
        Self {
            registry,
            instances: Vec::new(),
            states: BTreeMap::new(),
            identity: BTreeMap::new(),
            registered: BTreeMap::new(),
            access: BTreeMap::new(),
            access_seq: BTreeMap::new(),
            next_access: 0,
            removals: Vec::new(),
            postponed: Vec::new(),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &DescriptorRegistry {
        &self.registry
    }

    #[must_use]
    pub const fn shared_registry(&self) -> &Arc<DescriptorRegistry> {
        &self.registry
    }

    // ------------------------------------------------------------------
    // Arena
    // ------------------------------------------------------------------

    /// Allocate a NEW instance with null attributes and empty relations.
    pub fn create(&mut self, entity: EntityId) -> InstanceId {
        let instance = Instance::fresh(self.registry.entity(entity));
        self.push(instance)
    }

    /// Allocate a materialization target with every relation unloaded.
    pub(crate) fn create_unloaded(&mut self, entity: EntityId) -> InstanceId {
        let instance = Instance::unloaded(self.registry.entity(entity));
        self.push(instance)
    }

    fn push(&mut self, instance: Instance) -> InstanceId {
        let id = InstanceId(self.instances.len());
        self.instances.push(instance);
        id
    }

    pub fn instance(&self, id: InstanceId) -> Result<&Instance, InternalError> {
        self.instances
            .get(id.0)
            .ok_or_else(|| InternalError::context_invariant(format!("unknown {id}")))
    }

    pub(crate) fn instance_mut(&mut self, id: InstanceId) -> Result<&mut Instance, InternalError> {
        self.instances
            .get_mut(id.0)
            .ok_or_else(|| InternalError::context_invariant(format!("unknown {id}")))
    }

    pub fn descriptor(&self, id: InstanceId) -> Result<&EntityDescriptor, InternalError> {
        let entity = self.instance(id)?.entity;
        Ok(self.registry.entity(entity))
    }

    pub fn status(&self, id: InstanceId) -> Result<EntityStatus, InternalError> {
        Ok(self.instance(id)?.status)
    }

    /// Move an instance to `next`, rejecting transitions the lifecycle does
    /// not allow.
    pub fn transition(&mut self, id: InstanceId, next: EntityStatus) -> Result<(), InternalError> {
        let instance = self.instance_mut(id)?;
        if !instance.status.can_become(next) {
            return Err(InternalError::context_invariant(format!(
                "{id} cannot move from {} to {next}",
                instance.status
            )));
        }
        instance.status = next;

        Ok(())
    }

    /// Current key of an instance, read from its key attributes.
    pub fn key_of(&self, id: InstanceId) -> Result<PrimaryKey, InternalError> {
        let instance = self.instance(id)?;
        Ok(instance.key(self.registry.entity(instance.entity)))
    }

    pub(crate) fn set_value(
        &mut self,
        id: InstanceId,
        attribute: usize,
        value: Value,
    ) -> Result<(), InternalError> {
        let slot = self
            .instance_mut(id)?
            .values
            .get_mut(attribute)
            .ok_or_else(|| {
                InternalError::context_invariant(format!("{id} has no attribute #{attribute}"))
            })?;
        *slot = value;

        Ok(())
    }

    pub(crate) fn set_relation(
        &mut self,
        id: InstanceId,
        relation: usize,
        value: RelationSlot,
    ) -> Result<(), InternalError> {
        let slot = self
            .instance_mut(id)?
            .relations
            .get_mut(relation)
            .ok_or_else(|| {
                InternalError::context_invariant(format!("{id} has no relation #{relation}"))
            })?;
        *slot = value;

        Ok(())
    }

    // ------------------------------------------------------------------
    // Identity map
    // ------------------------------------------------------------------

    /// Install or refresh the identity-map entry for `id` under `key` and
    /// move it to the end of the access order. A different instance already
    /// registered under the same key loses its entry.
    pub fn add_managed(&mut self, id: InstanceId, key: PrimaryKey) -> Result<(), InternalError> {
        if !key.is_complete() {
            return Err(InternalError::context_invariant(format!(
                "{id} cannot be registered under incomplete key {key}"
            )));
        }
        let entity = self.instance(id)?.entity;

        if let Some(previous) = self.registered.insert(id, key.clone())
            && previous != key
            && self.identity.get(&(entity, previous.clone())) == Some(&id)
        {
            self.identity.remove(&(entity, previous));
        }
        if let Some(displaced) = self.identity.insert((entity, key), id)
            && displaced != id
        {
            self.registered.remove(&displaced);
        }
        self.states.entry(id).or_default();
        self.touch(id);

        Ok(())
    }

    /// Track a persisted instance whose key is not known yet.
    pub(crate) fn add_pending(&mut self, id: InstanceId) {
        self.states.entry(id).or_default();
        self.touch(id);
    }

    #[must_use]
    pub fn find(&self, entity: EntityId, key: &PrimaryKey) -> Option<InstanceId> {
        self.identity.get(&(entity, key.clone())).copied()
    }

    /// True when the instance is tracked, registered under its current key,
    /// and that registration still points back at it. An instance awaiting
    /// a generated key is managed while its key stays unset.
    #[must_use]
    pub fn is_managed(&self, id: InstanceId) -> bool {
        let Some(instance) = self.instances.get(id.0) else {
            return false;
        };
        if !instance.status.is_managed() {
            return false;
        }
        let current = instance.key(self.registry.entity(instance.entity));

        match self.registered.get(&id) {
            Some(key) => {
                *key == current && self.identity.get(&(instance.entity, key.clone())) == Some(&id)
            }
            None => {
                instance.status == EntityStatus::PersistNotFlushed && !current.is_complete()
            }
        }
    }

    /// Key the instance is registered under, which may differ from its
    /// current attribute values if those were changed.
    #[must_use]
    pub fn registered_key(&self, id: InstanceId) -> Option<&PrimaryKey> {
        self.registered.get(&id)
    }

    /// Schedule a managed instance for deletion at the next flush. A
    /// pending insert is simply dropped.
    pub fn mark_for_removal(&mut self, id: InstanceId) -> Result<(), InternalError> {
        if !self.is_managed(id) {
            return Err(InternalError::not_managed(format!(
                "{id} is not managed and cannot be removed"
            )));
        }

        match self.status(id)? {
            EntityStatus::PersistNotFlushed => {
                self.transition(id, EntityStatus::New)?;
                self.evict(id);
            }
            EntityStatus::RemovedNotFlushed => {
                self.removals.retain(|r| *r != id);
                self.removals.push(id);
            }
            _ => {
                self.transition(id, EntityStatus::RemovedNotFlushed)?;
                self.forget_access(id);
                self.removals.push(id);
            }
        }

        Ok(())
    }

    /// Undo a pending removal (persist of a removed instance).
    pub(crate) fn cancel_removal(&mut self, id: InstanceId) -> Result<(), InternalError> {
        self.transition(id, EntityStatus::Flushed)?;
        self.removals.retain(|r| *r != id);
        self.touch(id);

        Ok(())
    }

    /// Finish a flushed removal: the row is gone, the instance is terminal.
    pub(crate) fn complete_removal(&mut self, id: InstanceId) -> Result<(), InternalError> {
        self.transition(id, EntityStatus::Removed)?;
        self.evict(id);

        Ok(())
    }

    pub fn detach(&mut self, id: InstanceId) -> Result<(), InternalError> {
        if !self.status(id)?.is_managed() {
            return Err(InternalError::not_managed(format!(
                "{id} is not managed and cannot be detached"
            )));
        }
        self.transition(id, EntityStatus::Detached)?;
        self.evict(id);

        Ok(())
    }

    /// Detach every managed instance and empty the context.
    pub fn detach_all(&mut self) {
        for instance in &mut self.instances {
            if instance.status.is_managed() {
                instance.status = EntityStatus::Detached;
            }
        }
        self.identity.clear();
        self.registered.clear();
        self.states.clear();
        self.access.clear();
        self.access_seq.clear();
        self.removals.clear();
        self.postponed.clear();
    }

    fn evict(&mut self, id: InstanceId) {
        if let Some(key) = self.registered.remove(&id)
            && let Ok(instance) = self.instance(id)
        {
            let entry = (instance.entity, key);
            if self.identity.get(&entry) == Some(&id) {
                self.identity.remove(&entry);
            }
        }
        self.states.remove(&id);
        self.forget_access(id);
        self.removals.retain(|r| *r != id);
        self.postponed.retain(|p| p.owner != id);
    }

    fn touch(&mut self, id: InstanceId) {
        if self.removals.contains(&id) {
            return;
        }
        self.forget_access(id);
        let seq = self.next_access;
        self.next_access += 1;
        self.access.insert(seq, id);
        self.access_seq.insert(id, seq);
    }

    fn forget_access(&mut self, id: InstanceId) {
        if let Some(seq) = self.access_seq.remove(&id) {
            self.access.remove(&seq);
        }
    }

    /// Managed, non-removed instances, least recently registered first.
    #[must_use]
    pub fn access_order(&self) -> Vec<InstanceId> {
        self.access.values().copied().collect()
    }

    /// Instances pending removal, in the order they were marked.
    #[must_use]
    pub fn removal_order(&self) -> &[InstanceId] {
        &self.removals
    }

    /// Number of identity-map entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.identity.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.identity.is_empty()
    }

    // ------------------------------------------------------------------
    // Load state
    // ------------------------------------------------------------------

    #[must_use]
    pub fn load_state(&self, id: InstanceId) -> Option<&LoadState> {
        self.states.get(&id)
    }

    pub(crate) fn load_state_mut(&mut self, id: InstanceId) -> &mut LoadState {
        self.states.entry(id).or_default()
    }

    pub(crate) fn postpone_foreign_key(&mut self, owner: InstanceId, relation: usize) {
        let entry = PostponedForeignKey { owner, relation };
        if !self.postponed.contains(&entry) {
            self.postponed.push(entry);
        }
    }

    pub(crate) fn take_postponed(&mut self) -> Vec<PostponedForeignKey> {
        std::mem::take(&mut self.postponed)
    }

    #[must_use]
    pub fn postponed(&self) -> &[PostponedForeignKey] {
        &self.postponed
    }
}
