use crate::{
    db::context::EntityStatus,
    model::{EntityDescriptor, EntityId, PrimaryKey},
    value::Value,
};
use derive_more::Display;
use std::collections::{BTreeMap, BTreeSet};

///
/// InstanceId
///
/// Handle into a persistence context's instance arena. Relationship slots
/// store these instead of references, so object-graph cycles are plain
/// index lookups.
///

#[derive(Clone, Copy, Debug, Display, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[display("instance#{_0}")]
pub struct InstanceId(pub(crate) usize);

impl InstanceId {
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

///
/// RelationSlot
///

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum RelationSlot {
    /// Lazy relation not yet read from the store.
    #[default]
    Unloaded,
    One(Option<InstanceId>),
    Many(Vec<InstanceId>),
}

impl RelationSlot {
    #[must_use]
    pub const fn is_loaded(&self) -> bool {
        !matches!(self, Self::Unloaded)
    }

    /// Every referenced instance, in slot order.
    #[must_use]
    pub fn targets(&self) -> Vec<InstanceId> {
        match self {
            Self::Unloaded | Self::One(None) => Vec::new(),
            Self::One(Some(id)) => vec![*id],
            Self::Many(ids) => ids.clone(),
        }
    }
}

///
/// Instance
///
/// One entity object: its descriptor, lifecycle status, basic attribute
/// values (one per descriptor attribute) and relationship slots (one per
/// descriptor relation).
///

#[derive(Clone, Debug)]
pub struct Instance {
    pub(crate) entity: EntityId,
    pub(crate) status: EntityStatus,
    pub(crate) values: Vec<Value>,
    pub(crate) relations: Vec<RelationSlot>,
}

impl Instance {
    /// A fresh object with null attributes and empty, loaded relations.
    pub(crate) fn fresh(entity: &EntityDescriptor) -> Self {
        let relations = entity
            .relations
            .iter()
            .map(|r| {
                if r.is_to_many() {
                    RelationSlot::Many(Vec::new())
                } else {
                    RelationSlot::One(None)
                }
            })
            .collect();

        Self {
            entity: entity.id,
            status: EntityStatus::New,
            values: vec![Value::Null; entity.attributes.len()],
            relations,
        }
    }

    /// A materialization target whose relations all start unloaded.
    pub(crate) fn unloaded(entity: &EntityDescriptor) -> Self {
        Self {
            entity: entity.id,
            status: EntityStatus::New,
            values: vec![Value::Null; entity.attributes.len()],
            relations: vec![RelationSlot::Unloaded; entity.relations.len()],
        }
    }

    #[must_use]
    pub const fn entity(&self) -> EntityId {
        self.entity
    }

    #[must_use]
    pub const fn status(&self) -> EntityStatus {
        self.status
    }

    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    #[must_use]
    pub fn value(&self, attribute: usize) -> Option<&Value> {
        self.values.get(attribute)
    }

    #[must_use]
    pub fn relation(&self, index: usize) -> Option<&RelationSlot> {
        self.relations.get(index)
    }

    /// Current key values read from the key attributes.
    #[must_use]
    pub fn key(&self, entity: &EntityDescriptor) -> PrimaryKey {
        PrimaryKey::new(
            entity
                .primary_key
                .attributes
                .iter()
                .map(|&a| self.values.get(a).cloned().unwrap_or(Value::Null))
                .collect(),
        )
    }
}

///
/// LoadState
///
/// Side table for one managed instance: what the store holds for it as of
/// the last read or write. Dirty checking compares the instance against
/// this snapshot.
///

#[derive(Clone, Debug, Default)]
pub struct LoadState {
    /// Attribute values as last read or written; `None` until first flush.
    pub(crate) snapshot: Option<Vec<Value>>,
    /// Foreign-key values per owning inline to-one relation index, kept so
    /// lazy relations can load by key and so key changes are detectable.
    pub(crate) foreign_keys: BTreeMap<usize, Vec<Value>>,
    /// Target keys of join-table collections as stored, per relation index.
    pub(crate) join_rows: BTreeMap<usize, BTreeSet<PrimaryKey>>,
    /// Version value last read from or written to the store.
    pub(crate) version: Option<Value>,
    /// Lazy relations loaded since materialization.
    pub(crate) loaded: BTreeSet<usize>,
}

impl LoadState {
    #[must_use]
    pub fn snapshot(&self) -> Option<&[Value]> {
        self.snapshot.as_deref()
    }

    #[must_use]
    pub fn foreign_key(&self, relation: usize) -> Option<&[Value]> {
        self.foreign_keys.get(&relation).map(Vec::as_slice)
    }

    #[must_use]
    pub const fn version(&self) -> Option<&Value> {
        self.version.as_ref()
    }

    #[must_use]
    pub fn is_loaded(&self, relation: usize) -> bool {
        self.loaded.contains(&relation)
    }
}
