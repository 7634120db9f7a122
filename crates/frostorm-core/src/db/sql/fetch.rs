use crate::{db::sql::AggregateFunction, model::EntityId};

///
/// FetchKind
/// What one selected SQL value means to the loader.
///

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum FetchKind {
    /// A basic (or flattened embedded) attribute of an entity.
    Attribute { entity: EntityId, attribute: usize },
    /// One column of an owning to-one relation's foreign key.
    JoinColumn {
        entity: EntityId,
        relation: usize,
        position: usize,
    },
    /// A scalar expression result.
    Scalar,
    /// An aggregate result.
    Aggregate(AggregateFunction),
}

///
/// FetchDescriptor
///
/// One per selected value, in projection order. `label` is the
/// query-language text the value came from (for diagnostics and result
/// variable lookup).
///

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct FetchDescriptor {
    pub kind: FetchKind,
    pub label: String,
}

impl FetchDescriptor {
    #[must_use]
    pub fn new(kind: FetchKind, label: impl Into<String>) -> Self {
        Self {
            kind,
            label: label.into(),
        }
    }

    #[must_use]
    pub const fn entity(&self) -> Option<EntityId> {
        match self.kind {
            FetchKind::Attribute { entity, .. } | FetchKind::JoinColumn { entity, .. } => {
                Some(entity)
            }
            FetchKind::Scalar | FetchKind::Aggregate(_) => None,
        }
    }
}
