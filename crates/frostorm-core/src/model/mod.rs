//! Static mapping metadata: one immutable descriptor per entity type,
//! validated and cross-linked by the registry.

mod attribute;
mod builder;
mod entity;
mod key;
mod registry;
mod relation;

#[cfg(test)]
mod tests;

pub use attribute::{AttributeDescriptor, EmbeddedDescriptor, VersionDescriptor, VersionPolicy};
pub use builder::{EmbeddedBuilder, EntityBuilder, RelationBuilder};
pub use entity::{ColumnRole, EntityColumn, EntityDescriptor};
pub use key::{KeyGeneration, PrimaryKey, PrimaryKeyDescriptor};
pub use registry::{DescriptorRegistry, RegistryBuilder, SharedRegistry};
pub use relation::{
    Cardinality, Cascade, FetchType, JoinColumn, JoinTable, RelationDescriptor, RelationMapping,
};

use derive_more::Display;

///
/// EntityId
///
/// Index of an entity descriptor inside its registry. Only the registry
/// mints these, so they double as identity keys for descriptors.
///

#[derive(Clone, Copy, Debug, Display, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[display("entity#{_0}")]
pub struct EntityId(pub(crate) usize);

impl EntityId {
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

///
/// AttributeId
///

#[derive(Clone, Copy, Debug, Display, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[display("{entity}.attr#{index}")]
pub struct AttributeId {
    pub entity: EntityId,
    pub index: usize,
}

///
/// RelationId
///

#[derive(Clone, Copy, Debug, Display, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[display("{entity}.rel#{index}")]
pub struct RelationId {
    pub entity: EntityId,
    pub index: usize,
}
