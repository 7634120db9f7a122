use crate::model::{
    AttributeDescriptor, AttributeId, EmbeddedDescriptor, EntityId, PrimaryKeyDescriptor,
    RelationDescriptor, RelationId, VersionDescriptor,
};

///
/// ColumnRole
/// What a selected entity column feeds back into.
///

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum ColumnRole {
    /// A basic (or flattened embedded) attribute slot.
    Attribute(usize),
    /// One column of an owning to-one relation's foreign key.
    JoinColumn { relation: usize, position: usize },
}

///
/// EntityColumn
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EntityColumn {
    pub column: String,
    pub role: ColumnRole,
}

///
/// EntityDescriptor
///
/// Immutable mapping metadata for one entity type. Exactly one instance
/// exists per entity inside a registry; code compares descriptors by `id`.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EntityDescriptor {
    pub id: EntityId,
    /// Entity name as used in query-language range declarations.
    pub name: String,
    pub table: String,
    /// Ordered basic attributes, embedded sub-attributes flattened in place.
    pub attributes: Vec<AttributeDescriptor>,
    pub embedded: Vec<EmbeddedDescriptor>,
    pub relations: Vec<RelationDescriptor>,
    pub primary_key: PrimaryKeyDescriptor,
    pub version: Option<VersionDescriptor>,
    pub(crate) columns: Vec<EntityColumn>,
}

impl EntityDescriptor {
    #[must_use]
    pub fn attribute_index(&self, name: &str) -> Option<usize> {
        self.attributes.iter().position(|a| a.name == name)
    }

    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&AttributeDescriptor> {
        self.attributes.iter().find(|a| a.name == name)
    }

    #[must_use]
    pub const fn attribute_id(&self, index: usize) -> AttributeId {
        AttributeId {
            entity: self.id,
            index,
        }
    }

    #[must_use]
    pub fn relation_index(&self, name: &str) -> Option<usize> {
        self.relations.iter().position(|r| r.name == name)
    }

    #[must_use]
    pub fn relation(&self, name: &str) -> Option<&RelationDescriptor> {
        self.relations.iter().find(|r| r.name == name)
    }

    #[must_use]
    pub const fn relation_id(&self, index: usize) -> RelationId {
        RelationId {
            entity: self.id,
            index,
        }
    }

    #[must_use]
    pub fn embedded_index(&self, name: &str) -> Option<usize> {
        self.embedded.iter().position(|e| e.name == name)
    }

    /// Attribute mapped to a column name.
    #[must_use]
    pub fn attribute_by_column(&self, column: &str) -> Option<usize> {
        self.attributes.iter().position(|a| a.column == column)
    }

    /// Primary-key column names in key order.
    #[must_use]
    pub fn key_columns(&self) -> Vec<&str> {
        self.primary_key
            .attributes
            .iter()
            .map(|&i| self.attributes[i].column.as_str())
            .collect()
    }

    /// Version column name, if the entity is optimistically locked.
    #[must_use]
    pub fn version_column(&self) -> Option<&str> {
        self.version
            .map(|v| self.attributes[v.attribute].column.as_str())
    }

    #[must_use]
    pub const fn is_versioned(&self) -> bool {
        self.version.is_some()
    }

    /// Full persisted column list: every basic attribute, then every owning
    /// to-one join column. All entity projections use this order.
    #[must_use]
    pub fn select_columns(&self) -> &[EntityColumn] {
        &self.columns
    }

    /// Position of an attribute's column within `select_columns`.
    #[must_use]
    pub fn column_position(&self, attribute: usize) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.role == ColumnRole::Attribute(attribute))
    }

    /// Owning to-one relations with inline foreign keys, with their indices.
    pub fn inline_foreign_keys(&self) -> impl Iterator<Item = (usize, &RelationDescriptor)> {
        self.relations
            .iter()
            .enumerate()
            .filter(|(_, r)| r.is_to_one() && r.has_inline_foreign_key())
    }

    /// Relations backed by a join table this entity owns.
    pub fn owned_join_tables(&self) -> impl Iterator<Item = (usize, &RelationDescriptor)> {
        self.relations
            .iter()
            .enumerate()
            .filter(|(_, r)| r.join_table().is_some())
    }

    pub(crate) fn compute_columns(
        attributes: &[AttributeDescriptor],
        relations: &[RelationDescriptor],
    ) -> Vec<EntityColumn> {
        let mut columns: Vec<EntityColumn> = attributes
            .iter()
            .enumerate()
            .map(|(i, a)| EntityColumn {
                column: a.column.clone(),
                role: ColumnRole::Attribute(i),
            })
            .collect();

        for (ri, relation) in relations.iter().enumerate() {
            if !relation.is_to_one() {
                continue;
            }
            if let Some(join_columns) = relation.join_columns() {
                for (position, jc) in join_columns.iter().enumerate() {
                    columns.push(EntityColumn {
                        column: jc.name.clone(),
                        role: ColumnRole::JoinColumn {
                            relation: ri,
                            position,
                        },
                    });
                }
            }
        }

        columns
    }
}
