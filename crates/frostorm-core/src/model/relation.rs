use crate::model::EntityId;

///
/// Cardinality
///

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Cardinality {
    ToOne,
    ToMany,
}

///
/// FetchType
///

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum FetchType {
    Eager,
    Lazy,
}

///
/// Cascade
/// Operations propagated from an instance to the instances it references.
///

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Cascade {
    pub persist: bool,
    pub remove: bool,
}

impl Cascade {
    pub const NONE: Self = Self {
        persist: false,
        remove: false,
    };
    pub const PERSIST: Self = Self {
        persist: true,
        remove: false,
    };
    pub const ALL: Self = Self {
        persist: true,
        remove: true,
    };
}

///
/// JoinColumn
/// A foreign-key column and the primary-key column it references.
///

#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct JoinColumn {
    pub name: String,
    pub referenced: String,
}

impl JoinColumn {
    #[must_use]
    pub fn new(name: impl Into<String>, referenced: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            referenced: referenced.into(),
        }
    }
}

///
/// JoinTable
///
/// Association table. `join_columns` reference the owning side's key,
/// `inverse_join_columns` the target side's key.
///

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct JoinTable {
    pub table: String,
    pub join_columns: Vec<JoinColumn>,
    pub inverse_join_columns: Vec<JoinColumn>,
}

///
/// RelationMapping
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RelationMapping {
    /// Foreign-key columns on the owning entity's table.
    JoinColumns(Vec<JoinColumn>),
    /// Separate association table.
    JoinTable(JoinTable),
    /// Inverse side; the named relation on the target owns the mapping.
    MappedBy(String),
}

///
/// RelationDescriptor
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RelationDescriptor {
    pub name: String,
    pub target: EntityId,
    pub cardinality: Cardinality,
    pub fetch: FetchType,
    pub cascade: Cascade,
    pub mapping: RelationMapping,
    /// Index of the opposite relation on the target entity, if bidirectional.
    pub inverse: Option<usize>,
}

impl RelationDescriptor {
    #[must_use]
    pub const fn is_owner(&self) -> bool {
        !matches!(self.mapping, RelationMapping::MappedBy(_))
    }

    #[must_use]
    pub const fn is_to_one(&self) -> bool {
        matches!(self.cardinality, Cardinality::ToOne)
    }

    #[must_use]
    pub const fn is_to_many(&self) -> bool {
        matches!(self.cardinality, Cardinality::ToMany)
    }

    #[must_use]
    pub const fn is_eager(&self) -> bool {
        matches!(self.fetch, FetchType::Eager)
    }

    #[must_use]
    pub fn join_columns(&self) -> Option<&[JoinColumn]> {
        match &self.mapping {
            RelationMapping::JoinColumns(cols) => Some(cols),
            _ => None,
        }
    }

    #[must_use]
    pub const fn join_table(&self) -> Option<&JoinTable> {
        match &self.mapping {
            RelationMapping::JoinTable(jt) => Some(jt),
            _ => None,
        }
    }

    #[must_use]
    pub fn mapped_by(&self) -> Option<&str> {
        match &self.mapping {
            RelationMapping::MappedBy(name) => Some(name),
            _ => None,
        }
    }

    /// True for an owning to-one relation with inline foreign-key columns.
    #[must_use]
    pub const fn has_inline_foreign_key(&self) -> bool {
        matches!(self.mapping, RelationMapping::JoinColumns(_))
    }
}
