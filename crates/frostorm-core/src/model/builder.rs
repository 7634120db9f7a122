use crate::{
    model::{
        AttributeDescriptor, Cardinality, Cascade, EmbeddedDescriptor, FetchType, JoinColumn,
        KeyGeneration, VersionPolicy,
    },
    value::ValueKind,
};
use convert_case::{Case, Casing};

/// Default physical name for a logical entity or attribute name.
pub(crate) fn physical_name(name: &str) -> String {
    name.replace('.', "_").to_case(Case::Snake)
}

///
/// EntityBuilder
///
/// Fluent, unvalidated entity declaration. Nothing is checked until the
/// registry is built; table and column names default to snake_case.
///

#[derive(Clone, Debug)]
pub struct EntityBuilder {
    pub(crate) name: String,
    pub(crate) table: Option<String>,
    pub(crate) attributes: Vec<AttributeDescriptor>,
    pub(crate) embedded: Vec<EmbeddedDescriptor>,
    pub(crate) relations: Vec<RelationBuilder>,
    pub(crate) key: Vec<String>,
    pub(crate) generation: KeyGeneration,
    pub(crate) version: Option<(String, VersionPolicy)>,
}

impl EntityBuilder {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: None,
            attributes: Vec::new(),
            embedded: Vec::new(),
            relations: Vec::new(),
            key: Vec::new(),
            generation: KeyGeneration::Assigned,
            version: None,
        }
    }

    #[must_use]
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    /// Declare a primary-key attribute. Call repeatedly for composite keys.
    #[must_use]
    pub fn id(mut self, name: impl Into<String>, kind: ValueKind) -> Self {
        let name = name.into();
        self.key.push(name.clone());
        self.push_attribute(name, None, kind, false)
    }

    #[must_use]
    pub fn generated(mut self, generation: KeyGeneration) -> Self {
        self.generation = generation;
        self
    }

    /// Declare a non-nullable basic attribute.
    #[must_use]
    pub fn attribute(self, name: impl Into<String>, kind: ValueKind) -> Self {
        self.push_attribute(name.into(), None, kind, false)
    }

    /// Declare a nullable basic attribute.
    #[must_use]
    pub fn optional(self, name: impl Into<String>, kind: ValueKind) -> Self {
        self.push_attribute(name.into(), None, kind, true)
    }

    /// Declare a basic attribute with an explicit column name.
    #[must_use]
    pub fn attribute_column(
        self,
        name: impl Into<String>,
        column: impl Into<String>,
        kind: ValueKind,
        nullable: bool,
    ) -> Self {
        self.push_attribute(name.into(), Some(column.into()), kind, nullable)
    }

    /// Declare an optimistic-lock version attribute advanced by increment.
    #[must_use]
    pub fn version(self, name: impl Into<String>) -> Self {
        self.version_with(name, VersionPolicy::Increment)
    }

    #[must_use]
    pub fn version_with(mut self, name: impl Into<String>, policy: VersionPolicy) -> Self {
        let name = name.into();
        let kind = match policy {
            VersionPolicy::Increment => ValueKind::Int,
            VersionPolicy::Timestamp => ValueKind::Timestamp,
        };
        self.version = Some((name.clone(), policy));
        self.push_attribute(name, None, kind, false)
    }

    /// Declare an embedded value whose sub-attributes are stored inline.
    #[must_use]
    pub fn embedded(
        mut self,
        name: impl Into<String>,
        build: impl FnOnce(EmbeddedBuilder) -> EmbeddedBuilder,
    ) -> Self {
        let name = name.into();
        let embedded = build(EmbeddedBuilder::default());
        let index = self.embedded.len();
        let mut attributes = Vec::with_capacity(embedded.fields.len());

        for (sub, kind, nullable) in embedded.fields {
            attributes.push(self.attributes.len());
            let full = format!("{name}.{sub}");
            self.attributes.push(AttributeDescriptor {
                column: physical_name(&full),
                name: full,
                kind,
                nullable,
                embedded: Some(index),
            });
        }
        self.embedded.push(EmbeddedDescriptor { name, attributes });
        self
    }

    #[must_use]
    pub fn relation(mut self, relation: RelationBuilder) -> Self {
        self.relations.push(relation);
        self
    }

    /// Owning to-one with a default foreign-key column.
    #[must_use]
    pub fn many_to_one(self, name: impl Into<String>, target: impl Into<String>) -> Self {
        self.relation(RelationBuilder::to_one(name, target))
    }

    /// Inverse to-many mapped by a to-one on the target.
    #[must_use]
    pub fn one_to_many(
        self,
        name: impl Into<String>,
        target: impl Into<String>,
        mapped_by: impl Into<String>,
    ) -> Self {
        self.relation(RelationBuilder::to_many(name, target).mapped_by(mapped_by))
    }

    /// Owning to-many with a default join table.
    #[must_use]
    pub fn many_to_many(self, name: impl Into<String>, target: impl Into<String>) -> Self {
        self.relation(RelationBuilder::to_many(name, target))
    }

    fn push_attribute(
        mut self,
        name: String,
        column: Option<String>,
        kind: ValueKind,
        nullable: bool,
    ) -> Self {
        let column = column.unwrap_or_else(|| physical_name(&name));
        self.attributes.push(AttributeDescriptor {
            name,
            column,
            kind,
            nullable,
            embedded: None,
        });
        self
    }
}

///
/// EmbeddedBuilder
///

#[derive(Clone, Debug, Default)]
pub struct EmbeddedBuilder {
    fields: Vec<(String, ValueKind, bool)>,
}

impl EmbeddedBuilder {
    #[must_use]
    pub fn attribute(mut self, name: impl Into<String>, kind: ValueKind) -> Self {
        self.fields.push((name.into(), kind, false));
        self
    }

    #[must_use]
    pub fn optional(mut self, name: impl Into<String>, kind: ValueKind) -> Self {
        self.fields.push((name.into(), kind, true));
        self
    }
}

///
/// MappingSpec
/// Relation mapping before defaults are resolved against the target key.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum MappingSpec {
    DefaultJoinColumns,
    JoinColumns(Vec<JoinColumn>),
    JoinTable {
        table: Option<String>,
        join_columns: Vec<JoinColumn>,
        inverse_join_columns: Vec<JoinColumn>,
    },
    MappedBy(String),
}

///
/// RelationBuilder
///

#[derive(Clone, Debug)]
pub struct RelationBuilder {
    pub(crate) name: String,
    pub(crate) target: String,
    pub(crate) cardinality: Cardinality,
    pub(crate) fetch: Option<FetchType>,
    pub(crate) cascade: Cascade,
    pub(crate) mapping: MappingSpec,
}

impl RelationBuilder {
    /// To-one relation; owning with a default join column unless remapped.
    #[must_use]
    pub fn to_one(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            cardinality: Cardinality::ToOne,
            fetch: None,
            cascade: Cascade::NONE,
            mapping: MappingSpec::DefaultJoinColumns,
        }
    }

    /// To-many relation; owning with a default join table unless remapped.
    #[must_use]
    pub fn to_many(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            cardinality: Cardinality::ToMany,
            fetch: None,
            cascade: Cascade::NONE,
            mapping: MappingSpec::JoinTable {
                table: None,
                join_columns: Vec::new(),
                inverse_join_columns: Vec::new(),
            },
        }
    }

    #[must_use]
    pub fn join_column(mut self, name: impl Into<String>, referenced: impl Into<String>) -> Self {
        let column = JoinColumn::new(name, referenced);
        match &mut self.mapping {
            MappingSpec::JoinColumns(cols) => cols.push(column),
            _ => self.mapping = MappingSpec::JoinColumns(vec![column]),
        }
        self
    }

    /// Map through a named association table with default key columns.
    #[must_use]
    pub fn join_table(mut self, table: impl Into<String>) -> Self {
        let table = Some(table.into());
        match &mut self.mapping {
            MappingSpec::JoinTable { table: t, .. } => *t = table,
            _ => {
                self.mapping = MappingSpec::JoinTable {
                    table,
                    join_columns: Vec::new(),
                    inverse_join_columns: Vec::new(),
                };
            }
        }
        self
    }

    /// Explicit association columns: owner-side then target-side.
    #[must_use]
    pub fn join_table_columns(
        mut self,
        join_columns: Vec<JoinColumn>,
        inverse_join_columns: Vec<JoinColumn>,
    ) -> Self {
        let table = match &self.mapping {
            MappingSpec::JoinTable { table, .. } => table.clone(),
            _ => None,
        };
        self.mapping = MappingSpec::JoinTable {
            table,
            join_columns,
            inverse_join_columns,
        };
        self
    }

    #[must_use]
    pub fn mapped_by(mut self, attribute: impl Into<String>) -> Self {
        self.mapping = MappingSpec::MappedBy(attribute.into());
        self
    }

    #[must_use]
    pub fn lazy(mut self) -> Self {
        self.fetch = Some(FetchType::Lazy);
        self
    }

    #[must_use]
    pub fn eager(mut self) -> Self {
        self.fetch = Some(FetchType::Eager);
        self
    }

    #[must_use]
    pub fn cascade(mut self, cascade: Cascade) -> Self {
        self.cascade = cascade;
        self
    }

    // To-one relations load eagerly by default, collections lazily.
    pub(crate) fn resolved_fetch(&self) -> FetchType {
        self.fetch.unwrap_or(match self.cardinality {
            Cardinality::ToOne => FetchType::Eager,
            Cardinality::ToMany => FetchType::Lazy,
        })
    }
}
