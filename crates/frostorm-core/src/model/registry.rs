use crate::{
    error::{ErrorOrigin, InternalError},
    model::{
        Cardinality, EntityBuilder, EntityDescriptor, EntityId, JoinColumn, JoinTable,
        KeyGeneration, PrimaryKeyDescriptor, RelationDescriptor, RelationId, RelationMapping,
        VersionDescriptor,
        builder::{MappingSpec, RelationBuilder, physical_name},
    },
    value::ValueKind,
};
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Arc, Mutex, OnceLock},
};

///
/// DescriptorRegistry
///
/// The validated, immutable descriptor set for one persistence unit.
/// Relationship targets are resolved to `EntityId`s and inverse links are
/// precomputed, so nothing downstream resolves names at runtime except the
/// query compiler's entity lookup.
///

#[derive(Debug)]
pub struct DescriptorRegistry {
    entities: Vec<EntityDescriptor>,
    by_name: BTreeMap<String, EntityId>,
}

impl DescriptorRegistry {
    #[must_use]
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Descriptor for an id minted by this registry.
    #[must_use]
    pub fn entity(&self, id: EntityId) -> &EntityDescriptor {
        &self.entities[id.0]
    }

    #[must_use]
    pub fn entity_by_name(&self, name: &str) -> Option<&EntityDescriptor> {
        self.by_name.get(name).map(|id| self.entity(*id))
    }

    #[must_use]
    pub fn relation(&self, id: RelationId) -> &RelationDescriptor {
        &self.entity(id.entity).relations[id.index]
    }

    /// The opposite side of a bidirectional relation.
    #[must_use]
    pub fn inverse_of(&self, id: RelationId) -> Option<RelationId> {
        let relation = self.relation(id);
        relation.inverse.map(|index| RelationId {
            entity: relation.target,
            index,
        })
    }

    /// The relation that owns the mapping for `id` (itself when owning).
    #[must_use]
    pub fn owning_side(&self, id: RelationId) -> RelationId {
        if self.relation(id).is_owner() {
            return id;
        }
        self.inverse_of(id).unwrap_or(id)
    }

    pub fn entities(&self) -> impl Iterator<Item = &EntityDescriptor> {
        self.entities.iter()
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.entities.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

///
/// RegistryBuilder
///

#[derive(Debug, Default)]
pub struct RegistryBuilder {
    entities: Vec<EntityBuilder>,
}

impl RegistryBuilder {
    #[must_use]
    pub fn entity(mut self, entity: EntityBuilder) -> Self {
        self.entities.push(entity);
        self
    }

    /// Validate every declaration and produce the immutable registry.
    pub fn build(self) -> Result<DescriptorRegistry, InternalError> {
        let mut by_name = BTreeMap::new();
        for (i, entity) in self.entities.iter().enumerate() {
            if by_name.insert(entity.name.clone(), EntityId(i)).is_some() {
                return Err(InternalError::model_invalid(format!(
                    "entity '{}' is declared more than once",
                    entity.name
                )));
            }
        }

        // pass 1: everything local to one entity
        let mut entities = self
            .entities
            .iter()
            .enumerate()
            .map(|(i, builder)| build_local(EntityId(i), builder))
            .collect::<Result<Vec<_>, _>>()?;

        // pass 2: relations need the target's key columns
        let mut relations = Vec::with_capacity(entities.len());
        for (entity, builder) in entities.iter().zip(&self.entities) {
            let resolved = builder
                .relations
                .iter()
                .map(|r| resolve_relation(entity, r, &entities, &by_name))
                .collect::<Result<Vec<_>, _>>()?;
            relations.push(resolved);
        }
        for (entity, resolved) in entities.iter_mut().zip(relations) {
            entity.relations = resolved;
        }

        link_inverses(&mut entities)?;

        for entity in &mut entities {
            entity.columns = EntityDescriptor::compute_columns(&entity.attributes, &entity.relations);
            check_unique_columns(entity)?;
        }

        Ok(DescriptorRegistry { entities, by_name })
    }
}

fn build_local(id: EntityId, builder: &EntityBuilder) -> Result<EntityDescriptor, InternalError> {
    let name = &builder.name;
    let mut seen = BTreeSet::new();

    for attribute in &builder.attributes {
        if !seen.insert(attribute.name.as_str()) {
            return Err(InternalError::model_invalid(format!(
                "{name}: attribute '{}' is declared more than once",
                attribute.name
            )));
        }
    }
    for embedded in &builder.embedded {
        if !seen.insert(embedded.name.as_str()) {
            return Err(InternalError::model_invalid(format!(
                "{name}: embedded '{}' clashes with another attribute",
                embedded.name
            )));
        }
    }
    for relation in &builder.relations {
        if !seen.insert(relation.name.as_str()) {
            return Err(InternalError::model_invalid(format!(
                "{name}: relation '{}' clashes with another attribute",
                relation.name
            )));
        }
    }

    if builder.key.is_empty() {
        return Err(InternalError::model_invalid(format!(
            "{name}: no primary key declared"
        )));
    }
    let key_attributes = builder
        .key
        .iter()
        .map(|k| {
            builder
                .attributes
                .iter()
                .position(|a| &a.name == k)
                .ok_or_else(|| {
                    InternalError::model_invalid(format!("{name}: unknown key attribute '{k}'"))
                })
        })
        .collect::<Result<Vec<_>, _>>()?;

    check_generation(name, builder, &key_attributes)?;

    let version = builder
        .version
        .as_ref()
        .map(|(attr, policy)| {
            builder
                .attributes
                .iter()
                .position(|a| &a.name == attr)
                .map(|attribute| VersionDescriptor {
                    attribute,
                    policy: *policy,
                })
                .ok_or_else(|| {
                    InternalError::model_invalid(format!(
                        "{name}: unknown version attribute '{attr}'"
                    ))
                })
        })
        .transpose()?;

    Ok(EntityDescriptor {
        id,
        name: name.clone(),
        table: builder
            .table
            .clone()
            .unwrap_or_else(|| physical_name(name)),
        attributes: builder.attributes.clone(),
        embedded: builder.embedded.clone(),
        relations: Vec::new(),
        primary_key: PrimaryKeyDescriptor {
            attributes: key_attributes,
            generation: builder.generation.clone(),
        },
        version,
        columns: Vec::new(),
    })
}

fn check_generation(
    name: &str,
    builder: &EntityBuilder,
    key_attributes: &[usize],
) -> Result<(), InternalError> {
    let expected = match builder.generation {
        KeyGeneration::Assigned => return Ok(()),
        KeyGeneration::Identity | KeyGeneration::Sequence(_) => ValueKind::Int,
        KeyGeneration::Ulid => ValueKind::Ulid,
    };

    match key_attributes {
        [single] if builder.attributes[*single].kind == expected => Ok(()),
        [_] => Err(InternalError::model_unsupported(format!(
            "{name}: {:?} key generation requires a {expected} key",
            builder.generation
        ))),
        _ => Err(InternalError::model_unsupported(format!(
            "{name}: generated keys cannot be composite"
        ))),
    }
}

fn resolve_relation(
    owner: &EntityDescriptor,
    relation: &RelationBuilder,
    entities: &[EntityDescriptor],
    by_name: &BTreeMap<String, EntityId>,
) -> Result<RelationDescriptor, InternalError> {
    let context = format!("{}.{}", owner.name, relation.name);
    let target_id = *by_name.get(&relation.target).ok_or_else(|| {
        InternalError::model_invalid(format!(
            "{context}: unknown target entity '{}'",
            relation.target
        ))
    })?;
    let target = &entities[target_id.0];
    let target_keys = target.key_columns();

    let mapping = match &relation.mapping {
        MappingSpec::DefaultJoinColumns | MappingSpec::JoinColumns(_)
            if relation.cardinality == Cardinality::ToMany =>
        {
            return Err(InternalError::model_unsupported(format!(
                "{context}: to-many relations need a join table or mappedBy"
            )));
        }
        MappingSpec::DefaultJoinColumns => RelationMapping::JoinColumns(
            target_keys
                .iter()
                .map(|k| JoinColumn::new(format!("{}_{k}", physical_name(&relation.name)), *k))
                .collect(),
        ),
        MappingSpec::JoinColumns(columns) => {
            check_join_columns(&context, columns, &target_keys)?;
            RelationMapping::JoinColumns(columns.clone())
        }
        MappingSpec::JoinTable {
            table,
            join_columns,
            inverse_join_columns,
        } => {
            let owner_keys = owner.key_columns();
            let join_columns = if join_columns.is_empty() {
                default_key_refs(&physical_name(&owner.name), &owner_keys)
            } else {
                check_join_columns(&context, join_columns, &owner_keys)?;
                join_columns.clone()
            };
            let inverse_join_columns = if inverse_join_columns.is_empty() {
                let mut cols = default_key_refs(&physical_name(&target.name), &target_keys);
                if cols.iter().any(|c| join_columns.iter().any(|j| j.name == c.name)) {
                    cols = default_key_refs(&physical_name(&relation.name), &target_keys);
                }
                cols
            } else {
                check_join_columns(&context, inverse_join_columns, &target_keys)?;
                inverse_join_columns.clone()
            };

            RelationMapping::JoinTable(JoinTable {
                table: table.clone().unwrap_or_else(|| {
                    format!("{}_{}", owner.table, physical_name(&relation.name))
                }),
                join_columns,
                inverse_join_columns,
            })
        }
        MappingSpec::MappedBy(name) => RelationMapping::MappedBy(name.clone()),
    };

    Ok(RelationDescriptor {
        name: relation.name.clone(),
        target: target_id,
        cardinality: relation.cardinality,
        fetch: relation.resolved_fetch(),
        cascade: relation.cascade,
        mapping,
        inverse: None,
    })
}

fn default_key_refs(prefix: &str, keys: &[&str]) -> Vec<JoinColumn> {
    keys.iter()
        .map(|k| JoinColumn::new(format!("{prefix}_{k}"), *k))
        .collect()
}

fn check_join_columns(
    context: &str,
    columns: &[JoinColumn],
    keys: &[&str],
) -> Result<(), InternalError> {
    if columns.len() != keys.len() {
        return Err(InternalError::model_invalid(format!(
            "{context}: {} join column(s) declared for a {}-column key",
            columns.len(),
            keys.len()
        )));
    }
    if let Some(bad) = columns.iter().find(|c| !keys.contains(&c.referenced.as_str())) {
        return Err(InternalError::model_invalid(format!(
            "{context}: join column '{}' references non-key column '{}'",
            bad.name, bad.referenced
        )));
    }

    Ok(())
}

fn link_inverses(entities: &mut [EntityDescriptor]) -> Result<(), InternalError> {
    let mut links = Vec::new();

    for entity in entities.iter() {
        for (index, relation) in entity.relations.iter().enumerate() {
            let Some(mapped_by) = relation.mapped_by() else {
                continue;
            };
            let context = format!("{}.{}", entity.name, relation.name);
            let target = &entities[relation.target.0];
            let owner_index = target.relation_index(mapped_by).ok_or_else(|| {
                InternalError::model_invalid(format!(
                    "{context}: mappedBy '{mapped_by}' is not a relation of {}",
                    target.name
                ))
            })?;
            let owner = &target.relations[owner_index];

            if !owner.is_owner() || owner.target != entity.id {
                return Err(InternalError::model_invalid(format!(
                    "{context}: mappedBy '{}.{mapped_by}' must be an owning relation targeting {}",
                    target.name, entity.name
                )));
            }
            if relation.is_to_one() && !owner.is_to_one() {
                return Err(InternalError::model_invalid(format!(
                    "{context}: to-one inverse must be mapped by a to-one owner"
                )));
            }
            if relation.is_to_many() && owner.is_to_many() && owner.join_table().is_none() {
                return Err(InternalError::model_invalid(format!(
                    "{context}: to-many inverse of a to-many owner requires a join table"
                )));
            }

            links.push((entity.id, index, relation.target, owner_index));
        }
    }

    for (inverse_entity, inverse_index, owner_entity, owner_index) in links {
        entities[inverse_entity.0].relations[inverse_index].inverse = Some(owner_index);
        entities[owner_entity.0].relations[owner_index].inverse = Some(inverse_index);
    }

    Ok(())
}

fn check_unique_columns(entity: &EntityDescriptor) -> Result<(), InternalError> {
    let mut seen = BTreeSet::new();
    for column in &entity.columns {
        if !seen.insert(column.column.as_str()) {
            return Err(InternalError::model_invalid(format!(
                "{}: column '{}' is mapped more than once in table '{}'",
                entity.name, column.column, entity.table
            )));
        }
    }

    Ok(())
}

///
/// SharedRegistry
///
/// One-time initialization cell for a registry shared across units of work.
/// Construction is serialized by a lock; reads after initialization are
/// lock-free.
///

#[derive(Debug, Default)]
pub struct SharedRegistry {
    cell: OnceLock<Arc<DescriptorRegistry>>,
    init: Mutex<()>,
}

impl SharedRegistry {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            cell: OnceLock::new(),
            init: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn get(&self) -> Option<Arc<DescriptorRegistry>> {
        self.cell.get().cloned()
    }

    /// Return the registry, building it with `build` on first use.
    /// A failed build leaves the cell empty so a later call can retry.
    pub fn get_or_try_init(
        &self,
        build: impl FnOnce() -> Result<DescriptorRegistry, InternalError>,
    ) -> Result<Arc<DescriptorRegistry>, InternalError> {
        if let Some(registry) = self.cell.get() {
            return Ok(Arc::clone(registry));
        }

        let _guard = self
            .init
            .lock()
            .map_err(|_| InternalError::lock_poisoned(ErrorOrigin::Model, "registry init"))?;
        if let Some(registry) = self.cell.get() {
            return Ok(Arc::clone(registry));
        }

        let registry = Arc::new(build()?);
        let _ = self.cell.set(Arc::clone(&registry));

        Ok(registry)
    }
}
