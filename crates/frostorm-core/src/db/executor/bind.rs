//! Parameter values for factory statements, resolved from instances and
//! their load state.

use crate::{
    db::{
        context::{EntityStatus, InstanceId, PersistenceContext, RelationSlot},
        statement::{BindSource, FactoryStatement, key_position},
    },
    error::InternalError,
    model::ColumnRole,
    value::Value,
};

///
/// BindInputs
///
/// Values that do not live on the instance itself. Missing inputs for a
/// source the statement needs are invariant violations.
///

#[derive(Clone, Copy, Debug, Default)]
pub(super) struct BindInputs<'a> {
    pub(super) instance: Option<InstanceId>,
    pub(super) key: Option<&'a [Value]>,
    pub(super) prior_version: Option<&'a Value>,
    pub(super) next_version: Option<&'a Value>,
    pub(super) owner: Option<&'a [Value]>,
    pub(super) target: Option<&'a [Value]>,
}

impl<'a> BindInputs<'a> {
    pub(super) const fn key(key: &'a [Value]) -> Self {
        Self {
            instance: None,
            key: Some(key),
            prior_version: None,
            next_version: None,
            owner: None,
            target: None,
        }
    }
}

/// Slot values for `statement`, in slot order.
pub(super) fn resolve(
    context: &PersistenceContext,
    statement: &FactoryStatement,
    inputs: &BindInputs<'_>,
) -> Result<Vec<Value>, InternalError> {
    statement
        .binds
        .iter()
        .map(|source| resolve_one(context, *source, inputs))
        .collect()
}

fn resolve_one(
    context: &PersistenceContext,
    source: BindSource,
    inputs: &BindInputs<'_>,
) -> Result<Value, InternalError> {
    let missing = |what: &str| InternalError::writer_invariant(format!("no {what} to bind"));

    match source {
        BindSource::Column(ColumnRole::Attribute(attribute)) => {
            let id = inputs.instance.ok_or_else(|| missing("instance"))?;
            context
                .instance(id)?
                .value(attribute)
                .cloned()
                .ok_or_else(|| missing("attribute value"))
        }
        BindSource::Column(ColumnRole::JoinColumn { relation, position }) => {
            let id = inputs.instance.ok_or_else(|| missing("instance"))?;
            let values = foreign_key(context, id, relation)?.unwrap_or_default();
            Ok(values.get(position).cloned().unwrap_or(Value::Null))
        }
        BindSource::Key(i) => nth(inputs.key, i).ok_or_else(|| missing("key value")),
        BindSource::Owner(i) => nth(inputs.owner, i).ok_or_else(|| missing("owner key")),
        BindSource::Target(i) => nth(inputs.target, i).ok_or_else(|| missing("target key")),
        BindSource::PriorVersion => inputs
            .prior_version
            .cloned()
            .ok_or_else(|| missing("prior version")),
        BindSource::NextVersion => inputs
            .next_version
            .cloned()
            .ok_or_else(|| missing("next version")),
    }
}

fn nth(values: Option<&[Value]>, i: usize) -> Option<Value> {
    values.and_then(|v| v.get(i)).cloned()
}

/// Foreign-key values of an owning inline to-one relation, in join-column
/// order. `None` means the referenced instance has no key yet.
pub(super) fn foreign_key(
    context: &PersistenceContext,
    owner: InstanceId,
    relation: usize,
) -> Result<Option<Vec<Value>>, InternalError> {
    let entity = context.descriptor(owner)?;
    let descriptor = entity.relations.get(relation).ok_or_else(|| {
        InternalError::writer_invariant(format!("{} has no relation #{relation}", entity.name))
    })?;
    let join_columns = descriptor.join_columns().ok_or_else(|| {
        InternalError::writer_invariant(format!(
            "{}.{} has no inline foreign key",
            entity.name, descriptor.name
        ))
    })?;
    let nulls = || vec![Value::Null; join_columns.len()];

    match context.instance(owner)?.relation(relation) {
        None => Err(InternalError::writer_invariant(format!(
            "{owner} has no slot for relation #{relation}"
        ))),
        Some(RelationSlot::Unloaded) => Ok(Some(
            context
                .load_state(owner)
                .and_then(|state| state.foreign_key(relation))
                .map_or_else(nulls, <[Value]>::to_vec),
        )),
        Some(RelationSlot::One(None)) => Ok(Some(nulls())),
        Some(RelationSlot::One(Some(target))) => {
            let status = context.status(*target)?;
            if matches!(status, EntityStatus::New | EntityStatus::Removed) {
                return Err(InternalError::not_managed(format!(
                    "{}.{} references {target}, which is {status}",
                    entity.name, descriptor.name
                )));
            }
            let key = context.key_of(*target)?;
            if !key.is_complete() {
                return Ok(None);
            }
            let target_entity = context.descriptor(*target)?;
            join_columns
                .iter()
                .map(|jc| {
                    let position = key_position(target_entity, &jc.referenced)?;
                    Ok(key.values().get(position).cloned().unwrap_or(Value::Null))
                })
                .collect::<Result<Vec<_>, InternalError>>()
                .map(Some)
        }
        Some(RelationSlot::Many(_)) => Err(InternalError::writer_invariant(format!(
            "{}.{} holds a collection but maps a foreign key",
            entity.name, descriptor.name
        ))),
    }
}
