use crate::{
    db::sql::{
        AliasAllocator, Condition, Expr, FetchDescriptor, FetchKind, FromJoin, FromTable, JoinKind,
        TableColumn,
    },
    error::InternalError,
    model::{ColumnRole, DescriptorRegistry, EntityDescriptor, RelationId, RelationMapping},
};

/// Full column projection of an entity read through `table`, with one fetch
/// descriptor per column. Labels are `prefix.attribute` (or the bare
/// attribute name when `prefix` is empty).
#[must_use]
pub fn entity_projection(
    entity: &EntityDescriptor,
    table: &FromTable,
    prefix: &str,
) -> (Vec<Expr>, Vec<FetchDescriptor>) {
    let mut columns = Vec::with_capacity(entity.select_columns().len());
    let mut fetches = Vec::with_capacity(columns.capacity());

    for column in entity.select_columns() {
        columns.push(Expr::Column(table.column(&column.column)));

        let (kind, name) = match column.role {
            ColumnRole::Attribute(attribute) => (
                FetchKind::Attribute {
                    entity: entity.id,
                    attribute,
                },
                entity.attributes[attribute].name.clone(),
            ),
            ColumnRole::JoinColumn { relation, position } => (
                FetchKind::JoinColumn {
                    entity: entity.id,
                    relation,
                    position,
                },
                format!("{}.{}", entity.relations[relation].name, column.column),
            ),
        };
        let label = if prefix.is_empty() {
            name
        } else {
            format!("{prefix}.{name}")
        };
        fetches.push(FetchDescriptor::new(kind, label));
    }

    (columns, fetches)
}

/// Joins that navigate `relation` starting from `from`, which must be a
/// table of the relation's declaring entity. Returns the joins in order and
/// the target entity's table.
///
/// Join-table mappings need two hops (association table, then target);
/// inline foreign keys need one. Inverse sides are resolved through the
/// owning relation so both directions join on the same column pairs.
pub fn relationship_join(
    registry: &DescriptorRegistry,
    from: &FromTable,
    relation: RelationId,
    kind: JoinKind,
    aliases: &mut AliasAllocator,
) -> Result<(Vec<FromJoin>, FromTable), InternalError> {
    let descriptor = registry.relation(relation);
    let target = registry.entity(descriptor.target);

    match &descriptor.mapping {
        RelationMapping::JoinColumns(join_columns) => {
            let table = aliases.table(&target.table);
            let on = column_pairs(
                join_columns
                    .iter()
                    .map(|jc| (table.column(&jc.referenced), from.column(&jc.name))),
            )?;

            Ok((vec![FromJoin { kind, table: table.clone(), on }], table))
        }

        RelationMapping::JoinTable(jt) => {
            let link = aliases.table(&jt.table);
            let link_on = column_pairs(
                jt.join_columns
                    .iter()
                    .map(|jc| (link.column(&jc.name), from.column(&jc.referenced))),
            )?;
            let table = aliases.table(&target.table);
            let target_on = column_pairs(
                jt.inverse_join_columns
                    .iter()
                    .map(|jc| (table.column(&jc.referenced), link.column(&jc.name))),
            )?;

            Ok((
                vec![
                    FromJoin {
                        kind,
                        table: link,
                        on: link_on,
                    },
                    FromJoin {
                        kind,
                        table: table.clone(),
                        on: target_on,
                    },
                ],
                table,
            ))
        }

        RelationMapping::MappedBy(_) => {
            let owning = registry.owning_side(relation);
            if owning == relation {
                return Err(InternalError::statement_invariant(format!(
                    "inverse relation '{}' has no resolved owning side",
                    descriptor.name
                )));
            }
            let owner = registry.relation(owning);

            match &owner.mapping {
                RelationMapping::JoinColumns(join_columns) => {
                    let table = aliases.table(&target.table);
                    let on = column_pairs(
                        join_columns
                            .iter()
                            .map(|jc| (table.column(&jc.name), from.column(&jc.referenced))),
                    )?;

                    Ok((vec![FromJoin { kind, table: table.clone(), on }], table))
                }
                RelationMapping::JoinTable(jt) => {
                    let link = aliases.table(&jt.table);
                    let link_on = column_pairs(
                        jt.inverse_join_columns
                            .iter()
                            .map(|jc| (link.column(&jc.name), from.column(&jc.referenced))),
                    )?;
                    let table = aliases.table(&target.table);
                    let target_on = column_pairs(
                        jt.join_columns
                            .iter()
                            .map(|jc| (table.column(&jc.referenced), link.column(&jc.name))),
                    )?;

                    Ok((
                        vec![
                            FromJoin {
                                kind,
                                table: link,
                                on: link_on,
                            },
                            FromJoin {
                                kind,
                                table: table.clone(),
                                on: target_on,
                            },
                        ],
                        table,
                    ))
                }
                RelationMapping::MappedBy(_) => Err(InternalError::statement_invariant(format!(
                    "relation '{}' is mapped by another inverse side",
                    descriptor.name
                ))),
            }
        }
    }
}

/// Position of a referenced column within an entity's primary key.
pub(crate) fn key_position(entity: &EntityDescriptor, column: &str) -> Result<usize, InternalError> {
    entity
        .key_columns()
        .iter()
        .position(|k| *k == column)
        .ok_or_else(|| {
            InternalError::statement_invariant(format!(
                "column '{column}' is not a key column of {}",
                entity.name
            ))
        })
}

// AND of column equalities; mappings always carry at least one pair.
pub(super) fn column_pairs(
    pairs: impl Iterator<Item = (TableColumn, TableColumn)>,
) -> Result<Condition, InternalError> {
    let conditions = pairs
        .map(|(left, right)| Condition::eq(Expr::Column(left), Expr::Column(right)))
        .collect();

    Condition::conjoin(conditions)
        .ok_or_else(|| InternalError::statement_invariant("join mapping has no columns"))
}
