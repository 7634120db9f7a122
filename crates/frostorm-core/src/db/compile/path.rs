use super::{scope::SelectAccumulator, Compilation};
use crate::{
    db::{
        jpql::ast::PathExpression,
        sql::{Expr, FromItem, FromJoin, FromTable, JoinKind, Select, TableColumn},
        statement::{key_position, relationship_join},
    },
    error::{InternalError, SemanticError},
    model::{EntityDescriptor, EntityId, RelationId},
};

///
/// Placement
///
/// Where a table reached by navigation lives relative to the select being
/// compiled.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(super) enum Placement {
    /// A FROM item of the current level.
    Item(usize),
    /// A table of an enclosing select (correlated reference).
    Outer,
}

///
/// PathTarget
///

#[derive(Clone, Debug)]
pub(super) enum PathTarget {
    Entity {
        entity: EntityId,
        table: FromTable,
        placement: Placement,
    },
    Attribute {
        entity: EntityId,
        attribute: usize,
        column: TableColumn,
    },
    /// The path ends on a relationship; `table` belongs to the declaring
    /// entity.
    Relation {
        table: FromTable,
        relation: RelationId,
        placement: Placement,
    },
}

impl Compilation<'_> {
    /// Resolve `alias.seg1...segN`. Intermediate segments must be to-one
    /// relationships (or an embedded object followed by its attribute); each
    /// hop adds an inner join, shared by every path with the same prefix.
    pub(super) fn resolve_path(&mut self, path: &PathExpression) -> Result<PathTarget, InternalError> {
        let registry = self.registry;
        let path = self.rooted(path);
        let (level, binding) =
            self.scope
                .lookup(&path.root)
                .ok_or_else(|| SemanticError::UnknownAlias {
                    alias: path.root.clone(),
                })?;

        let mut entity = registry.entity(binding.entity);
        let mut table = binding.table;
        let mut placement = if level + 1 == self.scope.depth() {
            Placement::Item(binding.from_item)
        } else {
            Placement::Outer
        };

        let segments = &path.segments;
        let mut i = 0;
        while i < segments.len() {
            let segment = segments[i].as_str();
            let last = i + 1 == segments.len();

            if entity.embedded_index(segment).is_some() {
                let Some(sub) = segments.get(i + 1) else {
                    return Err(SemanticError::InvalidExpression {
                        message: format!(
                            "embedded '{segment}' of {} must be navigated to one of its attributes",
                            entity.name
                        ),
                    }
                    .into());
                };
                let name = format!("{segment}.{sub}");
                return self.attribute_target(entity, &table, &name, i + 2 < segments.len());
            }

            if entity.attribute_index(segment).is_some() {
                return self.attribute_target(entity, &table, segment, !last);
            }

            let Some(index) = entity.relation_index(segment) else {
                return Err(SemanticError::UnknownAttribute {
                    entity: entity.name.clone(),
                    path: segment.to_string(),
                }
                .into());
            };
            let relation = entity.relation_id(index);
            if last {
                return Ok(PathTarget::Relation {
                    table,
                    relation,
                    placement,
                });
            }
            if entity.relations[index].is_to_many() {
                return Err(SemanticError::CollectionPathNotAllowed {
                    path: path.to_string(),
                }
                .into());
            }

            let (next, next_placement) = self.hop(&table, placement, relation)?;
            entity = registry.entity(entity.relations[index].target);
            table = next;
            placement = next_placement;
            i += 1;
        }

        Ok(PathTarget::Entity {
            entity: entity.id,
            table,
            placement,
        })
    }

    fn attribute_target(
        &self,
        entity: &EntityDescriptor,
        table: &FromTable,
        name: &str,
        trailing: bool,
    ) -> Result<PathTarget, InternalError> {
        let Some(attribute) = entity.attribute_index(name) else {
            return Err(SemanticError::UnknownAttribute {
                entity: entity.name.clone(),
                path: name.to_string(),
            }
            .into());
        };
        if trailing {
            return Err(SemanticError::NotARelationship {
                entity: entity.name.clone(),
                attribute: name.to_string(),
            }
            .into());
        }

        Ok(PathTarget::Attribute {
            entity: entity.id,
            attribute,
            column: table.column(&entity.attributes[attribute].column),
        })
    }

    // Bulk statements declared without an alias name attributes directly.
    fn rooted(&self, path: &PathExpression) -> PathExpression {
        match &self.scope.default_root {
            Some(default) if self.scope.lookup(&path.root).is_none() => {
                let mut segments = Vec::with_capacity(path.segments.len() + 1);
                segments.push(path.root.clone());
                segments.extend(path.segments.iter().cloned());
                PathExpression {
                    root: default.clone(),
                    segments,
                }
            }
            _ => path.clone(),
        }
    }

    /// Navigate one relationship with an inner join, reusing an earlier
    /// join of the same relation from the same table.
    pub(super) fn hop(
        &mut self,
        source: &FromTable,
        placement: Placement,
        relation: RelationId,
    ) -> Result<(FromTable, Placement), InternalError> {
        if self.scope.bulk && self.scope.depth() == 1 {
            return Err(SemanticError::InvalidExpression {
                message: "bulk UPDATE and DELETE cannot navigate relationships".to_string(),
            }
            .into());
        }

        let key = (source.alias.clone(), relation);
        if let Some((table, item)) = self.scope.current()?.acc.implicit.get(&key) {
            return Ok((table.clone(), Placement::Item(*item)));
        }

        let (joins, target) = relationship_join(
            self.registry,
            source,
            relation,
            JoinKind::Inner,
            &mut self.scope.aliases,
        )?;
        let acc = &mut self.scope.current()?.acc;
        let item = match placement {
            Placement::Item(item) => {
                acc.from
                    .get_mut(item)
                    .ok_or_else(|| InternalError::statement_invariant("join placed on a missing FROM item"))?
                    .joins
                    .extend(joins);
                item
            }
            Placement::Outer => attach_correlated(acc, joins)?,
        };
        acc.implicit.insert(key, (target.clone(), item));

        Ok((target, Placement::Item(item)))
    }

    /// Join an explicitly declared relationship (FROM-clause JOIN) onto the
    /// FROM item of its source table.
    pub(super) fn explicit_join(
        &mut self,
        source: &FromTable,
        placement: Placement,
        relation: RelationId,
        kind: JoinKind,
    ) -> Result<(FromTable, usize), InternalError> {
        let Placement::Item(item) = placement else {
            return Err(SemanticError::Unsupported {
                construct: "joins from an enclosing query's variable".to_string(),
            }
            .into());
        };
        let (joins, target) = relationship_join(
            self.registry,
            source,
            relation,
            kind,
            &mut self.scope.aliases,
        )?;
        self.scope
            .current()?
            .acc
            .from
            .get_mut(item)
            .ok_or_else(|| InternalError::statement_invariant("join placed on a missing FROM item"))?
            .joins
            .extend(joins);

        Ok((target, item))
    }

    /// Correlated sub-select over one relationship of `source`: the first
    /// hop becomes the sub-select's FROM and its join condition the WHERE.
    /// Returns the select (no columns yet) and the target entity's table.
    pub(super) fn relation_subselect(
        &mut self,
        source: &FromTable,
        relation: RelationId,
    ) -> Result<(Select, FromTable), InternalError> {
        let (joins, target) = relationship_join(
            self.registry,
            source,
            relation,
            JoinKind::Inner,
            &mut self.scope.aliases,
        )?;
        let mut joins = joins.into_iter();
        let first = joins
            .next()
            .ok_or_else(|| InternalError::statement_invariant("relationship join is empty"))?;
        let mut item = FromItem::new(first.table);
        item.joins.extend(joins);

        let select = Select {
            from: vec![item],
            filter: Some(first.on),
            ..Select::default()
        };

        Ok((select, target))
    }

    /// Key columns of an entity read through `table`, in key order.
    pub(super) fn key_columns(&self, entity: EntityId, table: &FromTable) -> Vec<Expr> {
        self.registry
            .entity(entity)
            .key_columns()
            .into_iter()
            .map(|column| Expr::Column(table.column(column)))
            .collect()
    }

    /// Inline foreign-key columns of an owning to-one relation, ordered by
    /// the target's key. `None` when the relation has no inline key.
    pub(super) fn foreign_key_columns(
        &self,
        relation: RelationId,
        table: &FromTable,
    ) -> Result<Option<Vec<Expr>>, InternalError> {
        let descriptor = self.registry.relation(relation);
        let Some(join_columns) = descriptor.join_columns() else {
            return Ok(None);
        };
        let target = self.registry.entity(descriptor.target);

        let mut positioned = join_columns
            .iter()
            .map(|jc| Ok((key_position(target, &jc.referenced)?, table.column(&jc.name))))
            .collect::<Result<Vec<_>, InternalError>>()?;
        positioned.sort_by_key(|(position, _)| *position);

        Ok(Some(
            positioned
                .into_iter()
                .map(|(_, column)| Expr::Column(column))
                .collect(),
        ))
    }
}

// First join becomes a new FROM item; its condition moves to WHERE.
fn attach_correlated(acc: &mut SelectAccumulator, joins: Vec<FromJoin>) -> Result<usize, InternalError> {
    let mut joins = joins.into_iter();
    let first = joins
        .next()
        .ok_or_else(|| InternalError::statement_invariant("relationship join is empty"))?;
    let mut item = FromItem::new(first.table);
    item.joins.extend(joins);
    acc.from.push(item);
    acc.correlation.push(first.on);

    Ok(acc.from.len() - 1)
}
