use super::{
    path::{PathTarget, Placement},
    scope::AliasBinding,
    CompiledQuery, Compilation, FetchJoin, FetchParent, QueryKind, ResultItem,
};
use crate::{
    db::{
        jpql::ast::{
            Expression, FromDeclaration, JoinDeclaration, JoinType, OrderItem, PathExpression,
            SelectItem, SelectStatement,
        },
        sql::{
            Condition, Expr, FetchDescriptor, FetchKind, FromItem, FromTable, JoinKind, LockMode,
            OrderBy, Select, Statement,
        },
        statement::entity_projection,
    },
    error::{InternalError, SemanticError},
    model::{EntityId, RelationId},
};

///
/// PendingFetch
/// A `JOIN FETCH` whose projection is added once the select items are known.
///

struct PendingFetch {
    owner: String,
    alias: Option<String>,
    relation: RelationId,
    entity: EntityId,
    table: FromTable,
}

impl Compilation<'_> {
    pub(super) fn compile_select(
        mut self,
        select: &SelectStatement,
    ) -> Result<CompiledQuery, InternalError> {
        self.scope.push_level();
        let pending = self.declare_from(&select.from)?;
        let items = self.compile_items(&select.items, false)?;
        let fetch_joins = self.project_fetch_joins(&select.items, pending)?;
        let (statement, fetches) = self.finish_select(select)?;

        Ok(CompiledQuery {
            kind: QueryKind::Select,
            statement: Statement::Select(statement),
            fetches,
            params: self.scope.take_params(),
            items,
            fetch_joins,
        })
    }

    /// Compile a nested select; it sees every enclosing identification
    /// variable. Entity items project their key columns only.
    pub(super) fn compile_subquery(&mut self, select: &SelectStatement) -> Result<Select, InternalError> {
        self.scope.push_level();
        let pending = self.declare_from(&select.from)?;
        if !pending.is_empty() {
            return Err(SemanticError::Unsupported {
                construct: "fetch joins in a sub-query".to_string(),
            }
            .into());
        }
        self.compile_items(&select.items, true)?;
        let (statement, _) = self.finish_select(select)?;

        Ok(statement)
    }

    // ---------------------------------------------------------------------
    // FROM
    // ---------------------------------------------------------------------

    fn declare_from(&mut self, from: &[FromDeclaration]) -> Result<Vec<PendingFetch>, InternalError> {
        let mut pending = Vec::new();

        for declaration in from {
            match declaration {
                FromDeclaration::Range(range) => {
                    let entity = self.registry.entity_by_name(&range.entity).ok_or_else(|| {
                        SemanticError::UnknownEntity {
                            name: range.entity.clone(),
                        }
                    })?;
                    let table = self.scope.aliases.table(&entity.table);
                    let from_item = self.scope.current()?.acc.from.len();
                    self.scope.declare(
                        &range.alias,
                        AliasBinding {
                            entity: entity.id,
                            table: table.clone(),
                            from_item,
                        },
                    )?;
                    self.scope.current()?.acc.from.push(FromItem::new(table));

                    for join in &range.joins {
                        self.declare_join(join, &mut pending)?;
                    }
                }
                FromDeclaration::CollectionMember { path, alias } => {
                    let join = JoinDeclaration {
                        join_type: JoinType::Inner,
                        fetch: false,
                        path: path.clone(),
                        alias: Some(alias.clone()),
                    };
                    self.declare_join(&join, &mut pending)?;
                }
            }
        }

        Ok(pending)
    }

    fn declare_join(
        &mut self,
        join: &JoinDeclaration,
        pending: &mut Vec<PendingFetch>,
    ) -> Result<(), InternalError> {
        let Some((last, prefix)) = join.path.segments.split_last() else {
            return Err(SemanticError::InvalidExpression {
                message: format!("join path '{}' must name a relationship", join.path),
            }
            .into());
        };
        if join.fetch && !prefix.is_empty() {
            return Err(SemanticError::Unsupported {
                construct: format!("fetch join over the multi-step path '{}'", join.path),
            }
            .into());
        }

        let source_path = PathExpression {
            root: join.path.root.clone(),
            segments: prefix.to_vec(),
        };
        let PathTarget::Entity {
            entity,
            table,
            placement,
        } = self.resolve_path(&source_path)?
        else {
            return Err(SemanticError::InvalidExpression {
                message: format!("join path '{}' must start from an entity", join.path),
            }
            .into());
        };

        let descriptor = self.registry.entity(entity);
        let Some(index) = descriptor.relation_index(last) else {
            return Err(if descriptor.attribute_index(last).is_some() {
                SemanticError::NotARelationship {
                    entity: descriptor.name.clone(),
                    attribute: last.clone(),
                }
            } else {
                SemanticError::UnknownAttribute {
                    entity: descriptor.name.clone(),
                    path: last.clone(),
                }
            }
            .into());
        };
        let relation = descriptor.relation_id(index);
        let target = descriptor.relations[index].target;
        let kind = match join.join_type {
            JoinType::Inner => JoinKind::Inner,
            JoinType::Left => JoinKind::Left,
        };

        let (joined, from_item) = self.explicit_join(&table, placement, relation, kind)?;
        if let Some(alias) = &join.alias {
            self.scope.declare(
                alias,
                AliasBinding {
                    entity: target,
                    table: joined.clone(),
                    from_item,
                },
            )?;
        }
        if join.fetch {
            pending.push(PendingFetch {
                owner: join.path.root.clone(),
                alias: join.alias.clone(),
                relation,
                entity: target,
                table: joined,
            });
        }

        Ok(())
    }

    // ---------------------------------------------------------------------
    // SELECT list
    // ---------------------------------------------------------------------

    fn compile_items(
        &mut self,
        items: &[SelectItem],
        nested: bool,
    ) -> Result<Vec<ResultItem>, InternalError> {
        let mut out = Vec::with_capacity(items.len());

        for item in items {
            let label = item
                .result_variable
                .clone()
                .unwrap_or_else(|| expression_label(&item.expr));
            let result = self.compile_item(&item.expr, label, nested)?;

            if let Some(variable) = &item.result_variable {
                self.declare_result_variable(variable, &result)?;
            }
            out.push(result);
        }

        Ok(out)
    }

    fn compile_item(
        &mut self,
        expr: &Expression,
        label: String,
        nested: bool,
    ) -> Result<ResultItem, InternalError> {
        let entity_source = match expr {
            Expression::Path(path) => match self.resolve_path(path)? {
                PathTarget::Entity { entity, table, .. } => Some((entity, table)),
                PathTarget::Attribute { column, .. } => {
                    return self.push_scalar(Expr::Column(column), FetchKind::Scalar, label);
                }
                PathTarget::Relation {
                    table,
                    relation,
                    placement,
                } => Some(self.relation_item(path, &table, relation, placement)?),
            },
            _ => None,
        };

        if let Some((entity, table)) = entity_source {
            return self.push_entity(entity, &table, label, nested);
        }

        let fetch = match expr {
            Expression::Aggregate { function, .. } => FetchKind::Aggregate(*function),
            _ => FetchKind::Scalar,
        };
        let compiled = self.compile_scalar(expr)?;

        self.push_scalar(compiled, fetch, label)
    }

    // A selected to-one relationship is its target entity.
    fn relation_item(
        &mut self,
        path: &PathExpression,
        table: &FromTable,
        relation: RelationId,
        placement: Placement,
    ) -> Result<(EntityId, FromTable), InternalError> {
        let descriptor = self.registry.relation(relation);
        if descriptor.is_to_many() {
            return Err(SemanticError::CollectionPathNotAllowed {
                path: path.to_string(),
            }
            .into());
        }
        let (joined, _) = self.hop(table, placement, relation)?;

        Ok((descriptor.target, joined))
    }

    fn push_entity(
        &mut self,
        entity: EntityId,
        table: &FromTable,
        label: String,
        nested: bool,
    ) -> Result<ResultItem, InternalError> {
        let descriptor = self.registry.entity(entity);
        let acc = &mut self.scope.current()?.acc;
        let start = acc.columns.len();

        if nested {
            for column in descriptor.key_columns() {
                acc.push_column(
                    Expr::Column(table.column(column)),
                    FetchDescriptor::new(FetchKind::Scalar, label.clone()),
                );
            }
        } else {
            let (columns, fetches) = entity_projection(descriptor, table, &label);
            acc.columns.extend(columns);
            acc.fetches.extend(fetches);
        }

        Ok(ResultItem::Entity {
            entity,
            columns: start..acc.columns.len(),
            label,
        })
    }

    fn push_scalar(
        &mut self,
        expr: Expr,
        kind: FetchKind,
        label: String,
    ) -> Result<ResultItem, InternalError> {
        let column = self
            .scope
            .current()?
            .acc
            .push_column(expr, FetchDescriptor::new(kind, label.clone()));

        Ok(ResultItem::Scalar { column, label })
    }

    fn declare_result_variable(
        &mut self,
        variable: &str,
        item: &ResultItem,
    ) -> Result<(), InternalError> {
        let key = variable.to_ascii_lowercase();
        if self.scope.lookup(variable).is_some() {
            return Err(SemanticError::AmbiguousSelection {
                message: format!("result variable '{variable}' shadows an identification variable"),
            }
            .into());
        }

        let acc = &mut self.scope.current()?.acc;
        if acc.result_variables.contains_key(&key) {
            return Err(SemanticError::AmbiguousSelection {
                message: format!("result variable '{variable}' is declared more than once"),
            }
            .into());
        }
        if let ResultItem::Scalar { column, .. } = item {
            let expr = acc.columns[*column].clone();
            acc.result_variables.insert(key, expr);
        }

        Ok(())
    }

    fn project_fetch_joins(
        &mut self,
        items: &[SelectItem],
        pending: Vec<PendingFetch>,
    ) -> Result<Vec<FetchJoin>, InternalError> {
        let mut fetch_aliases: Vec<Option<String>> = Vec::with_capacity(pending.len());
        let mut out = Vec::with_capacity(pending.len());

        for fetch in pending {
            let selected = items.iter().position(|item| {
                matches!(&item.expr, Expression::Path(p)
                    if p.segments.is_empty() && p.root.eq_ignore_ascii_case(&fetch.owner))
            });
            let parent = match selected {
                Some(index) => FetchParent::Item(index),
                None => fetch_aliases
                    .iter()
                    .position(|alias| {
                        alias
                            .as_deref()
                            .is_some_and(|a| a.eq_ignore_ascii_case(&fetch.owner))
                    })
                    .map(FetchParent::Fetch)
                    .ok_or_else(|| SemanticError::InvalidExpression {
                        message: format!(
                            "fetch join owner '{}' is not part of the selection",
                            fetch.owner
                        ),
                    })?,
            };

            let target = self.registry.entity(fetch.entity);
            let label = format!(
                "{}.{}",
                fetch.owner,
                self.registry.relation(fetch.relation).name
            );
            let (columns, fetches) = entity_projection(target, &fetch.table, &label);
            let acc = &mut self.scope.current()?.acc;
            let start = acc.columns.len();
            acc.columns.extend(columns);
            acc.fetches.extend(fetches);

            out.push(FetchJoin {
                parent,
                relation: fetch.relation,
                entity: fetch.entity,
                columns: start..acc.columns.len(),
            });
            fetch_aliases.push(fetch.alias);
        }

        Ok(out)
    }

    // ---------------------------------------------------------------------
    // WHERE, GROUP BY, HAVING, ORDER BY and assembly
    // ---------------------------------------------------------------------

    fn finish_select(
        &mut self,
        select: &SelectStatement,
    ) -> Result<(Select, Vec<FetchDescriptor>), InternalError> {
        let filter = select
            .filter
            .as_ref()
            .map(|f| self.compile_condition(f))
            .transpose()?;

        let mut group_by = Vec::new();
        for expr in &select.group_by {
            group_by.extend(self.grouping_columns(expr)?);
        }

        let having = select
            .having
            .as_ref()
            .map(|h| self.compile_condition(h))
            .transpose()?;

        let mut order_by = Vec::new();
        for item in &select.order_by {
            order_by.extend(self.ordering(item)?);
        }

        let acc = self.scope.pop_level()?.acc;
        let mut conditions = acc.correlation;
        conditions.extend(filter);

        let statement = Select {
            distinct: select.distinct,
            columns: acc.columns,
            from: acc.from,
            filter: Condition::conjoin(conditions),
            group_by,
            having,
            order_by,
            limit: None,
            offset: None,
            lock: LockMode::None,
        };

        Ok((statement, acc.fetches))
    }

    // Grouping by an entity groups by every column it projects.
    fn grouping_columns(&mut self, expr: &Expression) -> Result<Vec<Expr>, InternalError> {
        let Expression::Path(path) = expr else {
            return Ok(vec![self.compile_scalar(expr)?]);
        };

        match self.resolve_path(path)? {
            PathTarget::Entity { entity, table, .. } => Ok(self
                .registry
                .entity(entity)
                .select_columns()
                .iter()
                .map(|c| Expr::Column(table.column(&c.column)))
                .collect()),
            PathTarget::Attribute { column, .. } => Ok(vec![Expr::Column(column)]),
            PathTarget::Relation { .. } => Ok(self.path_operand(path)?.into_columns()),
        }
    }

    fn ordering(&mut self, item: &OrderItem) -> Result<Vec<OrderBy>, InternalError> {
        let descending = item.descending;

        if let Expression::Path(path) = &item.expr {
            if path.segments.is_empty() && self.scope.lookup(&path.root).is_none() {
                let key = path.root.to_ascii_lowercase();
                if let Some(expr) = self.scope.current()?.acc.result_variables.get(&key) {
                    return Ok(vec![OrderBy {
                        expr: expr.clone(),
                        descending,
                    }]);
                }
            }

            return Ok(self
                .path_operand(path)?
                .into_columns()
                .into_iter()
                .map(|expr| OrderBy { expr, descending })
                .collect());
        }

        Ok(vec![OrderBy {
            expr: self.compile_scalar(&item.expr)?,
            descending,
        }])
    }
}

fn expression_label(expr: &Expression) -> String {
    match expr {
        Expression::Path(path) => path.to_string(),
        Expression::Aggregate {
            function,
            distinct,
            arg,
        } => {
            let inner = arg.as_deref().map_or_else(|| "*".to_string(), expression_label);
            if *distinct {
                format!("{}(DISTINCT {inner})", function.name())
            } else {
                format!("{}({inner})", function.name())
            }
        }
        Expression::Function { function, .. } => function.name().to_string(),
        Expression::Size(path) => format!("SIZE({path})"),
        Expression::Literal(value) => value.to_string(),
        Expression::Param(slot) => slot.to_string(),
        _ => "expr".to_string(),
    }
}
