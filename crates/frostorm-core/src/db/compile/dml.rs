use super::{
    expr::{coerce_to, Operand},
    path::PathTarget,
    scope::AliasBinding,
    CompiledQuery, Compilation, QueryKind,
};
use crate::{
    db::{
        jpql::ast::{DeleteStatement, UpdateAssignment, UpdateStatement},
        sql::{Assignment, Delete, Expr, FromItem, FromTable, Statement, Update},
    },
    error::{InternalError, SemanticError},
    model::EntityDescriptor,
    value::Value,
};

impl<'r> Compilation<'r> {
    pub(super) fn compile_update(
        mut self,
        update: &UpdateStatement,
    ) -> Result<CompiledQuery, InternalError> {
        let entity = self.bulk_target(&update.entity)?;
        let table = self.open_bulk_scope(entity, update.alias.as_deref())?;

        let mut assignments = Vec::new();
        for assignment in &update.assignments {
            assignments.extend(self.assignment(entity, assignment)?);
        }
        let filter = update
            .filter
            .as_ref()
            .map(|f| self.compile_condition(f))
            .transpose()?;
        self.close_bulk_scope()?;

        Ok(self.bulk_query(
            QueryKind::Update,
            Statement::Update(Update {
                table,
                assignments,
                filter,
            }),
        ))
    }

    pub(super) fn compile_delete(
        mut self,
        delete: &DeleteStatement,
    ) -> Result<CompiledQuery, InternalError> {
        let entity = self.bulk_target(&delete.entity)?;
        let table = self.open_bulk_scope(entity, delete.alias.as_deref())?;
        let filter = delete
            .filter
            .as_ref()
            .map(|f| self.compile_condition(f))
            .transpose()?;
        self.close_bulk_scope()?;

        Ok(self.bulk_query(
            QueryKind::Delete,
            Statement::Delete(Delete { table, filter }),
        ))
    }

    fn bulk_target(&self, name: &str) -> Result<&'r EntityDescriptor, InternalError> {
        self.registry.entity_by_name(name).ok_or_else(|| {
            SemanticError::UnknownEntity {
                name: name.to_string(),
            }
            .into()
        })
    }

    // Single-table scope; without an alias, bare names resolve against the
    // target entity.
    fn open_bulk_scope(
        &mut self,
        entity: &EntityDescriptor,
        alias: Option<&str>,
    ) -> Result<FromTable, InternalError> {
        self.scope.bulk = true;
        self.scope.push_level();

        let table = self.scope.aliases.table(&entity.table);
        let name = alias.map_or_else(|| entity.name.clone(), ToString::to_string);
        if alias.is_none() {
            self.scope.default_root = Some(name.clone());
        }
        self.scope.declare(
            &name,
            AliasBinding {
                entity: entity.id,
                table: table.clone(),
                from_item: 0,
            },
        )?;
        self.scope
            .current()?
            .acc
            .from
            .push(FromItem::new(table.clone()));

        Ok(table)
    }

    fn close_bulk_scope(&mut self) -> Result<(), InternalError> {
        let level = self.scope.pop_level()?;
        if level.acc.from.len() != 1 || level.acc.from.iter().any(|item| !item.joins.is_empty()) {
            return Err(InternalError::statement_invariant(
                "bulk statement acquired joins",
            ));
        }

        Ok(())
    }

    fn bulk_query(mut self, kind: QueryKind, statement: Statement) -> CompiledQuery {
        CompiledQuery {
            kind,
            statement,
            fetches: Vec::new(),
            params: self.scope.take_params(),
            items: Vec::new(),
            fetch_joins: Vec::new(),
        }
    }

    fn assignment(
        &mut self,
        entity: &EntityDescriptor,
        assignment: &UpdateAssignment,
    ) -> Result<Vec<Assignment>, InternalError> {
        match self.resolve_path(&assignment.path)? {
            PathTarget::Attribute {
                attribute, column, ..
            } => {
                if entity.primary_key.contains(attribute) {
                    return Err(SemanticError::InvalidExpression {
                        message: format!(
                            "primary key attribute '{}' cannot be assigned",
                            assignment.path
                        ),
                    }
                    .into());
                }
                let kind = entity.attributes[attribute].kind;
                let value = coerce_to(Some(kind), self.compile_scalar(&assignment.value)?)?;

                Ok(vec![Assignment {
                    column: column.column,
                    value,
                }])
            }

            PathTarget::Relation {
                table, relation, ..
            } => {
                let Some(columns) = self.foreign_key_columns(relation, &table)? else {
                    return Err(SemanticError::Unsupported {
                        construct: format!(
                            "assigning '{}', which has no foreign key on this table",
                            assignment.path
                        ),
                    }
                    .into());
                };
                let values = match self.compile_operand(&assignment.value)? {
                    Operand::Scalar {
                        expr: Expr::Literal(Value::Null),
                        ..
                    } => vec![Expr::Literal(Value::Null); columns.len()],
                    other => other.into_columns(),
                };
                if values.len() != columns.len() {
                    return Err(SemanticError::Unsupported {
                        construct: "assigning a composite foreign key from a single value"
                            .to_string(),
                    }
                    .into());
                }

                columns
                    .into_iter()
                    .zip(values)
                    .map(|(column, value)| match column {
                        Expr::Column(column) => Ok(Assignment {
                            column: column.column,
                            value,
                        }),
                        _ => Err(InternalError::statement_invariant(
                            "foreign key resolved to a non-column",
                        )),
                    })
                    .collect()
            }

            PathTarget::Entity { .. } => Err(SemanticError::InvalidExpression {
                message: format!(
                    "'{}' is an identification variable, not an attribute",
                    assignment.path
                ),
            }
            .into()),
        }
    }
}
