use super::{path::PathTarget, Compilation};
use crate::{
    db::{
        jpql::ast::{Expression, PathExpression},
        sql::{AggregateFunction, ArithmeticChain, Expr},
    },
    error::{InternalError, SemanticError},
    model::EntityId,
    value::ValueKind,
};

///
/// Operand
///
/// A compiled value position. Entity-valued paths stay as their key (or
/// foreign-key) columns so comparisons can expand column-wise.
///

#[derive(Clone, Debug)]
pub(super) enum Operand {
    Scalar {
        expr: Expr,
        kind: Option<ValueKind>,
    },
    Entity {
        entity: EntityId,
        columns: Vec<Expr>,
    },
}

impl Operand {
    pub(super) const fn kind(&self) -> Option<ValueKind> {
        match self {
            Self::Scalar { kind, .. } => *kind,
            Self::Entity { .. } => None,
        }
    }

    /// The operand as a column list (one entry for scalars).
    pub(super) fn into_columns(self) -> Vec<Expr> {
        match self {
            Self::Scalar { expr, .. } => vec![expr],
            Self::Entity { columns, .. } => columns,
        }
    }

    /// The operand as one value; entities qualify only with a single-column
    /// key.
    pub(super) fn into_scalar(self) -> Result<Expr, InternalError> {
        match self {
            Self::Scalar { expr, .. } => Ok(expr),
            Self::Entity { mut columns, .. } if columns.len() == 1 => Ok(columns.remove(0)),
            Self::Entity { .. } => Err(SemanticError::Unsupported {
                construct: "composite-key entity used as a single value".to_string(),
            }
            .into()),
        }
    }
}

impl Compilation<'_> {
    pub(super) fn compile_operand(&mut self, expr: &Expression) -> Result<Operand, InternalError> {
        let Expression::Path(path) = expr else {
            let kind = match expr {
                Expression::Literal(value) => value.kind(),
                _ => None,
            };
            return Ok(Operand::Scalar {
                expr: self.compile_scalar(expr)?,
                kind,
            });
        };

        self.path_operand(path)
    }

    pub(super) fn path_operand(&mut self, path: &PathExpression) -> Result<Operand, InternalError> {
        match self.resolve_path(path)? {
            PathTarget::Entity { entity, table, .. } => Ok(Operand::Entity {
                entity,
                columns: self.key_columns(entity, &table),
            }),
            PathTarget::Attribute {
                entity,
                attribute,
                column,
            } => Ok(Operand::Scalar {
                expr: Expr::Column(column),
                kind: Some(self.registry.entity(entity).attributes[attribute].kind),
            }),
            PathTarget::Relation {
                table,
                relation,
                placement,
            } => {
                let descriptor = self.registry.relation(relation);
                if descriptor.is_to_many() {
                    return Err(SemanticError::CollectionPathNotAllowed {
                        path: path.to_string(),
                    }
                    .into());
                }
                let target = descriptor.target;
                if let Some(columns) = self.foreign_key_columns(relation, &table)? {
                    return Ok(Operand::Entity {
                        entity: target,
                        columns,
                    });
                }
                let (joined, _) = self.hop(&table, placement, relation)?;

                Ok(Operand::Entity {
                    entity: target,
                    columns: self.key_columns(target, &joined),
                })
            }
        }
    }

    pub(super) fn compile_scalar(&mut self, expr: &Expression) -> Result<Expr, InternalError> {
        match expr {
            Expression::Path(path) => self.path_operand(path)?.into_scalar(),
            Expression::Literal(value) => Ok(Expr::Literal(value.clone())),
            Expression::Param(slot) => Ok(self.scope.param(slot.clone())),
            Expression::Arithmetic { first, rest } => {
                let first = Box::new(self.compile_scalar(first)?);
                let rest = rest
                    .iter()
                    .map(|(op, operand)| Ok((*op, self.compile_scalar(operand)?)))
                    .collect::<Result<Vec<_>, InternalError>>()?;

                Ok(Expr::Arithmetic(ArithmeticChain { first, rest }))
            }
            Expression::Negate(inner) => Ok(Expr::Negate(Box::new(self.compile_scalar(inner)?))),
            Expression::Function { function, args } => {
                let (min, max) = function.arity();
                if args.len() < min || args.len() > max {
                    return Err(SemanticError::InvalidExpression {
                        message: format!(
                            "{} does not accept {} arguments",
                            function.name(),
                            args.len()
                        ),
                    }
                    .into());
                }
                let args = args
                    .iter()
                    .map(|arg| self.compile_scalar(arg))
                    .collect::<Result<Vec<_>, _>>()?;

                Ok(Expr::Function {
                    function: *function,
                    args,
                })
            }
            Expression::Aggregate {
                function,
                distinct,
                arg,
            } => self.compile_aggregate(*function, *distinct, arg.as_deref()),
            Expression::Size(path) => self.compile_size(path),
            Expression::Subquery(select) => {
                Ok(Expr::Subquery(Box::new(self.compile_subquery(select)?)))
            }
            _ => Err(SemanticError::InvalidExpression {
                message: "conditional expression used where a value is expected".to_string(),
            }
            .into()),
        }
    }

    fn compile_aggregate(
        &mut self,
        function: AggregateFunction,
        distinct: bool,
        arg: Option<&Expression>,
    ) -> Result<Expr, InternalError> {
        let Some(arg) = arg else {
            return Ok(Expr::Aggregate {
                function,
                distinct,
                arg: None,
            });
        };

        let arg = match self.compile_operand(arg)? {
            Operand::Scalar { expr, .. } => expr,
            // counting an entity counts its first key column
            Operand::Entity { mut columns, .. } if function == AggregateFunction::Count => {
                if columns.is_empty() {
                    return Err(InternalError::statement_invariant("entity has no key columns"));
                }
                columns.remove(0)
            }
            Operand::Entity { .. } => {
                return Err(SemanticError::InvalidExpression {
                    message: format!("{} cannot be applied to an entity", function.name()),
                }
                .into());
            }
        };

        Ok(Expr::Aggregate {
            function,
            distinct,
            arg: Some(Box::new(arg)),
        })
    }

    // SIZE(path) is a correlated COUNT(*) over the relationship.
    fn compile_size(&mut self, path: &PathExpression) -> Result<Expr, InternalError> {
        let PathTarget::Relation {
            table, relation, ..
        } = self.resolve_path(path)?
        else {
            return Err(SemanticError::InvalidExpression {
                message: format!("SIZE requires a collection-valued path, got '{path}'"),
            }
            .into());
        };

        let (mut select, _) = self.relation_subselect(&table, relation)?;
        select.columns = vec![Expr::Aggregate {
            function: AggregateFunction::Count,
            distinct: false,
            arg: None,
        }];

        Ok(Expr::Subquery(Box::new(select)))
    }
}

/// Coerce a literal to the kind of the attribute it is compared with.
/// Numeric literals that do not convert losslessly are kept as they are.
pub(super) fn coerce_to(kind: Option<ValueKind>, expr: Expr) -> Result<Expr, InternalError> {
    let (Some(kind), Expr::Literal(value)) = (kind, &expr) else {
        return Ok(expr);
    };

    match kind.coerce(value.clone()) {
        Ok(coerced) => Ok(Expr::Literal(coerced)),
        Err(_) if value.is_numeric() && matches!(kind, ValueKind::Int | ValueKind::Float) => {
            Ok(expr)
        }
        Err(err) => Err(SemanticError::InvalidExpression {
            message: err.to_string(),
        }
        .into()),
    }
}
