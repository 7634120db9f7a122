use super::{
    expr::{coerce_to, Operand},
    path::PathTarget,
    Compilation,
};
use crate::{
    db::{
        jpql::ast::{Expression, PathExpression},
        sql::{CompareOp, Condition, Expr, FromTable},
    },
    error::{InternalError, SemanticError},
    model::RelationId,
};

impl Compilation<'_> {
    pub(super) fn compile_condition(&mut self, expr: &Expression) -> Result<Condition, InternalError> {
        match expr {
            Expression::Compare { left, op, right } => self.comparison(left, *op, right),

            Expression::Quantified {
                left,
                op,
                quantifier,
                subquery,
            } => {
                let left = self.compile_operand(left)?.into_scalar()?;
                let select = self.compile_subquery(subquery)?;

                Ok(Condition::Quantified {
                    left,
                    op: *op,
                    quantifier: *quantifier,
                    select: Box::new(select),
                })
            }

            Expression::Between {
                expr,
                low,
                high,
                negated,
            } => {
                let operand = self.compile_operand(expr)?;
                let kind = operand.kind();
                let expr = operand.into_scalar()?;
                let low = coerce_to(kind, self.compile_scalar(low)?)?;
                let high = coerce_to(kind, self.compile_scalar(high)?)?;

                Ok(Condition::Between {
                    expr,
                    low,
                    high,
                    negated: *negated,
                })
            }

            Expression::InList {
                expr,
                list,
                negated,
            } => {
                let operand = self.compile_operand(expr)?;
                let kind = operand.kind();
                let expr = operand.into_scalar()?;
                let list = list
                    .iter()
                    .map(|item| coerce_to(kind, self.compile_scalar(item)?))
                    .collect::<Result<Vec<_>, _>>()?;

                Ok(Condition::InList {
                    expr,
                    list,
                    negated: *negated,
                })
            }

            Expression::InSubquery {
                expr,
                subquery,
                negated,
            } => {
                let expr = self.compile_operand(expr)?.into_scalar()?;
                let select = self.compile_subquery(subquery)?;

                Ok(Condition::InSelect {
                    expr,
                    select: Box::new(select),
                    negated: *negated,
                })
            }

            Expression::Like {
                expr,
                pattern,
                escape,
                negated,
            } => {
                let expr = self.compile_scalar(expr)?;
                let pattern = self.compile_scalar(pattern)?;
                let escape = escape
                    .as_deref()
                    .map(|e| self.compile_scalar(e))
                    .transpose()?;

                Ok(Condition::Like {
                    expr,
                    pattern,
                    escape,
                    negated: *negated,
                })
            }

            Expression::IsNull { expr, negated } => self.null_test(expr, *negated),

            Expression::IsEmpty { path, negated } => {
                let (table, relation) = self.collection_path(path, "IS EMPTY")?;
                let (mut select, _) = self.relation_subselect(&table, relation)?;
                select.columns = vec![Expr::literal(1i64)];

                Ok(Condition::Exists {
                    select: Box::new(select),
                    negated: !*negated,
                })
            }

            Expression::MemberOf {
                expr,
                path,
                negated,
            } => {
                let member = self.compile_operand(expr)?.into_columns();
                let (table, relation) = self.collection_path(path, "MEMBER OF")?;
                let (mut select, target) = self.relation_subselect(&table, relation)?;
                let target_entity = self.registry.relation(relation).target;
                let keys = self.key_columns(target_entity, &target);
                let matches = column_equalities(keys, CompareOp::Eq, member)?;
                select.filter = Condition::conjoin(select.filter.into_iter().chain([matches]).collect());
                select.columns = vec![Expr::literal(1i64)];

                Ok(Condition::Exists {
                    select: Box::new(select),
                    negated: *negated,
                })
            }

            Expression::Exists { subquery, negated } => {
                let select = self.compile_subquery(subquery)?;

                Ok(Condition::Exists {
                    select: Box::new(select),
                    negated: *negated,
                })
            }

            Expression::And(parts) => Ok(Condition::And(
                parts
                    .iter()
                    .map(|part| self.compile_condition(part))
                    .collect::<Result<_, _>>()?,
            )),
            Expression::Or(parts) => Ok(Condition::Or(
                parts
                    .iter()
                    .map(|part| self.compile_condition(part))
                    .collect::<Result<_, _>>()?,
            )),
            Expression::Not(inner) => Ok(Condition::Not(Box::new(self.compile_condition(inner)?))),

            // boolean-valued scalars (attributes, parameters, literals)
            other => Ok(Condition::Truth(self.compile_scalar(other)?)),
        }
    }

    fn comparison(
        &mut self,
        left: &Expression,
        op: CompareOp,
        right: &Expression,
    ) -> Result<Condition, InternalError> {
        let left = self.compile_operand(left)?;
        let right = self.compile_operand(right)?;

        match (left, right) {
            (
                Operand::Scalar {
                    expr: left,
                    kind: left_kind,
                },
                Operand::Scalar {
                    expr: right,
                    kind: right_kind,
                },
            ) => Ok(Condition::compare(
                coerce_to(right_kind, left)?,
                op,
                coerce_to(left_kind, right)?,
            )),
            (left, right) => {
                let (left, right) = (left.into_columns(), right.into_columns());
                if left.len() != right.len() {
                    return Err(SemanticError::Unsupported {
                        construct: "comparing a composite-key entity with a single value"
                            .to_string(),
                    }
                    .into());
                }
                column_equalities(left, op, right)
            }
        }
    }

    fn null_test(&mut self, expr: &Expression, negated: bool) -> Result<Condition, InternalError> {
        let Expression::Path(path) = expr else {
            return Ok(Condition::IsNull {
                expr: self.compile_scalar(expr)?,
                negated,
            });
        };

        let columns = match self.resolve_path(path)? {
            PathTarget::Attribute { column, .. } => vec![Expr::Column(column)],
            PathTarget::Entity { entity, table, .. } => self.key_columns(entity, &table),
            PathTarget::Relation {
                table, relation, ..
            } => {
                let descriptor = self.registry.relation(relation);
                if descriptor.is_to_many() {
                    return Err(SemanticError::CollectionPathNotAllowed {
                        path: path.to_string(),
                    }
                    .into());
                }
                match self.foreign_key_columns(relation, &table)? {
                    Some(columns) => columns,
                    // no key on this side: test for a referencing row instead
                    None => {
                        let (mut select, _) = self.relation_subselect(&table, relation)?;
                        select.columns = vec![Expr::literal(1i64)];
                        return Ok(Condition::Exists {
                            select: Box::new(select),
                            negated: !negated,
                        });
                    }
                }
            }
        };

        let tests = columns
            .into_iter()
            .map(|expr| Condition::IsNull { expr, negated })
            .collect();
        Condition::conjoin(tests)
            .ok_or_else(|| InternalError::statement_invariant("null test over no columns"))
    }

    fn collection_path(
        &mut self,
        path: &PathExpression,
        construct: &str,
    ) -> Result<(FromTable, RelationId), InternalError> {
        match self.resolve_path(path)? {
            PathTarget::Relation {
                table, relation, ..
            } if self.registry.relation(relation).is_to_many() => Ok((table, relation)),
            _ => Err(SemanticError::InvalidExpression {
                message: format!("{construct} requires a collection-valued path, got '{path}'"),
            }
            .into()),
        }
    }
}

// Column-wise comparison of two entity operands; only = and <> apply.
fn column_equalities(
    left: Vec<Expr>,
    op: CompareOp,
    right: Vec<Expr>,
) -> Result<Condition, InternalError> {
    if !matches!(op, CompareOp::Eq | CompareOp::Ne) {
        return Err(SemanticError::InvalidExpression {
            message: format!("entities cannot be compared with {}", op.symbol()),
        }
        .into());
    }
    if left.len() != right.len() {
        return Err(SemanticError::InvalidExpression {
            message: "compared entities have different key shapes".to_string(),
        }
        .into());
    }

    let mut pairs: Vec<Condition> = left
        .into_iter()
        .zip(right)
        .map(|(l, r)| Condition::compare(l, op, r))
        .collect();
    if pairs.len() == 1 || op == CompareOp::Eq {
        return Condition::conjoin(pairs)
            .ok_or_else(|| InternalError::statement_invariant("entity comparison over no columns"));
    }

    // a <> b over composite keys: NOT (all columns equal)
    for pair in &mut pairs {
        if let Condition::Compare { op, .. } = pair {
            *op = CompareOp::Eq;
        }
    }
    Ok(Condition::Not(Box::new(Condition::And(pairs))))
}
