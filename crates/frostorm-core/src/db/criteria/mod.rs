//! Criteria queries: a builder that lowers into the same parse tree the
//! JPQL parser produces, so both front ends share one compiler.

#[cfg(test)]
mod tests;

use crate::{
    db::{
        jpql::ast::{
            Expression, FromDeclaration, JoinDeclaration, JoinType, OrderItem, PathExpression,
            QueryStatement, RangeDeclaration, SelectItem, SelectStatement,
        },
        sql::{AggregateFunction, CompareOp, ParamSlot},
    },
    value::Value,
};
use std::ops::{BitAnd, BitOr, Not};

///
/// Operand
///
/// Right-hand side of a criterion. Plain values convert into literals;
/// paths and parameters are built explicitly.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Operand {
    Path(String),
    Literal(Value),
    Param(ParamSlot),
}

impl Operand {
    #[must_use]
    pub fn path(path: impl Into<String>) -> Self {
        Self::Path(path.into())
    }

    /// Named parameter `:name`.
    #[must_use]
    pub fn param(name: impl Into<String>) -> Self {
        Self::Param(ParamSlot::Named(name.into()))
    }

    /// Positional parameter `?n`.
    #[must_use]
    pub const fn position(n: u32) -> Self {
        Self::Param(ParamSlot::Positional(n))
    }

    fn into_expression(self) -> Expression {
        match self {
            Self::Path(path) => Expression::path(&path),
            Self::Literal(value) => Expression::Literal(value),
            Self::Param(slot) => Expression::Param(slot),
        }
    }
}

macro_rules! impl_operand_from {
    ( $( $ty:ty ),* $(,)? ) => {
        $(
            impl From<$ty> for Operand {
                fn from(v: $ty) -> Self {
                    Self::Literal(v.into())
                }
            }
        )*
    };
}

impl_operand_from!(Value, bool, i32, i64, f64, String, &str);

///
/// Criterion
///
/// A predicate over paths rooted at the query's aliases. Combine with `&`,
/// `|` and `!`.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Criterion(Expression);

impl Criterion {
    fn compare(path: &str, op: CompareOp, operand: impl Into<Operand>) -> Self {
        Self(Expression::compare(
            Expression::path(path),
            op,
            operand.into().into_expression(),
        ))
    }

    pub fn eq(path: &str, operand: impl Into<Operand>) -> Self {
        Self::compare(path, CompareOp::Eq, operand)
    }

    pub fn ne(path: &str, operand: impl Into<Operand>) -> Self {
        Self::compare(path, CompareOp::Ne, operand)
    }

    pub fn lt(path: &str, operand: impl Into<Operand>) -> Self {
        Self::compare(path, CompareOp::Lt, operand)
    }

    pub fn lte(path: &str, operand: impl Into<Operand>) -> Self {
        Self::compare(path, CompareOp::Lte, operand)
    }

    pub fn gt(path: &str, operand: impl Into<Operand>) -> Self {
        Self::compare(path, CompareOp::Gt, operand)
    }

    pub fn gte(path: &str, operand: impl Into<Operand>) -> Self {
        Self::compare(path, CompareOp::Gte, operand)
    }

    pub fn between(path: &str, low: impl Into<Operand>, high: impl Into<Operand>) -> Self {
        Self(Expression::Between {
            expr: Box::new(Expression::path(path)),
            low: Box::new(low.into().into_expression()),
            high: Box::new(high.into().into_expression()),
            negated: false,
        })
    }

    pub fn like(path: &str, pattern: impl Into<Operand>) -> Self {
        Self(Expression::Like {
            expr: Box::new(Expression::path(path)),
            pattern: Box::new(pattern.into().into_expression()),
            escape: None,
            negated: false,
        })
    }

    pub fn in_<I>(path: &str, values: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Operand>,
    {
        Self(Expression::InList {
            expr: Box::new(Expression::path(path)),
            list: values
                .into_iter()
                .map(|v| v.into().into_expression())
                .collect(),
            negated: false,
        })
    }

    #[must_use]
    pub fn is_null(path: &str) -> Self {
        Self(Expression::IsNull {
            expr: Box::new(Expression::path(path)),
            negated: false,
        })
    }

    #[must_use]
    pub fn is_not_null(path: &str) -> Self {
        Self(Expression::IsNull {
            expr: Box::new(Expression::path(path)),
            negated: true,
        })
    }

    /// Collection-valued path with no members.
    #[must_use]
    pub fn is_empty(path: &str) -> Self {
        Self(Expression::IsEmpty {
            path: PathExpression::parse_dotted(path),
            negated: false,
        })
    }

    #[must_use]
    pub fn is_not_empty(path: &str) -> Self {
        Self(Expression::IsEmpty {
            path: PathExpression::parse_dotted(path),
            negated: true,
        })
    }

    pub fn member_of(operand: impl Into<Operand>, collection: &str) -> Self {
        Self(Expression::MemberOf {
            expr: Box::new(operand.into().into_expression()),
            path: PathExpression::parse_dotted(collection),
            negated: false,
        })
    }

    #[must_use]
    pub fn into_expression(self) -> Expression {
        self.0
    }
}

impl BitAnd for Criterion {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        let mut parts = match self.0 {
            Expression::And(parts) => parts,
            other => vec![other],
        };
        match rhs.0 {
            Expression::And(more) => parts.extend(more),
            other => parts.push(other),
        }

        Self(Expression::And(parts))
    }
}

impl BitOr for Criterion {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        let mut parts = match self.0 {
            Expression::Or(parts) => parts,
            other => vec![other],
        };
        match rhs.0 {
            Expression::Or(more) => parts.extend(more),
            other => parts.push(other),
        }

        Self(Expression::Or(parts))
    }
}

impl Not for Criterion {
    type Output = Self;

    fn not(self) -> Self {
        Self(Expression::Not(Box::new(self.0)))
    }
}

///
/// CriteriaQuery
///
/// Select over one root entity. With no explicit select items the root
/// alias is selected.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CriteriaQuery {
    entity: String,
    alias: String,
    distinct: bool,
    items: Vec<SelectItem>,
    joins: Vec<JoinDeclaration>,
    filter: Option<Criterion>,
    group_by: Vec<Expression>,
    having: Option<Criterion>,
    order_by: Vec<OrderItem>,
}

impl CriteriaQuery {
    pub fn from(entity: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            alias: alias.into(),
            distinct: false,
            items: Vec::new(),
            joins: Vec::new(),
            filter: None,
            group_by: Vec::new(),
            having: None,
            order_by: Vec::new(),
        }
    }

    #[must_use]
    pub fn select(mut self, path: &str) -> Self {
        self.items.push(SelectItem {
            expr: Expression::path(path),
            result_variable: None,
        });
        self
    }

    /// Aggregate select item; `path == None` is `COUNT(*)`.
    #[must_use]
    pub fn select_aggregate(mut self, function: AggregateFunction, path: Option<&str>) -> Self {
        self.items.push(SelectItem {
            expr: Expression::Aggregate {
                function,
                distinct: false,
                arg: path.map(|p| Box::new(Expression::path(p))),
            },
            result_variable: None,
        });
        self
    }

    #[must_use]
    pub const fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    #[must_use]
    pub fn join(self, path: &str, alias: &str) -> Self {
        self.push_join(JoinType::Inner, false, path, Some(alias))
    }

    #[must_use]
    pub fn left_join(self, path: &str, alias: &str) -> Self {
        self.push_join(JoinType::Left, false, path, Some(alias))
    }

    #[must_use]
    pub fn fetch(self, path: &str) -> Self {
        self.push_join(JoinType::Inner, true, path, None)
    }

    #[must_use]
    pub fn left_fetch(self, path: &str) -> Self {
        self.push_join(JoinType::Left, true, path, None)
    }

    fn push_join(mut self, join_type: JoinType, fetch: bool, path: &str, alias: Option<&str>) -> Self {
        self.joins.push(JoinDeclaration {
            join_type,
            fetch,
            path: PathExpression::parse_dotted(path),
            alias: alias.map(ToString::to_string),
        });
        self
    }

    /// Add a restriction; repeated calls are conjoined.
    #[must_use]
    pub fn filter(mut self, criterion: Criterion) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing & criterion,
            None => criterion,
        });
        self
    }

    #[must_use]
    pub fn group_by(mut self, path: &str) -> Self {
        self.group_by.push(Expression::path(path));
        self
    }

    #[must_use]
    pub fn having(mut self, criterion: Criterion) -> Self {
        self.having = Some(match self.having.take() {
            Some(existing) => existing & criterion,
            None => criterion,
        });
        self
    }

    #[must_use]
    pub fn order_by(mut self, path: &str, descending: bool) -> Self {
        self.order_by.push(OrderItem {
            expr: Expression::path(path),
            descending,
        });
        self
    }

    #[must_use]
    pub fn asc(self, path: &str) -> Self {
        self.order_by(path, false)
    }

    #[must_use]
    pub fn desc(self, path: &str) -> Self {
        self.order_by(path, true)
    }

    /// The parse tree the compiler consumes.
    #[must_use]
    pub fn to_statement(&self) -> QueryStatement {
        let items = if self.items.is_empty() {
            vec![SelectItem {
                expr: Expression::Path(PathExpression::new(&self.alias)),
                result_variable: None,
            }]
        } else {
            self.items.clone()
        };

        QueryStatement::Select(SelectStatement {
            distinct: self.distinct,
            items,
            from: vec![FromDeclaration::Range(RangeDeclaration {
                entity: self.entity.clone(),
                alias: self.alias.clone(),
                joins: self.joins.clone(),
            })],
            filter: self.filter.clone().map(Criterion::into_expression),
            group_by: self.group_by.clone(),
            having: self.having.clone().map(Criterion::into_expression),
            order_by: self.order_by.clone(),
        })
    }
}

impl From<CriteriaQuery> for QueryStatement {
    fn from(query: CriteriaQuery) -> Self {
        query.to_statement()
    }
}
