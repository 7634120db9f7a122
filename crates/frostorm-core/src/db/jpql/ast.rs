//! JPQL parse tree. Produced by the parser and by criteria lowering;
//! consumed only by the compiler.

use crate::{
    db::sql::{AggregateFunction, CompareOp, ParamSlot, Quantifier, ScalarFunction},
    value::{ArithmeticOp, Value},
};
use std::fmt;

///
/// QueryStatement
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum QueryStatement {
    Select(SelectStatement),
    Update(UpdateStatement),
    Delete(DeleteStatement),
}

///
/// SelectStatement
///

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SelectStatement {
    pub distinct: bool,
    pub items: Vec<SelectItem>,
    pub from: Vec<FromDeclaration>,
    pub filter: Option<Expression>,
    pub group_by: Vec<Expression>,
    pub having: Option<Expression>,
    pub order_by: Vec<OrderItem>,
}

///
/// SelectItem
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SelectItem {
    pub expr: Expression,
    pub result_variable: Option<String>,
}

///
/// FromDeclaration
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FromDeclaration {
    /// `Entity [AS] alias` with the joins chained onto it.
    Range(RangeDeclaration),
    /// `IN (alias.collection) [AS] alias`.
    CollectionMember { path: PathExpression, alias: String },
}

///
/// RangeDeclaration
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RangeDeclaration {
    pub entity: String,
    pub alias: String,
    pub joins: Vec<JoinDeclaration>,
}

///
/// JoinType
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum JoinType {
    Inner,
    Left,
}

///
/// JoinDeclaration
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct JoinDeclaration {
    pub join_type: JoinType,
    pub fetch: bool,
    pub path: PathExpression,
    /// Required unless `fetch` is set.
    pub alias: Option<String>,
}

///
/// PathExpression
///
/// `root.seg1.seg2`; a bare identification variable has no segments.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PathExpression {
    pub root: String,
    pub segments: Vec<String>,
}

impl PathExpression {
    #[must_use]
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            segments: Vec::new(),
        }
    }

    /// Parse a dotted path such as `o.customer.name`.
    #[must_use]
    pub fn parse_dotted(path: &str) -> Self {
        let mut parts = path.split('.');
        let root = parts.next().unwrap_or_default().to_string();

        Self {
            root,
            segments: parts.map(ToString::to_string).collect(),
        }
    }

    #[must_use]
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.into());

        Self {
            root: self.root.clone(),
            segments,
        }
    }
}

impl fmt::Display for PathExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.root)?;
        for segment in &self.segments {
            write!(f, ".{segment}")?;
        }
        Ok(())
    }
}

///
/// OrderItem
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OrderItem {
    pub expr: Expression,
    pub descending: bool,
}

///
/// Expression
///
/// One tree for scalar and conditional expressions; the compiler decides
/// per position which shapes are legal.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Expression {
    Path(PathExpression),
    Literal(Value),
    Param(ParamSlot),
    /// `first (op operand)*` at one precedence level.
    Arithmetic {
        first: Box<Self>,
        rest: Vec<(ArithmeticOp, Self)>,
    },
    Negate(Box<Self>),
    Function {
        function: ScalarFunction,
        args: Vec<Self>,
    },
    /// `arg == None` is `COUNT(*)`.
    Aggregate {
        function: AggregateFunction,
        distinct: bool,
        arg: Option<Box<Self>>,
    },
    Size(PathExpression),
    Subquery(Box<SelectStatement>),

    Compare {
        left: Box<Self>,
        op: CompareOp,
        right: Box<Self>,
    },
    Quantified {
        left: Box<Self>,
        op: CompareOp,
        quantifier: Quantifier,
        subquery: Box<SelectStatement>,
    },
    Between {
        expr: Box<Self>,
        low: Box<Self>,
        high: Box<Self>,
        negated: bool,
    },
    InList {
        expr: Box<Self>,
        list: Vec<Self>,
        negated: bool,
    },
    InSubquery {
        expr: Box<Self>,
        subquery: Box<SelectStatement>,
        negated: bool,
    },
    Like {
        expr: Box<Self>,
        pattern: Box<Self>,
        escape: Option<Box<Self>>,
        negated: bool,
    },
    IsNull {
        expr: Box<Self>,
        negated: bool,
    },
    IsEmpty {
        path: PathExpression,
        negated: bool,
    },
    MemberOf {
        expr: Box<Self>,
        path: PathExpression,
        negated: bool,
    },
    Exists {
        subquery: Box<SelectStatement>,
        negated: bool,
    },
    And(Vec<Self>),
    Or(Vec<Self>),
    Not(Box<Self>),
}

impl Expression {
    #[must_use]
    pub fn path(path: &str) -> Self {
        Self::Path(PathExpression::parse_dotted(path))
    }

    #[must_use]
    pub fn compare(left: Self, op: CompareOp, right: Self) -> Self {
        Self::Compare {
            left: Box::new(left),
            op,
            right: Box::new(right),
        }
    }
}

///
/// UpdateStatement
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UpdateStatement {
    pub entity: String,
    pub alias: Option<String>,
    pub assignments: Vec<UpdateAssignment>,
    pub filter: Option<Expression>,
}

///
/// UpdateAssignment
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UpdateAssignment {
    pub path: PathExpression,
    pub value: Expression,
}

///
/// DeleteStatement
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeleteStatement {
    pub entity: String,
    pub alias: Option<String>,
    pub filter: Option<Expression>,
}
