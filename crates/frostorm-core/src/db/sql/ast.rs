//! Dialect-neutral relational statement tree shared by every producer
//! (statement factory, query compiler, criteria builder) and every consumer
//! (renderer, store runners).

use crate::{
    db::sql::LockMode,
    error::InternalError,
    value::{ArithmeticOp, Value},
};
use std::collections::BTreeSet;

///
/// FromTable
///

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct FromTable {
    pub table: String,
    pub alias: String,
}

impl FromTable {
    #[must_use]
    pub fn new(table: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            alias: alias.into(),
        }
    }

    /// Column reference qualified by this table's alias.
    #[must_use]
    pub fn column(&self, column: impl Into<String>) -> TableColumn {
        TableColumn {
            alias: self.alias.clone(),
            column: column.into(),
        }
    }
}

///
/// TableColumn
///

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct TableColumn {
    pub alias: String,
    pub column: String,
}

///
/// JoinKind
///

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum JoinKind {
    Inner,
    Left,
}

///
/// FromJoin
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FromJoin {
    pub kind: JoinKind,
    pub table: FromTable,
    pub on: Condition,
}

///
/// FromItem
/// A root table and the joins chained onto it.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FromItem {
    pub table: FromTable,
    pub joins: Vec<FromJoin>,
}

impl FromItem {
    #[must_use]
    pub const fn new(table: FromTable) -> Self {
        Self {
            table,
            joins: Vec::new(),
        }
    }
}

///
/// ScalarFunction
///

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum ScalarFunction {
    Concat,
    Substring,
    Trim(TrimSpec),
    Upper,
    Lower,
    Length,
    Locate,
    Abs,
    Sqrt,
    Mod,
    CurrentDate,
    CurrentTime,
    CurrentTimestamp,
}

impl ScalarFunction {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Concat => "CONCAT",
            Self::Substring => "SUBSTRING",
            Self::Trim(_) => "TRIM",
            Self::Upper => "UPPER",
            Self::Lower => "LOWER",
            Self::Length => "LENGTH",
            Self::Locate => "LOCATE",
            Self::Abs => "ABS",
            Self::Sqrt => "SQRT",
            Self::Mod => "MOD",
            Self::CurrentDate => "CURRENT_DATE",
            Self::CurrentTime => "CURRENT_TIME",
            Self::CurrentTimestamp => "CURRENT_TIMESTAMP",
        }
    }

    /// Accepted argument counts (inclusive).
    #[must_use]
    pub const fn arity(self) -> (usize, usize) {
        match self {
            Self::Concat => (2, usize::MAX),
            Self::Substring | Self::Locate => (2, 3),
            Self::Trim(_) => (1, 2),
            Self::Upper | Self::Lower | Self::Length | Self::Abs | Self::Sqrt => (1, 1),
            Self::Mod => (2, 2),
            Self::CurrentDate | Self::CurrentTime | Self::CurrentTimestamp => (0, 0),
        }
    }
}

///
/// TrimSpec
///

#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum TrimSpec {
    #[default]
    Both,
    Leading,
    Trailing,
}

///
/// AggregateFunction
///

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum AggregateFunction {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateFunction {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Count => "COUNT",
            Self::Sum => "SUM",
            Self::Avg => "AVG",
            Self::Min => "MIN",
            Self::Max => "MAX",
        }
    }
}

///
/// ArithmeticChain
///
/// Flattened arithmetic: `first (op operand)*`, evaluated and rendered left
/// to right. Operands of tighter-binding or parenthesized sub-expressions are
/// nested chains.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ArithmeticChain {
    pub first: Box<Expr>,
    pub rest: Vec<(ArithmeticOp, Expr)>,
}

///
/// Expr
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Expr {
    Column(TableColumn),
    Literal(Value),
    /// Index into the owning statement's parameter slot list.
    Param(usize),
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
    Arithmetic(ArithmeticChain),
    Negate(Box<Self>),
    Subquery(Box<Select>),
}

impl Expr {
    #[must_use]
    pub fn column(alias: impl Into<String>, column: impl Into<String>) -> Self {
        Self::Column(TableColumn {
            alias: alias.into(),
            column: column.into(),
        })
    }

    #[must_use]
    pub fn literal(value: impl Into<Value>) -> Self {
        Self::Literal(value.into())
    }

    #[must_use]
    pub const fn is_aggregate(&self) -> bool {
        matches!(self, Self::Aggregate { .. })
    }
}

///
/// CompareOp
///

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl CompareOp {
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Gt => ">",
            Self::Gte => ">=",
        }
    }
}

///
/// Quantifier
///

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Quantifier {
    All,
    Any,
}

///
/// Condition
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Condition {
    Compare {
        left: Expr,
        op: CompareOp,
        right: Expr,
    },
    Quantified {
        left: Expr,
        op: CompareOp,
        quantifier: Quantifier,
        select: Box<Select>,
    },
    IsNull {
        expr: Expr,
        negated: bool,
    },
    Between {
        expr: Expr,
        low: Expr,
        high: Expr,
        negated: bool,
    },
    InList {
        expr: Expr,
        list: Vec<Expr>,
        negated: bool,
    },
    InSelect {
        expr: Expr,
        select: Box<Select>,
        negated: bool,
    },
    Like {
        expr: Expr,
        pattern: Expr,
        escape: Option<Expr>,
        negated: bool,
    },
    Exists {
        select: Box<Select>,
        negated: bool,
    },
    /// A boolean-valued expression used as a condition.
    Truth(Expr),
    And(Vec<Self>),
    Or(Vec<Self>),
    Not(Box<Self>),
}

impl Condition {
    #[must_use]
    pub const fn compare(left: Expr, op: CompareOp, right: Expr) -> Self {
        Self::Compare { left, op, right }
    }

    #[must_use]
    pub const fn eq(left: Expr, right: Expr) -> Self {
        Self::compare(left, CompareOp::Eq, right)
    }

    /// AND the conditions; a single condition is returned unwrapped and an
    /// empty list yields `None`.
    #[must_use]
    pub fn conjoin(mut conditions: Vec<Self>) -> Option<Self> {
        match conditions.len() {
            0 => None,
            1 => conditions.pop(),
            _ => Some(Self::And(conditions)),
        }
    }
}

///
/// OrderBy
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OrderBy {
    pub expr: Expr,
    pub descending: bool,
}

///
/// Select
///

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Select {
    pub distinct: bool,
    pub columns: Vec<Expr>,
    pub from: Vec<FromItem>,
    pub filter: Option<Condition>,
    pub group_by: Vec<Expr>,
    pub having: Option<Condition>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub lock: LockMode,
}

impl Select {
    /// Aliases declared by this select's FROM clause, joins included.
    #[must_use]
    pub fn declared_aliases(&self) -> Vec<&str> {
        let mut aliases = Vec::new();
        for item in &self.from {
            aliases.push(item.table.alias.as_str());
            aliases.extend(item.joins.iter().map(|j| j.table.alias.as_str()));
        }
        aliases
    }

    /// Check that every column reference resolves to a table declared by
    /// this select (or, for correlated sub-selects, an enclosing one).
    pub fn validate_references(&self) -> Result<(), InternalError> {
        self.validate_in(&BTreeSet::new())
    }

    fn validate_in(&self, outer: &BTreeSet<String>) -> Result<(), InternalError> {
        let mut scope = outer.clone();
        let mut seen = BTreeSet::new();
        for alias in self.declared_aliases() {
            if !seen.insert(alias) {
                return Err(InternalError::statement_invariant(format!(
                    "alias '{alias}' is declared twice in one select"
                )));
            }
            scope.insert(alias.to_string());
        }

        let mut checker = ReferenceChecker { scope: &scope };
        for item in &self.from {
            for join in &item.joins {
                checker.condition(&join.on)?;
            }
        }
        for column in &self.columns {
            checker.expr(column)?;
        }
        if let Some(filter) = &self.filter {
            checker.condition(filter)?;
        }
        for expr in &self.group_by {
            checker.expr(expr)?;
        }
        if let Some(having) = &self.having {
            checker.condition(having)?;
        }
        for order in &self.order_by {
            checker.expr(&order.expr)?;
        }

        Ok(())
    }
}

///
/// Assignment
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Assignment {
    pub column: String,
    pub value: Expr,
}

///
/// Insert
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Insert {
    pub table: String,
    pub columns: Vec<String>,
    pub values: Vec<Expr>,
    /// Identity column whose store-assigned value is returned.
    pub generated_key: Option<String>,
}

///
/// Update
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Update {
    pub table: FromTable,
    pub assignments: Vec<Assignment>,
    pub filter: Option<Condition>,
}

///
/// Delete
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Delete {
    pub table: FromTable,
    pub filter: Option<Condition>,
}

///
/// Statement
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Statement {
    Select(Select),
    Insert(Insert),
    Update(Update),
    Delete(Delete),
}

impl Statement {
    #[must_use]
    pub const fn kind(&self) -> StatementKind {
        match self {
            Self::Select(_) => StatementKind::Select,
            Self::Insert(_) => StatementKind::Insert,
            Self::Update(_) => StatementKind::Update,
            Self::Delete(_) => StatementKind::Delete,
        }
    }

    #[must_use]
    pub const fn as_select(&self) -> Option<&Select> {
        match self {
            Self::Select(select) => Some(select),
            _ => None,
        }
    }

    /// Table the statement reads from or writes to first.
    #[must_use]
    pub fn primary_table(&self) -> &str {
        match self {
            Self::Select(select) => select
                .from
                .first()
                .map_or("", |item| item.table.table.as_str()),
            Self::Insert(insert) => &insert.table,
            Self::Update(update) => &update.table.table,
            Self::Delete(delete) => &delete.table.table,
        }
    }

    /// Construction-time reference check for every statement shape.
    pub fn validate_references(&self) -> Result<(), InternalError> {
        match self {
            Self::Select(select) => select.validate_references(),
            Self::Insert(insert) => {
                let scope = BTreeSet::new();
                let mut checker = ReferenceChecker { scope: &scope };
                for value in &insert.values {
                    checker.expr(value)?;
                }
                Ok(())
            }
            Self::Update(update) => {
                let scope = BTreeSet::from([update.table.alias.clone()]);
                let mut checker = ReferenceChecker { scope: &scope };
                for assignment in &update.assignments {
                    checker.expr(&assignment.value)?;
                }
                if let Some(filter) = &update.filter {
                    checker.condition(filter)?;
                }
                Ok(())
            }
            Self::Delete(delete) => {
                let scope = BTreeSet::from([delete.table.alias.clone()]);
                let mut checker = ReferenceChecker { scope: &scope };
                if let Some(filter) = &delete.filter {
                    checker.condition(filter)?;
                }
                Ok(())
            }
        }
    }
}

///
/// StatementKind
///

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
}

// Walks expressions and conditions; nested selects are validated with the
// current scope as their outer scope.
struct ReferenceChecker<'a> {
    scope: &'a BTreeSet<String>,
}

impl ReferenceChecker<'_> {
    fn expr(&mut self, expr: &Expr) -> Result<(), InternalError> {
        match expr {
            Expr::Column(column) => {
                if self.scope.contains(&column.alias) {
                    Ok(())
                } else {
                    Err(InternalError::statement_invariant(format!(
                        "column {}.{} references an undeclared table alias",
                        column.alias, column.column
                    )))
                }
            }
            Expr::Literal(_) | Expr::Param(_) => Ok(()),
            Expr::Function { args, .. } => args.iter().try_for_each(|a| self.expr(a)),
            Expr::Aggregate { arg, .. } => arg.as_deref().map_or(Ok(()), |a| self.expr(a)),
            Expr::Arithmetic(chain) => {
                self.expr(&chain.first)?;
                chain.rest.iter().try_for_each(|(_, e)| self.expr(e))
            }
            Expr::Negate(inner) => self.expr(inner),
            Expr::Subquery(select) => select.validate_in(self.scope),
        }
    }

    fn condition(&mut self, condition: &Condition) -> Result<(), InternalError> {
        match condition {
            Condition::Compare { left, right, .. } => {
                self.expr(left)?;
                self.expr(right)
            }
            Condition::Quantified { left, select, .. } => {
                self.expr(left)?;
                select.validate_in(self.scope)
            }
            Condition::IsNull { expr, .. } | Condition::Truth(expr) => self.expr(expr),
            Condition::Between {
                expr, low, high, ..
            } => {
                self.expr(expr)?;
                self.expr(low)?;
                self.expr(high)
            }
            Condition::InList { expr, list, .. } => {
                self.expr(expr)?;
                list.iter().try_for_each(|e| self.expr(e))
            }
            Condition::InSelect { expr, select, .. } => {
                self.expr(expr)?;
                select.validate_in(self.scope)
            }
            Condition::Like {
                expr,
                pattern,
                escape,
                ..
            } => {
                self.expr(expr)?;
                self.expr(pattern)?;
                escape.as_ref().map_or(Ok(()), |e| self.expr(e))
            }
            Condition::Exists { select, .. } => select.validate_in(self.scope),
            Condition::And(parts) | Condition::Or(parts) => {
                parts.iter().try_for_each(|c| self.condition(c))
            }
            Condition::Not(inner) => self.condition(inner),
        }
    }
}
