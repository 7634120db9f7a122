//! Reference renderers: statement tree → dialect-specific SQL text.
//!
//! Rendering is pure. The same statement always renders to the same text, so
//! rendered text doubles as the statement's structural fingerprint.

use crate::{
    db::sql::{
        ArithmeticChain, Condition, Delete, Expr, FromItem, Insert, JoinKind, LockMode, Quantifier,
        ScalarFunction, Select, Statement, TableColumn, TrimSpec, Update,
    },
    value::Value,
};
use serde::{Deserialize, Serialize};
use std::{fmt, fmt::Write as _, sync::Arc};

const RESERVED: &[&str] = &[
    "all", "and", "as", "between", "by", "case", "check", "column", "constraint", "create",
    "default", "delete", "distinct", "else", "end", "exists", "false", "for", "from", "grant",
    "group", "having", "in", "insert", "into", "is", "join", "key", "like", "limit", "not", "null",
    "offset", "on", "or", "order", "primary", "references", "select", "set", "table", "then", "to",
    "true", "union", "unique", "update", "user", "using", "values", "when", "where", "with",
];

///
/// Dialect
///
/// Store-specific syntax differences. Implementations must not change the
/// meaning of a statement, only its spelling.
///

pub trait Dialect: fmt::Debug + Send + Sync {
    fn name(&self) -> &'static str;

    /// Placeholder for the `position`-th bound value (1-based).
    fn placeholder(&self, position: usize) -> String;

    fn lock_clause(&self, lock: LockMode) -> Option<&'static str>;

    /// Whether UPDATE/DELETE accept a table alias.
    fn supports_dml_alias(&self) -> bool;

    /// Clause appended to an identity insert to return the generated key.
    fn returning_clause(&self, column: &str) -> Option<String>;

    fn sequence_next_value(&self, sequence: &str) -> String;

    fn quote_identifier(&self, ident: &str) -> String {
        if RESERVED.contains(&ident.to_ascii_lowercase().as_str()) {
            format!("\"{ident}\"")
        } else {
            ident.to_string()
        }
    }

    fn render_function(&self, function: ScalarFunction, args: &[String]) -> String {
        match (function, args) {
            (
                ScalarFunction::CurrentDate
                | ScalarFunction::CurrentTime
                | ScalarFunction::CurrentTimestamp,
                _,
            ) => function.name().to_string(),
            (ScalarFunction::Substring, [s, start]) => format!("SUBSTRING({s} FROM {start})"),
            (ScalarFunction::Substring, [s, start, len]) => {
                format!("SUBSTRING({s} FROM {start} FOR {len})")
            }
            (ScalarFunction::Trim(spec), [s]) => format!("TRIM({} FROM {s})", trim_word(spec)),
            (ScalarFunction::Trim(spec), [s, ch]) => {
                format!("TRIM({} {ch} FROM {s})", trim_word(spec))
            }
            _ => format!("{}({})", function.name(), args.join(", ")),
        }
    }
}

const fn trim_word(spec: TrimSpec) -> &'static str {
    match spec {
        TrimSpec::Both => "BOTH",
        TrimSpec::Leading => "LEADING",
        TrimSpec::Trailing => "TRAILING",
    }
}

///
/// AnsiDialect
///

#[derive(Clone, Copy, Debug, Default)]
pub struct AnsiDialect;

impl Dialect for AnsiDialect {
    fn name(&self) -> &'static str {
        "ansi"
    }

    fn placeholder(&self, _position: usize) -> String {
        "?".to_string()
    }

    fn lock_clause(&self, lock: LockMode) -> Option<&'static str> {
        match lock {
            LockMode::None => None,
            LockMode::Read => Some("FOR READ ONLY"),
            LockMode::Write => Some("FOR UPDATE"),
        }
    }

    fn supports_dml_alias(&self) -> bool {
        false
    }

    fn returning_clause(&self, _column: &str) -> Option<String> {
        None
    }

    fn sequence_next_value(&self, sequence: &str) -> String {
        format!("NEXT VALUE FOR {sequence}")
    }
}

///
/// PostgresDialect
///

#[derive(Clone, Copy, Debug, Default)]
pub struct PostgresDialect;

impl Dialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn placeholder(&self, position: usize) -> String {
        format!("${position}")
    }

    fn lock_clause(&self, lock: LockMode) -> Option<&'static str> {
        match lock {
            LockMode::None => None,
            LockMode::Read => Some("FOR SHARE"),
            LockMode::Write => Some("FOR UPDATE"),
        }
    }

    fn supports_dml_alias(&self) -> bool {
        true
    }

    fn returning_clause(&self, column: &str) -> Option<String> {
        Some(format!("RETURNING {}", self.quote_identifier(column)))
    }

    fn sequence_next_value(&self, sequence: &str) -> String {
        format!("nextval('{sequence}')")
    }

    fn render_function(&self, function: ScalarFunction, args: &[String]) -> String {
        match (function, args) {
            (ScalarFunction::Locate, [needle, haystack]) => {
                format!("POSITION({needle} IN {haystack})")
            }
            (ScalarFunction::Length, [s]) => format!("CHAR_LENGTH({s})"),
            _ => AnsiDialect.render_function(function, args),
        }
    }
}

///
/// DialectKind
/// Configuration-facing selector for the built-in dialects.
///

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DialectKind {
    #[default]
    Ansi,
    Postgres,
}

impl DialectKind {
    #[must_use]
    pub fn dialect(self) -> Arc<dyn Dialect> {
        match self {
            Self::Ansi => Arc::new(AnsiDialect),
            Self::Postgres => Arc::new(PostgresDialect),
        }
    }
}

///
/// RenderedSql
///
/// Statement text plus the parameter-slot index behind each placeholder, in
/// placeholder order (a slot used twice appears twice).
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RenderedSql {
    pub sql: String,
    pub bind_order: Vec<usize>,
}

impl RenderedSql {
    /// Arrange slot values into placeholder order.
    #[must_use]
    pub fn bind_values(&self, slot_values: &[Value]) -> Vec<Value> {
        self.bind_order
            .iter()
            .map(|&i| slot_values.get(i).cloned().unwrap_or(Value::Null))
            .collect()
    }
}

///
/// SqlRenderer
///

pub struct SqlRenderer<'d> {
    dialect: &'d dyn Dialect,
    out: String,
    bind_order: Vec<usize>,
    // alias rendered unqualified (DML on dialects without alias support)
    strip_alias: Option<String>,
}

impl<'d> SqlRenderer<'d> {
    #[must_use]
    pub fn new(dialect: &'d dyn Dialect) -> Self {
        Self {
            dialect,
            out: String::new(),
            bind_order: Vec::new(),
            strip_alias: None,
        }
    }

    /// Render one statement.
    #[must_use]
    pub fn render(dialect: &'d dyn Dialect, statement: &Statement) -> RenderedSql {
        let mut renderer = Self::new(dialect);
        match statement {
            Statement::Select(select) => renderer.select(select),
            Statement::Insert(insert) => renderer.insert(insert),
            Statement::Update(update) => renderer.update(update),
            Statement::Delete(delete) => renderer.delete(delete),
        }

        RenderedSql {
            sql: renderer.out,
            bind_order: renderer.bind_order,
        }
    }

    fn push(&mut self, s: &str) {
        self.out.push_str(s);
    }

    fn ident(&mut self, ident: &str) {
        let quoted = self.dialect.quote_identifier(ident);
        self.push(&quoted);
    }

    fn select(&mut self, select: &Select) {
        self.push("SELECT ");
        if select.distinct {
            self.push("DISTINCT ");
        }
        for (i, column) in select.columns.iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            self.expr(column);
        }

        self.push(" FROM ");
        for (i, item) in select.from.iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            self.from_item(item);
        }

        if let Some(filter) = &select.filter {
            self.push(" WHERE ");
            self.condition(filter);
        }
        if !select.group_by.is_empty() {
            self.push(" GROUP BY ");
            for (i, expr) in select.group_by.iter().enumerate() {
                if i > 0 {
                    self.push(", ");
                }
                self.expr(expr);
            }
        }
        if let Some(having) = &select.having {
            self.push(" HAVING ");
            self.condition(having);
        }
        if !select.order_by.is_empty() {
            self.push(" ORDER BY ");
            for (i, order) in select.order_by.iter().enumerate() {
                if i > 0 {
                    self.push(", ");
                }
                self.expr(&order.expr);
                self.push(if order.descending { " DESC" } else { " ASC" });
            }
        }
        if let Some(limit) = select.limit {
            let _ = write!(self.out, " LIMIT {limit}");
        }
        if let Some(offset) = select.offset {
            let _ = write!(self.out, " OFFSET {offset}");
        }
        if let Some(clause) = self.dialect.lock_clause(select.lock) {
            self.push(" ");
            self.push(clause);
        }
    }

    fn from_item(&mut self, item: &FromItem) {
        self.ident(&item.table.table);
        self.push(" ");
        self.push(&item.table.alias);

        for join in &item.joins {
            self.push(match join.kind {
                JoinKind::Inner => " INNER JOIN ",
                JoinKind::Left => " LEFT OUTER JOIN ",
            });
            self.ident(&join.table.table);
            self.push(" ");
            self.push(&join.table.alias);
            self.push(" ON ");
            self.condition(&join.on);
        }
    }

    fn insert(&mut self, insert: &Insert) {
        self.push("INSERT INTO ");
        self.ident(&insert.table);
        self.push(" (");
        for (i, column) in insert.columns.iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            self.ident(column);
        }
        self.push(") VALUES (");
        for (i, value) in insert.values.iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            self.expr(value);
        }
        self.push(")");

        if let Some(column) = &insert.generated_key
            && let Some(clause) = self.dialect.returning_clause(column)
        {
            self.push(" ");
            self.push(&clause);
        }
    }

    fn update(&mut self, update: &Update) {
        self.push("UPDATE ");
        self.ident(&update.table.table);
        self.dml_alias(&update.table.alias);

        self.push(" SET ");
        for (i, assignment) in update.assignments.iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            self.ident(&assignment.column);
            self.push(" = ");
            self.expr(&assignment.value);
        }
        if let Some(filter) = &update.filter {
            self.push(" WHERE ");
            self.condition(filter);
        }
    }

    fn delete(&mut self, delete: &Delete) {
        self.push("DELETE FROM ");
        self.ident(&delete.table.table);
        self.dml_alias(&delete.table.alias);

        if let Some(filter) = &delete.filter {
            self.push(" WHERE ");
            self.condition(filter);
        }
    }

    fn dml_alias(&mut self, alias: &str) {
        if self.dialect.supports_dml_alias() {
            self.push(" ");
            self.push(alias);
        } else {
            self.strip_alias = Some(alias.to_string());
        }
    }

    fn column(&mut self, column: &TableColumn) {
        if self.strip_alias.as_deref() != Some(column.alias.as_str()) {
            self.push(&column.alias);
            self.push(".");
        }
        self.ident(&column.column);
    }

    fn literal(&mut self, value: &Value) {
        match value {
            Value::Bool(true) => self.push("TRUE"),
            Value::Bool(false) => self.push("FALSE"),
            other => {
                let _ = write!(self.out, "{other}");
            }
        }
    }

    fn expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Column(column) => self.column(column),
            Expr::Literal(value) => self.literal(value),
            Expr::Param(index) => {
                self.bind_order.push(*index);
                let placeholder = self.dialect.placeholder(self.bind_order.len());
                self.push(&placeholder);
            }
            Expr::Function { function, args } => {
                let rendered: Vec<String> = args.iter().map(|a| self.sub_expr(a)).collect();
                let text = self.dialect.render_function(*function, &rendered);
                self.push(&text);
            }
            Expr::Aggregate {
                function,
                distinct,
                arg,
            } => {
                self.push(function.name());
                self.push("(");
                if *distinct {
                    self.push("DISTINCT ");
                }
                match arg {
                    Some(arg) => self.expr(arg),
                    None => self.push("*"),
                }
                self.push(")");
            }
            Expr::Arithmetic(chain) => self.arithmetic(chain),
            Expr::Negate(inner) => {
                self.push("-");
                self.operand(inner);
            }
            Expr::Subquery(select) => {
                self.push("(");
                self.select(select);
                self.push(")");
            }
        }
    }

    // Render into a scratch string while keeping bind order global.
    fn sub_expr(&mut self, expr: &Expr) -> String {
        let saved = std::mem::take(&mut self.out);
        self.expr(expr);
        std::mem::replace(&mut self.out, saved)
    }

    fn arithmetic(&mut self, chain: &ArithmeticChain) {
        self.operand(&chain.first);
        for (op, operand) in &chain.rest {
            self.push(" ");
            self.push(op.symbol());
            self.push(" ");
            self.operand(operand);
        }
    }

    fn operand(&mut self, expr: &Expr) {
        if matches!(expr, Expr::Arithmetic(_)) {
            self.push("(");
            self.expr(expr);
            self.push(")");
        } else {
            self.expr(expr);
        }
    }

    fn condition(&mut self, condition: &Condition) {
        match condition {
            Condition::Compare { left, op, right } => {
                self.expr(left);
                self.push(" ");
                self.push(op.symbol());
                self.push(" ");
                self.expr(right);
            }
            Condition::Quantified {
                left,
                op,
                quantifier,
                select,
            } => {
                self.expr(left);
                self.push(" ");
                self.push(op.symbol());
                self.push(match quantifier {
                    Quantifier::All => " ALL (",
                    Quantifier::Any => " ANY (",
                });
                self.select(select);
                self.push(")");
            }
            Condition::IsNull { expr, negated } => {
                self.expr(expr);
                self.push(if *negated { " IS NOT NULL" } else { " IS NULL" });
            }
            Condition::Between {
                expr,
                low,
                high,
                negated,
            } => {
                self.expr(expr);
                self.push(if *negated { " NOT BETWEEN " } else { " BETWEEN " });
                self.expr(low);
                self.push(" AND ");
                self.expr(high);
            }
            Condition::InList {
                expr,
                list,
                negated,
            } => {
                self.expr(expr);
                self.push(if *negated { " NOT IN (" } else { " IN (" });
                for (i, item) in list.iter().enumerate() {
                    if i > 0 {
                        self.push(", ");
                    }
                    self.expr(item);
                }
                self.push(")");
            }
            Condition::InSelect {
                expr,
                select,
                negated,
            } => {
                self.expr(expr);
                self.push(if *negated { " NOT IN (" } else { " IN (" });
                self.select(select);
                self.push(")");
            }
            Condition::Like {
                expr,
                pattern,
                escape,
                negated,
            } => {
                self.expr(expr);
                self.push(if *negated { " NOT LIKE " } else { " LIKE " });
                self.expr(pattern);
                if let Some(escape) = escape {
                    self.push(" ESCAPE ");
                    self.expr(escape);
                }
            }
            Condition::Exists { select, negated } => {
                self.push(if *negated { "NOT EXISTS (" } else { "EXISTS (" });
                self.select(select);
                self.push(")");
            }
            Condition::Truth(expr) => self.expr(expr),
            Condition::And(parts) => self.junction(parts, " AND "),
            Condition::Or(parts) => self.junction(parts, " OR "),
            Condition::Not(inner) => {
                self.push("NOT (");
                self.condition(inner);
                self.push(")");
            }
        }
    }

    fn junction(&mut self, parts: &[Condition], separator: &str) {
        for (i, part) in parts.iter().enumerate() {
            if i > 0 {
                self.push(separator);
            }
            if matches!(part, Condition::And(_) | Condition::Or(_)) {
                self.push("(");
                self.condition(part);
                self.push(")");
            } else {
                self.condition(part);
            }
        }
    }
}
