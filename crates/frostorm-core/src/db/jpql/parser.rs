//! Recursive-descent JPQL parser.
//!
//! Precedence, loosest first: OR, AND, NOT, predicates (comparison,
//! BETWEEN, IN, LIKE, IS, MEMBER OF), additive, multiplicative, unary sign,
//! primary.

use crate::{
    db::{
        jpql::{
            ast::{
                DeleteStatement, Expression, FromDeclaration, JoinDeclaration, JoinType,
                OrderItem, PathExpression, QueryStatement, RangeDeclaration, SelectItem,
                SelectStatement, UpdateAssignment, UpdateStatement,
            },
            lexer::{Lexer, Token, TokenKind, syntax},
        },
        sql::{AggregateFunction, CompareOp, ParamSlot, Quantifier, ScalarFunction, TrimSpec},
    },
    error::SemanticError,
    value::{ArithmeticOp, Value},
};

// Words that end an identifier position (alias, result variable, path root).
const RESERVED: &[&str] = &[
    "ALL", "AND", "ANY", "AS", "ASC", "BETWEEN", "BY", "DELETE", "DESC", "DISTINCT", "EMPTY",
    "ESCAPE", "EXISTS", "FALSE", "FETCH", "FROM", "GROUP", "HAVING", "IN", "INNER", "IS", "JOIN",
    "LEFT", "LIKE", "MEMBER", "NOT", "NULL", "OF", "OR", "ORDER", "OUTER", "SELECT", "SET", "SOME",
    "TRUE", "UPDATE", "WHERE",
];

/// Parse one JPQL statement.
pub fn parse(text: &str) -> Result<QueryStatement, SemanticError> {
    let tokens = Lexer::new(text).tokenize()?;
    let mut parser = Parser { tokens, pos: 0 };
    let statement = parser.statement()?;
    parser.expect_eof()?;

    Ok(statement)
}

///
/// Parser
///

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    // ---------------------------------------------------------------------
    // token plumbing
    // ---------------------------------------------------------------------

    fn peek(&self) -> &Token {
        let last = self.tokens.len().saturating_sub(1);
        &self.tokens[self.pos.min(last)]
    }

    fn peek_at(&self, ahead: usize) -> &Token {
        let last = self.tokens.len().saturating_sub(1);
        &self.tokens[(self.pos + ahead).min(last)]
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if token.kind != TokenKind::Eof {
            self.pos += 1;
        }
        token
    }

    fn at_keyword(&self, keyword: &str) -> bool {
        self.peek().is_keyword(keyword)
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.at_keyword(keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<(), SemanticError> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("expected {keyword}")))
        }
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if &self.peek().kind == kind {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind) -> Result<(), SemanticError> {
        if self.eat(kind) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("expected {kind}")))
        }
    }

    fn expect_eof(&self) -> Result<(), SemanticError> {
        if self.peek().kind == TokenKind::Eof {
            Ok(())
        } else {
            Err(self.unexpected("expected end of statement"))
        }
    }

    fn unexpected(&self, message: &str) -> SemanticError {
        let token = self.peek();
        syntax(token.offset, format!("{message}, found {}", token.kind))
    }

    // Any word, keyword or not (entity names, path segments).
    fn word(&mut self) -> Result<String, SemanticError> {
        match &self.peek().kind {
            TokenKind::Word(w) => {
                let w = w.clone();
                self.pos += 1;
                Ok(w)
            }
            _ => Err(self.unexpected("expected a name")),
        }
    }

    fn at_identifier(&self) -> bool {
        matches!(&self.peek().kind, TokenKind::Word(w) if !is_reserved(w))
    }

    fn identifier(&mut self) -> Result<String, SemanticError> {
        if self.at_identifier() {
            self.word()
        } else {
            Err(self.unexpected("expected an identifier"))
        }
    }

    // `[AS] ident`, optional when no identifier follows.
    fn optional_alias(&mut self) -> Result<Option<String>, SemanticError> {
        if self.eat_keyword("AS") {
            return self.identifier().map(Some);
        }
        if self.at_identifier() {
            return self.word().map(Some);
        }
        Ok(None)
    }

    // ---------------------------------------------------------------------
    // statements
    // ---------------------------------------------------------------------

    fn statement(&mut self) -> Result<QueryStatement, SemanticError> {
        if self.at_keyword("SELECT") {
            return self.select().map(QueryStatement::Select);
        }
        if self.at_keyword("UPDATE") {
            return self.update().map(QueryStatement::Update);
        }
        if self.at_keyword("DELETE") {
            return self.delete().map(QueryStatement::Delete);
        }

        Err(self.unexpected("expected SELECT, UPDATE or DELETE"))
    }

    fn select(&mut self) -> Result<SelectStatement, SemanticError> {
        self.expect_keyword("SELECT")?;
        let distinct = self.eat_keyword("DISTINCT");

        let mut items = vec![self.select_item()?];
        while self.eat(&TokenKind::Comma) {
            items.push(self.select_item()?);
        }

        self.expect_keyword("FROM")?;
        let mut from = vec![self.from_declaration()?];
        while self.eat(&TokenKind::Comma) {
            from.push(self.from_declaration()?);
        }

        let filter = if self.eat_keyword("WHERE") {
            Some(self.condition()?)
        } else {
            None
        };

        let mut group_by = Vec::new();
        if self.eat_keyword("GROUP") {
            self.expect_keyword("BY")?;
            group_by.push(self.additive()?);
            while self.eat(&TokenKind::Comma) {
                group_by.push(self.additive()?);
            }
        }

        let having = if self.eat_keyword("HAVING") {
            Some(self.condition()?)
        } else {
            None
        };

        let mut order_by = Vec::new();
        if self.eat_keyword("ORDER") {
            self.expect_keyword("BY")?;
            loop {
                let expr = self.additive()?;
                let descending = if self.eat_keyword("DESC") {
                    true
                } else {
                    self.eat_keyword("ASC");
                    false
                };
                order_by.push(OrderItem { expr, descending });
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }

        Ok(SelectStatement {
            distinct,
            items,
            from,
            filter,
            group_by,
            having,
            order_by,
        })
    }

    fn select_item(&mut self) -> Result<SelectItem, SemanticError> {
        if self.at_keyword("NEW") && self.peek_at(1).kind != TokenKind::Dot {
            return Err(SemanticError::Unsupported {
                construct: "constructor expressions".to_string(),
            });
        }
        let expr = self.additive()?;
        let result_variable = self.optional_alias()?;

        Ok(SelectItem {
            expr,
            result_variable,
        })
    }

    fn from_declaration(&mut self) -> Result<FromDeclaration, SemanticError> {
        if self.at_keyword("IN") && self.peek_at(1).kind == TokenKind::LParen {
            self.pos += 2;
            let path = self.path()?;
            self.expect(&TokenKind::RParen)?;
            self.eat_keyword("AS");
            let alias = self.identifier()?;
            return Ok(FromDeclaration::CollectionMember { path, alias });
        }

        let entity = self.word()?;
        self.eat_keyword("AS");
        let alias = self.identifier()?;

        let mut joins = Vec::new();
        while let Some(join_type) = self.join_type()? {
            let fetch = self.eat_keyword("FETCH");
            let path = self.path()?;
            if path.segments.is_empty() {
                return Err(self.unexpected("join path must navigate from an alias"));
            }
            let alias = self.optional_alias()?;
            if alias.is_none() && !fetch {
                return Err(self.unexpected("expected an alias for the joined path"));
            }
            joins.push(JoinDeclaration {
                join_type,
                fetch,
                path,
                alias,
            });
        }

        Ok(FromDeclaration::Range(RangeDeclaration {
            entity,
            alias,
            joins,
        }))
    }

    fn join_type(&mut self) -> Result<Option<JoinType>, SemanticError> {
        if self.eat_keyword("JOIN") {
            return Ok(Some(JoinType::Inner));
        }
        if self.eat_keyword("INNER") {
            self.expect_keyword("JOIN")?;
            return Ok(Some(JoinType::Inner));
        }
        if self.eat_keyword("LEFT") {
            self.eat_keyword("OUTER");
            self.expect_keyword("JOIN")?;
            return Ok(Some(JoinType::Left));
        }
        Ok(None)
    }

    fn update(&mut self) -> Result<UpdateStatement, SemanticError> {
        self.expect_keyword("UPDATE")?;
        let entity = self.word()?;
        let alias = self.optional_alias()?;
        self.expect_keyword("SET")?;

        let mut assignments = Vec::new();
        loop {
            let path = self.path()?;
            self.expect(&TokenKind::Eq)?;
            let value = self.additive()?;
            assignments.push(UpdateAssignment { path, value });
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }

        let filter = if self.eat_keyword("WHERE") {
            Some(self.condition()?)
        } else {
            None
        };

        Ok(UpdateStatement {
            entity,
            alias,
            assignments,
            filter,
        })
    }

    fn delete(&mut self) -> Result<DeleteStatement, SemanticError> {
        self.expect_keyword("DELETE")?;
        self.expect_keyword("FROM")?;
        let entity = self.word()?;
        let alias = self.optional_alias()?;
        let filter = if self.eat_keyword("WHERE") {
            Some(self.condition()?)
        } else {
            None
        };

        Ok(DeleteStatement {
            entity,
            alias,
            filter,
        })
    }

    // ---------------------------------------------------------------------
    // conditions
    // ---------------------------------------------------------------------

    fn condition(&mut self) -> Result<Expression, SemanticError> {
        let mut parts = vec![self.conjunction()?];
        while self.eat_keyword("OR") {
            parts.push(self.conjunction()?);
        }

        Ok(if parts.len() == 1 {
            parts.remove(0)
        } else {
            Expression::Or(parts)
        })
    }

    fn conjunction(&mut self) -> Result<Expression, SemanticError> {
        let mut parts = vec![self.negation()?];
        while self.eat_keyword("AND") {
            parts.push(self.negation()?);
        }

        Ok(if parts.len() == 1 {
            parts.remove(0)
        } else {
            Expression::And(parts)
        })
    }

    fn negation(&mut self) -> Result<Expression, SemanticError> {
        if self.at_keyword("NOT") && !self.peek_at(1).is_keyword("EXISTS") {
            self.pos += 1;
            return Ok(Expression::Not(Box::new(self.negation()?)));
        }
        self.predicate()
    }

    fn predicate(&mut self) -> Result<Expression, SemanticError> {
        if self.at_keyword("EXISTS")
            || (self.at_keyword("NOT") && self.peek_at(1).is_keyword("EXISTS"))
        {
            let negated = self.eat_keyword("NOT");
            self.expect_keyword("EXISTS")?;
            let subquery = self.subquery()?;
            return Ok(Expression::Exists { subquery, negated });
        }

        let left = self.additive()?;

        if let Some(op) = self.compare_op() {
            let quantifier = if self.eat_keyword("ALL") {
                Some(Quantifier::All)
            } else if self.eat_keyword("ANY") || self.eat_keyword("SOME") {
                Some(Quantifier::Any)
            } else {
                None
            };
            if let Some(quantifier) = quantifier {
                let subquery = self.subquery()?;
                return Ok(Expression::Quantified {
                    left: Box::new(left),
                    op,
                    quantifier,
                    subquery,
                });
            }
            let right = self.additive()?;
            return Ok(Expression::compare(left, op, right));
        }

        if self.eat_keyword("IS") {
            let negated = self.eat_keyword("NOT");
            if self.eat_keyword("NULL") {
                return Ok(Expression::IsNull {
                    expr: Box::new(left),
                    negated,
                });
            }
            if self.eat_keyword("EMPTY") {
                let Expression::Path(path) = left else {
                    return Err(self.unexpected("IS EMPTY requires a collection path"));
                };
                return Ok(Expression::IsEmpty { path, negated });
            }
            return Err(self.unexpected("expected NULL or EMPTY"));
        }

        let negated = self.at_keyword("NOT")
            && ["BETWEEN", "IN", "LIKE", "MEMBER"]
                .iter()
                .any(|k| self.peek_at(1).is_keyword(k));
        if negated {
            self.pos += 1;
        }

        if self.eat_keyword("BETWEEN") {
            let low = self.additive()?;
            self.expect_keyword("AND")?;
            let high = self.additive()?;
            return Ok(Expression::Between {
                expr: Box::new(left),
                low: Box::new(low),
                high: Box::new(high),
                negated,
            });
        }

        if self.eat_keyword("IN") {
            self.expect(&TokenKind::LParen)?;
            if self.at_keyword("SELECT") {
                let subquery = Box::new(self.select()?);
                self.expect(&TokenKind::RParen)?;
                return Ok(Expression::InSubquery {
                    expr: Box::new(left),
                    subquery,
                    negated,
                });
            }
            let mut list = vec![self.additive()?];
            while self.eat(&TokenKind::Comma) {
                list.push(self.additive()?);
            }
            self.expect(&TokenKind::RParen)?;
            return Ok(Expression::InList {
                expr: Box::new(left),
                list,
                negated,
            });
        }

        if self.eat_keyword("LIKE") {
            let pattern = self.additive()?;
            let escape = if self.eat_keyword("ESCAPE") {
                Some(Box::new(self.primary()?))
            } else {
                None
            };
            return Ok(Expression::Like {
                expr: Box::new(left),
                pattern: Box::new(pattern),
                escape,
                negated,
            });
        }

        if self.eat_keyword("MEMBER") {
            self.eat_keyword("OF");
            let path = self.path()?;
            return Ok(Expression::MemberOf {
                expr: Box::new(left),
                path,
                negated,
            });
        }

        if negated {
            return Err(self.unexpected("expected BETWEEN, IN, LIKE or MEMBER after NOT"));
        }

        Ok(left)
    }

    fn compare_op(&mut self) -> Option<CompareOp> {
        let op = match self.peek().kind {
            TokenKind::Eq => CompareOp::Eq,
            TokenKind::Ne => CompareOp::Ne,
            TokenKind::Lt => CompareOp::Lt,
            TokenKind::Lte => CompareOp::Lte,
            TokenKind::Gt => CompareOp::Gt,
            TokenKind::Gte => CompareOp::Gte,
            _ => return None,
        };
        self.pos += 1;
        Some(op)
    }

    fn subquery(&mut self) -> Result<Box<SelectStatement>, SemanticError> {
        self.expect(&TokenKind::LParen)?;
        let select = self.select()?;
        self.expect(&TokenKind::RParen)?;

        Ok(Box::new(select))
    }

    // ---------------------------------------------------------------------
    // arithmetic
    // ---------------------------------------------------------------------

    fn additive(&mut self) -> Result<Expression, SemanticError> {
        let first = self.multiplicative()?;
        let mut rest = Vec::new();
        loop {
            let op = match self.peek().kind {
                TokenKind::Plus => ArithmeticOp::Add,
                TokenKind::Minus => ArithmeticOp::Sub,
                _ => break,
            };
            self.pos += 1;
            rest.push((op, self.multiplicative()?));
        }

        Ok(chain(first, rest))
    }

    fn multiplicative(&mut self) -> Result<Expression, SemanticError> {
        let first = self.unary()?;
        let mut rest = Vec::new();
        loop {
            let op = match self.peek().kind {
                TokenKind::Star => ArithmeticOp::Mul,
                TokenKind::Slash => ArithmeticOp::Div,
                _ => break,
            };
            self.pos += 1;
            rest.push((op, self.unary()?));
        }

        Ok(chain(first, rest))
    }

    fn unary(&mut self) -> Result<Expression, SemanticError> {
        if self.eat(&TokenKind::Minus) {
            // i64::MIN has no positive literal
            if let TokenKind::Integer(v) = self.peek().kind
                && v == i64::MIN.unsigned_abs()
            {
                self.pos += 1;
                return Ok(Expression::Literal(Value::Int(i64::MIN)));
            }
            let operand = self.unary()?;
            return Ok(match operand {
                Expression::Literal(Value::Int(v)) => Expression::Literal(Value::Int(-v)),
                Expression::Literal(Value::Float(v)) => Expression::Literal(Value::Float(-v)),
                other => Expression::Negate(Box::new(other)),
            });
        }
        if self.eat(&TokenKind::Plus) {
            return self.unary();
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expression, SemanticError> {
        let token = self.peek().clone();
        match &token.kind {
            TokenKind::LParen => {
                self.pos += 1;
                if self.at_keyword("SELECT") {
                    let select = self.select()?;
                    self.expect(&TokenKind::RParen)?;
                    return Ok(Expression::Subquery(Box::new(select)));
                }
                let inner = self.condition()?;
                self.expect(&TokenKind::RParen)?;
                Ok(inner)
            }
            TokenKind::Integer(v) => {
                self.pos += 1;
                i64::try_from(*v)
                    .map(|v| Expression::Literal(Value::Int(v)))
                    .map_err(|_| {
                        syntax(token.offset, format!("integer literal {v} is out of range"))
                    })
            }
            TokenKind::Decimal(text) => {
                self.pos += 1;
                let v = text
                    .parse::<f64>()
                    .map_err(|_| syntax(token.offset, format!("invalid number {text}")))?;
                if !v.is_finite() {
                    return Err(syntax(
                        token.offset,
                        format!("decimal literal {text} is out of range"),
                    ));
                }
                Ok(Expression::Literal(Value::Float(v)))
            }
            TokenKind::Text(s) => {
                self.pos += 1;
                Ok(Expression::Literal(Value::Text(s.clone())))
            }
            TokenKind::NamedParam(name) => {
                self.pos += 1;
                Ok(Expression::Param(ParamSlot::Named(name.clone())))
            }
            TokenKind::PositionalParam(position) => {
                self.pos += 1;
                Ok(Expression::Param(ParamSlot::Positional(*position)))
            }
            TokenKind::Word(word) => self.word_primary(word),
            _ => Err(self.unexpected("expected an expression")),
        }
    }

    fn word_primary(&mut self, word: &str) -> Result<Expression, SemanticError> {
        let upper = word.to_ascii_uppercase();
        let call = self.peek_at(1).kind == TokenKind::LParen;

        match upper.as_str() {
            "TRUE" => {
                self.pos += 1;
                return Ok(Expression::Literal(Value::Bool(true)));
            }
            "FALSE" => {
                self.pos += 1;
                return Ok(Expression::Literal(Value::Bool(false)));
            }
            "NULL" => {
                self.pos += 1;
                return Ok(Expression::Literal(Value::Null));
            }
            "CURRENT_DATE" | "CURRENT_TIME" | "CURRENT_TIMESTAMP" => {
                self.pos += 1;
                let function = match upper.as_str() {
                    "CURRENT_DATE" => ScalarFunction::CurrentDate,
                    "CURRENT_TIME" => ScalarFunction::CurrentTime,
                    _ => ScalarFunction::CurrentTimestamp,
                };
                return Ok(Expression::Function {
                    function,
                    args: Vec::new(),
                });
            }
            _ => {}
        }

        if call {
            if let Some(function) = aggregate_function(&upper) {
                return self.aggregate(function);
            }
            if upper == "SIZE" {
                self.pos += 2;
                let path = self.path()?;
                self.expect(&TokenKind::RParen)?;
                return Ok(Expression::Size(path));
            }
            if upper == "TRIM" {
                return self.trim();
            }
            if let Some(function) = scalar_function(&upper) {
                self.pos += 2;
                let mut args = Vec::new();
                if !self.eat(&TokenKind::RParen) {
                    args.push(self.additive()?);
                    while self.eat(&TokenKind::Comma) {
                        args.push(self.additive()?);
                    }
                    self.expect(&TokenKind::RParen)?;
                }
                let (min, max) = function.arity();
                if args.len() < min || args.len() > max {
                    return Err(syntax(
                        self.peek().offset,
                        format!("{} takes {min}..{max} arguments, got {}", function.name(), args.len()),
                    ));
                }
                return Ok(Expression::Function { function, args });
            }
            return Err(self.unexpected("unknown function"));
        }

        self.path().map(Expression::Path)
    }

    fn aggregate(&mut self, function: AggregateFunction) -> Result<Expression, SemanticError> {
        self.pos += 2;
        let distinct = self.eat_keyword("DISTINCT");
        let arg = if function == AggregateFunction::Count && self.eat(&TokenKind::Star) {
            None
        } else {
            Some(Box::new(self.additive()?))
        };
        self.expect(&TokenKind::RParen)?;

        Ok(Expression::Aggregate {
            function,
            distinct,
            arg,
        })
    }

    // TRIM([[LEADING|TRAILING|BOTH] [char] FROM] s)
    fn trim(&mut self) -> Result<Expression, SemanticError> {
        self.pos += 2;
        let spec = if self.eat_keyword("LEADING") {
            Some(TrimSpec::Leading)
        } else if self.eat_keyword("TRAILING") {
            Some(TrimSpec::Trailing)
        } else if self.eat_keyword("BOTH") {
            Some(TrimSpec::Both)
        } else {
            None
        };

        let mut args = Vec::new();
        if self.eat_keyword("FROM") {
            args.push(self.additive()?);
        } else {
            let first = self.additive()?;
            if self.eat_keyword("FROM") {
                let source = self.additive()?;
                args.push(source);
                args.push(first);
            } else if spec.is_some() {
                return Err(self.unexpected("expected FROM in TRIM"));
            } else {
                args.push(first);
            }
        }
        self.expect(&TokenKind::RParen)?;

        Ok(Expression::Function {
            function: ScalarFunction::Trim(spec.unwrap_or_default()),
            args,
        })
    }

    fn path(&mut self) -> Result<PathExpression, SemanticError> {
        let root = self.identifier()?;
        let mut segments = Vec::new();
        while self.eat(&TokenKind::Dot) {
            segments.push(self.word()?);
        }

        Ok(PathExpression { root, segments })
    }
}

fn is_reserved(word: &str) -> bool {
    RESERVED.iter().any(|r| r.eq_ignore_ascii_case(word))
}

fn chain(first: Expression, rest: Vec<(ArithmeticOp, Expression)>) -> Expression {
    if rest.is_empty() {
        first
    } else {
        Expression::Arithmetic {
            first: Box::new(first),
            rest,
        }
    }
}

fn aggregate_function(upper: &str) -> Option<AggregateFunction> {
    Some(match upper {
        "COUNT" => AggregateFunction::Count,
        "SUM" => AggregateFunction::Sum,
        "AVG" => AggregateFunction::Avg,
        "MIN" => AggregateFunction::Min,
        "MAX" => AggregateFunction::Max,
        _ => return None,
    })
}

fn scalar_function(upper: &str) -> Option<ScalarFunction> {
    Some(match upper {
        "CONCAT" => ScalarFunction::Concat,
        "SUBSTRING" => ScalarFunction::Substring,
        "UPPER" => ScalarFunction::Upper,
        "LOWER" => ScalarFunction::Lower,
        "LENGTH" => ScalarFunction::Length,
        "LOCATE" => ScalarFunction::Locate,
        "ABS" => ScalarFunction::Abs,
        "SQRT" => ScalarFunction::Sqrt,
        "MOD" => ScalarFunction::Mod,
        _ => return None,
    })
}
