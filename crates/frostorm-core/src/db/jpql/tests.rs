use super::{
    ast::*,
    parse, Lexer, TokenKind,
};
use crate::{
    db::sql::{AggregateFunction, CompareOp, ParamSlot, Quantifier, ScalarFunction, TrimSpec},
    error::SemanticError,
    value::{ArithmeticOp, Value},
};
use proptest::prelude::*;

fn select(text: &str) -> SelectStatement {
    match parse(text) {
        Ok(QueryStatement::Select(select)) => select,
        other => panic!("expected a select, got {other:?}"),
    }
}

fn syntax_offset(text: &str) -> usize {
    match parse(text) {
        Err(SemanticError::Syntax { offset, .. }) => offset,
        other => panic!("expected a syntax error, got {other:?}"),
    }
}

#[test]
fn lexer_distinguishes_numbers_params_and_operators() {
    let kinds: Vec<_> = Lexer::new("o.total >= 1.5e2 AND x <> :min OR ?3 != 'it''s' 7L")
        .tokenize()
        .unwrap()
        .into_iter()
        .map(|t| t.kind)
        .collect();

    assert_eq!(
        kinds,
        vec![
            TokenKind::Word("o".into()),
            TokenKind::Dot,
            TokenKind::Word("total".into()),
            TokenKind::Gte,
            TokenKind::Decimal("1.5e2".into()),
            TokenKind::Word("AND".into()),
            TokenKind::Word("x".into()),
            TokenKind::Ne,
            TokenKind::NamedParam("min".into()),
            TokenKind::Word("OR".into()),
            TokenKind::PositionalParam(3),
            TokenKind::Ne,
            TokenKind::Text("it's".into()),
            TokenKind::Integer(7),
            TokenKind::Eof,
        ]
    );
}

#[test]
fn lexer_reports_offsets() {
    let err = Lexer::new("SELECT o FROM Order o WHERE o.x = 'open").tokenize().unwrap_err();
    assert_eq!(
        err,
        SemanticError::Syntax {
            offset: 34,
            message: "unterminated string literal".into(),
        }
    );

    assert!(matches!(
        Lexer::new("a # b").tokenize(),
        Err(SemanticError::Syntax { offset: 2, .. })
    ));
}

#[test]
fn parses_the_parameterised_total_query() {
    let select = select("SELECT o FROM Order o WHERE o.total > :min");

    assert_eq!(select.items.len(), 1);
    assert_eq!(select.items[0].expr, Expression::path("o"));
    assert_eq!(
        select.from,
        vec![FromDeclaration::Range(RangeDeclaration {
            entity: "Order".into(),
            alias: "o".into(),
            joins: vec![],
        })]
    );
    assert_eq!(
        select.filter,
        Some(Expression::compare(
            Expression::path("o.total"),
            CompareOp::Gt,
            Expression::Param(ParamSlot::Named("min".into())),
        ))
    );
}

#[test]
fn keywords_are_case_insensitive() {
    assert_eq!(
        select("select o from Order as o where o.total > 5"),
        select("SELECT o FROM Order o WHERE o.total > 5")
    );
}

#[test]
fn joins_and_fetch_joins() {
    let select = select(
        "SELECT DISTINCT c FROM Customer c LEFT OUTER JOIN FETCH c.orders \
         INNER JOIN c.orders o2 JOIN o2.products p",
    );
    let FromDeclaration::Range(range) = &select.from[0] else {
        panic!("range expected");
    };

    assert!(select.distinct);
    assert_eq!(range.joins.len(), 3);
    assert_eq!(range.joins[0].join_type, JoinType::Left);
    assert!(range.joins[0].fetch);
    assert_eq!(range.joins[0].alias, None);
    assert_eq!(range.joins[1].alias.as_deref(), Some("o2"));
    assert_eq!(range.joins[2].path, PathExpression::parse_dotted("o2.products"));
}

#[test]
fn non_fetch_join_requires_alias() {
    assert!(matches!(
        parse("SELECT c FROM Customer c JOIN c.orders"),
        Err(SemanticError::Syntax { .. })
    ));
}

#[test]
fn collection_member_declaration() {
    let select = select("SELECT p FROM Order o, IN(o.products) p WHERE p.price < 3");

    assert_eq!(
        select.from[1],
        FromDeclaration::CollectionMember {
            path: PathExpression::parse_dotted("o.products"),
            alias: "p".into(),
        }
    );
}

#[test]
fn and_binds_tighter_than_or() {
    let select = select("SELECT o FROM Order o WHERE o.total > 1 OR o.total < 0 AND NOT o.status IS NULL");
    let Some(Expression::Or(parts)) = select.filter else {
        panic!("or expected");
    };

    assert_eq!(parts.len(), 2);
    let Expression::And(conjuncts) = &parts[1] else {
        panic!("and expected");
    };
    assert!(matches!(&conjuncts[1], Expression::Not(inner) if matches!(**inner, Expression::IsNull { negated: false, .. })));
}

#[test]
fn arithmetic_precedence_groups_levels() {
    let select = select("SELECT o.total + 2 * 3 - -o.total FROM Order o");
    let Expression::Arithmetic { first, rest } = &select.items[0].expr else {
        panic!("arithmetic expected");
    };

    assert_eq!(**first, Expression::path("o.total"));
    assert_eq!(rest.len(), 2);
    assert_eq!(rest[0].0, ArithmeticOp::Add);
    assert_eq!(
        rest[0].1,
        Expression::Arithmetic {
            first: Box::new(Expression::Literal(Value::Int(2))),
            rest: vec![(ArithmeticOp::Mul, Expression::Literal(Value::Int(3)))],
        }
    );
    assert_eq!(rest[1].0, ArithmeticOp::Sub);
    assert_eq!(rest[1].1, Expression::Negate(Box::new(Expression::path("o.total"))));
}

#[test]
fn negative_literals_fold() {
    let select = select("SELECT o FROM Order o WHERE o.total > -5");
    assert_eq!(
        select.filter,
        Some(Expression::compare(
            Expression::path("o.total"),
            CompareOp::Gt,
            Expression::Literal(Value::Int(-5)),
        ))
    );
}

#[test]
fn negated_predicates() {
    let select = select(
        "SELECT c FROM Customer c WHERE c.name NOT LIKE 'A%' ESCAPE '!' \
         AND c.id NOT IN (1, 2) AND c.id NOT BETWEEN 3 AND 4 \
         AND c.orders IS NOT EMPTY AND NOT EXISTS (SELECT o FROM Order o WHERE o.customer = c)",
    );
    let Some(Expression::And(parts)) = select.filter else {
        panic!("and expected");
    };

    assert!(matches!(&parts[0], Expression::Like { negated: true, escape: Some(_), .. }));
    assert!(matches!(&parts[1], Expression::InList { negated: true, list, .. } if list.len() == 2));
    assert!(matches!(&parts[2], Expression::Between { negated: true, .. }));
    assert!(matches!(&parts[3], Expression::IsEmpty { negated: true, .. }));
    assert!(matches!(&parts[4], Expression::Exists { negated: true, .. }));
}

#[test]
fn member_of_and_quantified_subqueries() {
    let select = select(
        "SELECT p FROM Product p, Order o WHERE p MEMBER OF o.products \
         AND p.price > ALL (SELECT q.price FROM Product q) \
         AND p.price < SOME (SELECT q.price FROM Product q)",
    );
    let Some(Expression::And(parts)) = select.filter else {
        panic!("and expected");
    };

    assert!(matches!(&parts[0], Expression::MemberOf { negated: false, .. }));
    assert!(matches!(
        &parts[1],
        Expression::Quantified { quantifier: Quantifier::All, op: CompareOp::Gt, .. }
    ));
    assert!(matches!(
        &parts[2],
        Expression::Quantified { quantifier: Quantifier::Any, op: CompareOp::Lt, .. }
    ));
}

#[test]
fn aggregates_grouping_and_ordering() {
    let select = select(
        "SELECT o.customer.name, COUNT(o), SUM(DISTINCT o.total) AS spent FROM Order o \
         GROUP BY o.customer.name HAVING COUNT(*) > 1 ORDER BY spent DESC, o.customer.name",
    );

    assert_eq!(
        select.items[1].expr,
        Expression::Aggregate {
            function: AggregateFunction::Count,
            distinct: false,
            arg: Some(Box::new(Expression::path("o"))),
        }
    );
    assert!(matches!(
        &select.items[2].expr,
        Expression::Aggregate { function: AggregateFunction::Sum, distinct: true, .. }
    ));
    assert_eq!(select.items[2].result_variable.as_deref(), Some("spent"));
    assert_eq!(select.group_by, vec![Expression::path("o.customer.name")]);
    assert!(matches!(
        &select.having,
        Some(Expression::Compare { left, .. })
            if matches!(**left, Expression::Aggregate { arg: None, .. })
    ));
    assert_eq!(select.order_by.len(), 2);
    assert!(select.order_by[0].descending);
    assert!(!select.order_by[1].descending);
}

#[test]
fn functions_and_size() {
    let select = select(
        "SELECT UPPER(c.name), TRIM(LEADING 'x' FROM c.name), TRIM(c.name), SIZE(c.orders), \
         CURRENT_DATE FROM Customer c",
    );

    assert!(matches!(
        &select.items[0].expr,
        Expression::Function { function: ScalarFunction::Upper, args } if args.len() == 1
    ));
    assert_eq!(
        select.items[1].expr,
        Expression::Function {
            function: ScalarFunction::Trim(TrimSpec::Leading),
            args: vec![
                Expression::path("c.name"),
                Expression::Literal(Value::Text("x".into())),
            ],
        }
    );
    assert!(matches!(
        &select.items[2].expr,
        Expression::Function { function: ScalarFunction::Trim(TrimSpec::Both), args } if args.len() == 1
    ));
    assert_eq!(
        select.items[3].expr,
        Expression::Size(PathExpression::parse_dotted("c.orders"))
    );
    assert!(matches!(
        &select.items[4].expr,
        Expression::Function { function: ScalarFunction::CurrentDate, args } if args.is_empty()
    ));
}

#[test]
fn function_arity_is_checked() {
    assert!(matches!(
        parse("SELECT UPPER(c.name, c.name) FROM Customer c"),
        Err(SemanticError::Syntax { .. })
    ));
    assert!(matches!(
        parse("SELECT FROBNICATE(c.name) FROM Customer c"),
        Err(SemanticError::Syntax { .. })
    ));
}

#[test]
fn bulk_update_and_delete() {
    let QueryStatement::Update(update) =
        parse("UPDATE Order o SET o.total = o.total * 2, o.status = 'x' WHERE o.total < ?1").unwrap()
    else {
        panic!("update expected");
    };
    assert_eq!(update.entity, "Order");
    assert_eq!(update.alias.as_deref(), Some("o"));
    assert_eq!(update.assignments.len(), 2);
    assert_eq!(update.assignments[1].path, PathExpression::parse_dotted("o.status"));

    let QueryStatement::Delete(delete) = parse("DELETE FROM Product").unwrap() else {
        panic!("delete expected");
    };
    assert_eq!(delete.entity, "Product");
    assert_eq!(delete.alias, None);
    assert_eq!(delete.filter, None);
}

#[test]
fn constructor_expressions_are_unsupported() {
    assert!(matches!(
        parse("SELECT NEW com.x.Summary(o.total) FROM Order o"),
        Err(SemanticError::Unsupported { .. })
    ));
}

#[test]
fn syntax_errors_point_at_the_offending_token() {
    assert_eq!(syntax_offset("SELECT o FROM Order o WHERE"), 27);
    assert_eq!(syntax_offset("SELECT o FROM Order o o"), 22);
    assert_eq!(syntax_offset("FETCH o"), 0);
    assert_eq!(syntax_offset("SELECT o FROM Order o WHERE o.total > 1 )"), 40);
}

fn total_literal(text: &str) -> Expression {
    match select(&format!("SELECT o FROM Order o WHERE o.total > {text}")).filter {
        Some(Expression::Compare { right, .. }) => *right,
        other => panic!("expected a comparison, got {other:?}"),
    }
}

#[test]
fn most_negative_integer_literal_is_accepted() {
    assert_eq!(
        total_literal("-9223372036854775808"),
        Expression::Literal(Value::Int(i64::MIN))
    );
    assert_eq!(
        total_literal("-9223372036854775807"),
        Expression::Literal(Value::Int(-i64::MAX))
    );
    assert_eq!(
        syntax_offset("SELECT o FROM Order o WHERE o.total > 9223372036854775808"),
        38
    );
}

#[test]
fn non_finite_decimal_literals_are_rejected() {
    let err = parse("SELECT o FROM Order o WHERE o.total > 1.5e400").unwrap_err();

    assert_eq!(
        err,
        SemanticError::Syntax {
            offset: 38,
            message: "decimal literal 1.5e400 is out of range".into(),
        }
    );
    assert_eq!(
        total_literal("-1.5e300"),
        Expression::Literal(Value::Float(-1.5e300))
    );
}

#[test]
fn reserved_words_are_not_aliases() {
    assert!(matches!(
        parse("SELECT x FROM Order select"),
        Err(SemanticError::Syntax { .. })
    ));
}

proptest! {
    #[test]
    fn parsing_is_deterministic(total in -1000i64..1000, name in "[a-z]{1,8}") {
        let text = format!(
            "SELECT o FROM Order o WHERE o.total > {total} AND o.status = '{name}' ORDER BY o.total"
        );
        prop_assert_eq!(parse(&text), parse(&text));
    }

    #[test]
    fn arbitrary_input_never_panics(text in ".{0,64}") {
        let _ = parse(&text);
    }
}
