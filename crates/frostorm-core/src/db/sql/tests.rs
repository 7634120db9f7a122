use super::*;
use crate::{error::SemanticError, value::Value};

fn order_select() -> Select {
    let mut aliases = AliasAllocator::new();
    let orders = aliases.table("orders");
    let customer = aliases.table("customer");

    let mut item = FromItem::new(orders.clone());
    item.joins.push(FromJoin {
        kind: JoinKind::Left,
        table: customer.clone(),
        on: Condition::eq(
            Expr::Column(customer.column("id")),
            Expr::Column(orders.column("customer_id")),
        ),
    });

    Select {
        columns: vec![
            Expr::Column(orders.column("id")),
            Expr::Column(customer.column("name")),
        ],
        from: vec![item],
        filter: Some(Condition::And(vec![
            Condition::compare(
                Expr::Column(orders.column("total")),
                CompareOp::Gt,
                Expr::Param(0),
            ),
            Condition::Or(vec![
                Condition::IsNull {
                    expr: Expr::Column(orders.column("status")),
                    negated: false,
                },
                Condition::eq(Expr::Column(orders.column("status")), Expr::Param(1)),
            ]),
        ])),
        order_by: vec![OrderBy {
            expr: Expr::Column(orders.column("id")),
            descending: true,
        }],
        ..Select::default()
    }
}

#[test]
fn ansi_renders_select_with_join_and_nested_junction() {
    let rendered = SqlRenderer::render(&AnsiDialect, &Statement::Select(order_select()));

    assert_eq!(
        rendered.sql,
        "SELECT t0.id, t1.name FROM orders t0 \
         LEFT OUTER JOIN customer t1 ON t1.id = t0.customer_id \
         WHERE t0.total > ? AND (t0.status IS NULL OR t0.status = ?) \
         ORDER BY t0.id DESC"
    );
    assert_eq!(rendered.bind_order, vec![0, 1]);
}

#[test]
fn postgres_numbers_placeholders_and_uses_share_lock() {
    let mut select = order_select();
    select.lock = LockMode::Read;
    let rendered = SqlRenderer::render(&PostgresDialect, &Statement::Select(select));

    assert!(rendered.sql.contains("t0.total > $1"));
    assert!(rendered.sql.contains("t0.status = $2"));
    assert!(rendered.sql.ends_with("FOR SHARE"));
}

#[test]
fn reused_slot_appears_once_per_placeholder() {
    let t = FromTable::new("orders", "t0");
    let select = Select {
        columns: vec![Expr::Column(t.column("id"))],
        from: vec![FromItem::new(t.clone())],
        filter: Some(Condition::Or(vec![
            Condition::eq(Expr::Column(t.column("total")), Expr::Param(0)),
            Condition::eq(Expr::Column(t.column("version")), Expr::Param(0)),
        ])),
        ..Select::default()
    };
    let rendered = SqlRenderer::render(&AnsiDialect, &Statement::Select(select));

    assert_eq!(rendered.bind_order, vec![0, 0]);
    assert_eq!(
        rendered.bind_values(&[Value::Int(7)]),
        vec![Value::Int(7), Value::Int(7)]
    );
}

#[test]
fn reserved_identifiers_are_quoted() {
    let t = FromTable::new("order", "t0");
    let select = Select {
        columns: vec![Expr::Column(t.column("user"))],
        from: vec![FromItem::new(t)],
        ..Select::default()
    };
    let rendered = SqlRenderer::render(&AnsiDialect, &Statement::Select(select));

    assert_eq!(rendered.sql, "SELECT t0.\"user\" FROM \"order\" t0");
}

#[test]
fn update_drops_alias_on_dialects_without_dml_alias() {
    let t = FromTable::new("orders", "t0");
    let update = Statement::Update(Update {
        table: t.clone(),
        assignments: vec![Assignment {
            column: "total".into(),
            value: Expr::Param(0),
        }],
        filter: Some(Condition::eq(Expr::Column(t.column("id")), Expr::Param(1))),
    });

    let ansi = SqlRenderer::render(&AnsiDialect, &update);
    let pg = SqlRenderer::render(&PostgresDialect, &update);

    assert_eq!(ansi.sql, "UPDATE orders SET total = ? WHERE id = ?");
    assert_eq!(pg.sql, "UPDATE orders t0 SET total = $1 WHERE t0.id = $2");
}

#[test]
fn identity_insert_returns_key_where_supported() {
    let insert = Statement::Insert(Insert {
        table: "customer".into(),
        columns: vec!["name".into()],
        values: vec![Expr::Param(0)],
        generated_key: Some("id".into()),
    });

    assert_eq!(
        SqlRenderer::render(&AnsiDialect, &insert).sql,
        "INSERT INTO customer (name) VALUES (?)"
    );
    assert_eq!(
        SqlRenderer::render(&PostgresDialect, &insert).sql,
        "INSERT INTO customer (name) VALUES ($1) RETURNING id"
    );
}

#[test]
fn nested_arithmetic_is_parenthesized() {
    let t = FromTable::new("orders", "t0");
    let inner = Expr::Arithmetic(ArithmeticChain {
        first: Box::new(Expr::Column(t.column("total"))),
        rest: vec![(crate::value::ArithmeticOp::Add, Expr::literal(1))],
    });
    let outer = Expr::Arithmetic(ArithmeticChain {
        first: Box::new(inner),
        rest: vec![(crate::value::ArithmeticOp::Mul, Expr::literal(2))],
    });
    let select = Select {
        columns: vec![outer],
        from: vec![FromItem::new(t)],
        ..Select::default()
    };

    assert_eq!(
        SqlRenderer::render(&AnsiDialect, &Statement::Select(select)).sql,
        "SELECT (t0.total + 1) * 2 FROM orders t0"
    );
}

#[test]
fn validate_references_rejects_dangling_alias() {
    let t = FromTable::new("orders", "t0");
    let select = Select {
        columns: vec![Expr::column("t9", "id")],
        from: vec![FromItem::new(t)],
        ..Select::default()
    };

    assert!(select.validate_references().is_err());
}

#[test]
fn validate_references_accepts_correlated_subquery() {
    let outer = FromTable::new("orders", "t0");
    let inner = FromTable::new("order_products", "t1");
    let sub = Select {
        columns: vec![Expr::Aggregate {
            function: AggregateFunction::Count,
            distinct: false,
            arg: None,
        }],
        from: vec![FromItem::new(inner.clone())],
        filter: Some(Condition::eq(
            Expr::Column(inner.column("order_id")),
            Expr::Column(outer.column("id")),
        )),
        ..Select::default()
    };
    let select = Select {
        columns: vec![Expr::Column(outer.column("id"))],
        from: vec![FromItem::new(outer)],
        filter: Some(Condition::compare(
            Expr::Subquery(Box::new(sub)),
            CompareOp::Gt,
            Expr::literal(0),
        )),
        ..Select::default()
    };

    assert!(select.validate_references().is_ok());
}

#[test]
fn duplicate_alias_is_rejected() {
    let select = Select {
        columns: vec![Expr::column("t0", "id")],
        from: vec![
            FromItem::new(FromTable::new("a", "t0")),
            FromItem::new(FromTable::new("b", "t0")),
        ],
        ..Select::default()
    };

    assert!(select.validate_references().is_err());
}

#[test]
fn fingerprint_ignores_dialect_and_follows_structure() {
    let a = Statement::Select(order_select());
    let mut changed = order_select();
    changed.distinct = true;

    assert_eq!(
        StatementFingerprint::of(&a),
        StatementFingerprint::of(&Statement::Select(order_select()))
    );
    assert_ne!(
        StatementFingerprint::of(&a),
        StatementFingerprint::of(&Statement::Select(changed))
    );
    assert_eq!(StatementFingerprint::of(&a).as_hex().len(), 64);
}

#[test]
fn bindings_resolve_named_and_positional_slots() {
    let bindings = Bindings::positional([Value::Int(1)]).with("min", 10);
    let slots = [ParamSlot::Named("min".into()), ParamSlot::Positional(0)];

    assert_eq!(
        bindings.resolve(&slots).unwrap(),
        vec![Value::Int(10), Value::Int(1)]
    );

    let err = Bindings::new().resolve(&slots).unwrap_err();
    assert!(matches!(err, SemanticError::MissingBinding { ref parameter } if parameter == ":min"));
}

#[test]
fn alias_allocator_is_sequential() {
    let mut aliases = AliasAllocator::new();
    assert_eq!(aliases.next_alias(), "t0");
    assert_eq!(aliases.table("x").alias, "t1");
}
