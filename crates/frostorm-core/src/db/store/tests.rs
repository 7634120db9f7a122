use super::*;
use crate::{
    db::sql::{
        AggregateFunction, AnsiDialect, Assignment, CompareOp, Condition, Delete, Expr, FromItem,
        FromJoin, FromTable, Insert, JoinKind, OrderBy, Select, SqlRenderer, Statement, Update,
    },
    test_fixtures::shop_registry,
    value::Value,
};

fn run_select(conn: &mut MemoryConnection, select: Select, params: &[Value]) -> Vec<Row> {
    let statement = Statement::Select(select);
    let sql = SqlRenderer::render(&AnsiDialect, &statement).sql;
    conn.select(&PreparedStatement {
        statement: &statement,
        sql: &sql,
        slot_values: params,
        bind_values: params,
    })
    .unwrap()
}

fn run(conn: &mut MemoryConnection, statement: &Statement, params: &[Value]) -> Result<u64, StoreError> {
    conn.execute(&PreparedStatement {
        statement,
        sql: "",
        slot_values: params,
        bind_values: params,
    })
}

fn seeded() -> MemoryDatabase {
    let db = MemoryDatabase::new();
    db.create_table("orders", &["id", "total", "customer_id"], &["id"])
        .unwrap();
    db.create_table("customer", &["id", "name"], &["id"]).unwrap();
    for (id, name) in [(1, "ann"), (2, "bob")] {
        db.insert_row("customer", &[("id", id.into()), ("name", name.into())])
            .unwrap();
    }
    for (id, total, customer) in [(1, 50, Some(1)), (2, 150, Some(1)), (3, 75, None)] {
        db.insert_row(
            "orders",
            &[
                ("id", id.into()),
                ("total", total.into()),
                ("customer_id", customer.map_or(Value::Null, Value::from)),
            ],
        )
        .unwrap();
    }
    db
}

#[test]
fn filters_with_bound_parameter() {
    let db = seeded();
    let mut conn = db.connect();
    let t = FromTable::new("orders", "t0");
    let rows = run_select(
        &mut conn,
        Select {
            columns: vec![Expr::Column(t.column("id"))],
            from: vec![FromItem::new(t.clone())],
            filter: Some(Condition::compare(
                Expr::Column(t.column("total")),
                CompareOp::Gt,
                Expr::Param(0),
            )),
            ..Select::default()
        },
        &[Value::Int(100)],
    );

    assert_eq!(rows, vec![vec![Value::Int(2)]]);
    assert_eq!(conn.executed().len(), 1);
}

#[test]
fn left_join_null_extends_missing_rows() {
    let db = seeded();
    let mut conn = db.connect();
    let o = FromTable::new("orders", "t0");
    let c = FromTable::new("customer", "t1");
    let mut item = FromItem::new(o.clone());
    item.joins.push(FromJoin {
        kind: JoinKind::Left,
        table: c.clone(),
        on: Condition::eq(
            Expr::Column(c.column("id")),
            Expr::Column(o.column("customer_id")),
        ),
    });

    let rows = run_select(
        &mut conn,
        Select {
            columns: vec![Expr::Column(o.column("id")), Expr::Column(c.column("name"))],
            from: vec![item],
            order_by: vec![OrderBy {
                expr: Expr::Column(o.column("id")),
                descending: false,
            }],
            ..Select::default()
        },
        &[],
    );

    assert_eq!(rows.len(), 3);
    assert_eq!(rows[2], vec![Value::Int(3), Value::Null]);
}

#[test]
fn groups_and_aggregates() {
    let db = seeded();
    let mut conn = db.connect();
    let t = FromTable::new("orders", "t0");
    let rows = run_select(
        &mut conn,
        Select {
            columns: vec![
                Expr::Column(t.column("customer_id")),
                Expr::Aggregate {
                    function: AggregateFunction::Sum,
                    distinct: false,
                    arg: Some(Box::new(Expr::Column(t.column("total")))),
                },
            ],
            from: vec![FromItem::new(t.clone())],
            group_by: vec![Expr::Column(t.column("customer_id"))],
            order_by: vec![OrderBy {
                expr: Expr::Column(t.column("customer_id")),
                descending: true,
            }],
            ..Select::default()
        },
        &[],
    );

    assert_eq!(
        rows,
        vec![
            vec![Value::Int(1), Value::Int(200)],
            vec![Value::Null, Value::Int(75)],
        ]
    );
}

#[test]
fn count_over_empty_input_yields_one_row() {
    let db = seeded();
    let mut conn = db.connect();
    let t = FromTable::new("orders", "t0");
    let rows = run_select(
        &mut conn,
        Select {
            columns: vec![Expr::Aggregate {
                function: AggregateFunction::Count,
                distinct: false,
                arg: None,
            }],
            from: vec![FromItem::new(t.clone())],
            filter: Some(Condition::eq(Expr::Column(t.column("id")), Expr::literal(99))),
            ..Select::default()
        },
        &[],
    );

    assert_eq!(rows, vec![vec![Value::Int(0)]]);
}

#[test]
fn null_comparisons_are_unknown() {
    let db = seeded();
    let mut conn = db.connect();
    let t = FromTable::new("orders", "t0");
    let rows = run_select(
        &mut conn,
        Select {
            columns: vec![Expr::Column(t.column("id"))],
            from: vec![FromItem::new(t.clone())],
            filter: Some(Condition::Not(Box::new(Condition::eq(
                Expr::Column(t.column("customer_id")),
                Expr::literal(1),
            )))),
            ..Select::default()
        },
        &[],
    );

    // order 3 has a NULL customer: NOT (NULL = 1) is unknown, not true
    assert!(rows.is_empty());
}

#[test]
fn correlated_exists() {
    let db = seeded();
    let mut conn = db.connect();
    let c = FromTable::new("customer", "t0");
    let o = FromTable::new("orders", "t1");
    let sub = Select {
        columns: vec![Expr::literal(1)],
        from: vec![FromItem::new(o.clone())],
        filter: Some(Condition::eq(
            Expr::Column(o.column("customer_id")),
            Expr::Column(c.column("id")),
        )),
        ..Select::default()
    };
    let rows = run_select(
        &mut conn,
        Select {
            columns: vec![Expr::Column(c.column("name"))],
            from: vec![FromItem::new(c)],
            filter: Some(Condition::Exists {
                select: Box::new(sub),
                negated: true,
            }),
            ..Select::default()
        },
        &[],
    );

    assert_eq!(rows, vec![vec![Value::from("bob")]]);
}

#[test]
fn like_supports_wildcards_and_escape() {
    use super::memory::like_match as like;

    assert!(like("widget", "w%t", None));
    assert!(like("widget", "_idget", None));
    assert!(!like("widget", "w_t", None));
    assert!(like("50%", "50!%", Some('!')));
    assert!(!like("500", "50!%", Some('!')));
}

#[test]
fn update_and_delete_report_affected_rows() {
    let db = seeded();
    let mut conn = db.connect();
    let t = FromTable::new("orders", "t0");

    let update = Statement::Update(Update {
        table: t.clone(),
        assignments: vec![Assignment {
            column: "total".into(),
            value: Expr::Param(0),
        }],
        filter: Some(Condition::IsNull {
            expr: Expr::Column(t.column("customer_id")),
            negated: false,
        }),
    });
    assert_eq!(run(&mut conn, &update, &[Value::Int(1)]).unwrap(), 1);

    let delete = Statement::Delete(Delete {
        table: t.clone(),
        filter: Some(Condition::compare(
            Expr::Column(t.column("total")),
            CompareOp::Lt,
            Expr::literal(100),
        )),
    });
    assert_eq!(run(&mut conn, &delete, &[]).unwrap(), 2);
    assert_eq!(db.row_count("orders").unwrap(), 1);
}

#[test]
fn duplicate_primary_key_is_rejected() {
    let db = seeded();
    let mut conn = db.connect();
    let insert = Statement::Insert(Insert {
        table: "customer".into(),
        columns: vec!["id".into(), "name".into()],
        values: vec![Expr::literal(1), Expr::literal("dup")],
        generated_key: None,
    });

    let err = run(&mut conn, &insert, &[]).unwrap_err();
    assert!(matches!(err, StoreError::DuplicateKey { .. }));
}

#[test]
fn registry_tables_assign_identity_and_sequences() {
    let registry = shop_registry();
    let db = MemoryDatabase::from_registry(&registry);
    let mut conn = db.connect();

    let insert = Statement::Insert(Insert {
        table: "customer".into(),
        columns: vec!["name".into()],
        values: vec![Expr::Param(0)],
        generated_key: Some("id".into()),
    });
    let params = [Value::from("ann")];
    let prepared = PreparedStatement {
        statement: &insert,
        sql: "",
        slot_values: &params,
        bind_values: &params,
    };
    let first = conn.insert_returning_key(&prepared).unwrap();
    let second = conn.insert_returning_key(&prepared).unwrap();

    assert_eq!(first, Value::Int(1));
    assert_eq!(second, Value::Int(2));
    assert_eq!(conn.next_sequence_value("order_seq").unwrap(), 1);
    assert_eq!(conn.next_sequence_value("order_seq").unwrap(), 2);
    assert!(db.row_count("order_products").is_ok());
}

#[test]
fn rollback_restores_first_write_snapshot() {
    let db = seeded();
    let mut conn = db.connect();
    let t = FromTable::new("orders", "t0");
    let delete = Statement::Delete(Delete {
        table: t,
        filter: None,
    });

    run(&mut conn, &delete, &[]).unwrap();
    assert_eq!(db.row_count("orders").unwrap(), 0);

    conn.rollback().unwrap();
    assert_eq!(db.row_count("orders").unwrap(), 3);
}
