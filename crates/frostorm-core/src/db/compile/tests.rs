use super::*;
use crate::{
    db::sql::{AggregateFunction, AnsiDialect, FetchKind, PostgresDialect},
    error::{ErrorClass, SemanticError},
    test_fixtures::shop_registry,
};
use proptest::prelude::*;

fn compiler() -> Compiler {
    Compiler::new(shop_registry())
}

fn compile(text: &str) -> CompiledQuery {
    match compiler().compile_text(text) {
        Ok(query) => query,
        Err(err) => panic!("{text}: {err}"),
    }
}

fn ansi(text: &str) -> String {
    compile(text).render(&AnsiDialect).sql
}

fn semantic(text: &str) -> SemanticError {
    let err = compiler()
        .compile_text(text)
        .expect_err("query should not compile");
    assert_eq!(err.class, ErrorClass::Semantic, "{err}");
    err.semantic_detail().cloned().expect("semantic detail")
}

const ORDER_COLUMNS: &str = "t0.id, t0.total, t0.status, t0.version, t0.customer_id";
const CUSTOMER_COLUMNS: &str =
    "t0.id, t0.name, t0.email, t0.address_street, t0.address_city";

#[test]
fn total_filter_compiles_to_one_comparison_and_one_parameter() {
    let query = compile("SELECT o FROM Order o WHERE o.total > :min");
    let rendered = query.render(&AnsiDialect);

    assert_eq!(
        rendered.sql,
        format!("SELECT {ORDER_COLUMNS} FROM orders t0 WHERE t0.total > ?")
    );
    assert_eq!(rendered.sql.matches('>').count(), 1);
    assert_eq!(query.params, vec![ParamSlot::Named("min".into())]);
    assert_eq!(rendered.bind_order, vec![0]);
    assert_eq!(query.kind, QueryKind::Select);
}

#[test]
fn entity_items_project_every_persisted_column() {
    let query = compile("SELECT o FROM Order o");
    let registry = shop_registry();
    let order = registry.entity_by_name("Order").expect("order");

    assert_eq!(
        query.items,
        vec![ResultItem::Entity {
            entity: order.id,
            columns: 0..5,
            label: "o".into(),
        }]
    );
    let labels: Vec<_> = query.fetches.iter().map(|f| f.label.as_str()).collect();
    assert_eq!(
        labels,
        ["o.id", "o.total", "o.status", "o.version", "o.customer.customer_id"]
    );
    assert!(matches!(
        query.fetches[4].kind,
        FetchKind::JoinColumn { relation: 0, position: 0, .. }
    ));
    assert!(!query.is_fetch_join());
    assert!(!query.is_scalar());
}

#[test]
fn implicit_joins_are_shared_per_path_prefix() {
    assert_eq!(
        ansi("SELECT o FROM Order o WHERE o.customer.name = 'x' AND o.customer.email IS NULL"),
        format!(
            "SELECT {ORDER_COLUMNS} FROM orders t0 INNER JOIN customer t1 ON t1.id = t0.customer_id \
             WHERE t1.name = 'x' AND t1.email IS NULL"
        )
    );
}

#[test]
fn embedded_paths_resolve_to_flattened_columns() {
    assert_eq!(
        ansi("SELECT c FROM Customer c WHERE c.address.city = 'Oslo'"),
        format!("SELECT {CUSTOMER_COLUMNS} FROM customer t0 WHERE t0.address_city = 'Oslo'")
    );
}

#[test]
fn entity_comparisons_use_foreign_key_columns_without_joining() {
    let query = compile("SELECT o FROM Order o WHERE o.customer = :c");

    assert_eq!(
        query.render(&AnsiDialect).sql,
        format!("SELECT {ORDER_COLUMNS} FROM orders t0 WHERE t0.customer_id = ?")
    );
    assert_eq!(query.params, vec![ParamSlot::Named("c".into())]);
}

#[test]
fn entity_comparison_between_aliases_uses_keys() {
    assert_eq!(
        ansi("SELECT o FROM Order o, Customer c WHERE o.customer = c AND c.name = 'a'"),
        format!(
            "SELECT {ORDER_COLUMNS} FROM orders t0, customer t1 \
             WHERE t0.customer_id = t1.id AND t1.name = 'a'"
        )
    );
}

#[test]
fn fetch_join_appends_the_association_columns() {
    let query = compile("SELECT c FROM Customer c LEFT JOIN FETCH c.orders");
    let registry = shop_registry();
    let customer = registry.entity_by_name("Customer").expect("customer");
    let order = registry.entity_by_name("Order").expect("order");

    assert_eq!(
        query.render(&AnsiDialect).sql,
        "SELECT t0.id, t0.name, t0.email, t0.address_street, t0.address_city, \
         t1.id, t1.total, t1.status, t1.version, t1.customer_id \
         FROM customer t0 LEFT OUTER JOIN orders t1 ON t1.customer_id = t0.id"
    );
    assert_eq!(
        query.fetch_joins,
        vec![FetchJoin {
            parent: FetchParent::Item(0),
            relation: customer.relation_id(0),
            entity: order.id,
            columns: 5..10,
        }]
    );
    assert_eq!(query.fetches[5].label, "c.orders.id");
    assert!(query.is_fetch_join());
}

#[test]
fn nested_fetch_joins_point_at_their_parent_fetch() {
    let query = compile("SELECT c FROM Customer c JOIN FETCH c.orders o JOIN FETCH o.products");

    assert_eq!(query.fetch_joins.len(), 2);
    assert_eq!(query.fetch_joins[0].parent, FetchParent::Item(0));
    assert_eq!(query.fetch_joins[1].parent, FetchParent::Fetch(0));
    assert_eq!(query.fetch_joins[1].columns, 10..13);
}

#[test]
fn fetch_join_owner_must_be_selected() {
    assert!(matches!(
        semantic("SELECT o.total FROM Order o JOIN FETCH o.products"),
        SemanticError::InvalidExpression { .. }
    ));
}

#[test]
fn join_table_navigation_uses_two_hops() {
    assert_eq!(
        ansi("SELECT p FROM Order o JOIN o.products p WHERE o.id = ?1"),
        "SELECT t2.id, t2.name, t2.price FROM orders t0 \
         INNER JOIN order_products t1 ON t1.order_id = t0.id \
         INNER JOIN product t2 ON t2.id = t1.product_id WHERE t0.id = ?"
    );
}

#[test]
fn collection_member_declaration_is_an_inner_join() {
    assert_eq!(
        ansi("SELECT p FROM Order o JOIN o.products p"),
        ansi("SELECT p FROM Order o, IN(o.products) p")
    );
}

#[test]
fn is_empty_and_size_are_correlated_subselects() {
    assert_eq!(
        ansi("SELECT c FROM Customer c WHERE c.orders IS EMPTY"),
        format!(
            "SELECT {CUSTOMER_COLUMNS} FROM customer t0 \
             WHERE NOT EXISTS (SELECT 1 FROM orders t1 WHERE t1.customer_id = t0.id)"
        )
    );
    assert_eq!(
        ansi("SELECT o.id, SIZE(o.products) FROM Order o"),
        "SELECT t0.id, (SELECT COUNT(*) FROM order_products t1 \
         INNER JOIN product t2 ON t2.id = t1.product_id WHERE t1.order_id = t0.id) FROM orders t0"
    );
}

#[test]
fn member_of_is_an_exists_over_the_relationship() {
    let query = compile("SELECT o FROM Order o WHERE :p MEMBER OF o.products");

    assert_eq!(
        query.render(&AnsiDialect).sql,
        format!(
            "SELECT {ORDER_COLUMNS} FROM orders t0 WHERE EXISTS (SELECT 1 FROM order_products t1 \
             INNER JOIN product t2 ON t2.id = t1.product_id WHERE t1.order_id = t0.id AND t2.id = ?)"
        )
    );
}

#[test]
fn inverse_to_one_null_test_checks_for_a_referencing_row() {
    assert_eq!(
        ansi("SELECT p FROM Profile p WHERE p.user IS NULL"),
        "SELECT t0.id, t0.bio FROM profile t0 \
         WHERE NOT EXISTS (SELECT 1 FROM users t1 WHERE t1.profile_id = t0.id)"
    );
    assert_eq!(
        ansi("SELECT u FROM User u WHERE u.profile IS NOT NULL"),
        "SELECT t0.id, t0.login, t0.profile_id FROM users t0 WHERE t0.profile_id IS NOT NULL"
    );
}

#[test]
fn aggregates_group_by_and_result_variable_ordering() {
    let query = compile(
        "SELECT c.name, COUNT(o) AS n FROM Customer c JOIN c.orders o \
         GROUP BY c.name HAVING COUNT(o) > 1 ORDER BY n DESC",
    );

    assert_eq!(
        query.render(&AnsiDialect).sql,
        "SELECT t0.name, COUNT(t1.id) FROM customer t0 INNER JOIN orders t1 ON t1.customer_id = t0.id \
         GROUP BY t0.name HAVING COUNT(t1.id) > 1 ORDER BY COUNT(t1.id) DESC"
    );
    assert_eq!(query.fetches[0].kind, FetchKind::Scalar);
    assert_eq!(query.fetches[1].kind, FetchKind::Aggregate(AggregateFunction::Count));
    assert_eq!(query.items[1].label(), "n");
    assert!(query.is_scalar());
}

#[test]
fn grouping_by_an_entity_groups_every_column() {
    assert_eq!(
        ansi("SELECT c, COUNT(o) FROM Customer c LEFT JOIN c.orders o GROUP BY c"),
        format!(
            "SELECT {CUSTOMER_COLUMNS}, COUNT(t1.id) FROM customer t0 \
             LEFT OUTER JOIN orders t1 ON t1.customer_id = t0.id GROUP BY {CUSTOMER_COLUMNS}"
        )
    );
}

#[test]
fn correlated_subquery_sees_outer_aliases() {
    assert_eq!(
        ansi("SELECT c FROM Customer c WHERE EXISTS (SELECT l FROM OrderLine l WHERE l.order.customer = c)"),
        format!(
            "SELECT {CUSTOMER_COLUMNS} FROM customer t0 WHERE EXISTS (SELECT t1.id FROM order_line t1 \
             INNER JOIN orders t2 ON t2.id = t1.order_id WHERE t2.customer_id = t0.id)"
        )
    );
}

#[test]
fn navigation_from_an_outer_alias_joins_inside_the_subquery() {
    assert_eq!(
        ansi("SELECT o FROM Order o WHERE EXISTS (SELECT p FROM Product p WHERE p.name = o.customer.name)"),
        format!(
            "SELECT {ORDER_COLUMNS} FROM orders t0 WHERE EXISTS (SELECT t1.id FROM product t1, customer t2 \
             WHERE t2.id = t0.customer_id AND t1.name = t2.name)"
        )
    );
}

#[test]
fn repeated_named_parameters_share_a_slot() {
    let query = compile("SELECT o FROM Order o WHERE o.total > :m OR o.total < :m");
    let rendered = query.render(&AnsiDialect);

    assert_eq!(query.params.len(), 1);
    assert_eq!(rendered.bind_order, vec![0, 0]);
}

#[test]
fn literals_are_coerced_to_attribute_kinds() {
    assert_eq!(
        ansi("SELECT p FROM Product p WHERE p.price > 3"),
        "SELECT t0.id, t0.name, t0.price FROM product t0 WHERE t0.price > 3.0"
    );
    assert!(matches!(
        semantic("SELECT o FROM Order o WHERE o.total = 'many'"),
        SemanticError::InvalidExpression { .. }
    ));
}

#[test]
fn functions_and_arithmetic_render_in_place() {
    assert_eq!(
        ansi("SELECT UPPER(c.name), LENGTH(c.name) + 1 FROM Customer c WHERE TRIM(c.name) LIKE 'A%'"),
        "SELECT UPPER(t0.name), LENGTH(t0.name) + 1 FROM customer t0 WHERE TRIM(BOTH FROM t0.name) LIKE 'A%'"
    );
}

#[test]
fn bulk_update_is_single_table() {
    let query = compile("UPDATE Order o SET o.status = 'done', o.total = o.total + 1 WHERE o.total < :cap");

    assert_eq!(query.kind, QueryKind::Update);
    assert_eq!(
        query.render(&AnsiDialect).sql,
        "UPDATE orders SET status = 'done', total = total + 1 WHERE total < ?"
    );
    assert_eq!(
        query.render(&PostgresDialect).sql,
        "UPDATE orders t0 SET status = 'done', total = t0.total + 1 WHERE t0.total < $1"
    );
    assert!(query.fetches.is_empty());
    assert!(query.items.is_empty());
}

#[test]
fn bulk_statements_without_alias_resolve_bare_attributes() {
    let query = compile("DELETE FROM Product WHERE price > 10");

    assert_eq!(query.kind, QueryKind::Delete);
    assert_eq!(
        query.render(&AnsiDialect).sql,
        "DELETE FROM product WHERE price > 10.0"
    );
}

#[test]
fn bulk_update_can_clear_a_foreign_key() {
    assert_eq!(
        ansi("UPDATE Order o SET o.customer = NULL WHERE o.id = 3"),
        "UPDATE orders SET customer_id = NULL WHERE id = 3"
    );
}

#[test]
fn bulk_statements_reject_navigation_and_key_assignment() {
    assert!(matches!(
        semantic("UPDATE Order o SET o.status = 'x' WHERE o.customer.name = 'a'"),
        SemanticError::InvalidExpression { .. }
    ));
    assert!(matches!(
        semantic("UPDATE Order o SET o.id = 4"),
        SemanticError::InvalidExpression { .. }
    ));
}

#[test]
fn resolution_failures_are_semantic_errors() {
    assert_eq!(
        semantic("SELECT x FROM Order o"),
        SemanticError::UnknownAlias { alias: "x".into() }
    );
    assert_eq!(
        semantic("SELECT o FROM Invoice o"),
        SemanticError::UnknownEntity {
            name: "Invoice".into()
        }
    );
    assert_eq!(
        semantic("SELECT o.nope FROM Order o"),
        SemanticError::UnknownAttribute {
            entity: "Order".into(),
            path: "nope".into()
        }
    );
    assert_eq!(
        semantic("SELECT o.total.amount FROM Order o"),
        SemanticError::NotARelationship {
            entity: "Order".into(),
            attribute: "total".into()
        }
    );
    assert!(matches!(
        semantic("SELECT c.orders.total FROM Customer c"),
        SemanticError::CollectionPathNotAllowed { .. }
    ));
    assert_eq!(
        semantic("SELECT o FROM Order o, Product o"),
        SemanticError::DuplicateAlias { alias: "o".into() }
    );
    assert!(matches!(
        semantic("SELECT o.total AS o FROM Order o"),
        SemanticError::AmbiguousSelection { .. }
    ));
    assert!(matches!(
        semantic("SELECT o FROM Order o WHERE o.customer > :c"),
        SemanticError::InvalidExpression { .. }
    ));
    assert!(matches!(
        semantic("SELECT o FROM Order o JOIN o.total t"),
        SemanticError::NotARelationship { .. }
    ));
}

#[test]
fn syntax_errors_surface_as_semantic_class() {
    assert!(matches!(
        semantic("SELECT o FROM"),
        SemanticError::Syntax { .. }
    ));
}

const QUERIES: &[&str] = &[
    "SELECT o FROM Order o WHERE o.total > :min",
    "SELECT c FROM Customer c LEFT JOIN FETCH c.orders WHERE c.name LIKE :n",
    "SELECT p FROM Order o JOIN o.products p WHERE o.customer.name = :n ORDER BY p.price DESC",
    "SELECT c.name, COUNT(o) FROM Customer c JOIN c.orders o GROUP BY c.name",
    "SELECT o FROM Order o WHERE o.products IS NOT EMPTY AND SIZE(o.lines) > ?1",
    "UPDATE Order o SET o.total = o.total * 2 WHERE o.status IS NULL",
];

proptest! {
    #[test]
    fn compiling_twice_is_deterministic(index in 0..QUERIES.len(), bump in -50i64..50) {
        let text = format!("{} ", QUERIES[index]).replace(":min", &bump.to_string());
        let first = compile(&text);
        let second = compile(&text);

        prop_assert_eq!(first.render(&AnsiDialect), second.render(&AnsiDialect));
        prop_assert_eq!(&first.fetches, &second.fetches);
        prop_assert_eq!(first.fingerprint(), second.fingerprint());
        prop_assert_eq!(first, second);
    }
}
