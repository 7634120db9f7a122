use super::*;
use crate::{
    db::{compile::Compiler, jpql, sql::AnsiDialect},
    error::ErrorClass,
    test_fixtures::shop_registry,
};

// Both front ends must reach the compiler with the same tree.
fn assert_same(criteria: &CriteriaQuery, text: &str) {
    let parsed = jpql::parse(text).unwrap();
    assert_eq!(criteria.to_statement(), parsed, "{text}");

    let compiler = Compiler::new(shop_registry());
    let from_criteria = compiler.compile(&criteria.to_statement()).unwrap();
    let from_text = compiler.compile_text(text).unwrap();
    assert_eq!(
        from_criteria.render(&AnsiDialect).sql,
        from_text.render(&AnsiDialect).sql
    );
}

#[test]
fn root_alias_is_selected_by_default() {
    let query = CriteriaQuery::from("Order", "o").filter(Criterion::gt("o.total", Operand::param("min")));

    assert_same(&query, "SELECT o FROM Order o WHERE o.total > :min");
}

#[test]
fn repeated_filters_are_conjoined_flat() {
    let query = CriteriaQuery::from("Customer", "c")
        .join("c.orders", "o")
        .distinct()
        .filter(Criterion::gte("o.total", 100))
        .filter(Criterion::like("c.name", "a%") & Criterion::is_not_null("c.email"))
        .asc("c.name");

    assert_same(
        &query,
        "SELECT DISTINCT c FROM Customer c JOIN c.orders o \
         WHERE o.total >= 100 AND c.name LIKE 'a%' AND c.email IS NOT NULL ORDER BY c.name",
    );
}

#[test]
fn disjunction_and_negation() {
    let query = CriteriaQuery::from("Order", "o").filter(
        !(Criterion::eq("o.status", "new") | Criterion::between("o.total", 10, 20)),
    );

    assert_same(
        &query,
        "SELECT o FROM Order o WHERE NOT (o.status = 'new' OR o.total BETWEEN 10 AND 20)",
    );
}

#[test]
fn collection_predicates() {
    let query = CriteriaQuery::from("Customer", "c")
        .filter(Criterion::is_empty("c.orders") | Criterion::in_("c.id", [1, 2, 3]));

    assert_same(
        &query,
        "SELECT c FROM Customer c WHERE c.orders IS EMPTY OR c.id IN (1, 2, 3)",
    );
}

#[test]
fn fetch_joins_and_projections() {
    let fetch = CriteriaQuery::from("Customer", "c").left_fetch("c.orders");
    assert_same(&fetch, "SELECT c FROM Customer c LEFT JOIN FETCH c.orders");

    let grouped = CriteriaQuery::from("Customer", "c")
        .join("c.orders", "o")
        .select("c.name")
        .select_aggregate(AggregateFunction::Count, Some("o"))
        .group_by("c.name")
        .having(Criterion::gt("c.name", "a"))
        .desc("c.name");
    assert_same(
        &grouped,
        "SELECT c.name, COUNT(o) FROM Customer c JOIN c.orders o \
         GROUP BY c.name HAVING c.name > 'a' ORDER BY c.name DESC",
    );
}

#[test]
fn path_operands_compare_two_attributes() {
    let query = CriteriaQuery::from("Product", "p")
        .filter(Criterion::ne("p.name", Operand::path("p.name")) & Criterion::lt("p.price", 2.5));

    assert_same(
        &query,
        "SELECT p FROM Product p WHERE p.name <> p.name AND p.price < 2.5",
    );
}

#[test]
fn criteria_errors_are_semantic() {
    let query = CriteriaQuery::from("Order", "o").filter(Criterion::eq("o.nope", 1));

    let err = Compiler::new(shop_registry())
        .compile(&query.to_statement())
        .unwrap_err();

    assert_eq!(err.class, ErrorClass::Semantic);
}
