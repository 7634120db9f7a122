use super::*;
use crate::{error::ErrorClass, test_fixtures::shop_registry, value::ValueKind};

#[test]
fn defaults_table_and_column_names_to_snake_case() {
    let registry = shop_registry();
    let line = registry.entity_by_name("OrderLine").unwrap();

    assert_eq!(line.table, "order_line");
    assert_eq!(line.attribute("quantity").unwrap().column, "quantity");

    let order_rel = line.relation("order").unwrap();
    assert_eq!(
        order_rel.join_columns().unwrap(),
        &[JoinColumn::new("order_id", "id")]
    );
}

#[test]
fn embedded_attributes_are_flattened_with_prefixed_columns() {
    let registry = shop_registry();
    let customer = registry.entity_by_name("Customer").unwrap();
    let city = customer.attribute("address.city").unwrap();

    assert_eq!(city.column, "address_city");
    assert_eq!(city.leaf_name(), "city");
    assert_eq!(city.embedded, Some(0));
    assert_eq!(customer.embedded[0].attributes.len(), 2);
}

#[test]
fn select_columns_list_attributes_then_join_columns() {
    let registry = shop_registry();
    let order = registry.entity_by_name("Order").unwrap();
    let columns: Vec<&str> = order
        .select_columns()
        .iter()
        .map(|c| c.column.as_str())
        .collect();

    assert_eq!(columns, ["id", "total", "status", "version", "customer_id"]);
    assert_eq!(order.version_column(), Some("version"));
}

#[test]
fn join_table_defaults_use_entity_names() {
    let registry = shop_registry();
    let order = registry.entity_by_name("Order").unwrap();
    let jt = order.relation("products").unwrap().join_table().unwrap();

    assert_eq!(jt.table, "order_products");
    assert_eq!(jt.join_columns, [JoinColumn::new("order_id", "id")]);
    assert_eq!(jt.inverse_join_columns, [JoinColumn::new("product_id", "id")]);
}

#[test]
fn inverse_links_are_precomputed_both_ways() {
    let registry = shop_registry();
    let order = registry.entity_by_name("Order").unwrap();
    let product = registry.entity_by_name("Product").unwrap();

    let products = order.relation_id(order.relation_index("products").unwrap());
    let orders = product.relation_id(product.relation_index("orders").unwrap());

    assert_eq!(registry.inverse_of(products), Some(orders));
    assert_eq!(registry.inverse_of(orders), Some(products));
    assert_eq!(registry.owning_side(orders), products);
}

#[test]
fn rejects_unknown_relation_target() {
    let err = DescriptorRegistry::builder()
        .entity(
            EntityBuilder::new("A")
                .id("id", ValueKind::Int)
                .many_to_one("b", "Missing"),
        )
        .build()
        .unwrap_err();

    assert_eq!(err.class, ErrorClass::InvariantViolation);
    assert!(err.message.contains("unknown target"));
}

#[test]
fn rejects_to_many_with_join_columns() {
    let err = DescriptorRegistry::builder()
        .entity(EntityBuilder::new("B").id("id", ValueKind::Int))
        .entity(
            EntityBuilder::new("A")
                .id("id", ValueKind::Int)
                .relation(RelationBuilder::to_many("bs", "B").join_column("a_id", "id")),
        )
        .build()
        .unwrap_err();

    assert_eq!(err.class, ErrorClass::Unsupported);
}

#[test]
fn rejects_mapped_by_pointing_at_non_owner() {
    let err = DescriptorRegistry::builder()
        .entity(
            EntityBuilder::new("A")
                .id("id", ValueKind::Int)
                .one_to_many("bs", "B", "missing"),
        )
        .entity(EntityBuilder::new("B").id("id", ValueKind::Int))
        .build()
        .unwrap_err();

    assert!(err.message.contains("mappedBy"));
}

#[test]
fn rejects_identity_generation_on_text_key() {
    let err = DescriptorRegistry::builder()
        .entity(
            EntityBuilder::new("A")
                .id("code", ValueKind::Text)
                .generated(KeyGeneration::Identity),
        )
        .build()
        .unwrap_err();

    assert_eq!(err.class, ErrorClass::Unsupported);
}

#[test]
fn rejects_duplicate_columns() {
    let err = DescriptorRegistry::builder()
        .entity(
            EntityBuilder::new("A")
                .id("id", ValueKind::Int)
                .attribute_column("other", "id", ValueKind::Int, false),
        )
        .build()
        .unwrap_err();

    assert!(err.message.contains("mapped more than once"));
}

#[test]
fn shared_registry_builds_once() {
    let shared = SharedRegistry::new();
    let mut builds = 0;

    for _ in 0..3 {
        shared
            .get_or_try_init(|| {
                builds += 1;
                DescriptorRegistry::builder()
                    .entity(EntityBuilder::new("A").id("id", ValueKind::Int))
                    .build()
            })
            .unwrap();
    }

    assert_eq!(builds, 1);
    assert_eq!(shared.get().unwrap().len(), 1);
}

#[test]
fn failed_shared_build_can_be_retried() {
    let shared = SharedRegistry::new();
    let first = shared.get_or_try_init(|| DescriptorRegistry::builder().entity(EntityBuilder::new("A")).build());
    assert!(first.is_err());
    assert!(shared.get().is_none());

    let second = shared.get_or_try_init(|| {
        DescriptorRegistry::builder()
            .entity(EntityBuilder::new("A").id("id", ValueKind::Int))
            .build()
    });
    assert!(second.is_ok());
}

#[test]
fn primary_key_display_and_completeness() {
    let key = PrimaryKey::new(vec![1.into(), "a".into()]);
    assert_eq!(key.to_string(), "[1, 'a']");
    assert!(key.is_complete());
    assert!(!PrimaryKey::new(vec![crate::value::Value::Null]).is_complete());
}
