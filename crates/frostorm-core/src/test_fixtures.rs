//! Shared mapping fixtures for unit tests.

use crate::{
    db::store::MemoryDatabase,
    model::{Cascade, DescriptorRegistry, EntityBuilder, KeyGeneration, RelationBuilder},
    value::{Value, ValueKind},
};
use std::sync::Arc;

/// Customer ← Order → Product (join table), Order ← OrderLine, Person ↔ Person,
/// User ↔ Profile (bidirectional one-to-one).
pub(crate) fn shop_registry() -> Arc<DescriptorRegistry> {
    let registry = DescriptorRegistry::builder()
        .entity(
            EntityBuilder::new("Customer")
                .id("id", ValueKind::Int)
                .generated(KeyGeneration::Identity)
                .attribute("name", ValueKind::Text)
                .optional("email", ValueKind::Text)
                .embedded("address", |e| {
                    e.optional("street", ValueKind::Text)
                        .optional("city", ValueKind::Text)
                })
                .one_to_many("orders", "Order", "customer"),
        )
        .entity(
            EntityBuilder::new("Order")
                .table("orders")
                .id("id", ValueKind::Int)
                .generated(KeyGeneration::Sequence("order_seq".into()))
                .attribute("total", ValueKind::Int)
                .optional("status", ValueKind::Text)
                .version("version")
                .relation(RelationBuilder::to_one("customer", "Customer").lazy())
                .relation(
                    RelationBuilder::to_many("products", "Product")
                        .join_table("order_products")
                        .cascade(Cascade::PERSIST),
                )
                .one_to_many("lines", "OrderLine", "order"),
        )
        .entity(
            EntityBuilder::new("Product")
                .id("id", ValueKind::Int)
                .attribute("name", ValueKind::Text)
                .attribute("price", ValueKind::Float)
                .relation(RelationBuilder::to_many("orders", "Order").mapped_by("products")),
        )
        .entity(
            EntityBuilder::new("OrderLine")
                .id("id", ValueKind::Ulid)
                .generated(KeyGeneration::Ulid)
                .attribute("quantity", ValueKind::Int)
                .many_to_one("order", "Order"),
        )
        .entity(
            EntityBuilder::new("Person")
                .id("id", ValueKind::Int)
                .attribute("name", ValueKind::Text)
                .relation(RelationBuilder::to_one("spouse", "Person").join_column("spouse_id", "id")),
        )
        .entity(
            EntityBuilder::new("User")
                .table("users")
                .id("id", ValueKind::Int)
                .attribute("login", ValueKind::Text)
                .relation(RelationBuilder::to_one("profile", "Profile").cascade(Cascade::ALL)),
        )
        .entity(
            EntityBuilder::new("Profile")
                .id("id", ValueKind::Int)
                .optional("bio", ValueKind::Text)
                .relation(
                    RelationBuilder::to_one("user", "User")
                        .mapped_by("profile")
                        .lazy(),
                ),
        )
        .build();

    match registry {
        Ok(registry) => Arc::new(registry),
        Err(err) => panic!("fixture registry must build: {err}"),
    }
}

/// Two customers, three orders (one without a customer), two products, a
/// married couple and a user with a profile.
pub(crate) fn seed_shop(db: &MemoryDatabase) {
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
                ("status", "new".into()),
                ("version", 1.into()),
                ("customer_id", customer.map_or(Value::Null, Value::from)),
            ],
        )
        .unwrap();
    }
    for (id, name, price) in [(10, "pen", 1.5), (11, "ink", 9.0)] {
        db.insert_row(
            "product",
            &[("id", id.into()), ("name", name.into()), ("price", price.into())],
        )
        .unwrap();
    }
    for (order, product) in [(1, 10), (1, 11), (2, 10)] {
        db.insert_row(
            "order_products",
            &[("order_id", order.into()), ("product_id", product.into())],
        )
        .unwrap();
    }
    for (id, name, spouse) in [(1, "ann", 2), (2, "bob", 1)] {
        db.insert_row(
            "person",
            &[("id", id.into()), ("name", name.into()), ("spouse_id", spouse.into())],
        )
        .unwrap();
    }
    db.insert_row("profile", &[("id", 7.into()), ("bio", "hi".into())])
        .unwrap();
    db.insert_row(
        "users",
        &[("id", 1.into()), ("login", "root".into()), ("profile_id", 7.into())],
    )
    .unwrap();
    db.create_sequence("order_seq", 100).unwrap();
}
