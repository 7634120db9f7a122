use super::*;
use crate::{
    db::{
        compile::Compiler,
        context::{EntityStatus, InstanceId, PersistenceContext, RelationSlot},
        sql::{Bindings, LockMode},
        statement::{CachedStatementFactory, StatementFactory},
        store::{MemoryConnection, MemoryDatabase},
    },
    error::ErrorClass,
    model::{DescriptorRegistry, EntityId, PrimaryKey},
    obs::{metrics_reset_all, metrics_snapshot},
    test_fixtures::{seed_shop, shop_registry},
    value::Value,
};
use std::{
    collections::BTreeSet,
    sync::{Arc, Mutex},
};

///
/// Harness
///
/// One unit of work over a seeded shop database.
///

struct Harness {
    registry: Arc<DescriptorRegistry>,
    db: MemoryDatabase,
    conn: MemoryConnection,
    factory: StatementFactory,
    options: ExecutionOptions,
    context: PersistenceContext,
}

impl Harness {
    fn new() -> Self {
        let registry = shop_registry();
        let db = MemoryDatabase::from_registry(&registry);
        seed_shop(&db);
        Self::over(registry, db)
    }

    fn over(registry: Arc<DescriptorRegistry>, db: MemoryDatabase) -> Self {
        Self {
            conn: db.connect(),
            factory: StatementFactory::new(registry.clone()),
            options: ExecutionOptions::default(),
            context: PersistenceContext::new(registry.clone()),
            registry,
            db,
        }
    }

    fn sibling(&self) -> Self {
        Self::over(self.registry.clone(), self.db.clone())
    }

    fn loader(&mut self) -> EntityLoader<'_, StatementFactory, MemoryConnection> {
        EntityLoader::new(&self.factory, &mut self.context, &mut self.conn, &self.options)
    }

    fn writer(&mut self) -> EntityWriter<'_, StatementFactory, MemoryConnection> {
        EntityWriter::new(&self.factory, &mut self.context, &mut self.conn, &self.options)
    }

    fn entity(&self, name: &str) -> EntityId {
        self.registry.entity_by_name(name).unwrap().id
    }

    fn find(&mut self, name: &str, key: i64) -> InstanceId {
        let entity = self.entity(name);
        self.loader()
            .find_by_id(entity, &PrimaryKey::single(key), LockMode::None)
            .unwrap()
            .unwrap_or_else(|| panic!("{name} {key} should exist"))
    }

    fn value(&self, id: InstanceId, attribute: usize) -> Value {
        self.context.instance(id).unwrap().value(attribute).cloned().unwrap()
    }

    fn slot(&self, id: InstanceId, relation: usize) -> RelationSlot {
        self.context.instance(id).unwrap().relation(relation).cloned().unwrap()
    }

    fn query(&mut self, text: &str, bindings: &Bindings) -> Vec<QueryRow> {
        let query = Compiler::new(self.registry.clone()).compile_text(text).unwrap();
        let slot_values = bindings.resolve(&query.params).unwrap();
        self.loader().execute_query(&query, &slot_values).unwrap()
    }
}

// ----------------------------------------------------------------------
// Loader
// ----------------------------------------------------------------------

#[test]
fn find_reads_once_then_hits_the_identity_map() {
    metrics_reset_all();
    let mut h = Harness::new();

    let first = h.find("Order", 1);
    let second = h.find("Order", 1);

    assert_eq!(first, second);
    assert_eq!(h.conn.executed().len(), 1);
    assert_eq!(h.value(first, 1), Value::Int(50));
    assert_eq!(
        h.context.status(first).unwrap(),
        EntityStatus::FlushedLoadedFromDb
    );

    let metrics = metrics_snapshot();
    assert_eq!(metrics.ops.selects, 1);
    assert_eq!(metrics.ops.identity_map_hits, 1);
    assert_eq!(metrics.ops.rows_materialized, 1);
}

#[test]
fn missing_rows_are_none() {
    let mut h = Harness::new();
    let order = h.entity("Order");

    let found = h
        .loader()
        .find_by_id(order, &PrimaryKey::single(99), LockMode::None)
        .unwrap();

    assert_eq!(found, None);
}

#[test]
fn lazy_to_one_stays_unloaded_until_accessed() {
    metrics_reset_all();
    let mut h = Harness::new();
    let order = h.find("Order", 1);
    assert_eq!(h.slot(order, 0), RelationSlot::Unloaded);

    let slot = h.loader().load_attribute(order, 0).unwrap();
    let RelationSlot::One(Some(customer)) = slot else {
        panic!("customer should load, got {slot:?}");
    };
    assert_eq!(h.value(customer, 1), Value::from("ann"));

    let statements = h.conn.executed().len();
    h.loader().load_attribute(order, 0).unwrap();
    assert_eq!(h.conn.executed().len(), statements);
    assert_eq!(metrics_snapshot().ops.lazy_loads, 1);
}

#[test]
fn null_foreign_key_loads_as_empty_without_a_statement() {
    let mut h = Harness::new();
    let order = h.find("Order", 3);

    assert_eq!(h.slot(order, 0), RelationSlot::One(None));
    assert_eq!(h.conn.executed().len(), 1);
}

#[test]
fn join_table_collection_loads_members_and_records_rows() {
    let mut h = Harness::new();
    let order = h.find("Order", 1);

    let slot = h.loader().load_attribute(order, 1).unwrap();

    assert_eq!(slot.targets().len(), 2);
    let state = h.context.load_state(order).unwrap();
    assert_eq!(state.join_rows.get(&1).map(BTreeSet::len), Some(2));
    assert!(state.is_loaded(1));
}

#[test]
fn inverse_collections_read_through_the_owning_foreign_key() {
    let mut h = Harness::new();
    let customer = h.find("Customer", 1);

    let slot = h.loader().load_attribute(customer, 0).unwrap();
    let totals: BTreeSet<Value> = slot
        .targets()
        .into_iter()
        .map(|order| h.value(order, 1))
        .collect();

    assert_eq!(totals, BTreeSet::from([Value::Int(50), Value::Int(150)]));
}

#[test]
fn inverse_join_table_collection_reads_owners() {
    let mut h = Harness::new();
    let pen = h.find("Product", 10);

    let slot = h.loader().load_attribute(pen, 0).unwrap();

    assert_eq!(slot.targets().len(), 2);
}

#[test]
fn eager_self_reference_stops_at_the_identity_map() {
    let mut h = Harness::new();
    let ann = h.find("Person", 1);

    let RelationSlot::One(Some(bob)) = h.slot(ann, 0) else {
        panic!("spouse should be eager");
    };
    assert_eq!(h.slot(bob, 0), RelationSlot::One(Some(ann)));
    assert_eq!(h.conn.executed().len(), 2);
}

#[test]
fn eager_one_to_one_points_the_inverse_back() {
    let mut h = Harness::new();
    let user = h.find("User", 1);

    let RelationSlot::One(Some(profile)) = h.slot(user, 0) else {
        panic!("profile should be eager");
    };
    assert_eq!(h.slot(profile, 0), RelationSlot::One(Some(user)));
    assert_eq!(h.conn.executed().len(), 2);
}

#[test]
fn query_filter_materializes_matching_rows() {
    let mut h = Harness::new();

    let rows = h.query(
        "SELECT o FROM Order o WHERE o.total > :min",
        &Bindings::new().with("min", 100),
    );

    assert_eq!(rows.len(), 1);
    let order = rows[0].instance(0).unwrap();
    assert_eq!(h.value(order, 0), Value::Int(2));
    assert_eq!(h.context.find(h.entity("Order"), &PrimaryKey::single(2)), Some(order));
}

#[test]
fn scalar_projection_returns_values() {
    let mut h = Harness::new();

    let rows = h.query(
        "SELECT o.id, o.total FROM Order o ORDER BY o.total DESC",
        &Bindings::new(),
    );

    let totals: Vec<&Value> = rows.iter().filter_map(|row| row.value(1)).collect();
    assert_eq!(totals, [&Value::Int(150), &Value::Int(75), &Value::Int(50)]);
    assert!(h.context.is_empty());
}

#[test]
fn query_rows_reuse_managed_instances() {
    let mut h = Harness::new();
    let order = h.find("Order", 2);
    h.context.set_value(order, 1, Value::Int(999)).unwrap();

    let rows = h.query("SELECT o FROM Order o WHERE o.id = 2", &Bindings::new());

    assert_eq!(rows[0].instance(0), Some(order));
    assert_eq!(h.value(order, 1), Value::Int(999));
}

#[test]
fn fetch_join_fills_collections_and_distinct_collapses_rows() {
    let mut h = Harness::new();

    let rows = h.query(
        "SELECT DISTINCT c FROM Customer c JOIN FETCH c.orders WHERE c.id = 1",
        &Bindings::new(),
    );

    assert_eq!(rows.len(), 1);
    let customer = rows[0].instance(0).unwrap();
    let RelationSlot::Many(orders) = h.slot(customer, 0) else {
        panic!("orders should be fetched");
    };
    assert_eq!(orders.len(), 2);

    let statements = h.conn.executed().len();
    h.loader().load_attribute(customer, 0).unwrap();
    assert_eq!(h.conn.executed().len(), statements);
}

#[test]
fn outer_fetch_join_without_members_yields_an_empty_collection() {
    let mut h = Harness::new();

    let rows = h.query(
        "SELECT c FROM Customer c LEFT JOIN FETCH c.orders WHERE c.id = 2",
        &Bindings::new(),
    );

    let customer = rows[0].instance(0).unwrap();
    assert_eq!(h.slot(customer, 0), RelationSlot::Many(Vec::new()));
}

#[test]
fn refresh_discards_unflushed_changes() {
    let mut h = Harness::new();
    let order = h.find("Order", 1);
    h.context.set_value(order, 1, Value::Int(999)).unwrap();
    h.loader().load_attribute(order, 0).unwrap();

    h.loader().refresh(order).unwrap();

    assert_eq!(h.value(order, 1), Value::Int(50));
    assert_eq!(h.slot(order, 0), RelationSlot::Unloaded);
}

#[test]
fn refresh_of_a_deleted_row_is_not_found() {
    let mut h = Harness::new();
    let order = h.find("Order", 3);
    let mut other = h.sibling();
    let query = Compiler::new(other.registry.clone())
        .compile_text("DELETE FROM Order o WHERE o.id = 3")
        .unwrap();
    assert_eq!(other.writer().execute_bulk(&query, &[]).unwrap(), 1);

    let err = h.loader().refresh(order).unwrap_err();

    assert_eq!(err.class, ErrorClass::NotFound);
}

#[test]
fn refresh_of_a_new_instance_is_not_managed() {
    let mut h = Harness::new();
    let order = h.context.create(h.entity("Order"));

    let err = h.loader().refresh(order).unwrap_err();

    assert_eq!(err.class, ErrorClass::NotManaged);
}

// ----------------------------------------------------------------------
// Writer
// ----------------------------------------------------------------------

#[test]
fn flush_inserts_with_a_sequence_key_and_initial_version() {
    let mut h = Harness::new();
    let order = h.context.create(h.entity("Order"));
    h.context.set_value(order, 1, Value::Int(5)).unwrap();

    h.writer().persist(order).unwrap();
    assert_eq!(
        h.context.status(order).unwrap(),
        EntityStatus::PersistNotFlushed
    );
    let summary = h.writer().flush().unwrap();

    assert_eq!(summary.inserts, 1);
    assert_eq!(h.value(order, 0), Value::Int(100));
    assert_eq!(h.value(order, 3), Value::Int(1));
    assert_eq!(h.context.status(order).unwrap(), EntityStatus::Flushed);
    assert_eq!(
        h.context.find(h.entity("Order"), &PrimaryKey::single(100)),
        Some(order)
    );
    assert_eq!(h.db.row_count("orders").unwrap(), 4);
}

#[test]
fn identity_keys_are_registered_after_the_insert() {
    let mut h = Harness::new();
    let customer = h.context.create(h.entity("Customer"));
    h.context.set_value(customer, 1, Value::from("cy")).unwrap();

    h.writer().persist(customer).unwrap();
    assert!(h.context.is_managed(customer));
    h.writer().flush().unwrap();

    assert_eq!(h.value(customer, 0), Value::Int(3));
    assert_eq!(
        h.context.find(h.entity("Customer"), &PrimaryKey::single(3)),
        Some(customer)
    );
}

#[test]
fn foreign_keys_to_pending_keys_are_written_after_the_target() {
    let mut h = Harness::new();
    let order = h.context.create(h.entity("Order"));
    let customer = h.context.create(h.entity("Customer"));
    h.context.set_value(order, 1, Value::Int(5)).unwrap();
    h.context.set_value(customer, 1, Value::from("cy")).unwrap();
    h.context
        .set_relation(order, 0, RelationSlot::One(Some(customer)))
        .unwrap();

    h.writer().persist(order).unwrap();
    h.writer().persist(customer).unwrap();
    let summary = h.writer().flush().unwrap();

    assert_eq!(summary.inserts, 2);
    assert_eq!(summary.postponed, 1);
    let rows = h.db.rows("orders").unwrap();
    let row = rows.iter().find(|row| row[0] == Value::Int(100)).unwrap();
    assert_eq!(row[4], Value::Int(3));
}

#[test]
fn update_writes_dirty_columns_and_advances_the_version() {
    let mut h = Harness::new();
    let order = h.find("Order", 1);
    h.context.set_value(order, 2, Value::from("paid")).unwrap();
    h.conn.clear_log();

    let summary = h.writer().flush().unwrap();

    assert_eq!(summary.updates, 1);
    let sql = &h.conn.executed()[0];
    assert!(sql.starts_with("UPDATE orders"), "{sql}");
    assert!(sql.contains("status = ?, version = ?"), "{sql}");
    assert!(!sql.contains("total"), "{sql}");
    assert_eq!(h.value(order, 3), Value::Int(2));
    assert_eq!(h.context.status(order).unwrap(), EntityStatus::Flushed);
}

#[test]
fn unchanged_instances_write_nothing() {
    let mut h = Harness::new();
    h.find("Order", 1);
    h.conn.clear_log();

    let summary = h.writer().flush().unwrap();

    assert!(summary.is_empty());
    assert!(h.conn.executed().is_empty());
}

#[test]
fn changed_reference_updates_the_foreign_key_column() {
    let mut h = Harness::new();
    let order = h.find("Order", 3);
    let bob = h.find("Customer", 2);
    h.context
        .set_relation(order, 0, RelationSlot::One(Some(bob)))
        .unwrap();

    assert_eq!(h.writer().flush().unwrap().updates, 1);

    let rows = h.db.rows("orders").unwrap();
    let row = rows.iter().find(|row| row[0] == Value::Int(3)).unwrap();
    assert_eq!(row[4], Value::Int(2));
}

#[test]
fn stale_versions_fail_with_an_optimistic_lock_error() {
    metrics_reset_all();
    let mut h = Harness::new();
    let mut other = h.sibling();

    let mine = h.find("Order", 1);
    let theirs = other.find("Order", 1);
    other.context.set_value(theirs, 2, Value::from("shipped")).unwrap();
    other.writer().flush().unwrap();

    h.context.set_value(mine, 2, Value::from("paid")).unwrap();
    let err = h.writer().flush().unwrap_err();

    assert_eq!(err.class, ErrorClass::OptimisticLock);
    assert!(err.is_optimistic_lock());
    assert_eq!(metrics_snapshot().ops.optimistic_lock_failures, 1);
}

#[test]
fn changing_a_managed_key_is_a_conflict() {
    let mut h = Harness::new();
    let order = h.find("Order", 1);
    h.context.set_value(order, 0, Value::Int(42)).unwrap();

    let err = h.writer().write(order).unwrap_err();

    assert_eq!(err.class, ErrorClass::Conflict);
}

#[test]
fn remove_deletes_join_rows_then_the_row() {
    let mut h = Harness::new();
    let order = h.find("Order", 1);

    h.writer().remove(order).unwrap();
    let summary = h.writer().flush().unwrap();

    assert_eq!(summary.deletes, 1);
    assert_eq!(h.context.status(order).unwrap(), EntityStatus::Removed);
    assert_eq!(h.db.row_count("orders").unwrap(), 2);
    assert_eq!(h.db.row_count("order_products").unwrap(), 1);
}

#[test]
fn remove_cascades_to_lazy_relations_after_loading_them() {
    let mut h = Harness::new();
    let user = h.find("User", 1);

    h.writer().remove(user).unwrap();
    let summary = h.writer().flush().unwrap();

    assert_eq!(summary.deletes, 2);
    assert_eq!(h.db.row_count("users").unwrap(), 0);
    assert_eq!(h.db.row_count("profile").unwrap(), 0);
}

#[test]
fn persist_cancels_a_pending_removal() {
    let mut h = Harness::new();
    let order = h.find("Order", 2);

    h.writer().remove(order).unwrap();
    h.writer().persist(order).unwrap();
    let summary = h.writer().flush().unwrap();

    assert_eq!(summary.deletes, 0);
    assert_eq!(h.db.row_count("orders").unwrap(), 3);
}

#[test]
fn join_table_membership_is_rewritten_when_it_changes() {
    let mut h = Harness::new();
    let order = h.find("Order", 2);
    let ink = h.find("Product", 11);
    let mut members = h.loader().load_attribute(order, 1).unwrap().targets();
    members.push(ink);
    h.context
        .set_relation(order, 1, RelationSlot::Many(members))
        .unwrap();

    let summary = h.writer().flush().unwrap();

    assert_eq!(summary.join_rows, 2);
    assert_eq!(h.db.row_count("order_products").unwrap(), 4);

    h.conn.clear_log();
    assert!(h.writer().flush().unwrap().is_empty());
}

#[test]
fn persist_cascades_into_join_table_members() {
    let mut h = Harness::new();
    let order = h.context.create(h.entity("Order"));
    let product = h.context.create(h.entity("Product"));
    h.context.set_value(order, 1, Value::Int(1)).unwrap();
    h.context.set_value(product, 0, Value::Int(12)).unwrap();
    h.context.set_value(product, 1, Value::from("pad")).unwrap();
    h.context.set_value(product, 2, Value::Float(2.0)).unwrap();
    h.context
        .set_relation(order, 1, RelationSlot::Many(vec![product]))
        .unwrap();

    h.writer().persist(order).unwrap();
    assert_eq!(
        h.context.status(product).unwrap(),
        EntityStatus::PersistNotFlushed
    );
    let summary = h.writer().flush().unwrap();

    assert_eq!(summary.inserts, 2);
    assert_eq!(summary.join_rows, 1);
    assert_eq!(h.db.row_count("product").unwrap(), 3);
}

#[test]
fn references_to_unpersisted_instances_are_rejected() {
    let mut h = Harness::new();
    let order = h.find("Order", 3);
    let stranger = h.context.create(h.entity("Customer"));
    h.context
        .set_relation(order, 0, RelationSlot::One(Some(stranger)))
        .unwrap();

    let err = h.writer().flush().unwrap_err();

    assert_eq!(err.class, ErrorClass::NotManaged);
}

#[test]
fn assigned_keys_must_be_set_before_persist() {
    let mut h = Harness::new();
    let product = h.context.create(h.entity("Product"));

    let err = h.writer().persist(product).unwrap_err();

    assert_eq!(err.class, ErrorClass::InvariantViolation);
}

#[test]
fn persisting_a_duplicate_key_conflicts() {
    let mut h = Harness::new();
    h.find("Product", 10);
    let copy = h.context.create(h.entity("Product"));
    h.context.set_value(copy, 0, Value::Int(10)).unwrap();

    let err = h.writer().persist(copy).unwrap_err();

    assert_eq!(err.class, ErrorClass::Conflict);
}

#[test]
fn bulk_update_reports_affected_rows() {
    let mut h = Harness::new();
    let query = Compiler::new(h.registry.clone())
        .compile_text("UPDATE Order o SET o.status = 'done' WHERE o.total < :cap")
        .unwrap();
    let slot_values = Bindings::new().with("cap", 100).resolve(&query.params).unwrap();

    let affected = h.writer().execute_bulk(&query, &slot_values).unwrap();

    assert_eq!(affected, 2);
}

// ----------------------------------------------------------------------
// Execution plumbing
// ----------------------------------------------------------------------

///
/// RecordingSink
///

struct RecordingSink {
    events: Mutex<Vec<StatementTraceEvent>>,
}

impl StatementTraceSink for RecordingSink {
    fn on_event(&self, event: StatementTraceEvent) {
        self.events.lock().unwrap().push(event);
    }
}

static TRACE: RecordingSink = RecordingSink {
    events: Mutex::new(Vec::new()),
};

#[test]
fn traced_statements_report_start_phases_and_finish() {
    let mut h = Harness::new();
    h.options = ExecutionOptions::default().with_trace(&TRACE);

    h.find("Order", 1);

    let events = TRACE.events.lock().unwrap().clone();
    assert_eq!(events.len(), 4);
    assert!(matches!(
        events[0],
        StatementTraceEvent::Start {
            operation: TraceOperation::Select,
            ..
        }
    ));
    assert!(matches!(
        events[1],
        StatementTraceEvent::Phase {
            phase: TracePhase::Bind,
            rows: 1,
            ..
        }
    ));
    assert!(matches!(
        events[2],
        StatementTraceEvent::Phase {
            phase: TracePhase::Store,
            rows: 1,
            ..
        }
    ));
    assert!(matches!(events[3], StatementTraceEvent::Finish { rows: 1, .. }));
}

#[test]
fn cached_statements_run_the_same_sql() {
    let mut h = Harness::new();
    h.find("Order", 1);
    h.find("Order", 2);
    let plain = h.conn.executed().to_vec();

    let cached = CachedStatementFactory::from_registry(h.registry.clone());
    let mut context = PersistenceContext::new(h.registry.clone());
    let mut conn = h.db.connect();
    let options = ExecutionOptions::default();
    let order = h.entity("Order");
    let mut loader = EntityLoader::new(&cached, &mut context, &mut conn, &options);
    for key in [1, 2] {
        loader
            .find_by_id(order, &PrimaryKey::single(key), LockMode::None)
            .unwrap();
    }

    assert_eq!(conn.executed(), plain.as_slice());
    let stats = cached.stats();
    assert_eq!((stats.hits, stats.misses), (1, 1));
}
