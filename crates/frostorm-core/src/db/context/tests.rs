use super::*;
use crate::{error::ErrorClass, test_fixtures::shop_registry};

fn context() -> (PersistenceContext, EntityId) {
    let registry = shop_registry();
    let order = registry.entity_by_name("Order").expect("order").id;
    (PersistenceContext::new(registry), order)
}

fn keyed(context: &mut PersistenceContext, entity: EntityId, key: i64) -> InstanceId {
    let id = context.create(entity);
    context.set_value(id, 0, Value::Int(key)).expect("key");
    context
        .transition(id, EntityStatus::FlushedLoadedFromDb)
        .expect("loaded");
    context
        .add_managed(id, PrimaryKey::single(key))
        .expect("managed");
    id
}

#[test]
fn fresh_instances_are_new_with_empty_relations() {
    let (mut context, order) = context();
    let id = context.create(order);
    let instance = context.instance(id).expect("instance");

    assert_eq!(instance.status(), EntityStatus::New);
    assert!(instance.values().iter().all(Value::is_null));
    assert_eq!(instance.relation(0), Some(&RelationSlot::One(None)));
    assert_eq!(instance.relation(1), Some(&RelationSlot::Many(Vec::new())));
    assert!(!context.is_managed(id));
}

#[test]
fn find_returns_the_registered_instance() {
    let (mut context, order) = context();
    let id = keyed(&mut context, order, 7);

    assert_eq!(context.find(order, &PrimaryKey::single(7)), Some(id));
    assert_eq!(context.find(order, &PrimaryKey::single(8)), None);
    assert!(context.is_managed(id));
    assert_eq!(context.len(), 1);
}

#[test]
fn later_registration_replaces_the_map_entry() {
    let (mut context, order) = context();
    let first = keyed(&mut context, order, 1);
    let second = keyed(&mut context, order, 1);

    assert_eq!(context.find(order, &PrimaryKey::single(1)), Some(second));
    assert!(!context.is_managed(first));
    assert!(context.is_managed(second));
    assert_eq!(context.len(), 1);
}

#[test]
fn mutated_key_is_no_longer_managed() {
    let (mut context, order) = context();
    let id = keyed(&mut context, order, 1);
    context.set_value(id, 0, Value::Int(2)).expect("set");

    assert!(!context.is_managed(id));
    assert_eq!(context.registered_key(id), Some(&PrimaryKey::single(1)));
}

#[test]
fn access_order_moves_refreshed_entries_to_the_end() {
    let (mut context, order) = context();
    let a = keyed(&mut context, order, 1);
    let b = keyed(&mut context, order, 2);
    context.add_managed(a, PrimaryKey::single(1)).expect("refresh");

    assert_eq!(context.access_order(), vec![b, a]);
}

#[test]
fn access_order_tracks_many_retouched_entries() {
    let (mut context, order) = context();
    let ids: Vec<_> = (0..200).map(|key| keyed(&mut context, order, key)).collect();

    for (key, id) in ids.iter().enumerate().filter(|(key, _)| key % 2 == 0) {
        let key = i64::try_from(key).expect("key");
        context.add_managed(*id, PrimaryKey::single(key)).expect("refresh");
    }
    context.detach(ids[1]).expect("detach");
    context.mark_for_removal(ids[3]).expect("remove");

    let odd = ids.iter().skip(5).step_by(2);
    let even = ids.iter().step_by(2);
    let expected: Vec<_> = odd.chain(even).copied().collect();

    assert_eq!(context.access_order(), expected);
    assert_eq!(context.removal_order(), &[ids[3]]);
}

#[test]
fn removal_moves_instances_to_the_removal_list() {
    let (mut context, order) = context();
    let a = keyed(&mut context, order, 1);
    let b = keyed(&mut context, order, 2);

    context.mark_for_removal(b).expect("remove b");
    context.mark_for_removal(a).expect("remove a");
    context.mark_for_removal(b).expect("remove b again");

    assert_eq!(context.status(a).expect("status"), EntityStatus::RemovedNotFlushed);
    assert!(context.access_order().is_empty());
    assert_eq!(context.removal_order(), &[a, b]);

    context.complete_removal(a).expect("complete");
    assert_eq!(context.status(a).expect("status"), EntityStatus::Removed);
    assert_eq!(context.find(order, &PrimaryKey::single(1)), None);
}

#[test]
fn removing_a_pending_insert_drops_it() {
    let (mut context, order) = context();
    let id = context.create(order);
    context
        .transition(id, EntityStatus::PersistNotFlushed)
        .expect("persist");
    context.add_pending(id);
    assert!(context.is_managed(id));

    context.mark_for_removal(id).expect("remove");

    assert_eq!(context.status(id).expect("status"), EntityStatus::New);
    assert!(context.access_order().is_empty());
    assert!(context.removal_order().is_empty());
}

#[test]
fn operations_on_unmanaged_instances_fail_as_not_managed() {
    let (mut context, order) = context();
    let id = context.create(order);

    let err = context.mark_for_removal(id).expect_err("new instance");
    assert_eq!(err.class, ErrorClass::NotManaged);
    let err = context.detach(id).expect_err("new instance");
    assert_eq!(err.class, ErrorClass::NotManaged);
}

#[test]
fn detach_evicts_and_is_terminal() {
    let (mut context, order) = context();
    let id = keyed(&mut context, order, 3);

    context.detach(id).expect("detach");

    assert_eq!(context.status(id).expect("status"), EntityStatus::Detached);
    assert_eq!(context.find(order, &PrimaryKey::single(3)), None);
    assert!(context.load_state(id).is_none());
    assert!(context.transition(id, EntityStatus::Flushed).is_err());
}

#[test]
fn detach_all_empties_the_context() {
    let (mut context, order) = context();
    let a = keyed(&mut context, order, 1);
    let b = keyed(&mut context, order, 2);
    context.mark_for_removal(b).expect("remove");
    context.postpone_foreign_key(a, 0);

    context.detach_all();

    assert!(context.is_empty());
    assert!(context.access_order().is_empty());
    assert!(context.removal_order().is_empty());
    assert!(context.postponed().is_empty());
    assert_eq!(context.status(a).expect("status"), EntityStatus::Detached);
    assert_eq!(context.status(b).expect("status"), EntityStatus::Detached);
}

#[test]
fn incomplete_keys_never_enter_the_map() {
    let (mut context, order) = context();
    let id = context.create(order);

    let err = context
        .add_managed(id, PrimaryKey::single(Value::Null))
        .expect_err("null key");
    assert_eq!(err.class, ErrorClass::InvariantViolation);
}

#[test]
fn status_transitions_follow_the_lifecycle() {
    use EntityStatus::*;

    assert!(New.can_become(PersistNotFlushed));
    assert!(PersistNotFlushed.can_become(Flushed));
    assert!(Flushed.can_become(Flushed));
    assert!(FlushedLoadedFromDb.can_become(RemovedNotFlushed));
    assert!(RemovedNotFlushed.can_become(Removed));
    assert!(Flushed.can_become(Detached));

    assert!(!New.can_become(Flushed));
    assert!(!New.can_become(Detached));
    assert!(!Removed.can_become(Flushed));
    assert!(!Detached.can_become(FlushedLoadedFromDb));
    assert!(!PersistNotFlushed.can_become(RemovedNotFlushed));
}

#[test]
fn postponed_keys_are_deduplicated_and_drained() {
    let (mut context, order) = context();
    let id = keyed(&mut context, order, 1);
    context.postpone_foreign_key(id, 0);
    context.postpone_foreign_key(id, 0);

    assert_eq!(context.take_postponed().len(), 1);
    assert!(context.postponed().is_empty());
}
