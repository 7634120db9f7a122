use serde::{Deserialize, Serialize};
use std::{cell::RefCell, collections::BTreeMap};

///
/// EventState
/// Ephemeral, in-memory counters for one thread of execution.
///

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct EventState {
    pub ops: EventOps,
    pub entities: BTreeMap<String, EntityCounters>,
}

///
/// EventOps
///

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct EventOps {
    // Statements by kind
    pub selects: u64,
    pub inserts: u64,
    pub updates: u64,
    pub deletes: u64,

    // Materialization
    pub rows_materialized: u64,
    pub identity_map_hits: u64,
    pub lazy_loads: u64,

    // Statement cache
    pub cache_hits: u64,
    pub cache_misses: u64,

    // Writer
    pub optimistic_lock_failures: u64,
    pub flushes: u64,
    pub flushed_inserts: u64,
    pub flushed_updates: u64,
    pub flushed_deletes: u64,
}

///
/// EntityCounters
/// Per-table counters.
///

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct EntityCounters {
    pub statements: u64,
    pub rows_materialized: u64,
    pub identity_map_hits: u64,
    pub lazy_loads: u64,
    pub optimistic_lock_failures: u64,
}

thread_local! {
    static EVENT_STATE: RefCell<EventState> = RefCell::new(EventState::default());
}

/// Borrow metrics immutably.
pub(crate) fn with_state<R>(f: impl FnOnce(&EventState) -> R) -> R {
    EVENT_STATE.with(|m| f(&m.borrow()))
}

/// Borrow metrics mutably.
pub(crate) fn with_state_mut<R>(f: impl FnOnce(&mut EventState) -> R) -> R {
    EVENT_STATE.with(|m| f(&mut m.borrow_mut()))
}

/// Per-entity entry, created on first use.
pub(crate) fn entity_mut<'a>(state: &'a mut EventState, entity: &str) -> &'a mut EntityCounters {
    state.entities.entry(entity.to_string()).or_default()
}

/// Reset all counters (useful in tests).
pub fn reset() {
    with_state_mut(|m| *m = EventState::default());
}

/// Clone the current counters.
#[must_use]
pub fn snapshot() -> EventState {
    with_state(Clone::clone)
}
