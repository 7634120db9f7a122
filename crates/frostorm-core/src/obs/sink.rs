//! Metrics sink boundary.
//!
//! Core engine logic MUST NOT depend on obs::metrics directly.
//! All instrumentation flows through MetricsEvent and MetricsSink.
use crate::{db::sql::StatementKind, obs::metrics};
use std::{cell::RefCell, rc::Rc};

thread_local! {
    static SINK_OVERRIDE: RefCell<Option<Rc<dyn MetricsSink>>> = RefCell::new(None);
}

///
/// MetricsEvent
///
/// `entity` is the table name the event concerns.
///

#[derive(Clone, Copy, Debug)]
pub enum MetricsEvent<'a> {
    StatementExecuted {
        kind: StatementKind,
        entity: &'a str,
    },
    RowsMaterialized {
        entity: &'a str,
        rows: u64,
    },
    IdentityMapHit {
        entity: &'a str,
    },
    LazyLoad {
        entity: &'a str,
    },
    StatementCache {
        hit: bool,
    },
    OptimisticLockFailure {
        entity: &'a str,
    },
    Flush {
        inserts: u64,
        updates: u64,
        deletes: u64,
    },
}

///
/// MetricsSink
///

pub trait MetricsSink {
    fn record(&self, event: MetricsEvent<'_>);
}

/// GlobalMetricsSink
/// Default process-local sink that writes into thread-local metrics state.
/// Acts as the concrete sink when no scoped override is installed.

pub(crate) struct GlobalMetricsSink;

impl MetricsSink for GlobalMetricsSink {
    fn record(&self, event: MetricsEvent<'_>) {
        match event {
            MetricsEvent::StatementExecuted { kind, entity } => {
                metrics::with_state_mut(|m| {
                    let counter = match kind {
                        StatementKind::Select => &mut m.ops.selects,
                        StatementKind::Insert => &mut m.ops.inserts,
                        StatementKind::Update => &mut m.ops.updates,
                        StatementKind::Delete => &mut m.ops.deletes,
                    };
                    *counter = counter.saturating_add(1);

                    let entry = metrics::entity_mut(m, entity);
                    entry.statements = entry.statements.saturating_add(1);
                });
            }

            MetricsEvent::RowsMaterialized { entity, rows } => {
                metrics::with_state_mut(|m| {
                    m.ops.rows_materialized = m.ops.rows_materialized.saturating_add(rows);
                    let entry = metrics::entity_mut(m, entity);
                    entry.rows_materialized = entry.rows_materialized.saturating_add(rows);
                });
            }

            MetricsEvent::IdentityMapHit { entity } => {
                metrics::with_state_mut(|m| {
                    m.ops.identity_map_hits = m.ops.identity_map_hits.saturating_add(1);
                    let entry = metrics::entity_mut(m, entity);
                    entry.identity_map_hits = entry.identity_map_hits.saturating_add(1);
                });
            }

            MetricsEvent::LazyLoad { entity } => {
                metrics::with_state_mut(|m| {
                    m.ops.lazy_loads = m.ops.lazy_loads.saturating_add(1);
                    let entry = metrics::entity_mut(m, entity);
                    entry.lazy_loads = entry.lazy_loads.saturating_add(1);
                });
            }

            MetricsEvent::StatementCache { hit } => {
                metrics::with_state_mut(|m| {
                    if hit {
                        m.ops.cache_hits = m.ops.cache_hits.saturating_add(1);
                    } else {
                        m.ops.cache_misses = m.ops.cache_misses.saturating_add(1);
                    }
                });
            }

            MetricsEvent::OptimisticLockFailure { entity } => {
                metrics::with_state_mut(|m| {
                    m.ops.optimistic_lock_failures =
                        m.ops.optimistic_lock_failures.saturating_add(1);
                    let entry = metrics::entity_mut(m, entity);
                    entry.optimistic_lock_failures =
                        entry.optimistic_lock_failures.saturating_add(1);
                });
            }

            MetricsEvent::Flush {
                inserts,
                updates,
                deletes,
            } => {
                metrics::with_state_mut(|m| {
                    m.ops.flushes = m.ops.flushes.saturating_add(1);
                    m.ops.flushed_inserts = m.ops.flushed_inserts.saturating_add(inserts);
                    m.ops.flushed_updates = m.ops.flushed_updates.saturating_add(updates);
                    m.ops.flushed_deletes = m.ops.flushed_deletes.saturating_add(deletes);
                });
            }
        }
    }
}

pub(crate) const GLOBAL_METRICS_SINK: GlobalMetricsSink = GlobalMetricsSink;

pub(crate) fn record(event: MetricsEvent<'_>) {
    let override_sink = SINK_OVERRIDE.with(|cell| cell.borrow().clone());
    match override_sink {
        Some(sink) => sink.record(event),
        None => GLOBAL_METRICS_SINK.record(event),
    }
}

/// Snapshot the current thread's metrics state.
#[must_use]
pub fn metrics_snapshot() -> metrics::EventState {
    metrics::snapshot()
}

/// Reset all metrics state.
pub fn metrics_reset_all() {
    metrics::reset();
}

/// Run a closure with a temporary metrics sink override.
pub fn with_metrics_sink<T>(sink: Rc<dyn MetricsSink>, f: impl FnOnce() -> T) -> T {
    struct Guard(Option<Rc<dyn MetricsSink>>);

    impl Drop for Guard {
        fn drop(&mut self) {
            let prev = self.0.take();
            SINK_OVERRIDE.with(|cell| {
                *cell.borrow_mut() = prev;
            });
        }
    }

    let prev = SINK_OVERRIDE.with(|cell| cell.borrow_mut().replace(sink));
    let _guard = Guard(prev);

    f()
}
