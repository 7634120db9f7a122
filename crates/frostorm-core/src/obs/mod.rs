//! Observability: runtime counters and the sink boundary that feeds them.
//!
//! Engine code records `MetricsEvent`s through `sink::record` only; it never
//! touches `metrics` state directly.

pub(crate) mod metrics;
pub(crate) mod sink;


pub use metrics::{EntityCounters, EventOps, EventState};
pub use sink::{MetricsEvent, MetricsSink, metrics_reset_all, metrics_snapshot, with_metrics_sink};
