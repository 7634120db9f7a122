//! Statement tracing boundary.
//!
//! Tracing is optional, injected by the caller, and must not affect execution semantics.

use crate::{
    db::sql::{StatementFingerprint, StatementKind},
    error::{ErrorClass, ErrorOrigin, InternalError},
};

///
/// StatementTraceSink
///

pub trait StatementTraceSink: Send + Sync {
    fn on_event(&self, event: StatementTraceEvent);
}

///
/// TraceOperation
/// Which store call carried the statement.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TraceOperation {
    Select,
    Execute,
    InsertReturningKey,
}

///
/// TracePhase
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TracePhase {
    /// Parameter values resolved and arranged in placeholder order.
    Bind,
    /// Rows returned (or affected) by the store.
    Store,
}

///
/// StatementTraceEvent
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StatementTraceEvent {
    Start {
        fingerprint: StatementFingerprint,
        operation: TraceOperation,
        kind: StatementKind,
    },
    Phase {
        fingerprint: StatementFingerprint,
        operation: TraceOperation,
        phase: TracePhase,
        rows: u64,
    },
    Finish {
        fingerprint: StatementFingerprint,
        operation: TraceOperation,
        rows: u64,
    },
    Error {
        fingerprint: StatementFingerprint,
        operation: TraceOperation,
        class: ErrorClass,
        origin: ErrorOrigin,
    },
}

///
/// TraceScope
///

pub(crate) struct TraceScope {
    sink: &'static dyn StatementTraceSink,
    fingerprint: StatementFingerprint,
    operation: TraceOperation,
}

impl TraceScope {
    pub(crate) fn start(
        sink: Option<&'static dyn StatementTraceSink>,
        sql: &str,
        operation: TraceOperation,
        kind: StatementKind,
    ) -> Option<Self> {
        let sink = sink?;
        let fingerprint = StatementFingerprint::of_sql(sql);
        sink.on_event(StatementTraceEvent::Start {
            fingerprint,
            operation,
            kind,
        });

        Some(Self {
            sink,
            fingerprint,
            operation,
        })
    }

    pub(crate) fn phase(&self, phase: TracePhase, rows: u64) {
        self.sink.on_event(StatementTraceEvent::Phase {
            fingerprint: self.fingerprint,
            operation: self.operation,
            phase,
            rows,
        });
    }

    pub(crate) fn finish(self, rows: u64) {
        self.sink.on_event(StatementTraceEvent::Finish {
            fingerprint: self.fingerprint,
            operation: self.operation,
            rows,
        });
    }

    pub(crate) fn error(self, err: &InternalError) {
        self.sink.on_event(StatementTraceEvent::Error {
            fingerprint: self.fingerprint,
            operation: self.operation,
            class: err.class,
            origin: err.origin,
        });
    }
}
