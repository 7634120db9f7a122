//! Loader and writer: the two halves that move values between store rows
//! and managed instances.
//!
//! Both run statements through [`Execution`], which renders, binds,
//! traces and counts every round trip the same way.

mod bind;
mod loader;
mod trace;
mod writer;

#[cfg(test)]
mod tests;

pub use loader::{EntityLoader, QueryRow, ResultValue};
pub use trace::{StatementTraceEvent, StatementTraceSink, TraceOperation, TracePhase};
pub use writer::{EntityWriter, FlushSummary};

use crate::{
    db::{
        sql::{Dialect, DialectKind, RenderedSql, SqlRenderer, Statement},
        store::{PreparedStatement, Row, StoreError, StoreRunner},
    },
    error::InternalError,
    obs::sink::{self, MetricsEvent},
    value::Value,
};
use std::{fmt, sync::Arc};
use trace::TraceScope;

///
/// ExecutionOptions
///
/// Session-scoped execution policy shared by loader and writer.
///

#[derive(Clone)]
pub struct ExecutionOptions {
    pub dialect: Arc<dyn Dialect>,
    pub debug: bool,
    pub trace: Option<&'static dyn StatementTraceSink>,
}

impl ExecutionOptions {
    #[must_use]
    pub fn new(dialect: DialectKind) -> Self {
        Self {
            dialect: dialect.dialect(),
            debug: false,
            trace: None,
        }
    }

    #[must_use]
    pub const fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    #[must_use]
    pub const fn with_trace(mut self, sink: &'static dyn StatementTraceSink) -> Self {
        self.trace = Some(sink);
        self
    }
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self::new(DialectKind::Ansi)
    }
}

impl fmt::Debug for ExecutionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionOptions")
            .field("dialect", &self.dialect.name())
            .field("debug", &self.debug)
            .field("trace", &self.trace.is_some())
            .finish()
    }
}

///
/// Execution
///
/// One borrowed store connection plus the policy to run statements with.
///

pub(crate) struct Execution<'a, R> {
    runner: &'a mut R,
    options: &'a ExecutionOptions,
}

impl<'a, R: StoreRunner> Execution<'a, R> {
    pub(crate) const fn new(runner: &'a mut R, options: &'a ExecutionOptions) -> Self {
        Self { runner, options }
    }

    /// A shorter-lived handle over the same connection.
    pub(crate) fn reborrow(&mut self) -> Execution<'_, R> {
        Execution {
            runner: &mut *self.runner,
            options: self.options,
        }
    }

    pub(crate) fn debug_log(&self, s: impl Into<String>) {
        if self.options.debug {
            println!("[debug] {}", s.into());
        }
    }

    fn render(&self, statement: &Statement) -> RenderedSql {
        SqlRenderer::render(self.options.dialect.as_ref(), statement)
    }

    pub(crate) fn select(
        &mut self,
        statement: &Statement,
        slot_values: &[Value],
    ) -> Result<Vec<Row>, InternalError> {
        self.run(statement, slot_values, TraceOperation::Select, |runner, prepared| {
            let rows = runner.select(prepared)?;
            let count = u64::try_from(rows.len()).unwrap_or(u64::MAX);
            Ok((rows, count))
        })
    }

    pub(crate) fn execute(
        &mut self,
        statement: &Statement,
        slot_values: &[Value],
    ) -> Result<u64, InternalError> {
        self.run(statement, slot_values, TraceOperation::Execute, |runner, prepared| {
            let affected = runner.execute(prepared)?;
            Ok((affected, affected))
        })
    }

    pub(crate) fn insert_returning_key(
        &mut self,
        statement: &Statement,
        slot_values: &[Value],
    ) -> Result<Value, InternalError> {
        self.run(
            statement,
            slot_values,
            TraceOperation::InsertReturningKey,
            |runner, prepared| Ok((runner.insert_returning_key(prepared)?, 1)),
        )
    }

    pub(crate) fn next_sequence_value(&mut self, sequence: &str) -> Result<i64, InternalError> {
        let value = self.runner.next_sequence_value(sequence)?;
        self.debug_log(format!("{} -> {value}", self.options.dialect.sequence_next_value(sequence)));

        Ok(value)
    }

    // Render, bind, trace and count one round trip.
    fn run<T>(
        &mut self,
        statement: &Statement,
        slot_values: &[Value],
        operation: TraceOperation,
        call: impl FnOnce(&mut R, &PreparedStatement<'_>) -> Result<(T, u64), StoreError>,
    ) -> Result<T, InternalError> {
        let rendered = self.render(statement);
        let scope = TraceScope::start(self.options.trace, &rendered.sql, operation, statement.kind());
        let bind_values = rendered.bind_values(slot_values);
        if let Some(scope) = &scope {
            scope.phase(TracePhase::Bind, u64::try_from(bind_values.len()).unwrap_or(u64::MAX));
        }
        self.debug_log(format!("{} -- {}", rendered.sql, format_binds(&bind_values)));

        sink::record(MetricsEvent::StatementExecuted {
            kind: statement.kind(),
            entity: statement.primary_table(),
        });
        let prepared = PreparedStatement {
            statement,
            sql: &rendered.sql,
            slot_values,
            bind_values: &bind_values,
        };

        match call(&mut *self.runner, &prepared) {
            Ok((value, rows)) => {
                if let Some(scope) = scope {
                    scope.phase(TracePhase::Store, rows);
                    scope.finish(rows);
                }
                Ok(value)
            }
            Err(err) => {
                let err = InternalError::from(err);
                if let Some(scope) = scope {
                    scope.error(&err);
                }
                self.debug_log(format!("store error: {err}"));
                Err(err)
            }
        }
    }
}

fn format_binds(values: &[Value]) -> String {
    let parts: Vec<String> = values.iter().map(ToString::to_string).collect();
    format!("[{}]", parts.join(", "))
}
