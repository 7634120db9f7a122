//! Session configuration.

#[cfg(test)]
mod tests;

use crate::{
    db::sql::{DialectKind, LockMode},
    error::InternalError,
};
use serde::{Deserialize, Serialize};

///
/// FlushMode
///
/// When pending changes reach the store. `Auto` also flushes before every
/// query so results reflect in-memory edits.
///

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushMode {
    #[default]
    Auto,
    Commit,
}

///
/// SessionConfig
///
/// Every field has a default, so `{}` is a valid configuration.
///

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Print `[debug]` lines for statements and lifecycle changes.
    pub debug: bool,
    /// Share factory statements through the memoizing cache.
    pub statement_cache: bool,
    pub flush_mode: FlushMode,
    pub dialect: DialectKind,
    /// Lock requested by `find` when the caller does not pass one.
    pub default_lock: LockMode,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            debug: false,
            statement_cache: true,
            flush_mode: FlushMode::Auto,
            dialect: DialectKind::Ansi,
            default_lock: LockMode::None,
        }
    }
}

impl SessionConfig {
    pub fn from_json(text: &str) -> Result<Self, InternalError> {
        serde_json::from_str(text)
            .map_err(|err| InternalError::config(format!("invalid session config: {err}")))
    }

    pub fn to_json(&self) -> Result<String, InternalError> {
        serde_json::to_string_pretty(self)
            .map_err(|err| InternalError::config(format!("session config not serializable: {err}")))
    }

    #[must_use]
    pub const fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    #[must_use]
    pub const fn with_flush_mode(mut self, flush_mode: FlushMode) -> Self {
        self.flush_mode = flush_mode;
        self
    }

    #[must_use]
    pub const fn with_dialect(mut self, dialect: DialectKind) -> Self {
        self.dialect = dialect;
        self
    }

    #[must_use]
    pub const fn with_statement_cache(mut self, enabled: bool) -> Self {
        self.statement_cache = enabled;
        self
    }
}
