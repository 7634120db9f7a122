//! Memoizing decorator over the statement factory.
//!
//! Keys are structural, so every request shape is built once per descriptor
//! set. There is no eviction: the key space is bounded by the entity shapes
//! known when the registry was built.

use crate::{
    db::statement::{FactoryStatement, StatementFactory, StatementKey, StatementSource},
    error::{ErrorOrigin, InternalError},
    model::DescriptorRegistry,
    obs::sink::{self, MetricsEvent},
};
use std::{
    collections::BTreeMap,
    sync::{
        Arc, RwLock,
        atomic::{AtomicUsize, Ordering},
    },
};

///
/// CacheStats
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
    pub size: usize,
}

///
/// CachedStatementFactory
///
/// Safe to share between units of work. Reads take the read lock only;
/// a miss builds outside any lock and inserts-if-absent under the write
/// lock, so concurrent misses on one key converge on a single entry.
///

#[derive(Debug)]
pub struct CachedStatementFactory {
    inner: StatementFactory,
    statements: RwLock<BTreeMap<StatementKey, Arc<FactoryStatement>>>,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl CachedStatementFactory {
    #[must_use]
    pub const fn new(inner: StatementFactory) -> Self {
        Self {
            inner,
            statements: RwLock::new(BTreeMap::new()),
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn from_registry(registry: Arc<DescriptorRegistry>) -> Self {
        Self::new(StatementFactory::new(registry))
    }

    #[must_use]
    pub const fn inner(&self) -> &StatementFactory {
        &self.inner
    }

    // Stats are best-effort; relaxed ordering is enough.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let size = self.statements.read().map_or(0, |map| map.len());

        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            size,
        }
    }

    fn lookup(&self, key: &StatementKey) -> Result<Option<Arc<FactoryStatement>>, InternalError> {
        let map = self
            .statements
            .read()
            .map_err(|_| InternalError::lock_poisoned(ErrorOrigin::Statement, "statement cache"))?;

        Ok(map.get(key).cloned())
    }
}

impl StatementSource for CachedStatementFactory {
    fn registry(&self) -> &DescriptorRegistry {
        self.inner.registry()
    }

    fn statement(&self, key: &StatementKey) -> Result<Arc<FactoryStatement>, InternalError> {
        if let Some(hit) = self.lookup(key)? {
            self.hits.fetch_add(1, Ordering::Relaxed);
            sink::record(MetricsEvent::StatementCache { hit: true });
            return Ok(hit);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        sink::record(MetricsEvent::StatementCache { hit: false });
        let built = Arc::new(self.inner.build(key)?);

        let mut map = self
            .statements
            .write()
            .map_err(|_| InternalError::lock_poisoned(ErrorOrigin::Statement, "statement cache"))?;

        Ok(Arc::clone(map.entry(key.clone()).or_insert(built)))
    }
}
