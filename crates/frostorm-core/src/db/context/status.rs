use derive_more::Display;

///
/// EntityStatus
///
/// Lifecycle tag of one instance. Transitions are checked by
/// [`EntityStatus::can_become`]; `Removed` and `Detached` are terminal.
///

#[derive(Clone, Copy, Debug, Default, Display, Eq, Hash, PartialEq)]
pub enum EntityStatus {
    #[default]
    #[display("new")]
    New,
    #[display("persist_not_flushed")]
    PersistNotFlushed,
    #[display("flushed")]
    Flushed,
    /// Materialized from a row; lazy relations stay unloaded until touched.
    #[display("flushed_loaded_from_db")]
    FlushedLoadedFromDb,
    #[display("removed_not_flushed")]
    RemovedNotFlushed,
    #[display("removed")]
    Removed,
    #[display("detached")]
    Detached,
}

impl EntityStatus {
    /// Tracked by a persistence context.
    #[must_use]
    pub const fn is_managed(self) -> bool {
        matches!(
            self,
            Self::PersistNotFlushed
                | Self::Flushed
                | Self::FlushedLoadedFromDb
                | Self::RemovedNotFlushed
        )
    }

    /// A row for the instance exists in the store.
    #[must_use]
    pub const fn is_flushed(self) -> bool {
        matches!(self, Self::Flushed | Self::FlushedLoadedFromDb)
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Removed | Self::Detached)
    }

    #[must_use]
    pub const fn can_become(self, next: Self) -> bool {
        match (self, next) {
            (Self::New, Self::PersistNotFlushed | Self::FlushedLoadedFromDb)
            | (Self::PersistNotFlushed, Self::Flushed | Self::New)
            | (
                Self::Flushed | Self::FlushedLoadedFromDb,
                Self::Flushed | Self::FlushedLoadedFromDb | Self::RemovedNotFlushed,
            )
            | (Self::RemovedNotFlushed, Self::Removed | Self::Flushed) => true,
            (current, Self::Detached) => current.is_managed(),
            _ => false,
        }
    }
}
