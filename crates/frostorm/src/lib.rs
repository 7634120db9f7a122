//! frostorm: an object-relational mapping engine.
//!
//! ## Crate layout
//! - `core`: entity metadata, JPQL and criteria compilation, statement
//!   factories, the persistence context and the session.
//! - `error`: the public error taxonomy returned to callers.
//!
//! Most code only needs the `prelude`.

pub use frostorm_core as core;

pub mod error;

pub use error::Error;

/// Workspace version re-export for downstream tooling/tests.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub type Result<T> = std::result::Result<T, Error>;

///
/// Prelude
///

pub mod prelude {
    pub use crate::{
        Error,
        core::{
            config::{FlushMode, SessionConfig},
            db::{
                criteria::{CriteriaQuery, Criterion, Operand},
                store::{MemoryDatabase, StoreRunner},
            },
            prelude::*,
        },
    };
}
