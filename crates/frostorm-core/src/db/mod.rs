//! Query compilation, statement construction, the persistence context and
//! the loader/writer pair that connects it to a store.

pub mod compile;
pub mod context;
pub mod criteria;
pub mod executor;
pub mod jpql;
pub mod session;
pub mod sql;
pub mod statement;
pub mod store;

pub use compile::{CompiledQuery, Compiler, QueryKind};
pub use context::{EntityStatus, InstanceId, PersistenceContext};
pub use criteria::{CriteriaQuery, Criterion};
pub use executor::{EntityLoader, EntityWriter, FlushSummary, QueryRow, ResultValue};
pub use session::{EntityManager, FlushMode};
