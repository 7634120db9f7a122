//! Core engine for frostorm: entity metadata, the statement tree and its
//! factory, the JPQL and criteria compilers, the persistence context, and
//! the loader/writer pair that moves rows in and out of managed instances.
#![warn(unreachable_pub)]

// public exports are one module level down
pub mod config;
pub mod db;
pub mod error;
pub mod model;
pub mod obs;
pub mod value;

// test
#[cfg(test)]
pub(crate) mod test_fixtures;

///
/// Prelude
///
/// Prelude contains only domain vocabulary.
/// No errors, runners, renderers or caches are re-exported here.
///

pub mod prelude {
    pub use crate::{
        db::{
            context::{EntityStatus, InstanceId},
            session::EntityManager,
            sql::Bindings,
        },
        model::{DescriptorRegistry, EntityBuilder, PrimaryKey, RelationBuilder},
        value::{Value, ValueKind},
    };
}
