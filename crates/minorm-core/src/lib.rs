//! Core types and traits for minorm.
//!
//! `minorm-core` is the **foundation layer** of the workspace. It defines the
//! traits and core data types that all other crates build on.
//!
//! # Role In The Architecture
//!
//! - **Contract layer**: `Model` and `Connection` are the primary traits implemented by
//!   entity types and storage drivers.
//! - **Mapping descriptors**: `FieldInfo` and `RelationshipInfo` are declared statically
//!   by each entity; nothing is discovered at runtime.
//! - **Data model**: `Row`, `Value`, and `SqlType` represent query inputs/outputs and
//!   are shared across query, schema, session, and driver crates.
//! - **Relationship handles**: `Lazy` and `LazyMany` are explicit loaded/unloaded
//!   variants bound to the session that materialized their owner.
//! - **Structured concurrency**: re-exports `Cx` and `Outcome` from asupersync so every
//!   async database operation is cancel-correct.

// Re-export asupersync primitives for structured concurrency
pub use asupersync::{Cx, Outcome};

pub mod changes;
pub mod connection;
pub mod dialect;
pub mod error;
pub mod field;
pub mod model;
pub mod relationship;
pub mod row;
pub mod types;
pub mod value;

pub use changes::ChangeSet;
pub use connection::Connection;
pub use dialect::Dialect;
pub use error::{Error, Result};
pub use field::{FieldInfo, ReferentialAction};
pub use model::{LinkOp, Model, PendingLink, Shared, WritePhase, shared};
pub use relationship::{
    Lazy, LazyMany, LazyState, LinkTableInfo, RelationshipInfo, RelationshipKind,
    SessionBinding, ToMany, ToOne, find_relationship,
};
pub use row::Row;
pub use types::{SqlEnum, SqlType};
pub use value::{FromValue, Value};

/// Unwrap an `Outcome`, returning early from the enclosing async function on
/// anything other than `Outcome::Ok`.
#[macro_export]
macro_rules! try_outcome {
    ($expr:expr) => {
        match $expr {
            $crate::Outcome::Ok(value) => value,
            $crate::Outcome::Err(e) => return $crate::Outcome::Err(e),
            $crate::Outcome::Cancelled(r) => return $crate::Outcome::Cancelled(r),
            $crate::Outcome::Panicked(p) => return $crate::Outcome::Panicked(p),
        }
    };
}

/// Unwrap a `Result<T, Error>` inside a function returning `Outcome<_, Error>`.
#[macro_export]
macro_rules! try_result {
    ($expr:expr) => {
        match $expr {
            Ok(value) => value,
            Err(e) => return $crate::Outcome::Err(e),
        }
    };
}
