//! minorm: a small object-relational mapper.
//!
//! `minorm` is the **user-facing facade** of the workspace. It re-exports the
//! core types, the query builder, schema generation, the session and the
//! SQLite driver so applications can depend on a single crate.
//!
//! # Role In The Architecture
//!
//! - **Facade**: one import surface over the `minorm-*` crates.
//! - **Prelude**: `use minorm::prelude::*` brings in everything a typical
//!   data-access module needs.
//! - **Demo domain**: [`demo`] maps a small course catalogue (courses,
//!   students, passports, reviews) and a repository over it.
//!
//! # Quick Start
//!
//! ```ignore
//! use minorm::prelude::*;
//! use minorm::demo::{Course, seed};
//!
//! let conn = SqliteConnection::open_memory()?;
//! seed(&cx, &conn).await?;
//!
//! let mut session = Session::new(conn);
//! let course = session.get::<Course>(&cx, 10001).await?.unwrap();
//! let reviews = session.fetch_many(&cx, &course, &Course::REVIEWS).await?;
//!
//! let query = CriteriaQuery::<Course>::from();
//! let root = query.root();
//! let query = query.filter(root.get("name").like("%100 Steps"));
//! let courses = session.list(&cx, &query).await?;
//! ```

pub mod demo;
pub mod session;

pub use minorm_core::{
    ChangeSet, Connection, Cx, Dialect, Error, FieldInfo, Lazy, LazyMany, LazyState,
    LinkTableInfo, Model, Outcome, ReferentialAction, RelationshipInfo, RelationshipKind, Result,
    Row, SessionBinding, Shared, SqlEnum, SqlType, ToMany, ToOne, Value, WritePhase, shared,
};
pub use minorm_query::{
    CriteriaQuery, DeleteBuilder, Expr, InsertBuilder, Join, JoinKind, OrderBy, Path, Root,
    UpdateBuilder,
};
pub use minorm_schema::SchemaBuilder;
pub use minorm_sqlite::{SqliteConfig, SqliteConnection, SqliteLocation};
pub use session::{FetchStats, ObjectKey, ObjectState, Session, SessionConfig, SessionDebugInfo};

/// Everything a typical data-access module needs.
pub mod prelude {
    pub use crate::{
        ChangeSet, Connection, CriteriaQuery, Cx, Error, FieldInfo, Join, JoinKind, Lazy,
        LazyMany, Model, Outcome, RelationshipInfo, RelationshipKind, Result, Row,
        SchemaBuilder, Session, SessionConfig, Shared, SqlEnum, SqlType, SqliteConfig,
        SqliteConnection, ToMany, ToOne, Value, shared,
    };
}
