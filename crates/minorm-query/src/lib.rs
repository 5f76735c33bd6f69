//! Query construction for minorm.
//!
//! - [`CriteriaQuery`]: a programmatic, string-free query over one root entity
//!   with optional relationship joins and predicates. Execution goes through
//!   the session so results land in its identity map.
//! - [`InsertBuilder`], [`UpdateBuilder`], [`DeleteBuilder`], [`LinkBuilder`]:
//!   statement builders used by the session's flush.
//!
//! The SQL text produced here is an implementation detail; only the results
//! of running it are a contract.

pub mod builder;
pub mod criteria;
pub mod expr;

pub use builder::{DeleteBuilder, InsertBuilder, LinkBuilder, UpdateBuilder};
pub use criteria::{CriteriaQuery, Join, JoinKind, OrderBy, Path, Root};
pub use expr::{BinaryOp, Expr, Source};
pub use minorm_core::Dialect;
