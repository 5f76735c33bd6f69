//! Error types for minorm.

use thiserror::Error;

/// Result type for minorm operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by storage drivers, the session and the query builder.
///
/// A missing row is not an error: lookups return `None` instead.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// The storage connection could not be opened or used.
    #[error("connection error: {0}")]
    Connection(String),

    /// A statement failed in the storage engine.
    #[error("query failed: {message}")]
    Query {
        /// Driver-provided message.
        message: String,
        /// The statement that failed, when known.
        sql: Option<String>,
    },

    /// A uniqueness, not-null or foreign-key constraint rejected a write.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// A lazy relationship was accessed after its owning session ended, or
    /// through a session other than the one that loaded the owner.
    #[error("detached access: {model}.{relationship} is not attached to an open session")]
    DetachedAccess {
        /// Owning model type.
        model: &'static str,
        /// Relationship field name.
        relationship: &'static str,
    },

    /// A query referenced a field or relationship the model does not declare.
    #[error("unknown attribute `{attribute}` on {model}")]
    UnknownAttribute {
        /// Model table name.
        model: &'static str,
        /// Requested attribute.
        attribute: String,
    },

    /// A column held a value of an unexpected type.
    #[error("type mismatch for column {column}: expected {expected}, found {found}")]
    Type {
        /// Column name.
        column: String,
        /// Expected type description.
        expected: &'static str,
        /// Actual value type.
        found: &'static str,
    },

    /// A result row did not contain the requested column.
    #[error("column not found: {0}")]
    ColumnNotFound(String),

    /// Any other failure.
    #[error("{0}")]
    Custom(String),
}

impl Error {
    /// Build a query error that remembers the failing statement.
    pub fn query(message: impl Into<String>, sql: impl Into<String>) -> Self {
        Error::Query {
            message: message.into(),
            sql: Some(sql.into()),
        }
    }

    /// Whether this error came from a storage constraint.
    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, Error::ConstraintViolation(_))
    }

    /// Whether this error is a detached lazy access.
    pub fn is_detached_access(&self) -> bool {
        matches!(self, Error::DetachedAccess { .. })
    }
}
