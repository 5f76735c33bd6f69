//! Field and column definitions.

use crate::types::SqlType;

/// Referential action for foreign key constraints (ON DELETE).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReferentialAction {
    /// No action - raise error if any references exist.
    #[default]
    NoAction,
    /// Restrict - same as NO ACTION.
    Restrict,
    /// Cascade - automatically delete referencing rows.
    Cascade,
    /// Set null - set referencing columns to NULL.
    SetNull,
}

impl ReferentialAction {
    /// Get the SQL representation of this action.
    #[must_use]
    pub const fn as_sql(&self) -> &'static str {
        match self {
            ReferentialAction::NoAction => "NO ACTION",
            ReferentialAction::Restrict => "RESTRICT",
            ReferentialAction::Cascade => "CASCADE",
            ReferentialAction::SetNull => "SET NULL",
        }
    }
}

/// Metadata about a persisted column of a model.
///
/// A model's `fields()` slice lists its columns in the same order as
/// `Model::to_row` produces values; change tracking refers to fields by
/// their index in that slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldInfo {
    /// Rust field name, used by the query builder (`root.get("name")`).
    pub name: &'static str,
    /// Database column name.
    pub column_name: &'static str,
    /// SQL type for this column.
    pub sql_type: SqlType,
    /// Whether this column is nullable.
    pub nullable: bool,
    /// Whether this is the primary key.
    pub primary_key: bool,
    /// Whether storage assigns the value.
    pub auto_increment: bool,
    /// Whether this column has a unique constraint.
    pub unique: bool,
    /// Foreign key reference as `(table, column)`.
    pub foreign_key: Option<(&'static str, &'static str)>,
    /// ON DELETE action for the foreign key.
    pub on_delete: Option<ReferentialAction>,
}

impl FieldInfo {
    /// Create a new non-null column.
    pub const fn new(name: &'static str, column_name: &'static str, sql_type: SqlType) -> Self {
        Self {
            name,
            column_name,
            sql_type,
            nullable: false,
            primary_key: false,
            auto_increment: false,
            unique: false,
            foreign_key: None,
            on_delete: None,
        }
    }

    /// An auto-increment integer primary key named `id`.
    pub const fn id() -> Self {
        Self::new("id", "id", SqlType::BigInt)
            .primary_key(true)
            .auto_increment(true)
    }

    /// Set nullable flag.
    pub const fn nullable(mut self, value: bool) -> Self {
        self.nullable = value;
        self
    }

    /// Set primary key flag.
    pub const fn primary_key(mut self, value: bool) -> Self {
        self.primary_key = value;
        self
    }

    /// Set auto-increment flag.
    pub const fn auto_increment(mut self, value: bool) -> Self {
        self.auto_increment = value;
        self
    }

    /// Set unique flag.
    pub const fn unique(mut self, value: bool) -> Self {
        self.unique = value;
        self
    }

    /// Set a foreign key reference.
    pub const fn foreign_key(mut self, table: &'static str, column: &'static str) -> Self {
        self.foreign_key = Some((table, column));
        self
    }

    /// Set the ON DELETE action.
    pub const fn on_delete(mut self, action: ReferentialAction) -> Self {
        self.on_delete = Some(action);
        self
    }
}
