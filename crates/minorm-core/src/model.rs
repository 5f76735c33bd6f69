//! The `Model` trait implemented by every mapped entity.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::changes::ChangeSet;
use crate::error::Result;
use crate::field::FieldInfo;
use crate::relationship::{LinkTableInfo, RelationshipInfo, SessionBinding};
use crate::row::Row;
use crate::value::Value;

/// A session-managed entity instance.
///
/// Within one session every handle to a given identity is a clone of the
/// same `Arc`, so a mutation through one handle is visible through all.
pub type Shared<M> = Arc<RwLock<M>>;

/// Wrap an entity into a [`Shared`] handle.
pub fn shared<M>(model: M) -> Shared<M> {
    Arc::new(RwLock::new(model))
}

/// Direction of a pending link-table write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOp {
    /// Insert a `(local, remote)` row.
    Insert,
    /// Delete a `(local, remote)` row.
    Delete,
}

/// A many-to-many membership change waiting for the next flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingLink {
    /// Link table the row lives in.
    pub link: LinkTableInfo,
    /// Insert or delete.
    pub op: LinkOp,
    /// Identity of the remote side, resolved at flush time.
    pub remote_id: Option<i64>,
}

/// How far the writes a flush issued for an entity have come.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePhase {
    /// Written inside the open transaction.
    Flushed,
    /// Made durable by COMMIT.
    Committed,
    /// Undone by ROLLBACK; owed again on the next flush.
    RolledBack,
}

/// A mapped entity.
///
/// Implementations declare their mapping statically: `fields()` lists the
/// persisted columns (foreign key columns included), `relationships()` the
/// relationship descriptors. `to_row` must produce one value per entry of
/// `fields()`, in the same order.
pub trait Model: Send + Sync + Sized + 'static {
    /// Table name.
    const TABLE_NAME: &'static str;

    /// Primary key column.
    const PRIMARY_KEY: &'static str = "id";

    /// Persisted columns.
    fn fields() -> &'static [FieldInfo];

    /// Relationship descriptors.
    fn relationships() -> &'static [RelationshipInfo] {
        &[]
    }

    /// Storage-assigned identity, `None` while transient.
    fn primary_key(&self) -> Option<i64>;

    /// Record the identity storage assigned on insert. `None` forgets it
    /// again when that insert is rolled back.
    fn assign_primary_key(&mut self, id: Option<i64>);

    /// Column values, in `fields()` order.
    fn to_row(&self) -> Vec<(&'static str, Value)>;

    /// Materialize an entity from a result row.
    ///
    /// Relationship handles start unloaded.
    fn from_row(row: &Row) -> Result<Self>;

    /// Fields changed since load or the last flush.
    fn changes(&self) -> &ChangeSet;

    /// Mutable access to the recorded changes, for the session.
    fn changes_mut(&mut self) -> &mut ChangeSet;

    /// Bind every relationship handle to a session.
    fn bind_session(&mut self, _binding: &SessionBinding) {}

    /// Name of an owning to-one relationship whose target has no identity.
    ///
    /// The flush refuses to write such a row, since its foreign key column
    /// would silently become NULL.
    fn unsaved_reference(&self) -> Option<&'static str> {
        None
    }

    /// Link-table writes owed by owning many-to-many sides.
    fn pending_links(&self) -> Vec<PendingLink> {
        Vec::new()
    }

    /// Move membership changes of every to-many handle through the unit of
    /// work, inverse sides included.
    fn settle_links(&mut self, _phase: WritePhase) {}

    /// Look up a persisted field by its Rust name.
    fn field(name: &str) -> Option<&'static FieldInfo> {
        Self::fields().iter().find(|f| f.name == name)
    }

    /// Column names in `fields()` order.
    fn column_names() -> Vec<&'static str> {
        Self::fields().iter().map(|f| f.column_name).collect()
    }
}
