//! Relationship metadata and lazy relationship handles.
//!
//! Relationships are declared statically on each `Model` and represented as
//! `RelationshipInfo` values. The query builder uses them to generate joins and
//! emptiness tests; the session uses them to fetch lazy handles.
//!
//! A relationship field holds a [`Lazy`] (to-one) or [`LazyMany`] (to-many)
//! handle. Both are plain tagged variants: `Unloaded` until the session fetches
//! them, `Loaded` afterwards. Fetching is always an explicit session call.

use std::fmt;
use std::sync::{Arc, Weak};

use crate::model::{LinkOp, Model, PendingLink, Shared, WritePhase};

/// The type of relationship between two models.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RelationshipKind {
    /// One-to-one: `Student` has one `Passport`.
    OneToOne,
    /// Many-to-one: many `Review`s belong to one `Course`.
    #[default]
    ManyToOne,
    /// One-to-many: one `Course` has many `Review`s.
    OneToMany,
    /// Many-to-many: `Student`s attend many `Course`s via a link table.
    ManyToMany,
}

impl RelationshipKind {
    /// Whether the relationship yields a collection.
    pub const fn is_collection(self) -> bool {
        matches!(self, RelationshipKind::OneToMany | RelationshipKind::ManyToMany)
    }
}

/// Information about a link/join table for many-to-many relationships.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkTableInfo {
    /// The link table name (e.g., `"student_course"`).
    pub table_name: &'static str,

    /// Column in link table pointing to the local model (e.g., `"student_id"`).
    pub local_column: &'static str,

    /// Column in link table pointing to the remote model (e.g., `"course_id"`).
    pub remote_column: &'static str,
}

impl LinkTableInfo {
    /// Create a new link-table definition.
    #[must_use]
    pub const fn new(
        table_name: &'static str,
        local_column: &'static str,
        remote_column: &'static str,
    ) -> Self {
        Self {
            table_name,
            local_column,
            remote_column,
        }
    }
}

/// Metadata about a relationship between models.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelationshipInfo {
    /// Name of the relationship field.
    pub name: &'static str,

    /// The related model's table name.
    pub related_table: &'static str,

    /// The related model's primary key column.
    pub related_key: &'static str,

    /// Kind of relationship.
    pub kind: RelationshipKind,

    /// Local foreign key column (owning ManyToOne / OneToOne).
    /// e.g., `"course_id"` on `Review`.
    pub local_key: Option<&'static str>,

    /// Remote foreign key column (OneToMany, inverse OneToOne).
    /// e.g., `"course_id"` on `Review` when accessed from `Course`.
    pub remote_key: Option<&'static str>,

    /// Link table for ManyToMany relationships, seen from this side.
    pub link_table: Option<LinkTableInfo>,

    /// The field on the related model that points back.
    pub back_populates: Option<&'static str>,

    /// Whether this is the inverse (non-owning) side. Inverse sides never
    /// write their foreign key or link rows.
    pub inverse: bool,

    /// Whether to use lazy loading.
    pub lazy: bool,
}

impl RelationshipInfo {
    /// Create a new relationship with required fields.
    #[must_use]
    pub const fn new(
        name: &'static str,
        related_table: &'static str,
        kind: RelationshipKind,
    ) -> Self {
        Self {
            name,
            related_table,
            related_key: "id",
            kind,
            local_key: None,
            remote_key: None,
            link_table: None,
            back_populates: None,
            inverse: false,
            lazy: true,
        }
    }

    /// Set the local foreign key column.
    #[must_use]
    pub const fn local_key(mut self, key: &'static str) -> Self {
        self.local_key = Some(key);
        self
    }

    /// Set the remote foreign key column.
    #[must_use]
    pub const fn remote_key(mut self, key: &'static str) -> Self {
        self.remote_key = Some(key);
        self
    }

    /// Set the link table metadata (ManyToMany).
    #[must_use]
    pub const fn link_table(mut self, info: LinkTableInfo) -> Self {
        self.link_table = Some(info);
        self
    }

    /// Set the back-populates field name (bidirectional relationships).
    #[must_use]
    pub const fn back_populates(mut self, field: &'static str) -> Self {
        self.back_populates = Some(field);
        self
    }

    /// Mark this side as the inverse (mapped-by) side.
    #[must_use]
    pub const fn inverse(mut self) -> Self {
        self.inverse = true;
        self
    }

    /// Enable/disable lazy loading.
    #[must_use]
    pub const fn lazy(mut self, value: bool) -> Self {
        self.lazy = value;
        self
    }
}

impl Default for RelationshipInfo {
    fn default() -> Self {
        Self::new("", "", RelationshipKind::default())
    }
}

/// Find a relationship by field name.
pub fn find_relationship(
    relationships: &'static [RelationshipInfo],
    name: &str,
) -> Option<&'static RelationshipInfo> {
    relationships.iter().find(|r| r.name == name)
}

// ============================================================================
// Session binding
// ============================================================================

/// Ties relationship handles to the session that materialized their owner.
///
/// The session keeps the strong side of `alive`; once it closes or is
/// dropped, every binding it handed out reports closed.
#[derive(Debug, Clone)]
pub struct SessionBinding {
    session_id: u64,
    alive: Weak<()>,
}

impl SessionBinding {
    /// Bind to a live session.
    pub fn new(session_id: u64, alive: &Arc<()>) -> Self {
        Self {
            session_id,
            alive: Arc::downgrade(alive),
        }
    }

    /// A binding that is already closed.
    pub fn detached() -> Self {
        Self {
            session_id: 0,
            alive: Weak::new(),
        }
    }

    /// Id of the bound session.
    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    /// Whether the bound session is still open.
    pub fn is_open(&self) -> bool {
        self.alive.strong_count() > 0
    }

    /// Whether this binding belongs to the open session `session_id`.
    pub fn is_open_in(&self, session_id: u64) -> bool {
        self.session_id == session_id && self.is_open()
    }
}

// ============================================================================
// Lazy handles
// ============================================================================

/// Loaded/unloaded tag shared by [`Lazy`] and [`LazyMany`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LazyState<V> {
    /// Not fetched yet.
    Unloaded,
    /// Fetched (or set by the application).
    Loaded(V),
}

impl<V> LazyState<V> {
    /// Whether the value is present.
    pub fn is_loaded(&self) -> bool {
        matches!(self, LazyState::Loaded(_))
    }
}

/// A to-one relationship handle.
///
/// On the owning side `key` mirrors the foreign key column, so the column can
/// be written without fetching the related entity.
pub struct Lazy<T> {
    key: Option<i64>,
    state: LazyState<Option<Shared<T>>>,
    binding: Option<SessionBinding>,
}

impl<T: Model> Lazy<T> {
    /// A handle known to point at nothing (transient owners).
    pub fn empty() -> Self {
        Self {
            key: None,
            state: LazyState::Loaded(None),
            binding: None,
        }
    }

    /// An unfetched handle. `key` is the foreign key on owning sides.
    pub fn unloaded(key: Option<i64>) -> Self {
        Self {
            key,
            state: LazyState::Unloaded,
            binding: None,
        }
    }

    /// Point the handle at `target` (or at nothing).
    pub fn set(&mut self, target: Option<&Shared<T>>) {
        self.key = target.and_then(|t| t.read().primary_key());
        self.state = LazyState::Loaded(target.cloned());
    }

    /// Store the result of a fetch.
    pub fn fill(&mut self, target: Option<Shared<T>>) {
        if let Some(t) = &target {
            self.key = t.read().primary_key();
        }
        self.state = LazyState::Loaded(target);
    }

    /// Current foreign key value.
    ///
    /// A loaded target is consulted first, so a target that was transient when
    /// assigned contributes the identity it received at flush.
    pub fn foreign_key(&self) -> Option<i64> {
        match &self.state {
            LazyState::Loaded(Some(target)) => target.read().primary_key(),
            LazyState::Loaded(None) => None,
            LazyState::Unloaded => self.key,
        }
    }

    /// Whether the handle has been fetched or set.
    pub fn is_loaded(&self) -> bool {
        self.state.is_loaded()
    }

    /// Whether the handle points at an entity that has no identity.
    pub fn targets_transient(&self) -> bool {
        matches!(&self.state, LazyState::Loaded(Some(target)) if target.read().primary_key().is_none())
    }

    /// The loaded target; `None` while unloaded.
    pub fn get(&self) -> Option<Option<&Shared<T>>> {
        match &self.state {
            LazyState::Loaded(target) => Some(target.as_ref()),
            LazyState::Unloaded => None,
        }
    }

    /// Raw state.
    pub fn state(&self) -> &LazyState<Option<Shared<T>>> {
        &self.state
    }

    /// Bind to a session.
    pub fn bind(&mut self, binding: &SessionBinding) {
        self.binding = Some(binding.clone());
    }

    /// The session binding, if any.
    pub fn binding(&self) -> Option<&SessionBinding> {
        self.binding.as_ref()
    }
}

impl<T: Model> Default for Lazy<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T> fmt::Debug for Lazy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.state {
            LazyState::Unloaded => "unloaded",
            LazyState::Loaded(Some(_)) => "loaded",
            LazyState::Loaded(None) => "none",
        };
        f.debug_struct("Lazy")
            .field("key", &self.key)
            .field("state", &state)
            .finish()
    }
}

/// A to-many relationship handle.
///
/// Membership changes made before the collection is fetched are kept as
/// pending operations and merged into the fetched result. Operations a flush
/// wrote are held apart until the transaction ends, so a rollback can owe
/// them again.
pub struct LazyMany<T> {
    state: LazyState<Vec<Shared<T>>>,
    pending: Vec<(LinkOp, Shared<T>)>,
    flushed: Vec<(LinkOp, Shared<T>)>,
    binding: Option<SessionBinding>,
}

/// Record `op` for `item`. An opposite operation already queued for the same
/// item cancels out; a repeated one is dropped.
fn queue<T>(pending: &mut Vec<(LinkOp, Shared<T>)>, op: LinkOp, item: &Shared<T>) {
    if let Some(pos) = pending.iter().position(|(_, p)| Arc::ptr_eq(p, item)) {
        if pending[pos].0 != op {
            pending.remove(pos);
        }
        return;
    }
    pending.push((op, Arc::clone(item)));
}

impl<T: Model> LazyMany<T> {
    /// A collection known to be empty (transient owners).
    pub fn empty() -> Self {
        Self {
            state: LazyState::Loaded(Vec::new()),
            pending: Vec::new(),
            flushed: Vec::new(),
            binding: None,
        }
    }

    /// An unfetched collection.
    pub fn unloaded() -> Self {
        Self {
            state: LazyState::Unloaded,
            pending: Vec::new(),
            flushed: Vec::new(),
            binding: None,
        }
    }

    /// Add a member. Adding a member twice is a no-op.
    pub fn add(&mut self, item: &Shared<T>) {
        if self.contains(item) {
            return;
        }
        if let LazyState::Loaded(items) = &mut self.state {
            items.push(Arc::clone(item));
        }
        queue(&mut self.pending, LinkOp::Insert, item);
    }

    /// Remove a member.
    pub fn remove(&mut self, item: &Shared<T>) {
        if let LazyState::Loaded(items) = &mut self.state {
            items.retain(|i| !Arc::ptr_eq(i, item));
        }
        queue(&mut self.pending, LinkOp::Delete, item);
    }

    /// Whether `item` is a member, as far as this handle knows.
    pub fn contains(&self, item: &Shared<T>) -> bool {
        let loaded = match &self.state {
            LazyState::Loaded(items) => items.iter().any(|i| Arc::ptr_eq(i, item)),
            LazyState::Unloaded => false,
        };
        loaded
            || self
                .pending
                .iter()
                .any(|(op, p)| *op == LinkOp::Insert && Arc::ptr_eq(p, item))
    }

    /// Store the result of a fetch, merged with pending changes.
    pub fn fill(&mut self, fetched: Vec<Shared<T>>) {
        let mut items: Vec<Shared<T>> = fetched
            .into_iter()
            .filter(|i| {
                !self
                    .pending
                    .iter()
                    .any(|(op, p)| *op == LinkOp::Delete && Arc::ptr_eq(p, i))
            })
            .collect();
        for (op, p) in &self.pending {
            if *op == LinkOp::Insert && !items.iter().any(|i| Arc::ptr_eq(i, p)) {
                items.push(Arc::clone(p));
            }
        }
        self.state = LazyState::Loaded(items);
    }

    /// Whether the collection has been fetched.
    pub fn is_loaded(&self) -> bool {
        self.state.is_loaded()
    }

    /// The loaded members; `None` while unloaded.
    pub fn get(&self) -> Option<&[Shared<T>]> {
        match &self.state {
            LazyState::Loaded(items) => Some(items),
            LazyState::Unloaded => None,
        }
    }

    /// Link-table writes owed by this handle when `info` is an owning
    /// many-to-many side.
    pub fn pending_links(&self, info: &RelationshipInfo) -> Vec<PendingLink> {
        let Some(link) = info.link_table else {
            return Vec::new();
        };
        if info.inverse {
            return Vec::new();
        }
        self.pending
            .iter()
            .map(|(op, item)| PendingLink {
                link,
                op: *op,
                remote_id: item.read().primary_key(),
            })
            .collect()
    }

    /// Move pending membership changes through the unit of work.
    pub fn settle(&mut self, phase: WritePhase) {
        match phase {
            WritePhase::Flushed => self.flushed.append(&mut self.pending),
            WritePhase::Committed => self.flushed.clear(),
            WritePhase::RolledBack => {
                let mut owed = Vec::new();
                for (op, item) in self.flushed.drain(..).chain(self.pending.drain(..)) {
                    queue(&mut owed, op, &item);
                }
                self.pending = owed;
            }
        }
    }

    /// Bind to a session.
    pub fn bind(&mut self, binding: &SessionBinding) {
        self.binding = Some(binding.clone());
    }

    /// The session binding, if any.
    pub fn binding(&self) -> Option<&SessionBinding> {
        self.binding.as_ref()
    }
}

impl<T: Model> Default for LazyMany<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T> fmt::Debug for LazyMany<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("LazyMany");
        match &self.state {
            LazyState::Unloaded => s.field("state", &"unloaded"),
            LazyState::Loaded(items) => s.field("loaded", &items.len()),
        };
        s.field("pending", &self.pending.len()).finish()
    }
}

// ============================================================================
// Typed descriptors
// ============================================================================

/// A to-one relationship of `M`, pairing its metadata with the field that
/// holds the handle.
pub struct ToOne<M, T> {
    /// Relationship metadata.
    pub info: RelationshipInfo,
    /// Accessor for the handle.
    pub field: fn(&mut M) -> &mut Lazy<T>,
}

impl<M, T> ToOne<M, T> {
    /// Create a descriptor.
    pub const fn new(info: RelationshipInfo, field: fn(&mut M) -> &mut Lazy<T>) -> Self {
        Self { info, field }
    }
}

impl<M, T> Clone for ToOne<M, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<M, T> Copy for ToOne<M, T> {}

/// A to-many relationship of `M`.
pub struct ToMany<M, T> {
    /// Relationship metadata.
    pub info: RelationshipInfo,
    /// Accessor for the handle.
    pub field: fn(&mut M) -> &mut LazyMany<T>,
}

impl<M, T> ToMany<M, T> {
    /// Create a descriptor.
    pub const fn new(info: RelationshipInfo, field: fn(&mut M) -> &mut LazyMany<T>) -> Self {
        Self { info, field }
    }
}

impl<M, T> Clone for ToMany<M, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<M, T> Copy for ToMany<M, T> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changes::ChangeSet;
    use crate::error::Result;
    use crate::field::FieldInfo;
    use crate::model::shared;
    use crate::row::Row;
    use crate::value::Value;

    struct Tag {
        id: Option<i64>,
        changes: ChangeSet,
    }

    impl Tag {
        fn new(id: Option<i64>) -> Self {
            Self {
                id,
                changes: ChangeSet::empty(1),
            }
        }
    }

    static TAG_FIELDS: [FieldInfo; 1] = [FieldInfo::id()];

    impl Model for Tag {
        const TABLE_NAME: &'static str = "tag";

        fn fields() -> &'static [FieldInfo] {
            &TAG_FIELDS
        }

        fn primary_key(&self) -> Option<i64> {
            self.id
        }

        fn assign_primary_key(&mut self, id: Option<i64>) {
            self.id = id;
        }

        fn to_row(&self) -> Vec<(&'static str, Value)> {
            vec![("id", self.id.into())]
        }

        fn from_row(row: &Row) -> Result<Self> {
            Ok(Tag::new(row.get_as("id")?))
        }

        fn changes(&self) -> &ChangeSet {
            &self.changes
        }

        fn changes_mut(&mut self) -> &mut ChangeSet {
            &mut self.changes
        }
    }

    const LINK: LinkTableInfo = LinkTableInfo::new("post_tag", "post_id", "tag_id");

    #[test]
    fn test_relationship_kind_default() {
        assert_eq!(RelationshipKind::default(), RelationshipKind::ManyToOne);
        assert!(RelationshipKind::ManyToMany.is_collection());
        assert!(!RelationshipKind::OneToOne.is_collection());
    }

    #[test]
    fn test_relationship_info_builder_chain() {
        let info = RelationshipInfo::new("course", "course", RelationshipKind::ManyToOne)
            .local_key("course_id")
            .back_populates("reviews")
            .lazy(false);

        assert_eq!(info.name, "course");
        assert_eq!(info.related_key, "id");
        assert_eq!(info.local_key, Some("course_id"));
        assert_eq!(info.remote_key, None);
        assert_eq!(info.link_table, None);
        assert_eq!(info.back_populates, Some("reviews"));
        assert!(!info.inverse);
        assert!(!info.lazy);
    }

    #[test]
    fn test_binding_closes_with_session() {
        let alive = Arc::new(());
        let binding = SessionBinding::new(7, &alive);
        assert!(binding.is_open_in(7));
        assert!(!binding.is_open_in(8));
        drop(alive);
        assert!(!binding.is_open());
        assert!(!SessionBinding::detached().is_open());
    }

    #[test]
    fn test_lazy_foreign_key_follows_target() {
        let target = shared(Tag::new(None));
        let mut handle = Lazy::unloaded(Some(3));
        assert_eq!(handle.foreign_key(), Some(3));
        assert!(handle.get().is_none());

        assert!(!handle.targets_transient());

        handle.set(Some(&target));
        assert_eq!(handle.foreign_key(), None);
        assert!(handle.targets_transient());
        target.write().assign_primary_key(Some(11));
        assert_eq!(handle.foreign_key(), Some(11));
        assert!(!handle.targets_transient());

        handle.set(None);
        assert_eq!(handle.foreign_key(), None);
        assert_eq!(handle.get().map(|t| t.is_none()), Some(true));
    }

    #[test]
    fn test_lazy_many_merges_pending_into_fetch() {
        let a = shared(Tag::new(Some(1)));
        let b = shared(Tag::new(Some(2)));
        let c = shared(Tag::new(Some(3)));

        let mut tags = LazyMany::unloaded();
        tags.add(&c);
        tags.remove(&a);
        tags.fill(vec![Arc::clone(&a), Arc::clone(&b)]);

        let ids: Vec<_> = tags
            .get()
            .unwrap()
            .iter()
            .map(|t| t.read().primary_key())
            .collect();
        assert_eq!(ids, vec![Some(2), Some(3)]);
    }

    #[test]
    fn test_lazy_many_add_then_remove_cancels() {
        let a = shared(Tag::new(None));
        let mut tags = LazyMany::empty();
        tags.add(&a);
        tags.add(&a);
        assert_eq!(tags.get().unwrap().len(), 1);
        tags.remove(&a);
        assert!(tags.get().unwrap().is_empty());

        let owning = RelationshipInfo::new("tags", "tag", RelationshipKind::ManyToMany)
            .link_table(LINK);
        assert!(tags.pending_links(&owning).is_empty());
    }

    #[test]
    fn test_inverse_side_owes_no_link_rows() {
        let a = shared(Tag::new(Some(5)));
        let mut tags = LazyMany::empty();
        tags.add(&a);

        let owning = RelationshipInfo::new("tags", "tag", RelationshipKind::ManyToMany)
            .link_table(LINK);
        let links = tags.pending_links(&owning);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].op, LinkOp::Insert);
        assert_eq!(links[0].remote_id, Some(5));

        let inverse = owning.inverse();
        assert!(tags.pending_links(&inverse).is_empty());
    }

    #[test]
    fn test_lazy_many_rollback_owes_flushed_links_again() {
        let a = shared(Tag::new(Some(1)));
        let b = shared(Tag::new(Some(2)));
        let owning = RelationshipInfo::new("tags", "tag", RelationshipKind::ManyToMany)
            .link_table(LINK);

        let mut tags = LazyMany::unloaded();
        tags.add(&a);
        tags.add(&b);
        tags.settle(WritePhase::Flushed);
        assert!(tags.pending_links(&owning).is_empty());

        // Removed after the flush, so the rolled back insert is not owed
        tags.remove(&b);
        tags.settle(WritePhase::RolledBack);
        let links = tags.pending_links(&owning);
        assert_eq!(links.len(), 1);
        assert_eq!((links[0].op, links[0].remote_id), (LinkOp::Insert, Some(1)));

        tags.settle(WritePhase::Flushed);
        tags.settle(WritePhase::Committed);
        tags.settle(WritePhase::RolledBack);
        assert!(tags.pending_links(&owning).is_empty());

        // Committed members are no longer merged into a fetch
        tags.fill(Vec::new());
        assert!(tags.get().unwrap().is_empty());
    }
}
