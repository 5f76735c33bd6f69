//! Session, identity map and unit of work for minorm.
//!
//! The Session is the central unit-of-work manager. It owns a connection,
//! keeps exactly one in-memory instance per persisted identity, and writes
//! recorded changes back on flush.
//!
//! # Design Philosophy
//!
//! - **Explicit over implicit**: no autoflush; lazy relationships are fetched
//!   through explicit session calls.
//! - **One instance per identity**: every lookup of an identity returns a
//!   clone of the same [`Shared`] handle.
//! - **Type erasure**: the identity map stores `Arc<dyn ErasedEntity>` for
//!   heterogeneous models and downcasts on the way out.
//! - **Recorded changes**: UPDATEs write only the fields the entity's
//!   mutators marked, nothing is diffed.
//!
//! # Example
//!
//! ```ignore
//! let mut session = Session::new(conn);
//!
//! // Identity map first, storage second
//! let course = session.get::<Course>(&cx, 10001).await?.unwrap();
//! course.write().set_name("JPA in 50 Steps");
//!
//! // Lazy relationship, one read on first access
//! let reviews = session.fetch_many(&cx, &course, &Course::REVIEWS).await?;
//!
//! // New rows are INSERTed on flush
//! let review = session.persist(Review::new(ReviewRating::Five, "Great"));
//!
//! session.commit(&cx).await?;
//! ```

pub mod n1_detection;

pub use n1_detection::{FetchStats, FetchTracker};

use std::any::{Any, TypeId};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use asupersync::{Cx, Outcome};
use minorm_core::{
    Connection, Dialect, Error, LinkOp, Model, Result, Row, SessionBinding, Shared, ToMany, ToOne,
    Value, WritePhase, shared, try_outcome, try_result,
};
use minorm_query::{CriteriaQuery, DeleteBuilder, InsertBuilder, Join, LinkBuilder, UpdateBuilder};
use parking_lot::RwLock;
use serde::Deserialize;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

// ============================================================================
// Session Configuration
// ============================================================================

/// Configuration for Session behavior.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Whether to begin a transaction on the first flush.
    pub auto_begin: bool,
    /// Whether to reread cached entities on their next lookup after commit.
    pub expire_on_commit: bool,
    /// Lazy fetches per relationship before an N+1 warning; `None` disables it.
    pub n1_threshold: Option<usize>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            auto_begin: true,
            expire_on_commit: false,
            n1_threshold: Some(10),
        }
    }
}

// ============================================================================
// Object Key and State
// ============================================================================

/// Unique key for an object in the identity map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey {
    table: &'static str,
    type_id: TypeId,
    id: i64,
}

impl ObjectKey {
    /// Key of `M` with identity `id`.
    pub fn of<M: Model>(id: i64) -> Self {
        Self {
            table: M::TABLE_NAME,
            type_id: TypeId::of::<M>(),
            id,
        }
    }

    /// Table of the keyed model.
    pub fn table(&self) -> &'static str {
        self.table
    }

    /// Identity value.
    pub fn id(&self) -> i64 {
        self.id
    }
}

/// State of a tracked object in the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectState {
    /// In sync with storage as far as the session knows.
    Persistent,
    /// Scheduled for DELETE on flush.
    Deleted,
    /// Reread from storage on the next lookup.
    Expired,
}

/// Type-erased operations the flush needs on a tracked entity.
trait ErasedEntity: Send + Sync {
    fn object_key(&self) -> Option<ObjectKey>;
    fn insert_statement(&self, dialect: Dialect) -> (String, Vec<Value>);
    fn update_statement(&self, dialect: Dialect) -> Option<Result<(String, Vec<Value>)>>;
    fn delete_statements(&self, dialect: Dialect) -> Result<Vec<(String, Vec<Value>)>>;
    fn link_statements(&self, dialect: Dialect) -> Result<Vec<(String, Vec<Value>)>>;
    fn check_references(&self) -> Result<()>;
    fn null_foreign_keys(&self) -> Vec<usize>;
    fn mark_resolved_keys(&self, fields: &[usize]);
    fn assign_primary_key(&self, id: Option<i64>);
    fn settle_changes(&self, phase: WritePhase);
    fn settle_links(&self, phase: WritePhase);
    fn bind(&self, binding: &SessionBinding);
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<M: Model> ErasedEntity for RwLock<M> {
    fn object_key(&self) -> Option<ObjectKey> {
        self.read().primary_key().map(ObjectKey::of::<M>)
    }

    fn insert_statement(&self, dialect: Dialect) -> (String, Vec<Value>) {
        let guard = self.read();
        InsertBuilder::new(&*guard).build_with_dialect(dialect)
    }

    fn update_statement(&self, dialect: Dialect) -> Option<Result<(String, Vec<Value>)>> {
        let guard = self.read();
        let builder = UpdateBuilder::changes_of(&*guard);
        if builder.is_noop() {
            return None;
        }
        Some(builder.build_with_dialect(dialect))
    }

    fn delete_statements(&self, dialect: Dialect) -> Result<Vec<(String, Vec<Value>)>> {
        let id = self.read().primary_key().ok_or_else(|| {
            Error::Custom(format!("cannot delete a {} without an identity", M::TABLE_NAME))
        })?;
        // Link rows go first so the row itself is no longer referenced
        let mut statements: Vec<_> = M::relationships()
            .iter()
            .filter_map(|r| r.link_table)
            .map(|link| LinkBuilder::new(link).delete_all(dialect, id))
            .collect();
        statements.push(DeleteBuilder::<M>::by_id(id).build_with_dialect(dialect)?);
        Ok(statements)
    }

    fn link_statements(&self, dialect: Dialect) -> Result<Vec<(String, Vec<Value>)>> {
        let guard = self.read();
        let links = guard.pending_links();
        if links.is_empty() {
            return Ok(Vec::new());
        }
        let local = guard.primary_key().ok_or_else(|| {
            Error::Custom(format!("{} has link rows but no identity", M::TABLE_NAME))
        })?;
        links
            .into_iter()
            .map(|pending| {
                let remote = pending.remote_id.ok_or_else(|| {
                    Error::Custom(format!(
                        "{} row of {} {local} points at an entity that was never saved",
                        pending.link.table_name,
                        M::TABLE_NAME
                    ))
                })?;
                let builder = LinkBuilder::new(pending.link);
                Ok(match pending.op {
                    LinkOp::Insert => builder.insert(dialect, local, remote),
                    LinkOp::Delete => builder.delete(dialect, local, remote),
                })
            })
            .collect()
    }

    fn check_references(&self) -> Result<()> {
        let guard = self.read();
        match guard.unsaved_reference() {
            Some(relationship) => Err(Error::Custom(format!(
                "{}.{relationship} references an unsaved transient instance",
                M::TABLE_NAME
            ))),
            None => Ok(()),
        }
    }

    fn null_foreign_keys(&self) -> Vec<usize> {
        let row = self.read().to_row();
        M::fields()
            .iter()
            .zip(&row)
            .enumerate()
            .filter(|(_, (field, (_, value)))| field.foreign_key.is_some() && value.is_null())
            .map(|(idx, _)| idx)
            .collect()
    }

    fn mark_resolved_keys(&self, fields: &[usize]) {
        let mut guard = self.write();
        let row = guard.to_row();
        for &idx in fields {
            if row.get(idx).is_some_and(|(_, value)| !value.is_null()) {
                guard.changes_mut().mark(idx);
            }
        }
    }

    fn assign_primary_key(&self, id: Option<i64>) {
        self.write().assign_primary_key(id);
    }

    fn settle_changes(&self, phase: WritePhase) {
        self.write().changes_mut().settle(phase);
    }

    fn settle_links(&self, phase: WritePhase) {
        self.write().settle_links(phase);
    }

    fn bind(&self, binding: &SessionBinding) {
        self.write().bind_session(binding);
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// A tracked object in the session.
struct TrackedObject {
    entity: Arc<dyn ErasedEntity>,
    state: ObjectState,
}

fn same_instance<M>(erased: &Arc<dyn ErasedEntity>, entity: &Shared<M>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(erased), Arc::as_ptr(entity))
}

fn downcast<M: Model>(erased: &Arc<dyn ErasedEntity>) -> Option<Shared<M>> {
    Arc::clone(erased).into_any().downcast::<RwLock<M>>().ok()
}

fn select_list<M: Model>(dialect: Dialect, alias: &str) -> String {
    M::fields()
        .iter()
        .map(|f| {
            format!(
                "{}.{} AS {}",
                dialect.quote_ident(alias),
                dialect.quote_ident(f.column_name),
                dialect.quote_ident(f.column_name)
            )
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// `SELECT <columns of M> FROM M AS "t" WHERE "t".<column> = ?1`
fn select_by_column<M: Model>(dialect: Dialect, column: &str) -> String {
    format!(
        "SELECT {} FROM {} AS {} WHERE {}.{} = {} ORDER BY {}.{}",
        select_list::<M>(dialect, "t"),
        dialect.quote_ident(M::TABLE_NAME),
        dialect.quote_ident("t"),
        dialect.quote_ident("t"),
        dialect.quote_ident(column),
        dialect.placeholder(1),
        dialect.quote_ident("t"),
        dialect.quote_ident(M::PRIMARY_KEY),
    )
}

// ============================================================================
// Session
// ============================================================================

/// The Session is the central unit-of-work manager.
///
/// It tracks entities loaded from or saved to storage and coordinates
/// flushing changes back. A session is used by one caller at a time.
/// Entities it hands out stay usable after it ends, but their unloaded
/// relationships can no longer be fetched.
pub struct Session<C: Connection> {
    /// The database connection.
    connection: C,
    /// Process-unique session id, stamped on every binding.
    id: u64,
    /// Strong side of every binding this session hands out.
    alive: Arc<()>,
    /// Whether we're in a transaction.
    in_transaction: bool,
    /// Identity map: ObjectKey -> TrackedObject.
    identity_map: BTreeMap<ObjectKey, TrackedObject>,
    /// Entities awaiting INSERT, in save order.
    pending_new: Vec<Arc<dyn ErasedEntity>>,
    /// Entities awaiting DELETE.
    pending_delete: Vec<ObjectKey>,
    /// Entities INSERTed in the open transaction, and whether storage
    /// assigned their identity.
    inserted: Vec<(ObjectKey, bool)>,
    /// Entities DELETEd in the open transaction.
    deleted: Vec<ObjectKey>,
    /// Configuration.
    config: SessionConfig,
    /// Lazy fetch counters.
    fetches: FetchTracker,
}

impl<C: Connection> Session<C> {
    /// Create a new session from an existing connection.
    pub fn new(connection: C) -> Self {
        Self::with_config(connection, SessionConfig::default())
    }

    /// Create a new session with custom configuration.
    pub fn with_config(connection: C, config: SessionConfig) -> Self {
        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(session = id, "Opening session");
        Self {
            connection,
            id,
            alive: Arc::new(()),
            in_transaction: false,
            identity_map: BTreeMap::new(),
            pending_new: Vec::new(),
            pending_delete: Vec::new(),
            inserted: Vec::new(),
            deleted: Vec::new(),
            fetches: FetchTracker::new(config.n1_threshold),
            config,
        }
    }

    /// Get a reference to the underlying connection.
    pub fn connection(&self) -> &C {
        &self.connection
    }

    /// Get the session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Process-unique id of this session.
    pub fn id(&self) -> u64 {
        self.id
    }

    fn binding(&self) -> SessionBinding {
        SessionBinding::new(self.id, &self.alive)
    }

    /// Register a row as an entity, or return the instance already tracked
    /// for its identity. `None` when that identity is scheduled for deletion.
    fn materialize<M: Model>(&mut self, row: &Row) -> Result<Option<Shared<M>>> {
        let id: i64 = row.get_as(M::PRIMARY_KEY)?;
        let key = ObjectKey::of::<M>(id);
        let binding = self.binding();

        if let Some(tracked) = self.identity_map.get_mut(&key) {
            let entity = downcast::<M>(&tracked.entity).ok_or_else(|| {
                Error::Custom(format!("identity map entry for {} {id} has another type", M::TABLE_NAME))
            })?;
            match tracked.state {
                ObjectState::Deleted => return Ok(None),
                ObjectState::Expired => {
                    let mut fresh = M::from_row(row)?;
                    fresh.bind_session(&binding);
                    *entity.write() = fresh;
                    tracked.state = ObjectState::Persistent;
                }
                ObjectState::Persistent => {}
            }
            return Ok(Some(entity));
        }

        let mut model = M::from_row(row)?;
        model.bind_session(&binding);
        let entity = shared(model);
        self.identity_map.insert(
            key,
            TrackedObject {
                entity: Arc::clone(&entity) as Arc<dyn ErasedEntity>,
                state: ObjectState::Persistent,
            },
        );
        Ok(Some(entity))
    }

    // ========================================================================
    // Object Tracking
    // ========================================================================

    /// Wrap a new entity and schedule its INSERT.
    #[tracing::instrument(level = "debug", skip(self, entity))]
    pub fn persist<M: Model>(&mut self, entity: M) -> Shared<M> {
        tracing::info!(table = M::TABLE_NAME, "Adding object to session");
        let mut entity = entity;
        entity.bind_session(&self.binding());
        let entity = shared(entity);
        self.pending_new
            .push(Arc::clone(&entity) as Arc<dyn ErasedEntity>);
        entity
    }

    /// Make `entity` managed by this session.
    ///
    /// An entity without identity is scheduled for INSERT. An entity with an
    /// identity is tracked so its recorded changes are written on flush;
    /// saving a detached entity from an earlier session reattaches it. Fails
    /// when a different instance of the same identity is already managed.
    #[tracing::instrument(level = "debug", skip(self, entity))]
    pub fn save<M: Model>(&mut self, entity: &Shared<M>) -> Result<()> {
        let id = entity.read().primary_key();
        let Some(id) = id else {
            if !self.pending_new.iter().any(|e| same_instance(e, entity)) {
                tracing::info!(table = M::TABLE_NAME, "Adding object to session");
                entity.write().bind_session(&self.binding());
                self.pending_new
                    .push(Arc::clone(entity) as Arc<dyn ErasedEntity>);
            }
            return Ok(());
        };

        let key = ObjectKey::of::<M>(id);
        match self.identity_map.get_mut(&key) {
            Some(tracked) if same_instance(&tracked.entity, entity) => {
                if tracked.state == ObjectState::Deleted {
                    if self.deleted.contains(&key) {
                        return Err(Error::Custom(format!(
                            "{} {id} was deleted in the open transaction",
                            M::TABLE_NAME
                        )));
                    }
                    tracked.state = ObjectState::Persistent;
                    self.pending_delete.retain(|k| *k != key);
                }
            }
            Some(_) => {
                return Err(Error::Custom(format!(
                    "another instance of {} {id} is already managed by this session",
                    M::TABLE_NAME
                )));
            }
            None => {
                tracing::debug!(table = M::TABLE_NAME, id, "Reattaching object");
                entity.write().bind_session(&self.binding());
                self.identity_map.insert(
                    key,
                    TrackedObject {
                        entity: Arc::clone(entity) as Arc<dyn ErasedEntity>,
                        state: ObjectState::Persistent,
                    },
                );
            }
        }
        Ok(())
    }

    /// Schedule the DELETE of `entity`.
    ///
    /// Its identity is invisible to [`Session::get`] from now on. Link rows of
    /// its many-to-many relationships are deleted with it.
    #[tracing::instrument(level = "debug", skip(self, entity))]
    pub fn delete<M: Model>(&mut self, entity: &Shared<M>) {
        tracing::info!(table = M::TABLE_NAME, "Marking object for deletion");

        let before = self.pending_new.len();
        self.pending_new.retain(|e| !same_instance(e, entity));
        if self.pending_new.len() != before {
            // Never flushed, nothing to delete
            return;
        }

        let id = entity.read().primary_key();
        let Some(id) = id else {
            return;
        };
        let key = ObjectKey::of::<M>(id);
        match self.identity_map.get_mut(&key) {
            Some(tracked) => {
                if tracked.state != ObjectState::Deleted {
                    tracked.state = ObjectState::Deleted;
                    self.pending_delete.push(key);
                }
            }
            None => {
                self.identity_map.insert(
                    key,
                    TrackedObject {
                        entity: Arc::clone(entity) as Arc<dyn ErasedEntity>,
                        state: ObjectState::Deleted,
                    },
                );
                self.pending_delete.push(key);
            }
        }
    }

    /// Get an entity by identity.
    ///
    /// Returns the tracked instance when there is one, otherwise reads the
    /// row and starts tracking it. `None` when no row exists or the identity
    /// is scheduled for deletion.
    #[tracing::instrument(level = "debug", skip(self, cx))]
    pub async fn get<M: Model>(&mut self, cx: &Cx, id: i64) -> Outcome<Option<Shared<M>>, Error> {
        let key = ObjectKey::of::<M>(id);

        if let Some(tracked) = self.identity_map.get(&key) {
            match tracked.state {
                ObjectState::Deleted => return Outcome::Ok(None),
                ObjectState::Persistent => {
                    if let Some(entity) = downcast::<M>(&tracked.entity) {
                        tracing::trace!(table = M::TABLE_NAME, id, "Identity map hit");
                        return Outcome::Ok(Some(entity));
                    }
                }
                ObjectState::Expired => {}
            }
        }

        tracing::debug!(table = M::TABLE_NAME, id, "Loading object");
        let dialect = self.connection.dialect();
        let sql = select_by_column::<M>(dialect, M::PRIMARY_KEY);
        let row = try_outcome!(
            self.connection
                .query_one(cx, &sql, &[Value::BigInt(id)])
                .await
        );

        match row {
            Some(row) => Outcome::Ok(try_result!(self.materialize::<M>(&row))),
            None => {
                // An expired entry whose row is gone
                self.identity_map.remove(&key);
                Outcome::Ok(None)
            }
        }
    }

    /// Whether `entity` is managed by this session.
    pub fn contains<M: Model>(&self, entity: &Shared<M>) -> bool {
        if self.pending_new.iter().any(|e| same_instance(e, entity)) {
            return true;
        }
        let id = entity.read().primary_key();
        id.and_then(|id| self.identity_map.get(&ObjectKey::of::<M>(id)))
            .is_some_and(|t| t.state != ObjectState::Deleted && same_instance(&t.entity, entity))
    }

    /// Stop tracking `entity`. Pending work for it is dropped and its
    /// relationships can no longer be fetched.
    pub fn expunge<M: Model>(&mut self, entity: &Shared<M>) {
        self.pending_new.retain(|e| !same_instance(e, entity));
        let id = entity.read().primary_key();
        if let Some(id) = id {
            let key = ObjectKey::of::<M>(id);
            if self
                .identity_map
                .get(&key)
                .is_some_and(|t| same_instance(&t.entity, entity))
            {
                self.identity_map.remove(&key);
                self.pending_delete.retain(|k| *k != key);
                self.inserted.retain(|(k, _)| *k != key);
                self.deleted.retain(|k| *k != key);
            }
        }
        entity.write().bind_session(&SessionBinding::detached());
    }

    /// Stop tracking every entity.
    pub fn expunge_all(&mut self) {
        let detached = SessionBinding::detached();
        for tracked in self.identity_map.values() {
            tracked.entity.bind(&detached);
        }
        for entity in &self.pending_new {
            entity.bind(&detached);
        }
        self.identity_map.clear();
        self.pending_new.clear();
        self.pending_delete.clear();
        self.inserted.clear();
        self.deleted.clear();
    }

    /// Reread `entity` from storage into the same instance.
    ///
    /// Unflushed changes are discarded and relationship handles start over
    /// unloaded.
    #[tracing::instrument(level = "debug", skip(self, cx, entity))]
    pub async fn refresh<M: Model>(&mut self, cx: &Cx, entity: &Shared<M>) -> Outcome<(), Error> {
        let id = entity.read().primary_key();
        let Some(id) = id else {
            return Outcome::Err(Error::Custom(format!(
                "cannot refresh a {} that was never saved",
                M::TABLE_NAME
            )));
        };

        let dialect = self.connection.dialect();
        let sql = select_by_column::<M>(dialect, M::PRIMARY_KEY);
        let row = try_outcome!(
            self.connection
                .query_one(cx, &sql, &[Value::BigInt(id)])
                .await
        );
        let Some(row) = row else {
            return Outcome::Err(Error::Custom(format!(
                "{} {id} no longer exists",
                M::TABLE_NAME
            )));
        };

        let mut fresh = try_result!(M::from_row(&row));
        fresh.bind_session(&self.binding());
        *entity.write() = fresh;

        let key = ObjectKey::of::<M>(id);
        match self.identity_map.get_mut(&key) {
            Some(tracked) => {
                if same_instance(&tracked.entity, entity) && tracked.state == ObjectState::Expired {
                    tracked.state = ObjectState::Persistent;
                }
            }
            None => {
                self.identity_map.insert(
                    key,
                    TrackedObject {
                        entity: Arc::clone(entity) as Arc<dyn ErasedEntity>,
                        state: ObjectState::Persistent,
                    },
                );
            }
        }
        Outcome::Ok(())
    }

    // ========================================================================
    // Lazy Relationships
    // ========================================================================

    /// Fetch a to-one relationship of `owner`.
    ///
    /// A loaded handle is returned as is. An unloaded handle costs one read
    /// (or an identity map hit) and stays loaded for the rest of the session.
    #[tracing::instrument(level = "debug", skip(self, cx, owner, rel), fields(relationship = rel.info.name))]
    pub async fn fetch<M: Model, T: Model>(
        &mut self,
        cx: &Cx,
        owner: &Shared<M>,
        rel: &ToOne<M, T>,
    ) -> Outcome<Option<Shared<T>>, Error> {
        let (key, owner_id) = {
            let mut guard = owner.write();
            let owner_id = guard.primary_key();
            let handle = (rel.field)(&mut *guard);
            if let Some(target) = handle.get() {
                return Outcome::Ok(target.cloned());
            }
            if !handle.binding().is_some_and(|b| b.is_open_in(self.id)) {
                return Outcome::Err(Error::DetachedAccess {
                    model: M::TABLE_NAME,
                    relationship: rel.info.name,
                });
            }
            (handle.foreign_key(), owner_id)
        };

        self.fetches.record(M::TABLE_NAME, rel.info.name);

        let target = if rel.info.local_key.is_some() {
            match key {
                Some(id) => try_outcome!(self.get::<T>(cx, id).await),
                None => None,
            }
        } else if let Some(remote_key) = rel.info.remote_key {
            match owner_id {
                Some(id) => {
                    let dialect = self.connection.dialect();
                    let sql = select_by_column::<T>(dialect, remote_key);
                    let row = try_outcome!(
                        self.connection
                            .query_one(cx, &sql, &[Value::BigInt(id)])
                            .await
                    );
                    match row {
                        Some(row) => try_result!(self.materialize::<T>(&row)),
                        None => None,
                    }
                }
                None => None,
            }
        } else {
            return Outcome::Err(Error::Custom(format!(
                "relationship `{}` of {} declares no join columns",
                rel.info.name,
                M::TABLE_NAME
            )));
        };

        (rel.field)(&mut *owner.write()).fill(target.clone());
        Outcome::Ok(target)
    }

    /// Fetch a to-many relationship of `owner`.
    ///
    /// Members added or removed on the handle before the fetch are merged
    /// into the result.
    #[tracing::instrument(level = "debug", skip(self, cx, owner, rel), fields(relationship = rel.info.name))]
    pub async fn fetch_many<M: Model, T: Model>(
        &mut self,
        cx: &Cx,
        owner: &Shared<M>,
        rel: &ToMany<M, T>,
    ) -> Outcome<Vec<Shared<T>>, Error> {
        let owner_id = {
            let mut guard = owner.write();
            let owner_id = guard.primary_key();
            let handle = (rel.field)(&mut *guard);
            if let Some(items) = handle.get() {
                return Outcome::Ok(items.to_vec());
            }
            if !handle.binding().is_some_and(|b| b.is_open_in(self.id)) {
                return Outcome::Err(Error::DetachedAccess {
                    model: M::TABLE_NAME,
                    relationship: rel.info.name,
                });
            }
            owner_id
        };

        self.fetches.record(M::TABLE_NAME, rel.info.name);

        let dialect = self.connection.dialect();
        let sql = if let Some(link) = rel.info.link_table {
            format!(
                "SELECT {} FROM {} AS {} INNER JOIN {} AS {} ON {}.{} = {}.{} WHERE {}.{} = {} ORDER BY {}.{}",
                select_list::<T>(dialect, "t"),
                dialect.quote_ident(T::TABLE_NAME),
                dialect.quote_ident("t"),
                dialect.quote_ident(link.table_name),
                dialect.quote_ident("l"),
                dialect.quote_ident("l"),
                dialect.quote_ident(link.remote_column),
                dialect.quote_ident("t"),
                dialect.quote_ident(rel.info.related_key),
                dialect.quote_ident("l"),
                dialect.quote_ident(link.local_column),
                dialect.placeholder(1),
                dialect.quote_ident("t"),
                dialect.quote_ident(T::PRIMARY_KEY),
            )
        } else if let Some(remote_key) = rel.info.remote_key {
            select_by_column::<T>(dialect, remote_key)
        } else {
            return Outcome::Err(Error::Custom(format!(
                "relationship `{}` of {} declares no join columns",
                rel.info.name,
                M::TABLE_NAME
            )));
        };

        let rows = match owner_id {
            Some(id) => try_outcome!(
                self.connection
                    .query(cx, &sql, &[Value::BigInt(id)])
                    .await
            ),
            None => Vec::new(),
        };

        let mut items = Vec::with_capacity(rows.len());
        for row in &rows {
            if let Some(item) = try_result!(self.materialize::<T>(row)) {
                items.push(item);
            }
        }

        let mut guard = owner.write();
        let handle = (rel.field)(&mut *guard);
        handle.fill(items);
        Outcome::Ok(handle.get().map(<[_]>::to_vec).unwrap_or_default())
    }

    /// Lazy fetch statistics.
    pub fn fetch_stats(&self) -> FetchStats {
        self.fetches.stats()
    }

    /// Lazy fetches recorded for `model.relationship`.
    pub fn fetch_count(&self, model: &str, relationship: &str) -> usize {
        self.fetches.count_for(model, relationship)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Run a criteria query and return its root entities.
    ///
    /// Results go through the identity map: an entity already tracked is
    /// returned as the tracked instance, unchanged. Pending changes are not
    /// flushed first.
    #[tracing::instrument(level = "debug", skip(self, cx, query))]
    pub async fn list<M: Model>(
        &mut self,
        cx: &Cx,
        query: &CriteriaQuery<M>,
    ) -> Outcome<Vec<Shared<M>>, Error> {
        let (sql, params) = try_result!(query.build(self.connection.dialect()));
        let rows = try_outcome!(self.connection.query(cx, &sql, &params).await);

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let root = row.with_prefix(CriteriaQuery::<M>::ROOT_PREFIX);
            if let Some(entity) = try_result!(self.materialize::<M>(&root)) {
                out.push(entity);
            }
        }
        tracing::debug!(table = M::TABLE_NAME, rows = out.len(), "Query returned");
        Outcome::Ok(out)
    }

    /// Run a criteria query and return `(root, joined)` pairs for `join`.
    ///
    /// A left outer join yields `None` on the joined side for roots without
    /// related rows; an inner join yields no pair for them.
    #[tracing::instrument(level = "debug", skip(self, cx, query, join))]
    pub async fn tuples<M: Model, T: Model>(
        &mut self,
        cx: &Cx,
        query: &CriteriaQuery<M>,
        join: &Join<T>,
    ) -> Outcome<Vec<(Shared<M>, Option<Shared<T>>)>, Error> {
        let (sql, params) = try_result!(query.build(self.connection.dialect()));
        let rows = try_outcome!(self.connection.query(cx, &sql, &params).await);

        let joined_prefix = join.column_prefix();
        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let root = row.with_prefix(CriteriaQuery::<M>::ROOT_PREFIX);
            let Some(root) = try_result!(self.materialize::<M>(&root)) else {
                continue;
            };
            let joined = row.with_prefix(&joined_prefix);
            let absent = joined.get_named(T::PRIMARY_KEY).is_none_or(Value::is_null);
            let joined = if absent {
                None
            } else {
                try_result!(self.materialize::<T>(&joined))
            };
            out.push((root, joined));
        }
        tracing::debug!(table = M::TABLE_NAME, rows = out.len(), "Join query returned");
        Outcome::Ok(out)
    }

    // ========================================================================
    // Transaction Management
    // ========================================================================

    /// Begin a transaction.
    #[tracing::instrument(level = "debug", skip(self, cx))]
    pub async fn begin(&mut self, cx: &Cx) -> Outcome<(), Error> {
        if self.in_transaction {
            return Outcome::Ok(());
        }

        tracing::info!("Beginning transaction");

        match self.connection.execute(cx, "BEGIN", &[]).await {
            Outcome::Ok(_) => {
                self.in_transaction = true;
                Outcome::Ok(())
            }
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    /// Flush pending changes to the database.
    ///
    /// Order: DELETEs, INSERTs in save order, UPDATEs of changed entities,
    /// then link-table rows. Does NOT commit: what the flush wrote is held
    /// until [`Session::commit`] or [`Session::rollback`] ends the
    /// transaction. Without a transaction the writes are final at once.
    #[tracing::instrument(level = "debug", skip(self, cx))]
    pub async fn flush(&mut self, cx: &Cx) -> Outcome<(), Error> {
        let outcome = self.write_pending(cx).await;
        if !self.in_transaction {
            // Autocommit: whatever reached storage stays there
            self.end_transaction(true);
        }
        outcome
    }

    async fn write_pending(&mut self, cx: &Cx) -> Outcome<(), Error> {
        let start = std::time::Instant::now();
        let dialect = self.connection.dialect();

        tracing::info!(
            inserts = self.pending_new.len(),
            deletes = self.pending_delete.len(),
            "Starting flush"
        );

        if self.config.auto_begin && !self.in_transaction {
            try_outcome!(self.begin(cx).await);
        }

        // 1. DELETEs; the entries stay tracked as deleted until the
        // transaction ends
        while let Some(key) = self.pending_delete.first().copied() {
            let statements = match self.identity_map.get(&key) {
                Some(tracked) => try_result!(tracked.entity.delete_statements(dialect)),
                None => Vec::new(),
            };
            for (sql, params) in &statements {
                try_outcome!(self.connection.execute(cx, sql, params).await);
            }
            self.pending_delete.remove(0);
            self.deleted.push(key);
        }

        // 2. INSERTs, keyed into the identity map once storage assigns the id
        let mut unresolved = Vec::new();
        while let Some(entity) = self.pending_new.first().cloned() {
            let (sql, params) = entity.insert_statement(dialect);
            let id = try_outcome!(self.connection.insert(cx, &sql, &params).await);
            self.pending_new.remove(0);
            let assigned = entity.object_key().is_none();
            if assigned {
                entity.assign_primary_key(Some(id));
            }
            entity.settle_changes(WritePhase::Flushed);
            let null_keys = entity.null_foreign_keys();
            if !null_keys.is_empty() {
                unresolved.push((Arc::clone(&entity), null_keys));
            }
            if let Some(key) = entity.object_key() {
                self.identity_map.insert(
                    key,
                    TrackedObject {
                        entity,
                        state: ObjectState::Persistent,
                    },
                );
                self.inserted.push((key, assigned));
            }
        }

        // A row inserted before its target went in with a NULL key
        for (entity, fields) in &unresolved {
            entity.mark_resolved_keys(fields);
        }

        let live: Vec<Arc<dyn ErasedEntity>> = self
            .identity_map
            .values()
            .filter(|t| t.state != ObjectState::Deleted)
            .map(|t| Arc::clone(&t.entity))
            .collect();

        // Every target has an identity by now; one without is never written
        for entity in &live {
            try_result!(entity.check_references());
        }

        // 3. UPDATEs
        let mut updates = 0usize;
        for entity in &live {
            let Some(statement) = entity.update_statement(dialect) else {
                continue;
            };
            let (sql, params) = try_result!(statement);
            try_outcome!(self.connection.execute(cx, &sql, &params).await);
            entity.settle_changes(WritePhase::Flushed);
            updates += 1;
        }

        // 4. Link rows of owning many-to-many sides
        let mut links = 0usize;
        for entity in &live {
            let statements = try_result!(entity.link_statements(dialect));
            for (sql, params) in &statements {
                try_outcome!(self.connection.execute(cx, sql, params).await);
            }
            entity.settle_links(WritePhase::Flushed);
            links += statements.len();
        }

        tracing::info!(
            updates,
            links,
            elapsed_ms = start.elapsed().as_millis(),
            "Flush completed"
        );

        Outcome::Ok(())
    }

    /// Settle everything the open transaction wrote.
    ///
    /// On commit the written changes are forgotten and deleted entities stop
    /// being tracked. On rollback the changes are owed again, deleted
    /// entities are tracked as persistent again, and inserted ones lose the
    /// identity storage gave them and are no longer tracked.
    fn end_transaction(&mut self, committed: bool) {
        let phase = if committed {
            WritePhase::Committed
        } else {
            WritePhase::RolledBack
        };
        for tracked in self.identity_map.values() {
            tracked.entity.settle_changes(phase);
            tracked.entity.settle_links(phase);
        }

        let detached = SessionBinding::detached();
        if committed {
            self.inserted.clear();
            for key in self.deleted.drain(..) {
                if let Some(tracked) = self.identity_map.remove(&key) {
                    tracked.entity.bind(&detached);
                }
            }
            return;
        }

        for key in self.deleted.drain(..) {
            if let Some(tracked) = self.identity_map.get_mut(&key) {
                tracked.state = ObjectState::Persistent;
            }
        }
        for (key, assigned) in self.inserted.drain(..) {
            if let Some(tracked) = self.identity_map.remove(&key) {
                if assigned {
                    tracked.entity.assign_primary_key(None);
                }
                tracked.entity.bind(&detached);
            }
        }
    }

    /// Commit the current transaction.
    ///
    /// Flushes first. When the flush fails the transaction is rolled back and
    /// the flush error is returned; the entities keep their changes, so a
    /// later commit writes them again.
    #[tracing::instrument(level = "debug", skip(self, cx))]
    pub async fn commit(&mut self, cx: &Cx) -> Outcome<(), Error> {
        tracing::info!("Committing transaction");

        match self.flush(cx).await {
            Outcome::Ok(()) => {}
            Outcome::Err(e) => {
                tracing::warn!(error = %e, "Flush failed, rolling back");
                if let Outcome::Err(rollback_error) = self.rollback(cx).await {
                    tracing::error!(error = %rollback_error, "Rollback after failed flush failed");
                }
                return Outcome::Err(e);
            }
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }

        if self.in_transaction {
            try_outcome!(self.connection.execute(cx, "COMMIT", &[]).await);
            self.in_transaction = false;
        }
        self.end_transaction(true);

        if self.config.expire_on_commit {
            for tracked in self.identity_map.values_mut() {
                if tracked.state == ObjectState::Persistent {
                    tracked.state = ObjectState::Expired;
                }
            }
        }

        Outcome::Ok(())
    }

    /// Rollback the current transaction.
    ///
    /// Pending INSERTs and DELETEs are discarded. Entities INSERTed in the
    /// rolled back transaction lose their identity and are no longer
    /// tracked. Changes written by earlier flushes of the transaction are
    /// recorded again, so in-memory state is what the next flush writes.
    #[tracing::instrument(level = "debug", skip(self, cx))]
    pub async fn rollback(&mut self, cx: &Cx) -> Outcome<(), Error> {
        tracing::info!("Rolling back transaction");

        if self.in_transaction {
            match self.connection.execute(cx, "ROLLBACK", &[]).await {
                Outcome::Ok(_) => {
                    self.in_transaction = false;
                }
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }
        }

        self.pending_new.clear();
        for key in self.pending_delete.drain(..) {
            if let Some(tracked) = self.identity_map.get_mut(&key) {
                tracked.state = ObjectState::Persistent;
            }
        }
        self.end_transaction(false);

        Outcome::Ok(())
    }

    /// End the session and hand back its connection.
    ///
    /// An open transaction is rolled back. Entities stay usable, but their
    /// unloaded relationships fail with [`Error::DetachedAccess`].
    pub async fn close(mut self, cx: &Cx) -> Outcome<C, Error> {
        if self.in_transaction {
            try_outcome!(self.rollback(cx).await);
        }
        tracing::info!(
            session = self.id,
            tracked = self.identity_map.len(),
            "Closing session"
        );
        Outcome::Ok(self.into_connection())
    }

    /// End the session without touching storage and hand back its connection.
    pub fn into_connection(self) -> C {
        self.connection
    }

    // ========================================================================
    // Debug Diagnostics
    // ========================================================================

    /// Whether we're in a transaction.
    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    /// Dump session state for debugging.
    pub fn debug_state(&self) -> SessionDebugInfo {
        SessionDebugInfo {
            tracked: self.identity_map.len(),
            pending_new: self.pending_new.len(),
            pending_delete: self.pending_delete.len(),
            in_transaction: self.in_transaction,
        }
    }
}

/// Debug information about session state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDebugInfo {
    /// Tracked objects, including deleted ones until their transaction ends.
    pub tracked: usize,
    /// Objects pending INSERT.
    pub pending_new: usize,
    /// Objects pending DELETE.
    pub pending_delete: usize,
    /// Whether in a transaction.
    pub in_transaction: bool,
}

// ============================================================================
// Unit Tests
// ============================================================================
