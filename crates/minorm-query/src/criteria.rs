//! Criteria queries: programmatic SELECTs over mapped entities.
//!
//! # Example
//!
//! ```ignore
//! // SELECT c FROM Course c WHERE c.name LIKE '%100 Steps'
//! let query = CriteriaQuery::<Course>::from();
//! let name = query.root().get("name");
//! let query = query.filter(name.like("%100 Steps"));
//! let courses = session.list(&cx, &query).await?;
//!
//! // SELECT c, s FROM Course c LEFT JOIN c.students s
//! let mut query = CriteriaQuery::<Course>::from();
//! let students = query.join::<Student>("students", JoinKind::LeftOuter);
//! let pairs = session.tuples(&cx, &query, &students).await?;
//! ```
//!
//! Every selected column is aliased `t{n}_{column}` where `t0` is the root and
//! `t1..` are joins in the order they were added, so a joined row can be split
//! back into one row per entity.

use std::marker::PhantomData;

use minorm_core::{
    Dialect, Error, FieldInfo, Model, RelationshipInfo, Result, Value, find_relationship,
};

use crate::expr::{Expr, Scope, Source};

/// Join flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    /// Only roots with at least one related row.
    Inner,
    /// Every root; the joined side is NULL when nothing is related.
    LeftOuter,
}

impl JoinKind {
    const fn as_sql(self) -> &'static str {
        match self {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::LeftOuter => "LEFT OUTER JOIN",
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct EntityMeta {
    table: &'static str,
    pk: &'static str,
    fields: &'static [FieldInfo],
    relationships: &'static [RelationshipInfo],
}

impl EntityMeta {
    fn of<M: Model>() -> Self {
        Self {
            table: M::TABLE_NAME,
            pk: M::PRIMARY_KEY,
            fields: M::fields(),
            relationships: M::relationships(),
        }
    }

    fn relationship(&self, name: &str) -> Result<&'static RelationshipInfo> {
        find_relationship(self.relationships, name).ok_or_else(|| Error::UnknownAttribute {
            model: self.table,
            attribute: name.to_string(),
        })
    }
}

#[derive(Debug, Clone)]
struct JoinSpec {
    relationship: String,
    kind: JoinKind,
    target: EntityMeta,
}

/// Handle to the root entity of a query.
#[derive(Debug)]
pub struct Root<M> {
    _marker: PhantomData<fn() -> M>,
}

impl<M: Model> Root<M> {
    /// Path to a field or relationship of the root.
    pub fn get(&self, name: &str) -> Path {
        Path {
            source: Source::Root,
            name: name.to_string(),
        }
    }
}

/// Handle to a joined entity.
#[derive(Debug)]
pub struct Join<T> {
    index: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Model> Join<T> {
    /// Path to a field or relationship of the joined entity.
    pub fn get(&self, name: &str) -> Path {
        Path {
            source: Source::Join(self.index),
            name: name.to_string(),
        }
    }

    /// Position among the query's joins.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Column alias prefix of this join's selected columns.
    pub fn column_prefix(&self) -> String {
        format!("t{}_", self.index + 1)
    }
}

/// A named attribute of a query source.
#[derive(Debug, Clone, PartialEq)]
pub struct Path {
    source: Source,
    name: String,
}

impl Path {
    fn expr(&self) -> Expr {
        Expr::Attribute {
            source: self.source,
            name: self.name.clone(),
        }
    }

    /// `path = value`
    pub fn eq(&self, value: impl Into<Value>) -> Expr {
        self.expr().eq(value)
    }

    /// `path <> value`
    pub fn ne(&self, value: impl Into<Value>) -> Expr {
        self.expr().ne(value)
    }

    /// `path < value`
    pub fn lt(&self, value: impl Into<Value>) -> Expr {
        self.expr().lt(value)
    }

    /// `path <= value`
    pub fn le(&self, value: impl Into<Value>) -> Expr {
        self.expr().le(value)
    }

    /// `path > value`
    pub fn gt(&self, value: impl Into<Value>) -> Expr {
        self.expr().gt(value)
    }

    /// `path >= value`
    pub fn ge(&self, value: impl Into<Value>) -> Expr {
        self.expr().ge(value)
    }

    /// `path LIKE pattern`
    pub fn like(&self, pattern: impl Into<String>) -> Expr {
        self.expr().like(pattern)
    }

    /// `path NOT LIKE pattern`
    pub fn not_like(&self, pattern: impl Into<String>) -> Expr {
        self.expr().not_like(pattern)
    }

    /// `path IS NULL`
    pub fn is_null(&self) -> Expr {
        self.expr().is_null()
    }

    /// `path IS NOT NULL`
    pub fn is_not_null(&self) -> Expr {
        self.expr().is_not_null()
    }

    /// The collection-valued relationship at this path has no members.
    pub fn is_empty(&self) -> Expr {
        Expr::Empty {
            source: self.source,
            relationship: self.name.clone(),
            negated: false,
        }
    }

    /// The collection-valued relationship at this path has members.
    pub fn is_not_empty(&self) -> Expr {
        Expr::Empty {
            source: self.source,
            relationship: self.name.clone(),
            negated: true,
        }
    }

    /// Ascending order on this path.
    pub fn asc(&self) -> OrderBy {
        OrderBy {
            expr: self.expr(),
            descending: false,
        }
    }

    /// Descending order on this path.
    pub fn desc(&self) -> OrderBy {
        OrderBy {
            expr: self.expr(),
            descending: true,
        }
    }
}

impl From<Path> for Expr {
    fn from(path: Path) -> Self {
        path.expr()
    }
}

/// An ORDER BY term.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    expr: Expr,
    descending: bool,
}

/// A SELECT over root entity `M`.
#[derive(Debug)]
pub struct CriteriaQuery<M> {
    joins: Vec<JoinSpec>,
    filters: Vec<Expr>,
    order: Vec<OrderBy>,
    limit: Option<u64>,
    _marker: PhantomData<fn() -> M>,
}

impl<M: Model> CriteriaQuery<M> {
    /// Column alias prefix of the root's selected columns.
    pub const ROOT_PREFIX: &'static str = "t0_";

    /// Start a query rooted at `M`.
    pub fn from() -> Self {
        Self {
            joins: Vec::new(),
            filters: Vec::new(),
            order: Vec::new(),
            limit: None,
            _marker: PhantomData,
        }
    }

    /// The root handle.
    pub fn root(&self) -> Root<M> {
        Root {
            _marker: PhantomData,
        }
    }

    /// Add a predicate. Multiple predicates are AND-combined.
    pub fn filter(mut self, expr: impl Into<Expr>) -> Self {
        self.filters.push(expr.into());
        self
    }

    /// Join the root's `relationship`, whose target must be `T`.
    pub fn join<T: Model>(&mut self, relationship: &str, kind: JoinKind) -> Join<T> {
        self.joins.push(JoinSpec {
            relationship: relationship.to_string(),
            kind,
            target: EntityMeta::of::<T>(),
        });
        Join {
            index: self.joins.len() - 1,
            _marker: PhantomData,
        }
    }

    /// Add an ORDER BY term.
    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order.push(order);
        self
    }

    /// Cap the number of rows.
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Number of joins.
    pub fn join_count(&self) -> usize {
        self.joins.len()
    }

    /// Render the SELECT and its parameters.
    pub fn build(&self, dialect: Dialect) -> Result<(String, Vec<Value>)> {
        let scope = QueryScope {
            root: EntityMeta::of::<M>(),
            joins: &self.joins,
        };
        let mut params = Vec::new();

        let mut columns = select_list(dialect, "t0", scope.root.fields);
        for (idx, join) in self.joins.iter().enumerate() {
            columns.extend(select_list(dialect, &join_alias(idx), join.target.fields));
        }

        let mut sql = format!(
            "SELECT {} FROM {} AS {}",
            columns.join(", "),
            dialect.quote_ident(scope.root.table),
            dialect.quote_ident("t0")
        );

        for (idx, join) in self.joins.iter().enumerate() {
            sql.push(' ');
            sql.push_str(&scope.join_clause(dialect, idx, join)?);
        }

        if !self.filters.is_empty() {
            let mut terms = Vec::with_capacity(self.filters.len());
            for filter in &self.filters {
                terms.push(filter.render(&scope, dialect, &mut params)?);
            }
            sql.push_str(" WHERE ");
            sql.push_str(&terms.join(" AND "));
        }

        if !self.order.is_empty() {
            let mut terms = Vec::with_capacity(self.order.len());
            for order in &self.order {
                let expr = order.expr.render(&scope, dialect, &mut params)?;
                terms.push(if order.descending {
                    format!("{expr} DESC")
                } else {
                    format!("{expr} ASC")
                });
            }
            sql.push_str(" ORDER BY ");
            sql.push_str(&terms.join(", "));
        }

        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        tracing::trace!(sql = %sql, params = params.len(), "Built criteria query");
        Ok((sql, params))
    }
}

fn join_alias(idx: usize) -> String {
    format!("t{}", idx + 1)
}

fn select_list(dialect: Dialect, alias: &str, fields: &[FieldInfo]) -> Vec<String> {
    fields
        .iter()
        .map(|f| {
            format!(
                "{}.{} AS {}",
                dialect.quote_ident(alias),
                dialect.quote_ident(f.column_name),
                dialect.quote_ident(&format!("{alias}_{}", f.column_name))
            )
        })
        .collect()
}

struct QueryScope<'a> {
    root: EntityMeta,
    joins: &'a [JoinSpec],
}

impl QueryScope<'_> {
    fn source(&self, source: Source) -> Result<(String, EntityMeta)> {
        match source {
            Source::Root => Ok(("t0".to_string(), self.root)),
            Source::Join(idx) => self
                .joins
                .get(idx)
                .map(|j| (join_alias(idx), j.target))
                .ok_or_else(|| Error::Custom(format!("join #{idx} is not part of this query"))),
        }
    }

    fn join_clause(&self, dialect: Dialect, idx: usize, join: &JoinSpec) -> Result<String> {
        let q = |s: &str| dialect.quote_ident(s);
        let rel = self.root.relationship(&join.relationship)?;
        if rel.related_table != join.target.table {
            return Err(Error::Custom(format!(
                "relationship `{}` of {} targets {}, not {}",
                rel.name, self.root.table, rel.related_table, join.target.table
            )));
        }

        let alias = join_alias(idx);
        let kind = join.kind.as_sql();

        if let Some(link) = rel.link_table {
            let link_alias = format!("{alias}_link");
            return Ok(format!(
                "{kind} {} AS {} ON {}.{} = {}.{} {kind} {} AS {} ON {}.{} = {}.{}",
                q(link.table_name),
                q(&link_alias),
                q(&link_alias),
                q(link.local_column),
                q("t0"),
                q(self.root.pk),
                q(rel.related_table),
                q(&alias),
                q(&alias),
                q(rel.related_key),
                q(&link_alias),
                q(link.remote_column),
            ));
        }

        if let Some(local_key) = rel.local_key {
            return Ok(format!(
                "{kind} {} AS {} ON {}.{} = {}.{}",
                q(rel.related_table),
                q(&alias),
                q(&alias),
                q(rel.related_key),
                q("t0"),
                q(local_key),
            ));
        }

        if let Some(remote_key) = rel.remote_key {
            return Ok(format!(
                "{kind} {} AS {} ON {}.{} = {}.{}",
                q(rel.related_table),
                q(&alias),
                q(&alias),
                q(remote_key),
                q("t0"),
                q(self.root.pk),
            ));
        }

        Err(Error::Custom(format!(
            "relationship `{}` of {} declares no join columns",
            rel.name, self.root.table
        )))
    }
}

impl Scope for QueryScope<'_> {
    fn attribute(&self, dialect: Dialect, source: Source, name: &str) -> Result<String> {
        let (alias, meta) = self.source(source)?;
        let column = meta
            .fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.column_name)
            .or_else(|| {
                find_relationship(meta.relationships, name).and_then(|r| r.local_key)
            })
            .ok_or_else(|| Error::UnknownAttribute {
                model: meta.table,
                attribute: name.to_string(),
            })?;
        Ok(format!(
            "{}.{}",
            dialect.quote_ident(&alias),
            dialect.quote_ident(column)
        ))
    }

    fn members(&self, dialect: Dialect, source: Source, relationship: &str) -> Result<String> {
        let q = |s: &str| dialect.quote_ident(s);
        let (alias, meta) = self.source(source)?;
        let rel = meta.relationship(relationship)?;
        if !rel.kind.is_collection() {
            return Err(Error::Custom(format!(
                "relationship `{}` of {} is not a collection",
                rel.name, meta.table
            )));
        }

        let sub = format!("{alias}_{}", rel.name);
        let (table, column) = match (rel.link_table, rel.remote_key) {
            (Some(link), _) => (link.table_name, link.local_column),
            (None, Some(remote_key)) => (rel.related_table, remote_key),
            (None, None) => {
                return Err(Error::Custom(format!(
                    "relationship `{}` of {} declares no join columns",
                    rel.name, meta.table
                )));
            }
        };

        Ok(format!(
            "SELECT 1 FROM {} AS {} WHERE {}.{} = {}.{}",
            q(table),
            q(&sub),
            q(&sub),
            q(column),
            q(&alias),
            q(meta.pk),
        ))
    }
}
