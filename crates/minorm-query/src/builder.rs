//! Statement builders for INSERT, UPDATE, DELETE and link-table writes.
//!
//! These are what the session's flush renders. They are public so callers
//! can issue bulk statements outside the unit of work, at the cost of
//! bypassing the identity map.

use std::marker::PhantomData;

use asupersync::{Cx, Outcome};
use minorm_core::{Connection, Dialect, Error, LinkTableInfo, Model, Result, Value};

use crate::expr::{Expr, Unscoped};

/// INSERT query builder.
///
/// # Example
///
/// ```ignore
/// let id = InsertBuilder::new(&course).execute(&cx, &conn).await?;
/// ```
#[derive(Debug)]
pub struct InsertBuilder<'a, M: Model> {
    model: &'a M,
}

impl<'a, M: Model> InsertBuilder<'a, M> {
    /// Create a new INSERT builder for the given model instance.
    pub fn new(model: &'a M) -> Self {
        Self { model }
    }

    /// Build the INSERT SQL and parameters with default dialect (Postgres).
    pub fn build(&self) -> (String, Vec<Value>) {
        self.build_with_dialect(Dialect::default())
    }

    /// Build the INSERT SQL and parameters with specific dialect.
    pub fn build_with_dialect(&self, dialect: Dialect) -> (String, Vec<Value>) {
        let row = self.model.to_row();
        let fields = M::fields();

        // Storage assigns auto-increment keys that are still NULL
        let insert_fields: Vec<_> = row
            .into_iter()
            .filter(|(name, value)| {
                let auto = fields
                    .iter()
                    .find(|f| f.name == *name)
                    .is_some_and(|f| f.auto_increment);
                !(auto && value.is_null())
            })
            .collect();

        let columns: Vec<_> = insert_fields
            .iter()
            .map(|(name, _)| column_of::<M>(name, dialect))
            .collect();
        let values: Vec<_> = insert_fields.into_iter().map(|(_, value)| value).collect();
        let placeholders: Vec<_> = (1..=values.len()).map(|i| dialect.placeholder(i)).collect();

        let sql = if columns.is_empty() {
            format!(
                "INSERT INTO {} DEFAULT VALUES",
                dialect.quote_ident(M::TABLE_NAME)
            )
        } else {
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                dialect.quote_ident(M::TABLE_NAME),
                columns.join(", "),
                placeholders.join(", ")
            )
        };

        (sql, values)
    }

    /// Execute the INSERT and return the inserted ID.
    pub async fn execute<C: Connection>(self, cx: &Cx, conn: &C) -> Outcome<i64, Error> {
        let (sql, params) = self.build_with_dialect(conn.dialect());
        conn.insert(cx, &sql, &params).await
    }
}

/// A column-value pair for explicit UPDATE SET operations.
#[derive(Debug, Clone)]
struct SetClause {
    column: String,
    value: Value,
}

/// UPDATE query builder.
///
/// # Example
///
/// ```ignore
/// // Write only what the mutators recorded
/// UpdateBuilder::changes_of(&course).execute(&cx, &conn).await?;
///
/// // Explicit SET without a model instance
/// UpdateBuilder::<Course>::empty()
///     .set("name", "Renamed")
///     .filter(Expr::col("id").eq(10001_i64))
///     .execute(&cx, &conn).await?;
/// ```
#[derive(Debug)]
pub struct UpdateBuilder<'a, M: Model> {
    model: Option<&'a M>,
    where_clause: Option<Expr>,
    set_fields: Option<Vec<&'static str>>,
    explicit_sets: Vec<SetClause>,
}

impl<'a, M: Model> UpdateBuilder<'a, M> {
    /// UPDATE every non-key column of `model`, matched by primary key.
    pub fn new(model: &'a M) -> Self {
        Self {
            model: Some(model),
            where_clause: None,
            set_fields: None,
            explicit_sets: Vec::new(),
        }
    }

    /// UPDATE only the columns whose changes `model` has recorded.
    pub fn changes_of(model: &'a M) -> Self {
        let fields = M::fields();
        let changed = model
            .changes()
            .iter()
            .filter_map(|idx| fields.get(idx))
            .filter(|f| !f.primary_key)
            .map(|f| f.name)
            .collect();
        Self {
            model: Some(model),
            where_clause: None,
            set_fields: Some(changed),
            explicit_sets: Vec::new(),
        }
    }

    /// Create an empty UPDATE builder for explicit SET operations.
    pub fn empty() -> Self {
        Self {
            model: None,
            where_clause: None,
            set_fields: None,
            explicit_sets: Vec::new(),
        }
    }

    /// Set a column to a specific value. Overrides the model's value.
    pub fn set<V: Into<Value>>(mut self, column: &str, value: V) -> Self {
        self.explicit_sets.push(SetClause {
            column: column.to_string(),
            value: value.into(),
        });
        self
    }

    /// Only update specific fields from the model.
    pub fn set_only(mut self, fields: &[&'static str]) -> Self {
        self.set_fields = Some(fields.to_vec());
        self
    }

    /// Add a WHERE condition (defaults to primary key match).
    pub fn filter(mut self, expr: Expr) -> Self {
        self.where_clause = Some(match self.where_clause {
            Some(existing) => existing.and(expr),
            None => expr,
        });
        self
    }

    /// Whether the statement would SET nothing.
    pub fn is_noop(&self) -> bool {
        self.explicit_sets.is_empty()
            && match (self.model, &self.set_fields) {
                (None, _) => true,
                (Some(_), Some(fields)) => fields.is_empty(),
                (Some(_), None) => M::fields().iter().all(|f| f.primary_key),
            }
    }

    /// Build the UPDATE SQL and parameters with default dialect (Postgres).
    pub fn build(&self) -> Result<(String, Vec<Value>)> {
        self.build_with_dialect(Dialect::default())
    }

    /// Build the UPDATE SQL and parameters with specific dialect.
    pub fn build_with_dialect(&self, dialect: Dialect) -> Result<(String, Vec<Value>)> {
        let mut params = Vec::new();
        let mut set_clauses = Vec::new();

        for set in &self.explicit_sets {
            params.push(set.value.clone());
            set_clauses.push(format!(
                "{} = {}",
                dialect.quote_ident(&set.column),
                dialect.placeholder(params.len())
            ));
        }

        if let Some(model) = self.model {
            for (name, value) in model.to_row() {
                let Some(field) = M::field(name) else {
                    continue;
                };
                if field.primary_key {
                    continue;
                }
                if let Some(only) = &self.set_fields {
                    if !only.contains(&name) {
                        continue;
                    }
                }
                if self.explicit_sets.iter().any(|s| s.column == field.column_name) {
                    continue;
                }
                params.push(value);
                set_clauses.push(format!(
                    "{} = {}",
                    dialect.quote_ident(field.column_name),
                    dialect.placeholder(params.len())
                ));
            }
        }

        if set_clauses.is_empty() {
            return Err(Error::Custom(format!(
                "UPDATE of {} has no columns to set",
                M::TABLE_NAME
            )));
        }

        let condition = match (&self.where_clause, self.model) {
            (Some(expr), _) => expr.render(&Unscoped, dialect, &mut params)?,
            (None, Some(model)) => {
                let id = model.primary_key().ok_or_else(|| {
                    Error::Custom(format!(
                        "cannot UPDATE a {} without an identity",
                        M::TABLE_NAME
                    ))
                })?;
                params.push(Value::BigInt(id));
                format!(
                    "{} = {}",
                    dialect.quote_ident(M::PRIMARY_KEY),
                    dialect.placeholder(params.len())
                )
            }
            (None, None) => {
                return Err(Error::Custom(format!(
                    "UPDATE of {} needs a model or a filter",
                    M::TABLE_NAME
                )));
            }
        };

        let sql = format!(
            "UPDATE {} SET {} WHERE {}",
            dialect.quote_ident(M::TABLE_NAME),
            set_clauses.join(", "),
            condition
        );
        Ok((sql, params))
    }

    /// Execute the UPDATE and return rows affected.
    pub async fn execute<C: Connection>(self, cx: &Cx, conn: &C) -> Outcome<u64, Error> {
        match self.build_with_dialect(conn.dialect()) {
            Ok((sql, params)) => conn.execute(cx, &sql, &params).await,
            Err(e) => Outcome::Err(e),
        }
    }
}

/// DELETE query builder.
///
/// # Example
///
/// ```ignore
/// DeleteBuilder::<Course>::by_id(10002).execute(&cx, &conn).await?;
/// ```
#[derive(Debug)]
pub struct DeleteBuilder<M: Model> {
    where_clause: Option<Expr>,
    _marker: PhantomData<fn() -> M>,
}

impl<M: Model> DeleteBuilder<M> {
    /// DELETE every row of the table unless filtered.
    pub fn from_table() -> Self {
        Self {
            where_clause: None,
            _marker: PhantomData,
        }
    }

    /// DELETE the row with primary key `id`.
    pub fn by_id(id: i64) -> Self {
        Self::from_table().filter(Expr::col(M::PRIMARY_KEY).eq(id))
    }

    /// Add a WHERE condition.
    pub fn filter(mut self, expr: Expr) -> Self {
        self.where_clause = Some(match self.where_clause {
            Some(existing) => existing.and(expr),
            None => expr,
        });
        self
    }

    /// Build the DELETE SQL and parameters with specific dialect.
    pub fn build_with_dialect(&self, dialect: Dialect) -> Result<(String, Vec<Value>)> {
        let mut params = Vec::new();
        let mut sql = format!("DELETE FROM {}", dialect.quote_ident(M::TABLE_NAME));
        if let Some(expr) = &self.where_clause {
            sql.push_str(" WHERE ");
            sql.push_str(&expr.render(&Unscoped, dialect, &mut params)?);
        }
        Ok((sql, params))
    }

    /// Execute the DELETE and return rows affected.
    pub async fn execute<C: Connection>(self, cx: &Cx, conn: &C) -> Outcome<u64, Error> {
        match self.build_with_dialect(conn.dialect()) {
            Ok((sql, params)) => conn.execute(cx, &sql, &params).await,
            Err(e) => Outcome::Err(e),
        }
    }
}

/// Writes to a many-to-many link table.
#[derive(Debug, Clone, Copy)]
pub struct LinkBuilder {
    link: LinkTableInfo,
}

impl LinkBuilder {
    /// Builder for `link`, seen from its local side.
    pub fn new(link: LinkTableInfo) -> Self {
        Self { link }
    }

    /// INSERT the `(local, remote)` row unless it already exists.
    ///
    /// Membership is a set: linking a pair that storage already holds is a
    /// no-op rather than a key violation.
    pub fn insert(&self, dialect: Dialect, local: i64, remote: i64) -> (String, Vec<Value>) {
        let (verb, suffix) = match dialect {
            Dialect::Mysql => ("INSERT IGNORE INTO", ""),
            Dialect::Postgres | Dialect::Sqlite => ("INSERT INTO", " ON CONFLICT DO NOTHING"),
        };
        let sql = format!(
            "{verb} {} ({}, {}) VALUES ({}, {}){suffix}",
            dialect.quote_ident(self.link.table_name),
            dialect.quote_ident(self.link.local_column),
            dialect.quote_ident(self.link.remote_column),
            dialect.placeholder(1),
            dialect.placeholder(2)
        );
        (sql, vec![Value::BigInt(local), Value::BigInt(remote)])
    }

    /// DELETE the `(local, remote)` row.
    pub fn delete(&self, dialect: Dialect, local: i64, remote: i64) -> (String, Vec<Value>) {
        let sql = format!(
            "DELETE FROM {} WHERE {} = {} AND {} = {}",
            dialect.quote_ident(self.link.table_name),
            dialect.quote_ident(self.link.local_column),
            dialect.placeholder(1),
            dialect.quote_ident(self.link.remote_column),
            dialect.placeholder(2)
        );
        (sql, vec![Value::BigInt(local), Value::BigInt(remote)])
    }

    /// DELETE every row of the local entity `local`.
    pub fn delete_all(&self, dialect: Dialect, local: i64) -> (String, Vec<Value>) {
        let sql = format!(
            "DELETE FROM {} WHERE {} = {}",
            dialect.quote_ident(self.link.table_name),
            dialect.quote_ident(self.link.local_column),
            dialect.placeholder(1)
        );
        (sql, vec![Value::BigInt(local)])
    }
}

fn column_of<M: Model>(name: &str, dialect: Dialect) -> String {
    let column = M::field(name).map_or(name, |f| f.column_name);
    dialect.quote_ident(column)
}

#[cfg(test)]
mod tests {
    use super::*;
    use minorm_core::{ChangeSet, FieldInfo, Row, SqlType};

    // Mock model for testing
    struct TestHero {
        id: Option<i64>,
        name: String,
        age: i64,
        changes: ChangeSet,
    }

    static HERO_FIELDS: [FieldInfo; 3] = [
        FieldInfo::id(),
        FieldInfo::new("name", "name", SqlType::Text),
        FieldInfo::new("age", "age", SqlType::BigInt),
    ];

    impl TestHero {
        fn new(id: Option<i64>) -> Self {
            TestHero {
                id,
                name: "Spider-Man".to_string(),
                age: 25,
                changes: ChangeSet::empty(3),
            }
        }

        fn set_age(&mut self, age: i64) {
            self.age = age;
            self.changes.mark(2);
        }
    }

    impl Model for TestHero {
        const TABLE_NAME: &'static str = "heroes";

        fn fields() -> &'static [FieldInfo] {
            &HERO_FIELDS
        }

        fn primary_key(&self) -> Option<i64> {
            self.id
        }

        fn assign_primary_key(&mut self, id: Option<i64>) {
            self.id = id;
        }

        fn to_row(&self) -> Vec<(&'static str, Value)> {
            vec![
                ("id", self.id.into()),
                ("name", Value::Text(self.name.clone())),
                ("age", Value::BigInt(self.age)),
            ]
        }

        fn from_row(_row: &Row) -> Result<Self> {
            unimplemented!()
        }

        fn changes(&self) -> &ChangeSet {
            &self.changes
        }

        fn changes_mut(&mut self) -> &mut ChangeSet {
            &mut self.changes
        }
    }

    #[test]
    fn test_insert_basic() {
        let hero = TestHero::new(None);
        let (sql, params) = InsertBuilder::new(&hero).build();

        assert_eq!(sql, r#"INSERT INTO "heroes" ("name", "age") VALUES ($1, $2)"#);
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_insert_with_explicit_id() {
        let hero = TestHero::new(Some(7));
        let (sql, params) = InsertBuilder::new(&hero).build_with_dialect(Dialect::Sqlite);

        assert_eq!(
            sql,
            r#"INSERT INTO "heroes" ("id", "name", "age") VALUES (?1, ?2, ?3)"#
        );
        assert_eq!(params[0], Value::BigInt(7));
    }

    #[test]
    fn test_update_all_columns() {
        let hero = TestHero::new(Some(1));
        let (sql, params) = UpdateBuilder::new(&hero).build().unwrap();

        assert_eq!(
            sql,
            r#"UPDATE "heroes" SET "name" = $1, "age" = $2 WHERE "id" = $3"#
        );
        assert_eq!(params[2], Value::BigInt(1));
    }

    #[test]
    fn test_update_only_recorded_changes() {
        let mut hero = TestHero::new(Some(1));
        assert!(UpdateBuilder::changes_of(&hero).is_noop());

        hero.set_age(26);
        let builder = UpdateBuilder::changes_of(&hero);
        assert!(!builder.is_noop());
        let (sql, params) = builder.build_with_dialect(Dialect::Sqlite).unwrap();

        assert_eq!(sql, r#"UPDATE "heroes" SET "age" = ?1 WHERE "id" = ?2"#);
        assert_eq!(params, vec![Value::BigInt(26), Value::BigInt(1)]);
    }

    #[test]
    fn test_update_explicit_set_with_filter() {
        let (sql, params) = UpdateBuilder::<TestHero>::empty()
            .set("age", 30_i64)
            .filter(Expr::col("name").eq("Spider-Man"))
            .build()
            .unwrap();

        assert_eq!(
            sql,
            r#"UPDATE "heroes" SET "age" = $1 WHERE ("name" = $2)"#
        );
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_update_requires_identity() {
        let hero = TestHero::new(None);
        assert!(UpdateBuilder::new(&hero).build().is_err());
        assert!(UpdateBuilder::<TestHero>::empty().build().is_err());
    }

    #[test]
    fn test_delete() {
        let (sql, params) = DeleteBuilder::<TestHero>::by_id(5)
            .build_with_dialect(Dialect::Sqlite)
            .unwrap();
        assert_eq!(sql, r#"DELETE FROM "heroes" WHERE ("id" = ?1)"#);
        assert_eq!(params, vec![Value::BigInt(5)]);

        let (sql, params) = DeleteBuilder::<TestHero>::from_table()
            .build_with_dialect(Dialect::Sqlite)
            .unwrap();
        assert_eq!(sql, r#"DELETE FROM "heroes""#);
        assert!(params.is_empty());
    }

    #[test]
    fn test_link_rows() {
        let link = LinkBuilder::new(LinkTableInfo::new("student_course", "student_id", "course_id"));

        let (sql, params) = link.insert(Dialect::Sqlite, 20001, 10003);
        assert_eq!(
            sql,
            r#"INSERT INTO "student_course" ("student_id", "course_id") VALUES (?1, ?2) ON CONFLICT DO NOTHING"#
        );
        assert_eq!(params, vec![Value::BigInt(20001), Value::BigInt(10003)]);

        let (sql, _) = link.insert(Dialect::Mysql, 20001, 10003);
        assert_eq!(
            sql,
            "INSERT IGNORE INTO `student_course` (`student_id`, `course_id`) VALUES (?, ?)"
        );

        let (sql, _) = link.delete(Dialect::Sqlite, 20001, 10003);
        assert_eq!(
            sql,
            r#"DELETE FROM "student_course" WHERE "student_id" = ?1 AND "course_id" = ?2"#
        );

        let (sql, params) = link.delete_all(Dialect::Postgres, 20001);
        assert_eq!(sql, r#"DELETE FROM "student_course" WHERE "student_id" = $1"#);
        assert_eq!(params.len(), 1);
    }
}
