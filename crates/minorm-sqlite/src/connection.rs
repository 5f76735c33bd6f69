//! `rusqlite`-backed [`Connection`].

// Allow `impl Future` return types in trait methods - intentional for async trait compat
#![allow(clippy::manual_async_fn)]

use std::future::Future;

use asupersync::{Cx, Outcome};
use minorm_core::{Connection, Dialect, Error, Result, Row, Value};
use parking_lot::Mutex;
use rusqlite::types::{Value as SqliteValue, ValueRef};

use crate::config::{SqliteConfig, SqliteLocation};

/// A single SQLite connection.
pub struct SqliteConnection {
    inner: Mutex<rusqlite::Connection>,
    config: SqliteConfig,
}

impl std::fmt::Debug for SqliteConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteConnection")
            .field("location", &self.config.location)
            .finish_non_exhaustive()
    }
}

impl SqliteConnection {
    /// Open a connection as described by `config`.
    #[tracing::instrument(level = "debug")]
    pub fn open(config: &SqliteConfig) -> Result<Self> {
        let conn = match &config.location {
            SqliteLocation::Memory => rusqlite::Connection::open_in_memory(),
            SqliteLocation::File(path) => rusqlite::Connection::open(path),
        }
        .map_err(|e| Error::Connection(e.to_string()))?;

        conn.busy_timeout(config.busy_timeout_duration())
            .map_err(|e| Error::Connection(e.to_string()))?;
        let pragma = if config.foreign_keys {
            "PRAGMA foreign_keys = ON;"
        } else {
            "PRAGMA foreign_keys = OFF;"
        };
        conn.execute_batch(pragma)
            .map_err(|e| Error::Connection(e.to_string()))?;

        tracing::info!(location = ?config.location, "Opened SQLite connection");
        Ok(Self {
            inner: Mutex::new(conn),
            config: config.clone(),
        })
    }

    /// Open a private in-memory database.
    pub fn open_memory() -> Result<Self> {
        Self::open(&SqliteConfig::memory())
    }

    /// The configuration this connection was opened with.
    pub fn config(&self) -> &SqliteConfig {
        &self.config
    }

    fn query_sync(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        tracing::trace!(sql, params = params.len(), "query");
        let conn = self.inner.lock();
        let mut stmt = conn.prepare(sql).map_err(|e| map_error(&e, sql))?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

        let mut rows = stmt
            .query(rusqlite::params_from_iter(params.iter().map(to_sqlite)))
            .map_err(|e| map_error(&e, sql))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(|e| map_error(&e, sql))? {
            let mut values = Vec::with_capacity(columns.len());
            for idx in 0..columns.len() {
                let value = row.get_ref(idx).map_err(|e| map_error(&e, sql))?;
                values.push(from_sqlite(&columns[idx], value)?);
            }
            out.push(Row::new(columns.clone(), values));
        }
        Ok(out)
    }

    fn execute_sync(&self, sql: &str, params: &[Value]) -> Result<(u64, i64)> {
        tracing::trace!(sql, params = params.len(), "execute");
        let conn = self.inner.lock();
        let changed = conn
            .execute(sql, rusqlite::params_from_iter(params.iter().map(to_sqlite)))
            .map_err(|e| map_error(&e, sql))?;
        Ok((changed as u64, conn.last_insert_rowid()))
    }
}

fn to_sqlite(value: &Value) -> SqliteValue {
    match value {
        Value::Null => SqliteValue::Null,
        Value::Bool(b) => SqliteValue::Integer(i64::from(*b)),
        Value::Int(i) => SqliteValue::Integer(i64::from(*i)),
        Value::BigInt(i) => SqliteValue::Integer(*i),
        Value::Double(f) => SqliteValue::Real(*f),
        Value::Text(s) => SqliteValue::Text(s.clone()),
        Value::Bytes(b) => SqliteValue::Blob(b.clone()),
    }
}

fn from_sqlite(column: &str, value: ValueRef<'_>) -> Result<Value> {
    Ok(match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::BigInt(i),
        ValueRef::Real(f) => Value::Double(f),
        ValueRef::Text(t) => {
            let text = std::str::from_utf8(t).map_err(|_| Error::Type {
                column: column.to_string(),
                expected: "UTF-8 text",
                found: "invalid UTF-8",
            })?;
            Value::Text(text.to_owned())
        }
        ValueRef::Blob(b) => Value::Bytes(b.to_vec()),
    })
}

fn map_error(err: &rusqlite::Error, sql: &str) -> Error {
    if err.sqlite_error_code() == Some(rusqlite::ErrorCode::ConstraintViolation) {
        tracing::debug!(error = %err, sql, "Constraint violation");
        return Error::ConstraintViolation(err.to_string());
    }
    tracing::debug!(error = %err, sql, "Statement failed");
    Error::query(err.to_string(), sql)
}

fn into_outcome<T>(result: Result<T>) -> Outcome<T, Error> {
    match result {
        Ok(value) => Outcome::Ok(value),
        Err(e) => Outcome::Err(e),
    }
}

impl Connection for SqliteConnection {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn query(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
        let result = into_outcome(self.query_sync(sql, params));
        async move { result }
    }

    fn query_one(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Option<Row>, Error>> + Send {
        let result = into_outcome(
            self.query_sync(sql, params)
                .map(|rows| rows.into_iter().next()),
        );
        async move { result }
    }

    fn execute(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        let result = into_outcome(self.execute_sync(sql, params).map(|(n, _)| n));
        async move { result }
    }

    fn insert(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<i64, Error>> + Send {
        let result = into_outcome(self.execute_sync(sql, params).map(|(_, id)| id));
        async move { result }
    }

    fn execute_batch(
        &self,
        _cx: &Cx,
        statements: &[(String, Vec<Value>)],
    ) -> impl Future<Output = Outcome<Vec<u64>, Error>> + Send {
        let result = into_outcome(
            statements
                .iter()
                .map(|(sql, params)| self.execute_sync(sql, params).map(|(n, _)| n))
                .collect::<Result<Vec<u64>>>(),
        );
        async move { result }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use asupersync::runtime::RuntimeBuilder;

    fn unwrap_outcome<T>(outcome: Outcome<T, Error>) -> T {
        match outcome {
            Outcome::Ok(v) => v,
            Outcome::Err(e) => panic!("unexpected error: {e}"),
            Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
            Outcome::Panicked(p) => panic!("panicked: {p:?}"),
        }
    }

    fn setup(cx: &Cx, conn: &SqliteConnection) -> impl Future<Output = ()> {
        let statements = vec![
            (
                "CREATE TABLE parent (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL)"
                    .to_string(),
                Vec::new(),
            ),
            (
                "CREATE TABLE child (id INTEGER PRIMARY KEY, parent_id INTEGER NOT NULL, \
                 FOREIGN KEY (parent_id) REFERENCES parent(id))"
                    .to_string(),
                Vec::new(),
            ),
        ];
        async move {
            unwrap_outcome(conn.execute_batch(cx, &statements).await);
        }
    }

    #[test]
    fn test_insert_and_query() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        rt.block_on(async {
            let conn = SqliteConnection::open_memory().unwrap();
            assert_eq!(conn.dialect(), Dialect::Sqlite);
            setup(&cx, &conn).await;

            let id = unwrap_outcome(
                conn.insert(&cx, "INSERT INTO parent (name) VALUES (?1)", &["first".into()])
                    .await,
            );
            assert_eq!(id, 1);

            let rows = unwrap_outcome(
                conn.query(&cx, "SELECT id, name FROM parent WHERE id = ?1", &[Value::BigInt(id)])
                    .await,
            );
            assert_eq!(rows.len(), 1);
            assert_eq!(rows[0].get_as::<i64>("id").unwrap(), 1);
            assert_eq!(rows[0].get_as::<String>("name").unwrap(), "first");

            let missing = unwrap_outcome(
                conn.query_one(&cx, "SELECT id FROM parent WHERE id = ?1", &[Value::BigInt(9)])
                    .await,
            );
            assert!(missing.is_none());
        });
    }

    #[test]
    fn test_constraint_violation_is_mapped() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        rt.block_on(async {
            let conn = SqliteConnection::open_memory().unwrap();
            setup(&cx, &conn).await;

            let outcome = conn
                .execute(
                    &cx,
                    "INSERT INTO child (id, parent_id) VALUES (1, 42)",
                    &[],
                )
                .await;
            match outcome {
                Outcome::Err(e) => assert!(e.is_constraint_violation(), "{e}"),
                _ => panic!("expected a constraint violation"),
            }

            let outcome = conn.execute(&cx, "INSERT INTO parent (name) VALUES (NULL)", &[]).await;
            assert!(matches!(outcome, Outcome::Err(Error::ConstraintViolation(_))));
        });
    }

    #[test]
    fn test_invalid_utf8_text_is_type_error() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        rt.block_on(async {
            let conn = SqliteConnection::open_memory().unwrap();
            match conn.query(&cx, "SELECT CAST(X'FF' AS TEXT) AS garbled", &[]).await {
                Outcome::Err(Error::Type { column, found, .. }) => {
                    assert_eq!(column, "garbled");
                    assert_eq!(found, "invalid UTF-8");
                }
                _ => panic!("expected a type error"),
            }
        });
    }

    #[test]
    fn test_syntax_error_is_query_error() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        rt.block_on(async {
            let conn = SqliteConnection::open_memory().unwrap();
            match conn.query(&cx, "SELEC 1", &[]).await {
                Outcome::Err(Error::Query { sql, .. }) => {
                    assert_eq!(sql.as_deref(), Some("SELEC 1"));
                }
                _ => panic!("expected a query error"),
            }
        });
    }

    #[test]
    fn test_file_database_is_shared_between_connections() {
        let dir = tempfile::tempdir().unwrap();
        let config = SqliteConfig::file(dir.path().join("shared.db"));
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        rt.block_on(async {
            let first = SqliteConnection::open(&config).unwrap();
            setup(&cx, &first).await;
            unwrap_outcome(
                first
                    .execute(&cx, "INSERT INTO parent (name) VALUES ('a')", &[])
                    .await,
            );

            let second = SqliteConnection::open(&config).unwrap();
            let rows = unwrap_outcome(second.query(&cx, "SELECT name FROM parent", &[]).await);
            assert_eq!(rows.len(), 1);
        });
    }
}
