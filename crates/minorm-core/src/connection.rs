//! The storage connection contract.
//!
//! Drivers implement [`Connection`]; the session and the query builder only
//! ever talk to storage through it. Transactions are demarcated with plain
//! `BEGIN` / `COMMIT` / `ROLLBACK` statements through [`Connection::execute`].

use std::future::Future;

use asupersync::{Cx, Outcome};

use crate::dialect::Dialect;
use crate::error::Error;
use crate::row::Row;
use crate::value::Value;

/// A connection to a relational store.
pub trait Connection: Send + Sync {
    /// Dialect used when rendering statements for this connection.
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    /// Run a statement that returns rows.
    fn query(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send;

    /// Run a statement that returns at most one row.
    fn query_one(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Option<Row>, Error>> + Send;

    /// Run a statement and return the number of affected rows.
    fn execute(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<u64, Error>> + Send;

    /// Run an INSERT and return the identity storage assigned.
    fn insert(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<i64, Error>> + Send;

    /// Run several statements in order, stopping at the first failure.
    fn execute_batch(
        &self,
        cx: &Cx,
        statements: &[(String, Vec<Value>)],
    ) -> impl Future<Output = Outcome<Vec<u64>, Error>> + Send;
}
