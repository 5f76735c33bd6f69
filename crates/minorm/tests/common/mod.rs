#![allow(dead_code)]

use minorm::demo::seed;
use minorm::prelude::*;
use tracing_subscriber::EnvFilter;

/// Install a test-writer subscriber once per test binary. `RUST_LOG`
/// overrides the default `warn` level.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

pub fn unwrap_outcome<T>(outcome: Outcome<T, Error>) -> T {
    match outcome {
        Outcome::Ok(v) => v,
        Outcome::Err(e) => panic!("unexpected error: {e}"),
        Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
        Outcome::Panicked(p) => panic!("panicked: {p:?}"),
    }
}

pub fn expect_err<T>(outcome: Outcome<T, Error>) -> Error {
    match outcome {
        Outcome::Err(e) => e,
        Outcome::Ok(_) => panic!("expected an error"),
        Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
        Outcome::Panicked(p) => panic!("panicked: {p:?}"),
    }
}

/// An in-memory database holding the demo schema and fixture rows.
pub async fn seeded(cx: &Cx) -> SqliteConnection {
    let conn = SqliteConnection::open_memory().expect("open in-memory sqlite");
    unwrap_outcome(seed(cx, &conn).await);
    conn
}
