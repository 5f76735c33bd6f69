//! SQLite driver for minorm.
//!
//! [`SqliteConnection`] implements `minorm_core::Connection` on top of
//! `rusqlite`. Statements run synchronously under a mutex; the returned
//! futures are already complete.
//!
//! ```ignore
//! let conn = SqliteConnection::open(&SqliteConfig::file("demo.db"))?;
//! let session = Session::new(conn);
//! ```

pub mod config;
pub mod connection;

pub use config::{SqliteConfig, SqliteLocation};
pub use connection::SqliteConnection;
