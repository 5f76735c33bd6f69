//! Schema generation for minorm.
//!
//! Tables are derived from the static descriptors each `Model` declares:
//! `fields()` gives the columns, owning many-to-many relationships give the
//! link tables. There is no introspection and no migration support; the
//! generated statements are idempotent (`CREATE TABLE IF NOT EXISTS`).
//!
//! ```ignore
//! SchemaBuilder::new()
//!     .create_table::<Passport>()
//!     .create_table::<Student>()
//!     .create_link_tables::<Student>()
//!     .apply(&cx, &conn)
//!     .await?;
//! ```

pub mod ddl;

pub use ddl::{SchemaBuilder, create_link_table_sql, create_table_sql};
