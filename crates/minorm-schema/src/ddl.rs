//! SQLite DDL generator.

use asupersync::{Cx, Outcome};
use minorm_core::{
    Connection, Dialect, Error, FieldInfo, Model, ReferentialAction, RelationshipInfo,
    RelationshipKind, Value,
};

const DIALECT: Dialect = Dialect::Sqlite;

fn quote(ident: &str) -> String {
    DIALECT.quote_ident(ident)
}

fn column_def(field: &FieldInfo) -> String {
    let mut def = format!("{} {}", quote(field.column_name), field.sql_type.sql_name());
    if field.primary_key {
        def.push_str(" PRIMARY KEY");
        if field.auto_increment {
            def.push_str(" AUTOINCREMENT");
        }
    } else {
        if !field.nullable {
            def.push_str(" NOT NULL");
        }
        if field.unique {
            def.push_str(" UNIQUE");
        }
    }
    def
}

fn foreign_key_def(
    column: &str,
    table: &str,
    target: &str,
    on_delete: Option<ReferentialAction>,
) -> String {
    let mut def = format!(
        "FOREIGN KEY ({}) REFERENCES {}({})",
        quote(column),
        quote(table),
        quote(target)
    );
    if let Some(action) = on_delete {
        def.push_str(" ON DELETE ");
        def.push_str(action.as_sql());
    }
    def
}

/// `CREATE TABLE IF NOT EXISTS` for `M`.
pub fn create_table_sql<M: Model>() -> String {
    let fields = M::fields();
    let mut parts: Vec<String> = fields.iter().map(column_def).collect();
    for field in fields {
        if let Some((table, target)) = field.foreign_key {
            parts.push(foreign_key_def(field.column_name, table, target, field.on_delete));
        }
    }
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote(M::TABLE_NAME),
        parts.join(", ")
    )
}

/// `CREATE TABLE IF NOT EXISTS` for the link table of an owning many-to-many
/// relationship of `M`; `None` for any other relationship.
pub fn create_link_table_sql<M: Model>(rel: &RelationshipInfo) -> Option<String> {
    if rel.kind != RelationshipKind::ManyToMany || rel.inverse {
        return None;
    }
    let link = rel.link_table?;
    let local = quote(link.local_column);
    let remote = quote(link.remote_column);
    Some(format!(
        "CREATE TABLE IF NOT EXISTS {} ({local} INTEGER NOT NULL, {remote} INTEGER NOT NULL, PRIMARY KEY ({local}, {remote}), {}, {})",
        quote(link.table_name),
        foreign_key_def(link.local_column, M::TABLE_NAME, M::PRIMARY_KEY, None),
        foreign_key_def(link.remote_column, rel.related_table, rel.related_key, None),
    ))
}

/// Collects DDL statements for a set of models.
///
/// Tables are created in the order they are added; add referenced tables
/// before the tables that point at them.
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    statements: Vec<String>,
}

impl SchemaBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the table of `M`.
    pub fn create_table<M: Model>(mut self) -> Self {
        self.statements.push(create_table_sql::<M>());
        self
    }

    /// Add the link tables owned by `M`.
    pub fn create_link_tables<M: Model>(mut self) -> Self {
        self.statements.extend(
            M::relationships()
                .iter()
                .filter_map(create_link_table_sql::<M>),
        );
        self
    }

    /// Add a raw statement.
    pub fn raw(mut self, sql: impl Into<String>) -> Self {
        self.statements.push(sql.into());
        self
    }

    /// The collected statements.
    pub fn build(self) -> Vec<String> {
        self.statements
    }

    /// Run the collected statements on `conn`.
    #[tracing::instrument(level = "debug", skip(self, cx, conn))]
    pub async fn apply<C: Connection>(self, cx: &Cx, conn: &C) -> Outcome<(), Error> {
        let count = self.statements.len();
        let statements: Vec<(String, Vec<Value>)> = self
            .statements
            .into_iter()
            .map(|sql| (sql, Vec::new()))
            .collect();
        match conn.execute_batch(cx, &statements).await {
            Outcome::Ok(_) => {
                tracing::info!(statements = count, "Schema created");
                Outcome::Ok(())
            }
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }
}
