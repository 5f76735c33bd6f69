//! SQL dialect differences that matter to statement generation.

/// SQL dialect a [`Connection`](crate::Connection) speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dialect {
    /// `$1, $2, ...` placeholders.
    #[default]
    Postgres,
    /// `?1, ?2, ...` placeholders.
    Sqlite,
    /// `?` placeholders.
    Mysql,
}

impl Dialect {
    /// Placeholder for the 1-based parameter index `idx`.
    pub fn placeholder(self, idx: usize) -> String {
        match self {
            Dialect::Postgres => format!("${idx}"),
            Dialect::Sqlite => format!("?{idx}"),
            Dialect::Mysql => "?".to_string(),
        }
    }

    /// Quote an identifier.
    pub fn quote_ident(self, ident: &str) -> String {
        match self {
            Dialect::Mysql => format!("`{}`", ident.replace('`', "``")),
            Dialect::Postgres | Dialect::Sqlite => format!("\"{}\"", ident.replace('"', "\"\"")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholders() {
        assert_eq!(Dialect::Postgres.placeholder(2), "$2");
        assert_eq!(Dialect::Sqlite.placeholder(2), "?2");
        assert_eq!(Dialect::Mysql.placeholder(2), "?");
    }

    #[test]
    fn test_quote_ident_escapes() {
        assert_eq!(Dialect::Sqlite.quote_ident("course"), "\"course\"");
        assert_eq!(Dialect::Sqlite.quote_ident("a\"b"), "\"a\"\"b\"");
        assert_eq!(Dialect::Mysql.quote_ident("a`b"), "`a``b`");
    }
}
