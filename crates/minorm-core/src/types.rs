//! Column types and enumerated values.

use crate::error::{Error, Result};
use crate::value::Value;

/// Storage type of a mapped column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    /// 64-bit integer.
    BigInt,
    /// Text.
    Text,
    /// Double precision float.
    Double,
    /// Boolean.
    Boolean,
    /// Raw bytes.
    Blob,
}

impl SqlType {
    /// Type name used in generated DDL.
    pub const fn sql_name(self) -> &'static str {
        match self {
            SqlType::BigInt => "INTEGER",
            SqlType::Text => "TEXT",
            SqlType::Double => "REAL",
            SqlType::Boolean => "BOOLEAN",
            SqlType::Blob => "BLOB",
        }
    }
}

/// An enumeration persisted by symbolic name.
///
/// Rows store `sql_name()`, never an ordinal, so new variants can be added
/// without changing the meaning of existing rows.
pub trait SqlEnum: Sized + Copy + 'static {
    /// All symbolic names, in declaration order.
    const VARIANTS: &'static [&'static str];

    /// Symbolic name of this variant.
    fn sql_name(&self) -> &'static str;

    /// Parse a symbolic name.
    fn from_sql_name(name: &str) -> Option<Self>;

    /// The value written to storage.
    fn to_value(&self) -> Value {
        Value::Text(self.sql_name().to_string())
    }

    /// Read a stored value for `column`.
    fn from_column(column: &str, value: &Value) -> Result<Self> {
        let name = value.as_str().ok_or_else(|| Error::Type {
            column: column.to_string(),
            expected: "TEXT",
            found: value.type_name(),
        })?;
        Self::from_sql_name(name).ok_or_else(|| {
            Error::Custom(format!(
                "column {column}: `{name}` is not one of {:?}",
                Self::VARIANTS
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Level {
        Low,
        High,
    }

    impl SqlEnum for Level {
        const VARIANTS: &'static [&'static str] = &["LOW", "HIGH"];

        fn sql_name(&self) -> &'static str {
            match self {
                Level::Low => "LOW",
                Level::High => "HIGH",
            }
        }

        fn from_sql_name(name: &str) -> Option<Self> {
            match name {
                "LOW" => Some(Level::Low),
                "HIGH" => Some(Level::High),
                _ => None,
            }
        }
    }

    #[test]
    fn test_enum_persists_by_name() {
        assert_eq!(Level::High.to_value(), Value::Text("HIGH".into()));
        assert_eq!(
            Level::from_column("level", &Value::Text("HIGH".into())).unwrap(),
            Level::High
        );
    }

    #[test]
    fn test_enum_rejects_ordinals() {
        assert!(Level::from_column("level", &Value::BigInt(1)).is_err());
        assert!(Level::from_column("level", &Value::Text("MEDIUM".into())).is_err());
    }
}
