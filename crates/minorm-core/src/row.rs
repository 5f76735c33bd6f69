//! Result rows.

use crate::error::{Error, Result};
use crate::value::{FromValue, Value};

/// A single result row: column names paired with values.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<Value>,
}

impl Row {
    /// Create a row. `columns` and `values` must have the same length.
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    /// Column names, in select order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Values, in select order.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True if the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value at a column index.
    pub fn get(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx)
    }

    /// Value of a named column.
    pub fn get_named(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == name)
            .and_then(|idx| self.values.get(idx))
    }

    /// Typed value of a named column.
    pub fn get_as<T: FromValue>(&self, name: &str) -> Result<T> {
        let value = self
            .get_named(name)
            .ok_or_else(|| Error::ColumnNotFound(name.to_string()))?;
        T::from_value(value).ok_or_else(|| Error::Type {
            column: name.to_string(),
            expected: T::EXPECTED,
            found: value.type_name(),
        })
    }

    /// The sub-row of columns named `{prefix}{column}`, with the prefix stripped.
    ///
    /// Joined selects alias every column with a per-table prefix; this splits
    /// such a row back into one row per entity.
    pub fn with_prefix(&self, prefix: &str) -> Row {
        let mut columns = Vec::new();
        let mut values = Vec::new();
        for (column, value) in self.columns.iter().zip(&self.values) {
            if let Some(stripped) = column.strip_prefix(prefix) {
                columns.push(stripped.to_string());
                values.push(value.clone());
            }
        }
        Row { columns, values }
    }
}
