//! Detached result rows and typed row mapping.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::value::{FromValue, Value};

/// Shared column metadata for every row produced by one cursor.
///
/// Lookup keys are lowercased; when two result columns share a name the
/// leftmost one wins.
#[derive(Debug)]
pub(crate) struct ColumnIndex {
    names: Vec<String>,
    lookup: HashMap<String, usize>,
}

impl ColumnIndex {
    pub(crate) fn new(names: Vec<String>) -> Self {
        let mut lookup = HashMap::with_capacity(names.len());
        for (position, name) in names.iter().enumerate() {
            lookup.entry(name.to_lowercase()).or_insert(position);
        }
        Self { names, lookup }
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.lookup.get(&name.to_lowercase()).copied()
    }

    pub(crate) fn len(&self) -> usize {
        self.names.len()
    }
}

/// One result row, detached from its statement.
///
/// Rows are snapshots: they stay valid after the cursor advances or the
/// statement is dropped, and cloning is a plain deep copy.
#[derive(Debug, Clone)]
pub struct Row {
    index: Arc<ColumnIndex>,
    values: Vec<Value>,
}

impl Row {
    pub(crate) fn new(index: Arc<ColumnIndex>, values: Vec<Value>) -> Self {
        Self { index, values }
    }

    /// Column names in result order.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.index.names
    }

    /// Number of columns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// `true` when the row has no columns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// `true` when a column with this name exists (case-insensitive).
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.index.position(name).is_some()
    }

    /// Raw value by column name (case-insensitive, leftmost-wins), or
    /// `None` when no such column exists.
    #[must_use]
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.index.position(name).map(|i| &self.values[i])
    }

    /// Raw value by position.
    #[must_use]
    pub fn value_at(&self, position: usize) -> Option<&Value> {
        self.values.get(position)
    }

    /// Typed value by column name.
    ///
    /// # Errors
    /// [`Error::ColumnNotFound`] when the column does not exist,
    /// [`Error::Cast`] when the stored value does not fit `T`.
    pub fn get<T: FromValue>(&self, name: &str) -> Result<T> {
        let value = self
            .value(name)
            .ok_or_else(|| Error::ColumnNotFound(name.to_owned()))?;
        value.decode()
    }

    /// Typed value by position.
    ///
    /// # Errors
    /// [`Error::ColumnNotFound`] when the position is out of range,
    /// [`Error::Cast`] when the stored value does not fit `T`.
    pub fn get_at<T: FromValue>(&self, position: usize) -> Result<T> {
        let value = self
            .value_at(position)
            .ok_or_else(|| Error::ColumnNotFound(position.to_string()))?;
        value.decode()
    }
}

/// Construction of a typed record from one result row.
pub trait FromRow: Sized {
    /// Builds `Self` from a row.
    ///
    /// # Errors
    /// Typically [`Error::ColumnNotFound`] or [`Error::Cast`] from the
    /// row accessors.
    fn from_row(row: &Row) -> Result<Self>;
}

impl FromRow for Row {
    fn from_row(row: &Row) -> Result<Self> {
        Ok(row.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Row {
        let index = Arc::new(ColumnIndex::new(vec![
            "id".to_owned(),
            "Name".to_owned(),
            "name".to_owned(),
        ]));
        Row::new(
            index,
            vec![
                Value::Integer(7),
                Value::Text("left".into()),
                Value::Text("right".into()),
            ],
        )
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let row = sample();
        assert_eq!(row.get::<i64>("ID").unwrap(), 7);
        assert_eq!(row.get::<i64>("id").unwrap(), 7);
    }

    #[test]
    fn duplicate_names_resolve_leftmost() {
        let row = sample();
        assert_eq!(row.get::<String>("name").unwrap(), "left");
        assert_eq!(row.get_at::<String>(2).unwrap(), "right");
    }

    #[test]
    fn missing_column_is_reported() {
        let row = sample();
        assert!(matches!(
            row.get::<i64>("absent"),
            Err(Error::ColumnNotFound(_))
        ));
    }

    #[test]
    fn cast_failure_is_reported() {
        let row = sample();
        assert!(matches!(row.get::<Vec<u8>>("id"), Err(Error::Cast { .. })));
    }
}
