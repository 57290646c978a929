//! INSERT statement builder.

use crate::query::expression::{Expr, IntoExpr};
use crate::query::{ConflictResolution, SqlQuery};
use crate::value::Value;

/// A single-row INSERT statement.
///
/// Either give a column list plus matching values, give bare values for
/// every table column in declaration order, or build the row pairwise
/// with [`InsertQuery::set`].
#[derive(Debug, Clone)]
pub struct InsertQuery {
    table: String,
    columns: Vec<String>,
    values: Vec<Expr>,
    conflict: Option<ConflictResolution>,
}

impl InsertQuery {
    /// Starts an insert into the given table.
    #[must_use]
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            values: Vec::new(),
            conflict: None,
        }
    }

    /// Adds an `OR <resolution>` clause.
    #[must_use]
    pub const fn on_conflict(mut self, resolution: ConflictResolution) -> Self {
        self.conflict = Some(resolution);
        self
    }

    /// Replaces the column list.
    #[must_use]
    pub fn columns<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Replaces the value list.
    #[must_use]
    pub fn values<I: IntoExpr>(mut self, values: impl IntoIterator<Item = I>) -> Self {
        self.values = values.into_iter().map(IntoExpr::into_expr).collect();
        self
    }

    /// Appends one column/value pair.
    #[must_use]
    pub fn set(mut self, column: impl Into<String>, value: impl IntoExpr) -> Self {
        self.columns.push(column.into());
        self.values.push(value.into_expr());
        self
    }
}

impl SqlQuery for InsertQuery {
    fn sql(&self) -> String {
        let mut sql = String::new();
        let mut parameters = Vec::new();
        render(self, &mut sql, &mut parameters);
        sql
    }

    fn parameters(&self) -> Vec<Value> {
        let mut sql = String::new();
        let mut parameters = Vec::new();
        render(self, &mut sql, &mut parameters);
        parameters
    }
}

fn render(query: &InsertQuery, sql: &mut String, parameters: &mut Vec<Value>) {
    sql.push_str("INSERT");
    if let Some(resolution) = query.conflict {
        sql.push_str(" OR ");
        sql.push_str(resolution.as_sql());
    }
    sql.push_str(" INTO ");
    sql.push_str(&query.table);
    if query.values.is_empty() {
        sql.push_str(" DEFAULT VALUES");
        return;
    }
    if !query.columns.is_empty() {
        sql.push_str(" (");
        sql.push_str(&query.columns.join(", "));
        sql.push(')');
    }
    sql.push_str(" VALUES (");
    for (position, value) in query.values.iter().enumerate() {
        if position > 0 {
            sql.push_str(", ");
        }
        value.render_into(sql, parameters);
    }
    sql.push(')');
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_columns_and_placeholders() {
        let query = InsertQuery::new("users")
            .set("name", "ada")
            .set("age", 36);
        assert_eq!(query.sql(), "INSERT INTO users (name, age) VALUES (?, ?)");
        assert_eq!(
            query.parameters(),
            vec![Value::Text("ada".into()), Value::Integer(36)]
        );
    }

    #[test]
    fn bare_values_omit_column_list() {
        let query = InsertQuery::new("t").values([1, 2]);
        assert_eq!(query.sql(), "INSERT INTO t VALUES (?, ?)");
    }

    #[test]
    fn conflict_clause_renders_after_insert() {
        let query = InsertQuery::new("t")
            .on_conflict(ConflictResolution::Replace)
            .values([1]);
        assert_eq!(query.sql(), "INSERT OR REPLACE INTO t VALUES (?)");
    }

    #[test]
    fn empty_insert_uses_default_values() {
        let query = InsertQuery::new("t");
        assert_eq!(query.sql(), "INSERT INTO t DEFAULT VALUES");
        assert!(query.parameters().is_empty());
    }

    #[test]
    fn null_values_render_inline() {
        let query = InsertQuery::new("t").set("a", None::<i64>).set("b", 2);
        assert_eq!(query.sql(), "INSERT INTO t (a, b) VALUES (NULL, ?)");
        assert_eq!(query.parameters(), vec![Value::Integer(2)]);
    }
}
