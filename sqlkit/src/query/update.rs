//! UPDATE statement builder.

use crate::query::expression::{Expr, IntoExpr};
use crate::query::select::render_predicates;
use crate::query::{ConflictResolution, SqlQuery};
use crate::value::Value;

/// An UPDATE statement.
///
/// Assignments keep insertion order, so SET parameter positions are
/// deterministic. `ORDER BY`/`OFFSET` render only together with a limit.
#[derive(Debug, Clone)]
pub struct UpdateQuery {
    table: String,
    conflict: Option<ConflictResolution>,
    assignments: Vec<(String, Expr)>,
    raw_set: Option<(String, Vec<Value>)>,
    filters: Vec<Expr>,
    order_by: Vec<Expr>,
    limit: Option<i64>,
    offset: Option<i64>,
}

impl UpdateQuery {
    /// Starts an update of the given table.
    #[must_use]
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            conflict: None,
            assignments: Vec::new(),
            raw_set: None,
            filters: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    /// Adds an `OR <resolution>` clause.
    #[must_use]
    pub const fn on_conflict(mut self, resolution: ConflictResolution) -> Self {
        self.conflict = Some(resolution);
        self
    }

    /// Appends one SET assignment.
    #[must_use]
    pub fn set(mut self, column: impl Into<String>, value: impl IntoExpr) -> Self {
        self.assignments.push((column.into(), value.into_expr()));
        self
    }

    /// Appends a raw SET fragment with its own placeholders, rendered
    /// after the structured assignments.
    #[must_use]
    pub fn set_sql(mut self, fragment: impl Into<String>, parameters: Vec<Value>) -> Self {
        self.raw_set = Some((fragment.into(), parameters));
        self
    }

    /// Adds a filter; multiple filters are AND-joined.
    #[must_use]
    pub fn filter(mut self, predicate: Expr) -> Self {
        self.filters.push(predicate);
        self
    }

    /// Adds ordering terms, effective only together with a limit.
    #[must_use]
    pub fn order_by<I: IntoExpr>(mut self, terms: impl IntoIterator<Item = I>) -> Self {
        self.order_by
            .extend(terms.into_iter().map(IntoExpr::into_expr));
        self
    }

    /// Caps the number of updated rows. Requires an engine built with
    /// update-limit support.
    #[must_use]
    pub const fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skips leading rows; only rendered together with a limit.
    #[must_use]
    pub const fn offset(mut self, offset: i64) -> Self {
        self.offset = Some(offset);
        self
    }

    fn render(&self, sql: &mut String, parameters: &mut Vec<Value>) {
        sql.push_str("UPDATE ");
        if let Some(resolution) = self.conflict {
            sql.push_str("OR ");
            sql.push_str(resolution.as_sql());
            sql.push(' ');
        }
        sql.push_str(&self.table);
        sql.push_str(" SET ");
        for (position, (column, value)) in self.assignments.iter().enumerate() {
            if position > 0 {
                sql.push_str(", ");
            }
            sql.push_str(column);
            sql.push_str(" = ");
            value.render_into(sql, parameters);
        }
        if let Some((fragment, fragment_params)) = &self.raw_set {
            if !self.assignments.is_empty() {
                sql.push_str(", ");
            }
            sql.push_str(fragment);
            parameters.extend(fragment_params.iter().cloned());
        }
        render_predicates(" WHERE ", &self.filters, sql, parameters);
        render_row_window(&self.order_by, self.limit, self.offset, sql, parameters);
    }
}

impl SqlQuery for UpdateQuery {
    fn sql(&self) -> String {
        let mut sql = String::new();
        let mut parameters = Vec::new();
        self.render(&mut sql, &mut parameters);
        sql
    }

    fn parameters(&self) -> Vec<Value> {
        let mut sql = String::new();
        let mut parameters = Vec::new();
        self.render(&mut sql, &mut parameters);
        parameters
    }
}

/// Shared `ORDER BY ... LIMIT ? [OFFSET ?]` suffix for row-limited
/// updates and deletes. Nothing renders without a limit.
pub(crate) fn render_row_window(
    order_by: &[Expr],
    limit: Option<i64>,
    offset: Option<i64>,
    sql: &mut String,
    parameters: &mut Vec<Value>,
) {
    let Some(limit) = limit else {
        return;
    };
    if !order_by.is_empty() {
        sql.push_str(" ORDER BY ");
        for (position, term) in order_by.iter().enumerate() {
            if position > 0 {
                sql.push_str(", ");
            }
            term.render_into(sql, parameters);
        }
    }
    sql.push_str(" LIMIT ?");
    parameters.push(Value::Integer(limit));
    if let Some(offset) = offset {
        sql.push_str(" OFFSET ?");
        parameters.push(Value::Integer(offset));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::expression::col;

    #[test]
    fn assignments_keep_insertion_order() {
        let query = UpdateQuery::new("users")
            .set("name", "ada")
            .set("age", 37)
            .filter(col("id").eq(1));
        assert_eq!(
            query.sql(),
            "UPDATE users SET name = ?, age = ? WHERE (id = ?)"
        );
        assert_eq!(
            query.parameters(),
            vec![
                Value::Text("ada".into()),
                Value::Integer(37),
                Value::Integer(1),
            ]
        );
    }

    #[test]
    fn conflict_clause_renders_before_table() {
        let query = UpdateQuery::new("t")
            .on_conflict(ConflictResolution::Ignore)
            .set("a", 1);
        assert_eq!(query.sql(), "UPDATE OR IGNORE t SET a = ?");
    }

    #[test]
    fn raw_set_renders_after_assignments() {
        let query = UpdateQuery::new("t")
            .set("a", 1)
            .set_sql("b = b + ?", vec![Value::Integer(5)])
            .filter(col("c").eq(0));
        assert_eq!(query.sql(), "UPDATE t SET a = ?, b = b + ? WHERE (c = ?)");
        assert_eq!(
            query.parameters(),
            vec![Value::Integer(1), Value::Integer(5), Value::Integer(0)]
        );
    }

    #[test]
    fn order_by_only_renders_with_limit() {
        let without_limit = UpdateQuery::new("t").set("a", 1).order_by([col("a").desc()]);
        assert_eq!(without_limit.sql(), "UPDATE t SET a = ?");

        let with_limit = UpdateQuery::new("t")
            .set("a", 1)
            .order_by([col("a").desc()])
            .limit(2)
            .offset(4);
        assert_eq!(
            with_limit.sql(),
            "UPDATE t SET a = ? ORDER BY a DESC LIMIT ? OFFSET ?"
        );
        assert_eq!(
            with_limit.parameters(),
            vec![Value::Integer(1), Value::Integer(2), Value::Integer(4)]
        );
    }
}
