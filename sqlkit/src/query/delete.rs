//! DELETE statement builder.

use crate::query::expression::{Expr, IntoExpr};
use crate::query::select::render_predicates;
use crate::query::update::render_row_window;
use crate::query::SqlQuery;
use crate::value::Value;

/// A DELETE statement.
///
/// `ORDER BY`/`OFFSET` render only together with a limit, independent of
/// whether any filters are present.
#[derive(Debug, Clone)]
pub struct DeleteQuery {
    table: String,
    filters: Vec<Expr>,
    order_by: Vec<Expr>,
    limit: Option<i64>,
    offset: Option<i64>,
}

impl DeleteQuery {
    /// Starts a delete from the given table.
    #[must_use]
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            filters: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
        }
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

    /// Caps the number of deleted rows. Requires an engine built with
    /// delete-limit support.
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
        sql.push_str("DELETE FROM ");
        sql.push_str(&self.table);
        render_predicates(" WHERE ", &self.filters, sql, parameters);
        render_row_window(&self.order_by, self.limit, self.offset, sql, parameters);
    }
}

impl SqlQuery for DeleteQuery {
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
