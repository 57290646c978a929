//! SELECT statement builder.

use crate::query::expression::{Expr, IntoExpr};
use crate::query::SqlQuery;
use crate::value::Value;

/// How a join combines its table with the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    /// `INNER JOIN`.
    Inner,
    /// `LEFT JOIN`.
    Left,
    /// `CROSS JOIN`.
    Cross,
}

impl JoinKind {
    const fn as_sql(self) -> &'static str {
        match self {
            Self::Inner => "INNER JOIN",
            Self::Left => "LEFT JOIN",
            Self::Cross => "CROSS JOIN",
        }
    }
}

#[derive(Debug, Clone)]
struct Join {
    kind: JoinKind,
    table: String,
    constraint: Option<Expr>,
}

/// A composable SELECT statement.
///
/// Rendering order (and therefore parameter order) is: select list,
/// joins, filters, having, ordering, limit, offset.
#[derive(Debug, Clone)]
pub struct SelectQuery {
    source: String,
    selection: Vec<Expr>,
    distinct: bool,
    joins: Vec<Join>,
    filters: Vec<Expr>,
    group_by: Vec<Expr>,
    having: Vec<Expr>,
    order_by: Vec<Expr>,
    limit: Option<i64>,
    offset: Option<i64>,
}

impl SelectQuery {
    /// Starts a query over a table (or aliased table expression). With no
    /// explicit selection the query selects `*`.
    #[must_use]
    pub fn from(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            selection: Vec::new(),
            distinct: false,
            joins: Vec::new(),
            filters: Vec::new(),
            group_by: Vec::new(),
            having: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    /// Replaces the select list.
    #[must_use]
    pub fn select<I: IntoExpr>(mut self, selection: impl IntoIterator<Item = I>) -> Self {
        self.selection = selection.into_iter().map(IntoExpr::into_expr).collect();
        self
    }

    /// Adds `DISTINCT`.
    #[must_use]
    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    /// Adds a join with an `ON` constraint.
    #[must_use]
    pub fn join(mut self, kind: JoinKind, table: impl Into<String>, on: Expr) -> Self {
        self.joins.push(Join {
            kind,
            table: table.into(),
            constraint: Some(on),
        });
        self
    }

    /// Adds a cross join without a constraint.
    #[must_use]
    pub fn cross_join(mut self, table: impl Into<String>) -> Self {
        self.joins.push(Join {
            kind: JoinKind::Cross,
            table: table.into(),
            constraint: None,
        });
        self
    }

    /// Adds a filter; multiple filters are AND-joined.
    #[must_use]
    pub fn filter(mut self, predicate: Expr) -> Self {
        self.filters.push(predicate);
        self
    }

    /// Adds grouping terms.
    #[must_use]
    pub fn group_by<I: IntoExpr>(mut self, terms: impl IntoIterator<Item = I>) -> Self {
        self.group_by
            .extend(terms.into_iter().map(IntoExpr::into_expr));
        self
    }

    /// Adds a HAVING predicate; multiple predicates are AND-joined.
    #[must_use]
    pub fn having(mut self, predicate: Expr) -> Self {
        self.having.push(predicate);
        self
    }

    /// Adds ordering terms.
    #[must_use]
    pub fn order_by<I: IntoExpr>(mut self, terms: impl IntoIterator<Item = I>) -> Self {
        self.order_by
            .extend(terms.into_iter().map(IntoExpr::into_expr));
        self
    }

    /// Caps the number of result rows.
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

    pub(crate) fn render_into(&self, sql: &mut String, parameters: &mut Vec<Value>) {
        sql.push_str("SELECT ");
        if self.distinct {
            sql.push_str("DISTINCT ");
        }
        if self.selection.is_empty() {
            sql.push('*');
        } else {
            for (position, term) in self.selection.iter().enumerate() {
                if position > 0 {
                    sql.push_str(", ");
                }
                term.render_into(sql, parameters);
            }
        }
        sql.push_str(" FROM ");
        sql.push_str(&self.source);
        for join in &self.joins {
            sql.push(' ');
            sql.push_str(join.kind.as_sql());
            sql.push(' ');
            sql.push_str(&join.table);
            if let Some(constraint) = &join.constraint {
                sql.push_str(" ON ");
                constraint.render_into(sql, parameters);
            }
        }
        render_predicates(" WHERE ", &self.filters, sql, parameters);
        if !self.group_by.is_empty() {
            sql.push_str(" GROUP BY ");
            for (position, term) in self.group_by.iter().enumerate() {
                if position > 0 {
                    sql.push_str(", ");
                }
                term.render_into(sql, parameters);
            }
        }
        render_predicates(" HAVING ", &self.having, sql, parameters);
        if !self.order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            for (position, term) in self.order_by.iter().enumerate() {
                if position > 0 {
                    sql.push_str(", ");
                }
                term.render_into(sql, parameters);
            }
        }
        if let Some(limit) = self.limit {
            sql.push_str(" LIMIT ?");
            parameters.push(Value::Integer(limit));
            if let Some(offset) = self.offset {
                sql.push_str(" OFFSET ?");
                parameters.push(Value::Integer(offset));
            }
        }
    }
}

pub(crate) fn render_predicates(
    keyword: &str,
    predicates: &[Expr],
    sql: &mut String,
    parameters: &mut Vec<Value>,
) {
    if predicates.is_empty() {
        return;
    }
    sql.push_str(keyword);
    for (position, predicate) in predicates.iter().enumerate() {
        if position > 0 {
            sql.push_str(" AND ");
        }
        predicate.render_into(sql, parameters);
    }
}

impl SqlQuery for SelectQuery {
    fn sql(&self) -> String {
        let mut sql = String::new();
        let mut parameters = Vec::new();
        self.render_into(&mut sql, &mut parameters);
        sql
    }

    fn parameters(&self) -> Vec<Value> {
        let mut sql = String::new();
        let mut parameters = Vec::new();
        self.render_into(&mut sql, &mut parameters);
        parameters
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::expression::{col, count_all};

    #[test]
    fn default_selection_is_star() {
        let query = SelectQuery::from("t")
            .filter(col("age").ge(18))
            .order_by([col("name").asc()]);
        assert_eq!(query.sql(), "SELECT * FROM t WHERE (age >= ?) ORDER BY name ASC");
        assert_eq!(query.parameters(), vec![Value::Integer(18)]);
    }

    #[test]
    fn full_clause_order() {
        let query = SelectQuery::from("orders")
            .select([col("customer"), count_all().aliased("n")])
            .join(JoinKind::Inner, "customers", col("orders.customer").eq(col("customers.id")))
            .filter(col("total").gt(10))
            .group_by([col("customer")])
            .having(count_all().gt(1))
            .order_by([col("n").desc()])
            .limit(5)
            .offset(10);
        assert_eq!(
            query.sql(),
            "SELECT customer, COUNT(*) AS n FROM orders \
             INNER JOIN customers ON (orders.customer = customers.id) \
             WHERE (total > ?) GROUP BY customer HAVING (COUNT(*) > ?) \
             ORDER BY n DESC LIMIT ? OFFSET ?"
        );
        assert_eq!(
            query.parameters(),
            vec![
                Value::Integer(10),
                Value::Integer(1),
                Value::Integer(5),
                Value::Integer(10),
            ]
        );
    }

    #[test]
    fn offset_without_limit_is_not_rendered() {
        let query = SelectQuery::from("t").offset(3);
        assert_eq!(query.sql(), "SELECT * FROM t");
        assert!(query.parameters().is_empty());
    }

    #[test]
    fn distinct_and_multiple_filters() {
        let query = SelectQuery::from("t")
            .distinct()
            .filter(col("a").eq(1))
            .filter(col("b").eq(2));
        assert_eq!(
            query.sql(),
            "SELECT DISTINCT * FROM t WHERE (a = ?) AND (b = ?)"
        );
    }

    #[test]
    fn subquery_membership_binds_in_order() {
        let inner = SelectQuery::from("banned").select([col("id")]);
        let query = SelectQuery::from("users")
            .filter(col("age").ge(21))
            .filter(col("id").not_in_select(inner));
        assert_eq!(
            query.sql(),
            "SELECT * FROM users WHERE (age >= ?) AND id NOT IN (SELECT id FROM banned)"
        );
        assert_eq!(query.parameters(), vec![Value::Integer(21)]);
    }
}
