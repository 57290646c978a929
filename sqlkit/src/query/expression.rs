//! SQL expression tree.
//!
//! Expressions render themselves into SQL text while appending their bound
//! parameters to a shared list, in one left-to-right walk. Literal values
//! always render as `?` placeholders, except NULL which renders inline so
//! that `IS NULL` comparisons come out the way the engine expects.

use crate::query::select::SelectQuery;
use crate::query::SqlQuery;
use crate::schema::ColumnType;
use crate::value::{ToValue, Value};

/// Binary operator of a two-operand expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// Logical AND.
    And,
    /// Logical OR.
    Or,
    /// Equality; renders `IS` against NULL.
    Eq,
    /// Inequality; renders `IS NOT` against NULL.
    Ne,
    /// Greater-than.
    Gt,
    /// Greater-or-equal.
    Ge,
    /// Less-than.
    Lt,
    /// Less-or-equal.
    Le,
    /// Addition.
    Add,
    /// Subtraction.
    Sub,
    /// Multiplication.
    Mul,
    /// Division.
    Div,
    /// Pattern match.
    Like,
}

impl BinaryOp {
    const fn as_sql(self) -> &'static str {
        match self {
            Self::And => "AND",
            Self::Or => "OR",
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Like => "LIKE",
        }
    }
}

/// Built-in SQL function wrapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlFunction {
    /// `AVG(x)`.
    Avg,
    /// `COUNT(x)`.
    Count,
    /// `COUNT(DISTINCT x)`.
    CountDistinct,
    /// `MIN(x)`.
    Min,
    /// `MAX(x)`.
    Max,
    /// `SUM(x)`.
    Sum,
    /// `LENGTH(x)`.
    Length,
    /// `ABS(x)`.
    Abs,
    /// `UPPER(x)`.
    Upper,
    /// `LOWER(x)`.
    Lower,
}

/// Sort direction of an ordering term.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDirection {
    /// `ASC`.
    Ascending,
    /// `DESC`.
    Descending,
}

/// One node of the expression tree.
#[derive(Debug, Clone)]
pub enum Expr {
    /// A column reference, possibly qualified (`t.name`).
    Column(String),
    /// A literal value, bound as a parameter (NULL renders inline).
    Literal(Value),
    /// Raw SQL with its own positional parameters.
    Raw {
        /// SQL fragment, with `?` placeholders.
        sql: String,
        /// Values for the fragment's placeholders, in order.
        parameters: Vec<Value>,
    },
    /// Parenthesized two-operand expression.
    Binary {
        /// The operator.
        op: BinaryOp,
        /// Left operand.
        lhs: Box<Expr>,
        /// Right operand.
        rhs: Box<Expr>,
    },
    /// Function application.
    Function {
        /// The function.
        function: SqlFunction,
        /// Its single argument.
        argument: Box<Expr>,
    },
    /// Searched CASE expression.
    Case {
        /// `WHEN condition THEN value` branches, in order.
        branches: Vec<(Expr, Expr)>,
        /// Optional `ELSE` value.
        fallback: Option<Box<Expr>>,
    },
    /// Closed range test, `x BETWEEN low AND high`.
    Between {
        /// Tested expression.
        argument: Box<Expr>,
        /// Lower bound (inclusive).
        low: Box<Expr>,
        /// Upper bound (inclusive).
        high: Box<Expr>,
        /// Negate the test.
        negated: bool,
    },
    /// Half-open range test, `low <= x < high`.
    HalfOpenRange {
        /// Tested expression.
        argument: Box<Expr>,
        /// Lower bound (inclusive).
        low: Box<Expr>,
        /// Upper bound (exclusive).
        high: Box<Expr>,
        /// Negate the test.
        negated: bool,
    },
    /// Membership in an explicit list.
    InList {
        /// Tested expression.
        argument: Box<Expr>,
        /// Candidate values.
        candidates: Vec<Expr>,
        /// Negate the test.
        negated: bool,
    },
    /// Membership in a subquery result.
    InSelect {
        /// Tested expression.
        argument: Box<Expr>,
        /// The subquery.
        query: Box<SelectQuery>,
        /// Negate the test.
        negated: bool,
    },
    /// NULL check.
    NullCheck {
        /// Tested expression.
        argument: Box<Expr>,
        /// `IS NOT NULL` instead of `IS NULL`.
        negated: bool,
    },
    /// Expression with an explicit collation.
    Collated {
        /// The expression.
        argument: Box<Expr>,
        /// Collation name.
        collation: String,
    },
    /// `CAST(x AS type)`.
    Cast {
        /// The expression.
        argument: Box<Expr>,
        /// Target type.
        target: ColumnType,
    },
    /// `x AS alias`, for select lists.
    Aliased {
        /// The expression.
        argument: Box<Expr>,
        /// Result column name.
        alias: String,
    },
    /// Ordering term for ORDER BY lists.
    Ordered {
        /// The expression.
        argument: Box<Expr>,
        /// Sort direction.
        direction: OrderDirection,
    },
}

/// Column reference.
#[must_use]
pub fn col(name: impl Into<String>) -> Expr {
    Expr::Column(name.into())
}

/// Literal value, bound as a parameter.
#[must_use]
pub fn lit(value: impl ToValue) -> Expr {
    Expr::Literal(value.to_value())
}

/// Raw SQL fragment with positional parameters.
#[must_use]
pub fn raw_sql(sql: impl Into<String>, parameters: Vec<Value>) -> Expr {
    Expr::Raw {
        sql: sql.into(),
        parameters,
    }
}

/// `COUNT(*)`.
#[must_use]
pub fn count_all() -> Expr {
    Expr::Raw {
        sql: "COUNT(*)".to_owned(),
        parameters: Vec::new(),
    }
}

macro_rules! aggregate_fn {
    ($(#[$doc:meta] $name:ident => $function:ident),* $(,)?) => {
        $(
            #[$doc]
            #[must_use]
            pub fn $name(argument: impl IntoExpr) -> Expr {
                Expr::Function {
                    function: SqlFunction::$function,
                    argument: Box::new(argument.into_expr()),
                }
            }
        )*
    };
}

aggregate_fn! {
    /// `AVG(x)`.
    avg => Avg,
    /// `COUNT(x)`.
    count => Count,
    /// `COUNT(DISTINCT x)`.
    count_distinct => CountDistinct,
    /// `MIN(x)`.
    min => Min,
    /// `MAX(x)`.
    max => Max,
    /// `SUM(x)`.
    sum => Sum,
    /// `LENGTH(x)`.
    length => Length,
    /// `ABS(x)`.
    abs => Abs,
    /// `UPPER(x)`.
    upper => Upper,
    /// `LOWER(x)`.
    lower => Lower,
}

/// Conversion into an expression node. Implemented for [`Expr`] itself and
/// for every value type with a [`ToValue`] encoding.
pub trait IntoExpr {
    /// Builds the expression node.
    fn into_expr(self) -> Expr;
}

impl IntoExpr for Expr {
    fn into_expr(self) -> Expr {
        self
    }
}

impl IntoExpr for &Expr {
    fn into_expr(self) -> Expr {
        self.clone()
    }
}

macro_rules! impl_into_expr {
    ($($t:ty),* $(,)?) => {
        $(
            impl IntoExpr for $t {
                fn into_expr(self) -> Expr {
                    Expr::Literal(self.to_value())
                }
            }
        )*
    };
}

impl_into_expr!(
    bool,
    i8,
    i16,
    i32,
    i64,
    u8,
    u16,
    u32,
    u64,
    f32,
    f64,
    String,
    &str,
    Vec<u8>,
    &[u8],
    std::time::SystemTime,
    url::Url,
    Value,
);

impl<T> IntoExpr for Option<T>
where
    T: ToValue,
{
    fn into_expr(self) -> Expr {
        Expr::Literal(self.to_value())
    }
}

macro_rules! binary_method {
    ($(#[$doc:meta] $name:ident => $op:ident),* $(,)?) => {
        $(
            #[$doc]
            #[must_use]
            pub fn $name(self, rhs: impl IntoExpr) -> Self {
                Self::Binary {
                    op: BinaryOp::$op,
                    lhs: Box::new(self),
                    rhs: Box::new(rhs.into_expr()),
                }
            }
        )*
    };
}

impl Expr {
    binary_method! {
        /// Equality; a NULL right side renders as `IS NULL`.
        eq => Eq,
        /// Inequality; a NULL right side renders as `IS NOT NULL`.
        ne => Ne,
        /// Greater-than.
        gt => Gt,
        /// Greater-or-equal.
        ge => Ge,
        /// Less-than.
        lt => Lt,
        /// Less-or-equal.
        le => Le,
        /// Logical AND.
        and => And,
        /// Logical OR.
        or => Or,
        /// Addition.
        add => Add,
        /// Subtraction.
        sub => Sub,
        /// Multiplication.
        mul => Mul,
        /// Division.
        div => Div,
        /// Pattern match.
        like => Like,
    }

    /// Closed range test, `self BETWEEN low AND high`.
    #[must_use]
    pub fn between(self, low: impl IntoExpr, high: impl IntoExpr) -> Self {
        Self::Between {
            argument: Box::new(self),
            low: Box::new(low.into_expr()),
            high: Box::new(high.into_expr()),
            negated: false,
        }
    }

    /// Negated closed range test.
    #[must_use]
    pub fn not_between(self, low: impl IntoExpr, high: impl IntoExpr) -> Self {
        Self::Between {
            argument: Box::new(self),
            low: Box::new(low.into_expr()),
            high: Box::new(high.into_expr()),
            negated: true,
        }
    }

    /// Half-open range test, `low <= self AND self < high`.
    #[must_use]
    pub fn in_range(self, low: impl IntoExpr, high: impl IntoExpr) -> Self {
        Self::HalfOpenRange {
            argument: Box::new(self),
            low: Box::new(low.into_expr()),
            high: Box::new(high.into_expr()),
            negated: false,
        }
    }

    /// Negated half-open range test.
    #[must_use]
    pub fn not_in_range(self, low: impl IntoExpr, high: impl IntoExpr) -> Self {
        Self::HalfOpenRange {
            argument: Box::new(self),
            low: Box::new(low.into_expr()),
            high: Box::new(high.into_expr()),
            negated: true,
        }
    }

    /// Membership test against explicit candidates.
    #[must_use]
    pub fn in_list<I: IntoExpr>(self, candidates: impl IntoIterator<Item = I>) -> Self {
        Self::InList {
            argument: Box::new(self),
            candidates: candidates.into_iter().map(IntoExpr::into_expr).collect(),
            negated: false,
        }
    }

    /// Negated membership test.
    #[must_use]
    pub fn not_in_list<I: IntoExpr>(self, candidates: impl IntoIterator<Item = I>) -> Self {
        Self::InList {
            argument: Box::new(self),
            candidates: candidates.into_iter().map(IntoExpr::into_expr).collect(),
            negated: true,
        }
    }

    /// Membership test against a subquery.
    #[must_use]
    pub fn in_select(self, query: SelectQuery) -> Self {
        Self::InSelect {
            argument: Box::new(self),
            query: Box::new(query),
            negated: false,
        }
    }

    /// Negated membership test against a subquery.
    #[must_use]
    pub fn not_in_select(self, query: SelectQuery) -> Self {
        Self::InSelect {
            argument: Box::new(self),
            query: Box::new(query),
            negated: true,
        }
    }

    /// `self IS NULL`.
    #[must_use]
    pub fn is_null(self) -> Self {
        Self::NullCheck {
            argument: Box::new(self),
            negated: false,
        }
    }

    /// `self IS NOT NULL`.
    #[must_use]
    pub fn is_not_null(self) -> Self {
        Self::NullCheck {
            argument: Box::new(self),
            negated: true,
        }
    }

    /// Applies a collation.
    #[must_use]
    pub fn collate(self, collation: impl Into<String>) -> Self {
        Self::Collated {
            argument: Box::new(self),
            collation: collation.into(),
        }
    }

    /// `CAST(self AS type)`.
    #[must_use]
    pub fn cast(self, target: ColumnType) -> Self {
        Self::Cast {
            argument: Box::new(self),
            target,
        }
    }

    /// Names the result column.
    #[must_use]
    pub fn aliased(self, alias: impl Into<String>) -> Self {
        Self::Aliased {
            argument: Box::new(self),
            alias: alias.into(),
        }
    }

    /// Ascending ordering term.
    #[must_use]
    pub fn asc(self) -> Self {
        Self::Ordered {
            argument: Box::new(self),
            direction: OrderDirection::Ascending,
        }
    }

    /// Descending ordering term.
    #[must_use]
    pub fn desc(self) -> Self {
        Self::Ordered {
            argument: Box::new(self),
            direction: OrderDirection::Descending,
        }
    }

    /// Renders the expression and its parameters.
    #[must_use]
    pub fn render(&self) -> (String, Vec<Value>) {
        let mut sql = String::new();
        let mut parameters = Vec::new();
        self.render_into(&mut sql, &mut parameters);
        (sql, parameters)
    }

    pub(crate) fn render_into(&self, sql: &mut String, parameters: &mut Vec<Value>) {
        self.render_with(sql, &mut Sink::Bind(parameters));
    }

    /// Renders with literals inlined, for contexts where the engine does
    /// not accept bound parameters (column defaults, check clauses).
    pub(crate) fn render_inline(&self, sql: &mut String) {
        self.render_with(sql, &mut Sink::Inline);
    }

    fn render_with(&self, sql: &mut String, sink: &mut Sink<'_>) {
        match self {
            Self::Column(name) => sql.push_str(name),
            Self::Literal(value) => render_literal(value, sql, sink),
            Self::Raw {
                sql: fragment,
                parameters,
            } => match sink {
                Sink::Bind(out) => {
                    sql.push_str(fragment);
                    out.extend(parameters.iter().cloned());
                }
                Sink::Inline => inline_raw(fragment, parameters, sql),
            },
            Self::Binary { op, lhs, rhs } => {
                let null_rhs =
                    matches!(**rhs, Self::Literal(Value::Null)) && matches!(op, BinaryOp::Eq | BinaryOp::Ne);
                sql.push('(');
                lhs.render_with(sql, sink);
                if null_rhs {
                    sql.push_str(if *op == BinaryOp::Eq {
                        " IS NULL"
                    } else {
                        " IS NOT NULL"
                    });
                } else {
                    sql.push(' ');
                    sql.push_str(op.as_sql());
                    sql.push(' ');
                    rhs.render_with(sql, sink);
                }
                sql.push(')');
            }
            Self::Function { function, argument } => {
                let (prefix, suffix) = match function {
                    SqlFunction::Avg => ("AVG(", ")"),
                    SqlFunction::Count => ("COUNT(", ")"),
                    SqlFunction::CountDistinct => ("COUNT(DISTINCT ", ")"),
                    SqlFunction::Min => ("MIN(", ")"),
                    SqlFunction::Max => ("MAX(", ")"),
                    SqlFunction::Sum => ("SUM(", ")"),
                    SqlFunction::Length => ("LENGTH(", ")"),
                    SqlFunction::Abs => ("ABS(", ")"),
                    SqlFunction::Upper => ("UPPER(", ")"),
                    SqlFunction::Lower => ("LOWER(", ")"),
                };
                sql.push_str(prefix);
                argument.render_with(sql, sink);
                sql.push_str(suffix);
            }
            Self::Case { branches, fallback } => {
                sql.push_str("CASE");
                for (condition, value) in branches {
                    sql.push_str(" WHEN ");
                    condition.render_with(sql, sink);
                    sql.push_str(" THEN ");
                    value.render_with(sql, sink);
                }
                if let Some(fallback) = fallback {
                    sql.push_str(" ELSE ");
                    fallback.render_with(sql, sink);
                }
                sql.push_str(" END");
            }
            Self::Between {
                argument,
                low,
                high,
                negated,
            } => {
                argument.render_with(sql, sink);
                sql.push_str(if *negated { " NOT BETWEEN " } else { " BETWEEN " });
                low.render_with(sql, sink);
                sql.push_str(" AND ");
                high.render_with(sql, sink);
            }
            Self::HalfOpenRange {
                argument,
                low,
                high,
                negated,
            } => {
                sql.push('(');
                argument.render_with(sql, sink);
                sql.push_str(if *negated { " < " } else { " >= " });
                low.render_with(sql, sink);
                sql.push_str(if *negated { " OR " } else { " AND " });
                argument.render_with(sql, sink);
                sql.push_str(if *negated { " >= " } else { " < " });
                high.render_with(sql, sink);
                sql.push(')');
            }
            Self::InList {
                argument,
                candidates,
                negated,
            } => {
                if candidates.is_empty() {
                    // Membership in the empty set is constant.
                    sql.push_str(if *negated { "1" } else { "0" });
                    return;
                }
                argument.render_with(sql, sink);
                sql.push_str(if *negated { " NOT IN (" } else { " IN (" });
                for (position, candidate) in candidates.iter().enumerate() {
                    if position > 0 {
                        sql.push_str(", ");
                    }
                    candidate.render_with(sql, sink);
                }
                sql.push(')');
            }
            Self::InSelect {
                argument,
                query,
                negated,
            } => {
                argument.render_with(sql, sink);
                sql.push_str(if *negated { " NOT IN (" } else { " IN (" });
                match sink {
                    Sink::Bind(out) => query.render_into(sql, out),
                    Sink::Inline => {
                        let (sub_sql, sub_params) = (query.sql(), query.parameters());
                        inline_raw(&sub_sql, &sub_params, sql);
                    }
                }
                sql.push(')');
            }
            Self::NullCheck { argument, negated } => {
                sql.push('(');
                argument.render_with(sql, sink);
                sql.push_str(if *negated { " IS NOT NULL" } else { " IS NULL" });
                sql.push(')');
            }
            Self::Collated {
                argument,
                collation,
            } => {
                argument.render_with(sql, sink);
                sql.push_str(" COLLATE ");
                sql.push_str(collation);
            }
            Self::Cast { argument, target } => {
                sql.push_str("CAST(");
                argument.render_with(sql, sink);
                sql.push_str(" AS ");
                sql.push_str(target.as_sql());
                sql.push(')');
            }
            Self::Aliased { argument, alias } => {
                argument.render_with(sql, sink);
                sql.push_str(" AS ");
                sql.push_str(alias);
            }
            Self::Ordered {
                argument,
                direction,
            } => {
                argument.render_with(sql, sink);
                sql.push_str(match direction {
                    OrderDirection::Ascending => " ASC",
                    OrderDirection::Descending => " DESC",
                });
            }
        }
    }
}

enum Sink<'a> {
    Bind(&'a mut Vec<Value>),
    Inline,
}

fn render_literal(value: &Value, sql: &mut String, sink: &mut Sink<'_>) {
    match (value, sink) {
        // NULL never binds; `IS NULL` needs it inline.
        (Value::Null, _) => sql.push_str("NULL"),
        (value, Sink::Bind(out)) => {
            sql.push('?');
            out.push(value.clone());
        }
        (value, Sink::Inline) => sql.push_str(&value.to_literal_sql()),
    }
}

/// Replaces each `?` of a raw fragment with the matching literal.
fn inline_raw(fragment: &str, parameters: &[Value], sql: &mut String) {
    let mut next = parameters.iter();
    for ch in fragment.chars() {
        if ch == '?' {
            match next.next() {
                Some(value) => sql.push_str(&value.to_literal_sql()),
                None => sql.push(ch),
            }
        } else {
            sql.push(ch);
        }
    }
}
