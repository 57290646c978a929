//! Typed SQL construction: expression tree, statement builders, table
//! definition DSL, and record persistence.

pub mod delete;
pub mod expression;
pub mod insert;
pub mod record;
pub mod select;
pub mod table;
pub mod update;

use crate::value::Value;

/// A builder that renders to one SQL statement plus its bound parameters.
///
/// Rendering and parameter collection walk the same tree in the same
/// order, so placeholder positions and parameter positions always agree.
pub trait SqlQuery {
    /// The rendered SQL text.
    fn sql(&self) -> String;
    /// Parameters in placeholder order.
    fn parameters(&self) -> Vec<Value>;
}

/// Conflict resolution clause for writes and constraint declarations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictResolution {
    /// Abort and roll back the enclosing transaction.
    Rollback,
    /// Abort the statement (the engine default).
    Abort,
    /// Fail the statement but keep earlier changes.
    Fail,
    /// Skip the conflicting row.
    Ignore,
    /// Replace the conflicting row.
    Replace,
}

impl ConflictResolution {
    pub(crate) const fn as_sql(self) -> &'static str {
        match self {
            Self::Rollback => "ROLLBACK",
            Self::Abort => "ABORT",
            Self::Fail => "FAIL",
            Self::Ignore => "IGNORE",
            Self::Replace => "REPLACE",
        }
    }
}
