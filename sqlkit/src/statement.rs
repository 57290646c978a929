//! Prepared statements and row cursors.

use std::sync::Arc;

use crate::error::{BindError, Error, Result};
use crate::observer::ObserverRegistry;
use crate::row::{ColumnIndex, Row};
use crate::value::Value;

/// A compiled SQL statement, borrowed from its connection.
///
/// The lifetime ties the statement to the connection that prepared it, so
/// a statement can never outlive (or be used across) its connection.
pub struct Statement<'conn> {
    stmt: rusqlite::Statement<'conn>,
    sql: String,
    observer: Arc<ObserverRegistry>,
}

impl std::fmt::Debug for Statement<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Statement").field("sql", &self.sql).finish()
    }
}

impl<'conn> Statement<'conn> {
    pub(crate) fn new(
        stmt: rusqlite::Statement<'conn>,
        sql: &str,
        observer: Arc<ObserverRegistry>,
    ) -> Self {
        Self {
            stmt,
            sql: sql.to_owned(),
            observer,
        }
    }

    /// The SQL text this statement was compiled from.
    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Number of result columns.
    #[must_use]
    pub fn column_count(&self) -> usize {
        self.stmt.column_count()
    }

    /// Result column names, in order.
    #[must_use]
    pub fn column_names(&self) -> Vec<String> {
        self.stmt
            .column_names()
            .into_iter()
            .map(ToOwned::to_owned)
            .collect()
    }

    /// Binds positional parameters, replacing any previous bindings.
    ///
    /// # Errors
    /// [`Error::Bind`] when the value count differs from the statement's
    /// parameter count.
    pub fn bind(&mut self, params: &[Value]) -> Result<()> {
        let expected = self.stmt.parameter_count();
        if expected != params.len() {
            return Err(Error::bind(
                BindError::ParameterCountMismatch {
                    expected,
                    actual: params.len(),
                },
                &self.sql,
            ));
        }
        for (position, value) in params.iter().enumerate() {
            self.stmt
                .raw_bind_parameter(position + 1, value.to_engine())
                .map_err(|e| Error::execution(&e, &self.sql))?;
        }
        Ok(())
    }

    /// Binds named parameters. Names may be given with or without their
    /// `:`/`@`/`$` prefix.
    ///
    /// # Errors
    /// [`Error::Bind`] when a name does not occur in the statement or the
    /// pair count differs from the statement's parameter count.
    pub fn bind_named(&mut self, params: &[(&str, Value)]) -> Result<()> {
        let expected = self.stmt.parameter_count();
        if expected != params.len() {
            return Err(Error::bind(
                BindError::ParameterCountMismatch {
                    expected,
                    actual: params.len(),
                },
                &self.sql,
            ));
        }
        for (name, value) in params {
            let position = self.named_position(name)?;
            self.stmt
                .raw_bind_parameter(position, value.to_engine())
                .map_err(|e| Error::execution(&e, &self.sql))?;
        }
        Ok(())
    }

    fn named_position(&self, name: &str) -> Result<usize> {
        let candidates = if name.starts_with([':', '@', '$']) {
            vec![name.to_owned()]
        } else {
            vec![format!(":{name}"), format!("@{name}"), format!("${name}")]
        };
        for candidate in &candidates {
            if let Some(position) = self
                .stmt
                .parameter_index(candidate)
                .map_err(|e| Error::execution(&e, &self.sql))?
            {
                return Ok(position);
            }
        }
        Err(Error::bind(
            BindError::UnknownParameterName(name.to_owned()),
            &self.sql,
        ))
    }

    /// Executes the statement to completion and returns the number of
    /// rows changed (zero for statements that return rows).
    ///
    /// # Errors
    /// [`Error::Execution`] when the engine rejects the statement.
    pub fn run(&mut self) -> Result<usize> {
        self.observer.statement_began();
        let result = self.run_inner();
        self.observer.statement_finished();
        result
    }

    fn run_inner(&mut self) -> Result<usize> {
        if self.stmt.column_count() == 0 {
            return self
                .stmt
                .raw_execute()
                .map_err(|e| Error::execution(&e, &self.sql));
        }
        let mut rows = self.stmt.raw_query();
        while rows
            .next()
            .map_err(|e| Error::execution(&e, &self.sql))?
            .is_some()
        {}
        Ok(0)
    }

    /// Starts iterating result rows.
    pub fn cursor(&mut self) -> Cursor<'_> {
        let index = Arc::new(ColumnIndex::new(self.column_names()));
        self.observer.statement_began();
        Cursor {
            rows: self.stmt.raw_query(),
            sql: &self.sql,
            index,
            observer: Arc::clone(&self.observer),
            finished: false,
        }
    }
}

/// Iterator-style access to the result rows of one statement execution.
///
/// Each returned [`Row`] is a detached snapshot and stays valid after the
/// cursor advances or is dropped.
pub struct Cursor<'s> {
    rows: rusqlite::Rows<'s>,
    sql: &'s str,
    index: Arc<ColumnIndex>,
    observer: Arc<ObserverRegistry>,
    finished: bool,
}

impl Cursor<'_> {
    /// Advances to the next row; `None` when the statement is done.
    ///
    /// # Errors
    /// [`Error::Execution`] when stepping fails inside the engine.
    pub fn step(&mut self) -> Result<Option<Row>> {
        match self.rows.next() {
            Ok(Some(raw)) => {
                let mut values = Vec::with_capacity(self.index.len());
                for position in 0..self.index.len() {
                    let value = raw
                        .get_ref(position)
                        .map_err(|e| Error::execution(&e, self.sql))?;
                    values.push(Value::from_engine(value));
                }
                Ok(Some(Row::new(Arc::clone(&self.index), values)))
            }
            Ok(None) => {
                self.mark_finished();
                Ok(None)
            }
            Err(e) => {
                let mapped = Error::execution(&e, self.sql);
                self.mark_finished();
                Err(mapped)
            }
        }
    }

    fn mark_finished(&mut self) {
        if !self.finished {
            self.finished = true;
            self.observer.statement_finished();
        }
    }
}

impl Drop for Cursor<'_> {
    fn drop(&mut self) {
        self.mark_finished();
    }
}
