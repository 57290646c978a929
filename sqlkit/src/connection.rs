//! A single database connection.
//!
//! `Connection` is `Send` but not `Sync`: it is meant to be owned by one
//! execution context at a time. [`crate::ConnectionQueue`] and
//! [`crate::ConnectionPool`] provide that discipline for shared use.

use std::cmp::Ordering as CmpOrdering;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use rusqlite::functions::FunctionFlags;
use rusqlite::hooks::Action;
use rusqlite::OpenFlags;

use crate::cache::SchemaCache;
use crate::config::{BusyMode, Config, StorageLocation, TransactionKind};
use crate::error::{AttachError, Error, Result};
use crate::observer::{
    ChangeKind, ChangeObserver, ObserverHandle, ObserverImpl, ObserverRegistry, RowChange,
    TransactionEnd, TransactionObserver,
};
use crate::query::{ConflictResolution, SqlQuery};
use crate::row::{FromRow, Row};
use crate::statement::Statement;
use crate::value::{FromValue, Value};

static MEMORY_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Collation comparator shared between pooled connections.
pub type CollationFn = dyn Fn(&str, &str) -> CmpOrdering + Send + Sync;

/// Scalar SQL function shared between pooled connections.
pub type ScalarFn = dyn Fn(&[Value]) -> Result<Value> + Send + Sync;

/// How a transaction body asks for the transaction to end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionCompletion {
    /// Commit the transaction.
    Commit,
    /// Roll the transaction back without error.
    Rollback,
}

/// An open database connection.
pub struct Connection {
    conn: rusqlite::Connection,
    cache: Arc<SchemaCache>,
    observer: Arc<ObserverRegistry>,
    config: Config,
    attached: Mutex<HashMap<String, PathBuf>>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Opens a connection at the given location.
    ///
    /// # Errors
    /// [`Error::Execution`] when the engine cannot open the database or a
    /// configuration pragma fails.
    pub fn open(location: &StorageLocation, config: Config) -> Result<Self> {
        let target = match location {
            StorageLocation::InMemory { shared: false } => ":memory:".to_owned(),
            // Each open gets its own shared-cache name; sharing happens
            // when a pool reuses one target, never between independent
            // opens.
            StorageLocation::InMemory { shared: true } => {
                let sequence = MEMORY_SEQUENCE.fetch_add(1, Ordering::Relaxed);
                format!("file:sqlkit-memory-{sequence}?mode=memory&cache=shared")
            }
            StorageLocation::Temporary => String::new(),
            StorageLocation::OnDisk(path) => path.to_string_lossy().into_owned(),
        };
        Self::open_target(&target, config, Arc::new(SchemaCache::default()))
    }

    /// Opens a private in-memory database with default configuration.
    ///
    /// # Errors
    /// [`Error::Execution`] when the engine cannot open the database.
    pub fn open_in_memory() -> Result<Self> {
        Self::open(&StorageLocation::InMemory { shared: false }, Config::default())
    }

    pub(crate) fn open_target(
        target: &str,
        config: Config,
        cache: Arc<SchemaCache>,
    ) -> Result<Self> {
        let mut flags = OpenFlags::SQLITE_OPEN_NO_MUTEX | OpenFlags::SQLITE_OPEN_URI;
        if config.readonly {
            flags |= OpenFlags::SQLITE_OPEN_READ_ONLY;
        } else {
            flags |= OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE;
        }
        let mut conn = rusqlite::Connection::open_with_flags(target, flags)
            .map_err(|e| Error::execution(&e, "open"))?;
        if let Some(trace) = config.trace {
            conn.trace(Some(trace));
        }
        let connection = Self {
            conn,
            cache,
            observer: Arc::new(ObserverRegistry::new()),
            config,
            attached: Mutex::new(HashMap::new()),
        };
        connection.apply_busy_mode()?;
        if connection.config.foreign_keys {
            connection.execute_batch("PRAGMA foreign_keys = ON")?;
        }
        if connection.config.map_columns && !connection.config.readonly {
            connection.ensure_column_map()?;
        }
        Ok(connection)
    }

    fn apply_busy_mode(&self) -> Result<()> {
        match self.config.busy_mode {
            BusyMode::ImmediateError => Ok(()),
            BusyMode::Timeout(duration) => self
                .conn
                .busy_timeout(duration)
                .map_err(|e| Error::execution(&e, "busy_timeout")),
            BusyMode::Callback(callback) => self
                .conn
                .busy_handler(Some(callback))
                .map_err(|e| Error::execution(&e, "busy_handler")),
        }
    }

    pub(crate) fn cache(&self) -> &SchemaCache {
        &self.cache
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    /// Compiles SQL into a prepared statement.
    ///
    /// # Errors
    /// [`Error::Compile`] when the SQL is rejected.
    pub fn prepare(&self, sql: &str) -> Result<Statement<'_>> {
        let stmt = self.conn.prepare(sql).map_err(|e| Error::compile(&e, sql))?;
        Ok(Statement::new(stmt, sql, Arc::clone(&self.observer)))
    }

    /// Executes one or more semicolon-separated statements without
    /// parameters.
    ///
    /// # Errors
    /// [`Error::Execution`] when any statement fails.
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.observer.statement_began();
        let result = self
            .conn
            .execute_batch(sql)
            .map_err(|e| Error::execution(&e, sql));
        self.observer.statement_finished();
        result
    }

    /// Executes a single statement with positional parameters and returns
    /// the number of rows changed.
    ///
    /// # Errors
    /// Compile, bind, or execution errors from the underlying statement.
    pub fn execute(&self, sql: &str, params: &[Value]) -> Result<usize> {
        let mut stmt = self.prepare(sql)?;
        stmt.bind(params)?;
        stmt.run()
    }

    /// Executes a single statement with named parameters.
    ///
    /// # Errors
    /// Compile, bind, or execution errors from the underlying statement.
    pub fn execute_named(&self, sql: &str, params: &[(&str, Value)]) -> Result<usize> {
        let mut stmt = self.prepare(sql)?;
        stmt.bind_named(params)?;
        stmt.run()
    }

    /// Executes the statement once per positional parameter row, reusing
    /// one compiled statement. Returns the total number of rows changed.
    ///
    /// # Errors
    /// Compile, bind, or execution errors from the underlying statement.
    pub fn execute_many(&self, sql: &str, rows: &[Vec<Value>]) -> Result<usize> {
        let mut stmt = self.prepare(sql)?;
        let mut total = 0;
        for row in rows {
            stmt.bind(row)?;
            total += stmt.run()?;
        }
        Ok(total)
    }

    /// Executes the statement once per named parameter row.
    ///
    /// # Errors
    /// Compile, bind, or execution errors from the underlying statement.
    pub fn execute_named_many(&self, sql: &str, rows: &[&[(&str, Value)]]) -> Result<usize> {
        let mut stmt = self.prepare(sql)?;
        let mut total = 0;
        for row in rows {
            stmt.bind_named(row)?;
            total += stmt.run()?;
        }
        Ok(total)
    }

    /// Inserts one row giving a value for every table column in
    /// declaration order. Returns the new row's rowid.
    ///
    /// # Errors
    /// Compile, bind, or execution errors from the underlying statement.
    pub fn insert_into(
        &self,
        table: &str,
        values: &[Value],
        conflict: Option<ConflictResolution>,
    ) -> Result<i64> {
        self.execute(&insert_sql(table, &[], values.len(), conflict), values)?;
        Ok(self.last_insert_rowid())
    }

    /// Inserts one row into the named columns. Returns the new row's
    /// rowid.
    ///
    /// # Errors
    /// Compile, bind, or execution errors from the underlying statement;
    /// [`Error::Bind`] when the value count does not match the columns.
    pub fn insert_into_columns(
        &self,
        table: &str,
        columns: &[&str],
        values: &[Value],
        conflict: Option<ConflictResolution>,
    ) -> Result<i64> {
        self.execute(&insert_sql(table, columns, columns.len(), conflict), values)?;
        Ok(self.last_insert_rowid())
    }

    /// Inserts one row described as column/value pairs. Returns the new
    /// row's rowid.
    ///
    /// # Errors
    /// Compile, bind, or execution errors from the underlying statement.
    pub fn insert_into_map(
        &self,
        table: &str,
        row: &[(&str, Value)],
        conflict: Option<ConflictResolution>,
    ) -> Result<i64> {
        let columns: Vec<&str> = row.iter().map(|(column, _)| *column).collect();
        let values: Vec<Value> = row.iter().map(|(_, value)| value.clone()).collect();
        self.insert_into_columns(table, &columns, &values, conflict)
    }

    /// Inserts many rows of column/value pairs, recompiling the statement
    /// only when the column set changes between consecutive rows. Returns
    /// the number of rows inserted.
    ///
    /// # Errors
    /// Compile, bind, or execution errors from the underlying statement.
    pub fn insert_into_maps(
        &self,
        table: &str,
        rows: &[Vec<(&str, Value)>],
        conflict: Option<ConflictResolution>,
    ) -> Result<usize> {
        let mut total = 0;
        let mut compiled: Option<(Vec<String>, Statement<'_>)> = None;
        for row in rows {
            let values: Vec<Value> = row.iter().map(|(_, value)| value.clone()).collect();
            if let Some((shape, stmt)) = compiled.as_mut() {
                if shape.len() == row.len()
                    && shape.iter().zip(row).all(|(s, (column, _))| s == column)
                {
                    stmt.bind(&values)?;
                    total += stmt.run()?;
                    continue;
                }
            }
            let columns: Vec<&str> = row.iter().map(|(column, _)| *column).collect();
            let mut stmt = self.prepare(&insert_sql(table, &columns, columns.len(), conflict))?;
            stmt.bind(&values)?;
            total += stmt.run()?;
            compiled = Some((
                columns.iter().map(|column| (*column).to_owned()).collect(),
                stmt,
            ));
        }
        Ok(total)
    }

    /// Runs a query and collects every result row.
    ///
    /// # Errors
    /// Compile, bind, or execution errors from the underlying statement.
    pub fn query_rows(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let mut stmt = self.prepare(sql)?;
        stmt.bind(params)?;
        let mut cursor = stmt.cursor();
        let mut rows = Vec::new();
        while let Some(row) = cursor.step()? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Runs a query and returns the first result row, if any.
    ///
    /// # Errors
    /// Compile, bind, or execution errors from the underlying statement.
    pub fn query_row_optional(&self, sql: &str, params: &[Value]) -> Result<Option<Row>> {
        let mut stmt = self.prepare(sql)?;
        stmt.bind(params)?;
        let mut cursor = stmt.cursor();
        cursor.step()
    }

    /// Runs a query and decodes the first column of the first row.
    ///
    /// # Errors
    /// Statement errors, or [`Error::Cast`] when the value does not fit
    /// `T`.
    pub fn query_value<T: FromValue>(&self, sql: &str, params: &[Value]) -> Result<Option<T>> {
        match self.query_row_optional(sql, params)? {
            Some(row) => Ok(Some(row.get_at::<T>(0)?)),
            None => Ok(None),
        }
    }

    /// Runs a query and decodes the first column of every row.
    ///
    /// # Errors
    /// Statement errors, or [`Error::Cast`] when a value does not fit
    /// `T`.
    pub fn query_values<T: FromValue>(&self, sql: &str, params: &[Value]) -> Result<Vec<T>> {
        let mut stmt = self.prepare(sql)?;
        stmt.bind(params)?;
        let mut cursor = stmt.cursor();
        let mut values = Vec::new();
        while let Some(row) = cursor.step()? {
            values.push(row.get_at::<T>(0)?);
        }
        Ok(values)
    }

    /// Runs raw SQL and maps every result row through `T`.
    ///
    /// # Errors
    /// Statement errors, or whatever `T::from_row` reports.
    pub fn fetch_all<T: FromRow>(&self, sql: &str, params: &[Value]) -> Result<Vec<T>> {
        let mut stmt = self.prepare(sql)?;
        stmt.bind(params)?;
        let mut cursor = stmt.cursor();
        let mut records = Vec::new();
        while let Some(row) = cursor.step()? {
            records.push(T::from_row(&row)?);
        }
        Ok(records)
    }

    /// Runs raw SQL and maps the first result row through `T`.
    ///
    /// # Errors
    /// Statement errors, or whatever `T::from_row` reports.
    pub fn fetch_one<T: FromRow>(&self, sql: &str, params: &[Value]) -> Result<Option<T>> {
        match self.query_row_optional(sql, params)? {
            Some(row) => Ok(Some(T::from_row(&row)?)),
            None => Ok(None),
        }
    }

    /// Executes a rendered query (insert, update, delete) and returns the
    /// number of rows changed.
    ///
    /// # Errors
    /// Compile, bind, or execution errors from the underlying statement.
    pub fn run_query(&self, query: &impl SqlQuery) -> Result<usize> {
        self.execute(&query.sql(), &query.parameters())
    }

    /// Runs a select query and maps every result row through `T`.
    ///
    /// # Errors
    /// Statement errors, or whatever `T::from_row` reports.
    pub fn fetch<T: FromRow>(&self, query: &impl SqlQuery) -> Result<Vec<T>> {
        self.fetch_all(&query.sql(), &query.parameters())
    }

    /// Runs a select query and maps the first result row through `T`.
    ///
    /// # Errors
    /// Statement errors, or whatever `T::from_row` reports.
    pub fn fetch_first<T: FromRow>(&self, query: &impl SqlQuery) -> Result<Option<T>> {
        self.fetch_one(&query.sql(), &query.parameters())
    }

    /// Runs `body` inside a transaction of the given kind (or the
    /// configured default).
    ///
    /// The body decides between commit and rollback. When the body fails,
    /// the transaction is rolled back and the body's error is returned; a
    /// rollback failure at that point is logged, not surfaced, so the
    /// original error always wins.
    ///
    /// # Errors
    /// The body's error, or the begin/commit/rollback failure.
    pub fn transaction(
        &self,
        kind: Option<TransactionKind>,
        body: impl FnOnce(&Self) -> Result<TransactionCompletion>,
    ) -> Result<()> {
        let kind = kind.unwrap_or(self.config.default_transaction_kind);
        self.execute_batch(&format!("BEGIN {} TRANSACTION", kind.as_sql()))?;
        match body(self) {
            Ok(TransactionCompletion::Commit) => {
                match self.execute_batch("COMMIT TRANSACTION") {
                    Ok(()) => Ok(()),
                    Err(commit_err) => {
                        self.rollback_quietly("commit failure");
                        Err(commit_err)
                    }
                }
            }
            Ok(TransactionCompletion::Rollback) => self.execute_batch("ROLLBACK TRANSACTION"),
            Err(body_err) => {
                self.rollback_quietly("transaction body failure");
                Err(body_err)
            }
        }
    }

    fn rollback_quietly(&self, context: &str) {
        if !self.is_inside_transaction() {
            return;
        }
        if let Err(err) = self.execute_batch("ROLLBACK TRANSACTION") {
            tracing::warn!(error = %err, context, "rollback failed");
        }
    }

    /// `true` while an explicit transaction is open.
    #[must_use]
    pub fn is_inside_transaction(&self) -> bool {
        !self.conn.is_autocommit()
    }

    /// Rowid of the most recent successful insert.
    #[must_use]
    pub fn last_insert_rowid(&self) -> i64 {
        self.conn.last_insert_rowid()
    }

    /// Rows changed by the most recent statement.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn changes(&self) -> usize {
        self.conn.changes() as usize
    }

    /// Total rows changed since the connection opened.
    ///
    /// # Errors
    /// [`Error::Execution`] when the engine query fails.
    pub fn total_changes(&self) -> Result<usize> {
        let total: Option<i64> = self.query_value("SELECT total_changes()", &[])?;
        Ok(usize::try_from(total.unwrap_or(0)).unwrap_or(0))
    }

    /// Attaches a database file under a schema name.
    ///
    /// Attaching the same path under the same name again is a no-op.
    ///
    /// # Errors
    /// [`AttachError::SchemaAlreadyInUse`] when the name is bound to a
    /// different path; execution errors from the engine.
    pub fn attach(&self, path: impl AsRef<Path>, name: &str) -> Result<()> {
        let path = path.as_ref().to_path_buf();
        let mut attached = self
            .attached
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = attached.get(name) {
            if *existing == path {
                return Ok(());
            }
            return Err(AttachError::SchemaAlreadyInUse(name.to_owned()).into());
        }
        self.execute(
            &format!("ATTACH DATABASE ? AS {name}"),
            &[Value::Text(path.to_string_lossy().into_owned())],
        )?;
        attached.insert(name.to_owned(), path);
        Ok(())
    }

    /// Detaches a previously attached database.
    ///
    /// # Errors
    /// [`AttachError::SchemaNotFound`] when the name is unknown;
    /// execution errors from the engine.
    pub fn detach(&self, name: &str) -> Result<()> {
        let mut attached = self
            .attached
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !attached.contains_key(name) {
            return Err(AttachError::SchemaNotFound(name.to_owned()).into());
        }
        self.execute_batch(&format!("DETACH DATABASE {name}"))?;
        attached.remove(name);
        Ok(())
    }

    /// Schema names and file paths of every attached database.
    #[must_use]
    pub fn attached_databases(&self) -> Vec<(String, PathBuf)> {
        let attached = self
            .attached
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut list: Vec<_> = attached
            .iter()
            .map(|(name, path)| (name.clone(), path.clone()))
            .collect();
        list.sort();
        list
    }

    /// Registers (or replaces) a collation under the given name.
    ///
    /// # Errors
    /// [`Error::Execution`] when the engine rejects the registration.
    pub fn add_collation(
        &self,
        name: &str,
        compare: impl Fn(&str, &str) -> CmpOrdering + Send + Sync + 'static,
    ) -> Result<()> {
        self.add_collation_shared(name, Arc::new(compare))
    }

    pub(crate) fn add_collation_shared(&self, name: &str, compare: Arc<CollationFn>) -> Result<()> {
        let shared = AssertUnwindSafe(compare);
        self.conn
            .create_collation(name, move |a, b| {
                // Capture the whole wrapper, not the Arc inside it.
                let compare = &shared;
                (compare.0)(a, b)
            })
            .map_err(|e| Error::execution(&e, "create_collation"))
    }

    /// Removes a collation.
    ///
    /// # Errors
    /// [`Error::Execution`] when the engine rejects the removal.
    pub fn remove_collation(&self, name: &str) -> Result<()> {
        self.conn
            .remove_collation(name)
            .map_err(|e| Error::execution(&e, "remove_collation"))
    }

    /// Registers (or replaces) a scalar SQL function. `arity` of `-1`
    /// accepts any argument count.
    ///
    /// # Errors
    /// [`Error::Execution`] when the engine rejects the registration.
    pub fn add_function(
        &self,
        name: &str,
        arity: i32,
        deterministic: bool,
        function: impl Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    ) -> Result<()> {
        self.add_function_shared(name, arity, deterministic, Arc::new(function))
    }

    pub(crate) fn add_function_shared(
        &self,
        name: &str,
        arity: i32,
        deterministic: bool,
        function: Arc<ScalarFn>,
    ) -> Result<()> {
        let mut flags = FunctionFlags::SQLITE_UTF8;
        if deterministic {
            flags |= FunctionFlags::SQLITE_DETERMINISTIC;
        }
        let shared = AssertUnwindSafe(function);
        self.conn
            .create_scalar_function(name, arity, flags, move |ctx| {
                // Capture the whole wrapper, not the Arc inside it.
                let function = &shared;
                let mut args = Vec::with_capacity(ctx.len());
                for position in 0..ctx.len() {
                    args.push(Value::from_engine(ctx.get_raw(position)));
                }
                (function.0)(&args)
                    .map(Value::into_engine)
                    .map_err(|e| rusqlite::Error::UserFunctionError(Box::new(e)))
            })
            .map_err(|e| Error::execution(&e, "create_scalar_function"))
    }

    /// Removes a scalar SQL function registered with the given name and
    /// arity.
    ///
    /// # Errors
    /// [`Error::Execution`] when the engine rejects the removal.
    pub fn remove_function(&self, name: &str, arity: i32) -> Result<()> {
        self.conn
            .remove_function(name, arity)
            .map_err(|e| Error::execution(&e, "remove_function"))
    }

    /// Registers a table-scoped observer; engine hooks are installed when
    /// the first observer arrives.
    pub fn add_change_observer(&self, observer: ChangeObserver) -> ObserverHandle {
        self.register_observer(ObserverImpl::Filtered(observer))
    }

    /// Registers a custom transaction observer.
    pub fn add_transaction_observer(
        &self,
        observer: Box<dyn TransactionObserver>,
    ) -> ObserverHandle {
        self.register_observer(ObserverImpl::Custom(observer))
    }

    fn register_observer(&self, observer: ObserverImpl) -> ObserverHandle {
        let (handle, first) = self.observer.insert(observer);
        if first {
            self.install_hooks();
        }
        handle
    }

    /// Removes an observer; engine hooks are dropped with the last one.
    pub fn remove_observer(&self, handle: ObserverHandle) {
        if self.observer.remove(handle) {
            self.uninstall_hooks();
        }
    }

    fn install_hooks(&self) {
        tracing::debug!("installing change observation hooks");
        let registry = Arc::clone(&self.observer);
        self.conn.update_hook(Some(
            move |action: Action, schema: &str, table: &str, rowid: i64| {
                let kind = match action {
                    Action::SQLITE_INSERT => ChangeKind::Insert,
                    Action::SQLITE_UPDATE => ChangeKind::Update,
                    Action::SQLITE_DELETE => ChangeKind::Delete,
                    _ => return,
                };
                registry.record_change(&RowChange {
                    kind,
                    schema: schema.to_owned(),
                    table: table.to_owned(),
                    rowid,
                });
            },
        ));
        let registry = Arc::clone(&self.observer);
        self.conn.commit_hook(Some(move || {
            registry.transaction_ended(TransactionEnd::Commit);
            false
        }));
        let registry = Arc::clone(&self.observer);
        self.conn.rollback_hook(Some(move || {
            registry.transaction_ended(TransactionEnd::Rollback);
        }));
    }

    fn uninstall_hooks(&self) {
        tracing::debug!("removing change observation hooks");
        self.conn.update_hook(None::<fn(Action, &str, &str, i64)>);
        self.conn.commit_hook(None::<fn() -> bool>);
        self.conn.rollback_hook(None::<fn()>);
    }

    /// Asks the engine to release as much memory as it can for this
    /// connection.
    ///
    /// # Errors
    /// [`Error::Execution`] when the pragma fails.
    pub fn shrink_memory(&self) -> Result<()> {
        self.execute_batch("PRAGMA shrink_memory")
    }
}

fn insert_sql(
    table: &str,
    columns: &[&str],
    value_count: usize,
    conflict: Option<ConflictResolution>,
) -> String {
    let mut sql = String::from("INSERT");
    if let Some(resolution) = conflict {
        sql.push_str(" OR ");
        sql.push_str(resolution.as_sql());
    }
    sql.push_str(" INTO ");
    sql.push_str(table);
    if !columns.is_empty() {
        sql.push_str(" (");
        sql.push_str(&columns.join(", "));
        sql.push(')');
    }
    if value_count == 0 {
        sql.push_str(" DEFAULT VALUES");
        return sql;
    }
    sql.push_str(" VALUES (");
    for position in 0..value_count {
        if position > 0 {
            sql.push_str(", ");
        }
        sql.push('?');
    }
    sql.push(')');
    sql
}
