//! Write-serialized, read-concurrent connection pool.
//!
//! A [`ConnectionPool`] owns one writer connection and a bounded set of
//! lazily opened read-only reader connections. On-disk pools switch the
//! database to WAL journaling so snapshot reads proceed while a write is
//! in flight. Schema attachments, collations, and scalar functions
//! registered through the pool are replayed onto every reader.

use std::cmp::Ordering as CmpOrdering;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use crate::cache::SchemaCache;
use crate::config::{Config, StorageLocation, TransactionKind};
use crate::connection::{CollationFn, Connection, ScalarFn, TransactionCompletion};
use crate::error::{Error, Result};

static POOL_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Mutations replayed onto readers so their connection-scoped state
/// matches the writer's.
#[derive(Default)]
struct PoolState {
    version: u64,
    attached: Vec<(String, PathBuf)>,
    collations: Vec<(String, Arc<CollationFn>)>,
    functions: Vec<(String, i32, bool, Arc<ScalarFn>)>,
}

struct Reader {
    connection: Connection,
    version: u64,
    // What this reader has registered, so removals replay too.
    collations: Vec<String>,
    functions: Vec<(String, i32)>,
}

#[derive(Default)]
struct ReaderSlots {
    idle: Vec<Reader>,
    open: usize,
}

/// One writer plus up to `max_reader_count` snapshot readers over the
/// same database.
pub struct ConnectionPool {
    target: String,
    config: Config,
    cache: Arc<SchemaCache>,
    writer: Mutex<Connection>,
    state: Mutex<PoolState>,
    readers: Mutex<ReaderSlots>,
    reader_available: Condvar,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("target", &self.target)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ConnectionPool {
    /// Opens a pool at the given location.
    ///
    /// Only on-disk and shared in-memory databases can back a pool; a
    /// private in-memory or temporary database is invisible to reader
    /// connections.
    ///
    /// # Errors
    /// [`Error::Configuration`] for unsupported locations or a zero
    /// reader bound, [`Error::WalActivation`] when an on-disk database
    /// refuses WAL journaling, and open errors from the writer.
    pub fn open(location: &StorageLocation, config: Config) -> Result<Self> {
        if config.max_reader_count == 0 {
            return Err(Error::Configuration(
                "pool needs max_reader_count of at least 1".to_owned(),
            ));
        }
        let (target, on_disk) = match location {
            StorageLocation::OnDisk(path) => (path.to_string_lossy().into_owned(), true),
            StorageLocation::InMemory { shared: true } => {
                let sequence = POOL_SEQUENCE.fetch_add(1, Ordering::Relaxed);
                (
                    format!("file:sqlkit-pool-{sequence}?mode=memory&cache=shared"),
                    false,
                )
            }
            StorageLocation::InMemory { shared: false } => {
                return Err(Error::Configuration(
                    "pool over a private in-memory database; use shared: true".to_owned(),
                ));
            }
            StorageLocation::Temporary => {
                return Err(Error::Configuration(
                    "pool over a temporary database has no path readers can open".to_owned(),
                ));
            }
        };
        let cache = Arc::new(SchemaCache::default());
        let writer = Connection::open_target(&target, config.clone(), Arc::clone(&cache))?;
        if on_disk && !config.readonly {
            activate_wal(&writer, &target)?;
        }
        Ok(Self {
            target,
            config,
            cache,
            writer: Mutex::new(writer),
            state: Mutex::new(PoolState::default()),
            readers: Mutex::new(ReaderSlots::default()),
            reader_available: Condvar::new(),
        })
    }

    /// Opens a pool over a database file, creating it when missing.
    ///
    /// # Errors
    /// Same as [`ConnectionPool::open`].
    pub fn open_path(path: impl AsRef<Path>, config: Config) -> Result<Self> {
        Self::open(&StorageLocation::OnDisk(path.as_ref().to_path_buf()), config)
    }

    fn lock_writer(&self) -> MutexGuard<'_, Connection> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_readers(&self) -> MutexGuard<'_, ReaderSlots> {
        self.readers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `body` on the writer connection; writers are serialized.
    ///
    /// # Errors
    /// Whatever `body` returns.
    pub fn write<T>(&self, body: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        body(&self.lock_writer())
    }

    /// Runs `body` inside a transaction on the writer; the body decides
    /// between commit and rollback.
    ///
    /// # Errors
    /// The body's error, or the begin/commit/rollback failure.
    pub fn in_transaction(
        &self,
        kind: Option<TransactionKind>,
        body: impl FnOnce(&Connection) -> Result<TransactionCompletion>,
    ) -> Result<()> {
        self.lock_writer().transaction(kind, body)
    }

    /// Runs `body` on a reader connection.
    ///
    /// Readers are opened lazily up to the configured bound; under WAL
    /// each reader sees a stable snapshot for the duration of `body`.
    ///
    /// # Errors
    /// [`Error::PoolTimeout`] when every reader stays busy past the
    /// configured wait, reader open errors, and whatever `body` returns.
    pub fn read<T>(&self, body: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let mut reader = self.checkout_reader()?;
        if let Err(err) = self.sync_reader(&mut reader) {
            // Discard the stale reader; a fresh one syncs from scratch.
            self.discard_reader();
            return Err(err);
        }
        let outcome = body(&reader.connection);
        let mut slots = self.lock_readers();
        slots.idle.push(reader);
        drop(slots);
        self.reader_available.notify_one();
        outcome
    }

    fn checkout_reader(&self) -> Result<Reader> {
        let mut slots = self.lock_readers();
        let deadline = self
            .config
            .reader_wait_timeout
            .map(|timeout| Instant::now() + timeout);
        loop {
            if let Some(reader) = slots.idle.pop() {
                return Ok(reader);
            }
            if slots.open < self.config.max_reader_count {
                slots.open += 1;
                drop(slots);
                return match self.open_reader() {
                    Ok(reader) => Ok(reader),
                    Err(err) => {
                        self.discard_reader();
                        Err(err)
                    }
                };
            }
            slots = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(Error::PoolTimeout);
                    }
                    let (guard, timed_out) = self
                        .reader_available
                        .wait_timeout(slots, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner);
                    if timed_out.timed_out() && guard.idle.is_empty() {
                        return Err(Error::PoolTimeout);
                    }
                    guard
                }
                None => self
                    .reader_available
                    .wait(slots)
                    .unwrap_or_else(PoisonError::into_inner),
            };
        }
    }

    fn open_reader(&self) -> Result<Reader> {
        let mut config = self.config.clone();
        config.readonly = true;
        let connection = Connection::open_target(&self.target, config, Arc::clone(&self.cache))?;
        Ok(Reader {
            connection,
            version: 0,
            collations: Vec::new(),
            functions: Vec::new(),
        })
    }

    fn discard_reader(&self) {
        let mut slots = self.lock_readers();
        slots.open = slots.open.saturating_sub(1);
        drop(slots);
        self.reader_available.notify_one();
    }

    /// Brings a reader's attachments, collations, and functions up to the
    /// writer's.
    fn sync_reader(&self, reader: &mut Reader) -> Result<()> {
        let state = self.lock_state();
        if reader.version == state.version {
            return Ok(());
        }
        let current = reader.connection.attached_databases();
        for (name, _) in &current {
            if !state.attached.iter().any(|(n, _)| n == name) {
                reader.connection.detach(name)?;
            }
        }
        for (name, path) in &state.attached {
            reader.connection.attach(path, name)?;
        }
        for name in &reader.collations {
            if !state.collations.iter().any(|(n, _)| n == name) {
                reader.connection.remove_collation(name)?;
            }
        }
        for (name, compare) in &state.collations {
            reader
                .connection
                .add_collation_shared(name, Arc::clone(compare))?;
        }
        for (name, arity) in &reader.functions {
            if !state
                .functions
                .iter()
                .any(|(n, a, _, _)| n == name && a == arity)
            {
                reader.connection.remove_function(name, *arity)?;
            }
        }
        for (name, arity, deterministic, function) in &state.functions {
            reader.connection.add_function_shared(
                name,
                *arity,
                *deterministic,
                Arc::clone(function),
            )?;
        }
        reader.collations = state.collations.iter().map(|(n, _)| n.clone()).collect();
        reader.functions = state
            .functions
            .iter()
            .map(|(n, a, _, _)| (n.clone(), *a))
            .collect();
        reader.version = state.version;
        Ok(())
    }

    /// Attaches a database file under a schema name on the writer; each
    /// reader picks it up before its next use.
    ///
    /// # Errors
    /// [`crate::AttachError::SchemaAlreadyInUse`] when the name is bound
    /// to a different path; execution errors from the engine.
    pub fn attach(&self, path: impl AsRef<Path>, name: &str) -> Result<()> {
        let path = path.as_ref().to_path_buf();
        self.lock_writer().attach(&path, name)?;
        let mut state = self.lock_state();
        if !state.attached.iter().any(|(n, _)| n == name) {
            state.attached.push((name.to_owned(), path));
            state.version += 1;
        }
        Ok(())
    }

    /// Detaches a schema from the writer; each reader drops it before
    /// its next use.
    ///
    /// # Errors
    /// [`crate::AttachError::SchemaNotFound`] when no such schema is
    /// attached; execution errors from the engine.
    pub fn detach(&self, name: &str) -> Result<()> {
        self.lock_writer().detach(name)?;
        let mut state = self.lock_state();
        state.attached.retain(|(n, _)| n != name);
        state.version += 1;
        Ok(())
    }

    /// Registers a collation on the writer and, before their next use,
    /// every reader.
    ///
    /// # Errors
    /// [`Error::Execution`] when the engine rejects the registration.
    pub fn add_collation(
        &self,
        name: &str,
        compare: impl Fn(&str, &str) -> CmpOrdering + Send + Sync + 'static,
    ) -> Result<()> {
        let compare: Arc<CollationFn> = Arc::new(compare);
        self.lock_writer()
            .add_collation_shared(name, Arc::clone(&compare))?;
        let mut state = self.lock_state();
        state.collations.retain(|(n, _)| n != name);
        state.collations.push((name.to_owned(), compare));
        state.version += 1;
        Ok(())
    }

    /// Removes a collation from the writer and, before their next use,
    /// every reader.
    ///
    /// # Errors
    /// [`Error::Execution`] when the engine rejects the removal.
    pub fn remove_collation(&self, name: &str) -> Result<()> {
        self.lock_writer().remove_collation(name)?;
        let mut state = self.lock_state();
        state.collations.retain(|(n, _)| n != name);
        state.version += 1;
        Ok(())
    }

    /// Registers a scalar SQL function on the writer and, before their
    /// next use, every reader. `arity` of `-1` accepts any argument
    /// count.
    ///
    /// # Errors
    /// [`Error::Execution`] when the engine rejects the registration.
    pub fn add_function(
        &self,
        name: &str,
        arity: i32,
        deterministic: bool,
        function: impl Fn(&[crate::Value]) -> Result<crate::Value> + Send + Sync + 'static,
    ) -> Result<()> {
        let function: Arc<ScalarFn> = Arc::new(function);
        self.lock_writer()
            .add_function_shared(name, arity, deterministic, Arc::clone(&function))?;
        let mut state = self.lock_state();
        state
            .functions
            .retain(|(n, a, _, _)| !(n == name && *a == arity));
        state
            .functions
            .push((name.to_owned(), arity, deterministic, function));
        state.version += 1;
        Ok(())
    }

    /// Removes a scalar SQL function from the writer and, before their
    /// next use, every reader.
    ///
    /// # Errors
    /// [`Error::Execution`] when the engine rejects the removal.
    pub fn remove_function(&self, name: &str, arity: i32) -> Result<()> {
        self.lock_writer().remove_function(name, arity)?;
        let mut state = self.lock_state();
        state
            .functions
            .retain(|(n, a, _, _)| !(n == name && *a == arity));
        state.version += 1;
        Ok(())
    }

    /// Drops cached schema information, closes idle readers, and asks the
    /// writer to release engine memory.
    ///
    /// # Errors
    /// Execution errors from the engine.
    pub fn release_memory(&self) -> Result<()> {
        self.cache.clear();
        let mut slots = self.lock_readers();
        let dropped = slots.idle.len();
        slots.idle.clear();
        slots.open = slots.open.saturating_sub(dropped);
        drop(slots);
        self.lock_writer().shrink_memory()
    }
}

/// Switches an on-disk database to WAL journaling with NORMAL
/// synchronization.
fn activate_wal(writer: &Connection, target: &str) -> Result<()> {
    let mode: Option<String> = writer.query_value("PRAGMA journal_mode = WAL", &[])?;
    let mode = mode.unwrap_or_default();
    if !mode.eq_ignore_ascii_case("wal") {
        return Err(Error::WalActivation { mode });
    }
    writer.execute_batch("PRAGMA synchronous = NORMAL")?;
    // A fresh database has no WAL file until something is written; force
    // one into existence so readers can open their snapshots.
    if !Path::new(&format!("{target}-wal")).exists() {
        writer.execute_batch(
            "CREATE TABLE IF NOT EXISTS sqlkit_wal_probe (id INTEGER); \
             DROP TABLE sqlkit_wal_probe",
        )?;
    }
    Ok(())
}
