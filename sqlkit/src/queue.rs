//! Serialized single-connection access.
//!
//! A [`ConnectionQueue`] owns exactly one connection behind a mutex, so
//! every closure passed to it runs with exclusive access. This is the
//! simplest safe way to share a database between threads; use a
//! [`crate::pool::ConnectionPool`] when concurrent reads matter.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::config::{Config, StorageLocation, TransactionKind};
use crate::connection::{Connection, TransactionCompletion};
use crate::error::Result;

/// A mutex-guarded connection; all access is serialized.
#[derive(Debug)]
pub struct ConnectionQueue {
    connection: Mutex<Connection>,
}

impl ConnectionQueue {
    /// Opens a queue over a new connection at the given location.
    ///
    /// # Errors
    /// Open and configuration errors from the underlying connection.
    pub fn open(location: &StorageLocation, config: Config) -> Result<Self> {
        Ok(Self {
            connection: Mutex::new(Connection::open(location, config)?),
        })
    }

    /// Opens a queue over a private in-memory database.
    ///
    /// # Errors
    /// Open errors from the underlying connection.
    pub fn open_in_memory() -> Result<Self> {
        Self::open(&StorageLocation::InMemory { shared: false }, Config::default())
    }

    /// Opens a queue over a database file, creating it when missing.
    ///
    /// # Errors
    /// Open and configuration errors from the underlying connection.
    pub fn open_path(path: impl AsRef<Path>, config: Config) -> Result<Self> {
        Self::open(&StorageLocation::OnDisk(path.as_ref().to_path_buf()), config)
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.connection.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `body` with exclusive read-write access.
    ///
    /// # Errors
    /// Whatever `body` returns.
    pub fn write<T>(&self, body: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        body(&self.lock())
    }

    /// Runs `body` with the connection forced read-only for its
    /// duration.
    ///
    /// Writes attempted inside `body` fail with a read-only execution
    /// error. When both the body and the restore fail, the body's error
    /// wins.
    ///
    /// # Errors
    /// The body's error, or the failure to toggle read-only mode.
    pub fn read<T>(&self, body: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let connection = self.lock();
        connection.execute_batch("PRAGMA query_only = 1")?;
        let outcome = body(&connection);
        let restored = connection.execute_batch("PRAGMA query_only = 0");
        match (outcome, restored) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(restore_err)) => Err(restore_err),
            (Err(body_err), _) => Err(body_err),
        }
    }

    /// Runs `body` inside a transaction with exclusive access; the body
    /// decides between commit and rollback.
    ///
    /// # Errors
    /// The body's error, or the begin/commit/rollback failure.
    pub fn in_transaction(
        &self,
        kind: Option<TransactionKind>,
        body: impl FnOnce(&Connection) -> Result<TransactionCompletion>,
    ) -> Result<()> {
        self.lock().transaction(kind, body)
    }

    /// Frees as much engine memory as practical and drops cached schema
    /// information.
    ///
    /// # Errors
    /// Execution errors from the engine.
    pub fn release_memory(&self) -> Result<()> {
        let connection = self.lock();
        connection.cache().clear();
        connection.shrink_memory()
    }
}
