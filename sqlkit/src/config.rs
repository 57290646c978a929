//! Connection, queue, and pool configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Where the database bytes live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageLocation {
    /// Private in-memory database, or a shared-cache one that several
    /// connections of the same process can open together. Pools require
    /// `shared: true` so readers can see the writer's data.
    InMemory {
        /// Share the page cache across connections of this process.
        shared: bool,
    },
    /// Anonymous temporary file managed by the engine, removed on close.
    Temporary,
    /// Regular database file at the given path.
    OnDisk(PathBuf),
}

/// Transaction isolation flavor, matching the engine's BEGIN variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionKind {
    /// Take locks lazily on first use.
    #[default]
    Deferred,
    /// Take the reserved write lock immediately.
    Immediate,
    /// Take the exclusive lock immediately.
    Exclusive,
}

impl TransactionKind {
    pub(crate) const fn as_sql(self) -> &'static str {
        match self {
            Self::Deferred => "DEFERRED",
            Self::Immediate => "IMMEDIATE",
            Self::Exclusive => "EXCLUSIVE",
        }
    }
}

/// How the connection reacts when the engine reports contention.
#[derive(Debug, Clone, Copy)]
pub enum BusyMode {
    /// Fail immediately with a busy execution error.
    ImmediateError,
    /// Retry internally until the duration elapses, then fail.
    Timeout(Duration),
    /// Consult the callback with the retry attempt count; returning
    /// `false` gives up and surfaces the busy error.
    Callback(fn(i32) -> bool),
}

/// Connection configuration, consumed at open time.
#[derive(Debug, Clone)]
pub struct Config {
    /// Open the database read-only.
    pub readonly: bool,
    /// Enforce foreign-key constraints.
    pub foreign_keys: bool,
    /// Maintain the declared column-type side table and feed the raw-SQL
    /// type inference from it.
    pub map_columns: bool,
    /// Contention strategy.
    pub busy_mode: BusyMode,
    /// Transaction kind used when none is given explicitly.
    pub default_transaction_kind: TransactionKind,
    /// Per-statement SQL trace sink, receiving expanded SQL text.
    pub trace: Option<fn(&str)>,
    /// Upper bound on pooled reader connections.
    pub max_reader_count: usize,
    /// How long a pool read waits for a free reader before failing with
    /// a timeout; `None` waits indefinitely.
    pub reader_wait_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            readonly: false,
            foreign_keys: false,
            map_columns: false,
            busy_mode: BusyMode::ImmediateError,
            default_transaction_kind: TransactionKind::Deferred,
            trace: None,
            max_reader_count: 5,
            reader_wait_timeout: None,
        }
    }
}
