//! Error types for the `SQLite` access layer.

use crate::value::Value;

/// Result type for database operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Category of an execution failure, derived from the primary engine
/// result code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ExecutionErrorKind {
    /// The database file is locked by another connection (`SQLITE_BUSY`).
    Busy,
    /// A table is locked within this connection (`SQLITE_LOCKED`).
    Locked,
    /// A constraint (unique, not-null, foreign-key, check) was violated.
    Constraint,
    /// A disk I/O error occurred.
    DiskIo,
    /// The database image is malformed.
    Corrupt,
    /// A write was attempted on a read-only database.
    ReadOnly,
    /// A value could not be coerced to the required storage class.
    TypeMismatch,
    /// The database schema changed under a prepared statement.
    SchemaChanged,
    /// The engine API was used incorrectly.
    Misuse,
    /// Any other engine failure.
    Other,
}

impl ExecutionErrorKind {
    /// Maps a primary `SQLite` result code to a category.
    pub(crate) const fn from_primary(code: i32) -> Self {
        match code {
            5 => Self::Busy,
            6 => Self::Locked,
            8 => Self::ReadOnly,
            10 => Self::DiskIo,
            11 => Self::Corrupt,
            17 => Self::SchemaChanged,
            19 => Self::Constraint,
            20 => Self::TypeMismatch,
            21 => Self::Misuse,
            _ => Self::Other,
        }
    }
}

/// Reason a bind operation was rejected before reaching the engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum BindError {
    /// The statement expects a different number of parameters than were
    /// supplied.
    #[error("statement expects {expected} parameter(s), got {actual}")]
    ParameterCountMismatch {
        /// Number of parameter slots in the compiled statement.
        expected: usize,
        /// Number of values supplied by the caller.
        actual: usize,
    },
    /// A named parameter does not exist in the statement.
    #[error("no parameter named `{0}` in statement")]
    UnknownParameterName(String),
}

/// Failure while attaching or detaching an auxiliary database.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum AttachError {
    /// The schema name is already bound to a different database file.
    #[error("schema name `{0}` is already in use")]
    SchemaAlreadyInUse(String),
    /// No attached database uses the given schema name.
    #[error("no attached database named `{0}`")]
    SchemaNotFound(String),
}

/// Error returned by database operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// SQL text failed to compile into a prepared statement.
    #[error("failed to compile `{sql}`: {message} (code {code})")]
    Compile {
        /// The SQL text that was rejected.
        sql: String,
        /// Extended engine result code.
        code: i32,
        /// Engine error message.
        message: String,
    },

    /// Parameter binding was rejected.
    #[error("bind failed for `{sql}`: {source}")]
    Bind {
        /// The SQL text of the statement being bound.
        sql: String,
        /// The specific bind failure.
        source: BindError,
    },

    /// Statement execution failed inside the engine.
    #[error("execution failed for `{sql}`: {message} (code {code})")]
    Execution {
        /// Failure category.
        kind: ExecutionErrorKind,
        /// Extended engine result code.
        code: i32,
        /// Engine error message.
        message: String,
        /// The SQL text that was executing.
        sql: String,
    },

    /// Attach/detach bookkeeping failure.
    #[error(transparent)]
    Attach(#[from] AttachError),

    /// A column value could not be converted to the requested Rust type.
    #[error("cannot convert {value} to {target}")]
    Cast {
        /// Description of the stored value.
        value: String,
        /// Name of the requested Rust type.
        target: &'static str,
    },

    /// A row addressed by name was not present.
    #[error("no column named `{0}` in row")]
    ColumnNotFound(String),

    /// A record addressed by its primary key does not exist, or the table
    /// declares no primary key to address it by.
    #[error("record not found in table `{table}`")]
    RecordNotFound {
        /// Table the record was looked up in.
        table: String,
    },

    /// Waiting for a pooled reader connection timed out.
    #[error("timed out waiting for a reader connection")]
    PoolTimeout,

    /// The engine refused to switch the database into WAL journaling.
    #[error("could not activate WAL journaling, engine reports mode `{mode}`")]
    WalActivation {
        /// Journal mode reported by the engine.
        mode: String,
    },

    /// The requested configuration is unusable.
    #[error("invalid configuration: {0}")]
    Configuration(String),
}

impl Error {
    /// Builds a compile error from an engine failure.
    pub(crate) fn compile(err: &rusqlite::Error, sql: &str) -> Self {
        let (code, message) = engine_parts(err);
        Self::Compile {
            sql: sql.to_owned(),
            code,
            message,
        }
    }

    /// Builds an execution error from an engine failure.
    pub(crate) fn execution(err: &rusqlite::Error, sql: &str) -> Self {
        let (code, message) = engine_parts(err);
        Self::Execution {
            kind: ExecutionErrorKind::from_primary(code & 0xff),
            code,
            message,
            sql: sql.to_owned(),
        }
    }

    /// Builds a bind error for the given statement.
    pub(crate) fn bind(source: BindError, sql: &str) -> Self {
        Self::Bind {
            sql: sql.to_owned(),
            source,
        }
    }

    /// Builds a cast error from a stored value and a target type name.
    pub(crate) fn cast(value: &Value, target: &'static str) -> Self {
        Self::Cast {
            value: value.describe(),
            target,
        }
    }
}

/// Extracts the extended result code and message from an engine error.
fn engine_parts(err: &rusqlite::Error) -> (i32, String) {
    match err {
        rusqlite::Error::SqliteFailure(e, msg) => {
            let message = msg
                .clone()
                .unwrap_or_else(|| e.to_string());
            (e.extended_code, message)
        }
        other => (1, other.to_string()),
    }
}
