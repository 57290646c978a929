//! Embedded relational database access over `SQLite`.
//!
//! The crate layers three things over `rusqlite`:
//!
//! * **Connections** ([`Connection`], [`ConnectionQueue`],
//!   [`ConnectionPool`]): open, configure, and share database handles.
//!   The queue serializes everything behind one connection; the pool
//!   keeps one writer plus WAL snapshot readers.
//! * **Typed SQL** ([`query`]): composable SELECT / INSERT / UPDATE /
//!   DELETE builders, an expression tree with automatic parameter
//!   binding, a table-definition DSL, and record persistence keyed by
//!   primary key.
//! * **Rows and values** ([`Row`], [`Value`]): loss-aware conversions
//!   between Rust types and the engine's five storage classes, plus
//!   name-based row access.
//!
//! Transaction-scoped change observation ([`observer`]) and schema
//! attachment round the API out.

pub mod config;
pub mod connection;
pub mod error;
pub mod observer;
pub mod pool;
pub mod query;
pub mod queue;
pub mod row;
pub mod schema;
pub mod statement;
pub mod value;

mod cache;

pub use config::{BusyMode, Config, StorageLocation, TransactionKind};
pub use connection::{CollationFn, Connection, ScalarFn, TransactionCompletion};
pub use error::{AttachError, BindError, Error, ExecutionErrorKind, Result};
pub use observer::{
    ChangeKind, ChangeObserver, ObserverHandle, RowChange, TransactionChanges,
    TransactionObserver,
};
pub use pool::ConnectionPool;
pub use query::delete::DeleteQuery;
pub use query::expression::{col, count_all, lit, raw_sql, Expr, IntoExpr};
pub use query::insert::InsertQuery;
pub use query::record::{Record, RecordEncoder, TableRecord};
pub use query::select::{JoinKind, SelectQuery};
pub use query::table::{
    ColumnDefinition, CreateTableOptions, ForeignKeyAction, TableDefinition,
};
pub use query::update::UpdateQuery;
pub use query::{ConflictResolution, SqlQuery};
pub use queue::ConnectionQueue;
pub use row::{FromRow, Row};
pub use schema::{ColumnInfo, ColumnType};
pub use statement::{Cursor, Statement};
pub use value::{FromValue, ToValue, Value};
