//! Transaction change observation.
//!
//! Observers see individual row changes as they happen and an aggregated
//! change set when the enclosing transaction commits or rolls back.
//! Commit/rollback notifications are deferred until the statement that
//! ended the transaction has finished executing, and a transaction that
//! changed no rows notifies nobody.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

/// What happened to a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// A row was inserted.
    Insert,
    /// A row was updated.
    Update,
    /// A row was deleted.
    Delete,
}

/// One row-level change event.
#[derive(Debug, Clone)]
pub struct RowChange {
    /// What happened.
    pub kind: ChangeKind,
    /// Schema name (`main`, `temp`, or an attached schema).
    pub schema: String,
    /// Table name.
    pub table: String,
    /// Rowid of the affected row.
    pub rowid: i64,
}

/// Row identifiers changed within one transaction, grouped by table.
#[derive(Debug, Clone, Default)]
pub struct TransactionChanges {
    inserted: BTreeMap<String, Vec<i64>>,
    updated: BTreeMap<String, Vec<i64>>,
    deleted: BTreeMap<String, Vec<i64>>,
}

impl TransactionChanges {
    fn record(&mut self, change: &RowChange) {
        let bucket = match change.kind {
            ChangeKind::Insert => &mut self.inserted,
            ChangeKind::Update => &mut self.updated,
            ChangeKind::Delete => &mut self.deleted,
        };
        bucket
            .entry(change.table.clone())
            .or_default()
            .push(change.rowid);
    }

    /// Rowids inserted into the given table.
    #[must_use]
    pub fn inserted(&self, table: &str) -> &[i64] {
        self.inserted.get(table).map_or(&[], Vec::as_slice)
    }

    /// Rowids updated in the given table.
    #[must_use]
    pub fn updated(&self, table: &str) -> &[i64] {
        self.updated.get(table).map_or(&[], Vec::as_slice)
    }

    /// Rowids deleted from the given table.
    #[must_use]
    pub fn deleted(&self, table: &str) -> &[i64] {
        self.deleted.get(table).map_or(&[], Vec::as_slice)
    }

    /// `true` when no change was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }
}

type ChangeFn = Box<dyn Fn(&RowChange) + Send>;
type CommitFn = Box<dyn Fn(&TransactionChanges) + Send>;
type RollbackFn = Box<dyn Fn() + Send>;

/// Table-scoped observer with optional callbacks.
///
/// Filters by schema, table, and optionally a subset of change kinds.
/// Callbacks run on the thread executing the statement; they must not
/// register or remove observers on the same connection.
pub struct ChangeObserver {
    schema: String,
    table: String,
    kinds: Option<Vec<ChangeKind>>,
    on_change: Option<ChangeFn>,
    on_commit: Option<CommitFn>,
    on_rollback: Option<RollbackFn>,
}

impl std::fmt::Debug for ChangeObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeObserver")
            .field("schema", &self.schema)
            .field("table", &self.table)
            .field("kinds", &self.kinds)
            .finish_non_exhaustive()
    }
}

impl ChangeObserver {
    /// Observer for a table in the `main` schema, watching every change
    /// kind.
    #[must_use]
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            schema: "main".to_owned(),
            table: table.into(),
            kinds: None,
            on_change: None,
            on_commit: None,
            on_rollback: None,
        }
    }

    /// Watches a different schema (for attached databases).
    #[must_use]
    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    /// Restricts observation to the given change kinds.
    #[must_use]
    pub fn kinds(mut self, kinds: &[ChangeKind]) -> Self {
        self.kinds = Some(kinds.to_vec());
        self
    }

    /// Called for every matching row change, while the statement runs.
    #[must_use]
    pub fn on_change(mut self, f: impl Fn(&RowChange) + Send + 'static) -> Self {
        self.on_change = Some(Box::new(f));
        self
    }

    /// Called once per committed transaction that touched the table.
    #[must_use]
    pub fn on_commit(mut self, f: impl Fn(&TransactionChanges) + Send + 'static) -> Self {
        self.on_commit = Some(Box::new(f));
        self
    }

    /// Called once per rolled-back transaction that touched the table.
    #[must_use]
    pub fn on_rollback(mut self, f: impl Fn() + Send + 'static) -> Self {
        self.on_rollback = Some(Box::new(f));
        self
    }

    fn observes(&self, change: &RowChange) -> bool {
        if !self.schema.eq_ignore_ascii_case(&change.schema)
            || !self.table.eq_ignore_ascii_case(&change.table)
        {
            return false;
        }
        self.kinds
            .as_ref()
            .map_or(true, |kinds| kinds.contains(&change.kind))
    }
}

/// Full-control observer trait for callers that need custom filtering or
/// stateful aggregation.
pub trait TransactionObserver: Send {
    /// Whether this observer is interested in the change. Only matching
    /// changes are aggregated for the commit notification.
    fn observes(&self, change: &RowChange) -> bool;

    /// A matching row change happened. Default: ignore.
    fn change(&self, change: &RowChange) {
        let _ = change;
    }

    /// The transaction committed; `changes` holds the matching rows.
    fn commit(&self, changes: &TransactionChanges) {
        let _ = changes;
    }

    /// The transaction rolled back. Default: ignore.
    fn rollback(&self) {}
}

/// Token identifying a registered observer, used for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObserverHandle(u64);

pub(crate) enum ObserverImpl {
    Filtered(ChangeObserver),
    Custom(Box<dyn TransactionObserver>),
}

impl ObserverImpl {
    fn observes(&self, change: &RowChange) -> bool {
        match self {
            Self::Filtered(o) => o.observes(change),
            Self::Custom(o) => o.observes(change),
        }
    }

    fn change(&self, change: &RowChange) {
        match self {
            Self::Filtered(o) => {
                if let Some(f) = &o.on_change {
                    f(change);
                }
            }
            Self::Custom(o) => o.change(change),
        }
    }

    fn commit(&self, changes: &TransactionChanges) {
        match self {
            Self::Filtered(o) => {
                if let Some(f) = &o.on_commit {
                    f(changes);
                }
            }
            Self::Custom(o) => o.commit(changes),
        }
    }

    fn rollback(&self) {
        match self {
            Self::Filtered(o) => {
                if let Some(f) = &o.on_rollback {
                    f();
                }
            }
            Self::Custom(o) => o.rollback(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TransactionEnd {
    Commit,
    Rollback,
}

struct Entry {
    id: u64,
    observer: ObserverImpl,
    changes: TransactionChanges,
    touched: bool,
}

struct ObserverState {
    entries: Vec<Entry>,
    next_id: u64,
    // True between the end of one statement and the start of the next.
    // Commit/rollback hooks fire while the ending statement is still
    // executing; notifications wait for both flags.
    statement_done: bool,
    transaction_end: Option<TransactionEnd>,
    notify_pending: bool,
}

/// Shared observation state for one connection. Engine hooks feed it; the
/// statement layer reports execution boundaries.
pub(crate) struct ObserverRegistry {
    state: Mutex<ObserverState>,
}

impl ObserverRegistry {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(ObserverState {
                entries: Vec::new(),
                next_id: 0,
                statement_done: true,
                transaction_end: None,
                notify_pending: false,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ObserverState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers an observer; `true` when it is the first one and the
    /// engine hooks must be installed.
    pub(crate) fn insert(&self, observer: ObserverImpl) -> (ObserverHandle, bool) {
        let mut state = self.lock();
        let first = state.entries.is_empty();
        state.next_id += 1;
        let id = state.next_id;
        state.entries.push(Entry {
            id,
            observer,
            changes: TransactionChanges::default(),
            touched: false,
        });
        (ObserverHandle(id), first)
    }

    /// Removes an observer; `true` when none remain and the engine hooks
    /// can be dropped.
    pub(crate) fn remove(&self, handle: ObserverHandle) -> bool {
        let mut state = self.lock();
        state.entries.retain(|e| e.id != handle.0);
        state.entries.is_empty()
    }

    pub(crate) fn has_observers(&self) -> bool {
        !self.lock().entries.is_empty()
    }

    pub(crate) fn statement_began(&self) {
        self.lock().statement_done = false;
    }

    pub(crate) fn statement_finished(&self) {
        let mut state = self.lock();
        state.statement_done = true;
        flush_if_ready(&mut state);
    }

    pub(crate) fn record_change(&self, change: &RowChange) {
        let mut state = self.lock();
        state.notify_pending = true;
        for entry in &mut state.entries {
            if entry.observer.observes(change) {
                entry.touched = true;
                entry.changes.record(change);
                entry.observer.change(change);
            }
        }
    }

    pub(crate) fn transaction_ended(&self, end: TransactionEnd) {
        let mut state = self.lock();
        state.transaction_end = Some(end);
        flush_if_ready(&mut state);
    }
}

fn flush_if_ready(state: &mut ObserverState) {
    if !state.statement_done {
        return;
    }
    let Some(end) = state.transaction_end.take() else {
        return;
    };
    if !state.notify_pending {
        // Read-only transaction: nothing to report.
        return;
    }
    state.notify_pending = false;
    for entry in &mut state.entries {
        if !entry.touched {
            continue;
        }
        let changes = std::mem::take(&mut entry.changes);
        entry.touched = false;
        match end {
            TransactionEnd::Commit => entry.observer.commit(&changes),
            TransactionEnd::Rollback => entry.observer.rollback(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn change(kind: ChangeKind, table: &str, rowid: i64) -> RowChange {
        RowChange {
            kind,
            schema: "main".to_owned(),
            table: table.to_owned(),
            rowid,
        }
    }

    #[test]
    fn commit_waits_for_statement_completion() {
        let registry = ObserverRegistry::new();
        let commits = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&commits);
        let observer = ChangeObserver::new("t").on_commit(move |changes| {
            assert_eq!(changes.inserted("t"), &[1]);
            seen.fetch_add(1, Ordering::SeqCst);
        });
        registry.insert(ObserverImpl::Filtered(observer));

        registry.statement_began();
        registry.record_change(&change(ChangeKind::Insert, "t", 1));
        registry.transaction_ended(TransactionEnd::Commit);
        assert_eq!(commits.load(Ordering::SeqCst), 0);
        registry.statement_finished();
        assert_eq!(commits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn read_only_transaction_notifies_nobody() {
        let registry = ObserverRegistry::new();
        let commits = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&commits);
        let observer = ChangeObserver::new("t").on_commit(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        registry.insert(ObserverImpl::Filtered(observer));

        registry.statement_began();
        registry.transaction_ended(TransactionEnd::Commit);
        registry.statement_finished();
        assert_eq!(commits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn changes_reset_between_transactions() {
        let registry = ObserverRegistry::new();
        let counts = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&counts);
        let observer = ChangeObserver::new("t").on_commit(move |changes| {
            seen.store(changes.inserted("t").len(), Ordering::SeqCst);
        });
        registry.insert(ObserverImpl::Filtered(observer));

        for rowid in 1..=2 {
            registry.statement_began();
            registry.record_change(&change(ChangeKind::Insert, "t", rowid));
            registry.transaction_ended(TransactionEnd::Commit);
            registry.statement_finished();
            assert_eq!(counts.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn filter_excludes_other_tables_and_kinds() {
        let registry = ObserverRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&hits);
        let observer = ChangeObserver::new("t")
            .kinds(&[ChangeKind::Delete])
            .on_change(move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            });
        registry.insert(ObserverImpl::Filtered(observer));

        registry.record_change(&change(ChangeKind::Insert, "t", 1));
        registry.record_change(&change(ChangeKind::Delete, "other", 2));
        registry.record_change(&change(ChangeKind::Delete, "t", 3));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn rollback_discards_changes() {
        let registry = ObserverRegistry::new();
        let rollbacks = Arc::new(AtomicUsize::new(0));
        let commits = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&rollbacks);
        let c = Arc::clone(&commits);
        let observer = ChangeObserver::new("t")
            .on_rollback(move || {
                r.fetch_add(1, Ordering::SeqCst);
            })
            .on_commit(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            });
        registry.insert(ObserverImpl::Filtered(observer));

        registry.statement_began();
        registry.record_change(&change(ChangeKind::Insert, "t", 1));
        registry.transaction_ended(TransactionEnd::Rollback);
        registry.statement_finished();
        assert_eq!(rollbacks.load(Ordering::SeqCst), 1);
        assert_eq!(commits.load(Ordering::SeqCst), 0);
    }
}
