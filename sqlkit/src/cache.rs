//! Shared cache for schema metadata.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use crate::schema::{ColumnInfo, ColumnType};

/// Cache of schema lookups shared by every connection of a queue or pool.
///
/// Keys are case-folded. Storing `None` removes an entry; `clear` empties
/// every map. Readers proceed concurrently, writers take the exclusive
/// side of the lock.
#[derive(Debug, Default)]
pub struct SchemaCache {
    primary_keys: RwLock<HashMap<String, Option<Vec<String>>>>,
    columns: RwLock<HashMap<String, Vec<ColumnInfo>>>,
    table_types: RwLock<HashMap<String, HashMap<String, ColumnType>>>,
    statement_types: RwLock<HashMap<String, HashMap<String, ColumnType>>>,
}

fn read<'a, V>(
    lock: &'a RwLock<HashMap<String, V>>,
) -> std::sync::RwLockReadGuard<'a, HashMap<String, V>> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<'a, V>(
    lock: &'a RwLock<HashMap<String, V>>,
) -> std::sync::RwLockWriteGuard<'a, HashMap<String, V>> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn store<V>(lock: &RwLock<HashMap<String, V>>, key: &str, value: Option<V>) {
    let key = key.to_lowercase();
    let mut map = write(lock);
    match value {
        Some(v) => {
            map.insert(key, v);
        }
        None => {
            map.remove(&key);
        }
    }
}

impl SchemaCache {
    /// Cached primary key for a table. The outer `Option` distinguishes
    /// "not cached" from the cached fact that the table declares no
    /// explicit primary key.
    pub fn primary_key(&self, table: &str) -> Option<Option<Vec<String>>> {
        read(&self.primary_keys).get(&table.to_lowercase()).cloned()
    }

    /// Stores or removes the primary key entry for a table.
    pub fn set_primary_key(&self, table: &str, key: Option<Option<Vec<String>>>) {
        store(&self.primary_keys, table, key);
    }

    /// Cached column metadata for a table.
    pub fn columns(&self, table: &str) -> Option<Vec<ColumnInfo>> {
        read(&self.columns).get(&table.to_lowercase()).cloned()
    }

    /// Stores or removes the column metadata entry for a table.
    pub fn set_columns(&self, table: &str, columns: Option<Vec<ColumnInfo>>) {
        store(&self.columns, table, columns);
    }

    /// Cached declared column types for a table.
    pub fn table_types(&self, table: &str) -> Option<HashMap<String, ColumnType>> {
        read(&self.table_types).get(&table.to_lowercase()).cloned()
    }

    /// Stores or removes the declared column types for a table.
    pub fn set_table_types(
        &self,
        table: &str,
        types: Option<HashMap<String, ColumnType>>,
    ) {
        store(&self.table_types, table, types);
    }

    /// Cached inferred column types for a raw SQL statement.
    pub fn statement_types(&self, sql: &str) -> Option<HashMap<String, ColumnType>> {
        read(&self.statement_types).get(&sql.to_lowercase()).cloned()
    }

    /// Stores or removes the inferred column types for a raw SQL statement.
    pub fn set_statement_types(
        &self,
        sql: &str,
        types: Option<HashMap<String, ColumnType>>,
    ) {
        store(&self.statement_types, sql, types);
    }

    /// Drops every cached entry for one table, including any statement
    /// inference that may reference it.
    pub fn invalidate_table(&self, table: &str) {
        self.set_primary_key(table, None);
        self.set_columns(table, None);
        self.set_table_types(table, None);
        write(&self.statement_types).clear();
    }

    /// Empties every map.
    pub fn clear(&self) {
        write(&self.primary_keys).clear();
        write(&self.columns).clear();
        write(&self.table_types).clear();
        write(&self.statement_types).clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_case_folded() {
        let cache = SchemaCache::default();
        cache.set_primary_key("Users", Some(Some(vec!["id".to_owned()])));
        assert_eq!(
            cache.primary_key("USERS"),
            Some(Some(vec!["id".to_owned()]))
        );
    }

    #[test]
    fn storing_none_removes() {
        let cache = SchemaCache::default();
        cache.set_primary_key("t", Some(None));
        assert_eq!(cache.primary_key("t"), Some(None));
        cache.set_primary_key("t", None);
        assert_eq!(cache.primary_key("t"), None);
    }

    #[test]
    fn invalidate_table_clears_statement_inference() {
        let cache = SchemaCache::default();
        cache.set_columns("t", Some(Vec::new()));
        cache.set_statement_types("select a from t", Some(HashMap::new()));
        cache.invalidate_table("t");
        assert!(cache.columns("t").is_none());
        assert!(cache.statement_types("select a from t").is_none());
    }

    #[test]
    fn clear_empties_everything() {
        let cache = SchemaCache::default();
        cache.set_primary_key("a", Some(Some(vec!["id".to_owned()])));
        cache.set_statement_types("select 1", Some(HashMap::new()));
        cache.clear();
        assert!(cache.primary_key("a").is_none());
        assert!(cache.statement_types("select 1").is_none());
    }
}
