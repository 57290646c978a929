//! Record persistence: insert, update, save, delete, exists for typed
//! records addressed by their primary key.

use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::query::delete::DeleteQuery;
use crate::query::expression::{col, raw_sql};
use crate::query::insert::InsertQuery;
use crate::query::select::SelectQuery;
use crate::query::update::UpdateQuery;
use crate::row::Row;
use crate::value::{ToValue, Value};

/// Association of a record type with its table.
pub trait TableRecord {
    /// Name of the table the record persists into.
    fn table_name() -> &'static str;
}

/// Ordered column/value container a record encodes itself into.
#[derive(Debug, Default)]
pub struct RecordEncoder {
    entries: Vec<(String, Value)>,
}

impl RecordEncoder {
    /// Appends one column/value pair.
    pub fn set(&mut self, column: impl Into<String>, value: impl ToValue) {
        self.entries.push((column.into(), value.to_value()));
    }
}

/// A record that can be written to the database.
///
/// The encoder must include the primary key columns; a missing key
/// column addresses rows whose key is NULL, which matches nothing in
/// practice.
pub trait Record: TableRecord {
    /// Writes the record's columns into the encoder.
    fn encode(&self, encoder: &mut RecordEncoder);
}

fn encoded<R: Record>(record: &R) -> Vec<(String, Value)> {
    let mut encoder = RecordEncoder::default();
    record.encode(&mut encoder);
    encoder.entries
}

fn key_value(entries: &[(String, Value)], column: &str) -> Value {
    entries
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(column))
        .map_or(Value::Null, |(_, value)| value.clone())
}

impl Connection {
    /// Looks up the primary key a record operation addresses rows by.
    ///
    /// # Errors
    /// [`Error::RecordNotFound`] when the table declares no explicit
    /// primary key.
    fn record_key(&self, table: &str) -> Result<Vec<String>> {
        self.primary_key(table)?.ok_or_else(|| Error::RecordNotFound {
            table: table.to_owned(),
        })
    }

    /// Inserts a record and returns the new rowid.
    ///
    /// # Errors
    /// Execution errors from the engine (constraint violations included).
    pub fn insert_record<R: Record>(&self, record: &R) -> Result<i64> {
        let mut query = InsertQuery::new(R::table_name());
        for (column, value) in encoded(record) {
            query = query.set(column, value);
        }
        self.run_query(&query)?;
        Ok(self.last_insert_rowid())
    }

    /// Updates the row addressed by the record's primary key.
    ///
    /// # Errors
    /// [`Error::RecordNotFound`] when no row matches the key or the table
    /// declares no primary key; execution errors from the engine.
    pub fn update_record<R: Record>(&self, record: &R) -> Result<()> {
        let table = R::table_name();
        let key = self.record_key(table)?;
        let entries = encoded(record);
        let assignments: Vec<_> = entries
            .iter()
            .filter(|(column, _)| !key.iter().any(|k| k.eq_ignore_ascii_case(column)))
            .collect();
        if assignments.is_empty() {
            // Every column is part of the key; degrade to an existence
            // check.
            if self.record_exists(record)? {
                return Ok(());
            }
            return Err(Error::RecordNotFound {
                table: table.to_owned(),
            });
        }
        let mut query = UpdateQuery::new(table);
        for (column, value) in assignments {
            query = query.set(column.clone(), value.clone());
        }
        for key_column in &key {
            query = query.filter(col(key_column.clone()).eq(key_value(&entries, key_column)));
        }
        if self.run_query(&query)? == 0 {
            return Err(Error::RecordNotFound {
                table: table.to_owned(),
            });
        }
        Ok(())
    }

    /// Updates the record, inserting it instead when it does not exist
    /// yet.
    ///
    /// # Errors
    /// Execution errors from the engine.
    pub fn save_record<R: Record>(&self, record: &R) -> Result<()> {
        match self.update_record(record) {
            Err(Error::RecordNotFound { .. }) => self.insert_record(record).map(|_| ()),
            other => other,
        }
    }

    /// Deletes the row addressed by the record's primary key; `true`
    /// when a row was actually removed.
    ///
    /// # Errors
    /// [`Error::RecordNotFound`] when the table declares no primary key;
    /// execution errors from the engine.
    pub fn delete_record<R: Record>(&self, record: &R) -> Result<bool> {
        let table = R::table_name();
        let key = self.record_key(table)?;
        let entries = encoded(record);
        let mut query = DeleteQuery::new(table);
        for key_column in &key {
            query = query.filter(col(key_column.clone()).eq(key_value(&entries, key_column)));
        }
        Ok(self.run_query(&query)? > 0)
    }

    /// Whether a row with the record's primary key exists.
    ///
    /// # Errors
    /// [`Error::RecordNotFound`] when the table declares no primary key;
    /// execution errors from the engine.
    pub fn record_exists<R: Record>(&self, record: &R) -> Result<bool> {
        let table = R::table_name();
        let key = self.record_key(table)?;
        let entries = encoded(record);
        let mut query = SelectQuery::from(table)
            .select([raw_sql("1", Vec::new())])
            .limit(1);
        for key_column in &key {
            query = query.filter(col(key_column.clone()).eq(key_value(&entries, key_column)));
        }
        Ok(self.fetch_first::<Row>(&query)?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::table::CreateTableOptions;
    use crate::row::FromRow;
    use crate::schema::ColumnType;

    #[derive(Debug, PartialEq)]
    struct User {
        id: i64,
        name: String,
        age: Option<i64>,
    }

    impl TableRecord for User {
        fn table_name() -> &'static str {
            "users"
        }
    }

    impl Record for User {
        fn encode(&self, encoder: &mut RecordEncoder) {
            encoder.set("id", self.id);
            encoder.set("name", self.name.clone());
            encoder.set("age", self.age);
        }
    }

    impl FromRow for User {
        fn from_row(row: &Row) -> Result<Self> {
            Ok(Self {
                id: row.get("id")?,
                name: row.get("name")?,
                age: row.get("age")?,
            })
        }
    }

    fn connection_with_table() -> Connection {
        let conn = Connection::open_in_memory().expect("open");
        conn.create_table("users", CreateTableOptions::default(), |t| {
            t.column("id", ColumnType::Integer).primary_key();
            t.column("name", ColumnType::Text).not_null();
            t.column("age", ColumnType::Integer);
        })
        .expect("create table");
        conn
    }

    #[test]
    fn insert_then_fetch_round_trips() {
        let conn = connection_with_table();
        let user = User {
            id: 1,
            name: "ada".into(),
            age: Some(36),
        };
        conn.insert_record(&user).expect("insert");
        let fetched: Option<User> = conn
            .fetch_first(&SelectQuery::from("users").filter(col("id").eq(1)))
            .expect("fetch");
        assert_eq!(fetched, Some(user));
    }

    #[test]
    fn update_missing_record_reports_not_found() {
        let conn = connection_with_table();
        let ghost = User {
            id: 42,
            name: "nobody".into(),
            age: None,
        };
        assert!(matches!(
            conn.update_record(&ghost),
            Err(Error::RecordNotFound { .. })
        ));
    }

    #[test]
    fn save_inserts_then_updates() {
        let conn = connection_with_table();
        let mut user = User {
            id: 7,
            name: "grace".into(),
            age: None,
        };
        conn.save_record(&user).expect("save inserts");
        user.age = Some(85);
        conn.save_record(&user).expect("save updates");
        let fetched: Option<User> = conn
            .fetch_first(&SelectQuery::from("users").filter(col("id").eq(7)))
            .expect("fetch");
        assert_eq!(fetched.and_then(|u| u.age), Some(85));
    }

    #[test]
    fn delete_and_exists_agree() {
        let conn = connection_with_table();
        let user = User {
            id: 3,
            name: "joan".into(),
            age: None,
        };
        conn.insert_record(&user).expect("insert");
        assert!(conn.record_exists(&user).expect("exists"));
        assert!(conn.delete_record(&user).expect("delete"));
        assert!(!conn.record_exists(&user).expect("exists"));
        assert!(!conn.delete_record(&user).expect("delete again"));
    }

    #[test]
    fn keyless_table_rejects_record_operations() {
        let conn = Connection::open_in_memory().expect("open");
        conn.execute_batch("CREATE TABLE users (id INTEGER, name TEXT)")
            .expect("create");
        let user = User {
            id: 1,
            name: "ada".into(),
            age: None,
        };
        assert!(matches!(
            conn.update_record(&user),
            Err(Error::RecordNotFound { .. })
        ));
    }
}
