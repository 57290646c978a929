//! Common test utilities shared across integration tests.

use std::path::PathBuf;

use sqlkit::{
    col, ColumnType, Config, Connection, CreateTableOptions, Record, RecordEncoder, Result, Row,
    SelectQuery, StorageLocation, TableRecord,
};

/// A scratch database file that lives as long as the returned guard.
pub fn temp_db_path() -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("test.db");
    (dir, path)
}

pub fn open_on_disk(path: &std::path::Path, config: Config) -> Connection {
    Connection::open(&StorageLocation::OnDisk(path.to_path_buf()), config).expect("open")
}

#[derive(Debug, Clone, PartialEq)]
pub struct Person {
    pub id: i64,
    pub name: String,
    pub age: Option<i64>,
}

impl TableRecord for Person {
    fn table_name() -> &'static str {
        "people"
    }
}

impl Record for Person {
    fn encode(&self, encoder: &mut RecordEncoder) {
        encoder.set("id", self.id);
        encoder.set("name", self.name.clone());
        encoder.set("age", self.age);
    }
}

impl sqlkit::FromRow for Person {
    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            age: row.get("age")?,
        })
    }
}

/// Creates the `people` table used by most scenarios.
pub fn create_people_table(conn: &Connection) {
    conn.create_table("people", CreateTableOptions::default(), |t| {
        t.column("id", ColumnType::Integer).primary_key();
        t.column("name", ColumnType::Text).not_null();
        t.column("age", ColumnType::Integer);
    })
    .expect("create people table");
}

pub fn fetch_person(conn: &Connection, id: i64) -> Option<Person> {
    conn.fetch_first(&SelectQuery::from("people").filter(col("id").eq(id)))
        .expect("fetch person")
}
