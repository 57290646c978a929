mod common;

use std::sync::{Arc, Mutex};

use common::{create_people_table, fetch_person, open_on_disk, temp_db_path, Person};
use sqlkit::{
    col, params, ChangeObserver, ColumnType, Config, ConflictResolution, Connection,
    CreateTableOptions, DeleteQuery, Error, InsertQuery, RowChange, SelectQuery, SqlQuery,
    StorageLocation, TransactionChanges, TransactionCompletion, TransactionObserver, UpdateQuery,
    Value,
};

#[test]
fn builder_crud_round_trip() {
    let conn = Connection::open_in_memory().expect("open");
    create_people_table(&conn);

    let inserted = conn
        .run_query(
            &InsertQuery::new("people")
                .set("id", 1)
                .set("name", "ada")
                .set("age", 36),
        )
        .expect("insert");
    assert_eq!(inserted, 1);
    assert_eq!(
        fetch_person(&conn, 1),
        Some(Person {
            id: 1,
            name: "ada".into(),
            age: Some(36),
        })
    );

    conn.run_query(
        &UpdateQuery::new("people")
            .set("age", 37)
            .filter(col("id").eq(1)),
    )
    .expect("update");
    assert_eq!(fetch_person(&conn, 1).and_then(|p| p.age), Some(37));

    conn.run_query(&DeleteQuery::new("people").filter(col("id").eq(1)))
        .expect("delete");
    assert_eq!(fetch_person(&conn, 1), None);
}

#[test]
fn convenience_inserts_cover_each_shape() {
    let conn = Connection::open_in_memory().expect("open");
    create_people_table(&conn);

    conn.insert_into("people", params![1, "ada", 36], None)
        .expect("positional");
    conn.insert_into_columns("people", &["id", "name"], params![2, "bob"], None)
        .expect("column list");
    conn.insert_into_map("people", &[("id", 3.into()), ("name", "cid".into())], None)
        .expect("map");

    // Replacing row 3 goes through the conflict clause.
    conn.insert_into_map(
        "people",
        &[("id", 3.into()), ("name", "cyd".into())],
        Some(ConflictResolution::Replace),
    )
    .expect("replace");
    assert_eq!(fetch_person(&conn, 3).map(|p| p.name), Some("cyd".to_owned()));

    let inserted = conn
        .insert_into_maps(
            "people",
            &[
                vec![("id", 4.into()), ("name", "dee".into())],
                vec![("id", 5.into()), ("name", "eve".into())],
                vec![("id", 6.into()), ("name", "fay".into()), ("age", 9.into())],
            ],
            None,
        )
        .expect("maps");
    assert_eq!(inserted, 3);

    // A value count that does not match the column list never executes.
    assert!(matches!(
        conn.insert_into_columns("people", &["id", "name"], params![7], None),
        Err(Error::Bind { .. })
    ));

    let total: Option<i64> = conn
        .query_value("SELECT COUNT(*) FROM people", &[])
        .expect("count");
    assert_eq!(total, Some(6));
}

#[test]
fn change_counters_track_engine_totals() {
    let conn = Connection::open_in_memory().expect("open");
    create_people_table(&conn);
    assert_eq!(conn.total_changes().expect("total"), 0);
    conn.execute("INSERT INTO people (id, name) VALUES (?, ?)", params![1, "a"])
        .expect("insert");
    conn.execute("INSERT INTO people (id, name) VALUES (?, ?)", params![2, "b"])
        .expect("insert");
    assert_eq!(conn.changes(), 1);
    assert_eq!(conn.total_changes().expect("total"), 2);
}

#[test]
fn independent_shared_memory_connections_stay_separate() {
    let first = Connection::open(&StorageLocation::InMemory { shared: true }, Config::default())
        .expect("open first");
    let second = Connection::open(&StorageLocation::InMemory { shared: true }, Config::default())
        .expect("open second");
    first
        .execute_batch("CREATE TABLE only_here (a INTEGER)")
        .expect("create");
    assert!(first.table_exists("only_here").expect("exists"));
    assert!(!second.table_exists("only_here").expect("exists"));
}

#[test]
fn rendered_sql_binds_in_render_order() {
    let query = SelectQuery::from("people")
        .filter(col("age").ge(18))
        .filter(col("name").ne("bob"))
        .order_by([col("name").asc()])
        .limit(10);
    assert_eq!(
        query.sql(),
        "SELECT * FROM people WHERE (age >= ?) AND (name <> ?) ORDER BY name ASC LIMIT ?"
    );
    assert_eq!(
        query.parameters(),
        vec![
            Value::Integer(18),
            Value::Text("bob".into()),
            Value::Integer(10),
        ]
    );
}

#[test]
fn named_parameters_bind_by_name() {
    let conn = Connection::open_in_memory().expect("open");
    create_people_table(&conn);
    conn.execute_named(
        "INSERT INTO people (id, name) VALUES (:id, :name)",
        &[("id", Value::Integer(5)), ("name", "joan".into())],
    )
    .expect("insert");
    assert_eq!(
        fetch_person(&conn, 5).map(|p| p.name),
        Some("joan".to_owned())
    );
}

#[test]
fn parameter_count_mismatch_is_a_bind_error() {
    let conn = Connection::open_in_memory().expect("open");
    create_people_table(&conn);
    let result = conn.execute("INSERT INTO people (id, name) VALUES (?, ?)", params![1]);
    assert!(matches!(result, Err(Error::Bind { .. })));
    // Nothing was executed.
    assert_eq!(fetch_person(&conn, 1), None);
}

#[test]
fn failing_transaction_body_rolls_back_and_wins() {
    let conn = Connection::open_in_memory().expect("open");
    create_people_table(&conn);
    let result = conn.transaction(None, |c| {
        c.execute("INSERT INTO people (id, name) VALUES (?, ?)", params![1, "x"])?;
        c.execute("THIS IS NOT SQL", &[])?;
        Ok(TransactionCompletion::Commit)
    });
    assert!(matches!(result, Err(Error::Compile { .. })));
    assert!(!conn.is_inside_transaction());
    assert_eq!(fetch_person(&conn, 1), None);
}

#[test]
fn explicit_rollback_completion_discards_changes() {
    let conn = Connection::open_in_memory().expect("open");
    create_people_table(&conn);
    conn.transaction(None, |c| {
        c.execute("INSERT INTO people (id, name) VALUES (?, ?)", params![1, "x"])?;
        Ok(TransactionCompletion::Rollback)
    })
    .expect("transaction");
    assert_eq!(fetch_person(&conn, 1), None);
}

#[test]
fn attach_is_idempotent_per_name_and_path() {
    let (_dir, main_path) = temp_db_path();
    let (_aux_dir, aux_path) = temp_db_path();
    {
        let aux = open_on_disk(&aux_path, Config::default());
        aux.execute_batch("CREATE TABLE notes (body TEXT); INSERT INTO notes VALUES ('hi')")
            .expect("seed aux");
    }
    let conn = open_on_disk(&main_path, Config::default());
    conn.attach(&aux_path, "aux").expect("attach");
    // Same name, same path: no-op.
    conn.attach(&aux_path, "aux").expect("re-attach");
    let body: Option<String> = conn
        .query_value("SELECT body FROM aux.notes", &[])
        .expect("query attached");
    assert_eq!(body.as_deref(), Some("hi"));

    // Same name, different path: refused.
    let (_other_dir, other_path) = temp_db_path();
    assert!(matches!(
        conn.attach(&other_path, "aux"),
        Err(Error::Attach(sqlkit::AttachError::SchemaAlreadyInUse(_)))
    ));

    conn.detach("aux").expect("detach");
    assert!(matches!(
        conn.detach("aux"),
        Err(Error::Attach(sqlkit::AttachError::SchemaNotFound(_)))
    ));
}

#[test]
fn observers_aggregate_changes_per_transaction() {
    let conn = Connection::open_in_memory().expect("open");
    create_people_table(&conn);

    let committed: Arc<Mutex<Vec<i64>>> = Arc::new(Mutex::new(Vec::new()));
    let rollbacks = Arc::new(Mutex::new(0_usize));
    let committed_sink = Arc::clone(&committed);
    let rollback_sink = Arc::clone(&rollbacks);
    conn.add_change_observer(
        ChangeObserver::new("people")
            .on_commit(move |changes| {
                committed_sink
                    .lock()
                    .expect("lock")
                    .extend_from_slice(changes.inserted("people"));
            })
            .on_rollback(move || {
                *rollback_sink.lock().expect("lock") += 1;
            }),
    );

    conn.transaction(None, |c| {
        c.execute("INSERT INTO people (id, name) VALUES (?, ?)", params![1, "a"])?;
        c.execute("INSERT INTO people (id, name) VALUES (?, ?)", params![2, "b"])?;
        Ok(TransactionCompletion::Commit)
    })
    .expect("commit");
    assert_eq!(*committed.lock().expect("lock"), vec![1, 2]);

    conn.transaction(None, |c| {
        c.execute("INSERT INTO people (id, name) VALUES (?, ?)", params![3, "c"])?;
        Ok(TransactionCompletion::Rollback)
    })
    .expect("rollback");
    assert_eq!(*rollbacks.lock().expect("lock"), 1);
    // The rolled-back insert never reached the commit aggregate.
    assert_eq!(*committed.lock().expect("lock"), vec![1, 2]);
}

struct RecordingObserver {
    committed: Arc<Mutex<Option<TransactionChanges>>>,
}

impl TransactionObserver for RecordingObserver {
    fn observes(&self, _change: &RowChange) -> bool {
        true
    }

    fn commit(&self, changes: &TransactionChanges) {
        *self.committed.lock().expect("lock") = Some(changes.clone());
    }
}

#[test]
fn commit_payload_partitions_by_table_and_kind() {
    let conn = Connection::open_in_memory().expect("open");
    create_people_table(&conn);
    conn.execute_batch("CREATE TABLE tags (id INTEGER PRIMARY KEY, label TEXT)")
        .expect("tags");
    conn.execute("INSERT INTO people (id, name) VALUES (?, ?)", params![1, "old"])
        .expect("seed");

    let committed = Arc::new(Mutex::new(None));
    conn.add_transaction_observer(Box::new(RecordingObserver {
        committed: Arc::clone(&committed),
    }));

    conn.transaction(None, |c| {
        c.execute("INSERT INTO people (id, name) VALUES (?, ?)", params![2, "new"])?;
        c.execute("INSERT INTO tags (id, label) VALUES (?, ?)", params![7, "blue"])?;
        c.execute("UPDATE people SET name = ? WHERE id = ?", params!["renamed", 1])?;
        c.execute("DELETE FROM tags WHERE id = ?", params![7])?;
        Ok(TransactionCompletion::Commit)
    })
    .expect("commit");

    let guard = committed.lock().expect("lock");
    let changes = guard.as_ref().expect("commit payload");
    assert_eq!(changes.inserted("people"), &[2]);
    assert_eq!(changes.inserted("tags"), &[7]);
    assert_eq!(changes.updated("people"), &[1]);
    assert_eq!(changes.deleted("tags"), &[7]);
    assert!(changes.updated("tags").is_empty());
    assert!(changes.deleted("people").is_empty());
}

#[test]
fn read_only_transactions_stay_silent() {
    let conn = Connection::open_in_memory().expect("open");
    create_people_table(&conn);
    let commits = Arc::new(Mutex::new(0_usize));
    let sink = Arc::clone(&commits);
    conn.add_change_observer(ChangeObserver::new("people").on_commit(move |_| {
        *sink.lock().expect("lock") += 1;
    }));
    conn.transaction(None, |c| {
        let _: Option<i64> = c.query_value("SELECT COUNT(*) FROM people", &[])?;
        Ok(TransactionCompletion::Commit)
    })
    .expect("read-only transaction");
    assert_eq!(*commits.lock().expect("lock"), 0);
}

#[test]
fn custom_collation_orders_results() {
    let conn = Connection::open_in_memory().expect("open");
    conn.add_collation("by_length", |a, b| a.len().cmp(&b.len()))
        .expect("collation");
    conn.execute_batch(
        "CREATE TABLE words (w TEXT); \
         INSERT INTO words VALUES ('ccc'), ('a'), ('bb')",
    )
    .expect("seed");
    let ordered: Vec<String> = conn
        .query_values("SELECT w FROM words ORDER BY w COLLATE by_length", &[])
        .expect("query");
    assert_eq!(ordered, vec!["a", "bb", "ccc"]);
}

#[test]
fn custom_function_evaluates_and_fails_cleanly() {
    let conn = Connection::open_in_memory().expect("open");
    conn.add_function("shout", 1, true, |args| {
        let text: String = args[0].decode()?;
        Ok(Value::Text(text.to_uppercase()))
    })
    .expect("function");
    let shouted: Option<String> = conn
        .query_value("SELECT shout('hello')", &[])
        .expect("query");
    assert_eq!(shouted.as_deref(), Some("HELLO"));
    // A non-text argument makes the function body fail; the statement
    // surfaces it as an execution error.
    assert!(conn
        .query_value::<String>("SELECT shout(x'00ff')", &[])
        .is_err());
}

#[test]
fn oversized_u64_round_trips_through_text() {
    let conn = Connection::open_in_memory().expect("open");
    let value = Value::from(u64::MAX);
    assert_eq!(value, Value::Text(u64::MAX.to_string()));
    let back: Option<u64> = conn
        .query_value("SELECT ?", &[value])
        .expect("query");
    assert_eq!(back, Some(u64::MAX));
    // Values that fit keep the integer storage class.
    assert_eq!(Value::from(7_u64), Value::Integer(7));
}

#[test]
fn column_types_are_inferred_from_the_map_table() {
    let (_dir, path) = temp_db_path();
    let config = Config {
        map_columns: true,
        ..Config::default()
    };
    let conn = open_on_disk(&path, config);
    conn.create_table("flags", CreateTableOptions::default(), |t| {
        t.column("id", ColumnType::Integer).primary_key();
        t.column("ready", ColumnType::Boolean);
        t.column("since", ColumnType::Date);
    })
    .expect("create");

    let types = conn
        .column_types_for_sql("SELECT * FROM flags")
        .expect("infer");
    assert_eq!(types.get("ready"), Some(&ColumnType::Boolean));
    assert_eq!(types.get("since"), Some(&ColumnType::Date));

    let joined = conn
        .column_types_for_sql("SELECT f.ready AS ok FROM flags f")
        .expect("infer aliased");
    assert_eq!(joined.get("ok"), Some(&ColumnType::Boolean));
}

#[test]
fn schema_lookups_follow_table_mutations() {
    let conn = Connection::open_in_memory().expect("open");
    create_people_table(&conn);

    // Warm the cache.
    assert_eq!(conn.columns_in("people").expect("columns").len(), 3);
    assert_eq!(
        conn.primary_key("people").expect("key"),
        Some(vec!["id".to_owned()])
    );

    conn.rename_table("people", "humans").expect("rename");
    assert!(!conn.table_exists("people").expect("exists"));
    assert_eq!(conn.columns_in("humans").expect("columns").len(), 3);
    assert_eq!(
        conn.primary_key("humans").expect("key"),
        Some(vec!["id".to_owned()])
    );

    // A new table under the old name supersedes the cached shape.
    conn.create_table("people", CreateTableOptions::default(), |t| {
        t.column("tag", ColumnType::Text);
    })
    .expect("recreate");
    let names: Vec<String> = conn
        .columns_in("people")
        .expect("columns")
        .into_iter()
        .map(|c| c.name)
        .collect();
    assert_eq!(names, vec!["tag"]);
    assert_eq!(conn.primary_key("people").expect("key"), None);

    conn.drop_table("humans").expect("drop");
    assert!(conn.columns_in("humans").expect("columns").is_empty());
}

#[test]
fn records_persist_on_disk() {
    let (_dir, path) = temp_db_path();
    let conn = open_on_disk(&path, Config::default());
    create_people_table(&conn);

    let mut person = Person {
        id: 9,
        name: "lin".into(),
        age: None,
    };
    conn.save_record(&person).expect("save inserts");
    person.age = Some(50);
    conn.save_record(&person).expect("save updates");
    drop(conn);

    // A fresh connection sees the persisted row.
    let conn = open_on_disk(&path, Config::default());
    assert_eq!(fetch_person(&conn, 9), Some(person.clone()));
    assert!(conn.delete_record(&person).expect("delete"));
    assert!(!conn.record_exists(&person).expect("exists"));
}
