mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use common::temp_db_path;
use sqlkit::{params, BusyMode, Config, ConnectionPool, ConnectionQueue, TransactionCompletion};

fn pool_config() -> Config {
    Config {
        busy_mode: BusyMode::Timeout(Duration::from_secs(5)),
        ..Config::default()
    }
}

#[test]
fn queue_serializes_writers_across_threads() {
    let (_dir, path) = temp_db_path();
    let queue = ConnectionQueue::open_path(&path, pool_config()).expect("open");
    queue
        .write(|conn| conn.execute_batch("CREATE TABLE counters (n INTEGER)"))
        .expect("create");

    thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                for _ in 0..25 {
                    queue
                        .write(|conn| {
                            conn.execute("INSERT INTO counters VALUES (1)", &[]).map(|_| ())
                        })
                        .expect("insert");
                }
            });
        }
    });

    let total: Option<i64> = queue
        .read(|conn| conn.query_value("SELECT COUNT(*) FROM counters", &[]))
        .expect("count");
    assert_eq!(total, Some(100));
}

#[test]
fn pool_reads_run_while_a_writer_holds_a_transaction() {
    let (_dir, path) = temp_db_path();
    let pool = ConnectionPool::open_path(&path, pool_config()).expect("open");
    pool.write(|conn| {
        conn.execute_batch("CREATE TABLE events (id INTEGER PRIMARY KEY, label TEXT)")?;
        conn.execute(
            "INSERT INTO events (label) VALUES (?)",
            params!["committed"],
        )?;
        Ok(())
    })
    .expect("seed");

    let reads_during_write = AtomicUsize::new(0);
    thread::scope(|scope| {
        scope.spawn(|| {
            pool.in_transaction(None, |conn| {
                conn.execute(
                    "INSERT INTO events (label) VALUES (?)",
                    params!["uncommitted"],
                )?;
                // Give readers time to observe the pre-transaction
                // snapshot while the write transaction is still open.
                thread::sleep(Duration::from_millis(100));
                Ok(TransactionCompletion::Commit)
            })
            .expect("write transaction");
        });

        thread::sleep(Duration::from_millis(20));
        for _ in 0..3 {
            let count: Option<i64> = pool
                .read(|conn| conn.query_value("SELECT COUNT(*) FROM events", &[]))
                .expect("read");
            // WAL snapshot: the in-flight insert is invisible.
            assert_eq!(count, Some(1));
            reads_during_write.fetch_add(1, Ordering::SeqCst);
        }
    });
    assert_eq!(reads_during_write.load(Ordering::SeqCst), 3);

    let finally: Option<i64> = pool
        .read(|conn| conn.query_value("SELECT COUNT(*) FROM events", &[]))
        .expect("read after commit");
    assert_eq!(finally, Some(2));
}

#[test]
fn pool_readers_run_concurrently() {
    let (_dir, path) = temp_db_path();
    let pool = ConnectionPool::open_path(&path, pool_config()).expect("open");
    pool.write(|conn| {
        conn.execute_batch("CREATE TABLE t (a INTEGER)")?;
        conn.execute("INSERT INTO t VALUES (1)", &[]).map(|_| ())
    })
    .expect("seed");

    thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                for _ in 0..10 {
                    let value: Option<i64> = pool
                        .read(|conn| conn.query_value("SELECT a FROM t", &[]))
                        .expect("read");
                    assert_eq!(value, Some(1));
                }
            });
        }
    });
}

#[test]
fn release_memory_keeps_pool_usable() {
    let (_dir, path) = temp_db_path();
    let pool = ConnectionPool::open_path(&path, pool_config()).expect("open");
    pool.write(|conn| conn.execute_batch("CREATE TABLE t (a INTEGER)"))
        .expect("create");
    let _: Option<i64> = pool
        .read(|conn| conn.query_value("SELECT COUNT(*) FROM t", &[]))
        .expect("warm a reader");
    pool.release_memory().expect("release");
    let count: Option<i64> = pool
        .read(|conn| conn.query_value("SELECT COUNT(*) FROM t", &[]))
        .expect("read after release");
    assert_eq!(count, Some(0));
}
