mod common;

use std::thread;
use std::time::Duration;

use common::{Entry, entries};
use sqlite_tablespec::prelude::*;
use tempfile::TempDir;

fn pool_orm(workers: usize) -> Result<(TempDir, PoolOrm<Entry>), OrmError> {
    let dir = tempfile::tempdir().map_err(|e| OrmError::ConnectionError(e.to_string()))?;
    let path = dir.path().join("pool.db");
    let connect = ConnectOptions::builder(path.to_string_lossy())
        .wal(true)
        .busy_timeout(Duration::from_secs(5))
        .finish();
    let orm = PoolOrm::<Entry>::new(&connect.factory(), &PoolOptions::new(workers), "entries")?;
    orm.bootstrap().wait()?;
    Ok((dir, orm))
}

#[test]
fn concurrent_inserts_from_many_threads() -> Result<(), OrmError> {
    let (_dir, orm) = pool_orm(4)?;
    let writers: Vec<_> = (0..4_i64)
        .map(|t| {
            let orm = orm.clone();
            thread::spawn(move || -> Result<usize, OrmError> {
                let mut n = 0;
                for i in 0..25 {
                    n += orm.insert(&Entry::new(t * 100 + i, "A", b"p")).wait()?;
                }
                Ok(n)
            })
        })
        .collect();
    let mut inserted = 0;
    for w in writers {
        inserted += w.join().expect("writer panicked")?;
    }
    assert_eq!(inserted, 100);
    assert_eq!(orm.count(&Filter::All).wait()?, 100);
    orm.shutdown();
    Ok(())
}

#[test]
fn rows_stream_back_in_order() -> Result<(), OrmError> {
    let (_dir, orm) = pool_orm(2)?;
    orm.insert_many(entries(300)).wait()?;

    let ids = orm
        .select_with(&Filter::All, &SelectOptions::new().order_by("id", Order::Asc))
        .map(|r| r.map(|e| e.id))
        .collect::<Result<Vec<_>, _>>()?;
    assert_eq!(ids, (1..=300).collect::<Vec<_>>());

    let paged = orm
        .select_paginated(64)
        .collect::<Result<Vec<_>, _>>()?;
    assert_eq!(paged.len(), 300);

    // Dropping a stream part-way must not wedge the worker.
    let mut partial = orm.select(&Filter::All);
    assert!(partial.next().is_some());
    drop(partial);
    assert_eq!(orm.count(&Filter::eq("kind", "B")).wait()?, 150);
    Ok(())
}

#[test]
fn pinned_steps_share_one_connection() -> Result<(), OrmError> {
    let (_dir, orm) = pool_orm(3)?;
    let total = orm
        .pinned(|table| {
            table
                .connection()
                .execute_batch("CREATE TEMP TABLE scratch (x INTEGER)")?;
            table.insert(&Entry::new(1, "A", b"x"))?;
            table.insert(&Entry::new(2, "B", b"y"))?;
            // Temp tables are per connection, so this only works on the same worker.
            table.execute_raw("INSERT INTO scratch VALUES (1)", &RowMapping::new())?;
            table.count(&Filter::All)
        })
        .wait()?;
    assert_eq!(total, 2);
    Ok(())
}

#[test]
fn build_errors_resolve_without_a_worker() -> Result<(), OrmError> {
    let (_dir, orm) = pool_orm(1)?;
    let err = orm.update(&RowMapping::new(), &Filter::All).wait().unwrap_err();
    assert!(err.is_build_time(), "{err}");
    let mut rows = orm.select(&Filter::eq("missing", 1));
    assert!(matches!(rows.next(), Some(Err(OrmError::SchemaError(_)))));
    assert!(rows.next().is_none());
    Ok(())
}

#[test]
fn panicking_job_leaves_the_pool_usable() -> Result<(), OrmError> {
    let (_dir, orm) = pool_orm(1)?;
    let err = orm
        .pinned(|_| -> Result<(), OrmError> { panic!("job blew up") })
        .wait()
        .unwrap_err();
    assert!(matches!(err, OrmError::WorkerPanic(ref m) if m.contains("blew up")));
    orm.insert(&Entry::new(1, "A", b"x")).wait()?;
    assert_eq!(orm.count(&Filter::All).wait()?, 1);
    Ok(())
}

#[test]
fn shutdown_rejects_later_work() -> Result<(), OrmError> {
    let (_dir, orm) = pool_orm(2)?;
    let pending = orm.insert(&Entry::new(1, "A", b"x"));
    orm.shutdown();
    // Work queued before shutdown still drains.
    assert_eq!(pending.wait()?, 1);
    assert!(matches!(
        orm.count(&Filter::All).wait(),
        Err(OrmError::PoolClosed)
    ));
    orm.shutdown();
    Ok(())
}

#[test]
fn shutdown_returns_while_a_large_select_is_unread() -> Result<(), OrmError> {
    let (_dir, orm) = pool_orm(1)?;
    orm.insert_many(entries(300)).wait()?;
    let mut rows = orm.select(&Filter::All);

    let (done_tx, done_rx) = std::sync::mpsc::channel();
    let closer = orm.clone();
    thread::spawn(move || {
        closer.shutdown();
        let _ = done_tx.send(());
    });
    done_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("shutdown stalled behind an unread stream");

    let mut delivered = 0;
    let last = loop {
        match rows.next() {
            Some(Ok(_)) => delivered += 1,
            other => break other,
        }
    };
    assert!(delivered < 300);
    assert!(matches!(last, Some(Err(OrmError::PoolClosed))));
    assert!(rows.next().is_none());
    Ok(())
}

#[test]
fn shutdown_from_the_stream_holder_thread() -> Result<(), OrmError> {
    let (_dir, orm) = pool_orm(1)?;
    orm.insert_many(entries(300)).wait()?;
    let rows = orm.select(&Filter::All);
    // Same thread holds the unread stream and joins the workers.
    orm.shutdown();
    let outcome = rows.collect::<Result<Vec<_>, _>>();
    assert!(matches!(outcome, Err(OrmError::PoolClosed)));
    Ok(())
}
