mod common;

use common::{Entry, entries, memory_factory};
use futures_util::StreamExt;
use sqlite_tablespec::prelude::*;

async fn async_orm() -> Result<AsyncOrm<Entry>, OrmError> {
    let orm = AsyncOrm::<Entry>::new(&memory_factory(), "entries")?;
    orm.bootstrap().await?;
    Ok(orm)
}

#[tokio::test(flavor = "multi_thread")]
async fn crud_round_trip() -> Result<(), OrmError> {
    let orm = async_orm().await?;
    assert_eq!(orm.insert_many(entries(10)).await?, 10);

    let a_rows = orm.select(&Filter::eq("kind", "A")).try_collect().await?;
    assert_eq!(a_rows.len(), 5);
    assert!(a_rows.iter().all(|e| e.kind == "A"));

    let n = orm
        .update(&RowMapping::new().with("payload", vec![9_u8]), &Filter::eq("id", 4))
        .await?;
    assert_eq!(n, 1);
    let four = orm
        .select_one(&Filter::eq("id", 4), &SelectOptions::new())
        .await?;
    assert_eq!(four.map(|e| e.payload), Some(vec![9]));

    assert_eq!(orm.delete(&Filter::eq("kind", "B")).await?, 5);
    assert_eq!(orm.count(&Filter::All).await?, 5);
    orm.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn rows_are_a_stream() -> Result<(), OrmError> {
    let orm = async_orm().await?;
    orm.insert_many(entries(200)).await?;

    let mut rows = orm.select_paginated(32);
    let mut ids = Vec::new();
    while let Some(entry) = rows.next().await {
        ids.push(entry?.id);
    }
    assert_eq!(ids, (1..=200).collect::<Vec<_>>());

    let first_three: Vec<i64> = orm
        .select(&Filter::All)
        .take(3)
        .map(|r| r.map(|e| e.id))
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .collect::<Result<_, _>>()?;
    assert_eq!(first_three, [1, 2, 3]);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn errors_surface_through_the_future() -> Result<(), OrmError> {
    let orm = async_orm().await?;
    let err = orm.insert(&Entry::new(1, "Z", b"x")).await.unwrap_err();
    assert!(matches!(err, OrmError::ValidationError(_)), "{err}");

    let mut rows = orm.delete_returning(&Filter::eq("nope", 1));
    assert!(matches!(rows.next().await, Some(Err(OrmError::SchemaError(_)))));
    assert!(rows.next().await.is_none());

    orm.insert(&Entry::new(1, "A", b"x")).await?;
    let err = orm.insert(&Entry::new(1, "A", b"x")).await.unwrap_err();
    assert!(matches!(err, OrmError::EngineError { .. }), "{err}");
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_tasks_share_one_logical_connection() -> Result<(), OrmError> {
    let orm = async_orm().await?;
    let tasks: Vec<_> = (1..=20_i64)
        .map(|i| {
            let orm = orm.clone();
            tokio::spawn(async move { orm.insert(&Entry::new(i, "B", b"t")).await })
        })
        .collect();
    for task in tasks {
        task.await.expect("insert task panicked")?;
    }
    // One worker, one in-memory database: every insert landed in the same place.
    assert_eq!(orm.count(&Filter::eq("kind", "B")).await?, 20);
    orm.shutdown().await;
    assert!(matches!(
        orm.count(&Filter::All).await,
        Err(OrmError::PoolClosed)
    ));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn reads_after_shutdown_fail_cleanly_inside_the_runtime() -> Result<(), OrmError> {
    let orm = async_orm().await?;
    orm.insert_many(entries(3)).await?;
    orm.shutdown().await;

    let task = tokio::spawn({
        let orm = orm.clone();
        async move {
            let rows = orm.select(&Filter::All).try_collect().await;
            let paged = orm.select_paginated(2).try_collect().await;
            (rows, paged)
        }
    });
    let (rows, paged) = task.await.expect("select after shutdown panicked");
    assert!(matches!(rows, Err(OrmError::PoolClosed)));
    assert!(matches!(paged, Err(OrmError::PoolClosed)));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_ends_an_unread_stream() -> Result<(), OrmError> {
    let orm = async_orm().await?;
    orm.insert_many(entries(300)).await?;
    let rows = orm.select(&Filter::All);
    tokio::time::timeout(std::time::Duration::from_secs(5), orm.shutdown())
        .await
        .expect("shutdown stalled behind an unread stream");
    assert!(matches!(rows.try_collect().await, Err(OrmError::PoolClosed)));
    Ok(())
}
