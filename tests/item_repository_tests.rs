//! Item upsert and enrichment backlog queries.

mod test_utils;

use std::time::Duration;

use chrono::Utc;
use test_utils::{comment, item, setup_test_db, ts};
use tracksync::repositories::{ItemRepository, UpsertKind};

#[tokio::test]
async fn test_backlog_excludes_items_upserted_after_cutoff() {
    let db = setup_test_db().await.unwrap();
    let items = ItemRepository::new(db);

    items.upsert(1, &item(1, "open", ts(20))).await.unwrap();
    items.upsert(1, &item(2, "open", ts(10))).await.unwrap();
    items.upsert(2, &item(3, "open", ts(5))).await.unwrap();

    tokio::time::sleep(Duration::from_millis(5)).await;
    let cutoff = Utc::now();
    tokio::time::sleep(Duration::from_millis(5)).await;

    items.upsert(1, &item(4, "open", ts(1))).await.unwrap();

    let backlog = items.unenriched(1, cutoff, 50).await.unwrap();
    let numbers: Vec<_> = backlog.iter().map(|row| row.number).collect();
    assert_eq!(numbers, vec![2, 1]);

    items
        .replace_sub_resources(1002, &[comment(1, "looks good")])
        .await
        .unwrap();
    let backlog = items.unenriched(1, cutoff, 50).await.unwrap();
    let numbers: Vec<_> = backlog.iter().map(|row| row.number).collect();
    assert_eq!(numbers, vec![1]);

    let limited = items.unenriched(1, Utc::now(), 1).await.unwrap();
    assert_eq!(limited.len(), 1);
    assert_eq!(limited[0].number, 4);
}

#[tokio::test]
async fn test_backlog_is_bounded_and_ordered_by_update_time() {
    let db = setup_test_db().await.unwrap();
    let items = ItemRepository::new(db);

    for number in 1..=250 {
        items
            .upsert(1, &item(number, "open", ts(number as i64)))
            .await
            .unwrap();
    }
    let cutoff = Utc::now() + chrono::Duration::seconds(1);

    let backlog = items.unenriched(1, cutoff, 200).await.unwrap();

    assert_eq!(backlog.len(), 200);
    assert_eq!(backlog[0].number, 1);
}

#[tokio::test]
async fn test_upsert_classifies_insert_update_and_unchanged() {
    let db = setup_test_db().await.unwrap();
    let items = ItemRepository::new(db);

    let inserted = items.upsert(1, &item(5, "open", ts(0))).await.unwrap();
    assert_eq!(inserted.kind, UpsertKind::Inserted);
    assert!(inserted.needs_enrichment);

    items.replace_sub_resources(1005, &[]).await.unwrap();
    let unchanged = items.upsert(1, &item(5, "open", ts(0))).await.unwrap();
    assert_eq!(unchanged.kind, UpsertKind::Unchanged);
    assert!(!unchanged.needs_enrichment);

    let updated = items.upsert(1, &item(5, "closed", ts(60))).await.unwrap();
    assert_eq!(updated.kind, UpsertKind::Updated);
    assert!(updated.needs_enrichment);
    let stored = items.find(1005).await.unwrap().unwrap();
    assert_eq!(stored.state, "closed");
    assert!(!stored.sub_resource_fetched);
}
