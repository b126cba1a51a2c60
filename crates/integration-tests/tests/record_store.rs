mod support;

use chrono::Utc;
use serial_test::serial;
use shared::fallback;
use shared::models::{CombinationKey, RecordOrigin, UpsertPolicy};
use shared::repos::RecordSink;

#[tokio::test]
#[serial]
async fn repeated_upserts_do_not_duplicate_rows() {
    let Some(store) = support::test_store().await else {
        return;
    };
    support::reset_database(store.pool()).await;

    let key = CombinationKey::new("Seattle", "Coffee");
    let records = fallback::activity_records(&key, 5, Utc::now());
    for _ in 0..2 {
        store
            .upsert_batch(&key, &records, UpsertPolicy::Merge)
            .await
            .expect("upsert should succeed");
    }

    let stored = store.list_records(&key).await.expect("list should succeed");
    assert_eq!(stored.len(), 5);
    assert!(
        stored
            .iter()
            .all(|record| record.origin == RecordOrigin::DeterministicFallback)
    );
}

#[tokio::test]
#[serial]
async fn merge_keeps_stale_names_and_updates_existing_ones() {
    let Some(store) = support::test_store().await else {
        return;
    };
    support::reset_database(store.pool()).await;

    let key = CombinationKey::new("Seattle", "Coffee");
    let first = fallback::activity_records(&key, 5, Utc::now());
    store
        .upsert_batch(&key, &first, UpsertPolicy::Merge)
        .await
        .expect("first upsert should succeed");

    let mut second = first[..4].to_vec();
    second[0].description = "Refreshed description".to_string();
    second[0].origin = RecordOrigin::ModelOutput;
    store
        .upsert_batch(&key, &second, UpsertPolicy::Merge)
        .await
        .expect("second upsert should succeed");

    let stored = store.list_records(&key).await.expect("list should succeed");
    assert_eq!(stored.len(), 5);
    assert!(stored.iter().any(|record| record.name == first[4].name));
    let updated = stored
        .iter()
        .find(|record| record.name == first[0].name)
        .expect("updated record should exist");
    assert_eq!(updated.description, "Refreshed description");
    assert_eq!(updated.origin, RecordOrigin::ModelOutput);
}

#[tokio::test]
#[serial]
async fn replace_batch_only_touches_its_combination() {
    let Some(store) = support::test_store().await else {
        return;
    };
    support::reset_database(store.pool()).await;

    let coffee = CombinationKey::new("Seattle", "Coffee");
    let art = CombinationKey::new("Seattle", "Art");
    let now = Utc::now();
    let coffee_records = fallback::activity_records(&coffee, 5, now);
    store
        .upsert_batch(&coffee, &coffee_records, UpsertPolicy::Merge)
        .await
        .expect("coffee upsert should succeed");
    store
        .upsert_batch(&art, &fallback::activity_records(&art, 5, now), UpsertPolicy::Merge)
        .await
        .expect("art upsert should succeed");

    store
        .upsert_batch(&coffee, &coffee_records[..2], UpsertPolicy::ReplaceBatch)
        .await
        .expect("replace should succeed");

    assert_eq!(
        store.list_records(&coffee).await.expect("list should succeed").len(),
        2
    );
    assert_eq!(
        store.list_records(&art).await.expect("list should succeed").len(),
        5
    );
}

#[tokio::test]
#[serial]
async fn trending_is_replaced_per_location() {
    let Some(store) = support::test_store().await else {
        return;
    };
    support::reset_database(store.pool()).await;

    let now = Utc::now();
    let candidates = fallback::activity_records(&CombinationKey::new("Austin", "Food"), 5, now);
    store
        .replace_trending("Austin", &fallback::trending_places("Austin", &candidates, 5, now))
        .await
        .expect("first trending write should succeed");
    store
        .replace_trending("Austin", &fallback::trending_places("Austin", &candidates, 3, now))
        .await
        .expect("second trending write should succeed");

    let trending = store
        .list_trending("Austin")
        .await
        .expect("trending read should succeed");
    assert_eq!(
        trending.iter().map(|place| place.rank).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
}
