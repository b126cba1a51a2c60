use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use serde_json::json;

use super::{
    ApiInteraction, ArchiveStore, LogCategory, LogContext, LogEntry, LogLevel, LogStore, MemoryArchiveStore,
    MemoryLogStore, TelemetrySink, TelemetryStoreError, TelemetryStoreFuture,
};
use crate::clock::ManualClock;

struct Harness {
    clock: Arc<ManualClock>,
    store: Arc<MemoryLogStore>,
    archive: Arc<MemoryArchiveStore>,
    sink: TelemetrySink,
}

fn harness(min_level: LogLevel) -> Harness {
    let start = Utc
        .with_ymd_and_hms(2026, 3, 1, 9, 0, 0)
        .single()
        .expect("start timestamp should be valid");
    let clock = Arc::new(ManualClock::new(start));
    let store = Arc::new(MemoryLogStore::new(clock.clone()));
    let archive = Arc::new(MemoryArchiveStore::new());
    let sink = TelemetrySink::builder(min_level)
        .with_store(store.clone())
        .with_archive(archive.clone())
        .with_clock(clock.clone())
        .with_session_id("session-1")
        .build();

    Harness {
        clock,
        store,
        archive,
        sink,
    }
}

#[tokio::test]
async fn debug_entries_expire_after_three_days() {
    let harness = harness(LogLevel::Debug);
    let entry = harness
        .sink
        .debug(LogCategory::Cache, "cache miss", LogContext::default())
        .await
        .expect("debug entry should pass the filter");

    harness.clock.advance(chrono::Duration::days(2));
    assert!(harness.sink.fetch(&entry.id).await.is_some());

    harness.clock.advance(chrono::Duration::days(1));
    assert!(harness.sink.fetch(&entry.id).await.is_none());
    assert!(
        harness
            .sink
            .recent(LogCategory::Cache, LogLevel::Debug, 10)
            .await
            .is_empty()
    );
}

#[tokio::test]
async fn error_entries_are_kept_and_archived() {
    let harness = harness(LogLevel::Info);
    let entry = harness
        .sink
        .error(
            LogCategory::Llm,
            "provider call failed",
            LogContext::default()
                .with_data(json!({ "provider": "openai" }))
                .with_user_id(Some("user-7".to_string())),
        )
        .await
        .expect("error entry should pass the filter");

    harness.clock.advance(chrono::Duration::days(89));
    let fetched = harness
        .sink
        .fetch(&entry.id)
        .await
        .expect("error entry should survive 89 days");
    assert_eq!(fetched.message, "provider call failed");
    assert_eq!(fetched.session_id, "session-1");

    let for_user = harness.sink.for_user("user-7", 10).await;
    assert_eq!(for_user.len(), 1);

    let archived = harness
        .sink
        .archived(LogCategory::Llm, entry.timestamp.date_naive())
        .await;
    assert_eq!(archived, vec![entry]);
    assert_eq!(
        harness.archive.partition_names(),
        vec!["logs/llm/2026-03-01.jsonl".to_string()]
    );
}

#[tokio::test]
async fn entries_below_the_minimum_level_are_dropped() {
    let harness = harness(LogLevel::Info);
    assert!(
        harness
            .sink
            .debug(LogCategory::System, "noise", LogContext::default())
            .await
            .is_none()
    );
    assert!(
        harness
            .sink
            .warn(LogCategory::System, "disk almost full", LogContext::default())
            .await
            .is_some()
    );
    assert_eq!(harness.store.entry_count(), 1);
    assert!(harness.archive.partition_names().is_empty());
}

#[tokio::test]
async fn recent_lists_newest_first_and_carries_request_id() {
    let harness = harness(LogLevel::Debug);
    harness.sink.set_request_id(Some("req-1".to_string()));
    for message in ["first", "second", "third"] {
        harness
            .sink
            .info(LogCategory::Pipeline, message, LogContext::default())
            .await;
    }

    let recent = harness
        .sink
        .recent(LogCategory::Pipeline, LogLevel::Info, 2)
        .await;
    assert_eq!(
        recent
            .iter()
            .map(|entry| entry.message.as_str())
            .collect::<Vec<_>>(),
        vec!["third", "second"]
    );
    assert!(
        recent
            .iter()
            .all(|entry| entry.request_id.as_deref() == Some("req-1"))
    );
}

#[tokio::test]
async fn operation_timer_records_start_and_completion() {
    let harness = harness(LogLevel::Debug);
    let timer = harness
        .sink
        .start_timer(
            LogCategory::Pipeline,
            "combination Seattle / Coffee",
            LogContext::default().with_tag("pipeline"),
        )
        .await;
    let completed = timer
        .finish()
        .await
        .expect("completion entry should be logged");

    assert_eq!(completed.level, LogLevel::Info);
    assert_eq!(completed.message, "combination Seattle / Coffee completed");
    assert!(completed.duration_ms.is_some());
    assert_eq!(
        harness
            .sink
            .recent(LogCategory::Pipeline, LogLevel::Debug, 10)
            .await
            .len(),
        1
    );
}

struct FailingStore;

impl LogStore for FailingStore {
    fn put_entry<'a>(
        &'a self,
        _entry: &'a LogEntry,
        _ttl: Duration,
    ) -> TelemetryStoreFuture<'a, ()> {
        Box::pin(async { Err(TelemetryStoreError::Encode(serde::de::Error::custom("down"))) })
    }

    fn push_index<'a>(
        &'a self,
        _index: &'a str,
        _entry_id: &'a str,
        _cap: usize,
    ) -> TelemetryStoreFuture<'a, ()> {
        Box::pin(async { Ok(()) })
    }

    fn get_entry<'a>(&'a self, _id: &'a str) -> TelemetryStoreFuture<'a, Option<LogEntry>> {
        Box::pin(async { Err(TelemetryStoreError::Encode(serde::de::Error::custom("down"))) })
    }

    fn read_index<'a>(
        &'a self,
        _index: &'a str,
        _limit: usize,
    ) -> TelemetryStoreFuture<'a, Vec<String>> {
        Box::pin(async { Ok(vec!["missing".to_string()]) })
    }
}

#[tokio::test]
async fn store_failures_never_reach_the_caller() {
    let archive = Arc::new(MemoryArchiveStore::new());
    let sink = TelemetrySink::builder(LogLevel::Debug)
        .with_store(Arc::new(FailingStore))
        .with_archive(archive.clone())
        .build();

    let entry = sink
        .error(LogCategory::Persistence, "write failed", LogContext::default())
        .await
        .expect("entry should still be produced");
    assert!(sink.fetch(&entry.id).await.is_none());
    assert!(
        sink.recent(LogCategory::Persistence, LogLevel::Error, 5)
            .await
            .is_empty()
    );
    assert_eq!(
        archive
            .read_partition(LogCategory::Persistence, entry.timestamp.date_naive())
            .await
            .expect("memory archive read should succeed")
            .len(),
        1
    );
}

#[tokio::test]
async fn api_interactions_log_by_outcome() {
    let harness = harness(LogLevel::Info);
    let ok = harness
        .sink
        .log_api_interaction(ApiInteraction {
            endpoint: "/v1/recommendations",
            method: "POST",
            request: Some(json!({ "location": "Seattle", "interest": "Coffee" })),
            response: Some(json!({ "count": 5 })),
            status: Some(200),
            duration: Duration::from_millis(42),
            error: None,
            user_id: Some("user-3"),
        })
        .await
        .expect("api entry should pass the filter");

    assert_eq!(ok.level, LogLevel::Info);
    assert_eq!(ok.category, LogCategory::Api);
    assert_eq!(ok.message, "POST /v1/recommendations");
    assert_eq!(ok.duration_ms, Some(42));
    assert_eq!(ok.user_id.as_deref(), Some("user-3"));
    assert_eq!(
        ok.data,
        Some(json!({
            "endpoint": "/v1/recommendations",
            "method": "POST",
            "request": { "location": "Seattle", "interest": "Coffee" },
            "response": { "count": 5 },
            "status": 200,
            "error": null,
        }))
    );

    let rejected = harness
        .sink
        .log_api_interaction(ApiInteraction {
            endpoint: "/v1/recommendations",
            method: "POST",
            request: None,
            response: Some(json!({ "error": "location is required" })),
            status: Some(422),
            duration: Duration::from_millis(3),
            error: None,
            user_id: None,
        })
        .await
        .expect("api entry should pass the filter");
    assert_eq!(rejected.level, LogLevel::Error);

    let unreachable = harness
        .sink
        .log_api_interaction(ApiInteraction {
            endpoint: "/v1/trending",
            method: "GET",
            request: None,
            response: None,
            status: None,
            duration: Duration::from_millis(5_000),
            error: Some("connection reset"),
            user_id: None,
        })
        .await
        .expect("api entry should pass the filter");
    assert_eq!(unreachable.level, LogLevel::Error);
    assert_eq!(
        unreachable.data.as_ref().map(|data| data["error"].clone()),
        Some(json!("connection reset"))
    );

    let archived = harness
        .sink
        .archived(LogCategory::Api, ok.timestamp.date_naive())
        .await;
    assert_eq!(archived, vec![rejected, unreachable]);
    assert_eq!(
        harness
            .sink
            .recent(LogCategory::Api, LogLevel::Info, 10)
            .await
            .len(),
        1
    );
}
