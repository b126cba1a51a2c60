use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::entry::{LogCategory, LogEntry, LogLevel};
use crate::clock::{Clock, expires_after};

pub const CATEGORY_INDEX_CAP: usize = 1_000;
pub const USER_INDEX_CAP: usize = 100;

pub type TelemetryStoreFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, TelemetryStoreError>> + Send + 'a>>;

#[derive(Debug, Error)]
pub enum TelemetryStoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("archive io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("log entry encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Keyed, expiring storage for log entries plus bounded most-recent-first indexes.
pub trait LogStore: Send + Sync {
    fn put_entry<'a>(&'a self, entry: &'a LogEntry, ttl: Duration)
    -> TelemetryStoreFuture<'a, ()>;

    /// Prepends `entry_id` to `index`, keeping at most `cap` ids.
    fn push_index<'a>(
        &'a self,
        index: &'a str,
        entry_id: &'a str,
        cap: usize,
    ) -> TelemetryStoreFuture<'a, ()>;

    fn get_entry<'a>(&'a self, id: &'a str) -> TelemetryStoreFuture<'a, Option<LogEntry>>;

    fn read_index<'a>(
        &'a self,
        index: &'a str,
        limit: usize,
    ) -> TelemetryStoreFuture<'a, Vec<String>>;
}

pub(crate) fn category_index(category: LogCategory, level: LogLevel) -> String {
    format!("index:{}:{}", category.as_str(), level.as_str())
}

pub(crate) fn user_index(user_id: &str) -> String {
    format!("user:{user_id}")
}

#[derive(Default)]
struct MemoryState {
    entries: HashMap<String, (LogEntry, DateTime<Utc>)>,
    indexes: HashMap<String, VecDeque<String>>,
}

/// In-process store with clock-driven expiry.
pub struct MemoryLogStore {
    clock: Arc<dyn Clock>,
    state: Mutex<MemoryState>,
}

impl MemoryLogStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: Mutex::new(MemoryState::default()),
        }
    }

    pub fn entry_count(&self) -> usize {
        self.lock().entries.len()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl LogStore for MemoryLogStore {
    fn put_entry<'a>(
        &'a self,
        entry: &'a LogEntry,
        ttl: Duration,
    ) -> TelemetryStoreFuture<'a, ()> {
        Box::pin(async move {
            let expires_at = expires_after(self.clock.now(), ttl);
            self.lock()
                .entries
                .insert(entry.id.clone(), (entry.clone(), expires_at));
            Ok(())
        })
    }

    fn push_index<'a>(
        &'a self,
        index: &'a str,
        entry_id: &'a str,
        cap: usize,
    ) -> TelemetryStoreFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.lock();
            let ids = state.indexes.entry(index.to_string()).or_default();
            ids.push_front(entry_id.to_string());
            ids.truncate(cap);
            Ok(())
        })
    }

    fn get_entry<'a>(&'a self, id: &'a str) -> TelemetryStoreFuture<'a, Option<LogEntry>> {
        Box::pin(async move {
            let now = self.clock.now();
            let mut state = self.lock();
            let expired = match state.entries.get(id) {
                Some((entry, expires_at)) if now < *expires_at => return Ok(Some(entry.clone())),
                Some(_) => true,
                None => false,
            };
            if expired {
                state.entries.remove(id);
            }
            Ok(None)
        })
    }

    fn read_index<'a>(
        &'a self,
        index: &'a str,
        limit: usize,
    ) -> TelemetryStoreFuture<'a, Vec<String>> {
        Box::pin(async move {
            Ok(self
                .lock()
                .indexes
                .get(index)
                .map(|ids| ids.iter().take(limit).cloned().collect())
                .unwrap_or_default())
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::{TimeZone, Utc};

    use super::{LogStore, MemoryLogStore};
    use crate::clock::ManualClock;
    use crate::telemetry::entry::{LogCategory, LogEntry, LogLevel};

    fn entry(id: &str) -> LogEntry {
        LogEntry {
            id: id.to_string(),
            timestamp: Utc::now(),
            level: LogLevel::Info,
            category: LogCategory::System,
            tags: Vec::new(),
            message: "hello".to_string(),
            data: None,
            user_id: None,
            session_id: "session".to_string(),
            request_id: None,
            duration_ms: None,
        }
    }

    #[tokio::test]
    async fn index_is_most_recent_first_and_capped() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = MemoryLogStore::new(clock);
        for id in ["a", "b", "c", "d"] {
            store
                .push_index("index:system:info", id, 3)
                .await
                .expect("push should succeed");
        }

        let ids = store
            .read_index("index:system:info", 10)
            .await
            .expect("read should succeed");
        assert_eq!(ids, vec!["d", "c", "b"]);
    }

    #[tokio::test]
    async fn entries_disappear_once_ttl_elapses() {
        let start = Utc
            .with_ymd_and_hms(2026, 3, 1, 0, 0, 0)
            .single()
            .expect("timestamp should be valid");
        let clock = Arc::new(ManualClock::new(start));
        let store = MemoryLogStore::new(clock.clone());
        store
            .put_entry(&entry("e1"), Duration::from_secs(60))
            .await
            .expect("put should succeed");

        clock.advance(chrono::Duration::seconds(59));
        assert!(store.get_entry("e1").await.expect("get").is_some());

        clock.advance(chrono::Duration::seconds(1));
        assert!(store.get_entry("e1").await.expect("get").is_none());
        assert_eq!(store.entry_count(), 0);
    }
}
