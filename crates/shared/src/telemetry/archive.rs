use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::NaiveDate;
use tokio::io::AsyncWriteExt;

use super::entry::{LogCategory, LogEntry};
use super::store::{TelemetryStoreError, TelemetryStoreFuture};

/// Long-term storage for error entries, partitioned by category and UTC day.
pub trait ArchiveStore: Send + Sync {
    fn append<'a>(&'a self, entry: &'a LogEntry) -> TelemetryStoreFuture<'a, ()>;

    fn read_partition<'a>(
        &'a self,
        category: LogCategory,
        date: NaiveDate,
    ) -> TelemetryStoreFuture<'a, Vec<LogEntry>>;
}

/// Relative object path for a partition, e.g. `logs/llm/2026-03-01.jsonl`.
pub fn partition_path(category: LogCategory, date: NaiveDate) -> String {
    format!("logs/{}/{}.jsonl", category.as_str(), date.format("%Y-%m-%d"))
}

fn entry_partition(entry: &LogEntry) -> String {
    partition_path(entry.category, entry.timestamp.date_naive())
}

/// Appends JSON lines beneath a root directory.
#[derive(Debug, Clone)]
pub struct FsArchiveStore {
    root: PathBuf,
}

impl FsArchiveStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn io_error(path: &Path, source: std::io::Error) -> TelemetryStoreError {
    TelemetryStoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

impl ArchiveStore for FsArchiveStore {
    fn append<'a>(&'a self, entry: &'a LogEntry) -> TelemetryStoreFuture<'a, ()> {
        Box::pin(async move {
            let path = self.root.join(entry_partition(entry));
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|err| io_error(parent, err))?;
            }

            let mut line = serde_json::to_string(entry)?;
            line.push('\n');

            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await
                .map_err(|err| io_error(&path, err))?;
            file.write_all(line.as_bytes())
                .await
                .map_err(|err| io_error(&path, err))?;
            file.flush().await.map_err(|err| io_error(&path, err))?;
            Ok(())
        })
    }

    fn read_partition<'a>(
        &'a self,
        category: LogCategory,
        date: NaiveDate,
    ) -> TelemetryStoreFuture<'a, Vec<LogEntry>> {
        Box::pin(async move {
            let path = self.root.join(partition_path(category, date));
            let raw = match tokio::fs::read_to_string(&path).await {
                Ok(raw) => raw,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
                Err(err) => return Err(io_error(&path, err)),
            };

            Ok(raw
                .lines()
                .filter(|line| !line.trim().is_empty())
                .filter_map(|line| match serde_json::from_str::<LogEntry>(line) {
                    Ok(entry) => Some(entry),
                    Err(err) => {
                        tracing::warn!(path = %path.display(), "skipping unreadable archive line: {err}");
                        None
                    }
                })
                .collect())
        })
    }
}

#[derive(Debug, Default)]
pub struct MemoryArchiveStore {
    partitions: Mutex<HashMap<String, Vec<LogEntry>>>,
}

impl MemoryArchiveStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn partition_names(&self) -> Vec<String> {
        let mut names = self.lock().keys().cloned().collect::<Vec<_>>();
        names.sort();
        names
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<LogEntry>>> {
        match self.partitions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl ArchiveStore for MemoryArchiveStore {
    fn append<'a>(&'a self, entry: &'a LogEntry) -> TelemetryStoreFuture<'a, ()> {
        Box::pin(async move {
            self.lock()
                .entry(entry_partition(entry))
                .or_default()
                .push(entry.clone());
            Ok(())
        })
    }

    fn read_partition<'a>(
        &'a self,
        category: LogCategory,
        date: NaiveDate,
    ) -> TelemetryStoreFuture<'a, Vec<LogEntry>> {
        Box::pin(async move {
            Ok(self
                .lock()
                .get(&partition_path(category, date))
                .cloned()
                .unwrap_or_default())
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::{ArchiveStore, FsArchiveStore, partition_path};
    use crate::telemetry::entry::{LogCategory, LogEntry, LogLevel};

    #[test]
    fn partition_path_uses_category_and_day() {
        let date = chrono::NaiveDate::from_ymd_opt(2026, 3, 1).expect("date should be valid");
        assert_eq!(
            partition_path(LogCategory::Llm, date),
            "logs/llm/2026-03-01.jsonl"
        );
    }

    #[tokio::test]
    async fn fs_archive_appends_json_lines() {
        let root = std::env::temp_dir().join(format!("wayfarer-archive-{}", uuid::Uuid::new_v4()));
        let store = FsArchiveStore::new(&root);
        let timestamp = Utc
            .with_ymd_and_hms(2026, 3, 1, 8, 30, 0)
            .single()
            .expect("timestamp should be valid");

        for id in ["first", "second"] {
            let entry = LogEntry {
                id: id.to_string(),
                timestamp,
                level: LogLevel::Error,
                category: LogCategory::Pipeline,
                tags: vec!["combination".to_string()],
                message: "structuring failed".to_string(),
                data: None,
                user_id: None,
                session_id: "session".to_string(),
                request_id: None,
                duration_ms: None,
            };
            store.append(&entry).await.expect("append should succeed");
        }

        let entries = store
            .read_partition(LogCategory::Pipeline, timestamp.date_naive())
            .await
            .expect("read should succeed");
        assert_eq!(
            entries.iter().map(|entry| entry.id.as_str()).collect::<Vec<_>>(),
            vec!["first", "second"]
        );
        assert!(root.join("logs/pipeline/2026-03-01.jsonl").exists());

        let _ = std::fs::remove_dir_all(root);
    }
}
