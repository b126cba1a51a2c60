use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::{RecordSink, SinkFuture, StoreError, ensure_records_match};
use crate::clock::{Clock, SystemClock};
use crate::models::{
    CombinationKey, PlaceRecord, StoredBatch, StoredTrending, TrendingPlace, UpsertPolicy,
};

const TRENDING_DIR: &str = "trending";

/// File-per-combination store: `{root}/{location}/{interest}.json`, with
/// trending lists under `{root}/trending/{location}.json`.
///
/// Files are written to a temporary sibling and renamed into place, so a
/// reader never sees a half-written batch.
pub struct JsonFileStore {
    root: PathBuf,
    clock: Arc<dyn Clock>,
}

impl JsonFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn batch_path(&self, key: &CombinationKey) -> PathBuf {
        self.root
            .join(path_segment(&key.location))
            .join(format!("{}.json", path_segment(&key.interest)))
    }

    pub fn trending_path(&self, location: &str) -> PathBuf {
        self.root
            .join(TRENDING_DIR)
            .join(format!("{}.json", path_segment(location)))
    }

    /// Distinct keys can slug to the same path, so a file holding another
    /// key's batch is rejected rather than read or merged into.
    pub async fn read_batch(&self, key: &CombinationKey) -> Result<Option<StoredBatch>, StoreError> {
        let path = self.batch_path(key);
        match read_json::<StoredBatch>(&path).await? {
            Some(batch) if batch.location != key.location || batch.interest != key.interest => {
                Err(StoreError::InvalidData(format!(
                    "{} holds {} / {}, not {key}",
                    path.display(),
                    batch.location,
                    batch.interest
                )))
            }
            batch => Ok(batch),
        }
    }

    async fn write_batch(
        &self,
        key: &CombinationKey,
        records: &[PlaceRecord],
        policy: UpsertPolicy,
    ) -> Result<usize, StoreError> {
        ensure_records_match(key, records)?;

        let mut merged = match (policy, self.read_batch(key).await?) {
            (UpsertPolicy::Merge, Some(existing)) => existing.records,
            _ => Vec::new(),
        };
        for record in records {
            match merged.iter_mut().find(|existing| existing.name == record.name) {
                Some(existing) => *existing = record.clone(),
                None => merged.push(record.clone()),
            }
        }

        let batch = StoredBatch {
            location: key.location.clone(),
            interest: key.interest.clone(),
            records: merged,
            last_updated: self.clock.now(),
        };
        write_json(&self.batch_path(key), &batch).await?;
        Ok(records.len())
    }

    async fn write_trending(
        &self,
        location: &str,
        places: &[TrendingPlace],
    ) -> Result<usize, StoreError> {
        let trending = StoredTrending {
            location: location.to_string(),
            places: places.to_vec(),
            last_updated: self.clock.now(),
        };
        write_json(&self.trending_path(location), &trending).await?;
        Ok(places.len())
    }
}

impl RecordSink for JsonFileStore {
    fn upsert_batch<'a>(
        &'a self,
        key: &'a CombinationKey,
        records: &'a [PlaceRecord],
        policy: UpsertPolicy,
    ) -> SinkFuture<'a, usize> {
        Box::pin(self.write_batch(key, records, policy))
    }

    fn replace_trending<'a>(
        &'a self,
        location: &'a str,
        places: &'a [TrendingPlace],
    ) -> SinkFuture<'a, usize> {
        Box::pin(self.write_trending(location, places))
    }

    fn list_records<'a>(&'a self, key: &'a CombinationKey) -> SinkFuture<'a, Vec<PlaceRecord>> {
        Box::pin(async move {
            Ok(self
                .read_batch(key)
                .await?
                .map(|batch| batch.records)
                .unwrap_or_default())
        })
    }

    fn list_trending<'a>(&'a self, location: &'a str) -> SinkFuture<'a, Vec<TrendingPlace>> {
        Box::pin(async move {
            Ok(read_json::<StoredTrending>(&self.trending_path(location))
                .await?
                .map(|trending| trending.places)
                .unwrap_or_default())
        })
    }
}

/// Lowercased, filesystem-safe form of a location or interest.
fn path_segment(value: &str) -> String {
    let mut segment = String::with_capacity(value.len());
    for ch in value.trim().chars() {
        if ch.is_alphanumeric() {
            segment.extend(ch.to_lowercase());
        } else if !segment.ends_with('-') {
            segment.push('-');
        }
    }
    let segment = segment.trim_matches('-');
    if segment.is_empty() {
        "_".to_string()
    } else {
        segment.to_string()
    }
}

fn io_error(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(io_error(path, err)),
    }
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|err| io_error(parent, err))?;
    }

    let bytes = serde_json::to_vec_pretty(value)?;
    let staging = path.with_extension("json.tmp");
    tokio::fs::write(&staging, bytes)
        .await
        .map_err(|err| io_error(&staging, err))?;
    tokio::fs::rename(&staging, path)
        .await
        .map_err(|err| io_error(path, err))
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use chrono::Utc;

    use super::{JsonFileStore, path_segment};
    use crate::fallback;
    use crate::models::{CombinationKey, UpsertPolicy};
    use crate::repos::{RecordSink, StoreError};

    fn temp_root() -> PathBuf {
        std::env::temp_dir().join(format!("wayfarer-json-store-{}", uuid::Uuid::new_v4()))
    }

    #[test]
    fn path_segments_are_slugged() {
        assert_eq!(path_segment("  Los Angeles "), "los-angeles");
        assert_eq!(path_segment("Food & Drink"), "food-drink");
        assert_eq!(path_segment("../"), "_");
    }

    #[tokio::test]
    async fn merge_keeps_names_missing_from_a_later_batch() {
        let root = temp_root();
        let store = JsonFileStore::new(&root);
        let key = CombinationKey::new("Seattle", "Coffee");
        let records = fallback::activity_records(&key, 5, Utc::now());

        assert_eq!(
            store
                .upsert_batch(&key, &records, UpsertPolicy::Merge)
                .await
                .expect("first write should succeed"),
            5
        );
        store
            .upsert_batch(&key, &records[..4], UpsertPolicy::Merge)
            .await
            .expect("second write should succeed");

        let stored = store.list_records(&key).await.expect("read should succeed");
        assert_eq!(stored.len(), 5);
        assert!(stored.iter().any(|record| record.name == records[4].name));
        assert!(root.join("seattle/coffee.json").exists());

        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn replace_batch_drops_stale_names() {
        let root = temp_root();
        let store = JsonFileStore::new(&root);
        let key = CombinationKey::new("Seattle", "Coffee");
        let records = fallback::activity_records(&key, 5, Utc::now());

        store
            .upsert_batch(&key, &records, UpsertPolicy::Merge)
            .await
            .expect("first write should succeed");
        store
            .upsert_batch(&key, &records[..3], UpsertPolicy::ReplaceBatch)
            .await
            .expect("replace should succeed");

        let stored = store.list_records(&key).await.expect("read should succeed");
        assert_eq!(stored.len(), 3);

        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn repeated_batches_are_idempotent() {
        let root = temp_root();
        let store = JsonFileStore::new(&root);
        let key = CombinationKey::new("Chicago", "Art");
        let records = fallback::activity_records(&key, 5, Utc::now());

        for _ in 0..3 {
            store
                .upsert_batch(&key, &records, UpsertPolicy::Merge)
                .await
                .expect("write should succeed");
        }
        let stored = store.list_records(&key).await.expect("read should succeed");
        assert_eq!(stored, records);

        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn records_for_another_combination_are_rejected() {
        let root = temp_root();
        let store = JsonFileStore::new(&root);
        let records = fallback::activity_records(&CombinationKey::new("Miami", "Food"), 2, Utc::now());

        let err = store
            .upsert_batch(
                &CombinationKey::new("Miami", "Art"),
                &records,
                UpsertPolicy::Merge,
            )
            .await
            .expect_err("mismatched records should be rejected");
        assert!(matches!(err, StoreError::InvalidData(_)));
    }

    #[tokio::test]
    async fn trending_is_replaced_wholesale() {
        let root = temp_root();
        let store = JsonFileStore::new(&root);
        let now = Utc::now();
        let candidates = fallback::activity_records(&CombinationKey::new("Austin", "Food"), 5, now);

        store
            .replace_trending("Austin", &fallback::trending_places("Austin", &candidates, 5, now))
            .await
            .expect("first trending write should succeed");
        store
            .replace_trending("Austin", &fallback::trending_places("Austin", &candidates, 2, now))
            .await
            .expect("second trending write should succeed");

        let trending = store
            .list_trending("Austin")
            .await
            .expect("trending read should succeed");
        assert_eq!(trending.len(), 2);
        assert!(root.join("trending/austin.json").exists());

        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn keys_sharing_a_path_do_not_mix_records() {
        let root = temp_root();
        let store = JsonFileStore::new(&root);
        let original = CombinationKey::new("Los Angeles", "Coffee");
        let colliding = CombinationKey::new("los-angeles", "coffee");
        assert_eq!(store.batch_path(&original), store.batch_path(&colliding));

        store
            .upsert_batch(
                &original,
                &fallback::activity_records(&original, 3, Utc::now()),
                UpsertPolicy::Merge,
            )
            .await
            .expect("first write should succeed");

        for policy in [UpsertPolicy::Merge, UpsertPolicy::ReplaceBatch] {
            let err = store
                .upsert_batch(
                    &colliding,
                    &fallback::activity_records(&colliding, 2, Utc::now()),
                    policy,
                )
                .await
                .expect_err("colliding key must not overwrite the batch");
            assert!(matches!(err, StoreError::InvalidData(_)));
        }
        assert!(matches!(
            store.list_records(&colliding).await,
            Err(StoreError::InvalidData(_))
        ));

        let stored = store
            .list_records(&original)
            .await
            .expect("original batch should still load");
        assert_eq!(stored.len(), 3);
        assert!(stored.iter().all(|record| record.key() == original));

        let _ = std::fs::remove_dir_all(root);
    }
}
