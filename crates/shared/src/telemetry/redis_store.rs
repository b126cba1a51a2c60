use std::time::Duration;

use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use super::entry::LogEntry;
use super::store::{LogStore, TelemetryStoreError, TelemetryStoreFuture};

const DEFAULT_LOG_KEY_PREFIX: &str = "wayfarer:logs:v1";

/// Redis-backed log store. Entries use `SET EX`; indexes are capped lists.
#[derive(Clone)]
pub struct RedisLogStore {
    connection: ConnectionManager,
    key_prefix: String,
}

impl RedisLogStore {
    pub async fn new(redis_url: &str) -> Result<Self, TelemetryStoreError> {
        let client = redis::Client::open(redis_url)?;
        let connection = ConnectionManager::new(client).await?;

        let mut health_connection = connection.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut health_connection)
            .await?;

        Ok(Self {
            connection,
            key_prefix: DEFAULT_LOG_KEY_PREFIX.to_string(),
        })
    }

    fn entry_key(&self, id: &str) -> String {
        format!("{}:entry:{id}", self.key_prefix)
    }

    fn index_key(&self, index: &str) -> String {
        format!("{}:{index}", self.key_prefix)
    }
}

impl LogStore for RedisLogStore {
    fn put_entry<'a>(
        &'a self,
        entry: &'a LogEntry,
        ttl: Duration,
    ) -> TelemetryStoreFuture<'a, ()> {
        Box::pin(async move {
            let payload = serde_json::to_string(entry)?;
            let mut connection = self.connection.clone();
            let _: () = connection
                .set_ex(self.entry_key(&entry.id), payload, ttl.as_secs().max(1))
                .await?;
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
            let key = self.index_key(index);
            let stop = isize::try_from(cap.saturating_sub(1)).unwrap_or(isize::MAX);
            let mut connection = self.connection.clone();
            let _: i64 = connection.lpush(&key, entry_id).await?;
            let _: () = connection.ltrim(&key, 0, stop).await?;
            Ok(())
        })
    }

    fn get_entry<'a>(&'a self, id: &'a str) -> TelemetryStoreFuture<'a, Option<LogEntry>> {
        Box::pin(async move {
            let mut connection = self.connection.clone();
            let payload: Option<String> = connection.get(self.entry_key(id)).await?;
            payload
                .map(|raw| serde_json::from_str(&raw))
                .transpose()
                .map_err(TelemetryStoreError::from)
        })
    }

    fn read_index<'a>(
        &'a self,
        index: &'a str,
        limit: usize,
    ) -> TelemetryStoreFuture<'a, Vec<String>> {
        Box::pin(async move {
            if limit == 0 {
                return Ok(Vec::new());
            }
            let stop = isize::try_from(limit - 1).unwrap_or(isize::MAX);
            let mut connection = self.connection.clone();
            let ids: Vec<String> = connection.lrange(self.index_key(index), 0, stop).await?;
            Ok(ids)
        })
    }
}
