use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

use crate::models::{CombinationKey, PlaceRecord, TrendingPlace, UpsertPolicy};

mod json_file;
mod records;

pub use json_file::JsonFileStore;

pub type SinkFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("record encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("invalid persisted data: {0}")]
    InvalidData(String),
}

/// Destination for pipeline output.
///
/// Writes are keyed by the record's natural key `(location, interest, name)`,
/// so repeating a batch never duplicates rows.
pub trait RecordSink: Send + Sync {
    /// Returns the number of records written.
    fn upsert_batch<'a>(
        &'a self,
        key: &'a CombinationKey,
        records: &'a [PlaceRecord],
        policy: UpsertPolicy,
    ) -> SinkFuture<'a, usize>;

    fn replace_trending<'a>(
        &'a self,
        location: &'a str,
        places: &'a [TrendingPlace],
    ) -> SinkFuture<'a, usize>;

    fn list_records<'a>(&'a self, key: &'a CombinationKey) -> SinkFuture<'a, Vec<PlaceRecord>>;

    fn list_trending<'a>(&'a self, location: &'a str) -> SinkFuture<'a, Vec<TrendingPlace>>;
}

#[derive(Clone)]
pub struct Store {
    pool: PgPool,
}

impl Store {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        let _: i32 = sqlx::query_scalar("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }

    pub async fn run_migrations(&self, migrations_dir: &Path) -> Result<(), StoreError> {
        let migrator = sqlx::migrate::Migrator::new(migrations_dir.to_path_buf()).await?;
        migrator.run(&self.pool).await?;
        Ok(())
    }
}

fn ensure_records_match(key: &CombinationKey, records: &[PlaceRecord]) -> Result<(), StoreError> {
    match records
        .iter()
        .find(|record| record.location != key.location || record.interest != key.interest)
    {
        Some(record) => Err(StoreError::InvalidData(format!(
            "record {} belongs to {} / {}, not {key}",
            record.name, record.location, record.interest
        ))),
        None => Ok(()),
    }
}
