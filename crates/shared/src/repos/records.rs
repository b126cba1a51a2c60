use sqlx::Row;
use sqlx::postgres::PgRow;

use super::{RecordSink, SinkFuture, Store, StoreError, ensure_records_match};
use crate::models::{CombinationKey, PlaceRecord, RecordOrigin, TrendingPlace, UpsertPolicy};

impl Store {
    /// Writes one combination's batch in a single transaction.
    ///
    /// `Merge` upserts by natural key and leaves names absent from the batch
    /// untouched. `ReplaceBatch` deletes the combination's rows first.
    pub async fn upsert_place_records(
        &self,
        key: &CombinationKey,
        records: &[PlaceRecord],
        policy: UpsertPolicy,
    ) -> Result<usize, StoreError> {
        ensure_records_match(key, records)?;

        let mut tx = self.pool.begin().await?;

        if policy == UpsertPolicy::ReplaceBatch {
            sqlx::query("DELETE FROM place_records WHERE location = $1 AND interest = $2")
                .bind(&key.location)
                .bind(&key.interest)
                .execute(&mut *tx)
                .await?;
        }

        for record in records {
            sqlx::query(
                "INSERT INTO place_records (
                   location, interest, name, description, category, tags, address,
                   latitude, longitude, price_level, popularity_score, origin, generated_at
                 )
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                 ON CONFLICT (location, interest, name)
                 DO UPDATE SET
                   description = EXCLUDED.description,
                   category = EXCLUDED.category,
                   tags = EXCLUDED.tags,
                   address = EXCLUDED.address,
                   latitude = EXCLUDED.latitude,
                   longitude = EXCLUDED.longitude,
                   price_level = EXCLUDED.price_level,
                   popularity_score = EXCLUDED.popularity_score,
                   origin = EXCLUDED.origin,
                   generated_at = EXCLUDED.generated_at,
                   updated_at = NOW()",
            )
            .bind(&record.location)
            .bind(&record.interest)
            .bind(&record.name)
            .bind(&record.description)
            .bind(&record.category)
            .bind(&record.tags)
            .bind(record.address.as_deref())
            .bind(record.latitude)
            .bind(record.longitude)
            .bind(record.price_level)
            .bind(record.popularity_score)
            .bind(record.origin.as_str())
            .bind(record.generated_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(records.len())
    }

    pub async fn list_place_records(
        &self,
        key: &CombinationKey,
    ) -> Result<Vec<PlaceRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT location, interest, name, description, category, tags, address,
                    latitude, longitude, price_level, popularity_score, origin, generated_at
             FROM place_records
             WHERE location = $1
               AND interest = $2
             ORDER BY popularity_score DESC, name ASC",
        )
        .bind(&key.location)
        .bind(&key.interest)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(place_record_from_row).collect()
    }

    pub async fn replace_trending_places(
        &self,
        location: &str,
        places: &[TrendingPlace],
    ) -> Result<usize, StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM trending_places WHERE location = $1")
            .bind(location)
            .execute(&mut *tx)
            .await?;

        for place in places {
            sqlx::query(
                "INSERT INTO trending_places (location, rank, name, reason, score, origin, generated_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .bind(location)
            .bind(place.rank)
            .bind(&place.name)
            .bind(&place.reason)
            .bind(place.score)
            .bind(place.origin.as_str())
            .bind(place.generated_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(places.len())
    }

    pub async fn list_trending_places(
        &self,
        location: &str,
    ) -> Result<Vec<TrendingPlace>, StoreError> {
        let rows = sqlx::query(
            "SELECT location, rank, name, reason, score, origin, generated_at
             FROM trending_places
             WHERE location = $1
             ORDER BY rank ASC",
        )
        .bind(location)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(TrendingPlace {
                    location: row.try_get("location")?,
                    rank: row.try_get("rank")?,
                    name: row.try_get("name")?,
                    reason: row.try_get("reason")?,
                    score: row.try_get("score")?,
                    origin: origin_from_row(row)?,
                    generated_at: row.try_get("generated_at")?,
                })
            })
            .collect()
    }
}

fn origin_from_row(row: &PgRow) -> Result<RecordOrigin, StoreError> {
    let raw: String = row.try_get("origin")?;
    RecordOrigin::from_db(&raw)
        .ok_or_else(|| StoreError::InvalidData(format!("unknown record origin persisted: {raw}")))
}

fn place_record_from_row(row: &PgRow) -> Result<PlaceRecord, StoreError> {
    Ok(PlaceRecord {
        location: row.try_get("location")?,
        interest: row.try_get("interest")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        category: row.try_get("category")?,
        tags: row.try_get("tags")?,
        address: row.try_get("address")?,
        latitude: row.try_get("latitude")?,
        longitude: row.try_get("longitude")?,
        price_level: row.try_get("price_level")?,
        popularity_score: row.try_get("popularity_score")?,
        origin: origin_from_row(row)?,
        generated_at: row.try_get("generated_at")?,
    })
}

impl RecordSink for Store {
    fn upsert_batch<'a>(
        &'a self,
        key: &'a CombinationKey,
        records: &'a [PlaceRecord],
        policy: UpsertPolicy,
    ) -> SinkFuture<'a, usize> {
        Box::pin(self.upsert_place_records(key, records, policy))
    }

    fn replace_trending<'a>(
        &'a self,
        location: &'a str,
        places: &'a [TrendingPlace],
    ) -> SinkFuture<'a, usize> {
        Box::pin(self.replace_trending_places(location, places))
    }

    fn list_records<'a>(&'a self, key: &'a CombinationKey) -> SinkFuture<'a, Vec<PlaceRecord>> {
        Box::pin(self.list_place_records(key))
    }

    fn list_trending<'a>(&'a self, location: &'a str) -> SinkFuture<'a, Vec<TrendingPlace>> {
        Box::pin(self.list_trending_places(location))
    }
}
