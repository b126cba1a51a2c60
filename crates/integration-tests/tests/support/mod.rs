use std::path::PathBuf;

use shared::repos::Store;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tokio::sync::OnceCell;

static MIGRATIONS_APPLIED: OnceCell<()> = OnceCell::const_new();

/// Store against `DATABASE_URL`, or `None` when it is unset so the suite can
/// run on machines without Postgres.
pub async fn test_store() -> Option<Store> {
    let Some(database_url) = test_database_url() else {
        eprintln!("DATABASE_URL is not set; skipping Postgres-backed test");
        return None;
    };
    apply_migrations_once(&database_url).await;

    Some(
        Store::connect(&database_url, 5)
            .await
            .expect("test store connection should succeed"),
    )
}

pub async fn reset_database(pool: &PgPool) {
    sqlx::query("TRUNCATE TABLE place_records, trending_places")
        .execute(pool)
        .await
        .expect("database reset should succeed");
}

fn test_database_url() -> Option<String> {
    std::env::var("DATABASE_URL")
        .ok()
        .filter(|value| !value.trim().is_empty())
}

async fn apply_migrations_once(database_url: &str) {
    MIGRATIONS_APPLIED
        .get_or_init(|| async move {
            let pool = PgPoolOptions::new()
                .max_connections(2)
                .connect(database_url)
                .await
                .expect("migration pool connection should succeed");

            let migrations_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../db/migrations");
            let migrator = sqlx::migrate::Migrator::new(migrations_dir)
                .await
                .expect("migrations should load");
            migrator
                .run(&pool)
                .await
                .expect("migrations should apply successfully");
        })
        .await;
}
