//! Shared test helpers for database integration tests.

#![allow(dead_code)]

use cofactor::db::Database;
use std::sync::Once;

/// Returns the test database URL from the `TEST_DATABASE_URL` environment variable.
/// Panics if the variable is not set.
pub fn test_db_url() -> String {
    std::env::var("TEST_DATABASE_URL")
        .expect("TEST_DATABASE_URL must be set for integration tests")
}

/// Returns true if the test database URL is configured.
pub fn has_test_db() -> bool {
    std::env::var("TEST_DATABASE_URL").is_ok()
}

/// One-time schema initialization.
static SCHEMA_INIT: Once = Once::new();

/// Create the ledger tables once per test binary. Runs on its own thread so it
/// can be called from inside an async test.
pub fn ensure_schema() {
    SCHEMA_INIT.call_once(|| {
        std::thread::spawn(|| {
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async {
                let db = Database::connect(&test_db_url(), 2).await.unwrap();
                db.ensure_schema().await.unwrap();
            });
        })
        .join()
        .unwrap();
    });
}

/// Connect to the test database with an empty ledger.
pub async fn setup_test_db() -> Database {
    ensure_schema();
    let db = Database::connect(&test_db_url(), 8)
        .await
        .expect("Failed to connect to test database");
    truncate_all_tables(db.pool()).await;
    db
}

/// Truncate all tables to ensure test isolation.
pub async fn truncate_all_tables(pool: &sqlx::PgPool) {
    sqlx::raw_sql("TRUNCATE TABLE factors, factor_jobs CASCADE")
        .execute(pool)
        .await
        .unwrap();
}
