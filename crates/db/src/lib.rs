pub mod identity;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tether_common::error::{TetherError, TetherResult};

/// Embedded schema migrations, applied with `MIGRATOR.run(&pool)`.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!();

/// Create a Postgres connection pool from a database URL.
pub async fn create_pool(database_url: &str) -> TetherResult<PgPool> {
    tracing::info!("connecting to database");
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .map_err(|e| TetherError::Database(e.to_string()))
}
