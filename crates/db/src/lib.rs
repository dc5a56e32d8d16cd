//! Persistence for the job queue.
//!
//! - [`models`] holds the `jobs` row struct, DTOs and status ids.
//! - [`repositories::JobRepo`] runs the PostgreSQL queries.
//! - [`JobStore`] is the seam the orchestrator depends on, implemented by
//!   [`PgJobStore`] (durable) and [`MemoryJobStore`] (tests, no database).

pub mod memory;
pub mod models;
pub mod repositories;
pub mod store;

use sqlx::postgres::PgPoolOptions;

pub use memory::MemoryJobStore;
pub use store::{JobStore, PgJobStore, StatusCounts, StoreError};

pub type DbPool = sqlx::PgPool;

/// Create a connection pool from a database URL.
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

/// Verify the database answers a trivial query.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Apply the embedded migrations in `crates/db/migrations`.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    let migrator = sqlx::migrate!("./migrations");
    tracing::info!(count = migrator.iter().count(), "Applying database migrations");
    migrator.run(pool).await
}
