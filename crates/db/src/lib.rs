//! `flowd-db` — PostgreSQL persistence for the execution engine.
//!
//! Row models and repositories for the `executions`, `tasks`, and
//! `workers` tables, plus [`store`] adapters implementing the
//! `flowd-core` store traits.

pub mod models;
pub mod repositories;
pub mod store;

use sqlx::postgres::PgPoolOptions;

pub type DbPool = sqlx::PgPool;

/// Create a connection pool from a database URL.
pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .connect(database_url)
        .await
}
