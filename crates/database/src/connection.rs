use crate::error::DbError;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::env;
use std::time::Duration;

/// Establishes a connection pool to the PostgreSQL database.
///
/// Reads `DATABASE_URL` from the environment (a `.env` file is honoured when
/// present) and returns a pool that can be shared across the application.
pub async fn connect() -> Result<PgPool, DbError> {
    // A missing .env file is fine; the variable may come from the real environment.
    dotenvy::dotenv().ok();

    let database_url = env::var("DATABASE_URL")
        .map_err(|_e| DbError::ConnectionConfigError("DATABASE_URL must be set.".to_string()))?;

    connect_with(&database_url).await
}

/// Establishes a connection pool to an explicit database URL.
pub async fn connect_with(database_url: &str) -> Result<PgPool, DbError> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await?;

    tracing::debug!("Database connection pool established.");
    Ok(pool)
}

/// Applies the embedded schema migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<(), DbError> {
    // Use a relative path from the crate root
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
